//! `SQLite` repository implementations for voxrelay.
//!
//! Every port in `voxrelay_core::ports` that persists data has an
//! implementation here. Use [`setup_database`] to open a pool and
//! [`CoreFactory`] to wire repositories into `AppCore`.
#![deny(unsafe_code)]

pub mod factory;
pub mod repositories;
pub mod setup;

pub use factory::CoreFactory;

#[cfg(any(test, feature = "test-utils"))]
pub use factory::TestDb;

pub use repositories::{
    SqliteConversionModelRepository, SqliteJobRepository, SqliteQualityProfileRepository,
    SqliteVoiceProfileRepository,
};

pub use setup::setup_database;
#[cfg(any(test, feature = "test-utils"))]
pub use setup::setup_test_database;
