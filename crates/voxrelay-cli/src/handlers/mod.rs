//! Command handlers that delegate to `AppCore`.
//!
//! Handlers follow one pattern:
//! - Signature: `pub async fn execute(ctx: &CliContext, ...) -> Result<()>`
//! - Parse CLI-specific input, call `AppCore`, format the output
//!
//! Handlers never touch the database pool directly. The worker handler is
//! the one place that builds the runtime (registry, pipeline, dispatch).

pub mod housekeep;
pub mod jobs;
pub mod models;
pub mod profiles;
pub mod submit;
pub mod voices;
pub mod worker;
