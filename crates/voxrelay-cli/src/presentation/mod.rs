//! Terminal formatting for CLI output.

mod job_display;
mod tables;

pub use job_display::{display_job, format_duration};
pub use tables::{format_optional, print_separator, truncate_string};
