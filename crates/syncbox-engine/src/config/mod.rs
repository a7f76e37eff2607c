//! Run configuration: file parsing, option resolution, and validation.

pub mod parser;
pub mod resolve;
pub mod validator;

pub use resolve::{parse_byte_size, resolve_run_config, RunOptions};
pub use validator::validate_run_config;
