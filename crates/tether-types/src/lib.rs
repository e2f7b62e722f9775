//! Shared types and error hierarchy for Tether.

pub mod error;
pub mod tool;

pub use error::{ConfigError, ToolError};
pub use tool::*;
