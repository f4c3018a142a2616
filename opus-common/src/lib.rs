//! Shared infrastructure for the opus workspace
//!
//! Holds the common error type, TOML configuration loading and logging setup
//! used by every opus crate.

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
