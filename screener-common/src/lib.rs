//! Screener Common - Shared configuration, logging, and error handling for the
//! pattern screener workspace.
//!
//! This crate provides:
//! - Configuration types and loading (`~/.screener/config.json` + env overrides)
//! - Error types and handling utilities
//! - Logging setup and run identifiers

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, ObservabilityConfig, RunnerSettings, ScreeningSettings};
pub use error::{Error, Result, ResultExt};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result, ResultExt};
    pub use crate::logging::init_logging;
}
