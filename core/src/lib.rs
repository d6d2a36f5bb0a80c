//! jctl Core - Foundational Types
//!
//! This module provides the error taxonomy and configuration shared by the
//! jctl runtime and command-line front end.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::JctlConfig;
pub use error::{JctlError, Result};

/// jctl version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
