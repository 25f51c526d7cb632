//! Core types for QIoT.
//!
//! This crate defines the error taxonomy and configuration shared by every
//! other crate in the workspace.

pub mod config;
pub mod error;

pub use config::{AppConfig, BrokerConfig, InfluxConfig, NamingConfig, NamingScope, SyncConfig};
pub use error::{Error, Result};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{defaults, env_vars, AppConfig, NamingScope};
    pub use crate::error::{Error, Result};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
