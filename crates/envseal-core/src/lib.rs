//! envseal-core - Shared functionality for the envseal tools
//!
//! Where things live on disk and how the tool is configured.

pub mod config;
pub mod paths;

pub use config::Config;
pub use paths::Paths;
