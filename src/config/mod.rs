//! Configuration module for Sign-Harvester
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sign_harvester::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Workers: {}", config.workers.count);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Backoff, Config, OutputConfig, RetryConfig, SiteConfig, StorageBackend, StorageConfig,
    SyncConfig, TimeoutConfig, UserAgentConfig, WorkerConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::validate;
