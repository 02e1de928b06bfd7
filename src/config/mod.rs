//! Configuration module for replica-commit
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use replica_commit::config::load_config;
//!
//! let config = load_config("/etc/replica-commit/config.json").unwrap();
//! println!("Vote timeout: {:?}", config.transaction.timeout());
//! ```

mod loader;
mod types;

pub use loader::{
    create_default_config, load_config, load_config_str, load_config_with_env,
    load_default_with_env,
};
pub use types::{Config, LogConfig, TransactionConfig};
