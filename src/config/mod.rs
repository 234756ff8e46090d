//! Configuration module for mc-fleet.
//!
//! This module holds the two configuration documents of the library: the
//! fleet-wide [`FleetConfig`] (catalog endpoints, timeouts, base directory)
//! and the per-instance [`DeclaredConfig`] that is persisted with every
//! registered instance.
//!
//! # Examples
//!
//! Loading fleet settings from a file:
//!
//! ```no_run
//! use mc_fleet::config::FleetConfig;
//!
//! let config = FleetConfig::from_file("fleet.json").unwrap();
//! println!("Instances live under {}", config.base_directory.display());
//! ```
//!
//! Validating a declared configuration:
//!
//! ```
//! use mc_fleet::config::{validate_declared_config, DeclaredConfig};
//!
//! let mut config = DeclaredConfig::default();
//! config.memory_min_mb = 4096;
//! config.memory_max_mb = 1024;
//! assert!(validate_declared_config(&config).is_err());
//! ```
mod parser;
pub mod validator;

pub use parser::{
    DEFAULT_CANONICAL_MANIFEST_URL, DEFAULT_CURATED_API_BASE, DEFAULT_CURATED_PROJECT,
    DeclaredConfig, Difficulty, FleetConfig,
};
pub use validator::{
    validate_declared_config, validate_fleet_config, validate_instance_name, validate_version,
};
