// src/config/mod.rs

//! Server configuration.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate it into a [`ServerConfig`] (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{ClusterConfig, RawServerConfig, ServerConfig, StacksSection, StorageSection};
pub use validate::validate_cluster_stacks;
