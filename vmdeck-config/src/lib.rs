//! Configuration system for the vmdeck synchronization engine.
//!
//! This crate provides configuration loading, saving, and default values
//! for the engine that keeps a selected VM's view in sync with its folder.
//! It includes:
//!
//! - The [`EngineConfig`] settings struct and its YAML persistence
//! - Default value functions used by serde
//! - Typed errors for config I/O and validation

pub mod defaults;
pub mod engine;
pub mod error;

pub use engine::EngineConfig;
pub use error::ConfigError;
