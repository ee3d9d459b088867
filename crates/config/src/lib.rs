//! Configuration module for the cutout background-removal queue
//!
//! Handles loading configuration from TOML files and environment variable overrides.

pub mod config;

pub use config::*;
