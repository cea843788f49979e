//! Configuration module for finwire.
//!
//! Handles loading and validating server and client configuration from TOML files.

mod settings;

pub use settings::*;
