//! Error types for the finwire transport.
//!
//! Provides a unified error handling system using thiserror.

mod types;

pub use types::*;
