//! Message handlers module.
//!
//! Contains the handler registry and the built-in system handlers.
//!
//! ## Adding a New Handler
//!
//! 1. Implement the `Handler` trait (or write a closure with the same signature)
//! 2. Register it with `HandlerRegistry::register` before starting the server

mod registry;
mod traits;
mod types;

pub mod system;

pub use registry::HandlerRegistry;
pub use traits::Handler;
pub use types::{HandlerContext, HandlerResult};
