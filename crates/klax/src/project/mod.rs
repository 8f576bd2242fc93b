//! Project Management
//!
//! Handles loading and saving project files from disk.

mod config;
mod loader;

pub use config::*;
pub use loader::*;
