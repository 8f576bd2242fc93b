//! Klax - Command-line host for KlaxScript projects
//!
//! This crate provides:
//! - Project loading (`klax.toml` manifest plus `scripts/*.json`)
//! - A host that attaches the scripts to the entity the manifest describes

// Re-export core crates
pub use klax_runtime;

// Project management
pub mod project;

// Script host
pub mod host;
