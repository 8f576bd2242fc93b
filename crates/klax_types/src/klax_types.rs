//! Klax Types - Value model for the KlaxScript visual scripting system
//!
//! This crate contains the pure data types shared by the runtime, the native
//! function bindings and the host: dynamic [`Value`]s, static [`PinType`]s and
//! the conversion traits used by `#[klax_function]`.

mod convert;
mod types;
mod value;

pub use convert::*;
pub use types::*;
pub use value::*;
