//! Klax Runtime - Graph interpreter for KlaxScript
//!
//! A [`ScriptObject`] holds the variables and graphs scripted onto one owner.
//! Event graphs run when the owner's events fire, function graphs run when
//! called, and every node reaches native code through the
//! [`FunctionRegistry`].

// Lets `#[klax_function]` expansions inside this crate resolve `klax_runtime::`
extern crate self as klax_runtime;

pub use klax_macros::klax_function;
pub use klax_types;

pub mod clipboard;
mod context;
mod error;
mod event;
mod event_graph;
mod function_graph;
mod graph;
mod library;
mod node;
pub mod nodes;
mod owner;
mod pin;
mod registry;
mod script_object;
mod variable;

#[cfg(test)]
mod testing;

pub use context::{Activation, ExecutionContext, ExecutionLimits, ScriptEnv};
pub use error::{ScriptError, ScriptResult};
pub use event::{EventHandler, MAX_EVENT_ARGS, ScriptEvent, SubscriptionId, event_handler};
pub use event_graph::{EventGraph, RECEIVE_NODE};
pub use function_graph::{
    CustomFunctionGraph, ENTRY_NODE, FunctionGraph, FunctionNodesRebuilt, InterfaceFunctionGraph, RETURN_NODE,
};
pub use graph::{ExecutionOutcome, Graph};
pub use library::register_builtins;
pub use node::{ArrayCursor, ForCursor, Node, NodeAction, NodeKind, PinRef};
pub use owner::{Component, Entity, ScriptOwner};
pub use pin::{ExecTarget, ExecutionPin, InputPin, OutputPin, PinSource, SwitchCase};
pub use registry::{FnInvoker, FunctionInfo, FunctionInvoker, FunctionRegistry};
pub use script_object::{
    GraphRef, InterfaceDefinition, InterfaceFunction, ScriptObject, ScriptRuntime, SharedScriptObject,
};
pub use variable::{Variable, VariableRef};
