//! The node catalog.
//!
//! Each module holds the factory functions that build a kind's pin layout and
//! the behaviour `Node::execute` dispatches to.

pub(crate) mod access;
pub(crate) mod call;
pub(crate) mod cast;
pub(crate) mod entry;
pub(crate) mod flow;

pub use access::{
    get_component, get_member, get_variable, make_array, self_reference, set_member, set_variable,
};
pub use call::{call_function, call_native};
pub use cast::{cast, implicit_cast};
pub use entry::{function_entry, function_return, receive_event};
pub use flow::{branch, for_each, for_loop, sequence, switch, while_loop};

use klax_types::Value;

static NULL: Value = Value::Null;

/// Input value by position; the interpreter always supplies every pin
pub(crate) fn input(inputs: &[Value], index: usize) -> &Value {
    inputs.get(index).unwrap_or(&NULL)
}
