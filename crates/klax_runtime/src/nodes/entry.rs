// Entry and exit points: function Entry/Return and event receivers

use klax_types::{ParameterInfo, Value};
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::node::{Node, NodeKind};

pub fn function_entry(inputs: &[ParameterInfo]) -> Node {
    let mut node = Node::new(NodeKind::FunctionEntry, "Entry").with_out_execution(&["Execute"]);
    node.sync_outputs(inputs);
    node
}

pub fn function_return(outputs: &[ParameterInfo]) -> Node {
    let mut node = Node::new(NodeKind::FunctionReturn, "Return").with_in_execution(&["Execute"]);
    node.sync_inputs(outputs);
    node
}

/// Receiver for an event on the owner, or on one of its components
pub fn receive_event(event: &str, component: Option<Uuid>, parameters: &[ParameterInfo]) -> Node {
    let kind = NodeKind::ReceiveEvent {
        event: event.to_string(),
        component,
    };
    let mut node = Node::new(kind, event).with_out_execution(&["Execute"]);
    node.sync_outputs(parameters);
    node
}

/// Publish the graph's arguments on the node's outputs
pub(crate) fn enter(ctx: &ExecutionContext<'_, '_>, outputs: &mut Vec<Value>) -> Option<usize> {
    outputs.extend_from_slice(ctx.arguments());
    Some(0)
}

/// Hand the inputs back to the caller and unwind pending loops
pub(crate) fn finish(ctx: &mut ExecutionContext<'_, '_>, inputs: &[Value]) -> Option<usize> {
    ctx.set_returned(inputs.to_vec());
    ctx.clear_return_points();
    None
}
