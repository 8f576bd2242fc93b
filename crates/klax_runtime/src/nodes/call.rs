// Calls into native functions and into the script's own function graphs

use klax_types::Value;
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::error::ScriptResult;
use crate::function_graph::CustomFunctionGraph;
use crate::node::{Node, NodeKind};
use crate::registry::FunctionInfo;

/// Call site for a registered native function; pure functions become implicit
pub fn call_native(info: &FunctionInfo) -> Node {
    let kind = NodeKind::CallNative {
        function: info.key.clone(),
        pure: info.pure,
    };
    let mut node = Node::new(kind, info.name.clone());
    if !info.pure {
        node = node.with_in_execution(&["Execute"]).with_out_execution(&["Then"]);
    }
    node.sync_inputs(&info.inputs);
    node.sync_outputs(&info.outputs);
    node
}

/// Call site for a custom function graph
pub fn call_function(function: &CustomFunctionGraph) -> Node {
    let kind = NodeKind::CallFunction {
        function: function.guid,
    };
    let mut node = Node::new(kind, function.name.clone())
        .with_in_execution(&["Execute"])
        .with_out_execution(&["Then"]);
    node.sync_inputs(&function.function.input_parameters);
    node.sync_outputs(&function.function.output_parameters);
    node
}

pub(crate) fn run_call_native(
    ctx: &mut ExecutionContext<'_, '_>,
    function: &str,
    pure: bool,
    inputs: &[Value],
    outputs: &mut Vec<Value>,
) -> ScriptResult<Option<usize>> {
    ctx.call_native(function, inputs, outputs)?;
    Ok(if pure { None } else { Some(0) })
}

/// The caller's activation state lives in this frame; the callee runs on
/// its own graph and stack and returns here when it finishes.
pub(crate) fn run_call_function(
    ctx: &mut ExecutionContext<'_, '_>,
    function: Uuid,
    inputs: &[Value],
    outputs: &mut Vec<Value>,
) -> ScriptResult<Option<usize>> {
    ctx.call_function(function, inputs, outputs)?;
    Ok(Some(0))
}
