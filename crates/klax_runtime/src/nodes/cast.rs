// Casts - runtime type tests exposed to script authors
//
// A failed cast is an ordinary outcome: the exec cast takes its Failed pin,
// the implicit cast reports false on Success. Neither raises an error.

use klax_types::{PinType, Value};
use tracing::debug;

use super::input;
use crate::node::{Node, NodeAction, NodeKind, PinRef};
use crate::pin::{InputPin, OutputPin};

/// Literal-only pin naming the target type
pub(crate) const TYPE_PIN: usize = 1;

const SUCCEEDED_PIN: usize = 0;
const FAILED_PIN: usize = 1;

fn type_pin(target: &PinType) -> InputPin {
    InputPin::literal_only("Type", PinType::String, Value::from(target.to_string()))
}

pub fn cast(target: PinType) -> Node {
    Node::new(NodeKind::Cast { target: target.clone() }, format!("Cast to {target}"))
        .with_in_execution(&["Execute"])
        .with_out_execution(&["Succeeded", "Failed"])
        .with_input(InputPin::new("Object", PinType::Any))
        .with_input(type_pin(&target))
        .with_output(OutputPin::new("Result", target))
}

pub fn implicit_cast(target: PinType) -> Node {
    Node::new(
        NodeKind::ImplicitCast { target: target.clone() },
        format!("Cast to {target}"),
    )
    .with_input(InputPin::new("Object", PinType::Any))
    .with_input(type_pin(&target))
    .with_output(OutputPin::new("Result", target))
    .with_output(OutputPin::new("Success", PinType::Bool))
}

pub(crate) fn run_cast(target: &PinType, inputs: &[Value], outputs: &mut Vec<Value>) -> Option<usize> {
    match target.cast(input(inputs, 0)) {
        Some(value) => {
            outputs.push(value);
            Some(SUCCEEDED_PIN)
        }
        None => {
            outputs.push(Value::Null);
            Some(FAILED_PIN)
        }
    }
}

pub(crate) fn run_implicit_cast(
    target: &PinType,
    inputs: &[Value],
    outputs: &mut Vec<Value>,
) -> Option<usize> {
    let result = target.cast(input(inputs, 0));
    let success = result.is_some();
    outputs.push(result.unwrap_or_default());
    outputs.push(Value::Bool(success));
    None
}

/// Apply a new Type literal: retype the Result pin and rename the node
pub(crate) fn retarget(
    target: &mut PinType,
    literal: &Value,
    name: &mut String,
    outputs: &mut [OutputPin],
) -> Vec<NodeAction> {
    let Some(parsed) = literal.as_str().and_then(|s| s.parse::<PinType>().ok()) else {
        debug!(literal = %literal, "Ignoring unknown cast target");
        return Vec::new();
    };
    if parsed == *target {
        return Vec::new();
    }

    let mut actions = Vec::new();
    if let Some(result) = outputs.first_mut() {
        result.pin_type = parsed.clone();
        actions.push(NodeAction::PinTypeChanged {
            pin: PinRef::Output(0),
            pin_type: parsed.clone(),
        });
    }
    *name = format!("Cast to {parsed}");
    actions.push(NodeAction::NodeRenamed { name: name.clone() });
    *target = parsed;
    actions
}
