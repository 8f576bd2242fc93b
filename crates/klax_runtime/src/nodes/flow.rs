// Control flow: branches, sequences, loops and switches
//
// Loop-style nodes keep themselves on the graph's return-point stack while
// they have work left. Every activation that ends a loop, by exhaustion or
// through its Break pin, must release the return point again.

use klax_types::{PinType, Value};

use super::input;
use crate::context::{Activation, ExecutionContext};
use crate::node::{ArrayCursor, ForCursor, Node, NodeAction, NodeKind, PinRef};
use crate::pin::{ExecutionPin, InputPin, OutputPin};

pub(crate) const LOOP_PIN: usize = 0;
pub(crate) const DONE_PIN: usize = 1;
pub(crate) const EXECUTE_PIN: usize = 0;
pub(crate) const SWITCH_VALUE_PIN: usize = 0;

// ─────────────────────────────────────────────────────────────────────────────
// Factories
// ─────────────────────────────────────────────────────────────────────────────

pub fn branch() -> Node {
    Node::new(NodeKind::Branch, "Branch")
        .with_in_execution(&["Execute"])
        .with_out_execution(&["True", "False"])
        .with_input(InputPin::new("Condition", PinType::Bool))
}

pub fn sequence(outputs: usize) -> Node {
    let mut node = Node::new(NodeKind::Sequence { next: 0 }, "Sequence").with_in_execution(&["Execute"]);
    for _ in 0..outputs {
        add_sequence_pin(&mut node.out_execution_pins);
    }
    node
}

pub fn for_loop() -> Node {
    Node::new(NodeKind::ForLoop { cursor: None }, "For Loop")
        .with_in_execution(&["Execute", "Break"])
        .with_out_execution(&["Loop", "Done"])
        .with_input(InputPin::new("First", PinType::Int))
        .with_input(InputPin::new("Last", PinType::Int))
        .with_output(OutputPin::new("Index", PinType::Int))
}

pub fn for_each(element: PinType) -> Node {
    Node::new(NodeKind::ForEach { cursor: None }, "For Each")
        .with_in_execution(&["Execute", "Break"])
        .with_out_execution(&["Loop", "Done"])
        .with_input(InputPin::new("Array", PinType::array(element.clone())))
        .with_output(OutputPin::new("Element", element))
        .with_output(OutputPin::new("Index", PinType::Int))
}

pub fn while_loop() -> Node {
    Node::new(NodeKind::WhileLoop { active: false }, "While Loop")
        .with_in_execution(&["Execute", "Break"])
        .with_out_execution(&["Loop", "Done"])
        .with_input(InputPin::new("Condition", PinType::Bool))
}

/// Switch on a value; add cases with the add-output-pin button
pub fn switch(value_type: PinType) -> Node {
    Node::new(NodeKind::Switch, "Switch")
        .with_in_execution(&["Execute"])
        .with_out_execution(&["Default"])
        .with_input(InputPin::new("Value", value_type))
}

pub(crate) fn add_sequence_pin(pins: &mut Vec<ExecutionPin>) -> Vec<NodeAction> {
    let index = pins.len();
    pins.push(ExecutionPin::new(format!("Then {index}")));
    vec![NodeAction::PinInserted {
        pin: PinRef::OutExecution(index),
    }]
}

/// Append a case; its value defaults to the case number where the type allows
pub(crate) fn add_switch_case(pins: &mut Vec<ExecutionPin>, case_type: PinType) -> Vec<NodeAction> {
    let index = pins.len();
    let number = index.saturating_sub(1);
    let value = case_type
        .cast(&Value::from(number))
        .unwrap_or_else(|| case_type.default_value());
    pins.push(ExecutionPin::case(format!("Case {number}"), case_type, value));
    vec![NodeAction::PinInserted {
        pin: PinRef::OutExecution(index),
    }]
}

/// Follow the type of whatever feeds the switch value
pub(crate) fn retype_switch(
    inputs: &mut [InputPin],
    cases: &mut [ExecutionPin],
    pin_type: PinType,
) -> Vec<NodeAction> {
    let Some(value_pin) = inputs.get_mut(SWITCH_VALUE_PIN) else {
        return Vec::new();
    };
    if value_pin.pin_type == pin_type {
        return Vec::new();
    }
    value_pin.pin_type = pin_type.clone();
    value_pin.literal = pin_type.default_value();

    for case in cases.iter_mut().filter_map(|p| p.discriminant.as_mut()) {
        case.value = pin_type
            .cast(&case.value)
            .unwrap_or_else(|| pin_type.default_value());
        case.pin_type = pin_type.clone();
    }

    vec![NodeAction::PinTypeChanged {
        pin: PinRef::Input(SWITCH_VALUE_PIN),
        pin_type,
    }]
}

// ─────────────────────────────────────────────────────────────────────────────
// Behaviour
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn branch_on(inputs: &[Value]) -> Option<usize> {
    if input(inputs, 0).as_bool().unwrap_or(false) {
        Some(0)
    } else {
        Some(1)
    }
}

/// Fires each Then pin in turn, one per activation
pub(crate) fn run_sequence(
    ctx: &mut ExecutionContext<'_, '_>,
    next: &mut usize,
    count: usize,
) -> Option<usize> {
    if let Activation::Entered(_) = ctx.activation {
        *next = 0;
        ctx.register_return_point();
    }
    if *next < count {
        *next += 1;
        return Some(*next - 1);
    }
    ctx.release_return_point();
    None
}

pub(crate) fn run_for_loop(
    ctx: &mut ExecutionContext<'_, '_>,
    cursor: &mut Option<ForCursor>,
    inputs: &[Value],
    outputs: &mut Vec<Value>,
) -> Option<usize> {
    match ctx.activation {
        Activation::Entered(EXECUTE_PIN) => {
            *cursor = Some(ForCursor {
                index: input(inputs, 0).as_i64().unwrap_or(0),
                last: input(inputs, 1).as_i64().unwrap_or(0),
            });
            ctx.register_return_point();
        }
        // Break
        Activation::Entered(_) => *cursor = None,
        // Stepping past i64::MAX exhausts the range
        Activation::Resumed => {
            *cursor = cursor.take().and_then(|c| {
                Some(ForCursor {
                    index: c.index.checked_add(1)?,
                    ..c
                })
            });
        }
        Activation::Pulled => {}
    }

    if let Some(c) = cursor.as_ref().filter(|c| c.index <= c.last) {
        outputs.push(Value::Int(c.index));
        return Some(LOOP_PIN);
    }
    *cursor = None;
    ctx.release_return_point();
    outputs.push(Value::Int(-1));
    Some(DONE_PIN)
}

pub(crate) fn run_for_each(
    ctx: &mut ExecutionContext<'_, '_>,
    cursor: &mut Option<ArrayCursor>,
    inputs: &[Value],
    outputs: &mut Vec<Value>,
) -> Option<usize> {
    match ctx.activation {
        Activation::Entered(EXECUTE_PIN) => {
            let items = input(inputs, 0).as_array().map(<[Value]>::to_vec).unwrap_or_default();
            *cursor = Some(ArrayCursor { items, index: 0 });
            ctx.register_return_point();
        }
        Activation::Entered(_) => *cursor = None,
        Activation::Resumed => {
            if let Some(c) = cursor.as_mut() {
                c.index += 1;
            }
        }
        Activation::Pulled => {}
    }

    if let Some(c) = cursor.as_ref() {
        if let Some(item) = c.items.get(c.index) {
            outputs.push(item.clone());
            outputs.push(Value::from(c.index));
            return Some(LOOP_PIN);
        }
    }
    *cursor = None;
    ctx.release_return_point();
    outputs.push(Value::Null);
    outputs.push(Value::Int(-1));
    Some(DONE_PIN)
}

/// Loops while Condition holds; the condition is re-read on every resumption
pub(crate) fn run_while_loop(
    ctx: &mut ExecutionContext<'_, '_>,
    active: &mut bool,
    inputs: &[Value],
) -> Option<usize> {
    match ctx.activation {
        Activation::Entered(EXECUTE_PIN) => {
            *active = true;
            ctx.register_return_point();
        }
        Activation::Entered(_) => *active = false,
        Activation::Resumed | Activation::Pulled => {}
    }

    if *active && input(inputs, 0).as_bool().unwrap_or(false) {
        return Some(LOOP_PIN);
    }
    *active = false;
    ctx.release_return_point();
    Some(DONE_PIN)
}

/// First case whose discriminant matches, otherwise Default
pub(crate) fn run_switch(pins: &[ExecutionPin], inputs: &[Value]) -> Option<usize> {
    let value = input(inputs, SWITCH_VALUE_PIN);
    pins.iter()
        .position(|p| p.discriminant.as_ref().is_some_and(|case| case.matches(value)))
        .or(Some(0))
}
