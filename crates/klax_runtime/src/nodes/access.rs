// Data access: variables, members, the owner and its components, arrays

use klax_types::{PinType, Value};
use uuid::Uuid;

use super::input;
use crate::context::ExecutionContext;
use crate::error::{ScriptError, ScriptResult};
use crate::node::{Node, NodeAction, NodeKind, PinRef};
use crate::pin::{InputPin, OutputPin};
use crate::variable::{Variable, VariableRef};

// ─────────────────────────────────────────────────────────────────────────────
// Factories
// ─────────────────────────────────────────────────────────────────────────────

pub fn get_variable(variable: &Variable) -> Node {
    let kind = NodeKind::GetVariable {
        variable: VariableRef::live(variable),
    };
    Node::new(kind, format!("Get {}", variable.name))
        .with_output(OutputPin::new("Value", variable.pin_type.clone()))
}

pub fn set_variable(variable: &Variable) -> Node {
    let kind = NodeKind::SetVariable {
        variable: VariableRef::live(variable),
    };
    Node::new(kind, format!("Set {}", variable.name))
        .with_in_execution(&["Execute"])
        .with_out_execution(&["Then"])
        .with_input(InputPin::new("Value", variable.pin_type.clone()))
        .with_output(OutputPin::new("Value", variable.pin_type.clone()))
}

/// Read a field of an object value, or a property of an engine object.
/// An unconnected Target means the owner itself.
pub fn get_member(member: &str, pin_type: PinType) -> Node {
    let kind = NodeKind::GetMember {
        member: member.to_string(),
    };
    Node::new(kind, format!("Get {member}"))
        .with_input(InputPin::new("Target", PinType::Any))
        .with_output(OutputPin::new("Value", pin_type))
}

pub fn set_member(member: &str, pin_type: PinType) -> Node {
    let kind = NodeKind::SetMember {
        member: member.to_string(),
    };
    Node::new(kind, format!("Set {member}"))
        .with_in_execution(&["Execute"])
        .with_out_execution(&["Then"])
        .with_input(InputPin::new("Target", PinType::Any))
        .with_input(InputPin::new("Value", pin_type))
        .with_output(OutputPin::new("Target", PinType::Any))
}

pub fn self_reference() -> Node {
    Node::new(NodeKind::SelfReference, "Self").with_output(OutputPin::new("Self", PinType::handle("")))
}

pub fn get_component(component: Uuid, type_id: &str) -> Node {
    Node::new(NodeKind::GetComponent { component }, format!("Get {type_id}"))
        .with_output(OutputPin::new("Component", PinType::handle(type_id)))
}

pub fn make_array(items: usize) -> Node {
    let mut node = Node::new(NodeKind::MakeArray, "Make Array")
        .with_output(OutputPin::new("Array", PinType::array(PinType::Any)));
    for _ in 0..items {
        add_array_item(&mut node.input_pins);
    }
    node
}

pub(crate) fn add_array_item(pins: &mut Vec<InputPin>) -> Vec<NodeAction> {
    let index = pins.len();
    pins.push(InputPin::new(format!("Item {index}"), PinType::Any));
    vec![NodeAction::PinInserted {
        pin: PinRef::Input(index),
    }]
}

// ─────────────────────────────────────────────────────────────────────────────
// Behaviour
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn run_get_variable(
    ctx: &mut ExecutionContext<'_, '_>,
    variable: &VariableRef,
    outputs: &mut Vec<Value>,
) -> ScriptResult<Option<usize>> {
    outputs.push(ctx.read_variable(variable)?);
    Ok(None)
}

pub(crate) fn run_set_variable(
    ctx: &mut ExecutionContext<'_, '_>,
    variable: &VariableRef,
    inputs: &[Value],
    outputs: &mut Vec<Value>,
) -> ScriptResult<Option<usize>> {
    ctx.write_variable(variable, input(inputs, 0).clone())?;
    outputs.push(ctx.read_variable(variable)?);
    Ok(Some(0))
}

pub(crate) fn run_get_member(
    ctx: &mut ExecutionContext<'_, '_>,
    member: &str,
    inputs: &[Value],
    outputs: &mut Vec<Value>,
) -> ScriptResult<Option<usize>> {
    let value = match input(inputs, 0) {
        Value::Object { fields, .. } => fields.get(member).cloned(),
        Value::Handle(handle) => ctx.owner()?.get_property(handle.id, member),
        Value::Null => {
            let owner = ctx.owner()?;
            owner.get_property(owner.handle().id, member)
        }
        _ => None,
    };
    outputs.push(value.ok_or_else(|| ScriptError::MemberNotFound(member.to_string()))?);
    Ok(None)
}

pub(crate) fn run_set_member(
    ctx: &mut ExecutionContext<'_, '_>,
    member: &str,
    inputs: &[Value],
    outputs: &mut Vec<Value>,
) -> ScriptResult<Option<usize>> {
    let value = input(inputs, 1).clone();
    let target = match input(inputs, 0) {
        Value::Object { type_id, fields } => {
            let mut fields = fields.clone();
            fields.insert(member.to_string(), value);
            Value::Object {
                type_id: type_id.clone(),
                fields,
            }
        }
        Value::Handle(handle) => {
            if !ctx.owner()?.set_property(handle.id, member, value) {
                return Err(ScriptError::MemberNotFound(member.to_string()));
            }
            Value::Handle(handle.clone())
        }
        Value::Null => {
            let owner = ctx.owner()?;
            let handle = owner.handle();
            if !owner.set_property(handle.id, member, value) {
                return Err(ScriptError::MemberNotFound(member.to_string()));
            }
            Value::Handle(handle)
        }
        _ => return Err(ScriptError::MemberNotFound(member.to_string())),
    };
    outputs.push(target);
    Ok(Some(0))
}

pub(crate) fn run_self_reference(
    ctx: &mut ExecutionContext<'_, '_>,
    outputs: &mut Vec<Value>,
) -> ScriptResult<Option<usize>> {
    outputs.push(Value::Handle(ctx.owner()?.handle()));
    Ok(None)
}

pub(crate) fn run_get_component(
    ctx: &mut ExecutionContext<'_, '_>,
    component: Uuid,
    outputs: &mut Vec<Value>,
) -> ScriptResult<Option<usize>> {
    let handle = ctx
        .owner()?
        .component(component)
        .ok_or(ScriptError::ComponentNotFound(component))?;
    outputs.push(Value::Handle(handle));
    Ok(None)
}

pub(crate) fn run_make_array(inputs: &[Value], outputs: &mut Vec<Value>) -> Option<usize> {
    outputs.push(Value::Array(inputs.to_vec()));
    None
}
