// Nodes - The units of computation and control flow in a graph
//
// A node is a fixed record of ordered pin lists plus a `NodeKind` saying what
// it does. The catalog is closed: behaviour is dispatched by matching on the
// kind, with the per-kind logic living in the `nodes` modules.

use klax_types::{ParameterInfo, PinType, Value};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::error::ScriptResult;
use crate::nodes::{access, call, cast, entry, flow};
use crate::pin::{ExecutionPin, InputPin, OutputPin};
use crate::variable::VariableRef;

// ─────────────────────────────────────────────────────────────────────────────
// Node Kinds
// ─────────────────────────────────────────────────────────────────────────────

/// Cursor of a running for-loop
#[derive(Debug, Clone, PartialEq)]
pub struct ForCursor {
    pub index: i64,
    pub last: i64,
}

/// Cursor of a running for-each loop
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayCursor {
    pub items: Vec<Value>,
    pub index: usize,
}

/// Everything a node can be
///
/// Loop state is runtime-only and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeKind {
    FunctionEntry,
    FunctionReturn,
    ReceiveEvent {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        component: Option<Uuid>,
    },
    Branch,
    Sequence {
        #[serde(skip)]
        next: usize,
    },
    ForLoop {
        #[serde(skip)]
        cursor: Option<ForCursor>,
    },
    ForEach {
        #[serde(skip)]
        cursor: Option<ArrayCursor>,
    },
    WhileLoop {
        #[serde(skip)]
        active: bool,
    },
    Switch,
    Cast {
        target: PinType,
    },
    ImplicitCast {
        target: PinType,
    },
    GetVariable {
        variable: VariableRef,
    },
    SetVariable {
        variable: VariableRef,
    },
    GetMember {
        member: String,
    },
    SetMember {
        member: String,
    },
    SelfReference,
    GetComponent {
        component: Uuid,
    },
    MakeArray,
    CallNative {
        function: String,
        #[serde(default)]
        pure: bool,
    },
    CallFunction {
        function: Uuid,
    },
}

impl NodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::FunctionEntry => "FunctionEntry",
            NodeKind::FunctionReturn => "FunctionReturn",
            NodeKind::ReceiveEvent { .. } => "ReceiveEvent",
            NodeKind::Branch => "Branch",
            NodeKind::Sequence { .. } => "Sequence",
            NodeKind::ForLoop { .. } => "ForLoop",
            NodeKind::ForEach { .. } => "ForEach",
            NodeKind::WhileLoop { .. } => "WhileLoop",
            NodeKind::Switch => "Switch",
            NodeKind::Cast { .. } => "Cast",
            NodeKind::ImplicitCast { .. } => "ImplicitCast",
            NodeKind::GetVariable { .. } => "GetVariable",
            NodeKind::SetVariable { .. } => "SetVariable",
            NodeKind::GetMember { .. } => "GetMember",
            NodeKind::SetMember { .. } => "SetMember",
            NodeKind::SelfReference => "SelfReference",
            NodeKind::GetComponent { .. } => "GetComponent",
            NodeKind::MakeArray => "MakeArray",
            NodeKind::CallNative { .. } => "CallNative",
            NodeKind::CallFunction { .. } => "CallFunction",
        }
    }

    /// Variable referenced by a variable node
    pub fn variable(&self) -> Option<&VariableRef> {
        match self {
            NodeKind::GetVariable { variable } | NodeKind::SetVariable { variable } => Some(variable),
            _ => None,
        }
    }

    pub fn variable_mut(&mut self) -> Option<&mut VariableRef> {
        match self {
            NodeKind::GetVariable { variable } | NodeKind::SetVariable { variable } => Some(variable),
            _ => None,
        }
    }

    /// Structural nodes that every function or event graph must keep
    fn is_structural(&self) -> bool {
        matches!(
            self,
            NodeKind::FunctionEntry | NodeKind::FunctionReturn | NodeKind::ReceiveEvent { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Node Actions
// ─────────────────────────────────────────────────────────────────────────────

/// A pin of a node, by list and position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinRef {
    Input(usize),
    Output(usize),
    InExecution(usize),
    OutExecution(usize),
}

/// Structural change a node made to itself, for a presentation layer to mirror
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum NodeAction {
    PinTypeChanged { pin: PinRef, pin_type: PinType },
    PinRenamed { pin: PinRef, name: String },
    NodeRenamed { name: String },
    PinInserted { pin: PinRef },
    PinRemoved { pin: PinRef },
}

// ─────────────────────────────────────────────────────────────────────────────
// Node
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub name: String,
    /// Editor placement
    #[serde(default)]
    pub position: [f32; 2],
    #[serde(default)]
    pub in_execution_pins: Vec<ExecutionPin>,
    #[serde(default)]
    pub out_execution_pins: Vec<ExecutionPin>,
    #[serde(default)]
    pub input_pins: Vec<InputPin>,
    #[serde(default)]
    pub output_pins: Vec<OutputPin>,
    /// First stack slot of this node's outputs, assigned by `Graph::compile`
    #[serde(skip)]
    pub out_parameter_stack_index: usize,
}

impl Node {
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            position: [0.0, 0.0],
            in_execution_pins: Vec::new(),
            out_execution_pins: Vec::new(),
            input_pins: Vec::new(),
            output_pins: Vec::new(),
            out_parameter_stack_index: 0,
        }
    }

    pub fn with_in_execution(mut self, names: &[&str]) -> Self {
        self.in_execution_pins
            .extend(names.iter().map(|n| ExecutionPin::new(*n)));
        self
    }

    pub fn with_out_execution(mut self, names: &[&str]) -> Self {
        self.out_execution_pins
            .extend(names.iter().map(|n| ExecutionPin::new(*n)));
        self
    }

    pub fn with_input(mut self, pin: InputPin) -> Self {
        self.input_pins.push(pin);
        self
    }

    pub fn with_output(mut self, pin: OutputPin) -> Self {
        self.output_pins.push(pin);
        self
    }

    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.position = [x, y];
        self
    }

    /// Implicit nodes have no execution pins and are pulled by their consumers
    pub fn is_implicit(&self) -> bool {
        self.in_execution_pins.is_empty() && self.out_execution_pins.is_empty()
    }

    pub fn allow_copy(&self) -> bool {
        !self.kind.is_structural()
    }

    pub fn allow_delete(&self) -> bool {
        !self.kind.is_structural()
    }

    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.input_pins.iter().position(|p| p.name == name)
    }

    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.output_pins.iter().position(|p| p.name == name)
    }

    pub fn in_execution_index(&self, name: &str) -> Option<usize> {
        self.in_execution_pins.iter().position(|p| p.name == name)
    }

    pub fn out_execution_index(&self, name: &str) -> Option<usize> {
        self.out_execution_pins.iter().position(|p| p.name == name)
    }

    /// Run the node
    ///
    /// `inputs` holds one value per input pin, with literals already
    /// substituted for unconnected pins. The node appends one value per output
    /// pin to `outputs` and returns the out-execution pin to follow, if any.
    pub fn execute(
        &mut self,
        ctx: &mut ExecutionContext<'_, '_>,
        inputs: &[Value],
        outputs: &mut Vec<Value>,
    ) -> ScriptResult<Option<usize>> {
        match &mut self.kind {
            NodeKind::FunctionEntry | NodeKind::ReceiveEvent { .. } => Ok(entry::enter(ctx, outputs)),
            NodeKind::FunctionReturn => Ok(entry::finish(ctx, inputs)),
            NodeKind::Branch => Ok(flow::branch_on(inputs)),
            NodeKind::Sequence { next } => {
                Ok(flow::run_sequence(ctx, next, self.out_execution_pins.len()))
            }
            NodeKind::ForLoop { cursor } => Ok(flow::run_for_loop(ctx, cursor, inputs, outputs)),
            NodeKind::ForEach { cursor } => Ok(flow::run_for_each(ctx, cursor, inputs, outputs)),
            NodeKind::WhileLoop { active } => Ok(flow::run_while_loop(ctx, active, inputs)),
            NodeKind::Switch => Ok(flow::run_switch(&self.out_execution_pins, inputs)),
            NodeKind::Cast { target } => Ok(cast::run_cast(target, inputs, outputs)),
            NodeKind::ImplicitCast { target } => Ok(cast::run_implicit_cast(target, inputs, outputs)),
            NodeKind::GetVariable { variable } => access::run_get_variable(ctx, variable, outputs),
            NodeKind::SetVariable { variable } => access::run_set_variable(ctx, variable, inputs, outputs),
            NodeKind::GetMember { member } => access::run_get_member(ctx, member, inputs, outputs),
            NodeKind::SetMember { member } => access::run_set_member(ctx, member, inputs, outputs),
            NodeKind::SelfReference => access::run_self_reference(ctx, outputs),
            NodeKind::GetComponent { component } => access::run_get_component(ctx, *component, outputs),
            NodeKind::MakeArray => Ok(access::run_make_array(inputs, outputs)),
            NodeKind::CallNative { function, pure } => {
                call::run_call_native(ctx, function, *pure, inputs, outputs)
            }
            NodeKind::CallFunction { function } => {
                call::run_call_function(ctx, *function, inputs, outputs)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Editor Hooks
    // ─────────────────────────────────────────────────────────────────────────

    /// Called after the literal of an input pin was edited
    pub fn on_input_literal_changed(&mut self, input: usize) -> Vec<NodeAction> {
        match &mut self.kind {
            NodeKind::Cast { target } | NodeKind::ImplicitCast { target }
                if input == cast::TYPE_PIN =>
            {
                let Some(pin) = self.input_pins.get(input) else {
                    return Vec::new();
                };
                cast::retarget(target, &pin.literal, &mut self.name, &mut self.output_pins)
            }
            _ => Vec::new(),
        }
    }

    /// Called after an input pin was connected (`Some` source type) or disconnected
    pub fn on_input_connection_changed(
        &mut self,
        input: usize,
        source: Option<&PinType>,
    ) -> Vec<NodeAction> {
        match self.kind {
            NodeKind::Switch if input == flow::SWITCH_VALUE_PIN => flow::retype_switch(
                &mut self.input_pins,
                &mut self.out_execution_pins,
                source.cloned().unwrap_or_default(),
            ),
            _ => Vec::new(),
        }
    }

    pub fn can_add_input_pin(&self) -> bool {
        matches!(self.kind, NodeKind::MakeArray)
    }

    pub fn can_add_output_pin(&self) -> bool {
        matches!(self.kind, NodeKind::Sequence { .. } | NodeKind::Switch)
    }

    pub fn on_add_input_pin_button_clicked(&mut self) -> Vec<NodeAction> {
        match self.kind {
            NodeKind::MakeArray => access::add_array_item(&mut self.input_pins),
            _ => Vec::new(),
        }
    }

    pub fn on_add_output_pin_button_clicked(&mut self) -> Vec<NodeAction> {
        match self.kind {
            NodeKind::Sequence { .. } => flow::add_sequence_pin(&mut self.out_execution_pins),
            NodeKind::Switch => {
                let case_type = self
                    .input_pins
                    .get(flow::SWITCH_VALUE_PIN)
                    .map(|p| p.pin_type.clone())
                    .unwrap_or_default();
                flow::add_switch_case(&mut self.out_execution_pins, case_type)
            }
            _ => Vec::new(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Signature Sync
    // ─────────────────────────────────────────────────────────────────────────

    /// Reshape the input pins to a parameter list
    ///
    /// Pins at indices that still exist keep their connection; a retyped pin
    /// gets the new type's default literal. Whether a kept connection is still
    /// type-compatible is up to the graph.
    pub fn sync_inputs(&mut self, params: &[ParameterInfo]) -> Vec<NodeAction> {
        let mut actions = Vec::new();
        while self.input_pins.len() > params.len() {
            self.input_pins.pop();
            actions.push(NodeAction::PinRemoved {
                pin: PinRef::Input(self.input_pins.len()),
            });
        }
        for (i, param) in params.iter().enumerate() {
            match self.input_pins.get_mut(i) {
                Some(pin) => {
                    if pin.name != param.name {
                        pin.name = param.name.clone();
                        actions.push(NodeAction::PinRenamed {
                            pin: PinRef::Input(i),
                            name: param.name.clone(),
                        });
                    }
                    if pin.pin_type != param.pin_type {
                        pin.pin_type = param.pin_type.clone();
                        pin.literal = param.pin_type.default_value();
                        actions.push(NodeAction::PinTypeChanged {
                            pin: PinRef::Input(i),
                            pin_type: param.pin_type.clone(),
                        });
                    }
                }
                None => {
                    self.input_pins
                        .push(InputPin::new(param.name.clone(), param.pin_type.clone()));
                    actions.push(NodeAction::PinInserted {
                        pin: PinRef::Input(i),
                    });
                }
            }
        }
        actions
    }

    /// Reshape the output pins to a parameter list
    pub fn sync_outputs(&mut self, params: &[ParameterInfo]) -> Vec<NodeAction> {
        let mut actions = Vec::new();
        while self.output_pins.len() > params.len() {
            self.output_pins.pop();
            actions.push(NodeAction::PinRemoved {
                pin: PinRef::Output(self.output_pins.len()),
            });
        }
        for (i, param) in params.iter().enumerate() {
            match self.output_pins.get_mut(i) {
                Some(pin) => {
                    if pin.name != param.name {
                        pin.name = param.name.clone();
                        actions.push(NodeAction::PinRenamed {
                            pin: PinRef::Output(i),
                            name: param.name.clone(),
                        });
                    }
                    if pin.pin_type != param.pin_type {
                        pin.pin_type = param.pin_type.clone();
                        actions.push(NodeAction::PinTypeChanged {
                            pin: PinRef::Output(i),
                            pin_type: param.pin_type.clone(),
                        });
                    }
                }
                None => {
                    self.output_pins
                        .push(OutputPin::new(param.name.clone(), param.pin_type.clone()));
                    actions.push(NodeAction::PinInserted {
                        pin: PinRef::Output(i),
                    });
                }
            }
        }
        actions
    }
}
