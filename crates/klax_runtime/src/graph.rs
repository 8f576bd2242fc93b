// Graph - Node arena, stack compiler and interpreter
//
// All cross references between nodes are indices into the graph's node list.
// `compile` lays every node's outputs out on one flat value stack (after the
// local variable prefix) and resolves each connected input to a stack slot.
// `execute` then walks execution pins, pulling implicit nodes on every read
// and resuming loop nodes from the return-point stack when a branch ends.

use klax_types::Value;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::context::{Activation, ExecutionContext, ScriptEnv};
use crate::error::{ScriptError, ScriptResult};
use crate::function_graph::FunctionNodesRebuilt;
use crate::node::{Node, NodeAction, NodeKind};
use crate::pin::{ExecTarget, PinSource};
use crate::variable::{RefForm, Variable};

/// How a top-level execution ended
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutcome {
    /// Last node that executed before the graph ran out of work
    pub last_node: Option<usize>,
    /// Values handed back by a Return node
    pub returned: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    local_variables: Vec<Variable>,
    #[serde(skip)]
    stack: Vec<Value>,
    #[serde(skip)]
    return_points: Vec<usize>,
    #[serde(skip)]
    compiled_size: Option<usize>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    /// Mutable access to a node; the graph must be recompiled afterwards
    pub fn node_mut(&mut self, index: usize) -> Option<&mut Node> {
        self.compiled_size = None;
        self.nodes.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn local_variables(&self) -> &[Variable] {
        &self.local_variables
    }

    pub fn add_local_variable(&mut self, variable: Variable) -> Uuid {
        let guid = variable.guid;
        self.local_variables.push(variable);
        self.compiled_size = None;
        guid
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled_size.is_some()
    }

    /// Stack slots needed by the last compile
    pub fn compiled_size(&self) -> Option<usize> {
        self.compiled_size
    }

    /// Value stack as left by the last execution
    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    /// Nodes waiting to be resumed, innermost last
    pub fn return_points(&self) -> &[usize] {
        &self.return_points
    }

    fn mark_uncompiled(&mut self) {
        self.compiled_size = None;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Editing
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_node(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.mark_uncompiled();
        self.nodes.len() - 1
    }

    /// Delete a node and every connection touching it
    pub fn remove_node(&mut self, index: usize) -> ScriptResult<Node> {
        let node = self.nodes.get(index).ok_or(ScriptError::NodeNotFound(index))?;
        if !node.allow_delete() {
            return Err(ScriptError::NodeNotDeletable(index));
        }
        Ok(self.remove_node_unchecked(index))
    }

    /// Delete a node regardless of `allow_delete`, shifting later indices down
    pub(crate) fn remove_node_unchecked(&mut self, index: usize) -> Node {
        let removed = self.nodes.remove(index);
        for node in &mut self.nodes {
            for pin in &mut node.input_pins {
                pin.source = match pin.source {
                    Some(src) if src.node == index => None,
                    Some(src) if src.node > index => Some(PinSource {
                        node: src.node - 1,
                        ..src
                    }),
                    other => other,
                };
            }
            for pin in &mut node.out_execution_pins {
                pin.target = match pin.target {
                    Some(t) if t.node == index => None,
                    Some(t) if t.node > index => Some(ExecTarget {
                        node: t.node - 1,
                        ..t
                    }),
                    other => other,
                };
            }
        }
        self.return_points.clear();
        self.mark_uncompiled();
        removed
    }

    /// Feed output `output` of node `from` into input `input` of node `to`
    pub fn connect(
        &mut self,
        from: usize,
        output: usize,
        to: usize,
        input: usize,
    ) -> ScriptResult<Vec<NodeAction>> {
        if from == to {
            return Err(ScriptError::InvalidConnection(format!(
                "node {from} cannot feed itself"
            )));
        }
        let source_type = self
            .nodes
            .get(from)
            .ok_or(ScriptError::NodeNotFound(from))?
            .output_pins
            .get(output)
            .ok_or(ScriptError::PinNotFound { node: from, pin: output })?
            .pin_type
            .clone();

        let target = self.nodes.get_mut(to).ok_or(ScriptError::NodeNotFound(to))?;
        let pin = target
            .input_pins
            .get_mut(input)
            .ok_or(ScriptError::PinNotFound { node: to, pin: input })?;
        if pin.literal_only {
            return Err(ScriptError::InvalidConnection(format!(
                "input '{}' of node {to} only takes a literal",
                pin.name
            )));
        }
        if !pin.pin_type.is_assignable_from(&source_type) {
            return Err(ScriptError::IncompatiblePinTypes {
                from: source_type,
                to: pin.pin_type.clone(),
            });
        }
        pin.source = Some(PinSource {
            node: from,
            parameter: output,
        });

        let actions = target.on_input_connection_changed(input, Some(&source_type));
        self.settle(&actions);
        self.mark_uncompiled();
        Ok(actions)
    }

    pub fn disconnect(&mut self, to: usize, input: usize) -> ScriptResult<Vec<NodeAction>> {
        let target = self.nodes.get_mut(to).ok_or(ScriptError::NodeNotFound(to))?;
        let pin = target
            .input_pins
            .get_mut(input)
            .ok_or(ScriptError::PinNotFound { node: to, pin: input })?;
        if pin.source.take().is_none() {
            return Ok(Vec::new());
        }
        pin.stack_index = None;

        let actions = target.on_input_connection_changed(input, None);
        self.settle(&actions);
        self.mark_uncompiled();
        Ok(actions)
    }

    /// Continue at in-execution pin `in_pin` of `to` when `from` fires `out_pin`
    ///
    /// An out-pin has a single target; connecting it again replaces the old
    /// one. Several out-pins may share one target.
    pub fn connect_execution(
        &mut self,
        from: usize,
        out_pin: usize,
        to: usize,
        in_pin: usize,
    ) -> ScriptResult<()> {
        let target = self.nodes.get(to).ok_or(ScriptError::NodeNotFound(to))?;
        if target.is_implicit() {
            return Err(ScriptError::InvalidConnection(format!(
                "implicit node {to} cannot be an execution target"
            )));
        }
        if in_pin >= target.in_execution_pins.len() {
            return Err(ScriptError::PinNotFound { node: to, pin: in_pin });
        }
        let pin = self
            .nodes
            .get_mut(from)
            .ok_or(ScriptError::NodeNotFound(from))?
            .out_execution_pins
            .get_mut(out_pin)
            .ok_or(ScriptError::PinNotFound { node: from, pin: out_pin })?;
        pin.target = Some(ExecTarget { node: to, pin: in_pin });
        self.mark_uncompiled();
        Ok(())
    }

    pub fn disconnect_execution(&mut self, from: usize, out_pin: usize) -> ScriptResult<()> {
        let pin = self
            .nodes
            .get_mut(from)
            .ok_or(ScriptError::NodeNotFound(from))?
            .out_execution_pins
            .get_mut(out_pin)
            .ok_or(ScriptError::PinNotFound { node: from, pin: out_pin })?;
        pin.target = None;
        self.mark_uncompiled();
        Ok(())
    }

    /// Edit the fallback literal of an input
    pub fn set_input_literal(
        &mut self,
        node: usize,
        input: usize,
        literal: impl Into<Value>,
    ) -> ScriptResult<Vec<NodeAction>> {
        let target = self.nodes.get_mut(node).ok_or(ScriptError::NodeNotFound(node))?;
        let pin = target
            .input_pins
            .get_mut(input)
            .ok_or(ScriptError::PinNotFound { node, pin: input })?;
        pin.literal = literal.into();

        let actions = target.on_input_literal_changed(input);
        if !actions.is_empty() {
            self.settle(&actions);
            self.mark_uncompiled();
        }
        Ok(actions)
    }

    /// Set the value a switch case pin matches
    pub fn set_case_value(&mut self, node: usize, out_pin: usize, value: Value) -> ScriptResult<()> {
        let case = self
            .nodes
            .get_mut(node)
            .ok_or(ScriptError::NodeNotFound(node))?
            .out_execution_pins
            .get_mut(out_pin)
            .and_then(|p| p.discriminant.as_mut())
            .ok_or(ScriptError::PinNotFound { node, pin: out_pin })?;
        case.value = case.pin_type.cast(&value).unwrap_or(value);
        Ok(())
    }

    pub fn add_input_pin(&mut self, node: usize) -> ScriptResult<Vec<NodeAction>> {
        let target = self.nodes.get_mut(node).ok_or(ScriptError::NodeNotFound(node))?;
        let actions = target.on_add_input_pin_button_clicked();
        if !actions.is_empty() {
            self.mark_uncompiled();
        }
        Ok(actions)
    }

    pub fn add_output_pin(&mut self, node: usize) -> ScriptResult<Vec<NodeAction>> {
        let target = self.nodes.get_mut(node).ok_or(ScriptError::NodeNotFound(node))?;
        let actions = target.on_add_output_pin_button_clicked();
        if !actions.is_empty() {
            self.mark_uncompiled();
        }
        Ok(actions)
    }

    /// Drop connections invalidated by pin retyping or removal
    fn settle(&mut self, actions: &[NodeAction]) {
        let reshaped = actions.iter().any(|a| {
            matches!(
                a,
                NodeAction::PinTypeChanged { .. } | NodeAction::PinRemoved { .. }
            )
        });
        if reshaped {
            self.prune_connections();
        }
    }

    /// Disconnect every input whose source pin no longer exists or no longer
    /// fits its type, and every execution pin whose target is gone
    pub fn prune_connections(&mut self) -> usize {
        let shapes: Vec<(Vec<klax_types::PinType>, usize)> = self
            .nodes
            .iter()
            .map(|n| {
                (
                    n.output_pins.iter().map(|p| p.pin_type.clone()).collect(),
                    n.in_execution_pins.len(),
                )
            })
            .collect();

        let mut pruned = 0;
        for (index, node) in self.nodes.iter_mut().enumerate() {
            for pin in &mut node.input_pins {
                let Some(src) = pin.source else { continue };
                let fits = shapes
                    .get(src.node)
                    .and_then(|(outputs, _)| outputs.get(src.parameter))
                    .is_some_and(|source_type| pin.pin_type.is_assignable_from(source_type));
                if !fits {
                    debug!(node = index, input = %pin.name, "Dropping invalidated connection");
                    pin.source = None;
                    pin.stack_index = None;
                    pruned += 1;
                }
            }
            for pin in &mut node.out_execution_pins {
                let Some(target) = pin.target else { continue };
                if shapes.get(target.node).is_none_or(|(_, ins)| target.pin >= *ins) {
                    pin.target = None;
                    pruned += 1;
                }
            }
        }
        if pruned > 0 {
            self.mark_uncompiled();
        }
        pruned
    }

    /// Resynchronize every call site of a rebuilt function graph
    pub fn apply_function_rebuilt(&mut self, rebuilt: &FunctionNodesRebuilt) -> usize {
        let mut synced = 0;
        for node in &mut self.nodes {
            if node.kind == (NodeKind::CallFunction { function: rebuilt.function }) {
                node.sync_inputs(&rebuilt.inputs);
                node.sync_outputs(&rebuilt.outputs);
                synced += 1;
            }
        }
        if synced > 0 {
            self.prune_connections();
            self.mark_uncompiled();
        }
        synced
    }

    /// Convert every variable reference to `form`
    ///
    /// Nodes whose variable or called function no longer exists are dropped
    /// with a warning. Returns how many were dropped.
    pub(crate) fn rewrite_references(
        &mut self,
        globals: &[Variable],
        functions: &[Uuid],
        form: RefForm,
    ) -> usize {
        let mut stale = Vec::new();
        for (index, node) in self.nodes.iter_mut().enumerate() {
            if let Some(variable) = node.kind.variable_mut() {
                match variable.convert(&self.local_variables, globals, form) {
                    Some(converted) => *variable = converted,
                    None => stale.push(index),
                }
            } else if let NodeKind::CallFunction { function } = node.kind {
                if !functions.contains(&function) {
                    stale.push(index);
                }
            }
        }
        for &index in stale.iter().rev() {
            let node = self.remove_node_unchecked(index);
            warn!(
                node = index,
                kind = node.kind.type_name(),
                name = %node.name,
                "Dropping node with stale reference"
            );
        }
        stale.len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Compilation
    // ─────────────────────────────────────────────────────────────────────────

    /// Assign stack regions and resolve connections to stack slots
    ///
    /// Node outputs are laid out in node order after one slot per local
    /// variable. Running it again without edits yields the same layout.
    pub fn compile(&mut self) -> ScriptResult<()> {
        self.compiled_size = None;

        let mut next = self.local_variables.len();
        for node in &mut self.nodes {
            node.out_parameter_stack_index = next;
            next += node.output_pins.len();
        }

        let layout: Vec<(usize, usize, usize)> = self
            .nodes
            .iter()
            .map(|n| {
                (
                    n.out_parameter_stack_index,
                    n.output_pins.len(),
                    n.in_execution_pins.len(),
                )
            })
            .collect();

        for (index, node) in self.nodes.iter_mut().enumerate() {
            for pin in &mut node.input_pins {
                pin.stack_index = match pin.source {
                    None => None,
                    Some(src) => match layout.get(src.node) {
                        Some(&(base, count, _)) if src.parameter < count => Some(base + src.parameter),
                        _ => {
                            return Err(ScriptError::InvalidConnection(format!(
                                "input '{}' of node {index} reads missing output {} of node {}",
                                pin.name, src.parameter, src.node
                            )));
                        }
                    },
                };
            }
            for pin in &node.out_execution_pins {
                let Some(target) = pin.target else { continue };
                let valid = layout
                    .get(target.node)
                    .is_some_and(|&(_, _, ins)| target.pin < ins);
                if !valid {
                    return Err(ScriptError::InvalidConnection(format!(
                        "execution pin '{}' of node {index} targets missing pin {} of node {}",
                        pin.name, target.pin, target.node
                    )));
                }
            }
        }

        self.compiled_size = Some(next);
        debug!(nodes = self.nodes.len(), stack_size = next, "Compiled graph");
        Ok(())
    }

    /// Size the stack, seed the local variable prefix and clear the rest
    pub fn prepare_stack(&mut self) -> ScriptResult<()> {
        let size = self.compiled_size.ok_or(ScriptError::NotCompiled)?;
        self.stack.clear();
        self.stack.resize(size, Value::Null);
        for (slot, variable) in self.stack.iter_mut().zip(&self.local_variables) {
            *slot = variable.value.clone();
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Execution
    // ─────────────────────────────────────────────────────────────────────────

    /// Run the graph from `start` until no work is left
    ///
    /// On error the return-point stack is cleared so a later run starts clean.
    pub fn execute(
        &mut self,
        env: &mut ScriptEnv<'_>,
        start: usize,
        arguments: &[Value],
    ) -> ScriptResult<ExecutionOutcome> {
        if start >= self.nodes.len() {
            return Err(ScriptError::NodeNotFound(start));
        }
        self.prepare_stack()?;

        let Graph {
            nodes,
            stack,
            local_variables,
            return_points,
            ..
        } = self;
        let mut interpreter = Interpreter {
            nodes: nodes.as_mut_slice(),
            stack: stack.as_mut_slice(),
            local_variables: local_variables.as_slice(),
            return_points,
            returned: None,
            arguments,
            env,
        };

        let result = interpreter.run(start);
        if let Err(err) = &result {
            debug!(error = %err, "Graph execution failed");
            self.return_points.clear();
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Interpreter
// ─────────────────────────────────────────────────────────────────────────────

struct Interpreter<'g, 's> {
    nodes: &'g mut [Node],
    stack: &'g mut [Value],
    local_variables: &'g [Variable],
    return_points: &'g mut Vec<usize>,
    returned: Option<Vec<Value>>,
    arguments: &'g [Value],
    env: &'g mut ScriptEnv<'s>,
}

impl Interpreter<'_, '_> {
    fn run(&mut self, start: usize) -> ScriptResult<ExecutionOutcome> {
        let mut current = Some((start, Activation::Entered(0)));
        let mut last_node = None;

        while let Some((index, activation)) = current {
            let next_pin = self.activate(index, activation, 0)?;
            last_node = Some(index);

            let target = match next_pin {
                Some(pin) => {
                    self.nodes[index]
                        .out_execution_pins
                        .get(pin)
                        .ok_or(ScriptError::PinNotFound { node: index, pin })?
                        .target
                }
                None => None,
            };
            current = match target {
                Some(t) => Some((t.node, Activation::Entered(t.pin))),
                None => self
                    .return_points
                    .last()
                    .map(|&node| (node, Activation::Resumed)),
            };
        }

        Ok(ExecutionOutcome {
            last_node,
            returned: self.returned.take(),
        })
    }

    /// Gather inputs, run one node and store its outputs
    fn activate(
        &mut self,
        index: usize,
        activation: Activation,
        depth: usize,
    ) -> ScriptResult<Option<usize>> {
        self.env.step()?;
        let inputs = self.gather_inputs(index, depth)?;

        let node = &mut self.nodes[index];
        let mut outputs = Vec::with_capacity(node.output_pins.len());
        let locals = self.local_variables.len();

        let next = {
            let mut ctx = ExecutionContext::new(
                index,
                activation,
                self.arguments,
                &mut self.stack[..locals],
                self.local_variables,
                &mut *self.return_points,
                &mut self.returned,
                &mut *self.env,
            );
            node.execute(&mut ctx, &inputs, &mut outputs)?
        };

        if outputs.len() != node.output_pins.len() {
            return Err(ScriptError::OutputCountMismatch {
                node: index,
                expected: node.output_pins.len(),
                actual: outputs.len(),
            });
        }
        let base = node.out_parameter_stack_index;
        let slots = self
            .stack
            .get_mut(base..base + outputs.len())
            .ok_or(ScriptError::NotCompiled)?;
        for (slot, value) in slots.iter_mut().zip(outputs) {
            *slot = value;
        }

        trace!(node = index, kind = node.kind.type_name(), ?activation, ?next, "Executed node");
        Ok(next)
    }

    /// Read every input, re-evaluating implicit sources on each read
    fn gather_inputs(&mut self, index: usize, depth: usize) -> ScriptResult<Vec<Value>> {
        let count = self.nodes[index].input_pins.len();
        let mut values = Vec::with_capacity(count);

        for i in 0..count {
            let pin = &self.nodes[index].input_pins[i];
            let (Some(source), Some(slot)) = (pin.source, pin.stack_index) else {
                values.push(pin.literal.clone());
                continue;
            };

            if self.nodes.get(source.node).is_some_and(Node::is_implicit) {
                let limit = self.env.limits().max_implicit_depth;
                if depth >= limit {
                    return Err(ScriptError::ImplicitDepthExceeded(limit));
                }
                self.activate(source.node, Activation::Pulled, depth + 1)?;
            }
            values.push(self.stack.get(slot).cloned().unwrap_or_default());
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionLimits;
    use crate::nodes;
    use crate::owner::{Component, Entity, ScriptOwner};
    use crate::testing::TestHost;
    use klax_types::PinType;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn record(host: &TestHost) -> Node {
        nodes::call_native(host.registry.get_info("test/record").unwrap())
    }

    fn record_literal(host: &TestHost, value: impl Into<Value>) -> Node {
        let mut node = record(host);
        node.input_pins[0].literal = value.into();
        node
    }

    /// Stack layout as (node out index, input stack indices)
    fn layout(graph: &Graph) -> Vec<(usize, Vec<Option<usize>>)> {
        graph
            .nodes()
            .iter()
            .map(|n| {
                (
                    n.out_parameter_stack_index,
                    n.input_pins.iter().map(|p| p.stack_index).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_compile_is_idempotent() {
        let host = TestHost::new();
        let mut graph = Graph::new();
        graph.add_local_variable(Variable::new("Counter", PinType::Int));
        let for_loop = graph.add_node(nodes::for_loop());
        let add = graph.add_node(nodes::call_native(host.registry.get_info("math/add_int").unwrap()));
        let rec = graph.add_node(record(&host));
        graph.connect(for_loop, 0, add, 0).unwrap();
        graph.connect(for_loop, 0, add, 1).unwrap();
        graph.connect(add, 0, rec, 0).unwrap();
        graph.connect_execution(for_loop, 0, rec, 0).unwrap();

        graph.compile().unwrap();
        let first = layout(&graph);
        let size = graph.compiled_size();
        graph.compile().unwrap();

        assert_eq!(layout(&graph), first);
        assert_eq!(graph.compiled_size(), size);
        // one local, then ForLoop.Index, then add's result
        assert_eq!(first[0].0, 1);
        assert_eq!(first[1], (2, vec![Some(1), Some(1)]));
        assert_eq!(first[2].1, vec![Some(2)]);
        assert_eq!(size, Some(3));
    }

    #[test]
    fn test_each_reachable_node_runs_once() {
        let mut host = TestHost::new();
        let mut graph = Graph::new();
        let a = graph.add_node(record_literal(&host, 1));
        let branch = graph.add_node(nodes::branch());
        let b = graph.add_node(record_literal(&host, 2));
        let c = graph.add_node(record_literal(&host, 3));
        let unreachable = graph.add_node(record_literal(&host, 99));
        graph.set_input_literal(branch, 0, true).unwrap();
        graph.connect_execution(a, 0, branch, 0).unwrap();
        graph.connect_execution(branch, 0, b, 0).unwrap();
        graph.connect_execution(branch, 1, c, 0).unwrap();
        graph.connect_execution(b, 0, c, 0).unwrap();
        graph.connect_execution(unreachable, 0, c, 0).unwrap();
        graph.compile().unwrap();

        let outcome = graph.execute(&mut host.env(), a, &[]).unwrap();

        assert_eq!(host.recorded(), vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(outcome.last_node, Some(c));
        assert!(graph.return_points().is_empty());
    }

    #[test]
    fn test_for_loop_yields_range_then_done() {
        let mut host = TestHost::new();
        let mut graph = Graph::new();
        let for_loop = graph.add_node(nodes::for_loop());
        let body = graph.add_node(record(&host));
        let done = graph.add_node(record(&host));
        graph.set_input_literal(for_loop, 0, 0).unwrap();
        graph.set_input_literal(for_loop, 1, 4).unwrap();
        graph.connect(for_loop, 0, body, 0).unwrap();
        graph.connect(for_loop, 0, done, 0).unwrap();
        graph.connect_execution(for_loop, 0, body, 0).unwrap();
        graph.connect_execution(for_loop, 1, done, 0).unwrap();
        graph.compile().unwrap();

        graph.execute(&mut host.env(), for_loop, &[]).unwrap();

        let expected: Vec<Value> = [0, 1, 2, 3, 4, -1].into_iter().map(Value::Int).collect();
        assert_eq!(host.recorded(), expected);
        assert!(graph.return_points().is_empty());
    }

    #[test]
    fn test_for_loop_with_empty_range_goes_straight_to_done() {
        let mut host = TestHost::new();
        let mut graph = Graph::new();
        let for_loop = graph.add_node(nodes::for_loop());
        let done = graph.add_node(record(&host));
        graph.set_input_literal(for_loop, 0, 3).unwrap();
        graph.set_input_literal(for_loop, 1, 1).unwrap();
        graph.connect(for_loop, 0, done, 0).unwrap();
        graph.connect_execution(for_loop, 1, done, 0).unwrap();
        graph.compile().unwrap();

        graph.execute(&mut host.env(), for_loop, &[]).unwrap();
        assert_eq!(host.recorded(), vec![Value::Int(-1)]);
    }

    #[test]
    fn test_break_releases_return_point() {
        let mut host = TestHost::new();
        let mut graph = Graph::new();
        let for_loop = graph.add_node(nodes::for_loop());
        let equal = graph.add_node(nodes::call_native(host.registry.get_info("math/equal").unwrap()));
        let branch = graph.add_node(nodes::branch());
        let log_index = graph.add_node(record(&host));
        let log_break = graph.add_node(record_literal(&host, "break"));
        let log_done = graph.add_node(record_literal(&host, "done"));

        graph.set_input_literal(for_loop, 1, 4).unwrap();
        graph.connect(for_loop, 0, equal, 0).unwrap();
        graph.set_input_literal(equal, 1, 2).unwrap();
        graph.connect(equal, 0, branch, 0).unwrap();
        graph.connect(for_loop, 0, log_index, 0).unwrap();
        graph.connect_execution(for_loop, 0, branch, 0).unwrap();
        graph.connect_execution(branch, 0, log_break, 0).unwrap();
        graph.connect_execution(branch, 1, log_index, 0).unwrap();
        graph.connect_execution(log_break, 0, for_loop, 1).unwrap();
        graph.connect_execution(for_loop, 1, log_done, 0).unwrap();
        graph.compile().unwrap();

        let expected = vec![Value::Int(0), Value::Int(1), Value::from("break"), Value::from("done")];

        graph.execute(&mut host.env(), for_loop, &[]).unwrap();
        assert_eq!(host.recorded(), expected);
        assert!(graph.return_points().is_empty());

        // A second run starts from scratch instead of resuming the broken loop
        host.clear_recorded();
        graph.execute(&mut host.env(), log_done, &[]).unwrap();
        assert_eq!(host.recorded(), vec![Value::from("done")]);

        host.clear_recorded();
        graph.execute(&mut host.env(), for_loop, &[]).unwrap();
        assert_eq!(host.recorded(), expected);
    }

    #[test]
    fn test_for_loop_ending_at_int_max() {
        let mut host = TestHost::new();
        let mut graph = Graph::new();
        let for_loop = graph.add_node(nodes::for_loop());
        let body = graph.add_node(record(&host));
        let done = graph.add_node(record(&host));
        graph.set_input_literal(for_loop, 0, i64::MAX - 1).unwrap();
        graph.set_input_literal(for_loop, 1, i64::MAX).unwrap();
        graph.connect(for_loop, 0, body, 0).unwrap();
        graph.connect(for_loop, 0, done, 0).unwrap();
        graph.connect_execution(for_loop, 0, body, 0).unwrap();
        graph.connect_execution(for_loop, 1, done, 0).unwrap();
        graph.compile().unwrap();

        graph.execute(&mut host.env(), for_loop, &[]).unwrap();

        assert_eq!(
            host.recorded(),
            vec![Value::Int(i64::MAX - 1), Value::Int(i64::MAX), Value::Int(-1)]
        );
        assert!(graph.return_points().is_empty());
    }

    #[test]
    fn test_while_loop_break() {
        let mut host = TestHost::new();
        let mut graph = Graph::new();
        let while_loop = graph.add_node(nodes::while_loop());
        let tick = graph.add_node(record_literal(&host, "tick"));
        let done = graph.add_node(record_literal(&host, "done"));
        graph.set_input_literal(while_loop, 0, true).unwrap();
        graph.connect_execution(while_loop, 0, tick, 0).unwrap();
        graph.connect_execution(tick, 0, while_loop, 1).unwrap();
        graph.connect_execution(while_loop, 1, done, 0).unwrap();
        graph.compile().unwrap();

        graph.execute(&mut host.env(), while_loop, &[]).unwrap();

        assert_eq!(host.recorded(), vec![Value::from("tick"), Value::from("done")]);
        assert!(graph.return_points().is_empty());
    }

    #[test]
    fn test_for_each_break() {
        let mut host = TestHost::new();
        let mut graph = Graph::new();
        let for_each = graph.add_node(nodes::for_each(PinType::String));
        let array = graph.add_node(nodes::make_array(3));
        let body = graph.add_node(record(&host));
        let done = graph.add_node(record_literal(&host, "done"));
        for (i, item) in ["a", "b", "c"].into_iter().enumerate() {
            graph.set_input_literal(array, i, item).unwrap();
        }
        graph.connect(array, 0, for_each, 0).unwrap();
        graph.connect(for_each, 0, body, 0).unwrap();
        graph.connect_execution(for_each, 0, body, 0).unwrap();
        graph.connect_execution(body, 0, for_each, 1).unwrap();
        graph.connect_execution(for_each, 1, done, 0).unwrap();
        graph.compile().unwrap();

        graph.execute(&mut host.env(), for_each, &[]).unwrap();

        assert_eq!(host.recorded(), vec![Value::from("a"), Value::from("done")]);
        assert!(graph.return_points().is_empty());
    }

    #[test]
    fn test_self_and_component_handles() {
        let mut host = TestHost::new();
        let light = Component::new("Light");
        let light_guid = light.guid();
        let owner = Entity::new("Lamp").with_component(light);
        let expected = vec![
            Value::Handle(owner.handle()),
            Value::Handle(owner.component(light_guid).unwrap()),
        ];
        host.owner = Some(owner);

        let mut graph = Graph::new();
        let this = graph.add_node(nodes::self_reference());
        let component = graph.add_node(nodes::get_component(light_guid, "Light"));
        let first = graph.add_node(record(&host));
        let second = graph.add_node(record(&host));
        graph.connect(this, 0, first, 0).unwrap();
        graph.connect(component, 0, second, 0).unwrap();
        graph.connect_execution(first, 0, second, 0).unwrap();
        graph.compile().unwrap();

        graph.execute(&mut host.env(), first, &[]).unwrap();
        assert_eq!(host.recorded(), expected);
    }

    #[test]
    fn test_owner_lookups_fail_cleanly() {
        let mut host = TestHost::new();
        host.owner = Some(Entity::new("Lamp"));
        let missing = Uuid::new_v4();

        let mut graph = Graph::new();
        let for_loop = graph.add_node(nodes::for_loop());
        let component = graph.add_node(nodes::get_component(missing, "Light"));
        let rec = graph.add_node(record(&host));
        graph.set_input_literal(for_loop, 1, 3).unwrap();
        graph.connect(component, 0, rec, 0).unwrap();
        graph.connect_execution(for_loop, 0, rec, 0).unwrap();
        graph.compile().unwrap();

        assert!(matches!(
            graph.execute(&mut host.env(), for_loop, &[]),
            Err(ScriptError::ComponentNotFound(guid)) if guid == missing
        ));
        assert!(graph.return_points().is_empty());
        assert!(host.recorded().is_empty());

        // Without an owner there is no Self
        host.owner = None;
        let mut graph = Graph::new();
        let this = graph.add_node(nodes::self_reference());
        let rec = graph.add_node(record(&host));
        graph.connect(this, 0, rec, 0).unwrap();
        graph.compile().unwrap();
        assert!(matches!(
            graph.execute(&mut host.env(), rec, &[]),
            Err(ScriptError::NoOwner)
        ));
    }

    #[test]
    fn test_implicit_node_runs_once_per_read() {
        let mut host = TestHost::new();
        let mut graph = Graph::new();
        let counter = graph.add_node(nodes::call_native(host.registry.get_info("test/count").unwrap()));
        let array = graph.add_node(nodes::make_array(2));
        let rec = graph.add_node(record(&host));
        graph.connect(counter, 0, array, 0).unwrap();
        graph.connect(counter, 0, array, 1).unwrap();
        graph.connect(array, 0, rec, 0).unwrap();
        graph.compile().unwrap();

        graph.execute(&mut host.env(), rec, &[]).unwrap();

        assert_eq!(host.count(), 2);
        assert_eq!(host.recorded(), vec![Value::from(vec![1_i64, 2])]);

        graph.execute(&mut host.env(), rec, &[]).unwrap();
        assert_eq!(host.count(), 4);
    }

    #[test]
    fn test_sequence_fires_every_pin_in_order() {
        let mut host = TestHost::new();
        let mut graph = Graph::new();
        let seq = graph.add_node(nodes::sequence(3));
        for i in 0..3 {
            let rec = graph.add_node(record_literal(&host, i));
            graph.connect_execution(seq, i, rec, 0).unwrap();
        }
        graph.compile().unwrap();

        graph.execute(&mut host.env(), seq, &[]).unwrap();
        assert_eq!(host.recorded(), vec![Value::Int(0), Value::Int(1), Value::Int(2)]);
        assert!(graph.return_points().is_empty());
    }

    #[test]
    fn test_for_each_and_nested_loops() {
        let mut host = TestHost::new();
        let mut graph = Graph::new();
        let outer = graph.add_node(nodes::for_each(PinType::String));
        let inner = graph.add_node(nodes::for_loop());
        let array = graph.add_node(nodes::make_array(2));
        let rec = graph.add_node(record(&host));
        graph.set_input_literal(array, 0, "a").unwrap();
        graph.set_input_literal(array, 1, "b").unwrap();
        graph.connect(array, 0, outer, 0).unwrap();
        graph.set_input_literal(inner, 1, 1).unwrap();
        graph.connect(outer, 0, rec, 0).unwrap();
        graph.connect_execution(outer, 0, inner, 0).unwrap();
        graph.connect_execution(inner, 0, rec, 0).unwrap();
        graph.compile().unwrap();

        graph.execute(&mut host.env(), outer, &[]).unwrap();

        let expected: Vec<Value> = ["a", "a", "b", "b"].into_iter().map(Value::from).collect();
        assert_eq!(host.recorded(), expected);
        assert!(graph.return_points().is_empty());
    }

    #[test]
    fn test_switch_matches_cases() {
        let mut host = TestHost::new();
        let mut graph = Graph::new();
        let switch = graph.add_node(nodes::switch(PinType::Int));
        graph.add_output_pin(switch).unwrap();
        graph.add_output_pin(switch).unwrap();
        graph.set_case_value(switch, 2, Value::Int(7)).unwrap();
        let default = graph.add_node(record_literal(&host, "default"));
        let zero = graph.add_node(record_literal(&host, "zero"));
        let seven = graph.add_node(record_literal(&host, "seven"));
        graph.connect_execution(switch, 0, default, 0).unwrap();
        graph.connect_execution(switch, 1, zero, 0).unwrap();
        graph.connect_execution(switch, 2, seven, 0).unwrap();

        for value in [7, 0, 3] {
            graph.set_input_literal(switch, 0, value).unwrap();
            graph.compile().unwrap();
            graph.execute(&mut host.env(), switch, &[]).unwrap();
        }
        let expected: Vec<Value> = ["seven", "zero", "default"].into_iter().map(Value::from).collect();
        assert_eq!(host.recorded(), expected);
    }

    #[test]
    fn test_switch_follows_connected_type() {
        let host = TestHost::new();
        let mut graph = Graph::new();
        let source = graph.add_node(nodes::call_native(host.registry.get_info("string/concat").unwrap()));
        let switch = graph.add_node(nodes::switch(PinType::Any));
        graph.add_output_pin(switch).unwrap();

        let actions = graph.connect(source, 0, switch, 0).unwrap();
        assert_eq!(
            actions,
            vec![NodeAction::PinTypeChanged {
                pin: crate::node::PinRef::Input(0),
                pin_type: PinType::String
            }]
        );
        let case = graph.nodes()[switch].out_execution_pins[1].discriminant.clone().unwrap();
        assert_eq!(case.pin_type, PinType::String);

        graph.disconnect(switch, 0).unwrap();
        assert_eq!(graph.nodes()[switch].input_pins[0].pin_type, PinType::Any);
    }

    #[test]
    fn test_casts_are_control_flow() {
        let mut host = TestHost::new();
        let mut graph = Graph::new();
        let cast = graph.add_node(nodes::cast(PinType::Int));
        let ok = graph.add_node(record(&host));
        let failed = graph.add_node(record_literal(&host, "failed"));
        let implicit = graph.add_node(nodes::implicit_cast(PinType::String));
        let rec_success = graph.add_node(record(&host));
        graph.connect(cast, 0, ok, 0).unwrap();
        graph.connect_execution(cast, 0, ok, 0).unwrap();
        graph.connect_execution(cast, 1, failed, 0).unwrap();
        graph.connect_execution(ok, 0, rec_success, 0).unwrap();
        graph.connect_execution(failed, 0, rec_success, 0).unwrap();
        graph.connect(implicit, 1, rec_success, 0).unwrap();
        graph.set_input_literal(implicit, 0, 5).unwrap();

        graph.set_input_literal(cast, 0, 3.0).unwrap();
        graph.compile().unwrap();
        graph.execute(&mut host.env(), cast, &[]).unwrap();

        graph.set_input_literal(cast, 0, "three").unwrap();
        graph.execute(&mut host.env(), cast, &[]).unwrap();

        assert_eq!(
            host.recorded(),
            vec![
                Value::Int(3),
                Value::Bool(false),
                Value::from("failed"),
                Value::Bool(false)
            ]
        );
    }

    #[test]
    fn test_local_variables_live_in_stack_prefix() {
        let mut host = TestHost::new();
        let mut graph = Graph::new();
        let total = Variable::new("Total", PinType::Int).with_value(10);
        graph.add_local_variable(total.clone());
        let set = graph.add_node(nodes::set_variable(&total));
        let get = graph.add_node(nodes::get_variable(&total));
        let add = graph.add_node(nodes::call_native(host.registry.get_info("math/add_int").unwrap()));
        let rec = graph.add_node(record(&host));
        graph.connect(get, 0, add, 0).unwrap();
        graph.set_input_literal(add, 1, 5).unwrap();
        graph.connect(add, 0, set, 0).unwrap();
        graph.connect(get, 0, rec, 0).unwrap();
        graph.connect_execution(set, 0, rec, 0).unwrap();
        graph.compile().unwrap();

        graph.execute(&mut host.env(), set, &[]).unwrap();
        assert_eq!(graph.stack()[0], Value::Int(15));
        // Locals reset on each run
        graph.execute(&mut host.env(), set, &[]).unwrap();
        assert_eq!(host.recorded(), vec![Value::Int(15), Value::Int(15)]);
        assert_eq!(graph.local_variables()[0].value, Value::Int(10));
    }

    #[test]
    fn test_structural_edit_requires_compile() {
        let mut host = TestHost::new();
        let mut graph = Graph::new();
        let rec = graph.add_node(record_literal(&host, 1));
        assert!(matches!(
            graph.execute(&mut host.env(), rec, &[]),
            Err(ScriptError::NotCompiled)
        ));
        graph.compile().unwrap();
        graph.add_node(nodes::branch());
        assert!(!graph.is_compiled());
        assert!(matches!(
            graph.execute(&mut host.env(), rec, &[]),
            Err(ScriptError::NotCompiled)
        ));
        // Literal edits keep the layout
        graph.compile().unwrap();
        graph.set_input_literal(rec, 0, 2).unwrap();
        assert!(graph.is_compiled());
    }

    #[test]
    fn test_connection_rules() {
        let host = TestHost::new();
        let mut graph = Graph::new();
        let concat = graph.add_node(nodes::call_native(host.registry.get_info("string/concat").unwrap()));
        let for_loop = graph.add_node(nodes::for_loop());
        let cast = graph.add_node(nodes::cast(PinType::Int));
        let array = graph.add_node(nodes::make_array(1));

        assert!(matches!(
            graph.connect(concat, 0, for_loop, 0),
            Err(ScriptError::IncompatiblePinTypes { .. })
        ));
        assert!(matches!(
            graph.connect(concat, 0, cast, 1),
            Err(ScriptError::InvalidConnection(_))
        ));
        assert!(matches!(
            graph.connect_execution(for_loop, 0, array, 0),
            Err(ScriptError::InvalidConnection(_))
        ));
        assert!(matches!(
            graph.connect(concat, 3, array, 0),
            Err(ScriptError::PinNotFound { .. })
        ));
        graph.connect(concat, 0, array, 0).unwrap();
    }

    #[test]
    fn test_remove_node_reindexes_connections() {
        let host = TestHost::new();
        let mut graph = Graph::new();
        let a = graph.add_node(record_literal(&host, 1));
        let b = graph.add_node(nodes::for_loop());
        let c = graph.add_node(record(&host));
        graph.connect_execution(a, 0, b, 0).unwrap();
        graph.connect(b, 0, c, 0).unwrap();
        graph.connect_execution(b, 0, c, 0).unwrap();

        graph.remove_node(a).unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.nodes()[1].input_pins[0].source, Some(PinSource { node: 0, parameter: 0 }));
        assert_eq!(graph.nodes()[0].out_execution_pins[0].target, Some(ExecTarget { node: 1, pin: 0 }));

        graph.remove_node(0).unwrap();
        assert_eq!(graph.nodes()[0].input_pins[0].source, None);

        let mut graph = Graph::new();
        graph.add_node(nodes::function_entry(&[]));
        assert!(matches!(graph.remove_node(0), Err(ScriptError::NodeNotDeletable(0))));
    }

    #[test]
    fn test_runaway_loop_hits_step_limit() {
        let mut host = TestHost::new();
        host.limits = ExecutionLimits {
            max_steps: 100,
            ..ExecutionLimits::default()
        };
        let mut graph = Graph::new();
        let forever = graph.add_node(nodes::while_loop());
        graph.set_input_literal(forever, 0, true).unwrap();
        graph.compile().unwrap();

        assert!(matches!(
            graph.execute(&mut host.env(), forever, &[]),
            Err(ScriptError::StepLimitExceeded(100))
        ));
        assert!(graph.return_points().is_empty());
    }

    #[test]
    fn test_implicit_cycle_hits_depth_limit() {
        let mut host = TestHost::new();
        let mut graph = Graph::new();
        let a = graph.add_node(nodes::make_array(1));
        let b = graph.add_node(nodes::make_array(1));
        let rec = graph.add_node(record(&host));
        graph.connect(a, 0, b, 0).unwrap();
        graph.connect(b, 0, a, 0).unwrap();
        graph.connect(a, 0, rec, 0).unwrap();
        graph.compile().unwrap();

        assert!(matches!(
            graph.execute(&mut host.env(), rec, &[]),
            Err(ScriptError::ImplicitDepthExceeded(_))
        ));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence round trip
    // ─────────────────────────────────────────────────────────────────────────

    type Topology = Vec<(String, Vec<Option<PinSource>>, Vec<Option<ExecTarget>>)>;

    fn topology(graph: &Graph) -> Topology {
        graph
            .nodes()
            .iter()
            .map(|n| {
                (
                    n.kind.type_name().to_string(),
                    n.input_pins.iter().map(|p| p.source).collect(),
                    n.out_execution_pins.iter().map(|p| p.target).collect(),
                )
            })
            .collect()
    }

    fn random_node(rng: &mut StdRng, host: &TestHost) -> Node {
        match rng.gen_range(0..8) {
            0 => nodes::branch(),
            1 => nodes::sequence(rng.gen_range(1..4)),
            2 => nodes::for_loop(),
            3 => nodes::make_array(rng.gen_range(0..3)),
            4 => nodes::cast(PinType::Float),
            5 => nodes::implicit_cast(PinType::Int),
            6 => nodes::call_native(host.registry.get_info("math/add_int").unwrap()),
            _ => record(host),
        }
    }

    fn random_graph(rng: &mut StdRng, host: &TestHost) -> Graph {
        let mut graph = Graph::new();
        let count = rng.gen_range(2..10);
        for _ in 0..count {
            graph.add_node(random_node(rng, host));
        }
        for _ in 0..count * 3 {
            let from = rng.gen_range(0..count);
            let to = rng.gen_range(0..count);
            if rng.gen_bool(0.5) {
                let outputs = graph.nodes()[from].output_pins.len();
                let inputs = graph.nodes()[to].input_pins.len();
                if outputs > 0 && inputs > 0 {
                    let _ = graph.connect(from, rng.gen_range(0..outputs), to, rng.gen_range(0..inputs));
                }
            } else {
                let outs = graph.nodes()[from].out_execution_pins.len();
                let ins = graph.nodes()[to].in_execution_pins.len();
                if outs > 0 && ins > 0 {
                    let _ = graph.connect_execution(from, rng.gen_range(0..outs), to, rng.gen_range(0..ins));
                }
            }
        }
        graph
    }

    #[test]
    fn test_random_graphs_survive_serialization() {
        let host = TestHost::new();
        let mut rng = StdRng::seed_from_u64(0x6b6c6178);

        for _ in 0..50 {
            let mut graph = random_graph(&mut rng, &host);
            graph.compile().unwrap();

            let json = serde_json::to_string(&graph).unwrap();
            let mut restored: Graph = serde_json::from_str(&json).unwrap();

            assert!(!restored.is_compiled());
            assert_eq!(topology(&restored), topology(&graph));
            restored.compile().unwrap();
            assert_eq!(layout(&restored), layout(&graph));
        }
    }
}
