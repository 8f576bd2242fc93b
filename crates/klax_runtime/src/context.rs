//! Execution state threaded through the interpreter.
//!
//! [`ScriptEnv`] is everything a graph can reach outside itself: the script
//! object's variables and function graphs, the native registry, the owner and
//! the watchdog limits. [`ExecutionContext`] is the per-activation view a node
//! receives, layered over the env and the executing graph's own state.

use klax_types::Value;
use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

use crate::error::{ScriptError, ScriptResult};
use crate::function_graph::CustomFunctionGraph;
use crate::owner::ScriptOwner;
use crate::registry::FunctionRegistry;
use crate::variable::{Variable, VariableRef};

/// How control arrived at a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Fresh entry through the given in-execution pin
    Entered(usize),
    /// Resumed from the return-point stack
    Resumed,
    /// Evaluated on demand because a consumer read its output
    Pulled,
}

/// Watchdog bounds for one top-level execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionLimits {
    /// Node activations, including implicit pulls and nested calls
    pub max_steps: usize,
    /// Nested function graph calls
    pub max_call_depth: usize,
    /// Chained implicit node evaluations for a single input read
    pub max_implicit_depth: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_steps: 1_000_000,
            max_call_depth: 64,
            max_implicit_depth: 256,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Script Environment
// ─────────────────────────────────────────────────────────────────────────────

/// Script object state borrowed for the duration of one execution
pub struct ScriptEnv<'s> {
    variables: &'s mut Vec<Variable>,
    function_graphs: &'s mut Vec<CustomFunctionGraph>,
    registry: &'s FunctionRegistry,
    owner: Option<&'s dyn ScriptOwner>,
    limits: &'s ExecutionLimits,
    call_stack: Vec<Uuid>,
    steps: usize,
}

impl<'s> ScriptEnv<'s> {
    pub fn new(
        variables: &'s mut Vec<Variable>,
        function_graphs: &'s mut Vec<CustomFunctionGraph>,
        registry: &'s FunctionRegistry,
        owner: Option<&'s dyn ScriptOwner>,
        limits: &'s ExecutionLimits,
    ) -> Self {
        Self {
            variables,
            function_graphs,
            registry,
            owner,
            limits,
            call_stack: Vec::new(),
            steps: 0,
        }
    }

    pub fn registry(&self) -> &'s FunctionRegistry {
        self.registry
    }

    pub fn owner(&self) -> ScriptResult<&'s dyn ScriptOwner> {
        self.owner.ok_or(ScriptError::NoOwner)
    }

    pub fn limits(&self) -> &ExecutionLimits {
        self.limits
    }

    pub fn variables(&self) -> &[Variable] {
        self.variables.as_slice()
    }

    /// Activations so far
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub(crate) fn step(&mut self) -> ScriptResult<()> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(ScriptError::StepLimitExceeded(self.limits.max_steps));
        }
        Ok(())
    }

    /// Run a custom function graph as a subroutine
    ///
    /// The callee is moved out of the function list for the duration of the
    /// call and put back afterwards, whatever the outcome.
    pub fn call_function(
        &mut self,
        guid: Uuid,
        inputs: &[Value],
        outputs: &mut Vec<Value>,
    ) -> ScriptResult<()> {
        if self.call_stack.contains(&guid) {
            return Err(ScriptError::RecursiveCall(guid));
        }
        if self.call_stack.len() >= self.limits.max_call_depth {
            return Err(ScriptError::CallDepthExceeded(self.limits.max_call_depth));
        }
        let position = self
            .function_graphs
            .iter()
            .position(|f| f.guid == guid)
            .ok_or_else(|| ScriptError::FunctionNotFound(guid.to_string()))?;

        let mut callee = std::mem::take(&mut self.function_graphs[position]);
        trace!(function = %callee.name, depth = self.call_stack.len(), "Calling function graph");

        self.call_stack.push(guid);
        let result = callee.function.execute(self, inputs, outputs);
        self.call_stack.pop();

        self.function_graphs[position] = callee;
        result
    }

    fn variable_position(&self, guid: Uuid) -> Option<usize> {
        self.variables.iter().position(|v| v.guid == guid)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Execution Context
// ─────────────────────────────────────────────────────────────────────────────

/// What a node sees while it executes
pub struct ExecutionContext<'a, 's> {
    /// Index of the executing node in its graph
    pub node_index: usize,
    pub activation: Activation,
    arguments: &'a [Value],
    locals: &'a mut [Value],
    local_variables: &'a [Variable],
    return_points: &'a mut Vec<usize>,
    returned: &'a mut Option<Vec<Value>>,
    env: &'a mut ScriptEnv<'s>,
}

impl<'a, 's> ExecutionContext<'a, 's> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        node_index: usize,
        activation: Activation,
        arguments: &'a [Value],
        locals: &'a mut [Value],
        local_variables: &'a [Variable],
        return_points: &'a mut Vec<usize>,
        returned: &'a mut Option<Vec<Value>>,
        env: &'a mut ScriptEnv<'s>,
    ) -> Self {
        Self {
            node_index,
            activation,
            arguments,
            locals,
            local_variables,
            return_points,
            returned,
            env,
        }
    }

    /// Values the graph was entered with (function inputs or event arguments)
    pub fn arguments(&self) -> &[Value] {
        self.arguments
    }

    pub fn env(&mut self) -> &mut ScriptEnv<'s> {
        &mut *self.env
    }

    pub fn owner(&self) -> ScriptResult<&'s dyn ScriptOwner> {
        self.env.owner()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Return Points
    // ─────────────────────────────────────────────────────────────────────────

    /// Register the executing node for resumption
    ///
    /// A node that is already registered is re-registered: anything pushed
    /// above it belonged to its previous run.
    pub fn register_return_point(&mut self) {
        self.release_return_point();
        self.return_points.push(self.node_index);
    }

    /// Remove the executing node, and everything nested above it, from the
    /// return-point stack
    pub fn release_return_point(&mut self) {
        if let Some(position) = self.return_points.iter().rposition(|&n| n == self.node_index) {
            self.return_points.truncate(position);
        }
    }

    pub fn clear_return_points(&mut self) {
        self.return_points.clear();
    }

    /// Record the values a function graph returns
    pub fn set_returned(&mut self, values: Vec<Value>) {
        *self.returned = Some(values);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Variables
    // ─────────────────────────────────────────────────────────────────────────

    pub fn read_variable(&self, variable: &VariableRef) -> ScriptResult<Value> {
        match self.locate(variable)? {
            Slot::Local(i) => Ok(self.locals[i].clone()),
            Slot::Object(i) => Ok(self.env.variables[i].value.clone()),
        }
    }

    /// Write a variable, converting the value to the variable's type when possible
    pub fn write_variable(&mut self, variable: &VariableRef, value: Value) -> ScriptResult<()> {
        match self.locate(variable)? {
            Slot::Local(i) => {
                let value = self.local_variables[i].pin_type.cast(&value).unwrap_or(value);
                self.locals[i] = value;
            }
            Slot::Object(i) => {
                let target = &mut self.env.variables[i];
                target.value = target.pin_type.cast(&value).unwrap_or(value);
            }
        }
        Ok(())
    }

    fn locate(&self, variable: &VariableRef) -> ScriptResult<Slot> {
        let slot = match *variable {
            VariableRef::Live { guid } | VariableRef::Guid { guid } => self
                .local_variables
                .iter()
                .position(|v| v.guid == guid)
                .map(Slot::Local)
                .or_else(|| self.env.variable_position(guid).map(Slot::Object)),
            VariableRef::Indexed { local: true, index } => {
                (index < self.locals.len()).then_some(Slot::Local(index))
            }
            VariableRef::Indexed { local: false, index } => {
                (index < self.env.variables.len()).then_some(Slot::Object(index))
            }
        };
        slot.ok_or_else(|| ScriptError::VariableNotFound(format!("{variable:?}")))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Calls
    // ─────────────────────────────────────────────────────────────────────────

    pub fn call_native(&self, key: &str, inputs: &[Value], outputs: &mut Vec<Value>) -> ScriptResult<()> {
        self.env.registry.invoke(key, inputs, outputs)
    }

    pub fn call_function(
        &mut self,
        guid: Uuid,
        inputs: &[Value],
        outputs: &mut Vec<Value>,
    ) -> ScriptResult<()> {
        self.env.call_function(guid, inputs, outputs)
    }
}

enum Slot {
    Local(usize),
    Object(usize),
}
