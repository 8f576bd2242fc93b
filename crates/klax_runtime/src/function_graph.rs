// Function graphs - Graphs with an Entry/Return calling convention
//
// Node 0 is always the Entry node, publishing the call's inputs; node 1 is
// always the Return node, collecting its outputs. The declared parameter
// lists are the source of truth and the two nodes are rebuilt from them.

use std::iter;

use klax_types::{ParameterInfo, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::context::ScriptEnv;
use crate::error::{ScriptError, ScriptResult};
use crate::graph::Graph;
use crate::node::{NodeAction, NodeKind};
use crate::nodes;

pub const ENTRY_NODE: usize = 0;
pub const RETURN_NODE: usize = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionGraph {
    pub graph: Graph,
    #[serde(default)]
    pub input_parameters: Vec<ParameterInfo>,
    #[serde(default)]
    pub output_parameters: Vec<ParameterInfo>,
}

impl Default for FunctionGraph {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

impl FunctionGraph {
    /// Create a graph holding just the Entry and Return nodes
    pub fn new(input_parameters: Vec<ParameterInfo>, output_parameters: Vec<ParameterInfo>) -> Self {
        let mut graph = Graph::new();
        graph.add_node(nodes::function_entry(&input_parameters));
        graph.add_node(nodes::function_return(&output_parameters).at(400.0, 0.0));
        Self {
            graph,
            input_parameters,
            output_parameters,
        }
    }

    pub fn num_input_values(&self) -> usize {
        self.input_parameters.len()
    }

    pub fn num_output_values(&self) -> usize {
        self.output_parameters.len()
    }

    fn check_structure(&self) -> ScriptResult<()> {
        let expected = [
            (ENTRY_NODE, NodeKind::FunctionEntry),
            (RETURN_NODE, NodeKind::FunctionReturn),
        ];
        for (index, kind) in expected {
            let found = self.graph.node(index).map(|n| &n.kind);
            if found != Some(&kind) {
                return Err(ScriptError::UnexpectedNode {
                    index,
                    expected: kind.type_name(),
                    found: found.map_or("nothing", NodeKind::type_name).to_string(),
                });
            }
        }
        Ok(())
    }

    /// Run from Entry and append one value per output parameter
    ///
    /// When control never reaches the Return node every output is null.
    pub fn execute(
        &mut self,
        env: &mut ScriptEnv<'_>,
        in_values: &[Value],
        out_values: &mut Vec<Value>,
    ) -> ScriptResult<()> {
        self.check_structure()?;
        if in_values.len() != self.num_input_values() {
            return Err(ScriptError::ParameterCountMismatch {
                expected: self.num_input_values(),
                actual: in_values.len(),
            });
        }

        let outcome = self.graph.execute(env, ENTRY_NODE, in_values)?;
        let count = self.num_output_values();
        match outcome.returned {
            Some(mut values) if outcome.last_node == Some(RETURN_NODE) => {
                values.resize(count, Value::Null);
                out_values.extend(values);
            }
            _ => out_values.extend(iter::repeat_n(Value::Null, count)),
        }
        Ok(())
    }

    /// Reshape Entry and Return to the declared parameters
    ///
    /// Returns the actions applied to the Entry and Return nodes. Connections
    /// that no longer fit are dropped.
    pub fn rebuild_function_nodes(&mut self) -> ScriptResult<(Vec<NodeAction>, Vec<NodeAction>)> {
        self.check_structure()?;
        let entry_actions = self
            .graph
            .node_mut(ENTRY_NODE)
            .map(|n| n.sync_outputs(&self.input_parameters))
            .unwrap_or_default();
        let return_actions = self
            .graph
            .node_mut(RETURN_NODE)
            .map(|n| n.sync_inputs(&self.output_parameters))
            .unwrap_or_default();

        let pruned = self.graph.prune_connections();
        debug!(
            inputs = self.input_parameters.len(),
            outputs = self.output_parameters.len(),
            pruned,
            "Rebuilt function nodes"
        );
        Ok((entry_actions, return_actions))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Custom Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Notification that a function's signature changed; call sites resync from it
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionNodesRebuilt {
    pub function: Uuid,
    pub inputs: Vec<ParameterInfo>,
    pub outputs: Vec<ParameterInfo>,
    pub entry_actions: Vec<NodeAction>,
    pub return_actions: Vec<NodeAction>,
}

/// A function authored in the script, callable by Guid
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomFunctionGraph {
    pub guid: Uuid,
    pub name: String,
    #[serde(flatten)]
    pub function: FunctionGraph,
}

impl CustomFunctionGraph {
    pub fn new(
        name: impl Into<String>,
        input_parameters: Vec<ParameterInfo>,
        output_parameters: Vec<ParameterInfo>,
    ) -> Self {
        Self {
            guid: Uuid::new_v4(),
            name: name.into(),
            function: FunctionGraph::new(input_parameters, output_parameters),
        }
    }

    pub fn rebuild(&mut self) -> ScriptResult<FunctionNodesRebuilt> {
        let (entry_actions, return_actions) = self.function.rebuild_function_nodes()?;
        Ok(FunctionNodesRebuilt {
            function: self.guid,
            inputs: self.function.input_parameters.clone(),
            outputs: self.function.output_parameters.clone(),
            entry_actions,
            return_actions,
        })
    }
}

/// Implementation of one function of an interface the script includes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterfaceFunctionGraph {
    pub interface: String,
    pub name: String,
    #[serde(flatten)]
    pub function: FunctionGraph,
}

impl InterfaceFunctionGraph {
    pub fn new(
        interface: impl Into<String>,
        name: impl Into<String>,
        input_parameters: Vec<ParameterInfo>,
        output_parameters: Vec<ParameterInfo>,
    ) -> Self {
        Self {
            interface: interface.into(),
            name: name.into(),
            function: FunctionGraph::new(input_parameters, output_parameters),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHost;
    use klax_types::PinType;

    fn int_params(names: &[&str]) -> Vec<ParameterInfo> {
        names.iter().map(|n| ParameterInfo::new(*n, PinType::Int)).collect()
    }

    /// `A + B`, with Entry wired to Return through `math/add_int`
    fn adder(host: &TestHost) -> FunctionGraph {
        let mut function = FunctionGraph::new(int_params(&["A", "B"]), int_params(&["Sum"]));
        let graph = &mut function.graph;
        let add = graph.add_node(nodes::call_native(host.registry.get_info("math/add_int").unwrap()));
        graph.connect(ENTRY_NODE, 0, add, 0).unwrap();
        graph.connect(ENTRY_NODE, 1, add, 1).unwrap();
        graph.connect(add, 0, RETURN_NODE, 0).unwrap();
        graph.connect_execution(ENTRY_NODE, 0, RETURN_NODE, 0).unwrap();
        graph.compile().unwrap();
        function
    }

    #[test]
    fn test_function_returns_sum() {
        let mut host = TestHost::new();
        let mut function = adder(&host);

        let mut out = Vec::new();
        function
            .execute(&mut host.env(), &[Value::Int(3), Value::Int(4)], &mut out)
            .unwrap();
        assert_eq!(out, vec![Value::Int(7)]);
    }

    #[test]
    fn test_unreached_return_yields_nulls() {
        let mut host = TestHost::new();
        let mut function = adder(&host);
        function.graph.disconnect_execution(ENTRY_NODE, 0).unwrap();
        function.graph.compile().unwrap();

        let mut out = Vec::new();
        function
            .execute(&mut host.env(), &[Value::Int(3), Value::Int(4)], &mut out)
            .unwrap();
        assert_eq!(out, vec![Value::Null]);
    }

    #[test]
    fn test_argument_count_is_checked() {
        let mut host = TestHost::new();
        let mut function = adder(&host);
        let err = function
            .execute(&mut host.env(), &[Value::Int(3)], &mut Vec::new())
            .unwrap_err();
        assert!(matches!(
            err,
            ScriptError::ParameterCountMismatch { expected: 2, actual: 1 }
        ));
    }

    #[test]
    fn test_structure_is_checked() {
        let mut host = TestHost::new();
        let mut function = FunctionGraph {
            graph: Graph::new(),
            input_parameters: Vec::new(),
            output_parameters: Vec::new(),
        };
        function.graph.add_node(nodes::function_entry(&[]));
        function.graph.add_node(nodes::branch());
        function.graph.compile().unwrap();

        let err = function.execute(&mut host.env(), &[], &mut Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            ScriptError::UnexpectedNode { index: 1, expected: "FunctionReturn", .. }
        ));
    }

    #[test]
    fn test_return_inside_loop_unwinds() {
        let mut host = TestHost::new();
        let mut function = FunctionGraph::new(Vec::new(), int_params(&["Index"]));
        let graph = &mut function.graph;
        let for_loop = graph.add_node(nodes::for_loop());
        graph.set_input_literal(for_loop, 1, 10).unwrap();
        graph.connect_execution(ENTRY_NODE, 0, for_loop, 0).unwrap();
        graph.connect_execution(for_loop, 0, RETURN_NODE, 0).unwrap();
        graph.connect(for_loop, 0, RETURN_NODE, 0).unwrap();
        graph.compile().unwrap();

        let mut out = Vec::new();
        function.execute(&mut host.env(), &[], &mut out).unwrap();
        assert_eq!(out, vec![Value::Int(0)]);
        assert!(function.graph.return_points().is_empty());
    }

    #[test]
    fn test_rebuild_keeps_compatible_connections() {
        let host = TestHost::new();
        let mut function = adder(&host);

        function.input_parameters = vec![
            ParameterInfo::new("A", PinType::Int),
            ParameterInfo::new("B", PinType::String),
            ParameterInfo::new("C", PinType::Bool),
        ];
        let (entry_actions, return_actions) = function.rebuild_function_nodes().unwrap();

        let entry = function.graph.node(ENTRY_NODE).unwrap();
        assert_eq!(entry.output_pins.len(), 3);
        assert_eq!(entry_actions.len(), 2);
        assert!(return_actions.is_empty());

        // A still feeds the adder; B no longer fits the Int input
        let add = function.graph.node(2).unwrap();
        assert!(add.input_pins[0].is_connected());
        assert!(!add.input_pins[1].is_connected());
        assert!(!function.graph.is_compiled());
    }

    #[test]
    fn test_custom_function_round_trip() {
        let host = TestHost::new();
        let custom = CustomFunctionGraph {
            guid: Uuid::new_v4(),
            name: "Add".to_string(),
            function: adder(&host),
        };
        let json = serde_json::to_value(&custom).unwrap();
        assert_eq!(json["name"], "Add");
        assert!(json.get("graph").is_some());

        let restored: CustomFunctionGraph = serde_json::from_value(json).unwrap();
        assert_eq!(restored.guid, custom.guid);
        assert_eq!(restored.function.num_input_values(), 2);
        assert_eq!(restored.function.graph.len(), 3);
    }
}
