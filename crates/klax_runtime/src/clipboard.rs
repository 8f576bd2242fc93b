// Clipboard - Copying nodes between graphs and script objects
//
// Copied nodes keep only the connections between each other, re-indexed to
// the selection. Variable references travel as Guids and are resolved again
// against the paste target; nodes that cannot be resolved there are dropped.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::ScriptResult;
use crate::graph::Graph;
use crate::node::{Node, NodeKind};
use crate::pin::{ExecTarget, PinSource};
use crate::variable::{RefForm, Variable};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Clipboard {
    nodes: Vec<Node>,
}

/// Keep connections inside the copied set, renumbered through `remap`
fn rewire(node: &mut Node, remap: &HashMap<usize, usize>) {
    for pin in &mut node.input_pins {
        pin.stack_index = None;
        pin.source = pin.source.and_then(|src| {
            remap.get(&src.node).map(|&node| PinSource { node, ..src })
        });
    }
    for pin in &mut node.out_execution_pins {
        pin.target = pin
            .target
            .and_then(|t| remap.get(&t.node).map(|&node| ExecTarget { node, ..t }));
    }
}

/// Serialize the selected nodes of `graph`
///
/// Structural nodes and nodes whose variable is gone are left out.
pub fn copy_nodes(graph: &Graph, selection: &[usize], variables: &[Variable]) -> ScriptResult<String> {
    let mut picked: Vec<usize> = selection
        .iter()
        .copied()
        .filter(|&i| graph.node(i).is_some_and(Node::allow_copy))
        .collect();
    picked.sort_unstable();
    picked.dedup();

    let mut nodes: Vec<(usize, Node)> = Vec::with_capacity(picked.len());
    for index in picked {
        let Some(mut node) = graph.node(index).cloned() else { continue };
        if let Some(variable) = node.kind.variable_mut() {
            match variable.convert(graph.local_variables(), variables, RefForm::Guid) {
                Some(converted) => *variable = converted,
                None => {
                    debug!(node = index, "Skipping copy of node with missing variable");
                    continue;
                }
            }
        }
        nodes.push((index, node));
    }

    let remap: HashMap<usize, usize> = nodes
        .iter()
        .enumerate()
        .map(|(new, (old, _))| (*old, new))
        .collect();
    let clipboard = Clipboard {
        nodes: nodes
            .into_iter()
            .map(|(_, mut node)| {
                rewire(&mut node, &remap);
                node
            })
            .collect(),
    };
    debug!(nodes = clipboard.nodes.len(), "Copied nodes");
    Ok(serde_json::to_string(&clipboard)?)
}

/// Add clipboard nodes to `graph`, shifted by `offset`
///
/// Returns the indices of the pasted nodes. Variable and function references
/// that do not resolve in the target drop their node without an error.
pub fn paste_nodes(
    graph: &mut Graph,
    variables: &[Variable],
    functions: &[Uuid],
    text: &str,
    offset: [f32; 2],
) -> ScriptResult<Vec<usize>> {
    let clipboard: Clipboard = serde_json::from_str(text)?;

    let mut kept = Vec::with_capacity(clipboard.nodes.len());
    for (index, mut node) in clipboard.nodes.into_iter().enumerate() {
        if let Some(variable) = node.kind.variable_mut() {
            match variable.convert(graph.local_variables(), variables, RefForm::Live) {
                Some(converted) => *variable = converted,
                None => {
                    debug!(node = index, "Dropping pasted node with unresolved variable");
                    continue;
                }
            }
        }
        if let NodeKind::CallFunction { function } = node.kind {
            if !functions.contains(&function) {
                debug!(node = index, %function, "Dropping pasted call to unknown function");
                continue;
            }
        }
        kept.push((index, node));
    }

    let base = graph.len();
    let remap: HashMap<usize, usize> = kept
        .iter()
        .enumerate()
        .map(|(i, (old, _))| (*old, base + i))
        .collect();

    let mut pasted = Vec::with_capacity(kept.len());
    for (_, mut node) in kept {
        rewire(&mut node, &remap);
        node.position = [node.position[0] + offset[0], node.position[1] + offset[1]];
        pasted.push(graph.add_node(node));
    }
    graph.prune_connections();
    debug!(nodes = pasted.len(), "Pasted nodes");
    Ok(pasted)
}
