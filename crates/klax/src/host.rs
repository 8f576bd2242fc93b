//! Script Host
//!
//! Builds the entity a project describes, attaches every script object to it
//! and forwards events and calls from the command line.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use klax_runtime::{
    Entity, FunctionRegistry, ScriptError, ScriptObject, ScriptOwner, ScriptRuntime, SharedScriptObject,
};
use klax_types::Value;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::project::{LoadError, Project};

/// Error type for the host
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Script '{0}' not found")]
    ScriptNotFound(String),

    #[error("Event '{0}' not found on the entity")]
    EventNotFound(String),

    #[error("Script '{script}' failed: {source}")]
    Script {
        script: String,
        #[source]
        source: ScriptError,
    },

    #[error("Event '{event}' failed: {source}")]
    Event {
        event: String,
        #[source]
        source: ScriptError,
    },
}

/// Counts reported by `klax check`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptSummary {
    pub name: String,
    pub variables: usize,
    pub event_graphs: usize,
    pub function_graphs: usize,
    pub interface_graphs: usize,
    pub nodes: usize,
}

impl ScriptSummary {
    pub fn of(script: &ScriptObject) -> Self {
        Self {
            name: script.name.clone(),
            variables: script.variables().len(),
            event_graphs: script.event_graphs().len(),
            function_graphs: script.function_graphs().len(),
            interface_graphs: script.interface_graphs().len(),
            nodes: script.node_count(),
        }
    }
}

/// A running project: one entity and the scripts attached to it
pub struct Host {
    entity: Rc<Entity>,
    scripts: BTreeMap<String, SharedScriptObject>,
}

impl Host {
    /// Build the entity and initialize every script against it
    pub fn start(project: Project, registry: Arc<FunctionRegistry>) -> Result<Self, HostError> {
        let entity = Rc::new(project.manifest.entity.build()?);
        let runtime = ScriptRuntime::new(registry).with_limits(project.manifest.runtime.limits.clone());
        let owner: Rc<dyn ScriptOwner> = entity.clone();

        let mut scripts = BTreeMap::new();
        for (name, script) in project.scripts {
            let shared = script.into_shared();
            ScriptObject::init(&shared, Rc::clone(&owner), runtime.clone()).map_err(|source| {
                HostError::Script {
                    script: name.clone(),
                    source,
                }
            })?;
            scripts.insert(name, shared);
        }

        info!(
            entity = entity.type_name(),
            guid = %entity.guid(),
            scripts = scripts.len(),
            "Host started"
        );
        Ok(Self { entity, scripts })
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn script(&self, name: &str) -> Option<&SharedScriptObject> {
        self.scripts.get(name)
    }

    pub fn script_names(&self) -> impl Iterator<Item = &str> {
        self.scripts.keys().map(String::as_str)
    }

    pub fn summaries(&self) -> Vec<ScriptSummary> {
        self.scripts
            .values()
            .map(|script| ScriptSummary::of(&script.borrow()))
            .collect()
    }

    /// Fire an event on the entity, or on one of its components
    pub fn fire(&self, component: Option<Uuid>, event: &str, args: &[Value]) -> Result<(), HostError> {
        let handle = self
            .entity
            .event(component, event)
            .ok_or_else(|| HostError::EventNotFound(event.to_string()))?;
        debug!(event, subscribers = handle.subscriber_count(), "Firing event");
        handle.invoke(args).map_err(|source| HostError::Event {
            event: event.to_string(),
            source,
        })
    }

    /// Call a custom function of one script by name
    pub fn call(&self, script: &str, function: &str, args: &[Value]) -> Result<Vec<Value>, HostError> {
        self.with_script(script, |object| object.call_function_by_name(function, args))
    }

    /// Call a script's implementation of an interface function
    pub fn call_interface(
        &self,
        script: &str,
        interface: &str,
        function: &str,
        args: &[Value],
    ) -> Result<Vec<Value>, HostError> {
        self.with_script(script, |object| object.call_interface_function(interface, function, args))
    }

    fn with_script<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut ScriptObject) -> Result<T, ScriptError>,
    ) -> Result<T, HostError> {
        let shared = self
            .scripts
            .get(name)
            .ok_or_else(|| HostError::ScriptNotFound(name.to_string()))?;
        let result = match shared.try_borrow_mut() {
            Ok(mut object) => f(&mut object),
            Err(_) => Err(ScriptError::ScriptBusy),
        };
        result.map_err(|source| HostError::Script {
            script: name.to_string(),
            source,
        })
    }

    /// Detach every script from the entity
    pub fn shutdown(&self) {
        for script in self.scripts.values() {
            if let Ok(mut object) = script.try_borrow_mut() {
                object.shutdown();
            }
        }
        info!("Host shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use klax_runtime::{
        CustomFunctionGraph, ENTRY_NODE, EventGraph, RETURN_NODE, Variable, nodes,
    };
    use klax_types::{ParameterInfo, PinType};
    use std::path::PathBuf;

    const MANIFEST: &str = r#"
[project]
id = "arena"
name = "Arena"

[entity]
type = "Player"
properties = { Health = 100 }

[[entity.events]]
name = "OnDamage"
params = [{ name = "Amount", type = "Int" }]
"#;

    fn native(registry: &FunctionRegistry, key: &str) -> klax_runtime::Node {
        nodes::call_native(registry.get_info(key).unwrap())
    }

    /// OnDamage subtracts the amount from Health and counts the hits;
    /// `Scale(X)` returns X * 10
    fn player_script(registry: &FunctionRegistry) -> ScriptObject {
        let mut script = ScriptObject::new("Player");
        let hits = Variable::new("Hits", PinType::Int);
        script.add_variable(hits.clone());

        let int = |name: &str| ParameterInfo::new(name, PinType::Int);
        let mut event = EventGraph::new("OnDamage", None, &[int("Amount")]);
        let graph = &mut event.graph;
        let health = graph.add_node(nodes::get_member("Health", PinType::Int));
        let subtract = graph.add_node(native(registry, "math/subtract_int"));
        let write = graph.add_node(nodes::set_member("Health", PinType::Int));
        let get = graph.add_node(nodes::get_variable(&hits));
        let add = graph.add_node(native(registry, "math/add_int"));
        let set = graph.add_node(nodes::set_variable(&hits));
        graph.connect(health, 0, subtract, 0).unwrap();
        graph.connect(0, 0, subtract, 1).unwrap();
        graph.connect(subtract, 0, write, 1).unwrap();
        graph.connect(get, 0, add, 0).unwrap();
        graph.set_input_literal(add, 1, 1).unwrap();
        graph.connect(add, 0, set, 0).unwrap();
        graph.connect_execution(0, 0, write, 0).unwrap();
        graph.connect_execution(write, 0, set, 0).unwrap();
        script.add_event_graph(event);

        let mut scale = CustomFunctionGraph::new("Scale", vec![int("X")], vec![int("Result")]);
        let graph = &mut scale.function.graph;
        let multiply = graph.add_node(native(registry, "math/multiply_int"));
        graph.connect(ENTRY_NODE, 0, multiply, 0).unwrap();
        graph.set_input_literal(multiply, 1, 10).unwrap();
        graph.connect(multiply, 0, RETURN_NODE, 0).unwrap();
        graph.connect_execution(ENTRY_NODE, 0, RETURN_NODE, 0).unwrap();
        script.add_function_graph(scale);
        script
    }

    fn start() -> Host {
        let registry = Arc::new(FunctionRegistry::with_builtins());
        let script = player_script(&registry);
        let project = Project {
            path: PathBuf::from("arena"),
            manifest: toml::from_str(MANIFEST).unwrap(),
            scripts: BTreeMap::from([(script.name.clone(), script)]),
        };
        Host::start(project, registry).unwrap()
    }

    #[test]
    fn test_fire_event() {
        let host = start();
        host.fire(None, "OnDamage", &[Value::Int(30)]).unwrap();
        host.fire(None, "OnDamage", &[Value::Int(20)]).unwrap();

        assert_eq!(host.entity().property("Health"), Some(Value::Int(50)));
        let script = host.script("Player").unwrap().borrow();
        assert_eq!(script.variable("Hits").unwrap().value, Value::Int(2));
    }

    #[test]
    fn test_fire_errors() {
        let host = start();
        assert!(matches!(
            host.fire(None, "OnJump", &[]),
            Err(HostError::EventNotFound(name)) if name == "OnJump"
        ));
        assert!(matches!(
            host.fire(None, "OnDamage", &[]),
            Err(HostError::Event {
                source: ScriptError::ParameterCountMismatch { expected: 1, actual: 0 },
                ..
            })
        ));
    }

    #[test]
    fn test_call_function() {
        let host = start();
        assert_eq!(host.call("Player", "Scale", &[Value::Int(4)]).unwrap(), vec![Value::Int(40)]);
        assert!(matches!(
            host.call("Enemy", "Scale", &[]),
            Err(HostError::ScriptNotFound(_))
        ));
        assert!(matches!(
            host.call("Player", "Missing", &[]),
            Err(HostError::Script {
                source: ScriptError::FunctionNotFound(_),
                ..
            })
        ));
    }

    #[test]
    fn test_summaries_and_shutdown() {
        let host = start();
        let summary = &host.summaries()[0];
        assert_eq!(summary.name, "Player");
        assert_eq!(summary.event_graphs, 1);
        assert_eq!(summary.function_graphs, 1);
        assert_eq!(summary.nodes, 7 + 3);

        host.shutdown();
        host.fire(None, "OnDamage", &[Value::Int(30)]).unwrap();
        assert_eq!(host.entity().property("Health"), Some(Value::Int(100)));
    }
}
