// Event graphs - Graphs started by an engine event
//
// Node 0 is the Receive-Event node naming the event, optionally scoped to one
// of the owner's components. While subscribed the graph holds a weak link to
// the event and its subscription id, so dropping the graph unsubscribes it.

use std::fmt;
use std::rc::{Rc, Weak};

use klax_types::{ParameterInfo, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::context::ScriptEnv;
use crate::error::{ScriptError, ScriptResult};
use crate::event::{EventHandler, ScriptEvent, SubscriptionId};
use crate::graph::Graph;
use crate::node::NodeKind;
use crate::nodes;
use crate::owner::ScriptOwner;

pub const RECEIVE_NODE: usize = 0;

#[derive(Serialize, Deserialize)]
pub struct EventGraph {
    pub guid: Uuid,
    pub graph: Graph,
    #[serde(skip)]
    subscription: Option<(Weak<ScriptEvent>, SubscriptionId)>,
}

impl fmt::Debug for EventGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventGraph")
            .field("guid", &self.guid)
            .field("graph", &self.graph)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

impl EventGraph {
    pub fn new(event: &str, component: Option<Uuid>, parameters: &[ParameterInfo]) -> Self {
        let mut graph = Graph::new();
        graph.add_node(nodes::receive_event(event, component, parameters));
        Self {
            guid: Uuid::new_v4(),
            graph,
            subscription: None,
        }
    }

    /// Event name and component scope from the Receive-Event node
    pub fn event(&self) -> ScriptResult<(&str, Option<Uuid>)> {
        match self.graph.node(RECEIVE_NODE).map(|n| &n.kind) {
            Some(NodeKind::ReceiveEvent { event, component }) => Ok((event.as_str(), *component)),
            other => Err(ScriptError::UnexpectedNode {
                index: RECEIVE_NODE,
                expected: "ReceiveEvent",
                found: other.map_or("nothing", NodeKind::type_name).to_string(),
            }),
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|(event, _)| event.strong_count() > 0)
    }

    /// Bind `handler` to the named event on `target`
    ///
    /// The event's declared parameters must line up with the Receive-Event
    /// outputs. Any earlier binding is dropped first.
    pub fn subscribe(&mut self, target: &dyn ScriptOwner, handler: EventHandler) -> ScriptResult<()> {
        let (name, component) = self.event()?;
        if let Some(guid) = component {
            target
                .component(guid)
                .ok_or(ScriptError::ComponentNotFound(guid))?;
        }
        let event = target
            .event(component, name)
            .ok_or_else(|| ScriptError::EventNotFound(name.to_string()))?;

        let outputs = self
            .graph
            .node(RECEIVE_NODE)
            .map(|n| n.output_pins.as_slice())
            .unwrap_or_default();
        if outputs.len() != event.parameters().len() {
            return Err(ScriptError::ParameterCountMismatch {
                expected: event.parameters().len(),
                actual: outputs.len(),
            });
        }
        for (pin, param) in outputs.iter().zip(event.parameters()) {
            if !pin.pin_type.is_assignable_from(&param.pin_type) {
                return Err(ScriptError::IncompatiblePinTypes {
                    from: param.pin_type.clone(),
                    to: pin.pin_type.clone(),
                });
            }
        }

        debug!(event = name, component = ?component, graph = %self.guid, "Subscribing event graph");
        self.unsubscribe();
        let id = event.subscribe(handler);
        self.subscription = Some((Rc::downgrade(&event), id));
        Ok(())
    }

    /// Drop the current binding; false if there was none
    pub fn unsubscribe(&mut self) -> bool {
        let Some((event, id)) = self.subscription.take() else {
            return false;
        };
        event.upgrade().is_some_and(|event| event.unsubscribe(id))
    }

    /// Run the graph from its Receive-Event node
    pub fn execute(&mut self, env: &mut ScriptEnv<'_>, args: &[Value]) -> ScriptResult<()> {
        self.event()?;
        self.graph.execute(env, RECEIVE_NODE, args)?;
        Ok(())
    }
}

impl Drop for EventGraph {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_handler;
    use crate::owner::{Component, Entity};
    use crate::testing::TestHost;
    use klax_types::PinType;

    fn damage_params() -> Vec<ParameterInfo> {
        vec![ParameterInfo::new("Amount", PinType::Int)]
    }

    fn noop() -> EventHandler {
        event_handler(|_| Ok(()))
    }

    #[test]
    fn test_subscribe_and_drop() {
        let entity = Entity::new("Player")
            .with_event(ScriptEvent::new("OnDamage", damage_params()).unwrap());
        let event = entity.event(None, "OnDamage").unwrap();

        let mut graph = EventGraph::new("OnDamage", None, &damage_params());
        graph.subscribe(&entity, noop()).unwrap();
        assert!(graph.is_subscribed());
        assert_eq!(event.subscriber_count(), 1);

        // Re-subscribing replaces the binding
        graph.subscribe(&entity, noop()).unwrap();
        assert_eq!(event.subscriber_count(), 1);

        drop(graph);
        assert_eq!(event.subscriber_count(), 0);
    }

    #[test]
    fn test_subscribe_errors() {
        let light = Component::new("Light")
            .with_event(ScriptEvent::new("OnToggle", Vec::new()).unwrap());
        let light_id = light.guid();
        let entity = Entity::new("Lamp").with_component(light);

        let mut missing = EventGraph::new("OnDamage", None, &damage_params());
        assert!(matches!(
            missing.subscribe(&entity, noop()),
            Err(ScriptError::EventNotFound(name)) if name == "OnDamage"
        ));

        let ghost = Uuid::new_v4();
        let mut orphan = EventGraph::new("OnToggle", Some(ghost), &[]);
        assert!(matches!(
            orphan.subscribe(&entity, noop()),
            Err(ScriptError::ComponentNotFound(guid)) if guid == ghost
        ));

        let mut wrong_arity = EventGraph::new("OnToggle", Some(light_id), &damage_params());
        assert!(matches!(
            wrong_arity.subscribe(&entity, noop()),
            Err(ScriptError::ParameterCountMismatch { expected: 0, actual: 1 })
        ));

        let mut scoped = EventGraph::new("OnToggle", Some(light_id), &[]);
        scoped.subscribe(&entity, noop()).unwrap();
        assert!(scoped.is_subscribed());
    }

    #[test]
    fn test_execute_publishes_arguments() {
        let mut host = TestHost::new();
        let mut graph = EventGraph::new("OnDamage", None, &damage_params());
        let rec = graph
            .graph
            .add_node(nodes::call_native(host.registry.get_info("test/record").unwrap()));
        graph.graph.connect(RECEIVE_NODE, 0, rec, 0).unwrap();
        graph.graph.connect_execution(RECEIVE_NODE, 0, rec, 0).unwrap();
        graph.graph.compile().unwrap();

        graph.execute(&mut host.env(), &[Value::Int(12)]).unwrap();
        assert_eq!(host.recorded(), vec![Value::Int(12)]);
    }

    #[test]
    fn test_subscription_is_not_persisted() {
        let entity = Entity::new("Player")
            .with_event(ScriptEvent::new("OnDamage", damage_params()).unwrap());
        let mut graph = EventGraph::new("OnDamage", None, &damage_params());
        graph.subscribe(&entity, noop()).unwrap();

        let json = serde_json::to_string(&graph).unwrap();
        let restored: EventGraph = serde_json::from_str(&json).unwrap();
        assert!(!restored.is_subscribed());
        assert_eq!(restored.guid, graph.guid);
        assert_eq!(restored.event().unwrap(), ("OnDamage", None));
    }
}
