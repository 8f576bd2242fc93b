//! The scripted owner: the engine object a script object is attached to.
//!
//! The runtime only sees owners through [`ScriptOwner`]. [`Entity`] and
//! [`Component`] are a small in-memory implementation used by the host and
//! by tests.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use klax_types::{Handle, HandleId, Value};
use uuid::Uuid;

use crate::event::ScriptEvent;

/// Engine object that owns a script object
pub trait ScriptOwner {
    fn guid(&self) -> Uuid;

    /// Engine type name, used as the handle type
    fn type_name(&self) -> &str;

    /// Handle scripts use to refer to the owner itself
    fn handle(&self) -> Handle {
        Handle::with_id(self.guid(), self.type_name())
    }

    /// Handle of an owned component
    fn component(&self, guid: Uuid) -> Option<Handle>;

    /// Event on the owner, or on one of its components
    fn event(&self, component: Option<Uuid>, name: &str) -> Option<Rc<ScriptEvent>>;

    /// Read a property of the owner or of one of its components
    fn get_property(&self, object: HandleId, name: &str) -> Option<Value>;

    /// Write a property; returns false if the object or property is unknown
    fn set_property(&self, object: HandleId, name: &str, value: Value) -> bool;
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory Owner
// ─────────────────────────────────────────────────────────────────────────────

/// Property bag and events shared by entities and components
#[derive(Debug)]
struct ObjectData {
    guid: Uuid,
    type_name: String,
    properties: RefCell<BTreeMap<String, Value>>,
    events: BTreeMap<String, Rc<ScriptEvent>>,
}

impl ObjectData {
    fn new(type_name: String) -> Self {
        Self {
            guid: Uuid::new_v4(),
            type_name,
            properties: RefCell::new(BTreeMap::new()),
            events: BTreeMap::new(),
        }
    }

    fn handle(&self) -> Handle {
        Handle::with_id(self.guid, self.type_name.clone())
    }
}

/// A component attached to an [`Entity`]
#[derive(Debug)]
pub struct Component {
    data: ObjectData,
}

impl Component {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            data: ObjectData::new(type_name.into()),
        }
    }

    pub fn with_guid(mut self, guid: Uuid) -> Self {
        self.data.guid = guid;
        self
    }

    pub fn with_property(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.properties.borrow_mut().insert(name.into(), value.into());
        self
    }

    pub fn with_event(mut self, event: ScriptEvent) -> Self {
        self.data.events.insert(event.name().to_string(), Rc::new(event));
        self
    }

    pub fn guid(&self) -> Uuid {
        self.data.guid
    }

    pub fn type_name(&self) -> &str {
        &self.data.type_name
    }

    pub fn event(&self, name: &str) -> Option<Rc<ScriptEvent>> {
        self.data.events.get(name).cloned()
    }

    pub fn property(&self, name: &str) -> Option<Value> {
        self.data.properties.borrow().get(name).cloned()
    }
}

/// A scripted entity with properties, events and components
#[derive(Debug)]
pub struct Entity {
    data: ObjectData,
    components: Vec<Component>,
}

impl Entity {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            data: ObjectData::new(type_name.into()),
            components: Vec::new(),
        }
    }

    pub fn with_guid(mut self, guid: Uuid) -> Self {
        self.data.guid = guid;
        self
    }

    pub fn with_property(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.properties.borrow_mut().insert(name.into(), value.into());
        self
    }

    pub fn with_event(mut self, event: ScriptEvent) -> Self {
        self.data.events.insert(event.name().to_string(), Rc::new(event));
        self
    }

    pub fn with_component(mut self, component: Component) -> Self {
        self.components.push(component);
        self
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn property(&self, name: &str) -> Option<Value> {
        self.data.properties.borrow().get(name).cloned()
    }

    /// Snapshot of the entity's own properties
    pub fn properties(&self) -> BTreeMap<String, Value> {
        self.data.properties.borrow().clone()
    }

    fn object(&self, id: HandleId) -> Option<&ObjectData> {
        if id.0 == self.data.guid {
            return Some(&self.data);
        }
        self.components
            .iter()
            .map(|c| &c.data)
            .find(|data| data.guid == id.0)
    }
}

impl ScriptOwner for Entity {
    fn guid(&self) -> Uuid {
        self.data.guid
    }

    fn type_name(&self) -> &str {
        &self.data.type_name
    }

    fn component(&self, guid: Uuid) -> Option<Handle> {
        self.components
            .iter()
            .find(|c| c.guid() == guid)
            .map(|c| c.data.handle())
    }

    fn event(&self, component: Option<Uuid>, name: &str) -> Option<Rc<ScriptEvent>> {
        match component {
            None => self.data.events.get(name).cloned(),
            Some(guid) => self
                .components
                .iter()
                .find(|c| c.guid() == guid)
                .and_then(|c| c.event(name)),
        }
    }

    fn get_property(&self, object: HandleId, name: &str) -> Option<Value> {
        self.object(object)?.properties.borrow().get(name).cloned()
    }

    fn set_property(&self, object: HandleId, name: &str, value: Value) -> bool {
        let Some(data) = self.object(object) else {
            return false;
        };
        let mut properties = data.properties.borrow_mut();
        match properties.get_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use klax_types::{ParameterInfo, PinType};

    #[test]
    fn test_properties_on_entity_and_component() {
        let light = Component::new("Light").with_property("Intensity", 1.0);
        let light_id = light.guid();
        let entity = Entity::new("Player")
            .with_property("Health", 100)
            .with_component(light);

        let handle = entity.handle();
        assert_eq!(handle.type_id, "Player");
        assert_eq!(entity.get_property(handle.id, "Health"), Some(Value::Int(100)));

        let light_handle = entity.component(light_id).unwrap();
        assert!(entity.set_property(light_handle.id, "Intensity", Value::Float(0.5)));
        assert_eq!(entity.components()[0].property("Intensity"), Some(Value::Float(0.5)));

        assert!(!entity.set_property(handle.id, "Mana", Value::Int(1)));
        assert!(entity.get_property(HandleId::new(), "Health").is_none());
    }

    #[test]
    fn test_event_lookup_is_scoped() {
        let hit = ScriptEvent::new("OnHit", vec![ParameterInfo::new("Other", PinType::Any)]).unwrap();
        let collider = Component::new("Collider").with_event(hit);
        let collider_id = collider.guid();
        let entity = Entity::new("Crate").with_component(collider);

        assert!(entity.event(None, "OnHit").is_none());
        assert!(entity.event(Some(collider_id), "OnHit").is_some());
        assert!(entity.event(Some(Uuid::new_v4()), "OnHit").is_none());
    }
}
