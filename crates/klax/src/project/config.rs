//! Project Configuration Types
//!
//! Defines the structure of the project manifest (`klax.toml`).

use std::collections::BTreeMap;

use klax_runtime::{Component, Entity, ExecutionLimits, ScriptEvent};
use klax_types::{ParameterInfo, PinType, Value};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::loader::LoadError;

/// Project manifest (klax.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub project: ProjectInfo,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub entity: EntityConfig,
}

/// Project information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub description: Option<String>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Tracing filter used when `RUST_LOG` is not set
    pub log_filter: Option<String>,
    #[serde(flatten)]
    pub limits: ExecutionLimits,
}

/// A typed event parameter, with the type written as text (`Int`, `Array<Float>`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub pin_type: String,
}

impl ParamConfig {
    pub fn to_parameter(&self) -> Result<ParameterInfo, LoadError> {
        let pin_type: PinType = self.pin_type.parse()?;
        Ok(ParameterInfo::new(self.name.clone(), pin_type))
    }
}

/// Event exposed by the entity or one of its components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamConfig>,
}

impl EventConfig {
    pub fn build(&self) -> Result<ScriptEvent, LoadError> {
        let params = self
            .params
            .iter()
            .map(ParamConfig::to_parameter)
            .collect::<Result<Vec<_>, _>>()?;
        ScriptEvent::new(self.name.clone(), params).map_err(|source| LoadError::InvalidEvent {
            name: self.name.clone(),
            source,
        })
    }
}

/// Component attached to the scripted entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    #[serde(rename = "type")]
    pub type_name: String,
    pub guid: Option<Uuid>,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub events: Vec<EventConfig>,
}

impl ComponentConfig {
    pub fn build(&self) -> Result<Component, LoadError> {
        let mut component = Component::new(self.type_name.clone());
        if let Some(guid) = self.guid {
            component = component.with_guid(guid);
        }
        for (name, value) in &self.properties {
            component = component.with_property(name.clone(), Value::from(value.clone()));
        }
        for event in &self.events {
            component = component.with_event(event.build()?);
        }
        Ok(component)
    }
}

/// The entity every script in the project is attached to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConfig {
    #[serde(rename = "type", default = "default_entity_type")]
    pub type_name: String,
    pub guid: Option<Uuid>,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub events: Vec<EventConfig>,
    #[serde(default)]
    pub components: Vec<ComponentConfig>,
}

fn default_entity_type() -> String {
    "Entity".to_string()
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            type_name: default_entity_type(),
            guid: None,
            properties: BTreeMap::new(),
            events: Vec::new(),
            components: Vec::new(),
        }
    }
}

impl EntityConfig {
    /// Build the in-memory owner described by this section
    pub fn build(&self) -> Result<Entity, LoadError> {
        let mut entity = Entity::new(self.type_name.clone());
        if let Some(guid) = self.guid {
            entity = entity.with_guid(guid);
        }
        for (name, value) in &self.properties {
            entity = entity.with_property(name.clone(), Value::from(value.clone()));
        }
        for event in &self.events {
            entity = entity.with_event(event.build()?);
        }
        for component in &self.components {
            entity = entity.with_component(component.build()?);
        }
        Ok(entity)
    }
}
