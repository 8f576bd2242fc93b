//! Script variables and the references nodes hold to them.

use klax_types::{PinType, Value};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named, typed variable owned by a script object or by a single graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub guid: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub pin_type: PinType,
    /// Initial value for graph locals, current value for object variables
    #[serde(default)]
    pub value: Value,
}

impl Variable {
    pub fn new(name: impl Into<String>, pin_type: PinType) -> Self {
        let value = pin_type.default_value();
        Self {
            guid: Uuid::new_v4(),
            name: name.into(),
            pin_type,
            value,
        }
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = value.into();
        self
    }
}

/// How a variable node refers to its variable
///
/// In memory a node holds the variable's Guid (`Live`). The persisted format
/// swaps that for a list index (`Indexed`), and the clipboard format for a
/// Guid that is re-resolved against the paste target (`Guid`). A `Live`
/// reference cannot be serialized; `ScriptObject::on_serializing` must run
/// first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum VariableRef {
    #[serde(skip)]
    Live { guid: Uuid },
    Indexed { local: bool, index: usize },
    Guid { guid: Uuid },
}

impl VariableRef {
    pub fn live(variable: &Variable) -> Self {
        VariableRef::Live {
            guid: variable.guid,
        }
    }

    /// Guid of a live or clipboard reference
    pub fn guid(&self) -> Option<Uuid> {
        match self {
            VariableRef::Live { guid } | VariableRef::Guid { guid } => Some(*guid),
            VariableRef::Indexed { .. } => None,
        }
    }

    /// Re-express the reference in another form
    ///
    /// Resolves against the graph's locals first, then the object's
    /// variables. `None` means the variable no longer exists.
    pub(crate) fn convert(&self, locals: &[Variable], globals: &[Variable], form: RefForm) -> Option<VariableRef> {
        let (local, index) = match *self {
            VariableRef::Live { guid } | VariableRef::Guid { guid } => locals
                .iter()
                .position(|v| v.guid == guid)
                .map(|i| (true, i))
                .or_else(|| globals.iter().position(|v| v.guid == guid).map(|i| (false, i)))?,
            VariableRef::Indexed { local, index } => {
                let list = if local { locals } else { globals };
                (index < list.len()).then_some((local, index))?
            }
        };
        let guid = if local { locals[index].guid } else { globals[index].guid };
        Some(match form {
            RefForm::Live => VariableRef::Live { guid },
            RefForm::Indexed => VariableRef::Indexed { local, index },
            RefForm::Guid => VariableRef::Guid { guid },
        })
    }
}

/// Target form of a reference pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefForm {
    Live,
    Indexed,
    Guid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_variable_uses_type_default() {
        let v = Variable::new("Health", PinType::Float);
        assert_eq!(v.value, Value::Float(0.0));
        assert_eq!(Variable::new("H", PinType::Int).with_value(5).value, Value::Int(5));
    }

    #[test]
    fn test_live_reference_is_not_serializable() {
        let v = Variable::new("Health", PinType::Float);
        assert!(serde_json::to_string(&VariableRef::live(&v)).is_err());

        let indexed = VariableRef::Indexed { local: true, index: 2 };
        let json = serde_json::to_string(&indexed).unwrap();
        assert_eq!(json, r#"{"by":"indexed","local":true,"index":2}"#);
        assert_eq!(serde_json::from_str::<VariableRef>(&json).unwrap(), indexed);
    }

    #[test]
    fn test_convert_prefers_locals() {
        let local = Variable::new("Count", PinType::Int);
        let global = Variable::new("Health", PinType::Float);
        let locals = vec![local.clone()];
        let globals = vec![Variable::new("Name", PinType::String), global.clone()];

        let live = VariableRef::live(&global);
        let indexed = live.convert(&locals, &globals, RefForm::Indexed).unwrap();
        assert_eq!(indexed, VariableRef::Indexed { local: false, index: 1 });
        assert_eq!(indexed.convert(&locals, &globals, RefForm::Live), Some(live));

        let clip = VariableRef::live(&local).convert(&locals, &globals, RefForm::Guid).unwrap();
        assert_eq!(clip, VariableRef::Guid { guid: local.guid });

        // Dangling in either form
        assert!(VariableRef::Indexed { local: true, index: 3 }
            .convert(&locals, &globals, RefForm::Live)
            .is_none());
        assert!(VariableRef::live(&global).convert(&locals, &[], RefForm::Indexed).is_none());
    }
}
