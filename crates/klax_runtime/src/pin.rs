//! Pins - typed connectors owned by a node.
//!
//! Connections are stored on the consuming side as indices into the owning
//! graph's node list: an input pin records which output it reads from, an
//! execution pin records which node and in-pin it continues at.

use klax_types::{PinType, Value};
use serde::{Deserialize, Serialize};

fn is_false(b: &bool) -> bool {
    !*b
}

/// Output that feeds an input pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PinSource {
    pub node: usize,
    pub parameter: usize,
}

/// Node and in-execution pin that an execution pin continues at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecTarget {
    pub node: usize,
    pub pin: usize,
}

/// Value a switch case pin matches against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    #[serde(rename = "type")]
    pub pin_type: PinType,
    pub value: Value,
}

impl SwitchCase {
    pub fn matches(&self, value: &Value) -> bool {
        self.pin_type.cast(value).as_ref() == Some(&self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputPin {
    pub name: String,
    #[serde(rename = "type")]
    pub pin_type: PinType,
    /// Used whenever the pin is not connected
    #[serde(default)]
    pub literal: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PinSource>,
    /// Stack slot of the connected output, assigned by `Graph::compile`
    #[serde(skip)]
    pub stack_index: Option<usize>,
    /// Literal-only pins configure the node and can never be connected
    #[serde(default, skip_serializing_if = "is_false")]
    pub literal_only: bool,
}

impl InputPin {
    pub fn new(name: impl Into<String>, pin_type: PinType) -> Self {
        let literal = pin_type.default_value();
        Self {
            name: name.into(),
            pin_type,
            literal,
            source: None,
            stack_index: None,
            literal_only: false,
        }
    }

    pub fn literal_only(name: impl Into<String>, pin_type: PinType, literal: Value) -> Self {
        Self {
            literal,
            literal_only: true,
            ..Self::new(name, pin_type)
        }
    }

    pub fn is_connected(&self) -> bool {
        self.source.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputPin {
    pub name: String,
    #[serde(rename = "type")]
    pub pin_type: PinType,
}

impl OutputPin {
    pub fn new(name: impl Into<String>, pin_type: PinType) -> Self {
        Self {
            name: name.into(),
            pin_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPin {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ExecTarget>,
    /// Only set on switch case pins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminant: Option<SwitchCase>,
}

impl ExecutionPin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: None,
            discriminant: None,
        }
    }

    pub fn case(name: impl Into<String>, pin_type: PinType, value: Value) -> Self {
        Self {
            discriminant: Some(SwitchCase { pin_type, value }),
            ..Self::new(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_pin_defaults_to_type_literal() {
        let pin = InputPin::new("Count", PinType::Int);
        assert_eq!(pin.literal, Value::Int(0));
        assert!(!pin.is_connected());
        assert_eq!(pin.stack_index, None);
    }

    #[test]
    fn test_switch_case_matches_through_cast() {
        let case = SwitchCase {
            pin_type: PinType::Int,
            value: Value::Int(3),
        };
        assert!(case.matches(&Value::Int(3)));
        assert!(case.matches(&Value::Float(3.0)));
        assert!(!case.matches(&Value::Int(4)));
        assert!(!case.matches(&Value::from("3")));
    }

    #[test]
    fn test_stack_index_not_persisted() {
        let mut pin = InputPin::new("A", PinType::Int);
        pin.source = Some(PinSource { node: 2, parameter: 0 });
        pin.stack_index = Some(9);
        let json = serde_json::to_string(&pin).unwrap();
        let back: InputPin = serde_json::from_str(&json).unwrap();
        assert_eq!(back.source, pin.source);
        assert_eq!(back.stack_index, None);
    }
}
