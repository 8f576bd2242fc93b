// Script Errors
//
// Structural problems (malformed graphs, bad call signatures, missing events)
// surface as `ScriptError`. Author-visible type mismatches never do: cast
// nodes route those through their Failed/Success pins instead.

use klax_types::{InvokeError, PinType};
use uuid::Uuid;

/// Result type alias
pub type ScriptResult<T> = std::result::Result<T, ScriptError>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Expected {expected} node at index {index}, found {found}")]
    UnexpectedNode {
        index: usize,
        expected: &'static str,
        found: String,
    },

    #[error("Parameter count mismatch: expected {expected}, got {actual}")]
    ParameterCountMismatch { expected: usize, actual: usize },

    #[error("Event '{0}' not found")]
    EventNotFound(String),

    #[error("Event takes at most {max} arguments, got {actual}")]
    EventArgumentCount { max: usize, actual: usize },

    #[error("Component {0} not found")]
    ComponentNotFound(Uuid),

    #[error("Member '{0}' not found")]
    MemberNotFound(String),

    #[error("Script has no owner")]
    NoOwner,

    #[error("Unknown native function '{0}'")]
    UnknownFunction(String),

    #[error("Function graph '{0}' not found")]
    FunctionNotFound(String),

    #[error("Recursive call into function graph {0}")]
    RecursiveCall(Uuid),

    #[error("Call depth limit of {0} exceeded")]
    CallDepthExceeded(usize),

    #[error("Step limit of {0} exceeded")]
    StepLimitExceeded(usize),

    #[error("Implicit evaluation depth limit of {0} exceeded")]
    ImplicitDepthExceeded(usize),

    #[error("Native function '{key}' failed: {source}")]
    NativeCall {
        key: String,
        #[source]
        source: InvokeError,
    },

    #[error("Node {node} produced {actual} outputs, expected {expected}")]
    OutputCountMismatch {
        node: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    #[error("Cannot connect {from} output to {to} input")]
    IncompatiblePinTypes { from: PinType, to: PinType },

    #[error("Variable '{0}' not found")]
    VariableNotFound(String),

    #[error("Node {0} not found")]
    NodeNotFound(usize),

    #[error("Node {0} cannot be deleted")]
    NodeNotDeletable(usize),

    #[error("Pin {pin} not found on node {node}")]
    PinNotFound { node: usize, pin: usize },

    #[error("Graph must be compiled before execution")]
    NotCompiled,

    #[error("Graph not found: {0}")]
    GraphNotFound(String),

    #[error("Script object has not been initialized")]
    NotInitialized,

    #[error("Script object is already executing")]
    ScriptBusy,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
