// Function Registry - Native callables available to call nodes
//
// Each entry pairs catalog metadata with a signature-erased invoker that reads
// its arguments from a value slice and appends its results. Call nodes look
// functions up by their stable key; whether the invoker is a hand-written
// closure or generated by `#[klax_function]` is invisible to the interpreter.

use std::collections::HashMap;
use std::sync::Arc;

use klax_types::{InvokeError, ParameterInfo, Value};
use serde::{Deserialize, Serialize};

use crate::error::{ScriptError, ScriptResult};

/// Catalog entry for a native function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionInfo {
    /// Stable key stored in call nodes (e.g. "math/add_int")
    pub key: String,
    pub name: String,
    pub category: String,
    /// Pure functions have no side effects and become implicit nodes
    pub pure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub inputs: Vec<ParameterInfo>,
    pub outputs: Vec<ParameterInfo>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Function Invoker Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Signature-erased native call
pub trait FunctionInvoker: Send + Sync {
    /// Read `inputs` in parameter order and append one value per output
    fn invoke(&self, inputs: &[Value], outputs: &mut Vec<Value>) -> Result<(), InvokeError>;
}

/// Closure-based invoker
pub struct FnInvoker<F>
where
    F: Fn(&[Value], &mut Vec<Value>) -> Result<(), InvokeError> + Send + Sync,
{
    func: F,
}

impl<F> FnInvoker<F>
where
    F: Fn(&[Value], &mut Vec<Value>) -> Result<(), InvokeError> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> FunctionInvoker for FnInvoker<F>
where
    F: Fn(&[Value], &mut Vec<Value>) -> Result<(), InvokeError> + Send + Sync,
{
    fn invoke(&self, inputs: &[Value], outputs: &mut Vec<Value>) -> Result<(), InvokeError> {
        (self.func)(inputs, outputs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Function Registry
// ─────────────────────────────────────────────────────────────────────────────

struct FunctionEntry {
    info: FunctionInfo,
    invoker: Arc<dyn FunctionInvoker>,
}

/// Registry of all native functions
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionEntry>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Create a registry holding the built-in library
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::library::register_builtins(&mut registry);
        registry
    }

    /// Register a function; a later registration under the same key wins
    pub fn register(&mut self, info: FunctionInfo, invoker: Arc<dyn FunctionInvoker>) {
        let key = info.key.clone();
        self.functions.insert(key, FunctionEntry { info, invoker });
    }

    /// Register a closure
    pub fn register_fn<F>(&mut self, info: FunctionInfo, func: F)
    where
        F: Fn(&[Value], &mut Vec<Value>) -> Result<(), InvokeError> + Send + Sync + 'static,
    {
        self.register(info, Arc::new(FnInvoker::new(func)));
    }

    pub fn get_info(&self, key: &str) -> Option<&FunctionInfo> {
        self.functions.get(key).map(|e| &e.info)
    }

    pub fn get_invoker(&self, key: &str) -> Option<Arc<dyn FunctionInvoker>> {
        self.functions.get(key).map(|e| Arc::clone(&e.invoker))
    }

    /// Look up and call a function, checking the argument count
    pub fn invoke(&self, key: &str, inputs: &[Value], outputs: &mut Vec<Value>) -> ScriptResult<()> {
        let entry = self
            .functions
            .get(key)
            .ok_or_else(|| ScriptError::UnknownFunction(key.to_string()))?;

        if inputs.len() != entry.info.inputs.len() {
            return Err(ScriptError::ParameterCountMismatch {
                expected: entry.info.inputs.len(),
                actual: inputs.len(),
            });
        }

        entry
            .invoker
            .invoke(inputs, outputs)
            .map_err(|source| ScriptError::NativeCall {
                key: key.to_string(),
                source,
            })
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(|s| s.as_str())
    }

    pub fn infos(&self) -> impl Iterator<Item = &FunctionInfo> {
        self.functions.values().map(|e| &e.info)
    }

    pub fn functions_in_category(&self, category: &str) -> Vec<&FunctionInfo> {
        let mut infos: Vec<_> = self.infos().filter(|i| i.category == category).collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    pub fn categories(&self) -> Vec<String> {
        let mut cats: Vec<_> = self.infos().map(|i| i.category.clone()).collect();
        cats.sort();
        cats.dedup();
        cats
    }

    pub fn contains(&self, key: &str) -> bool {
        self.functions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
