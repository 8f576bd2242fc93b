// Shared fixtures for the runtime's unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use klax_types::{ParameterInfo, PinType, Value};

use crate::context::{ExecutionLimits, ScriptEnv};
use crate::function_graph::CustomFunctionGraph;
use crate::owner::{Entity, ScriptOwner};
use crate::registry::{FunctionInfo, FunctionRegistry};
use crate::variable::Variable;

/// Script-object state for driving graphs directly
///
/// The registry holds the built-ins plus two recorders: `test/record` (appends
/// its input to a log) and `test/count` (pure, returns how often it ran).
pub(crate) struct TestHost {
    pub variables: Vec<Variable>,
    pub functions: Vec<CustomFunctionGraph>,
    pub registry: FunctionRegistry,
    pub limits: ExecutionLimits,
    pub owner: Option<Entity>,
    recorded: Arc<Mutex<Vec<Value>>>,
    count: Arc<AtomicUsize>,
}

impl TestHost {
    pub fn new() -> Self {
        let mut registry = FunctionRegistry::with_builtins();
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));
        register_recorders(&mut registry, &recorded, &count);

        Self {
            variables: Vec::new(),
            functions: Vec::new(),
            registry,
            limits: ExecutionLimits::default(),
            owner: None,
            recorded,
            count,
        }
    }

    pub fn env(&mut self) -> ScriptEnv<'_> {
        ScriptEnv::new(
            &mut self.variables,
            &mut self.functions,
            &self.registry,
            self.owner.as_ref().map(|o| o as &dyn ScriptOwner),
            &self.limits,
        )
    }

    pub fn recorded(&self) -> Vec<Value> {
        self.recorded.lock().unwrap().clone()
    }

    pub fn clear_recorded(&self) {
        self.recorded.lock().unwrap().clear();
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// Adds the `test/record` and `test/count` recorders to `registry`
pub(crate) fn register_recorders(
    registry: &mut FunctionRegistry,
    recorded: &Arc<Mutex<Vec<Value>>>,
    count: &Arc<AtomicUsize>,
) {
    let log = Arc::clone(recorded);
    registry.register_fn(
        FunctionInfo {
            key: "test/record".to_string(),
            name: "Record".to_string(),
            category: "Test".to_string(),
            pure: false,
            description: None,
            inputs: vec![ParameterInfo::new("Value", PinType::Any)],
            outputs: Vec::new(),
        },
        move |inputs, _outputs| {
            log.lock().unwrap().push(inputs[0].clone());
            Ok(())
        },
    );

    let counter = Arc::clone(count);
    registry.register_fn(
        FunctionInfo {
            key: "test/count".to_string(),
            name: "Count".to_string(),
            category: "Test".to_string(),
            pure: true,
            description: None,
            inputs: Vec::new(),
            outputs: vec![ParameterInfo::new("Count", PinType::Int)],
        },
        move |_inputs, outputs| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            outputs.push(Value::from(n));
            Ok(())
        },
    );
}
