// Script Object - Everything one owner's script consists of
//
// A script object owns its variables and all of its graphs. `init` binds it
// to an owner: every event graph subscribes to its event, then every graph is
// compiled. Event handlers hold only a weak link back to the shared object
// and borrow it for the length of one delivery.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use klax_types::{ParameterInfo, Value};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clipboard;
use crate::context::{ExecutionLimits, ScriptEnv};
use crate::error::{ScriptError, ScriptResult};
use crate::event::{EventHandler, event_handler};
use crate::event_graph::EventGraph;
use crate::function_graph::{CustomFunctionGraph, FunctionNodesRebuilt, InterfaceFunctionGraph};
use crate::graph::Graph;
use crate::owner::ScriptOwner;
use crate::registry::FunctionRegistry;
use crate::variable::{RefForm, Variable};

/// Script object shared with the event handlers that drive it
pub type SharedScriptObject = Rc<RefCell<ScriptObject>>;

/// Services a script object executes against
#[derive(Clone)]
pub struct ScriptRuntime {
    pub registry: Arc<FunctionRegistry>,
    pub limits: ExecutionLimits,
}

impl ScriptRuntime {
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self {
            registry,
            limits: ExecutionLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }
}

impl Default for ScriptRuntime {
    fn default() -> Self {
        Self::new(Arc::new(FunctionRegistry::with_builtins()))
    }
}

/// Addresses one graph of a script object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphRef {
    Event(usize),
    Interface(usize),
    Function(Uuid),
}

// ─────────────────────────────────────────────────────────────────────────────
// Interfaces
// ─────────────────────────────────────────────────────────────────────────────

/// Signature of one function an interface declares
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceFunction {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<ParameterInfo>,
    #[serde(default)]
    pub outputs: Vec<ParameterInfo>,
}

/// Named set of functions a script object can promise to implement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDefinition {
    pub name: String,
    #[serde(default)]
    pub functions: Vec<InterfaceFunction>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Script Object
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default, Serialize, Deserialize)]
pub struct ScriptObject {
    pub name: String,
    #[serde(default)]
    variables: Vec<Variable>,
    #[serde(default)]
    event_graphs: Vec<EventGraph>,
    #[serde(default)]
    interface_graphs: Vec<InterfaceFunctionGraph>,
    #[serde(default)]
    function_graphs: Vec<CustomFunctionGraph>,
    #[serde(default)]
    included_interfaces: Vec<String>,
    #[serde(skip)]
    owner: Option<Rc<dyn ScriptOwner>>,
    #[serde(skip)]
    runtime: Option<ScriptRuntime>,
}

impl fmt::Debug for ScriptObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptObject")
            .field("name", &self.name)
            .field("variables", &self.variables)
            .field("event_graphs", &self.event_graphs.len())
            .field("interface_graphs", &self.interface_graphs.len())
            .field("function_graphs", &self.function_graphs.len())
            .field("included_interfaces", &self.included_interfaces)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl ScriptObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn into_shared(self) -> SharedScriptObject {
        Rc::new(RefCell::new(self))
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn event_graphs(&self) -> &[EventGraph] {
        &self.event_graphs
    }

    pub fn interface_graphs(&self) -> &[InterfaceFunctionGraph] {
        &self.interface_graphs
    }

    pub fn function_graphs(&self) -> &[CustomFunctionGraph] {
        &self.function_graphs
    }

    pub fn included_interfaces(&self) -> &[String] {
        &self.included_interfaces
    }

    pub fn is_initialized(&self) -> bool {
        self.owner.is_some() && self.runtime.is_some()
    }

    fn all_graphs(&self) -> impl Iterator<Item = &Graph> {
        self.event_graphs
            .iter()
            .map(|g| &g.graph)
            .chain(self.interface_graphs.iter().map(|g| &g.function.graph))
            .chain(self.function_graphs.iter().map(|g| &g.function.graph))
    }

    fn all_graphs_mut(&mut self) -> impl Iterator<Item = &mut Graph> {
        self.event_graphs
            .iter_mut()
            .map(|g| &mut g.graph)
            .chain(self.interface_graphs.iter_mut().map(|g| &mut g.function.graph))
            .chain(self.function_graphs.iter_mut().map(|g| &mut g.function.graph))
    }

    /// Total node count across every graph
    pub fn node_count(&self) -> usize {
        self.all_graphs().map(Graph::len).sum()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Bind the script to its owner: subscribe every event graph, then
    /// compile every graph
    pub fn init(
        script: &SharedScriptObject,
        owner: Rc<dyn ScriptOwner>,
        runtime: ScriptRuntime,
    ) -> ScriptResult<()> {
        let mut this = script.try_borrow_mut().map_err(|_| ScriptError::ScriptBusy)?;
        this.shutdown();

        let bound = this.event_graphs.iter_mut().try_for_each(|graph| {
            let handler = dispatcher(Rc::downgrade(script), graph.guid);
            graph.subscribe(owner.as_ref(), handler)
        });
        if let Err(err) = bound.and_then(|()| this.compile_all()) {
            this.shutdown();
            return Err(err);
        }

        this.owner = Some(owner);
        this.runtime = Some(runtime);
        info!(
            script = %this.name,
            events = this.event_graphs.len(),
            functions = this.function_graphs.len(),
            "Initialized script object"
        );
        Ok(())
    }

    /// Unsubscribe every event graph and let go of the owner
    pub fn shutdown(&mut self) {
        let mut released = 0;
        for graph in &mut self.event_graphs {
            if graph.unsubscribe() {
                released += 1;
            }
        }
        if self.owner.take().is_some() || released > 0 {
            debug!(script = %self.name, subscriptions = released, "Shut down script object");
        }
    }

    pub fn compile_all(&mut self) -> ScriptResult<()> {
        for graph in self.all_graphs_mut() {
            graph.compile()?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Execution
    // ─────────────────────────────────────────────────────────────────────────

    pub fn execute_event_graph(&mut self, index: usize, args: &[Value]) -> ScriptResult<()> {
        let ScriptObject {
            variables,
            event_graphs,
            function_graphs,
            owner,
            runtime,
            ..
        } = self;
        let runtime = runtime.as_ref().ok_or(ScriptError::NotInitialized)?;
        let graph = event_graphs
            .get_mut(index)
            .ok_or_else(|| ScriptError::GraphNotFound(format!("event graph {index}")))?;

        let mut env = ScriptEnv::new(
            variables,
            function_graphs,
            &runtime.registry,
            owner.as_deref(),
            &runtime.limits,
        );
        graph.execute(&mut env, args)
    }

    fn execute_event_graph_by_guid(&mut self, guid: Uuid, args: &[Value]) -> ScriptResult<()> {
        let index = self
            .event_graphs
            .iter()
            .position(|g| g.guid == guid)
            .ok_or_else(|| ScriptError::GraphNotFound(guid.to_string()))?;
        self.execute_event_graph(index, args)
    }

    /// Call a custom function graph and collect its outputs
    pub fn call_function(&mut self, guid: Uuid, inputs: &[Value]) -> ScriptResult<Vec<Value>> {
        let ScriptObject {
            variables,
            function_graphs,
            owner,
            runtime,
            ..
        } = self;
        let runtime = runtime.as_ref().ok_or(ScriptError::NotInitialized)?;

        let mut env = ScriptEnv::new(
            variables,
            function_graphs,
            &runtime.registry,
            owner.as_deref(),
            &runtime.limits,
        );
        let mut outputs = Vec::new();
        env.call_function(guid, inputs, &mut outputs)?;
        Ok(outputs)
    }

    pub fn call_function_by_name(&mut self, name: &str, inputs: &[Value]) -> ScriptResult<Vec<Value>> {
        let guid = self
            .function_graphs
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.guid)
            .ok_or_else(|| ScriptError::FunctionNotFound(name.to_string()))?;
        self.call_function(guid, inputs)
    }

    pub fn call_interface_function(
        &mut self,
        interface: &str,
        name: &str,
        inputs: &[Value],
    ) -> ScriptResult<Vec<Value>> {
        let ScriptObject {
            variables,
            interface_graphs,
            function_graphs,
            owner,
            runtime,
            ..
        } = self;
        let runtime = runtime.as_ref().ok_or(ScriptError::NotInitialized)?;
        let graph = interface_graphs
            .iter_mut()
            .find(|g| g.interface == interface && g.name == name)
            .ok_or_else(|| ScriptError::FunctionNotFound(format!("{interface}::{name}")))?;

        let mut env = ScriptEnv::new(
            variables,
            function_graphs,
            &runtime.registry,
            owner.as_deref(),
            &runtime.limits,
        );
        let mut outputs = Vec::new();
        graph.function.execute(&mut env, inputs, &mut outputs)?;
        Ok(outputs)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Editing
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_variable(&mut self, variable: Variable) -> Uuid {
        let guid = variable.guid;
        self.variables.push(variable);
        guid
    }

    /// Remove an object variable along with every node that uses it
    pub fn remove_variable(&mut self, guid: Uuid) -> Option<Variable> {
        let position = self.variables.iter().position(|v| v.guid == guid)?;
        let removed = self.variables.remove(position);
        self.rewrite_references(RefForm::Live);
        Some(removed)
    }

    pub fn add_function_graph(&mut self, function: CustomFunctionGraph) -> Uuid {
        let guid = function.guid;
        self.function_graphs.push(function);
        guid
    }

    /// Remove a function graph along with every call to it
    pub fn remove_function_graph(&mut self, guid: Uuid) -> Option<CustomFunctionGraph> {
        let position = self.function_graphs.iter().position(|f| f.guid == guid)?;
        let removed = self.function_graphs.remove(position);
        self.rewrite_references(RefForm::Live);
        Some(removed)
    }

    /// Add an event graph; it receives events after the next `init`
    pub fn add_event_graph(&mut self, graph: EventGraph) -> usize {
        self.event_graphs.push(graph);
        self.event_graphs.len() - 1
    }

    /// Promise to implement an interface, adding a graph for every function
    /// it declares that has none yet. Returns how many graphs were added.
    pub fn include_interface(&mut self, interface: &InterfaceDefinition) -> usize {
        if !self.included_interfaces.contains(&interface.name) {
            self.included_interfaces.push(interface.name.clone());
        }
        let mut added = 0;
        for function in &interface.functions {
            let exists = self
                .interface_graphs
                .iter()
                .any(|g| g.interface == interface.name && g.name == function.name);
            if !exists {
                self.interface_graphs.push(InterfaceFunctionGraph::new(
                    interface.name.clone(),
                    function.name.clone(),
                    function.inputs.clone(),
                    function.outputs.clone(),
                ));
                added += 1;
            }
        }
        added
    }

    pub fn graph(&self, at: GraphRef) -> Option<&Graph> {
        match at {
            GraphRef::Event(i) => self.event_graphs.get(i).map(|g| &g.graph),
            GraphRef::Interface(i) => self.interface_graphs.get(i).map(|g| &g.function.graph),
            GraphRef::Function(guid) => self
                .function_graphs
                .iter()
                .find(|f| f.guid == guid)
                .map(|f| &f.function.graph),
        }
    }

    pub fn graph_mut(&mut self, at: GraphRef) -> Option<&mut Graph> {
        match at {
            GraphRef::Event(i) => self.event_graphs.get_mut(i).map(|g| &mut g.graph),
            GraphRef::Interface(i) => self
                .interface_graphs
                .get_mut(i)
                .map(|g| &mut g.function.graph),
            GraphRef::Function(guid) => self
                .function_graphs
                .iter_mut()
                .find(|f| f.guid == guid)
                .map(|f| &mut f.function.graph),
        }
    }

    pub fn function_graph_mut(&mut self, guid: Uuid) -> Option<&mut CustomFunctionGraph> {
        self.function_graphs.iter_mut().find(|f| f.guid == guid)
    }

    /// Rebuild a function's Entry/Return nodes from its parameters and
    /// resynchronize every call site in the script
    pub fn rebuild_function_nodes(&mut self, guid: Uuid) -> ScriptResult<FunctionNodesRebuilt> {
        let rebuilt = self
            .function_graph_mut(guid)
            .ok_or_else(|| ScriptError::FunctionNotFound(guid.to_string()))?
            .rebuild()?;
        let call_sites: usize = self
            .all_graphs_mut()
            .map(|graph| graph.apply_function_rebuilt(&rebuilt))
            .sum();
        debug!(function = %guid, call_sites, "Resynchronized call sites");
        Ok(rebuilt)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Clipboard
    // ─────────────────────────────────────────────────────────────────────────

    pub fn copy_nodes(&self, at: GraphRef, selection: &[usize]) -> ScriptResult<String> {
        let graph = self
            .graph(at)
            .ok_or_else(|| ScriptError::GraphNotFound(format!("{at:?}")))?;
        clipboard::copy_nodes(graph, selection, &self.variables)
    }

    pub fn paste_nodes(&mut self, at: GraphRef, text: &str, offset: [f32; 2]) -> ScriptResult<Vec<usize>> {
        let functions: Vec<Uuid> = self.function_graphs.iter().map(|f| f.guid).collect();
        let variables = self.variables.clone();
        let graph = self
            .graph_mut(at)
            .ok_or_else(|| ScriptError::GraphNotFound(format!("{at:?}")))?;
        clipboard::paste_nodes(graph, &variables, &functions, text, offset)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────────

    fn rewrite_references(&mut self, form: RefForm) -> usize {
        let functions: Vec<Uuid> = self.function_graphs.iter().map(|f| f.guid).collect();
        let ScriptObject {
            variables,
            event_graphs,
            interface_graphs,
            function_graphs,
            ..
        } = self;

        let graphs = event_graphs
            .iter_mut()
            .map(|g| &mut g.graph)
            .chain(interface_graphs.iter_mut().map(|g| &mut g.function.graph))
            .chain(function_graphs.iter_mut().map(|g| &mut g.function.graph));
        graphs
            .map(|graph| graph.rewrite_references(variables, &functions, form))
            .sum()
    }

    /// Swap live variable references for list indices before saving
    ///
    /// Returns how many nodes were dropped for stale references.
    pub fn on_serializing(&mut self) -> usize {
        self.rewrite_references(RefForm::Indexed)
    }

    /// Restore live references after saving
    pub fn on_serialized(&mut self) {
        self.rewrite_references(RefForm::Live);
    }

    /// Resolve indexed references after loading
    ///
    /// Returns how many nodes were dropped for stale references.
    pub fn on_deserialized(&mut self) -> usize {
        self.rewrite_references(RefForm::Live)
    }

    pub fn to_json(&mut self) -> ScriptResult<String> {
        self.on_serializing();
        let json = serde_json::to_string_pretty(&*self);
        self.on_serialized();
        Ok(json?)
    }

    pub fn from_json(text: &str) -> ScriptResult<Self> {
        let mut script: ScriptObject = serde_json::from_str(text)?;
        let dropped = script.on_deserialized();
        debug!(script = %script.name, dropped, "Loaded script object");
        Ok(script)
    }
}

/// Event handler that runs one event graph of a shared script object
fn dispatcher(script: Weak<RefCell<ScriptObject>>, graph: Uuid) -> EventHandler {
    event_handler(move |args| {
        let Some(shared) = script.upgrade() else {
            return Ok(());
        };
        let mut object = shared.try_borrow_mut().map_err(|_| ScriptError::ScriptBusy)?;
        object.execute_event_graph_by_guid(graph, args)
    })
}
