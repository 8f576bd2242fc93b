// Script Events - Engine-side events that event graphs subscribe to
//
// An event lives on its owner (entity or component) and hands its positional
// arguments to every subscribed handler synchronously.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use klax_types::{ParameterInfo, Value};
use tracing::trace;

use crate::error::{ScriptError, ScriptResult};

/// Largest number of positional arguments an event can carry
pub const MAX_EVENT_ARGS: usize = 10;

/// Handle returned by `ScriptEvent::subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Callback invoked with the event's arguments
pub type EventHandler = Rc<dyn Fn(&[Value]) -> ScriptResult<()>>;

/// Wrap a closure as an [`EventHandler`]
pub fn event_handler<F>(handler: F) -> EventHandler
where
    F: Fn(&[Value]) -> ScriptResult<()> + 'static,
{
    Rc::new(handler)
}

pub struct ScriptEvent {
    name: String,
    parameters: Vec<ParameterInfo>,
    handlers: RefCell<Vec<(SubscriptionId, EventHandler)>>,
    next_id: Cell<u64>,
}

impl ScriptEvent {
    /// Create an event declaring its positional parameters
    pub fn new(name: impl Into<String>, parameters: Vec<ParameterInfo>) -> ScriptResult<Self> {
        if parameters.len() > MAX_EVENT_ARGS {
            return Err(ScriptError::EventArgumentCount {
                max: MAX_EVENT_ARGS,
                actual: parameters.len(),
            });
        }
        Ok(Self {
            name: name.into(),
            parameters,
            handlers: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[ParameterInfo] {
        &self.parameters
    }

    pub fn subscribe(&self, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.handlers.borrow_mut().push((id, handler));
        id
    }

    /// Returns false if the subscription was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let before = handlers.len();
        handlers.retain(|(sub, _)| *sub != id);
        handlers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.borrow().len()
    }

    /// Invoke every handler in subscription order
    ///
    /// Handlers subscribed or removed while the event is firing take effect
    /// on the next invocation. Every handler runs; the first error is returned.
    pub fn invoke(&self, args: &[Value]) -> ScriptResult<()> {
        if args.len() != self.parameters.len() {
            return Err(ScriptError::ParameterCountMismatch {
                expected: self.parameters.len(),
                actual: args.len(),
            });
        }

        let handlers: Vec<EventHandler> = self
            .handlers
            .borrow()
            .iter()
            .map(|(_, handler)| Rc::clone(handler))
            .collect();
        trace!(event = %self.name, handlers = handlers.len(), "Invoking event");

        let mut first_error = None;
        for handler in handlers {
            if let Err(err) = handler(args) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for ScriptEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptEvent")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
