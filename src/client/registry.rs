//! Event handler registry
//!
//! Maps event names to the handlers registered for them. Handlers run on the
//! connection worker, one at a time, in registration order. A handler that
//! panics is logged and skipped; the rest still run.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::error;

/// Identifies one registered handler, for removal with [`Socket::off`](super::Socket::off)
pub type HandlerId = u64;

/// Callback invoked for each matching event
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// An event delivered to handlers
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event name
    pub name: String,
    /// Arguments following the name
    pub args: Vec<Value>,
    /// Present when the server expects an acknowledgement
    pub ack_id: Option<u64>,
}

impl Event {
    /// Event raised locally by the client (connect, disconnect, ...)
    pub fn local(name: &str, args: Vec<Value>) -> Self {
        Self {
            name: name.to_string(),
            args,
            ack_id: None,
        }
    }

    /// First argument, which carries the payload for every event the
    /// backend emits
    pub fn payload(&self) -> Option<&Value> {
        self.args.first()
    }

    /// Deserialize the payload into a typed value
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(self.payload().unwrap_or(&Value::Null))
    }
}

/// Thread-safe registry of event handlers
#[derive(Default)]
pub struct HandlerRegistry {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<String, Vec<(HandlerId, Handler)>>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler and return its id
    pub fn register(&self, event: &str, handler: Handler) -> HandlerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove a handler; returns whether it was registered
    pub fn remove(&self, event: &str, id: HandlerId) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(list) = handlers.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(event);
        }
        removed
    }

    /// Number of handlers registered for an event
    pub fn count(&self, event: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Invoke every handler registered for the event and return how many ran
    ///
    /// The lock is released before handlers run so they may register or
    /// remove handlers themselves.
    pub fn dispatch(&self, event: &Event) -> usize {
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.name)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in &handlers {
            if let Err(cause) = panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                error!(
                    "Handler for '{}' panicked: {} (args: {:?})",
                    event.name,
                    panic_message(cause.as_ref()),
                    event.args
                );
            }
        }
        handlers.len()
    }
}

fn panic_message(cause: &(dyn Any + Send)) -> &str {
    if let Some(message) = cause.downcast_ref::<&str>() {
        message
    } else if let Some(message) = cause.downcast_ref::<String>() {
        message
    } else {
        "non-string panic"
    }
}
