/*
[INPUT]:  Caller callbacks for price updates and connection changes
[OUTPUT]: Fan-out dispatch with per-handler panic isolation
[POS]:    WebSocket layer - consumer registry
[UPDATE]: When changing handler signatures or dispatch semantics
*/

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::error;

use super::message::PriceUpdate;

pub type MessageHandler = Arc<dyn Fn(PriceUpdate) + Send + Sync>;
pub type ConnectionHandler = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerKind {
    Message,
    Connection,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    message: BTreeMap<u64, MessageHandler>,
    connection: BTreeMap<u64, ConnectionHandler>,
}

impl Registry {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Two independent handler sets keyed by registration id; dispatch follows registration order.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.inner.lock();
        f.debug_struct("HandlerRegistry")
            .field("message_handlers", &registry.message.len())
            .field("connection_handlers", &registry.connection.len())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message_handler<F>(&self, handler: F) -> HandlerRegistration
    where
        F: Fn(PriceUpdate) + Send + Sync + 'static,
    {
        let mut registry = self.inner.lock();
        let id = registry.next_id();
        registry.message.insert(id, Arc::new(handler));
        self.registration(id, HandlerKind::Message)
    }

    pub fn add_connection_handler<F>(&self, handler: F) -> HandlerRegistration
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let mut registry = self.inner.lock();
        let id = registry.next_id();
        registry.connection.insert(id, Arc::new(handler));
        self.registration(id, HandlerKind::Connection)
    }

    fn registration(&self, id: u64, kind: HandlerKind) -> HandlerRegistration {
        HandlerRegistration {
            registry: Arc::downgrade(&self.inner),
            id,
            kind,
        }
    }

    pub fn message_handler_count(&self) -> usize {
        self.inner.lock().message.len()
    }

    pub fn connection_handler_count(&self) -> usize {
        self.inner.lock().connection.len()
    }

    /// Drop every registration of both kinds.
    pub fn clear(&self) {
        let mut registry = self.inner.lock();
        registry.message.clear();
        registry.connection.clear();
    }

    /// Deliver `update` to every message handler; returns how many returned normally.
    pub fn dispatch_update(&self, update: &PriceUpdate) -> usize {
        // Snapshot so handlers may (de)register without deadlocking.
        let handlers: Vec<(u64, MessageHandler)> = {
            let registry = self.inner.lock();
            registry
                .message
                .iter()
                .map(|(id, handler)| (*id, handler.clone()))
                .collect()
        };

        handlers
            .into_iter()
            .filter(|(id, handler)| {
                let update = update.clone();
                invoke_isolated(*id, "price update", || handler(update))
            })
            .count()
    }

    /// Deliver a connection change to every connection handler.
    pub fn dispatch_connection(&self, connected: bool) -> usize {
        let handlers: Vec<(u64, ConnectionHandler)> = {
            let registry = self.inner.lock();
            registry
                .connection
                .iter()
                .map(|(id, handler)| (*id, handler.clone()))
                .collect()
        };

        handlers
            .into_iter()
            .filter(|(id, handler)| invoke_isolated(*id, "connection", || handler(connected)))
            .count()
    }
}

fn invoke_isolated<F: FnOnce()>(handler_id: u64, kind: &'static str, call: F) -> bool {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(()) => true,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(handler_id, kind, %reason, "stream handler panicked");
            false
        }
    }
}

/// Returned by handler registration; `remove()` deregisters exactly that handler.
///
/// Dropping the registration leaves the handler installed.
#[derive(Debug)]
pub struct HandlerRegistration {
    registry: Weak<Mutex<Registry>>,
    id: u64,
    kind: HandlerKind,
}

impl HandlerRegistration {
    /// Returns `false` if the handler was already gone (e.g. after `disconnect()`).
    pub fn remove(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = registry.lock();
        match self.kind {
            HandlerKind::Message => registry.message.remove(&self.id).is_some(),
            HandlerKind::Connection => registry.connection.remove(&self.id).is_some(),
        }
    }
}
