//! Typed publish/subscribe keyed by event name.
//!
//! Handlers carry an explicit [`HandlerId`]; two handlers are the same
//! subscriber when their ids match, whatever closure they wrap. That lets a
//! view that re-creates its callback on every render still be found,
//! deduplicated and removed.
//!
//! `publish` is synchronous. It snapshots the handler list, releases the
//! registry lock and then calls every handler in registration order, so a
//! handler may subscribe or unsubscribe freely; anything registered during a
//! publish only sees later publishes. A panicking handler is logged and the
//! fan-out continues with the next one.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use tracing::error;

use crate::lock;

// ─── Handler ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerId(String);

impl HandlerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HandlerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A listener plus the identity it is compared by.
pub struct Handler<T> {
    id: HandlerId,
    notify: Arc<dyn Fn(&T) + Send + Sync>,
}

impl<T> Handler<T> {
    /// Wrap `notify` with a fresh random id.
    pub fn new(notify: impl Fn(&T) + Send + Sync + 'static) -> Self {
        Self::with_id(HandlerId::random(), notify)
    }

    pub fn with_id(id: impl Into<HandlerId>, notify: impl Fn(&T) + Send + Sync + 'static) -> Self {
        Self {
            id: id.into(),
            notify: Arc::new(notify),
        }
    }

    pub fn id(&self) -> &HandlerId {
        &self.id
    }

    pub fn notify(&self, event: &T) {
        (self.notify)(event)
    }
}

impl<T> Clone for Handler<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            notify: Arc::clone(&self.notify),
        }
    }
}

impl<T> PartialEq for Handler<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").field("id", &self.id).finish()
    }
}

impl From<String> for HandlerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ─── Subscription ─────────────────────────────────────────────────────────

/// Returned by `subscribe`. Dropping it does *not* unsubscribe; call
/// [`Subscription::unsubscribe`], which is idempotent.
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// A subscription with nothing behind it.
    pub fn noop() -> Self {
        Self {
            cancel: Mutex::new(None),
        }
    }

    pub fn unsubscribe(&self) {
        let cancel = lock(&self.cancel).take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

// ─── EventHub ─────────────────────────────────────────────────────────────

type Registry<K, T> = HashMap<K, Vec<Handler<T>>>;

pub struct EventHub<K, T> {
    handlers: Arc<Mutex<Registry<K, T>>>,
}

impl<K, T> Clone for EventHub<K, T> {
    fn clone(&self) -> Self {
        Self {
            handlers: Arc::clone(&self.handlers),
        }
    }
}

impl<K, T> Default for EventHub<K, T> {
    fn default() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, T> EventHub<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `name`. A handler whose id is already
    /// registered for `name` is not added twice.
    pub fn subscribe(&self, name: K, handler: Handler<T>) -> Subscription {
        let id = handler.id.clone();
        {
            let mut handlers = lock(&self.handlers);
            let entry = handlers.entry(name.clone()).or_default();
            if !entry.iter().any(|h| h.id == id) {
                entry.push(handler);
            }
        }

        let registry: Weak<Mutex<Registry<K, T>>> = Arc::downgrade(&self.handlers);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                remove_handler(&registry, &name, &id);
            }
        })
    }

    pub fn is_subscribed(&self, name: &K, handler: &Handler<T>) -> bool {
        lock(&self.handlers)
            .get(name)
            .is_some_and(|handlers| handlers.iter().any(|h| h == handler))
    }

    pub fn unsubscribe(&self, name: &K, handler: &Handler<T>) {
        remove_handler(&self.handlers, name, &handler.id);
    }

    /// Deliver `event` to every handler registered for `name`. Returns
    /// `false` when nobody was listening.
    pub fn publish(&self, name: &K, event: &T) -> bool {
        let snapshot = match lock(&self.handlers).get(name) {
            Some(handlers) if !handlers.is_empty() => handlers.clone(),
            _ => return false,
        };

        for handler in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler.notify(event))).is_err() {
                error!(handler = %handler.id, "event handler panicked");
            }
        }
        true
    }

    pub fn clear(&self, name: &K) {
        lock(&self.handlers).remove(name);
    }

    pub fn handler_count(&self, name: &K) -> usize {
        lock(&self.handlers).get(name).map_or(0, Vec::len)
    }
}

fn remove_handler<K: Eq + Hash, T>(registry: &Mutex<Registry<K, T>>, name: &K, id: &HandlerId) {
    let mut handlers = lock(registry);
    if let Some(entry) = handlers.get_mut(name) {
        entry.retain(|h| &h.id != id);
        if entry.is_empty() {
            handlers.remove(name);
        }
    }
}

// ─── SingleEventHub ───────────────────────────────────────────────────────

/// An [`EventHub`] with a single implicit channel.
pub struct SingleEventHub<T> {
    hub: EventHub<(), T>,
}

impl<T> Clone for SingleEventHub<T> {
    fn clone(&self) -> Self {
        Self {
            hub: self.hub.clone(),
        }
    }
}

impl<T> Default for SingleEventHub<T> {
    fn default() -> Self {
        Self {
            hub: EventHub::default(),
        }
    }
}

impl<T: 'static> SingleEventHub<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: Handler<T>) -> Subscription {
        self.hub.subscribe((), handler)
    }

    pub fn is_subscribed(&self, handler: &Handler<T>) -> bool {
        self.hub.is_subscribed(&(), handler)
    }

    pub fn unsubscribe(&self, handler: &Handler<T>) {
        self.hub.unsubscribe(&(), handler)
    }

    pub fn publish(&self, event: &T) -> bool {
        self.hub.publish(&(), event)
    }

    pub fn clear(&self) {
        self.hub.clear(&())
    }

    pub fn handler_count(&self) -> usize {
        self.hub.handler_count(&())
    }
}
