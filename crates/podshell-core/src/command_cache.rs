//! Single-flight registry of running operations.
//!
//! At most one operation runs per `(target, action)` key. A caller that finds
//! a running entry joins it instead of starting another process: it attaches
//! a handler, receives every event already produced (in order) and then the
//! live tail, and awaits the same shared settlement as the owner.
//!
//! The buffer append and the live fan-out of each event happen under the
//! entry's stream lock, and so do replay and registration of a new handler.
//! A late subscriber therefore never misses or duplicates an event.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use podshell_launcher::{Failure, FailureKind, Operation, StreamEvent};
use tracing::{debug, error, warn};

use crate::action::{ActionId, ActionName, TargetKey};
use crate::hub::{Handler, SingleEventHub, Subscription};
use crate::lock;

pub type OperationResult = std::result::Result<(), Failure>;
pub type SharedOperation = Shared<BoxFuture<'static, OperationResult>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey<K> {
    pub target: K,
    pub action: ActionName,
}

impl<K> CacheKey<K> {
    pub fn new(target: K, action: ActionName) -> Self {
        Self { target, action }
    }
}

// ─── StreamHandle ─────────────────────────────────────────────────────────

struct StreamState {
    buffer: Vec<StreamEvent>,
    live: SingleEventHub<StreamEvent>,
}

/// Buffered, replayable fan-out of one operation's events.
#[derive(Clone)]
pub struct StreamHandle {
    state: Arc<Mutex<StreamState>>,
}

impl StreamHandle {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StreamState {
                buffer: Vec::new(),
                live: SingleEventHub::new(),
            })),
        }
    }

    // Handlers run with the stream lock held and must not call back into
    // this handle.
    fn push(&self, event: StreamEvent) {
        let mut state = lock(&self.state);
        state.buffer.push(event);
        if let Some(event) = state.buffer.last() {
            state.live.publish(event);
        }
    }

    /// Attach `handler`: replay everything buffered so far, then deliver live
    /// events. Attaching a handler id that is already attached delivers
    /// nothing new. `None` yields a no-op subscription.
    pub fn stream(&self, handler: Option<Handler<StreamEvent>>) -> Subscription {
        let Some(handler) = handler else {
            return Subscription::noop();
        };

        let state = lock(&self.state);
        if state.live.is_subscribed(&handler) {
            let live = state.live.clone();
            return Subscription::new(move || live.unsubscribe(&handler));
        }

        for event in &state.buffer {
            if catch_unwind(AssertUnwindSafe(|| handler.notify(event))).is_err() {
                error!(handler = %handler.id(), "stream handler panicked during replay");
            }
        }
        state.live.subscribe(handler)
    }

    pub fn buffered(&self) -> Vec<StreamEvent> {
        lock(&self.state).buffer.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.state).live.handler_count()
    }
}

// ─── CacheEntry ───────────────────────────────────────────────────────────

/// A running operation: its shared settlement, its event stream and the
/// handle used to cancel it.
#[derive(Clone)]
pub struct CacheEntry {
    pub action_id: Option<ActionId>,
    pub operation: SharedOperation,
    pub stream: StreamHandle,
    handle: Arc<dyn Operation>,
}

impl CacheEntry {
    fn start(action_id: Option<ActionId>, handle: Arc<dyn Operation>) -> Self {
        let stream = StreamHandle::new();
        let sink = stream.clone();
        let op = Arc::clone(&handle);
        let task = tokio::spawn(async move {
            op.stream(Box::new(move |event| sink.push(event))).await
        });

        let operation = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(Failure::new(format!("operation task failed: {e}"))
                    .with_kind(FailureKind::Internal)),
            }
        }
        .boxed()
        .shared();

        Self {
            action_id,
            operation,
            stream,
            handle,
        }
    }

    /// Kill the underlying operation. Every joiner's settlement resolves to
    /// a cancelled failure.
    pub async fn cancel(&self) -> OperationResult {
        self.handle.cancel().await
    }
}

// ─── CommandCache ─────────────────────────────────────────────────────────

/// `connect` and `get_or_connect` spawn onto the current Tokio runtime.
pub struct CommandCache<K> {
    entries: Mutex<HashMap<CacheKey<K>, CacheEntry>>,
}

impl<K> Default for CommandCache<K> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: TargetKey> CommandCache<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey<K>) -> Option<CacheEntry> {
        lock(&self.entries).get(key).cloned()
    }

    /// Forget the entry for `key`. Called by the owner once it settled.
    pub fn clear(&self, key: &CacheKey<K>) {
        if lock(&self.entries).remove(key).is_some() {
            debug!(target_id = %key.target, action = %key.action, "command cache entry cleared");
        }
    }

    /// Start `operation` and register it under `key`.
    pub fn connect(
        &self,
        key: CacheKey<K>,
        action_id: Option<ActionId>,
        operation: Arc<dyn Operation>,
    ) -> CacheEntry {
        let entry = CacheEntry::start(action_id, operation);
        let mut entries = lock(&self.entries);
        if entries.contains_key(&key) {
            warn!(target_id = %key.target, action = %key.action, "replacing a running command cache entry");
        }
        entries.insert(key, entry.clone());
        entry
    }

    /// Join the running operation for `key`, or start the one `make` builds.
    /// The lookup and the insert happen in one critical section. The flag is
    /// `true` when an existing run was joined.
    pub fn get_or_connect(
        &self,
        key: CacheKey<K>,
        action_id: Option<ActionId>,
        make: impl FnOnce() -> Arc<dyn Operation>,
    ) -> (CacheEntry, bool) {
        let mut entries = lock(&self.entries);
        if let Some(existing) = entries.get(&key) {
            debug!(target_id = %key.target, action = %key.action, "joining running command");
            return (existing.clone(), true);
        }
        debug!(target_id = %key.target, action = %key.action, "starting command");
        let entry = CacheEntry::start(action_id, make());
        entries.insert(key, entry.clone());
        (entry, false)
    }

    /// The running entry whose owner is `action_id`, if any.
    pub fn find_by_action(&self, action_id: &ActionId) -> Option<CacheEntry> {
        lock(&self.entries)
            .values()
            .find(|entry| entry.action_id.as_ref() == Some(action_id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
