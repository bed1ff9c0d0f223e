//! A single tracked invocation of a named operation against a target.
//!
//! ```text
//! pending ──run()──► success | error      (fires `once` listeners)
//!    │
//!    └──cancel()───► cancelled            (drops `once` listeners)
//! ```
//!
//! Terminal states are final: a settle arriving after `cancel()` is
//! swallowed, and `cancel()` on a terminal action does nothing.

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use podshell_launcher::{Failure, FailureKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::lock;

/// Anything an action can target: workspace ids, pro instance ids.
pub trait TargetKey:
    Clone + Eq + Hash + fmt::Debug + fmt::Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> TargetKey for T where
    T: Clone
        + Eq
        + Hash
        + fmt::Debug
        + fmt::Display
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

// ---------------------------------------------------------------------------
// Identifiers and enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Accepts only UUIDs: action ids end up in file names.
    pub fn parse(raw: &str) -> Result<Self> {
        uuid::Uuid::parse_str(raw)
            .map(|id| Self(id.to_string()))
            .map_err(|_| CoreError::InvalidActionId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ActionId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionName {
    Start,
    Stop,
    Rebuild,
    Reset,
    Remove,
    CheckStatus,
}

impl ActionName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionName::Start => "start",
            ActionName::Stop => "stop",
            ActionName::Rebuild => "rebuild",
            ActionName::Reset => "reset",
            ActionName::Remove => "remove",
            ActionName::CheckStatus => "checkStatus",
        }
    }
}

impl fmt::Display for ActionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Success,
    Error,
    Cancelled,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ActionStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Success => "success",
            ActionStatus::Error => "error",
            ActionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ActionSnapshot
// ---------------------------------------------------------------------------

/// Immutable view of an action, safe to hand to observers and to persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound = "K: TargetKey")]
pub struct ActionSnapshot<K> {
    pub id: ActionId,
    pub name: ActionName,
    #[serde(rename = "targetID")]
    pub target_id: K,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Passed to the operation function when the action runs.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub id: ActionId,
}

pub type ActionResult = std::result::Result<(), Failure>;
pub type ActionFn = Box<dyn FnOnce(ActionContext) -> BoxFuture<'static, ActionResult> + Send>;

type Listener<K> = Box<dyn FnOnce(&ActionSnapshot<K>) + Send>;

struct ActionState<K> {
    status: ActionStatus,
    error: Option<Failure>,
    finished_at: Option<DateTime<Utc>>,
    action_fn: Option<ActionFn>,
    listeners: Vec<Listener<K>>,
}

struct ActionInner<K> {
    id: ActionId,
    name: ActionName,
    target_id: K,
    created_at: DateTime<Utc>,
    state: Mutex<ActionState<K>>,
}

/// Cheap-to-clone handle; all clones share one state machine.
pub struct Action<K> {
    inner: Arc<ActionInner<K>>,
}

impl<K> Clone for Action<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: fmt::Debug> fmt::Debug for Action<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("target_id", &self.inner.target_id)
            .finish_non_exhaustive()
    }
}

impl<K: TargetKey> Action<K> {
    pub fn new(name: ActionName, target_id: K, action_fn: ActionFn) -> Self {
        Self {
            inner: Arc::new(ActionInner {
                id: ActionId::new(),
                name,
                target_id,
                created_at: Utc::now(),
                state: Mutex::new(ActionState {
                    status: ActionStatus::Pending,
                    error: None,
                    finished_at: None,
                    action_fn: Some(action_fn),
                    listeners: Vec::new(),
                }),
            }),
        }
    }

    pub fn id(&self) -> &ActionId {
        &self.inner.id
    }

    pub fn name(&self) -> ActionName {
        self.inner.name
    }

    pub fn target_id(&self) -> &K {
        &self.inner.target_id
    }

    pub fn status(&self) -> ActionStatus {
        lock(&self.inner.state).status
    }

    /// Start the operation on the current Tokio runtime.
    ///
    /// Returns `None` when there is nothing to run: the action already ran,
    /// was cancelled, or no runtime is available (the action then settles as
    /// an error).
    pub fn run(&self) -> Option<JoinHandle<()>> {
        let action_fn = {
            let mut state = lock(&self.inner.state);
            if state.status.is_terminal() {
                return None;
            }
            state.action_fn.take()?
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.settle(Err(Failure::new("no async runtime to run the action on")
                .with_kind(FailureKind::Internal)));
            return None;
        };

        debug!(id = %self.inner.id, name = %self.inner.name, target_id = %self.inner.target_id, "running action");
        let operation = action_fn(ActionContext {
            id: self.inner.id.clone(),
        });
        let action = self.clone();
        Some(runtime.spawn(async move {
            let result = operation.await;
            action.settle(result);
        }))
    }

    /// Mark a pending action cancelled. Returns `false` if it was already
    /// terminal. Pending `once` listeners are dropped without being called.
    pub fn cancel(&self) -> bool {
        let mut state = lock(&self.inner.state);
        if state.status.is_terminal() {
            return false;
        }
        state.status = ActionStatus::Cancelled;
        state.finished_at = Some(Utc::now());
        state.listeners.clear();
        debug!(id = %self.inner.id, target_id = %self.inner.target_id, "action cancelled");
        true
    }

    /// Call `listener` once, when `run()` settles the action. Registering on
    /// an action that is already terminal has no effect.
    pub fn once(&self, listener: impl FnOnce(&ActionSnapshot<K>) + Send + 'static) {
        let mut state = lock(&self.inner.state);
        if state.status.is_terminal() {
            return;
        }
        state.listeners.push(Box::new(listener));
    }

    pub fn snapshot(&self) -> ActionSnapshot<K> {
        let state = lock(&self.inner.state);
        self.snapshot_of(&state)
    }

    fn snapshot_of(&self, state: &ActionState<K>) -> ActionSnapshot<K> {
        ActionSnapshot {
            id: self.inner.id.clone(),
            name: self.inner.name,
            target_id: self.inner.target_id.clone(),
            status: state.status,
            error: state.error.clone(),
            created_at: self.inner.created_at,
            finished_at: state.finished_at,
        }
    }

    fn settle(&self, result: ActionResult) {
        let (snapshot, listeners) = {
            let mut state = lock(&self.inner.state);
            if state.status.is_terminal() {
                debug!(id = %self.inner.id, status = %state.status, "ignoring settle of finished action");
                return;
            }
            match result {
                Ok(()) => state.status = ActionStatus::Success,
                Err(failure) => {
                    state.status = ActionStatus::Error;
                    state.error = Some(failure);
                }
            }
            state.finished_at = Some(Utc::now());
            let listeners = std::mem::take(&mut state.listeners);
            (self.snapshot_of(&state), listeners)
        };

        debug!(id = %snapshot.id, status = %snapshot.status, "action settled");
        for listener in listeners {
            listener(&snapshot);
        }
    }
}
