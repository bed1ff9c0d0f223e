pub mod action;
pub mod action_log;
pub mod client;
pub mod command_cache;
pub mod config;
pub mod error;
pub mod hub;
pub mod ledger;
pub mod paths;
pub mod storage;
pub mod store;
pub mod workspace;

pub use action::{
    Action, ActionContext, ActionFn, ActionId, ActionName, ActionSnapshot, ActionStatus, TargetKey,
};
pub use action_log::ActionLogs;
pub use client::{ClientContext, StreamListener, WorkspaceAction, WorkspacesClient};
pub use command_cache::{CacheEntry, CacheKey, CommandCache, StreamHandle};
pub use config::Config;
pub use error::{CoreError, Result};
pub use hub::{EventHub, Handler, HandlerId, SingleEventHub, Subscription};
pub use ledger::{ActionLedger, LedgerView, HISTORY_LIMIT};
pub use storage::{FileStore, KeyValueStore, MemoryStore, ObservableStore};
pub use store::{EntityStore, ProWorkspaceStore, StartAction, WorkspaceStore};
pub use workspace::{Entity, InstanceId, ProInstance, Workspace, WorkspaceId, WorkspaceStatus};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
/// No state guarded in this crate is left half-updated across a panic point.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
