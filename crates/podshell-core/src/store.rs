//! Observable collection of workspace-like entities plus their action ledger.
//!
//! Observers get a bare "something changed" notification, either through
//! [`EntityStore::subscribe`] or the async [`EntityStore::changes`] stream,
//! and then read whatever they need. Reads return the last published copy of
//! the action view, so what an observer reads always matches what it was
//! told about.
//!
//! When an action settles the store notifies twice: once while the settled
//! action is still the target's current action (so observers can see its
//! final status), and once more on a later scheduler turn after it has been
//! archived (so they see it leave).

use std::sync::{Arc, Mutex};

use futures::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use crate::action::{Action, ActionFn, ActionId, ActionName, ActionSnapshot};
use crate::hub::{Handler, SingleEventHub, Subscription};
use crate::ledger::{ActionLedger, LedgerView};
use crate::lock;
use crate::storage::ObservableStore;
use crate::workspace::{Entity, ProInstance, Workspace};

pub type WorkspaceStore = EntityStore<Workspace>;
pub type ProWorkspaceStore = EntityStore<ProInstance>;

/// Arguments of [`EntityStore::start_action`].
pub struct StartAction<K> {
    pub action_name: ActionName,
    pub target_id: K,
    pub action_fn: ActionFn,
}

impl<K> StartAction<K> {
    pub fn new(action_name: ActionName, target_id: K, action_fn: ActionFn) -> Self {
        Self {
            action_name,
            target_id,
            action_fn,
        }
    }
}

struct StoreState<E: Entity> {
    entities: Vec<E>,
    ledger: ActionLedger<E::Id>,
    last_actions: LedgerView<E::Id>,
}

struct StoreInner<E: Entity> {
    state: Mutex<StoreState<E>>,
    listeners: SingleEventHub<()>,
    changes: broadcast::Sender<()>,
}

/// Shared handle; clones observe and mutate the same store.
pub struct EntityStore<E: Entity> {
    inner: Arc<StoreInner<E>>,
}

impl<E: Entity> Clone for EntityStore<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Entity> EntityStore<E> {
    /// A store whose action history lives in `storage`. Pro stores pass
    /// their host as `namespace` so each host keeps its own history.
    pub fn new(storage: ObservableStore, namespace: Option<&str>) -> Self {
        let ledger = ActionLedger::new(storage, namespace);
        let last_actions = ledger.get_all();
        let (changes, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState {
                    entities: Vec::new(),
                    ledger,
                    last_actions,
                }),
                listeners: SingleEventHub::new(),
                changes,
            }),
        }
    }

    // ---------------------------------------------------------------------
    // Observation
    // ---------------------------------------------------------------------

    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.inner
            .listeners
            .subscribe(Handler::new(move |_: &()| listener()))
    }

    /// One item per change notification. A slow consumer that falls behind
    /// sees a single item for the changes it missed.
    pub fn changes(&self) -> impl Stream<Item = ()> + Send + Unpin + 'static {
        BroadcastStream::new(self.inner.changes.subscribe()).map(|_| ())
    }

    fn notify(&self) {
        self.inner.listeners.publish(&());
        // No receivers is fine.
        let _ = self.inner.changes.send(());
    }

    // ---------------------------------------------------------------------
    // Entities
    // ---------------------------------------------------------------------

    pub fn get(&self, id: &E::Id) -> Option<E> {
        lock(&self.inner.state)
            .entities
            .iter()
            .find(|e| e.id() == id)
            .cloned()
    }

    pub fn get_all(&self) -> Vec<E> {
        lock(&self.inner.state).entities.clone()
    }

    /// Replace the entity stored under `id`, or append it.
    pub fn set_workspace(&self, id: &E::Id, entity: E) {
        {
            let mut state = lock(&self.inner.state);
            match state.entities.iter_mut().find(|e| e.id() == id) {
                Some(slot) => *slot = entity,
                None => state.entities.push(entity),
            }
        }
        self.workspaces_did_change();
    }

    /// Replace the whole list with a fresh snapshot. Entries without a
    /// status keep the status last recorded for their id. Nothing is
    /// published when the result equals the current list.
    pub fn set_workspaces(&self, incoming: Vec<E>) {
        let changed = {
            let mut state = lock(&self.inner.state);
            let merged: Vec<E> = incoming
                .into_iter()
                .map(|mut entity| {
                    if entity.status().is_none() {
                        let known = state
                            .entities
                            .iter()
                            .find(|e| e.id() == entity.id())
                            .and_then(|e| e.status().cloned());
                        entity.set_status(known);
                    }
                    entity
                })
                .collect();

            if merged == state.entities {
                false
            } else {
                state.entities = merged;
                true
            }
        };

        if changed {
            self.workspaces_did_change();
        }
    }

    pub fn remove_workspace(&self, id: &E::Id) {
        let removed = {
            let mut state = lock(&self.inner.state);
            let before = state.entities.len();
            state.entities.retain(|e| e.id() != id);
            state.entities.len() != before
        };
        if removed {
            self.workspaces_did_change();
        }
    }

    /// Record a locally known status. Unknown ids and unchanged values are
    /// ignored.
    pub fn set_status(&self, id: &E::Id, status: Option<E::Status>) {
        let changed = {
            let mut state = lock(&self.inner.state);
            match state.entities.iter_mut().find(|e| e.id() == id) {
                Some(entity) if entity.status() != status.as_ref() => {
                    entity.set_status(status);
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.workspaces_did_change();
        }
    }

    fn workspaces_did_change(&self) {
        let count = lock(&self.inner.state).entities.len();
        debug!(count, "workspaces changed");
        self.notify();
    }

    // ---------------------------------------------------------------------
    // Actions
    // ---------------------------------------------------------------------

    /// Supersede whatever runs against the target, then run the new action.
    /// Must be called from within a Tokio runtime for the action to run.
    pub fn start_action(&self, args: StartAction<E::Id>) -> ActionId {
        let StartAction {
            action_name,
            target_id,
            action_fn,
        } = args;

        let action = {
            let mut state = lock(&self.inner.state);
            if let Some(current) = state.ledger.get_active(&target_id).cloned() {
                current.cancel();
                state.ledger.archive(&current);
                info!(target_id = %target_id, superseded = %current.id(), action = %current.name(), "cancelled running action");
            }
            let action = Action::new(action_name, target_id.clone(), action_fn);
            state.ledger.add_active(target_id.clone(), action.clone());
            action
        };

        let store = Arc::downgrade(&self.inner);
        action.once(move |snapshot| {
            let Some(inner) = store.upgrade() else {
                return;
            };
            let store = EntityStore { inner };
            // Publish while the settled action is still current, then archive.
            store.action_did_change();
            lock(&store.inner.state)
                .ledger
                .archive_snapshot(snapshot.clone());
            store.notify_on_next_turn();
        });

        let id = action.id().clone();
        info!(target_id = %target_id, action = %action_name, id = %id, "starting action");
        action.run();
        self.action_did_change();
        id
    }

    pub fn get_current_action(&self, target_id: &E::Id) -> Option<ActionSnapshot<E::Id>> {
        lock(&self.inner.state)
            .last_actions
            .active
            .iter()
            .find(|a| &a.target_id == target_id)
            .cloned()
    }

    pub fn get_all_actions(&self) -> LedgerView<E::Id> {
        lock(&self.inner.state).last_actions.clone()
    }

    /// Active actions of `target_id`, then its history newest first.
    pub fn get_workspace_actions(&self, target_id: &E::Id) -> Vec<ActionSnapshot<E::Id>> {
        let state = lock(&self.inner.state);
        let view = &state.last_actions;
        let actions = view
            .active
            .iter()
            .filter(|a| &a.target_id == target_id)
            .chain(
                view.history
                    .iter()
                    .rev()
                    .filter(|a| &a.target_id == target_id),
            )
            .cloned()
            .collect();
        actions
    }

    fn action_did_change(&self) {
        let (active, history) = {
            let mut state = lock(&self.inner.state);
            state.last_actions = state.ledger.get_all();
            (state.last_actions.active.len(), state.last_actions.history.len())
        };
        debug!(active, history, "actions changed");
        self.notify();
    }

    fn notify_on_next_turn(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let store = self.clone();
                runtime.spawn(async move {
                    tokio::task::yield_now().await;
                    store.action_did_change();
                });
            }
            Err(_) => self.action_did_change(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::tests::{gated, immediate};
    use crate::action::ActionStatus;
    use crate::workspace::{WorkspaceId, WorkspaceStatus};
    use podshell_launcher::Failure;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn store() -> WorkspaceStore {
        EntityStore::new(ObservableStore::in_memory(), None)
    }

    fn w(id: &str) -> WorkspaceId {
        WorkspaceId::new(id)
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn starting_a_second_action_cancels_and_archives_the_first() {
        let store = store();
        let (start_fn, _start_gate) = gated();
        let (rebuild_fn, _rebuild_gate) = gated();

        let first = store.start_action(StartAction::new(ActionName::Start, w("w1"), start_fn));
        let second = store.start_action(StartAction::new(ActionName::Rebuild, w("w1"), rebuild_fn));

        let current = store.get_current_action(&w("w1")).unwrap();
        assert_eq!(current.id, second);
        assert_eq!(current.name, ActionName::Rebuild);
        assert_eq!(current.status, ActionStatus::Pending);

        let history = store.get_all_actions().history;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, first);
        assert_eq!(history[0].name, ActionName::Start);
        assert_eq!(history[0].status, ActionStatus::Cancelled);
    }

    #[tokio::test]
    async fn n_starts_leave_one_active_and_n_minus_one_archived() {
        let store = store();
        let mut gates = Vec::new();
        let mut last = None;
        for _ in 0..4 {
            let (f, gate) = gated();
            gates.push(gate);
            last = Some(store.start_action(StartAction::new(ActionName::Start, w("w1"), f)));
        }

        let view = store.get_all_actions();
        assert_eq!(view.active.len(), 1);
        assert_eq!(Some(&view.active[0].id), last.as_ref());
        assert_eq!(view.history.len(), 3);
        assert!(view
            .history
            .iter()
            .all(|a| a.status == ActionStatus::Cancelled));
    }

    #[tokio::test]
    async fn actions_on_different_targets_run_side_by_side() {
        let store = store();
        let (a, _ga) = gated();
        let (b, _gb) = gated();
        store.start_action(StartAction::new(ActionName::Start, w("w1"), a));
        store.start_action(StartAction::new(ActionName::Stop, w("w2"), b));
        assert_eq!(store.get_all_actions().active.len(), 2);
        assert!(store.get_all_actions().history.is_empty());
    }

    #[tokio::test]
    async fn settled_action_is_published_current_then_archived() {
        let store = store();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observer = store.clone();
        let sink = Arc::clone(&seen);
        store.subscribe(move || {
            let current = observer.get_current_action(&w("w1")).map(|a| a.status);
            sink.lock().unwrap().push(current);
        });

        let (f, gate) = gated();
        store.start_action(StartAction::new(ActionName::Start, w("w1"), f));
        gate.send(Ok(())).unwrap();

        eventually(|| store.get_current_action(&w("w1")).is_none()).await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.first(), Some(&Some(ActionStatus::Pending)));
        let success_at = seen
            .iter()
            .position(|s| *s == Some(ActionStatus::Success))
            .expect("observers saw the settled action as current");
        assert_eq!(seen.last(), Some(&None));
        assert!(success_at < seen.len() - 1);

        let history = store.get_workspace_actions(&w("w1"));
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ActionStatus::Success);
    }

    #[tokio::test]
    async fn failed_action_keeps_its_failure() {
        let store = store();
        store.start_action(StartAction::new(
            ActionName::Stop,
            w("w1"),
            immediate(Err(Failure::new("boom"))),
        ));
        eventually(|| store.get_all_actions().history.len() == 1).await;

        let archived = &store.get_all_actions().history[0];
        assert_eq!(archived.status, ActionStatus::Error);
        assert_eq!(archived.error.as_ref().unwrap().message, "boom");
    }

    #[tokio::test]
    async fn workspace_actions_list_active_first_then_newest_history() {
        let store = store();
        store.start_action(StartAction::new(ActionName::Stop, w("w1"), immediate(Ok(()))));
        eventually(|| store.get_all_actions().history.len() == 1).await;
        store.start_action(StartAction::new(ActionName::Reset, w("w1"), immediate(Ok(()))));
        eventually(|| store.get_all_actions().history.len() == 2).await;
        let (f, _gate) = gated();
        store.start_action(StartAction::new(ActionName::Start, w("w1"), f));
        store.start_action(StartAction::new(ActionName::Remove, w("w2"), immediate(Ok(()))));

        let names: Vec<_> = store
            .get_workspace_actions(&w("w1"))
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, [ActionName::Start, ActionName::Reset, ActionName::Stop]);
    }

    #[tokio::test]
    async fn history_is_reloaded_by_a_new_store() {
        let storage = ObservableStore::in_memory();
        let store: WorkspaceStore = EntityStore::new(storage.clone(), None);
        store.start_action(StartAction::new(ActionName::Stop, w("w1"), immediate(Ok(()))));
        eventually(|| store.get_all_actions().history.len() == 1).await;

        let reopened: WorkspaceStore = EntityStore::new(storage, None);
        assert_eq!(reopened.get_workspace_actions(&w("w1")).len(), 1);
    }

    #[tokio::test]
    async fn changes_stream_yields_on_every_notification() {
        let store = store();
        let mut changes = store.changes();
        store.set_workspace(&w("w1"), Workspace::new("w1"));
        tokio::time::timeout(Duration::from_secs(5), changes.next())
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn identical_snapshot_does_not_notify() {
        let store = store();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        store.subscribe(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.set_workspaces(vec![Workspace::new("w1"), Workspace::new("w2")]);
        store.set_workspaces(vec![Workspace::new("w1"), Workspace::new("w2")]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn refresh_keeps_known_status() {
        let store = store();
        store.set_workspaces(vec![Workspace::new("w1")]);
        store.set_status(&w("w1"), Some(WorkspaceStatus::Running));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        store.subscribe(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.set_workspaces(vec![Workspace::new("w1")]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            store.get(&w("w1")).unwrap().status,
            Some(WorkspaceStatus::Running)
        );
    }

    #[test]
    fn set_status_ignores_unchanged_and_unknown() {
        let store = store();
        store.set_workspaces(vec![Workspace::new("w1")]);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        store.subscribe(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.set_status(&w("w1"), Some(WorkspaceStatus::Stopped));
        store.set_status(&w("w1"), Some(WorkspaceStatus::Stopped));
        store.set_status(&w("nope"), Some(WorkspaceStatus::Running));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn set_and_remove_single_workspace() {
        let store = store();
        store.set_workspace(&w("w1"), Workspace::new("w1"));
        let mut updated = Workspace::new("w1");
        updated.last_used = Some("now".into());
        store.set_workspace(&w("w1"), updated);
        assert_eq!(store.get_all().len(), 1);
        assert_eq!(store.get(&w("w1")).unwrap().last_used.as_deref(), Some("now"));

        store.remove_workspace(&w("w1"));
        assert!(store.get(&w("w1")).is_none());
    }

    #[tokio::test]
    async fn pro_store_uses_its_own_history() {
        let storage = ObservableStore::in_memory();
        let pro: ProWorkspaceStore = EntityStore::new(storage.clone(), Some("pro.example.com"));
        pro.start_action(StartAction::new(
            ActionName::Start,
            "i1".into(),
            immediate(Ok(())),
        ));
        eventually(|| pro.get_all_actions().history.len() == 1).await;

        let plain: WorkspaceStore = EntityStore::new(storage, None);
        assert!(plain.get_all_actions().history.is_empty());
    }
}
