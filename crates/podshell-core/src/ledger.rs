use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use tracing::{debug, warn};

use crate::action::{Action, ActionSnapshot, TargetKey};
use crate::storage::ObservableStore;

/// Finished actions kept per ledger; the oldest is evicted first.
pub const HISTORY_LIMIT: usize = 50;

const HISTORY_KEY: &str = "actions";

/// Point-in-time copy of a ledger. `active` is ordered by creation time,
/// `history` oldest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(bound = "K: TargetKey")]
pub struct LedgerView<K> {
    pub active: Vec<ActionSnapshot<K>>,
    pub history: Vec<ActionSnapshot<K>>,
}

impl<K> Default for LedgerView<K> {
    fn default() -> Self {
        Self {
            active: Vec::new(),
            history: Vec::new(),
        }
    }
}

/// At most one active action per target plus a bounded, persisted history.
///
/// Several processes may share one history key. Persisting merges this
/// ledger's new entries into whatever is stored at that moment instead of
/// overwriting it, and the merged list becomes the local history.
pub struct ActionLedger<K> {
    active: HashMap<K, Action<K>>,
    history: VecDeque<ActionSnapshot<K>>,
    // Archived here but not yet written.
    unsaved: Vec<ActionSnapshot<K>>,
    storage: ObservableStore,
    storage_key: String,
}

impl<K: TargetKey> ActionLedger<K> {
    /// Open the ledger, loading any history persisted under its key.
    pub fn new(storage: ObservableStore, namespace: Option<&str>) -> Self {
        let storage_key = Self::storage_key(namespace);
        let mut history: VecDeque<ActionSnapshot<K>> =
            match storage.get::<Vec<ActionSnapshot<K>>>(&storage_key) {
                Ok(Some(saved)) => saved.into(),
                Ok(None) => VecDeque::new(),
                Err(e) => {
                    warn!(key = %storage_key, error = %e, "failed to load action history, starting empty");
                    VecDeque::new()
                }
            };
        while history.len() > HISTORY_LIMIT {
            history.pop_front();
        }
        debug!(key = %storage_key, entries = history.len(), "action history loaded");

        Self {
            active: HashMap::new(),
            history,
            unsaved: Vec::new(),
            storage,
            storage_key,
        }
    }

    pub fn storage_key(namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) => format!("{ns}-{HISTORY_KEY}"),
            None => HISTORY_KEY.to_string(),
        }
    }

    pub fn get_active(&self, target: &K) -> Option<&Action<K>> {
        self.active.get(target)
    }

    pub fn get_all(&self) -> LedgerView<K> {
        let mut active: Vec<_> = self.active.values().map(Action::snapshot).collect();
        active.sort_by_key(|a| a.created_at);
        LedgerView {
            active,
            history: self.history.iter().cloned().collect(),
        }
    }

    /// Make `action` the active action of `target`. Callers cancel and
    /// archive the previous one first; if they did not, it is archived here
    /// so it is not lost.
    pub fn add_active(&mut self, target: K, action: Action<K>) {
        if let Some(previous) = self.active.insert(target.clone(), action) {
            warn!(target_id = %target, previous = %previous.id(), "replacing an active action that was not archived");
            self.push_history(previous.snapshot());
        }
    }

    /// Move `action` out of the active set and into history. Idempotent: an
    /// action already in history is not recorded twice.
    pub fn archive(&mut self, action: &Action<K>) {
        self.archive_snapshot(action.snapshot());
    }

    /// Same as [`archive`](Self::archive), from a snapshot taken when the
    /// action settled.
    pub fn archive_snapshot(&mut self, snapshot: ActionSnapshot<K>) {
        if self
            .active
            .get(&snapshot.target_id)
            .is_some_and(|current| current.id() == &snapshot.id)
        {
            self.active.remove(&snapshot.target_id);
        }
        if self.history.iter().any(|h| h.id == snapshot.id) {
            return;
        }
        debug!(id = %snapshot.id, target_id = %snapshot.target_id, status = %snapshot.status, "archiving action");
        self.push_history(snapshot);
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn push_history(&mut self, snapshot: ActionSnapshot<K>) {
        self.unsaved.push(snapshot.clone());
        self.history.push_back(snapshot);
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.persist();
    }

    /// Unsaved entries stay queued after a failure and go out with the
    /// next archive.
    fn persist(&mut self) {
        let unsaved = &self.unsaved;
        let result = self
            .storage
            .update(&self.storage_key, |saved: Option<Vec<ActionSnapshot<K>>>| {
                merge_history(saved.unwrap_or_default(), unsaved)
            });
        match result {
            Ok(merged) => {
                self.history = merged.into();
                self.unsaved.clear();
            }
            Err(e) => {
                warn!(key = %self.storage_key, error = %e, "failed to persist action history");
            }
        }
    }
}

/// Append the entries of `unsaved` that `saved` lacks, then trim to
/// [`HISTORY_LIMIT`] from the front.
fn merge_history<K: TargetKey>(
    mut saved: Vec<ActionSnapshot<K>>,
    unsaved: &[ActionSnapshot<K>],
) -> Vec<ActionSnapshot<K>> {
    for snapshot in unsaved {
        if !saved.iter().any(|s| s.id == snapshot.id) {
            saved.push(snapshot.clone());
        }
    }
    if saved.len() > HISTORY_LIMIT {
        let excess = saved.len() - HISTORY_LIMIT;
        saved.drain(..excess);
    }
    saved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::tests::immediate;
    use crate::action::{ActionName, ActionStatus};
    use crate::storage::{FileStore, KeyValueStore};
    use serde_json::Value;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn action(target: &str) -> Action<String> {
        Action::new(ActionName::Start, target.to_string(), immediate(Ok(())))
    }

    #[test]
    fn archive_moves_active_into_history() {
        let mut ledger = ActionLedger::new(ObservableStore::in_memory(), None);
        let a = action("w1");
        ledger.add_active("w1".into(), a.clone());
        assert!(ledger.get_active(&"w1".to_string()).is_some());

        a.cancel();
        ledger.archive(&a);

        let view = ledger.get_all();
        assert!(view.active.is_empty());
        assert_eq!(view.history.len(), 1);
        assert_eq!(view.history[0].status, ActionStatus::Cancelled);
    }

    #[test]
    fn archive_leaves_a_newer_active_action_alone() {
        let mut ledger = ActionLedger::new(ObservableStore::in_memory(), None);
        let old = action("w1");
        let new = action("w1");
        ledger.add_active("w1".into(), new.clone());

        ledger.archive(&old);

        assert_eq!(ledger.get_active(&"w1".to_string()).unwrap().id(), new.id());
        assert_eq!(ledger.history_len(), 1);
    }

    #[test]
    fn archive_is_idempotent() {
        let mut ledger = ActionLedger::new(ObservableStore::in_memory(), None);
        let a = action("w1");
        ledger.archive(&a);
        ledger.archive(&a);
        assert_eq!(ledger.history_len(), 1);
    }

    #[test]
    fn history_is_capped_with_oldest_evicted() {
        let mut ledger = ActionLedger::new(ObservableStore::in_memory(), None);
        let actions: Vec<_> = (0..HISTORY_LIMIT + 5).map(|i| action(&format!("w{i}"))).collect();
        for a in &actions {
            ledger.archive(a);
        }

        let history = ledger.get_all().history;
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(&history[0].id, actions[5].id());
        assert_eq!(&history[HISTORY_LIMIT - 1].id, actions.last().unwrap().id());
    }

    #[test]
    fn history_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let backend: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(dir.path(), "podshell"));
        let a = action("w1");
        {
            let mut ledger = ActionLedger::new(ObservableStore::new(Arc::clone(&backend)), None);
            ledger.archive(&a);
        }

        let reopened: ActionLedger<String> = ActionLedger::new(ObservableStore::new(backend), None);
        let history = reopened.get_all().history;
        assert_eq!(history.len(), 1);
        assert_eq!(&history[0].id, a.id());
        assert_eq!(history[0].name, ActionName::Start);
    }

    #[test]
    fn ledgers_sharing_a_data_dir_keep_each_others_history() {
        let dir = TempDir::new().unwrap();
        let open = || -> ActionLedger<String> {
            ActionLedger::new(
                ObservableStore::new(Arc::new(FileStore::new(dir.path(), "podshell"))),
                None,
            )
        };
        let mut first = open();
        let mut second = open();
        let up = action("w1");
        let stop = action("w2");

        first.archive(&up);
        second.archive(&stop);

        let ids: Vec<_> = open().get_all().history.into_iter().map(|a| a.id).collect();
        assert_eq!(&ids, &[up.id().clone(), stop.id().clone()]);
        // The later writer also picked up the earlier entry.
        assert_eq!(second.history_len(), 2);
    }

    #[test]
    fn merged_history_is_capped() {
        let dir = TempDir::new().unwrap();
        let backend: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(dir.path(), "podshell"));
        let mut first = ActionLedger::new(ObservableStore::new(Arc::clone(&backend)), None);
        let mut second = ActionLedger::new(ObservableStore::new(Arc::clone(&backend)), None);
        for i in 0..HISTORY_LIMIT {
            first.archive(&action(&format!("w{i}")));
        }
        let last = action("late");
        second.archive(&last);

        let history = second.get_all().history;
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(&history[HISTORY_LIMIT - 1].id, last.id());
    }

    #[test]
    fn namespaced_ledgers_do_not_share_history() {
        let storage = ObservableStore::in_memory();
        let mut pro = ActionLedger::new(storage.clone(), Some("pro.example.com"));
        pro.archive(&action("i1"));

        let plain: ActionLedger<String> = ActionLedger::new(storage.clone(), None);
        assert_eq!(plain.history_len(), 0);
        assert!(storage
            .get::<Value>("pro.example.com-actions")
            .unwrap()
            .is_some());
    }

    #[test]
    fn unreadable_history_loads_empty() {
        let storage = ObservableStore::in_memory();
        storage.set("actions", &"not a list").unwrap();
        let ledger: ActionLedger<String> = ActionLedger::new(storage, None);
        assert_eq!(ledger.history_len(), 0);
    }

    #[test]
    fn add_active_archives_a_displaced_action() {
        let mut ledger = ActionLedger::new(ObservableStore::in_memory(), None);
        let first = action("w1");
        ledger.add_active("w1".into(), first.clone());
        ledger.add_active("w1".into(), action("w1"));
        assert_eq!(&ledger.get_all().history[0].id, first.id());
    }
}
