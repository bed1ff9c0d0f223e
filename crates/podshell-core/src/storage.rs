use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::{CoreError, Result};
use crate::hub::{EventHub, Handler, Subscription};
use crate::lock;

/// Durable key-value storage for small JSON documents.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;

    /// Replace the value of `key` with `f(current)` as one step: no other
    /// writer of this store can interleave between the read and the write.
    fn update(&self, key: &str, f: &mut dyn FnMut(Option<Value>) -> Value) -> Result<Value>;
}

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// Prevents partial writes from corrupting state files.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        lock(&self.values).insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        lock(&self.values).remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        lock(&self.values).clear();
        Ok(())
    }

    fn update(&self, key: &str, f: &mut dyn FnMut(Option<Value>) -> Value) -> Result<Value> {
        let mut values = lock(&self.values);
        let next = f(values.remove(key));
        values.insert(key.to_string(), next.clone());
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// All keys of one store live in a single JSON object file, `.<name>.json`.
///
/// Every read-modify-write cycle holds an exclusive advisory lock on
/// `.<name>.json.lock`, so several processes sharing a data directory do
/// not overwrite each other's keys.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
    // The file lock is per open file; this keeps threads of one instance in line.
    guard: Mutex<()>,
}

/// Held for the duration of one cycle; unlocks on drop.
struct FileLock {
    file: File,
}

impl FileLock {
    fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl FileStore {
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(format!(".{name}.json")),
            lock_path: dir.join(format!(".{name}.json.lock")),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        if data.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&data)? {
            Value::Object(map) => Ok(map),
            other => Err(CoreError::Storage(format!(
                "{} does not hold a JSON object: {other}",
                self.path.display()
            ))),
        }
    }

    fn write_all(&self, map: &Map<String, Value>) -> Result<()> {
        let data = serde_json::to_vec_pretty(map)?;
        atomic_write(&self.path, &data)
    }

    /// Run `f` over the whole document with both locks held, writing the
    /// document back when `f` reports a change.
    fn locked<T>(&self, f: impl FnOnce(&mut Map<String, Value>) -> (T, bool)) -> Result<T> {
        let _guard = lock(&self.guard);
        let _file_lock = FileLock::acquire(&self.lock_path)?;
        let mut map = self.read_all()?;
        let (out, changed) = f(&mut map);
        if changed {
            self.write_all(&map)?;
        }
        Ok(out)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let _guard = lock(&self.guard);
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.locked(|map| {
            map.insert(key.to_string(), value);
            ((), true)
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.locked(|map| ((), map.remove(key).is_some()))
    }

    fn clear(&self) -> Result<()> {
        self.locked(|map| {
            map.clear();
            ((), true)
        })
    }

    fn update(&self, key: &str, f: &mut dyn FnMut(Option<Value>) -> Value) -> Result<Value> {
        self.locked(|map| {
            let next = f(map.remove(key));
            map.insert(key.to_string(), next.clone());
            (next, true)
        })
    }
}

// ---------------------------------------------------------------------------
// ObservableStore
// ---------------------------------------------------------------------------

/// A typed view over a [`KeyValueStore`] that announces every write.
#[derive(Clone)]
pub struct ObservableStore {
    backend: Arc<dyn KeyValueStore>,
    hub: EventHub<String, Value>,
}

impl ObservableStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            hub: EventHub::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.backend.get(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.backend.set(key, value.clone())?;
        self.hub.publish(&key.to_string(), &value);
        Ok(())
    }

    /// Read-modify-write `key` in one step of the backend. A current value
    /// that does not decode as `T` is logged and replaced.
    pub fn update<T: Serialize + DeserializeOwned>(
        &self,
        key: &str,
        mut f: impl FnMut(Option<T>) -> T,
    ) -> Result<T> {
        let mut encode_error = None;
        let value = self.backend.update(key, &mut |current| {
            let decoded = current
                .clone()
                .and_then(|raw| match serde_json::from_value(raw) {
                    Ok(decoded) => Some(decoded),
                    Err(e) => {
                        warn!(key, error = %e, "replacing undecodable stored value");
                        None
                    }
                });
            match serde_json::to_value(f(decoded)) {
                Ok(next) => next,
                Err(e) => {
                    // Leave what was stored untouched.
                    encode_error = Some(e);
                    current.unwrap_or(Value::Null)
                }
            }
        })?;
        if let Some(e) = encode_error {
            return Err(e.into());
        }
        self.hub.publish(&key.to_string(), &value);
        Ok(serde_json::from_value(value)?)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.backend.remove(key)
    }

    pub fn clear(&self) -> Result<()> {
        self.backend.clear()
    }

    /// Called with the new raw value after every successful `set` of `key`.
    pub fn subscribe(
        &self,
        key: &str,
        listener: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        self.hub.subscribe(key.to_string(), Handler::new(listener))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/state.json");
        atomic_write(&path, b"{}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path(), "podshell");
        store.set("actions", serde_json::json!([1, 2])).unwrap();
        store.set("other", serde_json::json!("x")).unwrap();

        let reopened = FileStore::new(dir.path(), "podshell");
        assert_eq!(
            reopened.get("actions").unwrap(),
            Some(serde_json::json!([1, 2]))
        );
        assert!(reopened.path().ends_with(".podshell.json"));
    }

    #[test]
    fn file_store_missing_key_and_remove() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path(), "s");
        assert_eq!(store.get("nope").unwrap(), None);
        store.set("k", serde_json::json!(1)).unwrap();
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn file_store_rejects_non_object_file() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path(), "broken");
        std::fs::write(store.path(), "[1,2,3]").unwrap();
        assert!(matches!(store.get("k"), Err(CoreError::Storage(_))));
    }

    #[test]
    fn file_store_update_serialises_separate_instances() {
        let dir = TempDir::new().unwrap();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let dir = dir.path().to_path_buf();
                std::thread::spawn(move || {
                    let store = FileStore::new(&dir, "podshell");
                    for _ in 0..20 {
                        store
                            .update("count", &mut |current| {
                                let n = current.and_then(|v| v.as_u64()).unwrap_or(0);
                                serde_json::json!(n + 1)
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let store = FileStore::new(dir.path(), "podshell");
        assert_eq!(store.get("count").unwrap(), Some(serde_json::json!(160)));
    }

    #[test]
    fn file_store_set_keeps_keys_written_by_another_instance() {
        let dir = TempDir::new().unwrap();
        let a = FileStore::new(dir.path(), "podshell");
        let b = FileStore::new(dir.path(), "podshell");
        a.set("one", serde_json::json!(1)).unwrap();
        b.set("two", serde_json::json!(2)).unwrap();
        assert_eq!(a.get("one").unwrap(), Some(serde_json::json!(1)));
        assert_eq!(a.get("two").unwrap(), Some(serde_json::json!(2)));
    }

    #[test]
    fn observable_update_replaces_undecodable_value() {
        let store = ObservableStore::in_memory();
        store.set("list", &"not a list").unwrap();
        let next = store
            .update("list", |current: Option<Vec<u32>>| {
                let mut list = current.unwrap_or_default();
                list.push(7);
                list
            })
            .unwrap();
        assert_eq!(next, vec![7]);
        assert_eq!(store.get::<Vec<u32>>("list").unwrap(), Some(vec![7]));
    }

    #[test]
    fn observable_store_notifies_subscribers_of_the_key() {
        let store = ObservableStore::in_memory();
        let seen = Arc::new(Mutex::new(vec![]));
        let sink = Arc::clone(&seen);
        let sub = store.subscribe("theme", move |value| sink.lock().unwrap().push(value.clone()));

        store.set("theme", &"dark").unwrap();
        store.set("other", &"ignored").unwrap();
        sub.unsubscribe();
        store.set("theme", &"light").unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![serde_json::json!("dark")]);
        assert_eq!(store.get::<String>("theme").unwrap().as_deref(), Some("light"));
    }
}
