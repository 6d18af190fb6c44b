//! File-backed store: one JSON file per key.
//!
//! Every mutation reads the whole record, changes it in memory and writes it
//! back through a temporary file renamed over the original, so readers never
//! observe a half-written record. Mutations of one key are serialized inside
//! this process; writers in *other* processes are not coordinated and may
//! lose or duplicate list updates. Use this backend for a single worker or
//! local development only.

use async_trait::async_trait;
use dashmap::DashMap;
use rh_types::{StoreError, StoreResult};
use serde_json::Value;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::store::{BackendKind, KeyValueStore};

/// Map a store key to a file name.
///
/// Characters outside `[A-Za-z0-9._-]` are percent-encoded (including `%`
/// itself and the `:` separator), so distinct keys never share a file.
pub fn file_name_for(key: &str) -> String {
    let mut name = String::with_capacity(key.len() + 5);
    for ch in key.chars() {
        match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => name.push(ch),
            other => {
                let mut buf = [0u8; 4];
                for byte in other.encode_utf8(&mut buf).bytes() {
                    let _ = write!(name, "%{byte:02X}");
                }
            }
        }
    }
    name.push_str(".json");
    name
}

/// A held key mutex. The key's map entry goes away with its last holder.
struct KeyLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[derive(Debug)]
pub struct FileStore {
    folder: PathBuf,
    poll_interval: Duration,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileStore {
    pub async fn open<P: AsRef<Path>>(folder: P, poll_interval: Duration) -> StoreResult<Self> {
        let folder = folder.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&folder).await?;

        Ok(Self {
            folder,
            poll_interval,
            locks: DashMap::new(),
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.folder.join(file_name_for(key))
    }

    async fn lock(&self, key: &str) -> KeyLock<'_> {
        let lock = self.locks.entry(key.to_string()).or_default().clone();
        KeyLock {
            locks: &self.locks,
            key: key.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    async fn read(&self, key: &str) -> StoreResult<Option<Value>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, value: &Value) -> StoreResult<()> {
        let path = self.path_for(key);
        let tmp = self
            .folder
            .join(format!(".{}.{}.tmp", file_name_for(key), Uuid::new_v4().simple()));

        tokio::fs::write(&tmp, serde_json::to_vec(value)?).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_list(&self, key: &str) -> StoreResult<Vec<Value>> {
        match self.read(key).await? {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items),
            Some(_) => Err(StoreError::WrongType {
                key: key.to_string(),
                expected: "list",
            }),
        }
    }

    /// Read-modify-write a list record under the key lock.
    async fn update_list<R, F>(&self, key: &str, update: F) -> StoreResult<R>
    where
        F: FnOnce(&mut Vec<Value>) -> R + Send,
        R: Send,
    {
        let _guard = self.lock(key).await;
        let mut items = self.read_list(key).await?;
        let result = update(&mut items);
        self.write(key, &Value::Array(items)).await?;
        Ok(result)
    }

    async fn take_head(&self, key: &str) -> StoreResult<Option<Value>> {
        let _guard = self.lock(key).await;
        let mut items = self.read_list(key).await?;
        if items.is_empty() {
            return Ok(None);
        }
        let head = items.remove(0);
        self.write(key, &Value::Array(items)).await?;
        Ok(Some(head))
    }
}

fn as_counter(key: &str, value: &Value) -> StoreResult<i64> {
    value.as_i64().ok_or_else(|| StoreError::NotANumber {
        key: key.to_string(),
    })
}

#[async_trait]
impl KeyValueStore for FileStore {
    fn backend(&self) -> BackendKind {
        BackendKind::File
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        self.read(key).await
    }

    async fn set(&self, key: &str, value: &Value) -> StoreResult<()> {
        let _guard = self.lock(key).await;
        self.write(key, value).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(tokio::fs::try_exists(self.path_for(key)).await?)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let _guard = self.lock(key).await;
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn increment(&self, key: &str, amount: i64) -> StoreResult<i64> {
        let _guard = self.lock(key).await;
        let next = match self.read(key).await? {
            Some(current) => as_counter(key, &current)? + amount,
            None => amount,
        };
        self.write(key, &Value::from(next)).await?;
        Ok(next)
    }

    async fn counter(&self, key: &str) -> StoreResult<i64> {
        match self.read(key).await? {
            Some(value) => as_counter(key, &value),
            None => Ok(0),
        }
    }

    async fn push_right(&self, key: &str, value: &Value) -> StoreResult<()> {
        let value = value.clone();
        self.update_list(key, move |items| items.push(value)).await
    }

    async fn push_left(&self, key: &str, value: &Value) -> StoreResult<()> {
        let value = value.clone();
        self.update_list(key, move |items| items.insert(0, value)).await
    }

    async fn pop_right(&self, key: &str) -> StoreResult<Option<Value>> {
        self.take_head(key).await
    }

    async fn pop_right_blocking(
        &self,
        key: &str,
        _timeout: Duration,
    ) -> StoreResult<Option<Value>> {
        if let Some(value) = self.take_head(key).await? {
            return Ok(Some(value));
        }
        debug!(key, "file store queue empty");
        tokio::time::sleep(self.poll_interval).await;
        Ok(None)
    }

    async fn remove_value(&self, key: &str, value: &Value) -> StoreResult<()> {
        if !self.exists(key).await? {
            return Ok(());
        }
        self.update_list(key, |items| items.retain(|item| item != value))
            .await
    }

    async fn list_all(&self, key: &str) -> StoreResult<Vec<Value>> {
        self.read_list(key).await
    }

    async fn length(&self, key: &str) -> StoreResult<usize> {
        Ok(self.read_list(key).await?.len())
    }

    async fn add_member(&self, key: &str, value: &Value) -> StoreResult<()> {
        let value = value.clone();
        self.update_list(key, move |members| {
            if !members.contains(&value) {
                members.insert(0, value);
            }
        })
        .await
    }

    async fn members(&self, key: &str) -> StoreResult<Vec<Value>> {
        self.read_list(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    async fn open_store(dir: &Path) -> FileStore {
        FileStore::open(dir.join("store"), Duration::from_millis(10))
            .await
            .unwrap()
    }

    #[test]
    fn key_escaping_is_injective() {
        let keys = [
            "dataset:D1:rounds",
            "dataset__D1__rounds",
            "dataset%3AD1%3Arounds",
            "dataset/D1/rounds",
            "heartbeat:worker:node-a",
        ];
        let names: std::collections::HashSet<String> =
            keys.iter().map(|k| file_name_for(k)).collect();
        assert_eq!(names.len(), keys.len());

        assert_eq!(file_name_for("dataset:D1:rounds"), "dataset%3AD1%3Arounds.json");
        assert!(!file_name_for("a/b").contains('/'));
    }

    #[tokio::test]
    async fn set_then_get_returns_equal_value() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;

        let value = json!({"status": "searching", "nested": [1, 2.5, null, {"k": "v"}]});
        store.set("dataset:D1:meta", &value).await.unwrap();

        assert_eq!(store.get("dataset:D1:meta").await.unwrap(), Some(value));
        assert!(store.exists("dataset:D1:meta").await.unwrap());
        assert_eq!(store.get("missing").await.unwrap(), None);

        store.delete("dataset:D1:meta").await.unwrap();
        assert!(!store.exists("dataset:D1:meta").await.unwrap());
        // deleting twice is fine
        store.delete("dataset:D1:meta").await.unwrap();
    }

    #[tokio::test]
    async fn push_right_pop_right_is_fifo() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;

        for i in 1..=5 {
            store.push_right("q", &json!({"v": i})).await.unwrap();
        }
        assert_eq!(store.length("q").await.unwrap(), 5);

        for i in 1..=5 {
            assert_eq!(store.pop_right("q").await.unwrap(), Some(json!({"v": i})));
        }
        assert_eq!(store.pop_right("q").await.unwrap(), None);
        assert_eq!(store.pop_right("never-created").await.unwrap(), None);
    }

    #[tokio::test]
    async fn push_left_is_popped_first() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;

        store.push_right("q", &json!(1)).await.unwrap();
        store.push_left("q", &json!(0)).await.unwrap();

        assert_eq!(store.list_all("q").await.unwrap(), vec![json!(0), json!(1)]);
        assert_eq!(store.pop_right("q").await.unwrap(), Some(json!(0)));
    }

    #[tokio::test]
    async fn blocking_pop_returns_none_then_value() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;

        let started = std::time::Instant::now();
        let empty = store
            .pop_right_blocking("q", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(empty, None);
        assert!(started.elapsed() >= Duration::from_millis(10));

        store.push_right("q", &json!("job")).await.unwrap();
        let value = store
            .pop_right_blocking("q", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(value, Some(json!("job")));
    }

    #[tokio::test]
    async fn increment_initializes_and_accumulates() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;

        assert_eq!(store.counter("c").await.unwrap(), 0);
        assert_eq!(store.increment("c", 1).await.unwrap(), 1);
        assert_eq!(store.increment("c", 1).await.unwrap(), 2);
        assert_eq!(store.increment("c", 5).await.unwrap(), 7);
        assert_eq!(store.counter("c").await.unwrap(), 7);

        assert_eq!(store.increment("d", 3).await.unwrap(), 3);

        store.set("text", &json!("abc")).await.unwrap();
        assert!(matches!(
            store.increment("text", 1).await,
            Err(StoreError::NotANumber { .. })
        ));
    }

    #[tokio::test]
    async fn remove_value_and_list_all() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;

        for v in [json!("a"), json!("b"), json!("a"), json!("c")] {
            store.push_right("l", &v).await.unwrap();
        }
        store.remove_value("l", &json!("a")).await.unwrap();
        assert_eq!(store.list_all("l").await.unwrap(), vec![json!("b"), json!("c")]);

        store.remove_value("absent", &json!("a")).await.unwrap();
        assert!(!store.exists("absent").await.unwrap());
        assert!(store.list_all("absent").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_members_are_unique() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;

        store.add_member("s", &json!("node-a")).await.unwrap();
        store.add_member("s", &json!("node-b")).await.unwrap();
        store.add_member("s", &json!("node-a")).await.unwrap();

        let mut members = store.members("s").await.unwrap();
        members.sort_by_key(|v| v.to_string());
        assert_eq!(members, vec![json!("node-a"), json!("node-b")]);
    }

    #[tokio::test]
    async fn list_operations_reject_scalars() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;

        store.set("scalar", &json!(42)).await.unwrap();
        assert!(matches!(
            store.push_right("scalar", &json!(1)).await,
            Err(StoreError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = open_store(dir.path()).await;
            store.push_right("dataset:D1:rounds", &json!({"round_id": 1})).await.unwrap();
        }
        let store = open_store(dir.path()).await;
        assert_eq!(store.length("dataset:D1:rounds").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_pushes_in_one_process_are_not_lost() {
        let dir = tempdir().unwrap();
        let store = Arc::new(open_store(dir.path()).await);

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.push_right("q", &json!(i)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.length("q").await.unwrap(), 20);
    }

    #[tokio::test]
    async fn key_locks_are_released_after_use() {
        let dir = tempdir().unwrap();
        let store = Arc::new(open_store(dir.path()).await);

        let mut handles = Vec::new();
        for i in 0..30 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let key = format!("q{}", i % 3);
                store.push_right(&key, &json!(i)).await.unwrap();
                store.increment(&format!("counter:{i}"), 1).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        store.pop_right("q0").await.unwrap();

        assert!(store.locks.is_empty());
        assert_eq!(store.length("q1").await.unwrap(), 10);
    }
}
