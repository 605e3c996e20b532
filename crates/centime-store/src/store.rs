// The persisted key-value store.
//
// Everything the rest of the client knows about durable state goes through
// this type: reads via `get` or a subscription, writes via `set` / `merge` /
// `multi_set` / `remove`. Subscriber notification is synchronous and ordered:
// all matching subscribers have run by the time a mutating future resolves.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::backend::{BackendError, StorageBackend};
use crate::keys;
use crate::subscriber::{Connection, ConnectionId, Mapping, Registry, Target};

/// Errors surfaced by the store's mutating operations.
///
/// Reads never error: decode and substrate failures on the read path are
/// logged and resolve to `None` so a corrupted cache entry cannot take down
/// a render path.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The substrate rejected the operation and eviction could not free
    /// enough space (or the failure was not capacity-related).
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The value could not be JSON-encoded.
    #[error("failed to encode value for key {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// How `merge` combines an incoming value with the persisted one.
///
/// Inferred once per call from the incoming value's JSON type; part of the
/// store's public contract rather than ad-hoc dispatch:
/// arrays concatenate, objects deep-merge, scalars replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Scalars (and `null`) overwrite the persisted value.
    Replace,
    /// Arrays append to the persisted array (never index-keyed objects).
    Concat,
    /// Objects merge recursively; the incoming side wins scalar conflicts.
    DeepMerge,
}

impl MergeStrategy {
    pub fn for_value(value: &Value) -> Self {
        match value {
            Value::Array(_) => Self::Concat,
            Value::Object(_) => Self::DeepMerge,
            _ => Self::Replace,
        }
    }
}

/// One batched update instruction, as carried in API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreUpdate {
    pub method: UpdateMethod,
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMethod {
    Set,
    Merge,
}

enum WriteOp {
    Set { key: String, value: Value },
    MultiSet { entries: Map<String, Value> },
    Merge { key: String, value: Value },
}

struct StoreInner {
    backend: Arc<dyn StorageBackend>,
    registry: Arc<Registry>,
    collections: Vec<String>,
    /// Recently-accessed keys, least recent at the head. Guides eviction and
    /// persists under [`keys::RECENTLY_ACCESSED`].
    recently_accessed: Mutex<Vec<String>>,
}

/// Persisted key-value store with pub/sub change notification.
///
/// Cheap to clone (`Arc` inside). Call [`init`](Store::init) once at startup
/// so the eviction order survives process restarts.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Create a store over `backend`. `collections` is the set of key
    /// prefixes treated as collection keys.
    pub fn new(backend: Arc<dyn StorageBackend>, collections: Vec<String>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend,
                registry: Arc::new(Registry::default()),
                collections,
                recently_accessed: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Reload the persisted recently-accessed list.
    pub async fn init(&self) {
        if let Some(Value::Array(entries)) = self.get(keys::RECENTLY_ACCESSED).await {
            let list: Vec<String> = entries
                .into_iter()
                .filter_map(|entry| entry.as_str().map(str::to_owned))
                .collect();
            *self.lock_recent() = list;
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Read and JSON-decode the value for `key`.
    ///
    /// Never errors: substrate and decode failures are logged and resolve
    /// to `None`.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let raw = match self.inner.backend.get(key).await {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(key, %err, "unable to read persisted value");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, %err, "discarding undecodable persisted value");
                None
            }
        }
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// JSON-encode and write `value` under `key`, then notify matching
    /// subscribers. A full substrate triggers eviction and a bounded retry.
    pub async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.write_with_eviction(WriteOp::Set {
            key: key.to_owned(),
            value,
        })
        .await
    }

    /// Write several keys in one substrate call, notifying each key once.
    pub async fn multi_set(&self, entries: Map<String, Value>) -> Result<(), StoreError> {
        self.write_with_eviction(WriteOp::MultiSet { entries }).await
    }

    /// Merge `value` into the persisted value for `key` per
    /// [`MergeStrategy`], then notify subscribers with the merged result.
    pub async fn merge(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.write_with_eviction(WriteOp::Merge {
            key: key.to_owned(),
            value,
        })
        .await
    }

    /// Apply a batch of update instructions in order.
    pub async fn update(&self, updates: Vec<StoreUpdate>) -> Result<(), StoreError> {
        for update in updates {
            match update.method {
                UpdateMethod::Set => self.set(&update.key, update.value).await?,
                UpdateMethod::Merge => self.merge(&update.key, update.value).await?,
            }
        }
        Ok(())
    }

    /// Delete `key`, drop it from the recently-accessed list, and notify
    /// subscribers with `None`.
    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.backend.remove(key).await?;
        self.update_recently_accessed(key, true).await;
        self.key_changed(key, None);
        Ok(())
    }

    /// Wipe the substrate and the recently-accessed list. Subscribers are
    /// not notified; callers tear down or re-prime subscriptions themselves
    /// (this runs at sign-out).
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.inner.backend.clear().await?;
        self.lock_recent().clear();
        Ok(())
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Register a subscription and (unless the mapping opted out) deliver
    /// the currently-persisted value(s) before returning. When nothing
    /// matches, the subscriber is primed once with `None` so the UI is not
    /// left in an undefined state.
    pub async fn connect(&self, mapping: Mapping) -> Connection {
        let init = mapping.init_with_stored_values;
        let config_key = mapping.key.clone();
        let (id, subscription) = self.inner.registry.insert(mapping);
        let connection = Connection {
            id,
            registry: Arc::clone(&self.inner.registry),
        };
        if !init {
            return connection;
        }

        let matching: Vec<String> = match self.inner.backend.get_all_keys().await {
            Ok(all_keys) => all_keys
                .into_iter()
                .filter(|key| self.is_key_match(&config_key, key))
                .collect(),
            Err(err) => {
                warn!(key = %config_key, %err, "unable to list keys for initial delivery");
                Vec::new()
            }
        };

        if matching.is_empty() {
            subscription.notify(&config_key, None);
            return connection;
        }

        // Collection connects don't pin any one member, so only exact-key
        // connects count as an access for eviction purposes.
        if !self.is_collection_key(&config_key) {
            self.update_recently_accessed(&config_key, false).await;
        }

        match &subscription.target {
            Target::PerKey(_) => {
                for key in matching {
                    let value = self.get(&key).await;
                    subscription.notify(&key, value.as_ref());
                }
            }
            // Deliver the initial collection as one aggregate rather than
            // one callback per member.
            Target::Collection(callback) => {
                let mut initial = Map::new();
                for key in matching {
                    if let Some(value) = self.get(&key).await {
                        initial.insert(key, value);
                    }
                }
                let mut aggregate = subscription
                    .aggregate
                    .lock()
                    .expect("aggregate lock poisoned");
                *aggregate = initial;
                callback(&aggregate);
            }
        }
        connection
    }

    /// Unregister a subscription by id. No-op if the id is unknown.
    pub fn disconnect(&self, id: ConnectionId) {
        self.inner.registry.remove(id);
    }

    // ── Key classification ───────────────────────────────────────────

    pub fn is_collection_key(&self, key: &str) -> bool {
        self.inner.collections.iter().any(|prefix| prefix == key)
    }

    fn is_key_match(&self, config_key: &str, key: &str) -> bool {
        if self.is_collection_key(config_key) {
            key.starts_with(config_key)
        } else {
            config_key == key
        }
    }

    // ── Notification ─────────────────────────────────────────────────

    /// Run every matching subscriber for a changed key. Callbacks execute
    /// inline on the mutating task, outside any registry lock.
    fn key_changed(&self, key: &str, value: Option<&Value>) {
        for (id, subscription) in self.inner.registry.snapshot() {
            if !self.is_key_match(&subscription.key, key) {
                continue;
            }
            // A callback earlier in this pass may have disconnected it.
            if !self.inner.registry.contains(id) {
                continue;
            }
            subscription.notify(key, value);
        }
    }

    // ── Write path ───────────────────────────────────────────────────

    async fn write_with_eviction(&self, op: WriteOp) -> Result<(), StoreError> {
        let first = self.apply(&op).await;
        if !matches!(first, Err(StoreError::Backend(BackendError::QuotaExceeded))) {
            return first;
        }

        // Bounded retry: every pass evicts exactly one key, so the loop is
        // limited by the number of persisted keys. When no candidate is
        // left, the original error surfaces to the caller.
        let mut attempt = 0_usize;
        loop {
            attempt += 1;
            if !self.evict_one(attempt).await {
                error!(attempt, "storage full and no evictable key remains");
                return first;
            }
            match self.apply(&op).await {
                Err(StoreError::Backend(BackendError::QuotaExceeded)) => {}
                outcome => return outcome,
            }
        }
    }

    async fn apply(&self, op: &WriteOp) -> Result<(), StoreError> {
        match op {
            WriteOp::Set { key, value } => {
                let raw = encode(key, value)?;
                self.inner.backend.set(key, raw).await?;
                self.key_changed(key, Some(value));
                Ok(())
            }
            WriteOp::MultiSet { entries } => {
                let pairs = entries
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), encode(key, value)?)))
                    .collect::<Result<Vec<_>, StoreError>>()?;
                self.inner.backend.multi_set(pairs).await?;
                for (key, value) in entries {
                    self.key_changed(key, Some(value));
                }
                Ok(())
            }
            WriteOp::Merge { key, value } => self.apply_merge(key, value).await,
        }
    }

    async fn apply_merge(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        match MergeStrategy::for_value(value) {
            MergeStrategy::Replace => {
                let raw = encode(key, value)?;
                self.inner.backend.set(key, raw).await?;
                self.key_changed(key, Some(value));
            }
            MergeStrategy::Concat => {
                // Arrays concatenate manually: a substrate-level merge of an
                // array produces an index-keyed object, not an array.
                let mut items = if let Some(Value::Array(items)) = self.get(key).await {
                    items
                } else {
                    Vec::new()
                };
                if let Value::Array(incoming) = value {
                    items.extend(incoming.iter().cloned());
                }
                let merged = Value::Array(items);
                let raw = encode(key, &merged)?;
                self.inner.backend.set(key, raw).await?;
                self.key_changed(key, Some(&merged));
            }
            MergeStrategy::DeepMerge => {
                let existing = self
                    .get(key)
                    .await
                    .unwrap_or_else(|| Value::Object(Map::new()));
                let merged = merge_values(existing, value);
                let raw = encode(key, &merged)?;
                self.inner.backend.set(key, raw).await?;
                // Re-read so subscribers see the authoritative persisted
                // state, not just the delta we were handed.
                let fresh = self.get(key).await;
                self.key_changed(key, fresh.as_ref());
            }
        }
        Ok(())
    }

    // ── Eviction ─────────────────────────────────────────────────────

    /// Evict a single key by policy: the largest never-accessed key first,
    /// else the least-recently-accessed key with no subscriber. Returns
    /// `false` when nothing can be evicted.
    async fn evict_one(&self, attempt: usize) -> bool {
        let all_keys = match self.inner.backend.get_all_keys().await {
            Ok(all_keys) => all_keys,
            Err(err) => {
                warn!(%err, "unable to list keys for eviction");
                return false;
            }
        };
        let recent = self.lock_recent().clone();

        let never_accessed: Vec<&String> = all_keys
            .iter()
            .filter(|key| key.as_str() != keys::RECENTLY_ACCESSED && !recent.contains(key))
            .collect();

        if !never_accessed.is_empty() {
            let mut largest: Option<(&String, usize)> = None;
            for key in never_accessed {
                let size = match self.inner.backend.get(key).await {
                    Ok(raw) => raw.map_or(0, |raw| raw.len()),
                    Err(_) => 0,
                };
                if largest.is_none_or(|(_, largest_size)| size > largest_size) {
                    largest = Some((key, size));
                }
            }
            if let Some((key, size)) = largest {
                debug!(key = %key, size, attempt, "storage full; evicting largest never-accessed key");
                return self.remove(&key.clone()).await.is_ok();
            }
        }

        // Least recent is at the head of the list.
        for key in &recent {
            if !all_keys.contains(key) || self.inner.registry.has_subscriber_for_key(key) {
                continue;
            }
            debug!(key = %key, attempt, "storage full; evicting least-recently-accessed key");
            return self.remove(&key.clone()).await.is_ok();
        }

        false
    }

    // ── Access tracking ──────────────────────────────────────────────

    /// Move `key` to the tail of the recently-accessed list (or drop it when
    /// `remove` is set) and persist the list. The list writes through the
    /// backend directly: its own maintenance must never recurse into
    /// eviction or notify subscribers.
    async fn update_recently_accessed(&self, key: &str, remove: bool) {
        if key == keys::RECENTLY_ACCESSED {
            return;
        }
        let snapshot = {
            let mut recent = self.lock_recent();
            recent.retain(|existing| existing != key);
            if !remove {
                recent.push(key.to_owned());
            }
            recent.clone()
        };
        match serde_json::to_string(&snapshot) {
            Ok(raw) => {
                if let Err(err) = self.inner.backend.set(keys::RECENTLY_ACCESSED, raw).await {
                    warn!(%err, "unable to persist recently-accessed list");
                }
            }
            Err(err) => warn!(%err, "unable to encode recently-accessed list"),
        }
    }

    fn lock_recent(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.inner
            .recently_accessed
            .lock()
            .expect("recently-accessed lock poisoned")
    }
}

fn encode(key: &str, value: &Value) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|source| StoreError::Encode {
        key: key.to_owned(),
        source,
    })
}

/// Recursive object merge; anything except object-into-object is replaced
/// by the incoming side.
fn merge_values(base: Value, incoming: &Value) -> Value {
    match (base, incoming) {
        (Value::Object(mut base_map), Value::Object(incoming_map)) => {
            for (key, incoming_value) in incoming_map {
                let merged = match base_map.remove(key) {
                    Some(existing) => merge_values(existing, incoming_value),
                    None => incoming_value.clone(),
                };
                base_map.insert(key.clone(), merged);
            }
            Value::Object(base_map)
        }
        (_, incoming) => incoming.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::backend::MemoryBackend;

    fn store() -> Store {
        Store::new(MemoryBackend::new(), keys::default_collections())
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = store();
        let value = json!({"unread": true, "participants": ["a@x.com", "b@x.com"]});
        store.set("report_1", value.clone()).await.unwrap();
        assert_eq!(store.get("report_1").await, Some(value));
    }

    #[tokio::test]
    async fn get_missing_key_is_none() {
        let store = store();
        assert_eq!(store.get("report_1").await, None);
    }

    #[tokio::test]
    async fn undecodable_entry_reads_as_none() {
        let backend = MemoryBackend::new();
        backend
            .set("report_1", "{not json".into())
            .await
            .unwrap();
        let store = Store::new(backend, keys::default_collections());
        assert_eq!(store.get("report_1").await, None);
    }

    #[tokio::test]
    async fn merge_concatenates_arrays() {
        let store = store();
        store.set("log", json!([1, 2])).await.unwrap();
        store.merge("log", json!([3])).await.unwrap();
        assert_eq!(store.get("log").await, Some(json!([1, 2, 3])));
    }

    #[tokio::test]
    async fn merge_into_missing_array_starts_empty() {
        let store = store();
        store.merge("log", json!([1])).await.unwrap();
        assert_eq!(store.get("log").await, Some(json!([1])));
    }

    #[tokio::test]
    async fn merge_deep_merges_objects() {
        let store = store();
        store
            .set("session", json!({"authToken": "a", "flags": {"loading": true}}))
            .await
            .unwrap();
        store
            .merge("session", json!({"flags": {"loading": false}, "email": "x@y.com"}))
            .await
            .unwrap();
        assert_eq!(
            store.get("session").await,
            Some(json!({
                "authToken": "a",
                "flags": {"loading": false},
                "email": "x@y.com"
            }))
        );
    }

    #[tokio::test]
    async fn merge_replaces_scalars() {
        let store = store();
        store.set("counter", json!(1)).await.unwrap();
        store.merge("counter", json!(2)).await.unwrap();
        assert_eq!(store.get("counter").await, Some(json!(2)));
    }

    #[test]
    fn merge_strategy_inference() {
        assert_eq!(MergeStrategy::for_value(&json!([1])), MergeStrategy::Concat);
        assert_eq!(
            MergeStrategy::for_value(&json!({"a": 1})),
            MergeStrategy::DeepMerge
        );
        assert_eq!(MergeStrategy::for_value(&json!("s")), MergeStrategy::Replace);
        assert_eq!(MergeStrategy::for_value(&json!(null)), MergeStrategy::Replace);
    }

    #[tokio::test]
    async fn eviction_removes_largest_never_accessed_key() {
        let backend = MemoryBackend::with_quota(120);
        let store = Store::new(Arc::clone(&backend) as Arc<dyn StorageBackend>, vec![]);

        store.set("small", json!("x")).await.unwrap();
        store
            .set("huge", json!("a".repeat(60)))
            .await
            .unwrap();

        // Mark "small" as accessed so "huge" is the only never-accessed
        // candidate.
        let conn = store
            .connect(Mapping::per_key("small", |_, _| {}))
            .await;

        // This write does not fit until something is evicted.
        store
            .set("incoming", json!("b".repeat(40)))
            .await
            .unwrap();

        assert_eq!(store.get("huge").await, None);
        assert_eq!(store.get("incoming").await, Some(json!("b".repeat(40))));
        conn.disconnect();
    }

    #[tokio::test]
    async fn eviction_falls_back_to_least_recently_accessed() {
        let backend = MemoryBackend::with_quota(150);
        let store = Store::new(Arc::clone(&backend) as Arc<dyn StorageBackend>, vec![]);

        store.set("first", json!("a".repeat(40))).await.unwrap();
        store.set("second", json!("b".repeat(40))).await.unwrap();

        // Access both so there is no never-accessed candidate; "first"
        // becomes the least recent. Disconnect so neither has a subscriber.
        store.connect(Mapping::per_key("first", |_, _| {})).await.disconnect();
        store.connect(Mapping::per_key("second", |_, _| {})).await.disconnect();

        store.set("third", json!("c".repeat(40))).await.unwrap();

        assert_eq!(store.get("first").await, None);
        assert!(store.get("second").await.is_some());
        assert!(store.get("third").await.is_some());
    }

    #[tokio::test]
    async fn eviction_skips_subscribed_keys_and_surfaces_original_error() {
        let backend = MemoryBackend::with_quota(60);
        let store = Store::new(Arc::clone(&backend) as Arc<dyn StorageBackend>, vec![]);

        store.set("pinned", json!("a".repeat(30))).await.unwrap();
        let conn = store.connect(Mapping::per_key("pinned", |_, _| {})).await;

        let err = store
            .set("incoming", json!("b".repeat(50)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Backend(BackendError::QuotaExceeded)
        ));
        // The subscribed key survives.
        assert!(store.get("pinned").await.is_some());
        conn.disconnect();
    }

    #[tokio::test]
    async fn init_restores_recently_accessed_order() {
        let backend = MemoryBackend::new();
        {
            let store = Store::new(
                Arc::clone(&backend) as Arc<dyn StorageBackend>,
                vec![],
            );
            store.set("a", json!(1)).await.unwrap();
            store.connect(Mapping::per_key("a", |_, _| {})).await.disconnect();
        }

        // A fresh store over the same substrate picks the list back up.
        let store = Store::new(backend, vec![]);
        store.init().await;
        assert_eq!(
            store.get(keys::RECENTLY_ACCESSED).await,
            Some(json!(["a"]))
        );
        assert_eq!(*store.lock_recent(), vec!["a".to_owned()]);
    }
}
