// Subscription registry.
//
// Maps opaque connection handles to delivery targets. The registry itself
// never touches the substrate; the `Store` decides which subscribers match a
// changed key and hands values in.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::{Map, Value};

/// Opaque identifier for one `connect()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

/// Callback invoked with the full storage key and the new value
/// (`None` on removal).
pub type KeyCallback = Box<dyn Fn(&str, Option<&Value>) + Send + Sync>;

/// Callback invoked with the accumulated collection, keyed by full
/// storage key.
pub type CollectionCallback = Box<dyn Fn(&Map<String, Value>) + Send + Sync>;

/// Where notifications for a subscription are delivered.
pub enum Target {
    /// One invocation per changed key.
    PerKey(KeyCallback),
    /// Incoming keys accumulate into a single aggregate object; the callback
    /// receives the whole aggregate after each change.
    Collection(CollectionCallback),
}

/// Subscription request passed to [`Store::connect`](crate::Store::connect).
pub struct Mapping {
    pub(crate) key: String,
    pub(crate) target: Target,
    pub(crate) init_with_stored_values: bool,
}

impl Mapping {
    /// Subscribe to a singular key, or to each member of a collection
    /// individually.
    pub fn per_key(
        key: impl Into<String>,
        callback: impl Fn(&str, Option<&Value>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            target: Target::PerKey(Box::new(callback)),
            init_with_stored_values: true,
        }
    }

    /// Subscribe to a collection prefix, receiving the accumulated members
    /// as one object.
    pub fn collection(
        key: impl Into<String>,
        callback: impl Fn(&Map<String, Value>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            target: Target::Collection(Box::new(callback)),
            init_with_stored_values: true,
        }
    }

    /// Skip the initial delivery of currently-persisted values.
    pub fn without_initial_values(mut self) -> Self {
        self.init_with_stored_values = false;
        self
    }
}

pub(crate) struct Subscription {
    pub(crate) key: String,
    pub(crate) target: Target,
    /// Accumulated members for `Target::Collection`; unused otherwise.
    pub(crate) aggregate: Mutex<Map<String, Value>>,
}

impl Subscription {
    /// Deliver a single key change to this subscription.
    pub(crate) fn notify(&self, key: &str, value: Option<&Value>) {
        match &self.target {
            Target::PerKey(callback) => callback(key, value),
            Target::Collection(callback) => {
                let mut aggregate = self.aggregate.lock().expect("aggregate lock poisoned");
                match value {
                    Some(value) => {
                        aggregate.insert(key.to_owned(), value.clone());
                    }
                    None => {
                        aggregate.remove(key);
                    }
                }
                callback(&aggregate);
            }
        }
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    next_id: AtomicU64,
    subscriptions: DashMap<ConnectionId, Arc<Subscription>>,
}

impl Registry {
    pub(crate) fn insert(&self, mapping: Mapping) -> (ConnectionId, Arc<Subscription>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscription = Arc::new(Subscription {
            key: mapping.key,
            target: mapping.target,
            aggregate: Mutex::new(Map::new()),
        });
        self.subscriptions.insert(id, Arc::clone(&subscription));
        (id, subscription)
    }

    /// Unregister. Idempotent: unknown ids are a no-op.
    pub(crate) fn remove(&self, id: ConnectionId) {
        self.subscriptions.remove(&id);
    }

    pub(crate) fn contains(&self, id: ConnectionId) -> bool {
        self.subscriptions.contains_key(&id)
    }

    /// Snapshot the current subscriptions so callbacks run without holding
    /// any registry lock (a callback may connect or disconnect).
    pub(crate) fn snapshot(&self) -> Vec<(ConnectionId, Arc<Subscription>)> {
        self.subscriptions
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect()
    }

    /// Whether any subscription watches exactly `key`.
    pub(crate) fn has_subscriber_for_key(&self, key: &str) -> bool {
        self.subscriptions
            .iter()
            .any(|entry| entry.value().key == key)
    }
}

/// Handle returned by [`Store::connect`](crate::Store::connect).
///
/// Holds the subscription open; call [`disconnect`](Connection::disconnect)
/// on teardown. Disconnecting twice has no effect the second time.
pub struct Connection {
    pub(crate) id: ConnectionId,
    pub(crate) registry: Arc<Registry>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Stop all further notifications for this subscription. Idempotent.
    pub fn disconnect(&self) {
        self.registry.remove(self.id);
    }
}
