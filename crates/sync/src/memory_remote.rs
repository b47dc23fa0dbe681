//! In-process [`RemoteStore`] used by tests and local demos.
//!
//! Clones share one store, so two coordinators built over clones behave like
//! two devices talking to the same backend. Reachability and write failures
//! can be toggled to exercise the offline paths.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use smartmaint_events::Collection;

use crate::remote::{CollectionCallback, DocumentCallback, RemoteError, RemoteStore, RemoteSubscription, WriteOp};

type Documents = BTreeMap<Collection, Vec<(String, Value)>>;

#[derive(Default)]
struct State {
    /// Documents per collection, in insertion order.
    docs: Documents,
    collection_subs: Vec<(u64, Collection, CollectionCallback)>,
    document_subs: Vec<(u64, Collection, String, DocumentCallback)>,
    next_sub: u64,
    unreachable: bool,
    fail_writes: bool,
    probe_delay: Option<Duration>,
    commits: usize,
}

/// Pending callback invocation, run after the state lock is released.
enum Push {
    Collection(CollectionCallback, Vec<Value>),
    Document(DocumentCallback, Option<Value>),
}

impl Push {
    fn deliver(self) {
        match self {
            Push::Collection(cb, docs) => cb(docs),
            Push::Document(cb, doc) => cb(doc),
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryRemoteStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose `ping` never succeeds.
    pub fn unreachable() -> Self {
        let store = Self::new();
        store.set_reachable(false);
        store
    }

    /// Delay every `ping` by `delay` (to exercise the probe timeout).
    pub fn with_probe_delay(self, delay: Duration) -> Self {
        if let Ok(mut s) = self.state.lock() {
            s.probe_delay = Some(delay);
        }
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        if let Ok(mut s) = self.state.lock() {
            s.unreachable = !reachable;
        }
    }

    /// Make every `commit` fail with a transport error.
    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut s) = self.state.lock() {
            s.fail_writes = fail;
        }
    }

    pub fn document(&self, collection: Collection, key: &str) -> Option<Value> {
        let s = self.state.lock().ok()?;
        find(&s.docs, collection, key).cloned()
    }

    pub fn documents(&self, collection: Collection) -> Vec<Value> {
        self.state
            .lock()
            .map(|s| collection_values(&s.docs, collection))
            .unwrap_or_default()
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.state.lock().map(|s| s.commits).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.collection_subs.len() + s.document_subs.len())
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, RemoteError> {
        self.state
            .lock()
            .map_err(|_| RemoteError::Transport("remote state lock poisoned".to_string()))
    }

    fn detach(state: &Weak<Mutex<State>>, id: u64) {
        if let Some(state) = state.upgrade() {
            if let Ok(mut s) = state.lock() {
                s.collection_subs.retain(|(sub, ..)| *sub != id);
                s.document_subs.retain(|(sub, ..)| *sub != id);
            }
        }
    }
}

impl core::fmt::Debug for InMemoryRemoteStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryRemoteStore")
            .field("commits", &self.commit_count())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn ping(&self) -> Result<(), RemoteError> {
        let (unreachable, delay) = {
            let s = self.lock()?;
            (s.unreachable, s.probe_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if unreachable {
            return Err(RemoteError::Unreachable);
        }
        Ok(())
    }

    async fn is_empty(&self, collection: Collection) -> Result<bool, RemoteError> {
        let s = self.lock()?;
        if s.unreachable {
            return Err(RemoteError::Unreachable);
        }
        Ok(s.docs.get(&collection).is_none_or(|docs| docs.is_empty()))
    }

    async fn commit(&self, ops: &[WriteOp]) -> Result<(), RemoteError> {
        let pushes = {
            let mut s = self.lock()?;
            if s.unreachable {
                return Err(RemoteError::Unreachable);
            }
            if s.fail_writes {
                return Err(RemoteError::Transport("injected write failure".to_string()));
            }

            // Apply to a copy so a failing op leaves nothing visible.
            let mut next = s.docs.clone();
            for op in ops {
                apply(&mut next, op)?;
            }
            s.docs = next;
            s.commits += 1;

            let mut touched: Vec<Collection> = ops.iter().map(WriteOp::collection).collect();
            touched.sort();
            touched.dedup();
            pending_pushes(&s, &touched)
        };

        for push in pushes {
            push.deliver();
        }
        Ok(())
    }

    fn subscribe(&self, collection: Collection, callback: CollectionCallback) -> RemoteSubscription {
        let (id, initial) = match self.state.lock() {
            Ok(mut s) => {
                let id = s.next_sub;
                s.next_sub += 1;
                s.collection_subs.push((id, collection, callback.clone()));
                (id, collection_values(&s.docs, collection))
            }
            Err(_) => {
                tracing::error!(%collection, "remote state poisoned; subscription not attached");
                return RemoteSubscription::noop();
            }
        };

        callback(initial);

        let state = Arc::downgrade(&self.state);
        RemoteSubscription::new(move || Self::detach(&state, id))
    }

    fn subscribe_singleton(&self, collection: Collection, key: &str, callback: DocumentCallback) -> RemoteSubscription {
        let (id, initial) = match self.state.lock() {
            Ok(mut s) => {
                let id = s.next_sub;
                s.next_sub += 1;
                s.document_subs.push((id, collection, key.to_string(), callback.clone()));
                (id, find(&s.docs, collection, key).cloned())
            }
            Err(_) => {
                tracing::error!(%collection, key, "remote state poisoned; subscription not attached");
                return RemoteSubscription::noop();
            }
        };

        callback(initial);

        let state = Arc::downgrade(&self.state);
        RemoteSubscription::new(move || Self::detach(&state, id))
    }
}

fn find<'a>(docs: &'a Documents, collection: Collection, key: &str) -> Option<&'a Value> {
    docs.get(&collection)?
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v)
}

fn collection_values(docs: &Documents, collection: Collection) -> Vec<Value> {
    docs.get(&collection)
        .map(|entries| entries.iter().map(|(_, v)| v.clone()).collect())
        .unwrap_or_default()
}

fn apply(docs: &mut Documents, op: &WriteOp) -> Result<(), RemoteError> {
    match op {
        WriteOp::Set {
            collection,
            key,
            value,
            merge,
        } => {
            let entries = docs.entry(*collection).or_default();
            match entries.iter_mut().find(|(k, _)| k == key) {
                Some((_, existing)) => match (existing, value) {
                    (Value::Object(current), Value::Object(fields)) if *merge => {
                        for (field, v) in fields {
                            current.insert(field.clone(), v.clone());
                        }
                    }
                    (existing, _) => *existing = value.clone(),
                },
                None => entries.push((key.clone(), value.clone())),
            }
        }
        WriteOp::Delete { collection, key } => {
            if let Some(entries) = docs.get_mut(collection) {
                entries.retain(|(k, _)| k != key);
            }
        }
        WriteOp::Increment {
            collection,
            key,
            field,
            delta,
        } => {
            let doc = docs
                .get_mut(collection)
                .and_then(|entries| entries.iter_mut().find(|(k, _)| k == key))
                .map(|(_, v)| v)
                .ok_or_else(|| RemoteError::NotFound {
                    collection: *collection,
                    key: key.clone(),
                })?;

            let Value::Object(fields) = doc else {
                return Err(RemoteError::Rejected(format!("{collection}/{key} is not an object")));
            };
            let current = match fields.get(field) {
                None | Some(Value::Null) => 0,
                Some(v) => v
                    .as_i64()
                    .ok_or_else(|| RemoteError::Rejected(format!("{collection}/{key}.{field} is not an integer")))?,
            };
            fields.insert(field.clone(), Value::from(current + delta));
        }
    }
    Ok(())
}

fn pending_pushes(s: &State, touched: &[Collection]) -> Vec<Push> {
    let mut pushes = Vec::new();
    for (_, collection, cb) in &s.collection_subs {
        if touched.contains(collection) {
            pushes.push(Push::Collection(cb.clone(), collection_values(&s.docs, *collection)));
        }
    }
    for (_, collection, key, cb) in &s.document_subs {
        if touched.contains(collection) {
            pushes.push(Push::Document(cb.clone(), find(&s.docs, *collection, key).cloned()));
        }
    }
    pushes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorder() -> (CollectionCallback, Arc<Mutex<Vec<Vec<Value>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb: CollectionCallback = Arc::new(move |docs| sink.lock().unwrap().push(docs));
        (cb, seen)
    }

    #[tokio::test]
    async fn subscribe_pushes_current_value_then_changes() {
        let store = InMemoryRemoteStore::new();
        store
            .commit(&[WriteOp::set(Collection::Areas, "1", json!({"id": "1", "nombre": "Salones"}))])
            .await
            .unwrap();

        let (cb, seen) = recorder();
        let _sub = store.subscribe(Collection::Areas, cb);
        store
            .commit(&[WriteOp::set(Collection::Areas, "2", json!({"id": "2", "nombre": "Bodegas"}))])
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].len(), 1);
        assert_eq!(seen[1].len(), 2);
    }

    #[tokio::test]
    async fn merge_keeps_unmentioned_fields() {
        let store = InMemoryRemoteStore::new();
        store
            .commit(&[WriteOp::set(Collection::Products, "p1", json!({"id": "p1", "stock_actual": 5, "marca": "X"}))])
            .await
            .unwrap();
        store
            .commit(&[WriteOp::merge(Collection::Products, "p1", json!({"stock_actual": 9}))])
            .await
            .unwrap();

        let doc = store.document(Collection::Products, "p1").unwrap();
        assert_eq!(doc["stock_actual"], 9);
        assert_eq!(doc["marca"], "X");
    }

    #[tokio::test]
    async fn failing_op_leaves_batch_invisible() {
        let store = InMemoryRemoteStore::new();
        let err = store
            .commit(&[
                WriteOp::set(Collection::Areas, "1", json!({"id": "1"})),
                WriteOp::increment(Collection::Products, "missing", "stock_actual", -1),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, RemoteError::NotFound { .. }));
        assert!(store.documents(Collection::Areas).is_empty());
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn increments_compose() {
        let store = InMemoryRemoteStore::new();
        store
            .commit(&[WriteOp::set(Collection::Products, "p1", json!({"id": "p1", "stock_actual": 10}))])
            .await
            .unwrap();
        store
            .commit(&[WriteOp::increment(Collection::Products, "p1", "stock_actual", -3)])
            .await
            .unwrap();
        store
            .commit(&[WriteOp::increment(Collection::Products, "p1", "stock_actual", -2)])
            .await
            .unwrap();

        assert_eq!(store.document(Collection::Products, "p1").unwrap()["stock_actual"], 5);
    }

    #[tokio::test]
    async fn convenience_writes_go_through_commit() {
        let store = InMemoryRemoteStore::new();
        store
            .batch_write(
                Collection::Products,
                vec![("p1".to_string(), json!({"id": "p1", "stock_actual": 4}))],
                true,
            )
            .await
            .unwrap();
        store.increment_field(Collection::Products, "p1", "stock_actual", -1).await.unwrap();
        store
            .write_singleton(Collection::Config, "security", json!({"masterPassword": "x"}))
            .await
            .unwrap();

        assert_eq!(store.document(Collection::Products, "p1").unwrap()["stock_actual"], 3);
        assert!(store.document(Collection::Config, "security").is_some());
        assert_eq!(store.commit_count(), 3);
    }

    #[tokio::test]
    async fn unreachable_store_rejects_everything() {
        let store = InMemoryRemoteStore::unreachable();
        assert!(!store.probe(Duration::from_millis(100)).await);
        assert_eq!(store.commit(&[]).await, Err(RemoteError::Unreachable));
        assert_eq!(store.is_empty(Collection::Products).await, Err(RemoteError::Unreachable));
    }

    #[tokio::test]
    async fn dropped_subscription_stops_receiving() {
        let store = InMemoryRemoteStore::new();
        let (cb, seen) = recorder();
        let sub = store.subscribe(Collection::Employees, cb);
        assert_eq!(store.subscriber_count(), 1);
        drop(sub);
        assert_eq!(store.subscriber_count(), 0);

        store
            .commit(&[WriteOp::set(Collection::Employees, "e1", json!({"id": "e1"}))])
            .await
            .unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn document_subscription_sees_singleton() {
        let store = InMemoryRemoteStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = store.subscribe_singleton(
            Collection::Config,
            "security",
            Arc::new(move |doc| sink.lock().unwrap().push(doc)),
        );
        store
            .commit(&[WriteOp::set(Collection::Config, "security", json!({"supervisorPin": "4321"}))])
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], None);
        assert_eq!(seen[1].as_ref().unwrap()["supervisorPin"], "4321");
    }
}
