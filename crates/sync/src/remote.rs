//! Contract of the networked document store.
//!
//! The remote store holds the same five collections as the device cache, one
//! document per entity keyed by its `id` (config is the single document
//! `config/security`). Writes are batched and atomic; reads arrive only
//! through subscriptions, which push the full current value on attach and
//! after every change.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use smartmaint_events::Collection;

/// Document id of the security config singleton.
pub const CONFIG_DOCUMENT: &str = "security";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote store unreachable")]
    Unreachable,
    #[error("remote store timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("write rejected: {0}")]
    Rejected(String),
    #[error("document {collection}/{key} not found")]
    NotFound { collection: Collection, key: String },
}

impl RemoteError {
    /// Retrying the same batch cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, RemoteError::Rejected(_) | RemoteError::NotFound { .. })
    }
}

/// One operation in an atomic batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOp {
    /// Write a whole document; with `merge` only the given fields are replaced.
    Set {
        collection: Collection,
        key: String,
        value: Value,
        merge: bool,
    },
    Delete { collection: Collection, key: String },
    /// Server-side atomic add of `delta` to a numeric field.
    Increment {
        collection: Collection,
        key: String,
        field: String,
        delta: i64,
    },
}

impl WriteOp {
    pub fn set(collection: Collection, key: impl Into<String>, value: Value) -> Self {
        WriteOp::Set {
            collection,
            key: key.into(),
            value,
            merge: false,
        }
    }

    pub fn merge(collection: Collection, key: impl Into<String>, value: Value) -> Self {
        WriteOp::Set {
            collection,
            key: key.into(),
            value,
            merge: true,
        }
    }

    pub fn delete(collection: Collection, key: impl Into<String>) -> Self {
        WriteOp::Delete {
            collection,
            key: key.into(),
        }
    }

    pub fn increment(collection: Collection, key: impl Into<String>, field: impl Into<String>, delta: i64) -> Self {
        WriteOp::Increment {
            collection,
            key: key.into(),
            field: field.into(),
            delta,
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            WriteOp::Set { collection, .. }
            | WriteOp::Delete { collection, .. }
            | WriteOp::Increment { collection, .. } => *collection,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            WriteOp::Set { key, .. } | WriteOp::Delete { key, .. } | WriteOp::Increment { key, .. } => key,
        }
    }
}

/// Receives every document of a collection, in store order.
pub type CollectionCallback = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// Receives a single document (`None` while it does not exist).
pub type DocumentCallback = Arc<dyn Fn(Option<Value>) + Send + Sync>;

/// Live subscription; detaches when dropped.
pub struct RemoteSubscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl RemoteSubscription {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to detach.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for RemoteSubscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl core::fmt::Debug for RemoteSubscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RemoteSubscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Cheap reachability check.
    async fn ping(&self) -> Result<(), RemoteError>;

    /// Whether `collection` currently holds no documents.
    async fn is_empty(&self, collection: Collection) -> Result<bool, RemoteError>;

    /// Apply `ops` atomically: either all succeed or none is visible.
    async fn commit(&self, ops: &[WriteOp]) -> Result<(), RemoteError>;

    /// Watch every document of `collection`. The current value is pushed once
    /// immediately and again after each change.
    fn subscribe(&self, collection: Collection, callback: CollectionCallback) -> RemoteSubscription;

    /// Watch the single document `collection/key`.
    fn subscribe_singleton(&self, collection: Collection, key: &str, callback: DocumentCallback) -> RemoteSubscription;

    /// All-or-nothing write of many documents of one collection.
    async fn batch_write(&self, collection: Collection, items: Vec<(String, Value)>, merge: bool) -> Result<(), RemoteError> {
        let ops: Vec<WriteOp> = items
            .into_iter()
            .map(|(key, value)| WriteOp::Set {
                collection,
                key,
                value,
                merge,
            })
            .collect();
        self.commit(&ops).await
    }

    async fn write_singleton(&self, collection: Collection, key: &str, value: Value) -> Result<(), RemoteError> {
        self.commit(&[WriteOp::set(collection, key, value)]).await
    }

    async fn increment_field(&self, collection: Collection, key: &str, field: &str, delta: i64) -> Result<(), RemoteError> {
        self.commit(&[WriteOp::increment(collection, key, field, delta)]).await
    }

    /// `ping` bounded by `timeout`; any failure reads as unreachable.
    async fn probe(&self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                tracing::info!(error = %err, "remote probe failed");
                false
            }
            Err(_) => {
                tracing::info!(?timeout, "remote probe timed out");
                false
            }
        }
    }
}

/// Whole-document writes (`Set`, no merge) for every item of a collection.
pub fn batch_set<T, K>(collection: Collection, items: &[T], key_of: K) -> Result<Vec<WriteOp>, serde_json::Error>
where
    T: Serialize,
    K: Fn(&T) -> String,
{
    items
        .iter()
        .map(|item| Ok(WriteOp::set(collection, key_of(item), serde_json::to_value(item)?)))
        .collect()
}

/// Merge writes for every item of a collection.
pub fn batch_merge<T, K>(collection: Collection, items: &[T], key_of: K) -> Result<Vec<WriteOp>, serde_json::Error>
where
    T: Serialize,
    K: Fn(&T) -> String,
{
    items
        .iter()
        .map(|item| Ok(WriteOp::merge(collection, key_of(item), serde_json::to_value(item)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct SlowStore;

    #[async_trait]
    impl RemoteStore for SlowStore {
        async fn ping(&self) -> Result<(), RemoteError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
        async fn is_empty(&self, _: Collection) -> Result<bool, RemoteError> {
            Ok(true)
        }
        async fn commit(&self, _: &[WriteOp]) -> Result<(), RemoteError> {
            Err(RemoteError::Unreachable)
        }
        fn subscribe(&self, _: Collection, _: CollectionCallback) -> RemoteSubscription {
            RemoteSubscription::noop()
        }
        fn subscribe_singleton(&self, _: Collection, _: &str, _: DocumentCallback) -> RemoteSubscription {
            RemoteSubscription::noop()
        }
    }

    #[tokio::test]
    async fn probe_gives_up_after_timeout() {
        assert!(!SlowStore.probe(Duration::from_millis(50)).await);
    }

    #[test]
    fn dropping_a_subscription_detaches_it() {
        let detached = Arc::new(AtomicBool::new(false));
        let flag = detached.clone();
        let sub = RemoteSubscription::new(move || flag.store(true, Ordering::SeqCst));
        assert!(!detached.load(Ordering::SeqCst));
        drop(sub);
        assert!(detached.load(Ordering::SeqCst));
    }

    #[test]
    fn only_rejections_and_missing_documents_are_permanent() {
        assert!(RemoteError::Rejected("not a number".into()).is_permanent());
        assert!(
            RemoteError::NotFound {
                collection: Collection::Products,
                key: "p1".into()
            }
            .is_permanent()
        );
        assert!(!RemoteError::Unreachable.is_permanent());
        assert!(!RemoteError::Timeout(Duration::from_secs(3)).is_permanent());
        assert!(!RemoteError::Transport("reset".into()).is_permanent());
    }

    #[test]
    fn write_ops_serialize_with_tag() {
        let op = WriteOp::increment(Collection::Products, "p1", "stock_actual", -3);
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "increment");
        assert_eq!(json["collection"], "products");
        assert_eq!(json["delta"], -3);
        let back: WriteOp = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
        assert_eq!(back.key(), "p1");
    }
}
