//! Cross-context relay between app instances sharing one device.
//!
//! Every instance holds a clone of the same [`CrossContextBroadcaster`] (the
//! analogue of a named broadcast channel). Posting is lossy and best-effort:
//! with no listeners the message is dropped, and a listener that falls behind
//! skips what it missed. Instances ignore their own messages.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::sync_event::SyncEvent;

/// Identity of one running app instance.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ContextId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A relayed change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub origin: ContextId,
    pub event: SyncEvent,
}

/// Best-effort relay of [`SyncEvent`]s to sibling instances.
#[derive(Debug, Clone)]
pub struct CrossContextBroadcaster {
    tx: broadcast::Sender<ContextMessage>,
    capacity: usize,
}

impl CrossContextBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Messages a listener may fall behind before it starts skipping.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Relay `event`. Returns how many listeners it reached (0 is not an error).
    pub fn post(&self, origin: ContextId, event: SyncEvent) -> usize {
        match self.tx.send(ContextMessage { origin, event }) {
            Ok(n) => n,
            Err(_) => 0,
        }
    }

    /// Listen for messages posted by instances other than `me`.
    pub fn listen(&self, me: ContextId) -> ContextListener {
        ContextListener {
            me,
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CrossContextBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Receiving side held by one instance.
#[derive(Debug)]
pub struct ContextListener {
    me: ContextId,
    rx: broadcast::Receiver<ContextMessage>,
}

impl ContextListener {
    /// Next message from a sibling; `None` once every broadcaster handle is gone.
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if msg.origin == self.me => continue,
                Ok(msg) => return Some(msg.event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "cross-context listener lagged; newer snapshots follow");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<SyncEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(msg) if msg.origin == self.me => continue,
                Ok(msg) => return Some(msg.event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartmaint_core::AppConfig;

    #[test]
    fn own_messages_are_skipped() {
        let bc = CrossContextBroadcaster::new(8);
        let a = ContextId::new();
        let b = ContextId::new();
        let mut listen_a = bc.listen(a);
        let mut listen_b = bc.listen(b);

        bc.post(a, SyncEvent::Config(AppConfig::default()));

        assert!(listen_a.try_recv().is_none());
        assert_eq!(listen_b.try_recv(), Some(SyncEvent::Config(AppConfig::default())));
    }

    #[test]
    fn post_without_listeners_is_not_an_error() {
        let bc = CrossContextBroadcaster::new(8);
        assert_eq!(bc.post(ContextId::new(), SyncEvent::Areas(vec![])), 0);
    }

    #[tokio::test]
    async fn lagging_listener_keeps_latest() {
        let bc = CrossContextBroadcaster::new(2);
        let origin = ContextId::new();
        let mut listener = bc.listen(ContextId::new());

        for i in 0..5u8 {
            let pin = format!("{i:04}");
            bc.post(origin, SyncEvent::Config(AppConfig::new("pw", pin).unwrap()));
        }

        let mut last = None;
        while let Some(ev) = listener.try_recv() {
            last = Some(ev);
        }
        assert_eq!(last, Some(SyncEvent::Config(AppConfig::new("pw", "0004").unwrap())));
        drop(bc);
        assert!(listener.recv().await.is_none());
    }
}
