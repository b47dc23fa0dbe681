//! In-process observer bus.

use std::sync::{Arc, Mutex, Weak, mpsc};

use crate::bus::{EventBus, Subscription};

#[derive(Debug, thiserror::Error)]
pub enum ObserverBusError {
    /// Publish failed due to internal lock poisoning.
    #[error("observer registry lock poisoned")]
    Poisoned,
}

type Callback<M> = Arc<dyn Fn(&M) + Send + Sync>;

struct Registry<M> {
    channels: Vec<mpsc::Sender<M>>,
    callbacks: Vec<(u64, Callback<M>)>,
    next_id: u64,
}

/// In-process pub/sub for observers.
///
/// - No IO / no async
/// - Channel subscribers ([`EventBus::subscribe`]) and callback subscribers
///   ([`ObserverBus::subscribe_with`]) both receive every message
/// - Callbacks run on the publishing thread, outside the registry lock, so a
///   callback may itself publish or subscribe
pub struct ObserverBus<M> {
    registry: Arc<Mutex<Registry<M>>>,
}

impl<M> ObserverBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback; it stays registered until the handle is dropped
    /// or [`ObserverHandle::unsubscribe`] is called.
    pub fn subscribe_with<F>(&self, callback: F) -> ObserverHandle<M>
    where
        F: Fn(&M) + Send + Sync + 'static,
    {
        let id = match self.registry.lock() {
            Ok(mut reg) => {
                let id = reg.next_id;
                reg.next_id += 1;
                reg.callbacks.push((id, Arc::new(callback)));
                id
            }
            Err(_) => {
                tracing::error!("observer registry poisoned; callback not registered");
                u64::MAX
            }
        };

        ObserverHandle {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Number of live observers (channels whose receiver is still alive are
    /// only pruned on the next publish).
    pub fn observer_count(&self) -> usize {
        self.registry
            .lock()
            .map(|reg| reg.channels.len() + reg.callbacks.len())
            .unwrap_or(0)
    }
}

impl<M> Default for ObserverBus<M> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                channels: Vec::new(),
                callbacks: Vec::new(),
                next_id: 0,
            })),
        }
    }
}

impl<M> core::fmt::Debug for ObserverBus<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObserverBus")
            .field("observers", &self.observer_count())
            .finish()
    }
}

impl<M> EventBus<M> for ObserverBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = ObserverBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let callbacks: Vec<Callback<M>> = {
            let mut reg = self.registry.lock().map_err(|_| ObserverBusError::Poisoned)?;

            // Drop any dead subscribers while publishing.
            reg.channels.retain(|tx| tx.send(message.clone()).is_ok());
            reg.callbacks.iter().map(|(_, cb)| cb.clone()).collect()
        };

        for cb in callbacks {
            cb(&message);
        }

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive messages until the process restarts.
        if let Ok(mut reg) = self.registry.lock() {
            reg.channels.push(tx);
        }

        Subscription::new(rx)
    }
}

/// Unsubscribe handle for a callback observer.
pub struct ObserverHandle<M> {
    id: u64,
    registry: Weak<Mutex<Registry<M>>>,
}

impl<M> ObserverHandle<M> {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl<M> Drop for ObserverHandle<M> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut reg) = registry.lock() {
                reg.callbacks.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn channel_subscribers_see_messages_in_order() {
        let bus = ObserverBus::new();
        let sub = bus.subscribe();
        for i in 0..5 {
            bus.publish(i).unwrap();
        }
        assert_eq!(sub.drain(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn dropped_channel_subscribers_are_pruned() {
        let bus = ObserverBus::new();
        let sub = bus.subscribe();
        drop(sub);
        bus.publish(1u8).unwrap();
        assert_eq!(bus.observer_count(), 0);
    }

    #[test]
    fn callbacks_stop_after_handle_drop() {
        let bus = ObserverBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let handle = bus.subscribe_with(move |_: &u8| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(1).unwrap();
        handle.unsubscribe();
        bus.publish(2).unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callbacks_may_republish_without_deadlock() {
        let bus = Arc::new(ObserverBus::new());
        let sub = bus.subscribe();
        let inner = Arc::downgrade(&bus);
        let _handle = bus.subscribe_with(move |m: &u32| {
            if *m == 1 {
                if let Some(bus) = inner.upgrade() {
                    bus.publish(2).unwrap();
                }
            }
        });

        bus.publish(1).unwrap();
        assert_eq!(sub.drain(), vec![1, 2]);
    }
}
