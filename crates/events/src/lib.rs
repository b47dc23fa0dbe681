//! `smartmaint-events`
//!
//! **Responsibility:** change notification plumbing.
//!
//! - [`SyncEvent`]: "collection X now has value V" (always the full collection)
//! - [`ObserverBus`]: synchronous in-process fan-out to UI observers
//! - [`CrossContextBroadcaster`]: best-effort relay to sibling app instances

pub mod broadcast;
pub mod bus;
pub mod in_memory_bus;
pub mod sync_event;

pub use broadcast::{ContextId, ContextListener, ContextMessage, CrossContextBroadcaster};
pub use bus::{EventBus, Subscription};
pub use in_memory_bus::{ObserverBus, ObserverBusError, ObserverHandle};
pub use sync_event::{Collection, SyncEvent};
