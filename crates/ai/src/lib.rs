//! `smartmaint-ai`
//!
//! **Responsibility:** decision helpers that sit beside the domain.
//!
//! - [`SmartLock`]: deterministic consumption-anomaly gate for withdrawals
//! - [`Assistant`]: boundary for the conversational helper (black box)
//!
//! Nothing here mutates domain state; callers act on the returned decisions.

pub mod assistant;
pub mod error;
pub mod smart_lock;

pub use assistant::{Assistant, AssistantReply, Citation, InventoryContext};
pub use error::AiError;
pub use smart_lock::{LockDecision, LockViolation, SmartLock};
