//! `smartmaint-core`: custody domain building blocks.
//!
//! This crate contains the **pure domain** of the inventory-custody system:
//! entities, identifiers and the invariants that hold on them (stock clamp,
//! area cascades, security settings validation). No IO lives here.

pub mod catalog;
pub mod config;
pub mod entity;
pub mod error;
pub mod id;
pub mod personnel;
pub mod reports;
pub mod seed;
pub mod transaction;

pub use catalog::{Classification, Product, StockWithdrawal, apply_withdrawals};
pub use config::{AppConfig, Role};
pub use entity::{Entity, remove_by_id, upsert_by_id};
pub use error::{DomainError, DomainResult};
pub use id::{AreaId, EmployeeId, ProductId, TransactionId};
pub use personnel::{Area, Employee, cascade_area_delete, cascade_area_rename};
pub use transaction::{Transaction, TransactionItem};
