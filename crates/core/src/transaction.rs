//! Committed withdrawals (append-only history).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::id::{EmployeeId, ProductId, TransactionId};
use crate::personnel::Employee;

/// One product line of a withdrawal.
///
/// `product_name` is captured at withdrawal time so history stays readable
/// after the product is renamed or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionItem {
    #[serde(rename = "producto_id")]
    pub product_id: ProductId,
    #[serde(rename = "cantidad")]
    pub quantity: u32,
    #[serde(rename = "nombre_producto")]
    pub product_name: String,
}

/// A committed withdrawal. Never edited once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    #[serde(rename = "empleado_id")]
    pub employee_id: EmployeeId,
    #[serde(rename = "empleado_nombre")]
    pub employee_name: String,
    #[serde(rename = "fecha")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "productos_entregados")]
    pub items: Vec<TransactionItem>,
    #[serde(rename = "bloqueo_activado")]
    pub anomaly_triggered: bool,
    #[serde(rename = "desbloqueo_supervisor")]
    pub override_used: bool,
    #[serde(
        rename = "notas_supervisor",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub supervisor_note: Option<String>,
}

impl Entity for Transaction {
    type Id = TransactionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Transaction {
    /// A regular (not blocked) withdrawal by `employee`.
    pub fn withdrawal(employee: &Employee, items: Vec<TransactionItem>, at: DateTime<Utc>) -> Self {
        Self {
            id: TransactionId::new(),
            employee_id: employee.id.clone(),
            employee_name: employee.name.clone(),
            timestamp: at,
            items,
            anomaly_triggered: false,
            override_used: false,
            supervisor_note: None,
        }
    }

    /// Mark a withdrawal that went through only because a supervisor overrode the Smart Lock.
    pub fn with_override(mut self, note: impl Into<String>) -> Self {
        self.anomaly_triggered = true;
        self.override_used = true;
        self.supervisor_note = Some(note.into());
        self
    }

    /// Quantity of `product_id` drawn in this transaction (0 if absent).
    pub fn quantity_of(&self, product_id: &ProductId) -> u64 {
        self.items
            .iter()
            .filter(|i| &i.product_id == product_id)
            .map(|i| i.quantity as u64)
            .sum()
    }
}
