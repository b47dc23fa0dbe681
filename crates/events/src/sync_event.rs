//! Collection tags and change notifications.

use serde::{Deserialize, Serialize};

use smartmaint_core::{AppConfig, Area, Employee, Product, Transaction};

/// The five synchronised collections.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Products,
    Employees,
    Areas,
    Transactions,
    Config,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Products,
        Collection::Employees,
        Collection::Areas,
        Collection::Transactions,
        Collection::Config,
    ];

    /// Remote collection name.
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Products => "products",
            Collection::Employees => "employees",
            Collection::Areas => "areas",
            Collection::Transactions => "transactions",
            Collection::Config => "config",
        }
    }

    /// On-device persisted key.
    pub fn cache_key(&self) -> &'static str {
        match self {
            Collection::Products => "smartmaint_products",
            Collection::Employees => "smartmaint_employees",
            Collection::Areas => "smartmaint_areas",
            Collection::Transactions => "smartmaint_transactions",
            Collection::Config => "smartmaint_config",
        }
    }

    /// Config is a single document (`config/security`), everything else a document collection.
    pub fn is_singleton(&self) -> bool {
        matches!(self, Collection::Config)
    }
}

impl core::fmt::Display for Collection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Change notification: the complete current value of one collection.
///
/// Never a delta. Serialises as `{ "kind": "...", "value": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum SyncEvent {
    Products(Vec<Product>),
    Employees(Vec<Employee>),
    Areas(Vec<Area>),
    Transactions(Vec<Transaction>),
    Config(AppConfig),
}

impl SyncEvent {
    pub fn collection(&self) -> Collection {
        match self {
            SyncEvent::Products(_) => Collection::Products,
            SyncEvent::Employees(_) => Collection::Employees,
            SyncEvent::Areas(_) => Collection::Areas,
            SyncEvent::Transactions(_) => Collection::Transactions,
            SyncEvent::Config(_) => Collection::Config,
        }
    }

    /// Decode a pushed value for `collection`.
    pub fn from_value(collection: Collection, value: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match collection {
            Collection::Products => SyncEvent::Products(serde_json::from_value(value)?),
            Collection::Employees => SyncEvent::Employees(serde_json::from_value(value)?),
            Collection::Areas => SyncEvent::Areas(serde_json::from_value(value)?),
            Collection::Transactions => SyncEvent::Transactions(serde_json::from_value(value)?),
            Collection::Config => SyncEvent::Config(serde_json::from_value(value)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_shape_is_kind_and_value() {
        let ev = SyncEvent::Config(AppConfig::default());
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["kind"], "config");
        assert_eq!(json["value"]["supervisorPin"], "1234");
    }

    #[test]
    fn from_value_rejects_wrong_shape() {
        let err = SyncEvent::from_value(Collection::Areas, serde_json::json!({ "nope": 1 }));
        assert!(err.is_err());
    }

    #[test]
    fn cache_keys_are_distinct() {
        let mut keys: Vec<_> = Collection::ALL.iter().map(|c| c.cache_key()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), Collection::ALL.len());
    }
}
