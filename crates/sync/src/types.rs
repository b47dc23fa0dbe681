//! Shared types of the sync layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use smartmaint_core::{AppConfig, Area, Employee, Product, Transaction};
use smartmaint_events::Collection;

use crate::remote::WriteOp;

/// Session-wide sync mode, decided once at startup by the connectivity probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `initialize` has not run yet.
    Uninitialized,
    /// Remote store unreachable; the device cache is the only copy.
    LocalOnly,
    /// Probe succeeded; subscriptions attached and writes mirrored remotely.
    CloudActive,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Uninitialized => "uninitialized",
            SyncMode::LocalOnly => "local_only",
            SyncMode::CloudActive => "cloud_active",
        }
    }
}

impl core::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every collection at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub products: Vec<Product>,
    pub employees: Vec<Employee>,
    pub areas: Vec<Area>,
    pub transactions: Vec<Transaction>,
    pub config: AppConfig,
}

/// Status of an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingStatus {
    /// Enqueued, not yet acknowledged by the remote store.
    Pending,
    /// Last attempt failed; replayed on the next reconnect.
    Failed,
    /// The store refused it for good or the row no longer decodes; never replayed.
    Dead,
}

impl PendingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingStatus::Pending => "Pending",
            PendingStatus::Failed => "Failed",
            PendingStatus::Dead => "Dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(PendingStatus::Pending),
            "Failed" => Some(PendingStatus::Failed),
            "Dead" => Some(PendingStatus::Dead),
            _ => None,
        }
    }
}

/// One remote write waiting in the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub seq: i64,
    pub collection: Collection,
    pub ops: Vec<WriteOp>,
    pub status: PendingStatus,
    pub created_at: DateTime<Utc>,
    pub attempted_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Result of replaying the outbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub drained: Vec<i64>,
    /// Entries the remote store refused for good; parked as `Dead`.
    pub dead: Vec<i64>,
    /// Sequence number that failed transiently and stopped the drain.
    pub stopped_at: Option<i64>,
    pub remaining: usize,
}
