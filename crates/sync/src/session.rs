//! Session connectivity state.
//!
//! The mode is decided exactly once per session by the startup probe and
//! never changes afterwards, even if connectivity does.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::SyncMode;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session mode already decided ({0})")]
    AlreadyDecided(SyncMode),
    #[error("session is {0}; operation requires cloud sync")]
    NotCloudActive(SyncMode),
}

#[derive(Debug, Clone)]
pub struct SessionState {
    mode: SyncMode,
    decided_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            mode: SyncMode::Uninitialized,
            decided_at: None,
        }
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn decided_at(&self) -> Option<DateTime<Utc>> {
        self.decided_at
    }

    /// Record the probe outcome. Only the first decision sticks.
    pub fn decide(&mut self, mode: SyncMode) -> Result<(), SessionError> {
        if self.mode != SyncMode::Uninitialized {
            return Err(SessionError::AlreadyDecided(self.mode));
        }
        self.mode = mode;
        self.decided_at = Some(Utc::now());
        Ok(())
    }

    pub fn is_cloud_active(&self) -> bool {
        self.mode == SyncMode::CloudActive
    }

    pub fn require_cloud(&self) -> Result<(), SessionError> {
        if self.is_cloud_active() {
            Ok(())
        } else {
            Err(SessionError::NotCloudActive(self.mode))
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
