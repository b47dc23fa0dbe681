//! Runtime configuration of the sync layer (environment driven).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use thiserror::Error;

pub const ENV_DATA_DIR: &str = "SMARTMAINT_DATA_DIR";
pub const ENV_PROBE_TIMEOUT_MS: &str = "SMARTMAINT_PROBE_TIMEOUT_MS";
pub const ENV_BROADCAST_CAPACITY: &str = "SMARTMAINT_BROADCAST_CAPACITY";

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_BROADCAST_CAPACITY: usize = 256;
const DATABASE_FILE: &str = "smartmaint.db";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error(transparent)]
    Location(#[from] anyhow::Error),
}

/// Sync layer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Directory holding the on-device database.
    pub data_dir: PathBuf,
    /// How long the startup probe may take before the session goes local-only.
    pub probe_timeout: Duration,
    /// Capacity of the cross-context relay channel.
    pub broadcast_capacity: usize,
}

impl SyncSettings {
    /// Settings for a given data directory with default timings.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup` (the environment, a test map, ...).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = match lookup(ENV_DATA_DIR).filter(|v| !v.trim().is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };

        let probe_timeout = match lookup(ENV_PROBE_TIMEOUT_MS) {
            Some(raw) => Duration::from_millis(parse_positive(ENV_PROBE_TIMEOUT_MS, &raw)?),
            None => DEFAULT_PROBE_TIMEOUT,
        };

        let broadcast_capacity = match lookup(ENV_BROADCAST_CAPACITY) {
            Some(raw) => parse_positive(ENV_BROADCAST_CAPACITY, &raw)? as usize,
            None => DEFAULT_BROADCAST_CAPACITY,
        };

        Ok(Self {
            data_dir,
            probe_timeout,
            broadcast_capacity,
        })
    }

    /// `{data_dir}/smartmaint.db` (cache and outbox share the file).
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

fn parse_positive(key: &'static str, raw: &str) -> Result<u64, SettingsError> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(SettingsError::Invalid {
            key,
            reason: "must be greater than zero".to_string(),
        }),
        Ok(v) => Ok(v),
        Err(err) => Err(SettingsError::Invalid {
            key,
            reason: format!("{raw:?} is not a number ({err})"),
        }),
    }
}

/// `{app_data_dir}/smartmaint`, falling back to `~/.local/share/smartmaint`.
fn default_data_dir() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|mut h| {
            h.push(".local");
            h.push("share");
            h
        }))
        .context("failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share")?;

    Ok(base.join("smartmaint"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn explicit_values_are_used() {
        let s = SyncSettings::from_lookup(lookup(&[
            (ENV_DATA_DIR, "/tmp/sm"),
            (ENV_PROBE_TIMEOUT_MS, "1500"),
            (ENV_BROADCAST_CAPACITY, "16"),
        ]))
        .unwrap();

        assert_eq!(s.data_dir, PathBuf::from("/tmp/sm"));
        assert_eq!(s.probe_timeout, Duration::from_millis(1500));
        assert_eq!(s.broadcast_capacity, 16);
        assert_eq!(s.database_path(), PathBuf::from("/tmp/sm/smartmaint.db"));
    }

    #[test]
    fn probe_timeout_defaults_to_three_seconds() {
        let s = SyncSettings::from_lookup(lookup(&[(ENV_DATA_DIR, "/tmp/sm")])).unwrap();
        assert_eq!(s.probe_timeout, Duration::from_secs(3));
        assert_eq!(s.broadcast_capacity, 256);
    }

    #[test]
    fn garbage_numbers_are_rejected() {
        let err = SyncSettings::from_lookup(lookup(&[
            (ENV_DATA_DIR, "/tmp/sm"),
            (ENV_PROBE_TIMEOUT_MS, "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { key: ENV_PROBE_TIMEOUT_MS, .. }));

        let err = SyncSettings::from_lookup(lookup(&[
            (ENV_DATA_DIR, "/tmp/sm"),
            (ENV_BROADCAST_CAPACITY, "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { key: ENV_BROADCAST_CAPACITY, .. }));
    }
}
