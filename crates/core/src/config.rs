//! Security settings singleton and role gating.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Session role.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// Records withdrawals; no access to personnel, reports or security.
    Admin,
    /// Elevated role unlocked by the master password.
    Supervisor,
}

/// Security settings. Exactly one instance exists system-wide
/// (remote document `config/security`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub master_password: String,
    pub supervisor_pin: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            master_password: "admin123".to_string(),
            supervisor_pin: "1234".to_string(),
        }
    }
}

impl AppConfig {
    pub const PIN_LEN: usize = 4;

    /// Build validated settings.
    pub fn new(master_password: impl Into<String>, supervisor_pin: impl Into<String>) -> DomainResult<Self> {
        let config = Self {
            master_password: master_password.into(),
            supervisor_pin: supervisor_pin.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Non-empty master password and a 4-digit numeric PIN.
    pub fn validate(&self) -> DomainResult<()> {
        if self.master_password.is_empty() {
            return Err(DomainError::validation("master password cannot be empty"));
        }
        if self.supervisor_pin.len() != Self::PIN_LEN
            || !self.supervisor_pin.chars().all(|c| c.is_ascii_digit())
        {
            return Err(DomainError::validation("supervisor PIN must be exactly 4 digits"));
        }
        Ok(())
    }

    /// Grant the elevated role when the master password matches.
    pub fn authorize(&self, password: &str) -> DomainResult<Role> {
        if password == self.master_password {
            Ok(Role::Supervisor)
        } else {
            Err(DomainError::Unauthorized)
        }
    }

    pub fn verify_pin(&self, pin: &str) -> bool {
        pin == self.supervisor_pin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_first_boot_settings() {
        let c = AppConfig::default();
        assert_eq!(c.master_password, "admin123");
        assert_eq!(c.supervisor_pin, "1234");
        assert!(c.validate().is_ok());
    }

    #[test]
    fn pin_must_be_four_digits() {
        assert!(AppConfig::new("secret", "12a4").is_err());
        assert!(AppConfig::new("secret", "12345").is_err());
        assert!(AppConfig::new("", "1234").is_err());
        assert!(AppConfig::new("secret", "0007").is_ok());
    }

    #[test]
    fn authorize_grants_supervisor() {
        let c = AppConfig::default();
        assert_eq!(c.authorize("admin123"), Ok(Role::Supervisor));
        assert_eq!(c.authorize("nope"), Err(DomainError::Unauthorized));
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let json = serde_json::to_value(AppConfig::default()).unwrap();
        assert_eq!(json, serde_json::json!({ "masterPassword": "admin123", "supervisorPin": "1234" }));
    }
}
