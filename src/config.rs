//! Environment-driven configuration.

use std::env;
use thiserror::Error;

use crate::charge::{Charge, ChargeSchedule};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: expected basis points between 0 and 10000, got '{value}'")]
    InvalidBasisPoints { var: &'static str, value: String },
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Shared secret for webhook signatures. Without it every webhook is refused.
    pub webhook_secret: Option<String>,
    /// Verified emails in this list register as admins.
    pub admin_emails: Vec<String>,
    pub charges: ChargeSchedule,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Build from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        config.webhook_secret = lookup("LYVADS_WEBHOOK_SECRET").filter(|s| !s.is_empty());

        if let Some(emails) = lookup("LYVADS_ADMIN_EMAILS") {
            config.admin_emails = emails
                .split(',')
                .map(|e| e.trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect();
        }

        if let Some(bps) = basis_points(&lookup, "LYVADS_COLLABORATION_CHARGE_BPS")? {
            config.charges.collaboration = Charge::percent(bps);
        }
        if let Some(bps) = basis_points(&lookup, "LYVADS_WITHDRAWAL_CHARGE_BPS")? {
            config.charges.withdrawal = if bps == 0 {
                Charge::inactive()
            } else {
                Charge::percent(bps)
            };
        }

        Ok(config)
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    pub fn with_admin(mut self, email: impl Into<String>) -> Self {
        self.admin_emails.push(email.into().to_lowercase());
        self
    }
}

fn basis_points(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<u32>, ConfigError> {
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    match value.trim().parse::<u32>() {
        Ok(bps) if bps <= Charge::MAX_BPS => Ok(Some(bps)),
        _ => Err(ConfigError::InvalidBasisPoints { var, value }),
    }
}
