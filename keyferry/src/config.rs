//! Engine tuning knobs.
//!
//! Every field has a default; a config file only needs to name what it
//! changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ownership::DEFAULT_NOISE_PHRASES;
use crate::redemption::RetryConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub auth: AuthConfig,
    pub inventory: InventoryConfig,
    pub matching: MatchConfig,
    pub redemption: RedemptionConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.auth.validate()?;
        self.inventory.validate()?;
        self.matching.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Interval between login status polls.
    pub poll_interval_ms: u64,
    /// How long a QR challenge is polled before giving up.
    pub qr_max_wait_secs: u64,
    /// How long a credential login waits for device approval.
    pub login_max_wait_secs: u64,
    /// Attempts allowed for credentials, and separately for codes.
    pub max_login_attempts: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            qr_max_wait_secs: 180,
            login_max_wait_secs: 120,
            max_login_attempts: 3,
        }
    }
}

impl AuthConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn qr_max_wait(&self) -> Duration {
        Duration::from_secs(self.qr_max_wait_secs)
    }

    pub fn login_max_wait(&self) -> Duration {
        Duration::from_secs(self.login_max_wait_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::config("auth.poll_interval_ms must be greater than 0"));
        }
        if self.max_login_attempts == 0 {
            return Err(Error::config("auth.max_login_attempts must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Concurrent order detail requests.
    pub concurrency: usize,
    /// Failed orders tolerated before the whole fetch is abandoned.
    pub max_failed_orders: usize,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            concurrency: 30,
            max_failed_orders: 5,
        }
    }
}

impl InventoryConfig {
    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::config("inventory.concurrency must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub confident_threshold: f64,
    pub fuzzy_threshold: f64,
    /// Fuzzy matches at or above this are skipped rather than redeemed.
    pub redemption_safe_threshold: f64,
    /// Score discount when only edition wording differs.
    pub edition_penalty: f64,
    pub noise_phrases: Vec<String>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            confident_threshold: 0.95,
            fuzzy_threshold: 0.70,
            redemption_safe_threshold: 0.85,
            edition_penalty: 0.10,
            noise_phrases: DEFAULT_NOISE_PHRASES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl MatchConfig {
    fn validate(&self) -> Result<()> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.confident_threshold)
            || !in_unit(self.fuzzy_threshold)
            || !in_unit(self.redemption_safe_threshold)
        {
            return Err(Error::config("matching thresholds must lie in [0, 1]"));
        }
        if self.fuzzy_threshold > self.confident_threshold {
            return Err(Error::config(
                "matching.fuzzy_threshold must not exceed matching.confident_threshold",
            ));
        }
        if !(0.0..1.0).contains(&self.edition_penalty) {
            return Err(Error::config("matching.edition_penalty must lie in [0, 1)"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedemptionConfig {
    /// Pause after a rate-limit response.
    pub cooldown_secs: u64,
    /// Retries for transport failures on reveal and activation.
    pub retry: RetryConfig,
}

impl Default for RedemptionConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 3600,
            retry: RetryConfig::default(),
        }
    }
}

impl RedemptionConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.inventory.concurrency, 30);
        assert_eq!(config.redemption.cooldown(), Duration::from_secs(3600));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"matching": {"fuzzy_threshold": 0.8}}"#).unwrap();
        assert_eq!(config.matching.fuzzy_threshold, 0.8);
        assert_eq!(config.matching.confident_threshold, 0.95);
        assert_eq!(config.auth.max_login_attempts, 3);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut config = EngineConfig::default();
        config.matching.fuzzy_threshold = 0.99;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.inventory.concurrency = 0;
        assert!(config.validate().is_err());
    }
}
