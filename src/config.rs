//! Tunables for the consensus engine and decision policy.

use crate::error::{QuorumError, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// How the ledger treats a voter who reports a second, different result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Refuse the second vote; the first one stands.
    #[default]
    Reject,
    /// Withdraw the earlier vote and record the new one.
    Replace,
}

/// Configuration shared by the ledger, engine and decision policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuorumConfig {
    /// Minimum metric a result needs to be accepted (default: 0.99)
    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: f64,

    /// Credibility assumed for voters a provider knows nothing about (default: 0.8)
    #[serde(default = "default_credibility")]
    pub default_credibility: f64,

    /// Clamp bound: credibilities are forced into `[epsilon, 1 - epsilon]` (default: 1e-9)
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,

    /// Handling of conflicting votes from one voter (default: reject)
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

fn default_acceptance_threshold() -> f64 {
    0.99
}
fn default_credibility() -> f64 {
    0.8
}
fn default_epsilon() -> f64 {
    1e-9
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: default_acceptance_threshold(),
            default_credibility: default_credibility(),
            epsilon: default_epsilon(),
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

impl QuorumConfig {
    /// Load from JSON; missing file -> defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path)?;
        let config: Self = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field against its admissible range.
    pub fn validate(&self) -> Result<()> {
        if !open_unit(self.acceptance_threshold) {
            return Err(QuorumError::InvalidConfig(format!(
                "acceptance_threshold {} must lie in (0, 1)",
                self.acceptance_threshold
            )));
        }
        if !open_unit(self.default_credibility) {
            return Err(QuorumError::InvalidConfig(format!(
                "default_credibility {} must lie in (0, 1)",
                self.default_credibility
            )));
        }
        if !(self.epsilon > 0.0 && self.epsilon < 0.5) {
            return Err(QuorumError::InvalidConfig(format!(
                "epsilon {} must lie in (0, 0.5)",
                self.epsilon
            )));
        }
        Ok(())
    }
}

fn open_unit(value: f64) -> bool {
    value > 0.0 && value < 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn defaults_are_valid() {
        let config = QuorumConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.acceptance_threshold, 0.99);
        assert_eq!(config.default_credibility, 0.8);
        assert_eq!(config.conflict_policy, ConflictPolicy::Reject);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: QuorumConfig =
            serde_json::from_str(r#"{"acceptance_threshold":0.999,"conflict_policy":"replace"}"#)
                .unwrap();
        assert_eq!(config.acceptance_threshold, 0.999);
        assert_eq!(config.epsilon, 1e-9);
        assert_eq!(config.conflict_policy, ConflictPolicy::Replace);
    }

    #[test]
    fn rejects_out_of_range_fields() {
        let mut config = QuorumConfig {
            acceptance_threshold: 1.0,
            ..QuorumConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(QuorumError::InvalidConfig(_))
        ));
        config.acceptance_threshold = 0.9;
        config.default_credibility = 0.0;
        assert!(config.validate().is_err());
        config.default_credibility = 0.5;
        config.epsilon = 0.0;
        assert!(config.validate().is_err());
        config.epsilon = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let mut path = std::env::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        path.push(format!("credence_missing_{nanos}.json"));
        assert_eq!(QuorumConfig::load(&path).unwrap(), QuorumConfig::default());
    }

    #[test]
    fn load_rejects_invalid_file() {
        let mut path = std::env::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        path.push(format!("credence_config_{nanos}.json"));
        fs::write(&path, r#"{"default_credibility":1.5}"#).unwrap();
        let loaded = QuorumConfig::load(&path);
        fs::remove_file(&path).unwrap();
        assert!(matches!(loaded, Err(QuorumError::InvalidConfig(_))));
    }
}
