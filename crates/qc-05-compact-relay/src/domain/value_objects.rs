//! Value objects for compact relay configuration.

use serde::{Deserialize, Serialize};
use shared_types::TransactionRef;
use thiserror::Error;

/// Misbehaviour score at which a peer is banned and disconnected.
pub const BAN_SCORE: u32 = 100;

/// Configuration validation failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("rerequest_threshold must be a positive finite number, got {0}")]
    InvalidThreshold(f64),

    #[error("rerequest_decay_window_secs must be at least 2, got {0}")]
    DecayWindowTooShort(u64),
}

/// Misbehaviour scores applied to peers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltyScores {
    /// Structurally invalid compact block, re-request or response.
    pub malformed: u32,
    /// Unsolicited announcement, non-capable peer, excessive re-requests.
    pub protocol_violation: u32,
    /// Header fails contextual checks.
    pub invalid_header: u32,
    /// Re-request for a block we have not indexed yet.
    pub premature_request: u32,
    /// Reconstructed block repeats a transaction id.
    pub duplicate_txids: u32,
    /// Re-request response with no session, from an untrusted peer.
    pub unsolicited_response: u32,
}

impl Default for PenaltyScores {
    fn default() -> Self {
        Self {
            malformed: BAN_SCORE,
            protocol_violation: BAN_SCORE,
            invalid_header: BAN_SCORE,
            premature_request: 20,
            duplicate_txids: 10,
            unsolicited_response: 10,
        }
    }
}

/// Compact relay configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Compact block relay on/off.
    pub enabled: bool,
    /// Largest block accepted, in bytes.
    pub max_block_size: u64,
    /// Largest message = multiplier × block size.
    pub message_size_multiplier: u64,
    /// Smallest plausible serialized transaction. Heuristic, tune per platform.
    pub min_tx_size: u64,
    /// Bytes charged per transaction held by a session.
    pub tx_ref_footprint: u64,
    /// Explicit global byte ceiling, replacing the derived one.
    pub memory_ceiling_override: Option<u64>,
    /// Decaying re-request count above which requests are refused.
    pub rerequest_threshold: f64,
    /// Decay per second is `1 - 1/window`.
    pub rerequest_decay_window_secs: u64,
    /// Off for test networks where peers re-request freely.
    pub rerequest_limit_enabled: bool,
    /// Rolling statistics window in ms.
    pub stats_window_ms: u64,
    pub penalties: PenaltyScores,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_block_size: 32_000_000,
            message_size_multiplier: 2,
            min_tx_size: 158,
            tx_ref_footprint: std::mem::size_of::<TransactionRef>() as u64,
            memory_ceiling_override: None,
            rerequest_threshold: 20.0,
            rerequest_decay_window_secs: 600,
            rerequest_limit_enabled: true,
            stats_window_ms: 24 * 60 * 60 * 1000,
            penalties: PenaltyScores::default(),
        }
    }
}

impl RelayConfig {
    /// Global byte ceiling for all sessions together.
    ///
    /// Derived as the largest possible transaction count (largest message
    /// over smallest transaction) times the per-transaction charge.
    pub fn memory_ceiling(&self) -> u64 {
        self.memory_ceiling_override.unwrap_or_else(|| {
            let max_message = self
                .message_size_multiplier
                .saturating_mul(self.max_block_size);
            self.tx_ref_footprint.saturating_mul(max_message) / self.min_tx_size.max(1)
        })
    }

    /// Per-second decay factor of the re-request counter.
    pub fn rerequest_decay(&self) -> f64 {
        1.0 - 1.0 / self.rerequest_decay_window_secs as f64
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("max_block_size", self.max_block_size),
            ("message_size_multiplier", self.message_size_multiplier),
            ("min_tx_size", self.min_tx_size),
            ("tx_ref_footprint", self.tx_ref_footprint),
            ("stats_window_ms", self.stats_window_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        if self.memory_ceiling_override == Some(0) {
            return Err(ConfigError::Zero {
                field: "memory_ceiling_override",
            });
        }
        if !self.rerequest_threshold.is_finite() || self.rerequest_threshold <= 0.0 {
            return Err(ConfigError::InvalidThreshold(self.rerequest_threshold));
        }
        if self.rerequest_decay_window_secs < 2 {
            return Err(ConfigError::DecayWindowTooShort(
                self.rerequest_decay_window_secs,
            ));
        }
        Ok(())
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_memory_ceiling(mut self, bytes: u64) -> Self {
        self.memory_ceiling_override = Some(bytes);
        self
    }

    pub fn with_rerequest_limit(mut self, threshold: f64, decay_window_secs: u64) -> Self {
        self.rerequest_threshold = threshold;
        self.rerequest_decay_window_secs = decay_window_secs;
        self
    }

    pub fn with_rerequest_limit_enabled(mut self, enabled: bool) -> Self {
        self.rerequest_limit_enabled = enabled;
        self
    }

    pub fn with_stats_window_ms(mut self, window_ms: u64) -> Self {
        self.stats_window_ms = window_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_config_defaults() {
        let config = RelayConfig::default();
        assert!(config.enabled);
        assert_eq!(config.rerequest_threshold, 20.0);
        assert_eq!(config.penalties.premature_request, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_memory_ceiling_formula() {
        let config = RelayConfig {
            tx_ref_footprint: 8,
            ..Default::default()
        };
        assert_eq!(config.memory_ceiling(), 8 * 2 * 32_000_000 / 158);
        assert_eq!(config.with_memory_ceiling(1_000).memory_ceiling(), 1_000);
    }

    #[test]
    fn test_decay_factor() {
        let config = RelayConfig::default();
        assert!((config.rerequest_decay() - (1.0 - 1.0 / 600.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_tx = RelayConfig {
            min_tx_size: 0,
            ..Default::default()
        };
        assert_eq!(
            zero_tx.validate(),
            Err(ConfigError::Zero {
                field: "min_tx_size"
            })
        );

        let nan = RelayConfig::default().with_rerequest_limit(f64::NAN, 600);
        assert!(matches!(
            nan.validate(),
            Err(ConfigError::InvalidThreshold(_))
        ));

        let short = RelayConfig::default().with_rerequest_limit(20.0, 1);
        assert_eq!(short.validate(), Err(ConfigError::DecayWindowTooShort(1)));

        let zero_ceiling = RelayConfig::default().with_memory_ceiling(0);
        assert!(zero_ceiling.validate().is_err());
    }

    #[test]
    fn test_config_deserializes_partial_json() {
        let config: RelayConfig =
            serde_json::from_str(r#"{"enabled": false, "penalties": {"duplicate_txids": 5}}"#)
                .unwrap();
        assert!(!config.enabled);
        assert_eq!(config.penalties.duplicate_txids, 5);
        assert_eq!(config.penalties.malformed, BAN_SCORE);
        assert_eq!(config.max_block_size, 32_000_000);
    }
}
