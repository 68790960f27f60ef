//! Error types for minerhat.

use crate::contribution::Amount;
use thiserror::Error;

/// Main error type for minerhat.
#[derive(Error, Debug)]
pub enum MinerHatError {
    #[error("Miner policy error: {0}")]
    Policy(String),

    #[error("Miner process error: {0}")]
    Process(String),

    #[error("Mining pool unavailable: {0}")]
    PoolUnavailable(String),

    #[error("A checkout is already in progress for this player. Try again later.")]
    CheckoutInProgress,

    #[error("Not enough revenue: requested {requested}, available {available}")]
    InsufficientRevenue { requested: Amount, available: Amount },

    #[error("Exchange amount {amount} is below the minimum of {minimum}")]
    ExchangeAmountTooSmall { amount: Amount, minimum: Amount },

    #[error("Exchange settlement failed, withdrawal was rolled back: {0}")]
    ExchangeSettlement(String),

    #[error("Exchange settlement failed ({deposit}) and the rollback was not saved: {storage}")]
    ExchangeRollback { deposit: String, storage: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Contribution storage error: {0}")]
    Storage(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MinerHatError {
    /// Errors caused by player input rather than infrastructure.
    ///
    /// These are shown to the player verbatim and are not logged as errors.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::CheckoutInProgress
                | Self::InsufficientRevenue { .. }
                | Self::ExchangeAmountTooSmall { .. }
                | Self::InvalidAmount(_)
        )
    }
}

/// Result type alias for minerhat operations.
pub type Result<T> = std::result::Result<T, MinerHatError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_insufficient_revenue_message() {
        let err = MinerHatError::InsufficientRevenue {
            requested: "5".parse().unwrap(),
            available: "3".parse().unwrap(),
        };
        let msg = err.to_string();
        assert!(msg.contains("requested 5.0"));
        assert!(msg.contains("available 3.0"));
    }

    #[test]
    fn test_exchange_too_small_message() {
        let err = MinerHatError::ExchangeAmountTooSmall {
            amount: "0.0001".parse().unwrap(),
            minimum: "0.01".parse().unwrap(),
        };
        let msg = err.to_string();
        assert!(msg.contains("0.0001"));
        assert!(msg.contains("0.01"));
    }

    #[test]
    fn test_settlement_mentions_rollback() {
        let err = MinerHatError::ExchangeSettlement("bank offline".to_string());
        let msg = err.to_string();
        assert!(msg.contains("rolled back"));
        assert!(msg.contains("bank offline"));
    }

    #[test]
    fn test_unsaved_rollback_names_both_failures() {
        let err = MinerHatError::ExchangeRollback {
            deposit: "bank offline".to_string(),
            storage: "disk full".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("bank offline"));
        assert!(msg.contains("disk full"));
        assert!(!err.is_user_facing());
    }

    #[test]
    fn test_user_facing_classification() {
        assert!(MinerHatError::CheckoutInProgress.is_user_facing());
        assert!(MinerHatError::InvalidAmount("x".into()).is_user_facing());
        assert!(!MinerHatError::PoolUnavailable("timeout".into()).is_user_facing());
        assert!(!MinerHatError::Process("spawn".into()).is_user_facing());
        assert!(!MinerHatError::ExchangeSettlement("x".into()).is_user_facing());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: MinerHatError = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ nope").unwrap_err();
        let err: MinerHatError = json_err.into();
        assert!(err.to_string().contains("JSON"));
    }
}
