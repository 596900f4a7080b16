//! Error types shared by the trading loop, the registry and broker clients.
//!
//! Configuration and connect failures surface to the caller of `start`;
//! per-cycle failures are recovered inside the loop and recorded as `ERROR`
//! trades.

use std::time::Duration;
use thiserror::Error;

/// Missing or invalid session configuration. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A field is outside its allowed range.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Manual signal mode with no parseable signal line.
    #[error("no valid signals in signal text ({rejected} line(s) rejected)")]
    NoSignals {
        /// Number of lines that failed to parse.
        rejected: usize,
    },

    /// A signal has no asset and no default asset is configured.
    #[error("signal has no asset and no default asset is configured")]
    MissingAsset,

    /// Configuration sources could not be read or merged.
    #[error("failed to load configuration: {0}")]
    Load(String),
}

impl ConfigError {
    /// Creates an invalid-field error.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Failures reported by a broker client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// Login rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Order refused by the broker.
    #[error("order rejected: {0}")]
    Rejected(String),

    /// Network failure talking to the broker.
    #[error("network error: {0}")]
    Network(String),

    /// Broker did not answer in time.
    #[error("broker timeout: {0}")]
    Timeout(String),

    /// The broker session is gone (logged out, disconnected); unrecoverable.
    #[error("broker session lost: {0}")]
    SessionLost(String),

    /// Operation not offered by this broker.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl BrokerError {
    /// Returns true if the session cannot continue after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SessionLost(_))
    }
}

/// A trade cycle that ended without a settled position.
///
/// Recorded as an `ERROR` trade; the stake policy is not advanced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CycleError {
    /// No asset could be resolved for the signal.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The order never opened.
    #[error("placement failed: {0}")]
    Placement(BrokerError),

    /// The broker did not report settlement within the allowed wait.
    #[error("settlement of order {order_id} not known after {}s", .waited.as_secs())]
    SettlementTimeout {
        /// Broker order id.
        order_id: String,
        /// How long the loop waited.
        waited: Duration,
    },

    /// The broker failed while reporting settlement.
    #[error("settlement failed: {0}")]
    Settlement(BrokerError),
}

impl CycleError {
    /// Returns the broker error behind this failure, if any.
    #[must_use]
    pub fn broker_error(&self) -> Option<&BrokerError> {
        match self {
            Self::Placement(err) | Self::Settlement(err) => Some(err),
            Self::Config(_) | Self::SettlementTimeout { .. } => None,
        }
    }

    /// Returns true if the loop must end the session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.broker_error().is_some_and(BrokerError::is_fatal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_field_names_field() {
        let err = ConfigError::invalid("stop_loss", "must not be negative");
        assert_eq!(err.to_string(), "invalid stop_loss: must not be negative");
    }

    #[test]
    fn only_session_lost_is_fatal() {
        assert!(BrokerError::SessionLost("logout".into()).is_fatal());
        assert!(!BrokerError::Rejected("closed".into()).is_fatal());
        assert!(!BrokerError::Network("reset".into()).is_fatal());
    }

    #[test]
    fn cycle_error_fatality_follows_broker_error() {
        let lost = CycleError::Settlement(BrokerError::SessionLost("gone".into()));
        assert!(lost.is_fatal());

        let timeout = CycleError::SettlementTimeout {
            order_id: "42".into(),
            waited: Duration::from_secs(65),
        };
        assert!(!timeout.is_fatal());
        assert!(timeout.to_string().contains("65s"));
    }

    #[test]
    fn missing_asset_converts_into_cycle_error() {
        let err: CycleError = ConfigError::MissingAsset.into();
        assert!(err.broker_error().is_none());
        assert!(err.to_string().contains("no asset"));
    }
}
