use thiserror::Error;

use crate::types::OrderId;

/// Failure reported by a broker adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Network or transport failure; worth retrying.
    #[error("transport error: {0}")]
    Transport(String),

    /// Broker throttled the request; worth retrying.
    #[error("rate limited")]
    RateLimited,

    /// Broker understood the request and refused it.
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// Broker returned something the adapter could not interpret.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl BrokerError {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RateLimited)
    }
}

/// Fatal configuration problem detected at startup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("duplicate strategy name: {0}")]
    DuplicateStrategy(String),

    #[error("strategy {strategy} references unknown broker {broker}")]
    UnknownBroker { strategy: String, broker: String },

    #[error("duplicate broker name: {0}")]
    DuplicateBroker(String),

    #[error("strategy {strategy}: {reason}")]
    InvalidStrategy { strategy: String, reason: String },

    #[error("invalid bot settings: {0}")]
    InvalidSettings(String),

    #[error("no strategies configured")]
    NoStrategies,
}
