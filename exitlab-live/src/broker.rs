//! Broker collaborator: the authoritative source of open positions and prices.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use exitlab_core::domain::{Direction, Signal};

/// Broker-assigned position identifier.
pub type Ticket = u64;

/// One open position as the broker reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerPosition {
    pub ticket: Ticket,
    pub direction: Direction,
    /// Open size as a fraction of the original size.
    pub size_fraction: f64,
    pub entry_price: f64,
    pub current_price: f64,
    /// When `current_price` was quoted.
    pub quoted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("broker call timed out after {0:?}")]
    Timeout(Duration),

    #[error("broker rejected the request: {0}")]
    Rejected(String),

    #[error("unknown ticket {0}")]
    UnknownTicket(Ticket),
}

impl BrokerError {
    /// Whether retrying the same call can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn open_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    async fn modify_stop(&self, ticket: Ticket, price: f64) -> Result<(), BrokerError>;

    /// Close `fraction` of the original size.
    async fn close_fraction(&self, ticket: Ticket, fraction: f64) -> Result<(), BrokerError>;

    /// Place the entry for an accepted signal with its initial stop.
    async fn open_position(&self, signal: &Signal, stop: f64) -> Result<Ticket, BrokerError>;
}
