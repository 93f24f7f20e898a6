//! Outbound collaborators: trade persistence and operator alerting.

use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use exitlab_core::domain::{ClosedTrade, ExitEvent};

use crate::broker::Ticket;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("trade sink failed: {0}")]
pub struct SinkError(pub String);

/// Persistence for finished positions. Held behind a mutex by the monitor.
#[async_trait]
pub trait TradeSink: Send {
    async fn record(&mut self, ticket: Ticket, trade: &ClosedTrade) -> Result<(), SinkError>;
}

/// Something the operator should hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    /// A partial or full exit was executed at the broker.
    Exit { ticket: Ticket, event: ExitEvent },
    /// A broker action ran out of retries; the transition was discarded.
    BrokerFailure { ticket: Option<Ticket>, detail: String },
    /// The broker reports more open size than the local position.
    SizeMismatch {
        ticket: Ticket,
        local: f64,
        broker: f64,
    },
    /// A position hit an invariant violation and is no longer managed.
    PositionAborted { ticket: Ticket, detail: String },
    /// A closed trade could not be persisted.
    SinkFailure { ticket: Ticket, detail: String },
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exit { ticket, event } => write!(
                f,
                "#{ticket} {} {:.2} @ {:.5} (pnl {:+.5})",
                event.kind, event.fraction, event.price, event.pnl
            ),
            Self::BrokerFailure {
                ticket: Some(ticket),
                detail,
            } => write!(f, "#{ticket} broker failure: {detail}"),
            Self::BrokerFailure { ticket: None, detail } => write!(f, "broker failure: {detail}"),
            Self::SizeMismatch {
                ticket,
                local,
                broker,
            } => write!(
                f,
                "#{ticket} broker size {broker:.4} exceeds local remaining {local:.4}"
            ),
            Self::PositionAborted { ticket, detail } => write!(f, "#{ticket} aborted: {detail}"),
            Self::SinkFailure { ticket, detail } => write!(f, "#{ticket} not persisted: {detail}"),
        }
    }
}

/// Delivery is best-effort; implementations log their own failures.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: Alert);
}

/// Keeps recorded trades in memory.
#[derive(Debug, Default)]
pub struct MemoryTradeSink {
    pub trades: Vec<(Ticket, ClosedTrade)>,
}

#[async_trait]
impl TradeSink for MemoryTradeSink {
    async fn record(&mut self, ticket: Ticket, trade: &ClosedTrade) -> Result<(), SinkError> {
        self.trades.push((ticket, trade.clone()));
        Ok(())
    }
}

/// Collects alerts in memory.
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertSink {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AlertSink for MemoryAlertSink {
    async fn send(&self, alert: Alert) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(alert);
        }
    }
}

/// Writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, alert: Alert) {
        match alert {
            Alert::Exit { .. } => tracing::info!(%alert, "exit"),
            _ => tracing::warn!(%alert, "operator alert"),
        }
    }
}
