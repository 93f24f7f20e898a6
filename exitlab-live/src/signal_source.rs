//! Inbound collaborator: periodic scans for new entry signals.

use async_trait::async_trait;
use thiserror::Error;

use exitlab_core::domain::{Bar, SignalInput};

#[derive(Debug, Clone, PartialEq, Error)]
#[error("signal scan failed: {0}")]
pub struct ScanError(pub String);

/// A raw signal together with the bars that precede it, for regime
/// classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub input: SignalInput,
    pub history: Vec<Bar>,
}

#[async_trait]
pub trait SignalSource: Send {
    async fn scan(&mut self) -> Result<Vec<Candidate>, ScanError>;
}

/// Hands out a fixed list of candidates once, then nothing.
#[derive(Debug, Default)]
pub struct QueuedSignals {
    pending: Vec<Candidate>,
}

impl QueuedSignals {
    pub fn new(pending: Vec<Candidate>) -> Self {
        Self { pending }
    }
}

#[async_trait]
impl SignalSource for QueuedSignals {
    async fn scan(&mut self) -> Result<Vec<Candidate>, ScanError> {
        Ok(std::mem::take(&mut self.pending))
    }
}
