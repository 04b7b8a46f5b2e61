//! The collaborators a backtest consumes: where bars come from and where results go.

use crate::result::BacktestResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Bar, Trade};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("no bars for symbol {0}")]
    NotFound(String),

    #[error("transient data error for {symbol}: {message}")]
    Transient { symbol: String, message: String },
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error while persisting results: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize results: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Historical bar retrieval.
#[async_trait]
pub trait BarSource: Send + Sync {
    /// Bars for `symbol` stamped in `[start, end]`, oldest first.
    async fn get_historical_bars(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, DataError>;
}

/// Persistence of the trade ledger and the run summary. Failures are logged by
/// the caller and never abort a run.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn persist_trade_record(&self, trade: &Trade) -> Result<(), PersistError>;
    async fn persist_run_summary(&self, result: &BacktestResult) -> Result<(), PersistError>;
}

/// Bars held in memory, keyed by symbol.
#[derive(Debug, Default)]
pub struct InMemoryBarSource {
    bars: BTreeMap<String, Vec<Bar>>,
}

impl InMemoryBarSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bars(mut self, symbol: impl Into<String>, bars: Vec<Bar>) -> Self {
        self.bars.insert(symbol.into(), bars);
        self
    }
}

#[async_trait]
impl BarSource for InMemoryBarSource {
    async fn get_historical_bars(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, DataError> {
        let bars = self
            .bars
            .get(symbol)
            .ok_or_else(|| DataError::NotFound(symbol.to_string()))?;
        Ok(bars
            .iter()
            .filter(|bar| bar.timestamp >= start && bar.timestamp <= end)
            .cloned()
            .collect())
    }
}

/// Keeps every persisted record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    trades: Mutex<Vec<Trade>>,
    summaries: Mutex<Vec<Uuid>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trades(&self) -> Vec<Trade> {
        self.trades.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Run ids of the summaries persisted so far.
    pub fn summaries(&self) -> Vec<Uuid> {
        self.summaries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn persist_trade_record(&self, trade: &Trade) -> Result<(), PersistError> {
        self.trades
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(trade.clone());
        Ok(())
    }

    async fn persist_run_summary(&self, result: &BacktestResult) -> Result<(), PersistError> {
        self.summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result.run_id);
        Ok(())
    }
}
