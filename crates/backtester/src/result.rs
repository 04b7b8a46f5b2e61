use analytics::PerformanceReport;
use chrono::{DateTime, Utc};
use core_types::{MarketRegime, StrategyId, Trade};
use regime::RegimeTransition;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything a finished (or cancelled) run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub run_id: Uuid,
    pub strategy: StrategyId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Simulated steps processed.
    pub steps: usize,
    pub trades: Vec<Trade>,
    /// End-of-day equity, oldest first.
    pub equity_curve: Vec<(DateTime<Utc>, Decimal)>,
    pub report: PerformanceReport,
    pub regime_transitions: Vec<RegimeTransition>,
    pub final_regime: MarketRegime,
    pub skipped_symbols: Vec<String>,
    pub cancelled: bool,
}

impl BacktestResult {
    pub fn final_equity(&self) -> Decimal {
        self.report.final_equity
    }
}
