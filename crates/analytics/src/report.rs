use chrono::Duration;
use core_types::ExitReason;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A comprehensive, standardized report of a backtest's performance.
///
/// This struct is the final output of the `AnalyticsEngine` and is carried in
/// every `BacktestResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    // I. Core Profitability Metrics
    pub initial_capital: Decimal,
    pub final_equity: Decimal,
    pub total_net_profit: Decimal,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub total_commission: Decimal,
    pub profit_factor: Option<Decimal>, // None when there are no losing trades
    pub total_return_pct: Decimal,

    // II. Risk and Drawdown (daily equity curve)
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: Decimal,
    pub annualized_volatility: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    pub sortino_ratio: Option<f64>,
    pub calmar_ratio: Option<f64>,
    /// One-day historical value at risk at 95%, as a positive fraction of equity.
    pub value_at_risk_95: Option<f64>,

    // III. Trade-Level Statistics
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub arbitrage_trades: usize,
    pub win_rate_pct: Option<Decimal>,
    pub average_win: Decimal,
    pub average_loss: Decimal,
    pub payoff_ratio: Option<Decimal>,
    pub exits: BTreeMap<ExitReason, usize>,

    // IV. Time-Based Metrics
    #[serde(with = "humantime_serde")]
    pub average_holding_period: std::time::Duration,
    pub average_holding_bars: f64,
}

impl PerformanceReport {
    /// Creates a zeroed-out report for a run that started with `initial_capital`.
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            initial_capital,
            final_equity: initial_capital,
            total_net_profit: Decimal::ZERO,
            gross_profit: Decimal::ZERO,
            gross_loss: Decimal::ZERO,
            total_commission: Decimal::ZERO,
            profit_factor: None,
            total_return_pct: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            max_drawdown_pct: Decimal::ZERO,
            annualized_volatility: None,
            sharpe_ratio: None,
            sortino_ratio: None,
            calmar_ratio: None,
            value_at_risk_95: None,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            arbitrage_trades: 0,
            win_rate_pct: None,
            average_win: Decimal::ZERO,
            average_loss: Decimal::ZERO,
            payoff_ratio: None,
            exits: BTreeMap::new(),
            average_holding_period: std::time::Duration::ZERO,
            average_holding_bars: 0.0,
        }
    }

    pub(crate) fn set_average_holding(&mut self, average: Duration) {
        self.average_holding_period = average.to_std().unwrap_or_default();
    }
}

impl Default for PerformanceReport {
    fn default() -> Self {
        Self::new(Decimal::ZERO)
    }
}
