use crate::error::AnalyticsError;
use crate::report::PerformanceReport;
use chrono::{DateTime, Duration, Utc};
use core_types::Trade;
use rust_decimal::prelude::*;

/// Crypto markets trade every day of the year.
const PERIODS_PER_YEAR: f64 = 365.0;

/// A stateless calculator for deriving performance metrics from trading activity.
#[derive(Debug, Default)]
pub struct AnalyticsEngine {}

impl AnalyticsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// The main entry point for calculating performance metrics.
    ///
    /// # Arguments
    ///
    /// * `trades` - All completed `Trade`s of the run.
    /// * `equity_curve` - End-of-day portfolio equity, oldest first.
    /// * `initial_capital` - The starting capital of the run.
    pub fn calculate(
        &self,
        trades: &[Trade],
        equity_curve: &[(DateTime<Utc>, Decimal)],
        initial_capital: Decimal,
    ) -> Result<PerformanceReport, AnalyticsError> {
        if initial_capital <= Decimal::ZERO {
            return Err(AnalyticsError::Calculation(format!(
                "initial capital must be positive, got {initial_capital}"
            )));
        }
        let mut report = PerformanceReport::new(initial_capital);
        if let Some((_, last)) = equity_curve.last() {
            report.final_equity = *last;
        }

        self.calculate_profitability(trades, &mut report);
        self.calculate_drawdown(equity_curve, &mut report);
        self.calculate_time_metrics(trades, &mut report);
        self.calculate_ratios(equity_curve, &mut report);

        tracing::debug!(
            trades = report.total_trades,
            net = %report.total_net_profit,
            sharpe = ?report.sharpe_ratio,
            "performance report calculated"
        );
        Ok(report)
    }

    /// Calculates all profitability-related metrics from realized trades.
    fn calculate_profitability(&self, trades: &[Trade], report: &mut PerformanceReport) {
        report.total_trades = trades.len();

        for trade in trades {
            let pnl = trade.pnl();
            report.total_net_profit += pnl;
            report.total_commission += trade.total_commission();

            if pnl > Decimal::ZERO {
                report.gross_profit += pnl;
                report.winning_trades += 1;
            } else {
                report.gross_loss += pnl.abs();
                report.losing_trades += 1;
            }
            if trade.origin.is_arbitrage() {
                report.arbitrage_trades += 1;
            }
            *report.exits.entry(trade.exit_reason).or_insert(0) += 1;
        }

        if report.gross_loss > Decimal::ZERO {
            report.profit_factor = Some(report.gross_profit / report.gross_loss);
        }

        if report.total_trades > 0 {
            report.win_rate_pct = Some(
                (Decimal::from(report.winning_trades) / Decimal::from(report.total_trades))
                    * Decimal::ONE_HUNDRED,
            );
        }

        if report.winning_trades > 0 {
            report.average_win = report.gross_profit / Decimal::from(report.winning_trades);
        }

        if report.losing_trades > 0 {
            report.average_loss = report.gross_loss / Decimal::from(report.losing_trades);
            if report.average_loss > Decimal::ZERO {
                report.payoff_ratio = Some(report.average_win / report.average_loss);
            }
        }

        report.total_return_pct =
            (report.final_equity - report.initial_capital) / report.initial_capital * Decimal::ONE_HUNDRED;
    }

    /// Calculates maximum drawdown from the equity curve.
    fn calculate_drawdown(&self, equity_curve: &[(DateTime<Utc>, Decimal)], report: &mut PerformanceReport) {
        let Some(&(_, first)) = equity_curve.first() else {
            return;
        };
        let mut peak_equity = first;

        for &(_timestamp, equity) in equity_curve {
            if equity > peak_equity {
                peak_equity = equity;
            }
            let drawdown = peak_equity - equity;
            if drawdown > report.max_drawdown {
                report.max_drawdown = drawdown;
                if peak_equity > Decimal::ZERO {
                    report.max_drawdown_pct = drawdown / peak_equity * Decimal::ONE_HUNDRED;
                }
            }
        }
    }

    /// Sharpe, Sortino, Calmar and VaR from daily returns (risk-free rate 0).
    fn calculate_ratios(&self, equity_curve: &[(DateTime<Utc>, Decimal)], report: &mut PerformanceReport) {
        let equity: Vec<f64> = equity_curve
            .iter()
            .map(|(_, e)| e.to_f64().unwrap_or(0.0))
            .collect();
        let returns = indicators::returns(&equity);
        if returns.len() < 2 {
            return;
        }

        let mean = indicators::mean(&returns);
        let sd = indicators::std_dev(&returns);
        let annualizer = PERIODS_PER_YEAR.sqrt();
        if sd > 0.0 {
            report.annualized_volatility = Some(sd * annualizer);
            report.sharpe_ratio = Some(mean / sd * annualizer);
        }

        let downside =
            (returns.iter().map(|r| r.min(0.0).powi(2)).sum::<f64>() / returns.len() as f64).sqrt();
        if downside > 0.0 {
            report.sortino_ratio = Some(mean / downside * annualizer);
        }

        report.value_at_risk_95 = indicators::percentile(&returns, 0.05).map(|q| (-q).max(0.0));

        let max_dd = report.max_drawdown_pct.to_f64().unwrap_or(0.0) / 100.0;
        let initial = report.initial_capital.to_f64().unwrap_or(0.0);
        let last = equity.last().copied().unwrap_or(initial);
        if max_dd > 0.0 && initial > 0.0 && last > 0.0 {
            let years = returns.len() as f64 / PERIODS_PER_YEAR;
            let annual_return = (last / initial).powf(1.0 / years) - 1.0;
            report.calmar_ratio = Some(annual_return / max_dd);
        }
    }

    /// Calculates time-based metrics.
    fn calculate_time_metrics(&self, trades: &[Trade], report: &mut PerformanceReport) {
        if trades.is_empty() {
            return;
        }

        let total_duration_secs: i64 = trades
            .iter()
            .map(|t| (t.exit_execution.timestamp - t.entry_execution.timestamp).num_seconds())
            .sum();
        report.set_average_holding(Duration::seconds(total_duration_secs / trades.len() as i64));

        let total_bars: usize = trades.iter().map(|t| t.holding_periods).sum();
        report.average_holding_bars = total_bars as f64 / trades.len() as f64;
    }
}
