use crate::error::ConfigError;
use chrono::NaiveDate;
use core_types::StrategyId;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The root configuration structure for the entire application.
///
/// Every section falls back to its `Default`, so a partial `config.toml` is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backtest: Backtest,
    pub simulation: Simulation,
    pub risk_management: RiskManagement,
    pub circuit_breaker: CircuitBreaker,
    pub regime: Regime,
    pub timeframes: Timeframes,
    pub scanner: Scanner,
    pub arbitrage: Arbitrage,
    pub stop_loss: StopLoss,
    pub rotation: Rotation,
    pub concurrency: Concurrency,
    pub logging: Logging,
}

/// Contains parameters for a single backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Backtest {
    /// The symbols eligible for trading (e.g., "BTCUSDT").
    pub universe: Vec<String>,
    pub start_date: NaiveDate,
    /// Inclusive end of the backtest period.
    pub end_date: NaiveDate,
    pub initial_capital: Decimal,
    pub strategy: StrategyId,
    /// Spacing of the input bars, used to resample into coarser timeframes.
    pub bar_interval_minutes: u32,
    pub show_progress: bool,
}

impl Default for Backtest {
    fn default() -> Self {
        Self {
            universe: vec!["BTCUSDT".into(), "ETHUSDT".into(), "SOLUSDT".into()],
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap_or_default(),
            initial_capital: dec!(10000),
            strategy: StrategyId::Adaptive,
            bar_interval_minutes: 60,
            show_progress: true,
        }
    }
}

/// Contains parameters for the fill simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Simulation {
    /// Commission charged on the notional of every fill. 0.001 is 0.1%.
    pub commission_pct: Decimal,
    /// Adverse price move applied to every fill.
    pub slippage_pct: Decimal,
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            commission_pct: dec!(0.001),
            slippage_pct: dec!(0.0005),
        }
    }
}

/// Kelly sizing, staged multipliers and hard portfolio gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskManagement {
    /// Trades required before a record's own Kelly estimate is trusted.
    pub kelly_min_trades: u32,
    pub kelly_default: f64,
    pub kelly_min: f64,
    pub kelly_max: f64,
    /// Per-bar volatility the volatility stage normalises against.
    pub target_volatility: f64,
    /// Average bar notional under which the liquidity stage starts shrinking size.
    pub min_liquidity_notional: f64,
    /// Steps considered "recent" by the trade-frequency decay stage.
    pub frequency_window_steps: usize,
    pub frequency_decay: f64,
    pub frequency_floor: f64,
    /// Normalised entropy of position weights under which the diversification penalty applies.
    pub entropy_threshold: f64,
    pub diversification_penalty: f64,
    /// Capital at risk per symbol, as a fraction of equity.
    pub max_capital_at_risk: f64,
    pub max_total_exposure: f64,
    pub max_correlation_exposure: f64,
    pub correlation_threshold: f64,
    pub correlation_lookback: usize,
    /// Orders below this notional are rejected as dust.
    pub min_order_notional: Decimal,
}

impl Default for RiskManagement {
    fn default() -> Self {
        Self {
            kelly_min_trades: 5,
            kelly_default: 0.3,
            kelly_min: 0.1,
            kelly_max: 0.8,
            target_volatility: 0.02,
            min_liquidity_notional: 50_000.0,
            frequency_window_steps: 24,
            frequency_decay: 0.15,
            frequency_floor: 0.4,
            entropy_threshold: 0.6,
            diversification_penalty: 0.8,
            max_capital_at_risk: 0.15,
            max_total_exposure: 0.60,
            max_correlation_exposure: 0.70,
            correlation_threshold: 0.7,
            correlation_lookback: 40,
            min_order_notional: dec!(10),
        }
    }
}

/// Drawdown circuit breaker and its arbitrage exception.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreaker {
    /// Drawdown above which non-arbitrage trades are blocked, before regime scaling.
    pub base_ceiling: f64,
    /// Drawdown levels at which the capital-at-risk cap tightens, ascending.
    pub tier_drawdowns: Vec<f64>,
    /// Capital-at-risk caps (fraction of equity) matching `tier_drawdowns`.
    pub tier_caps: Vec<f64>,
    pub arbitrage_min_confidence: f64,
    /// Upper bound of the drawdown at which arbitrage is still admitted.
    pub arbitrage_ceiling: f64,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            base_ceiling: 0.5,
            tier_drawdowns: vec![0.5, 0.7, 0.85],
            tier_caps: vec![0.35, 0.25, 0.15],
            arbitrage_min_confidence: 0.1,
            arbitrage_ceiling: 0.9999,
        }
    }
}

/// Regime classification windows, thresholds and hysteresis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Regime {
    pub short_window: usize,
    pub medium_window: usize,
    pub long_window: usize,
    pub short_weight: f64,
    pub medium_weight: f64,
    pub long_weight: f64,
    pub short_threshold: f64,
    pub medium_threshold: f64,
    pub long_threshold: f64,
    /// Threshold widening per missing symbol below five.
    pub small_universe_widening: f64,
    pub mixed_threshold: f64,
    pub low_volatility_threshold: f64,
    pub true_sideways_share: f64,
    /// Mean long-window decline beyond which a strong bear becomes extreme.
    pub extreme_bear_drop: f64,
    pub base_cooldown_minutes: i64,
    pub required_confirmations: u32,
    pub base_confidence_threshold: f64,
    pub turning_point_reversal_share: f64,
    pub turning_point_confirmation_share: f64,
    pub turning_point_confidence: f64,
}

impl Default for Regime {
    fn default() -> Self {
        Self {
            short_window: 10,
            medium_window: 30,
            long_window: 60,
            short_weight: 0.25,
            medium_weight: 0.45,
            long_weight: 0.30,
            short_threshold: 0.01,
            medium_threshold: 0.025,
            long_threshold: 0.05,
            small_universe_widening: 0.1,
            mixed_threshold: 0.4,
            low_volatility_threshold: 0.005,
            true_sideways_share: 0.7,
            extreme_bear_drop: 0.20,
            base_cooldown_minutes: 180,
            required_confirmations: 2,
            base_confidence_threshold: 0.7,
            turning_point_reversal_share: 0.4,
            turning_point_confirmation_share: 0.25,
            turning_point_confidence: 0.95,
        }
    }
}

/// Multi-timeframe signal coordination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeframes {
    /// Resampled closes each timeframe analyses.
    pub periods: usize,
    /// Both sides of a conflict must be stronger than this.
    pub conflict_strength: f64,
    pub veto_fraction: f64,
    pub bear_veto_fraction: f64,
    pub multiplier_min: f64,
    pub multiplier_max: f64,
}

impl Default for Timeframes {
    fn default() -> Self {
        Self {
            periods: 20,
            conflict_strength: 0.5,
            veto_fraction: 0.30,
            bear_veto_fraction: 0.18,
            multiplier_min: 0.5,
            multiplier_max: 2.0,
        }
    }
}

/// Opportunity scoring, ranking and the dynamic entry threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Scanner {
    pub min_history: usize,
    pub bull_multiplier: f64,
    pub bear_multiplier: f64,
    /// Steps inspected by the trade-frequency throttle.
    pub recent_trade_window: usize,
    pub max_recent_trades: usize,
    pub arbitrage_preference_margin: f64,
    pub arbitrage_min_quality: f64,
    pub recovery_drawdown: f64,
    pub recovery_preference_margin: f64,
    /// Base entry thresholds by regime family, before volatility and win-rate scaling.
    pub threshold_bull: f64,
    pub threshold_sideways: f64,
    pub threshold_bear: f64,
    pub threshold_extreme_bear: f64,
    pub threshold_mixed: f64,
    pub threshold_min: f64,
    pub threshold_max: f64,
}

impl Default for Scanner {
    fn default() -> Self {
        Self {
            min_history: 60,
            bull_multiplier: 1.1,
            bear_multiplier: 0.95,
            recent_trade_window: 20,
            max_recent_trades: 5,
            arbitrage_preference_margin: 0.2,
            arbitrage_min_quality: 0.6,
            recovery_drawdown: 0.6,
            recovery_preference_margin: 0.4,
            threshold_bull: 0.50,
            threshold_sideways: 0.60,
            threshold_bear: 0.70,
            threshold_extreme_bear: 0.80,
            threshold_mixed: 0.62,
            threshold_min: 0.3,
            threshold_max: 0.95,
        }
    }
}

/// Parameters shared by the three arbitrage detectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Arbitrage {
    pub min_confidence: f64,
    pub min_expected_return: f64,
    /// Base multiplier on thresholds in bear regimes, scaled per bear phase.
    pub bear_multiplier: f64,
    // statistical
    pub z_entry: f64,
    pub fast_half_life: f64,
    pub slow_half_life: f64,
    pub min_convergence_rate: f64,
    pub max_volatility: f64,
    /// Tolerance on the prior trend return: a statistical entry whose deviation follows
    /// the trend by more than this is skipped.
    pub counter_trend_limit: f64,
    pub statistical_horizon: usize,
    pub statistical_lookback: usize,
    // correlation
    pub min_correlation: f64,
    pub correlation_lookback: usize,
    pub deviation_window: usize,
    pub min_deviation: f64,
    pub min_liquidity_notional: f64,
    pub correlation_max_volatility: f64,
    pub min_correction_rate: f64,
    // temporal reversal
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub momentum_bars: usize,
    pub trend_bars: usize,
    pub reversal_horizon: usize,
}

impl Default for Arbitrage {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            min_expected_return: 0.004,
            bear_multiplier: 1.3,
            z_entry: 2.0,
            fast_half_life: 5.0,
            slow_half_life: 20.0,
            min_convergence_rate: 0.4,
            max_volatility: 0.05,
            counter_trend_limit: 0.002,
            statistical_horizon: 10,
            statistical_lookback: 60,
            min_correlation: 0.7,
            correlation_lookback: 40,
            deviation_window: 5,
            min_deviation: 0.02,
            min_liquidity_notional: 10_000.0,
            correlation_max_volatility: 0.06,
            min_correction_rate: 0.4,
            rsi_period: 14,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            momentum_bars: 3,
            trend_bars: 20,
            reversal_horizon: 5,
        }
    }
}

/// Adaptive stop-loss and exit rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StopLoss {
    /// Hard cap on the stop distance.
    pub max_stop: f64,
    pub take_profit_ratio: f64,
    pub min_take_profit: f64,
    pub profit_protection_trigger: f64,
    pub profit_lock_ratio: f64,
    pub max_holding_periods: usize,
    pub min_holding_periods: usize,
    /// Loss beyond which the minimum holding time is ignored.
    pub emergency_loss: f64,
    /// Holding marks; each crossed mark widens the stop by `holding_step`.
    pub holding_marks: Vec<usize>,
    pub holding_step: f64,
    pub poor_floor: f64,
    pub normal_floor: f64,
    pub excellent_floor: f64,
    pub var_lookback: usize,
}

impl Default for StopLoss {
    fn default() -> Self {
        Self {
            max_stop: 0.15,
            take_profit_ratio: 2.0,
            min_take_profit: 0.04,
            profit_protection_trigger: 0.03,
            profit_lock_ratio: 0.5,
            max_holding_periods: 120,
            min_holding_periods: 3,
            emergency_loss: 0.05,
            holding_marks: vec![12, 24, 48, 72, 96, 120],
            holding_step: 0.1,
            poor_floor: 0.05,
            normal_floor: 0.03,
            excellent_floor: 0.02,
            var_lookback: 120,
        }
    }
}

/// Periodic re-selection of the actively traded symbols.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Rotation {
    pub interval_steps: usize,
    pub top_k: usize,
    pub return_lookback: usize,
    pub trend_lookback: usize,
}

impl Default for Rotation {
    fn default() -> Self {
        Self {
            interval_steps: 24,
            top_k: 3,
            return_lookback: 20,
            trend_lookback: 5,
        }
    }
}

/// Bounds on the per-step worker fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Concurrency {
    pub worker_limit: usize,
    pub step_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
    /// Windows kept per symbol in the analysis caches.
    pub cache_retention: usize,
}

impl Default for Concurrency {
    fn default() -> Self {
        Self {
            worker_limit: 5,
            step_timeout_ms: 2_000,
            shutdown_grace_ms: 1_000,
            cache_retention: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// Default filter directive; `RUST_LOG` overrides it.
    pub level: String,
    /// When set, logs are also written to a daily rolling file here.
    pub directory: Option<String>,
    pub file_prefix: String,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            directory: None,
            file_prefix: "meridian.log".into(),
        }
    }
}

impl Config {
    /// Rejects configurations no run could use. Only structural checks live here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bt = &self.backtest;
        if bt.end_date < bt.start_date {
            return invalid(format!(
                "end_date {} is before start_date {}",
                bt.end_date, bt.start_date
            ));
        }
        if bt.initial_capital <= Decimal::ZERO {
            return invalid(format!("initial_capital must be positive, got {}", bt.initial_capital));
        }
        if bt.universe.is_empty() {
            return invalid("backtest.universe must name at least one symbol".into());
        }
        let mut seen = HashSet::new();
        for symbol in &bt.universe {
            if symbol.trim().is_empty() || !seen.insert(symbol.as_str()) {
                return invalid(format!("invalid or duplicate symbol '{symbol}' in universe"));
            }
        }
        if bt.bar_interval_minutes == 0 {
            return invalid("bar_interval_minutes must be at least 1".into());
        }

        let sim = &self.simulation;
        if sim.commission_pct < Decimal::ZERO || sim.commission_pct >= dec!(0.1) {
            return invalid(format!("commission_pct {} out of range", sim.commission_pct));
        }
        if sim.slippage_pct < Decimal::ZERO || sim.slippage_pct >= dec!(0.1) {
            return invalid(format!("slippage_pct {} out of range", sim.slippage_pct));
        }

        let risk = &self.risk_management;
        if !(0.0 < risk.kelly_min && risk.kelly_min <= risk.kelly_max && risk.kelly_max <= 1.0) {
            return invalid("kelly bounds must satisfy 0 < kelly_min <= kelly_max <= 1".into());
        }
        for (name, value) in [
            ("max_capital_at_risk", risk.max_capital_at_risk),
            ("max_total_exposure", risk.max_total_exposure),
            ("max_correlation_exposure", risk.max_correlation_exposure),
            ("correlation_threshold", risk.correlation_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) || value == 0.0 {
                return invalid(format!("risk_management.{name} must be in (0, 1], got {value}"));
            }
        }
        if risk.target_volatility <= 0.0 {
            return invalid("target_volatility must be positive".into());
        }

        let cb = &self.circuit_breaker;
        if cb.tier_drawdowns.len() != cb.tier_caps.len() {
            return invalid("circuit_breaker tiers and caps must have the same length".into());
        }
        if cb.tier_drawdowns.windows(2).any(|w| w[0] >= w[1]) {
            return invalid("circuit_breaker.tier_drawdowns must be strictly ascending".into());
        }
        if !(0.0 < cb.base_ceiling && cb.base_ceiling < 1.0) || cb.arbitrage_ceiling >= 1.0 {
            return invalid("circuit_breaker ceilings must lie in (0, 1)".into());
        }

        let rg = &self.regime;
        if !(2 <= rg.short_window && rg.short_window < rg.medium_window && rg.medium_window < rg.long_window) {
            return invalid("regime windows must satisfy 2 <= short < medium < long".into());
        }
        if rg.short_weight < 0.0 || rg.medium_weight < 0.0 || rg.long_weight < 0.0 {
            return invalid("regime window weights must be non-negative".into());
        }
        if rg.short_weight + rg.medium_weight + rg.long_weight <= 0.0 {
            return invalid("regime window weights must not all be zero".into());
        }
        if rg.required_confirmations == 0 {
            return invalid("regime.required_confirmations must be at least 1".into());
        }

        if self.timeframes.periods < 2 {
            return invalid("timeframes.periods must be at least 2".into());
        }
        if self.timeframes.multiplier_min > self.timeframes.multiplier_max {
            return invalid("timeframes multiplier bounds are inverted".into());
        }
        if self.scanner.threshold_min > self.scanner.threshold_max {
            return invalid("scanner threshold bounds are inverted".into());
        }
        if self.stop_loss.max_stop <= 0.0 || self.stop_loss.max_stop >= 1.0 {
            return invalid("stop_loss.max_stop must lie in (0, 1)".into());
        }
        if self.rotation.top_k == 0 || self.rotation.interval_steps == 0 {
            return invalid("rotation.top_k and rotation.interval_steps must be at least 1".into());
        }
        if self.concurrency.worker_limit == 0 {
            return invalid("concurrency.worker_limit must be at least 1".into());
        }

        Ok(())
    }
}

fn invalid(message: String) -> Result<(), ConfigError> {
    Err(ConfigError::ValidationError(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn inverted_dates_are_rejected() {
        let mut config = Config::default();
        config.backtest.end_date = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn non_positive_capital_is_rejected() {
        let mut config = Config::default();
        config.backtest.initial_capital = Decimal::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_symbols_are_rejected() {
        let mut config = Config::default();
        config.backtest.universe = vec!["BTCUSDT".into(), "BTCUSDT".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn kelly_bounds_are_checked() {
        let mut config = Config::default();
        config.risk_management.kelly_min = 0.9;
        config.risk_management.kelly_max = 0.5;
        assert!(config.validate().is_err());
    }
}
