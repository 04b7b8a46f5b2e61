//! The three arbitrage detectors.
//!
//! Each detector looks at the same read-only [`MarketView`] and emits
//! [`ArbitrageSignal`]s for symbols that can currently be entered. In bear
//! regimes the confidence and expected-return floors are raised by the
//! bear-phase multiplier.

use configuration::Arbitrage as ArbitrageSettings;
use core_types::{ArbitrageKind, ArbitrageSignal, OrderSide, RiskTier};
use indicators::{
    correlation, ew_zscore_path, ewma, mean, returns, rsi, std_dev, volatility, window_return,
};
use regime::RegimeSnapshot;

/// Fewer replayed samples than this fall back to an uninformative prior.
const MIN_REPLAY_SAMPLES: usize = 3;
const REPLAY_PRIOR: f64 = 0.5;
const VOLATILITY_WINDOW: usize = 20;

/// One symbol's visible history.
#[derive(Debug, Clone, Copy)]
pub struct SeriesView<'a> {
    pub symbol: &'a str,
    pub closes: &'a [f64],
    pub volumes: &'a [f64],
    /// False when a position is already open, so no new entry may be proposed.
    pub tradable: bool,
}

/// The universe as seen by the detectors at one step, ordered by symbol.
#[derive(Debug, Clone, Default)]
pub struct MarketView<'a> {
    series: Vec<SeriesView<'a>>,
}

impl<'a> MarketView<'a> {
    pub fn new(mut series: Vec<SeriesView<'a>>) -> Self {
        series.sort_by(|a, b| a.symbol.cmp(b.symbol));
        Self { series }
    }

    pub fn series(&self) -> &[SeriesView<'a>] {
        &self.series
    }

    pub fn tradable(&self) -> impl Iterator<Item = &SeriesView<'a>> {
        self.series.iter().filter(|s| s.tradable)
    }
}

/// A source of arbitrage signals.
pub trait ArbitrageDetector: Send + Sync {
    fn kind(&self) -> ArbitrageKind;

    fn detect(&self, market: &MarketView<'_>, regime: &RegimeSnapshot) -> Vec<ArbitrageSignal>;
}

/// Confidence and return floors after bear-phase scaling.
fn floors(settings: &ArbitrageSettings, regime: &RegimeSnapshot) -> (f64, f64) {
    let m = regime.threshold_multiplier(settings.bear_multiplier);
    (
        (settings.min_confidence * m).min(1.0),
        settings.min_expected_return * m,
    )
}

fn recent_volatility(closes: &[f64]) -> Option<f64> {
    let window = VOLATILITY_WINDOW.min(closes.len().saturating_sub(1));
    volatility(closes, window).ok()
}

fn replay_rate(hits: usize, samples: usize) -> f64 {
    if samples < MIN_REPLAY_SAMPLES {
        REPLAY_PRIOR
    } else {
        hits as f64 / samples as f64
    }
}

// =============================================================================
// Statistical
// =============================================================================

/// Mean reversion of price toward its fast/slow EWMA midpoint.
#[derive(Debug, Clone)]
pub struct StatisticalArbitrage {
    settings: ArbitrageSettings,
}

impl StatisticalArbitrage {
    pub fn new(settings: ArbitrageSettings) -> Self {
        Self { settings }
    }

    /// Share of past excursions beyond 0.8 of the entry z that had at least
    /// halved `horizon` bars later. The slow EWMA warm-up is skipped.
    fn convergence_rate(&self, path: &[f64], z_now: f64) -> f64 {
        let h = self.settings.statistical_horizon;
        let floor = self.settings.z_entry * 0.8;
        let warmup = self.settings.slow_half_life.ceil() as usize;
        let mut samples = 0;
        let mut converged = 0;
        for t in warmup.max(1)..path.len().saturating_sub(h + 1) {
            let z = path[t];
            if z.signum() != z_now.signum() || z.abs() < floor {
                continue;
            }
            samples += 1;
            if path[t + h].abs() < z.abs() * 0.5 {
                converged += 1;
            }
        }
        replay_rate(converged, samples)
    }

    fn evaluate(&self, series: &SeriesView<'_>, min_conf: f64, min_ret: f64) -> Option<ArbitrageSignal> {
        let s = &self.settings;
        let closes = series.closes;
        if closes.len() < s.statistical_lookback.max(s.trend_bars + 2) {
            return None;
        }

        let path = ew_zscore_path(closes, s.fast_half_life, s.slow_half_life);
        let z = *path.last()?;
        if z.abs() < s.z_entry {
            return None;
        }
        let direction = if z < 0.0 { OrderSide::Buy } else { OrderSide::Sell };

        // Trend before the deviating bar; a deviation moving with it is not reversion.
        let trend = window_return(&closes[..closes.len() - 1], s.trend_bars).ok()?;
        if trend * direction.sign() < -s.counter_trend_limit {
            return None;
        }

        let vol = recent_volatility(closes)?;
        if vol > s.max_volatility {
            return None;
        }

        let rate = self.convergence_rate(&path, z);
        if rate < s.min_convergence_rate {
            return None;
        }

        let price = closes[closes.len() - 1];
        let center = (ewma(closes, s.fast_half_life)? + ewma(closes, s.slow_half_life)?) / 2.0;
        let expected_return = ((center - price) / price).abs();
        let confidence = (0.6 * rate + 0.4 * (z.abs() / (2.0 * s.z_entry)).min(1.0)).clamp(0.0, 1.0);
        if confidence < min_conf || expected_return < min_ret {
            return None;
        }

        Some(ArbitrageSignal {
            kind: ArbitrageKind::Statistical,
            primary: series.symbol.to_string(),
            secondary: None,
            direction,
            expected_return,
            confidence,
            supporting_stat: z,
            horizon: s.statistical_horizon,
            risk_tier: RiskTier::from_volatility(vol),
        })
    }
}

impl ArbitrageDetector for StatisticalArbitrage {
    fn kind(&self) -> ArbitrageKind {
        ArbitrageKind::Statistical
    }

    fn detect(&self, market: &MarketView<'_>, regime: &RegimeSnapshot) -> Vec<ArbitrageSignal> {
        let (min_conf, min_ret) = floors(&self.settings, regime);
        market
            .tradable()
            .filter_map(|series| self.evaluate(series, min_conf, min_ret))
            .collect()
    }
}

// =============================================================================
// Correlation
// =============================================================================

/// A highly correlated pair whose members have desynchronised; buys the laggard.
#[derive(Debug, Clone)]
pub struct CorrelationArbitrage {
    settings: ArbitrageSettings,
}

struct PairLeg<'a> {
    series: &'a SeriesView<'a>,
    closes: &'a [f64],
    window_return: f64,
    sd: f64,
}

impl CorrelationArbitrage {
    pub fn new(settings: ArbitrageSettings) -> Self {
        Self { settings }
    }

    fn required_history(&self) -> usize {
        self.settings.correlation_lookback + self.settings.deviation_window + 1
    }

    fn liquid(&self, closes: &[f64], volumes: &[f64]) -> bool {
        let n = self.settings.correlation_lookback.min(closes.len()).min(volumes.len());
        if n == 0 {
            return false;
        }
        let notionals: Vec<f64> = closes[closes.len() - n..]
            .iter()
            .zip(&volumes[volumes.len() - n..])
            .map(|(p, v)| p * v)
            .collect();
        mean(&notionals) >= self.settings.min_liquidity_notional
    }

    /// Past deviations of at least the minimum size, and how often the laggard caught up.
    fn correction_rate(&self, lag: &[f64], lead: &[f64], beta: f64) -> f64 {
        let dw = self.settings.deviation_window;
        let ret = |c: &[f64], from: usize, to: usize| if c[from] == 0.0 { 0.0 } else { c[to] / c[from] - 1.0 };
        let last_start = lag.len().saturating_sub(1 + 2 * dw);
        let mut samples = 0;
        let mut corrected = 0;
        for start in 0..last_start {
            let end = start + dw;
            let gap = ret(lag, start, end) - beta * ret(lead, start, end);
            if gap > -self.settings.min_deviation {
                continue;
            }
            samples += 1;
            let next = ret(lag, end, end + dw) - beta * ret(lead, end, end + dw);
            if next >= gap.abs() * 0.5 {
                corrected += 1;
            }
        }
        replay_rate(corrected, samples)
    }

    fn evaluate_pair(
        &self,
        a: &SeriesView<'_>,
        b: &SeriesView<'_>,
        min_conf: f64,
        min_ret: f64,
    ) -> Vec<ArbitrageSignal> {
        let s = &self.settings;
        let (dw, lookback) = (s.deviation_window, s.correlation_lookback);
        let n = a.closes.len().min(b.closes.len());
        if n < self.required_history() {
            return Vec::new();
        }
        let ca = &a.closes[a.closes.len() - n..];
        let cb = &b.closes[b.closes.len() - n..];

        // Correlation is measured strictly before the deviation window.
        let pre = n - 1 - dw;
        let ra = returns(&ca[pre - lookback..=pre]);
        let rb = returns(&cb[pre - lookback..=pre]);
        let rho = correlation(&ra, &rb);
        if rho.abs() < s.min_correlation {
            return Vec::new();
        }

        let (Ok(ret_a), Ok(ret_b)) = (window_return(ca, dw), window_return(cb, dw)) else {
            return Vec::new();
        };
        let legs = [
            PairLeg { series: a, closes: ca, window_return: ret_a, sd: std_dev(&ra) },
            PairLeg { series: b, closes: cb, window_return: ret_b, sd: std_dev(&rb) },
        ];

        let mut out = Vec::new();
        for (lag, lead) in [(&legs[0], &legs[1]), (&legs[1], &legs[0])] {
            if !lag.series.tradable || lead.sd <= f64::EPSILON {
                continue;
            }
            let beta = rho * lag.sd / lead.sd;
            let gap = lag.window_return - beta * lead.window_return;
            if gap > -s.min_deviation {
                continue;
            }
            if !self.liquid(lag.series.closes, lag.series.volumes)
                || !self.liquid(lead.series.closes, lead.series.volumes)
            {
                continue;
            }
            let Some(vol) = recent_volatility(lag.closes) else {
                continue;
            };
            if vol > s.correlation_max_volatility {
                continue;
            }
            let rate = self.correction_rate(&lag.closes[..=pre], &lead.closes[..=pre], beta);
            if rate < s.min_correction_rate {
                continue;
            }

            let expected_return = gap.abs() * rate;
            let confidence = (0.5 * rho.abs()
                + 0.3 * rate
                + 0.2 * (gap.abs() / (2.0 * s.min_deviation)).min(1.0))
            .clamp(0.0, 1.0);
            if confidence < min_conf || expected_return < min_ret {
                continue;
            }

            tracing::debug!(
                lagging = lag.series.symbol,
                leading = lead.series.symbol,
                rho,
                gap,
                "correlation desync detected"
            );
            out.push(ArbitrageSignal {
                kind: ArbitrageKind::Correlation,
                primary: lag.series.symbol.to_string(),
                secondary: Some(lead.series.symbol.to_string()),
                direction: OrderSide::Buy,
                expected_return,
                confidence,
                supporting_stat: rho,
                horizon: dw,
                risk_tier: RiskTier::from_volatility(vol),
            });
        }
        out
    }
}

impl ArbitrageDetector for CorrelationArbitrage {
    fn kind(&self) -> ArbitrageKind {
        ArbitrageKind::Correlation
    }

    fn detect(&self, market: &MarketView<'_>, regime: &RegimeSnapshot) -> Vec<ArbitrageSignal> {
        let (min_conf, min_ret) = floors(&self.settings, regime);
        let series = market.series();
        let mut out = Vec::new();
        for i in 0..series.len() {
            for j in (i + 1)..series.len() {
                out.extend(self.evaluate_pair(&series[i], &series[j], min_conf, min_ret));
            }
        }
        out
    }
}

// =============================================================================
// Temporal reversal
// =============================================================================

/// RSI extreme plus short-term momentum turning against a conflicting trend.
#[derive(Debug, Clone)]
pub struct TemporalReversal {
    settings: ArbitrageSettings,
}

impl TemporalReversal {
    pub fn new(settings: ArbitrageSettings) -> Self {
        Self { settings }
    }

    fn evaluate(&self, series: &SeriesView<'_>, min_conf: f64, min_ret: f64) -> Option<ArbitrageSignal> {
        let s = &self.settings;
        let closes = series.closes;
        let r = rsi(closes, s.rsi_period).ok()?;
        let momentum = window_return(closes, s.momentum_bars).ok()?;
        let trend = window_return(closes, s.trend_bars).ok()?;

        let direction = if r < s.rsi_oversold && momentum > 0.0 && trend < 0.0 {
            OrderSide::Buy
        } else if r > s.rsi_overbought && momentum < 0.0 && trend > 0.0 {
            OrderSide::Sell
        } else {
            return None;
        };

        let vol = recent_volatility(closes)?;
        let expected_return = (trend.abs() * 0.5).min(0.10);
        let confidence = (0.5 * ((r - 50.0).abs() / 50.0)
            + 0.3 * (momentum.abs() / 0.02).min(1.0)
            + 0.2)
            .clamp(0.0, 1.0);
        if confidence < min_conf || expected_return < min_ret {
            return None;
        }

        Some(ArbitrageSignal {
            kind: ArbitrageKind::TemporalReversal,
            primary: series.symbol.to_string(),
            secondary: None,
            direction,
            expected_return,
            confidence,
            supporting_stat: r,
            horizon: s.reversal_horizon,
            risk_tier: RiskTier::from_volatility(vol),
        })
    }
}

impl ArbitrageDetector for TemporalReversal {
    fn kind(&self) -> ArbitrageKind {
        ArbitrageKind::TemporalReversal
    }

    fn detect(&self, market: &MarketView<'_>, regime: &RegimeSnapshot) -> Vec<ArbitrageSignal> {
        let (min_conf, min_ret) = floors(&self.settings, regime);
        market
            .tradable()
            .filter_map(|series| self.evaluate(series, min_conf, min_ret))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::MarketRegime;

    fn regime() -> RegimeSnapshot {
        RegimeSnapshot::fixed(MarketRegime::Sideways)
    }

    /// A wavy common path shared by both members of a pair.
    fn common_path(n: usize) -> Vec<f64> {
        let mut price = 100.0;
        (0..n)
            .map(|i| {
                price *= 1.0 + 0.01 * ((i as f64) * 0.7).sin();
                price
            })
            .collect()
    }

    #[test]
    fn correlation_desync_buys_the_laggard() {
        let base = common_path(70);
        let lag = base.clone();
        let mut lead = base.clone();
        let n = lead.len();
        for (k, price) in lead[n - 5..].iter_mut().enumerate() {
            *price *= 1.02f64.powi(k as i32 + 1);
        }
        let volumes = vec![1_000.0; n];

        let view = MarketView::new(vec![
            SeriesView { symbol: "LEAD", closes: &lead, volumes: &volumes, tradable: true },
            SeriesView { symbol: "LAG", closes: &lag, volumes: &volumes, tradable: true },
        ]);
        let signals = CorrelationArbitrage::new(ArbitrageSettings::default()).detect(&view, &regime());

        assert_eq!(signals.len(), 1, "{signals:?}");
        let signal = &signals[0];
        assert_eq!(signal.primary, "LAG");
        assert_eq!(signal.secondary.as_deref(), Some("LEAD"));
        assert_eq!(signal.direction, OrderSide::Buy);
        assert_eq!(signal.kind, ArbitrageKind::Correlation);
        assert!(signal.supporting_stat > 0.99);
    }

    #[test]
    fn open_positions_are_not_re_entered() {
        let base = common_path(70);
        let mut lead = base.clone();
        let n = lead.len();
        for price in lead[n - 5..].iter_mut() {
            *price *= 1.1;
        }
        let volumes = vec![1_000.0; n];
        let view = MarketView::new(vec![
            SeriesView { symbol: "LEAD", closes: &lead, volumes: &volumes, tradable: true },
            SeriesView { symbol: "LAG", closes: &base, volumes: &volumes, tradable: false },
        ]);
        let signals = CorrelationArbitrage::new(ArbitrageSettings::default()).detect(&view, &regime());
        assert!(signals.is_empty());
    }

    #[test]
    fn illiquid_pairs_are_ignored() {
        let base = common_path(70);
        let mut lead = base.clone();
        let n = lead.len();
        for price in lead[n - 5..].iter_mut() {
            *price *= 1.1;
        }
        let thin = vec![1.0; n];
        let view = MarketView::new(vec![
            SeriesView { symbol: "LEAD", closes: &lead, volumes: &thin, tradable: true },
            SeriesView { symbol: "LAG", closes: &base, volumes: &thin, tradable: true },
        ]);
        assert!(CorrelationArbitrage::new(ArbitrageSettings::default()).detect(&view, &regime()).is_empty());
    }

    #[test]
    fn statistical_buys_a_sharp_dip() {
        let mut closes: Vec<f64> = (0..80).map(|i| 100.0 + 0.3 * ((i as f64) * 0.9).sin()).collect();
        closes.push(96.5);
        let volumes = vec![1_000.0; closes.len()];
        let view = MarketView::new(vec![SeriesView { symbol: "DIP", closes: &closes, volumes: &volumes, tradable: true }]);

        let signals = StatisticalArbitrage::new(ArbitrageSettings::default()).detect(&view, &regime());
        assert_eq!(signals.len(), 1, "{signals:?}");
        assert_eq!(signals[0].direction, OrderSide::Buy);
        assert!(signals[0].supporting_stat < -2.0);
        assert!(signals[0].expected_return > 0.02);
    }

    /// A drifting path with a small wave, then a 6% drop on the last bar.
    fn drift_then_dip(drift: f64) -> Vec<f64> {
        let mut closes: Vec<f64> = (0..150)
            .map(|i| 100.0 * (1.0 + drift).powi(i) * (1.0 + 0.003 * (f64::from(i) * 0.9).sin()))
            .collect();
        let last = closes[closes.len() - 1];
        closes.push(last * 0.94);
        closes
    }

    #[test]
    fn statistical_dip_against_the_trend_is_bought() {
        let closes = drift_then_dip(0.0005);
        let volumes = vec![1_000.0; closes.len()];
        let view = MarketView::new(vec![SeriesView { symbol: "UP", closes: &closes, volumes: &volumes, tradable: true }]);

        let signals = StatisticalArbitrage::new(ArbitrageSettings::default()).detect(&view, &regime());
        assert_eq!(signals.len(), 1, "{signals:?}");
        assert_eq!(signals[0].direction, OrderSide::Buy);
    }

    #[test]
    fn statistical_dip_with_the_trend_is_skipped() {
        let closes = drift_then_dip(-0.001);
        let volumes = vec![1_000.0; closes.len()];
        let view = MarketView::new(vec![SeriesView { symbol: "DOWN", closes: &closes, volumes: &volumes, tradable: true }]);

        let signals = StatisticalArbitrage::new(ArbitrageSettings::default()).detect(&view, &regime());
        assert!(signals.is_empty(), "{signals:?}");
    }

    #[test]
    fn temporal_reversal_needs_all_three_conditions() {
        let mut closes: Vec<f64> = vec![100.0; 10];
        let mut price = 100.0;
        for _ in 0..25 {
            price *= 0.97;
            closes.push(price);
        }
        // Oversold with a falling trend, but momentum still down: no signal.
        let volumes = vec![1_000.0; 40];
        let detector = TemporalReversal::new(ArbitrageSettings::default());
        let view = MarketView::new(vec![SeriesView { symbol: "X", closes: &closes, volumes: &volumes, tradable: true }]);
        assert!(detector.detect(&view, &regime()).is_empty());

        // A small bounce turns 3-bar momentum up while RSI stays oversold.
        for _ in 0..3 {
            price *= 1.003;
            closes.push(price);
        }
        let view = MarketView::new(vec![SeriesView { symbol: "X", closes: &closes, volumes: &volumes, tradable: true }]);
        let signals = detector.detect(&view, &regime());
        assert_eq!(signals.len(), 1, "{signals:?}");
        assert_eq!(signals[0].direction, OrderSide::Buy);
        assert!(signals[0].supporting_stat < 30.0);
    }

    #[test]
    fn bear_phase_raises_floors() {
        let settings = ArbitrageSettings::default();
        let calm = floors(&settings, &RegimeSnapshot::fixed(MarketRegime::Sideways));
        let bear = floors(&settings, &RegimeSnapshot::fixed(MarketRegime::StrongBear));
        assert!(bear.0 > calm.0);
        assert!(bear.1 > calm.1);
    }
}
