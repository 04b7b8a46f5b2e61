use configuration::Timeframes as TimeframeSettings;
use core_types::{MarketRegime, OrderSide};
use indicators::{mean, resample_closes, resample_volumes, rsi, std_dev, volatility, window_return};
use serde::{Deserialize, Serialize};

/// One analysed timeframe. Higher `priority` wins conflicts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeframeSpec {
    pub label: &'static str,
    pub minutes: u32,
    pub weight: f64,
    pub priority: u8,
}

pub const TIMEFRAMES: [TimeframeSpec; 6] = [
    TimeframeSpec { label: "1m", minutes: 1, weight: 0.05, priority: 1 },
    TimeframeSpec { label: "5m", minutes: 5, weight: 0.10, priority: 2 },
    TimeframeSpec { label: "15m", minutes: 15, weight: 0.15, priority: 3 },
    TimeframeSpec { label: "1h", minutes: 60, weight: 0.25, priority: 4 },
    TimeframeSpec { label: "4h", minutes: 240, weight: 0.25, priority: 5 },
    TimeframeSpec { label: "1d", minutes: 1440, weight: 0.20, priority: 6 },
];

const TREND_WEIGHT: f64 = 0.40;
const MOMENTUM_WEIGHT: f64 = 0.30;
const VOLUME_WEIGHT: f64 = 0.15;
const VOLATILITY_WEIGHT: f64 = 0.15;
/// Window return that maps to roughly 0.76 trend strength.
const TREND_SCALE: f64 = 10.0;
/// Per-bar volatility at which conditions stop counting as calm.
const CALM_VOLATILITY: f64 = 0.05;

/// The fused reading of a single timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeSignal {
    pub label: String,
    pub priority: u8,
    pub weight: f64,
    /// Signed signal in [-1, 1].
    pub value: f64,
    pub strength: f64,
    pub quality: f64,
}

/// Cross-timeframe consensus for one symbol.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CoordinatedSignal {
    pub value: f64,
    pub confidence: f64,
    pub quality: f64,
    pub strength: f64,
    /// `1 / (1 + CV)` of the per-timeframe values.
    pub consistency: f64,
    /// Weight share of timeframes pointing up.
    pub bullish: f64,
    pub bearish: f64,
    pub conflicts: usize,
    pub timeframes_used: usize,
}

impl CoordinatedSignal {
    /// The signal used when no timeframe has enough data.
    pub fn neutral() -> Self {
        Self::default()
    }

    pub fn is_neutral(&self) -> bool {
        self.timeframes_used == 0
    }

    /// Multiplicative score adjustment for a candidate taking `action`.
    pub fn score_multiplier(&self, action: OrderSide, settings: &TimeframeSettings) -> f64 {
        if self.is_neutral() {
            return 1.0;
        }
        let aligned = self.value * action.sign();
        (1.0 + aligned * self.confidence).clamp(settings.multiplier_min, settings.multiplier_max)
    }

    /// True when too little of the timeframe weight agrees with `action`.
    pub fn vetoes(&self, action: OrderSide, regime: MarketRegime, settings: &TimeframeSettings) -> bool {
        if self.is_neutral() {
            return false;
        }
        let fraction = match action {
            OrderSide::Buy => self.bullish,
            OrderSide::Sell => self.bearish,
        };
        let floor = if regime.is_bearish() {
            settings.bear_veto_fraction
        } else {
            settings.veto_fraction
        };
        fraction < floor
    }
}

/// Fuses trend, momentum, volume and volatility readings across timeframes.
#[derive(Debug, Clone)]
pub struct TimeframeSignalCoordinator {
    settings: TimeframeSettings,
    base_minutes: u32,
}

impl TimeframeSignalCoordinator {
    pub fn new(settings: TimeframeSettings, base_minutes: u32) -> Self {
        Self {
            settings,
            base_minutes: base_minutes.max(1),
        }
    }

    pub fn settings(&self) -> &TimeframeSettings {
        &self.settings
    }

    /// Timeframes that can be built from the base bars, with their resample factors.
    /// Timeframes finer than the base interval cannot be derived and are skipped.
    pub fn usable_timeframes(&self) -> impl Iterator<Item = (TimeframeSpec, usize)> + '_ {
        TIMEFRAMES
            .iter()
            .filter(|tf| tf.minutes >= self.base_minutes)
            .map(|tf| (*tf, ((tf.minutes / self.base_minutes) as usize).max(1)))
    }

    pub fn analyze_timeframe(
        &self,
        spec: TimeframeSpec,
        factor: usize,
        closes: &[f64],
        volumes: &[f64],
    ) -> Option<TimeframeSignal> {
        let periods = self.settings.periods;
        let tf_closes = resample_closes(closes, factor);
        if tf_closes.len() < periods + 1 {
            return None;
        }
        let tf_volumes = resample_volumes(volumes, factor);
        let window = &tf_closes[tf_closes.len() - periods - 1..];

        let trend = (window_return(window, periods).ok()? * TREND_SCALE).tanh();
        let direction = if trend >= 0.0 { 1.0 } else { -1.0 };

        let momentum = rsi(window, periods.min(14))
            .map(|r| (r - 50.0) / 50.0)
            .unwrap_or(0.0);

        let volume = if tf_volumes.len() >= periods {
            let recent = &tf_volumes[tf_volumes.len() - 5usize.min(periods)..];
            let base = mean(&tf_volumes[tf_volumes.len() - periods..]);
            if base > 0.0 {
                (mean(recent) / base - 1.0).tanh() * direction
            } else {
                0.0
            }
        } else {
            0.0
        };

        let vol = volatility(window, periods).unwrap_or(0.0);
        let calm = (1.0 - vol / CALM_VOLATILITY).clamp(-1.0, 1.0);
        let volatility_signal = calm * direction;

        let value = (TREND_WEIGHT * trend
            + MOMENTUM_WEIGHT * momentum
            + VOLUME_WEIGHT * volume
            + VOLATILITY_WEIGHT * volatility_signal)
            .clamp(-1.0, 1.0);

        let parts = [trend, momentum, volume, volatility_signal];
        let agreeing = parts
            .iter()
            .filter(|p| p.abs() > f64::EPSILON && p.signum() == value.signum())
            .count();
        let agreement = agreeing as f64 / parts.len() as f64;
        let coverage = (tf_closes.len() as f64 / (2 * periods) as f64).min(1.0);

        Some(TimeframeSignal {
            label: spec.label.to_string(),
            priority: spec.priority,
            weight: spec.weight,
            value,
            strength: value.abs(),
            quality: agreement * coverage,
        })
    }

    /// Produces the coordinated signal from a symbol's visible closes and volumes.
    pub fn coordinate(&self, closes: &[f64], volumes: &[f64]) -> CoordinatedSignal {
        let mut signals: Vec<TimeframeSignal> = self
            .usable_timeframes()
            .filter_map(|(spec, factor)| self.analyze_timeframe(spec, factor, closes, volumes))
            .collect();
        if signals.is_empty() {
            return CoordinatedSignal::neutral();
        }

        let conflicts = self.resolve_conflicts(&mut signals);

        let total_weight: f64 = signals.iter().map(|s| s.weight).sum();
        let effective: f64 = signals.iter().map(|s| s.weight * s.quality).sum();
        let value = if effective > f64::EPSILON {
            signals.iter().map(|s| s.weight * s.quality * s.value).sum::<f64>() / effective
        } else {
            signals.iter().map(|s| s.weight * s.value).sum::<f64>() / total_weight
        };
        let quality = signals.iter().map(|s| s.weight * s.quality).sum::<f64>() / total_weight;

        let values: Vec<f64> = signals.iter().map(|s| s.value).collect();
        let m = mean(&values);
        let consistency = if values.len() < 2 {
            1.0
        } else if m.abs() < f64::EPSILON {
            0.0
        } else {
            1.0 / (1.0 + std_dev(&values) / m.abs())
        };

        let bullish = signals.iter().filter(|s| s.value > 0.0).map(|s| s.weight).sum::<f64>() / total_weight;
        let bearish = signals.iter().filter(|s| s.value < 0.0).map(|s| s.weight).sum::<f64>() / total_weight;

        let strength = value.abs().min(1.0);
        let confidence = (0.5 * strength + 0.3 * quality + 0.2 * consistency).clamp(0.0, 1.0);

        CoordinatedSignal {
            value: value.clamp(-1.0, 1.0),
            confidence,
            quality,
            strength,
            consistency,
            bullish,
            bearish,
            conflicts,
            timeframes_used: signals.len(),
        }
    }

    /// Down-weights the lower-priority side of every strong disagreement.
    fn resolve_conflicts(&self, signals: &mut [TimeframeSignal]) -> usize {
        let limit = self.settings.conflict_strength;
        let mut losers = Vec::new();
        for i in 0..signals.len() {
            for j in (i + 1)..signals.len() {
                let (a, b) = (&signals[i], &signals[j]);
                if a.value.signum() != b.value.signum() && a.strength > limit && b.strength > limit {
                    losers.push(if a.priority < b.priority { i } else { j });
                }
            }
        }
        for &idx in &losers {
            let s = &mut signals[idx];
            s.quality *= 0.8;
            s.value *= 0.9;
            s.strength = s.value.abs();
        }
        losers.len()
    }
}
