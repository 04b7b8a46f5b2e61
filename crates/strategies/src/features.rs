use crate::error::StrategyError;
use core_types::{MarketRegime, OrderSide};
use indicators::{ema, mean, returns, rsi, volatility, window_return};
use serde::{Deserialize, Serialize};

/// Bars a feature vector needs: the slow EMA plus one.
pub const FEATURE_HISTORY: usize = 27;

const W_TREND: f64 = 0.50;
const W_MOMENTUM: f64 = 0.15;
const W_RSI: f64 = 0.08;
const W_VOLATILITY: f64 = 0.10;
const W_VOLUME: f64 = 0.08;
const W_CONSISTENCY: f64 = 0.12;
const WEIGHT_SUM: f64 = W_TREND + W_MOMENTUM + W_RSI + W_VOLATILITY + W_VOLUME + W_CONSISTENCY;

/// Per-symbol technical features computed from visible history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// (EMA12 - EMA26) / EMA26.
    pub trend: f64,
    /// 5-bar return.
    pub momentum: f64,
    pub rsi: f64,
    /// 20-bar return volatility.
    pub volatility: f64,
    /// Average volume of the last 5 bars over the last 20.
    pub volume_ratio: f64,
    /// Position of the price inside its 20-bar range; 0 = support, 1 = resistance.
    pub range_position: f64,
    /// Share of rising bars over the last 20.
    pub up_share: f64,
    pub price: f64,
}

impl FeatureVector {
    pub fn compute(closes: &[f64], volumes: &[f64]) -> Result<Self, StrategyError> {
        if closes.len() < FEATURE_HISTORY {
            return Err(StrategyError::InsufficientHistory {
                needed: FEATURE_HISTORY,
                available: closes.len(),
            });
        }
        let price = closes[closes.len() - 1];
        let slow = ema(closes, 26)?;
        let trend = if slow.abs() > f64::EPSILON { (ema(closes, 12)? - slow) / slow } else { 0.0 };

        let recent = &closes[closes.len() - 21..];
        let lo = recent.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = recent.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let range_position = if hi - lo > f64::EPSILON { (price - lo) / (hi - lo) } else { 0.5 };

        let rets = returns(recent);
        let up_share = rets.iter().filter(|r| **r > 0.0).count() as f64 / rets.len() as f64;

        let volume_ratio = if volumes.len() >= 20 {
            let long = mean(&volumes[volumes.len() - 20..]);
            if long > 0.0 { mean(&volumes[volumes.len() - 5..]) / long } else { 1.0 }
        } else {
            1.0
        };

        Ok(Self {
            trend,
            momentum: window_return(closes, 5)?,
            rsi: rsi(closes, 14)?,
            volatility: volatility(closes, 20)?,
            volume_ratio,
            range_position,
            up_share,
            price,
        })
    }

    /// The direction the features favour.
    pub fn action(&self) -> OrderSide {
        if self.trend >= 0.0 { OrderSide::Buy } else { OrderSide::Sell }
    }

    /// Weighted base score for `action` in [0, 1], before any regime adjustment.
    pub fn base_score(&self, action: OrderSide) -> f64 {
        let trend = 0.5 + 0.5 * (self.trend * 20.0).tanh();
        let momentum = 0.5 + 0.5 * (self.momentum * 20.0).tanh();
        let rsi_reversal = ((70.0 - self.rsi) / 40.0).clamp(0.0, 1.0);
        let consistency = self.up_share;
        let (trend, momentum, rsi_reversal, consistency) = match action {
            OrderSide::Buy => (trend, momentum, rsi_reversal, consistency),
            OrderSide::Sell => (1.0 - trend, 1.0 - momentum, 1.0 - rsi_reversal, 1.0 - consistency),
        };
        let calm = 1.0 - (self.volatility / 0.05).clamp(0.0, 1.0);
        let volume = (self.volume_ratio / 2.0).clamp(0.0, 1.0);

        let raw = W_TREND * trend
            + W_MOMENTUM * momentum
            + W_RSI * rsi_reversal
            + W_VOLATILITY * calm
            + W_VOLUME * volume
            + W_CONSISTENCY * consistency;
        (raw / WEIGHT_SUM).clamp(0.0, 1.0)
    }
}

/// Regime adjustment applied on top of the base score, then clamped to [0, 1].
pub fn regime_adjusted_score(base: f64, regime: MarketRegime, bull: f64, bear: f64) -> f64 {
    let multiplier = match regime.effective() {
        r if r.is_bullish() => bull,
        r if r.is_bearish() => bear,
        _ => 1.0,
    };
    (base * multiplier).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rising(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 * 1.005f64.powi(i as i32)).collect()
    }

    #[test]
    fn short_history_is_rejected() {
        let err = FeatureVector::compute(&rising(10), &[1.0; 10]).unwrap_err();
        assert!(matches!(err, StrategyError::InsufficientHistory { needed: 27, available: 10 }));
    }

    #[test]
    fn uptrend_scores_buys_above_sells() {
        let f = FeatureVector::compute(&rising(80), &[100.0; 80]).unwrap();
        assert_eq!(f.action(), OrderSide::Buy);
        assert!(f.trend > 0.0);
        assert!((f.range_position - 1.0).abs() < 1e-12);
        assert!(f.base_score(OrderSide::Buy) > 0.6);
        assert!(f.base_score(OrderSide::Buy) > f.base_score(OrderSide::Sell));
    }

    #[test]
    fn regime_multiplier_is_clamped() {
        assert_eq!(regime_adjusted_score(0.95, MarketRegime::StrongBull, 1.1, 0.95), 1.0);
        assert!((regime_adjusted_score(0.5, MarketRegime::WeakBear, 1.1, 0.95) - 0.475).abs() < 1e-12);
        assert_eq!(regime_adjusted_score(0.5, MarketRegime::Unknown, 1.1, 0.95), 0.5);
    }

    proptest! {
        #[test]
        fn base_scores_stay_in_unit_interval(
            steps in prop::collection::vec(-0.08f64..0.08, 30..120),
            volumes in prop::collection::vec(0.0f64..1e6, 30..120),
        ) {
            let mut price = 100.0;
            let closes: Vec<f64> = steps.iter().map(|s| { price *= 1.0 + s; price }).collect();
            let f = FeatureVector::compute(&closes, &volumes).unwrap();
            for action in [OrderSide::Buy, OrderSide::Sell] {
                let s = f.base_score(action);
                prop_assert!((0.0..=1.0).contains(&s));
                let adjusted = regime_adjusted_score(s, MarketRegime::StrongBull, 1.1, 0.95);
                prop_assert!((0.0..=1.0).contains(&adjusted));
            }
        }
    }
}
