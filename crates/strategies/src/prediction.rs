use crate::features::FeatureVector;
use core_types::OrderSide;
use serde::{Deserialize, Serialize};

/// Heuristic stand-in for a learned directional model.
///
/// A logistic over trend, momentum, RSI extremes and range position. It only
/// ever nudges risk adjustment; it never creates an opportunity on its own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MlPrediction {
    /// Probability that the next move is up.
    pub probability_up: f64,
    /// Distance from a coin flip, in [0, 1].
    pub confidence: f64,
}

impl MlPrediction {
    pub fn from_features(features: &FeatureVector) -> Self {
        let z = 3.0 * (features.trend * 20.0).tanh()
            + 2.0 * (features.momentum * 20.0).tanh()
            + 0.5 * (50.0 - features.rsi) / 50.0
            - 0.5 * (features.range_position - 0.5);
        let probability_up = 1.0 / (1.0 + (-z).exp());
        Self {
            probability_up,
            confidence: (probability_up - 0.5).abs() * 2.0,
        }
    }

    pub fn probability_of(&self, action: OrderSide) -> f64 {
        match action {
            OrderSide::Buy => self.probability_up,
            OrderSide::Sell => 1.0 - self.probability_up,
        }
    }

    /// Risk-adjustment factor in [0.9, 1.1].
    pub fn risk_factor(&self, action: OrderSide) -> f64 {
        0.9 + 0.2 * self.probability_of(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(trend: f64, momentum: f64, rsi: f64) -> FeatureVector {
        FeatureVector {
            trend,
            momentum,
            rsi,
            volatility: 0.01,
            volume_ratio: 1.0,
            range_position: 0.5,
            up_share: 0.5,
            price: 100.0,
        }
    }

    #[test]
    fn neutral_features_are_a_coin_flip() {
        let p = MlPrediction::from_features(&features(0.0, 0.0, 50.0));
        assert!((p.probability_up - 0.5).abs() < 1e-12);
        assert!(p.confidence < 1e-12);
        assert!((p.risk_factor(OrderSide::Buy) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn trend_pushes_probability_up() {
        let p = MlPrediction::from_features(&features(0.05, 0.03, 60.0));
        assert!(p.probability_up > 0.9);
        assert!(p.risk_factor(OrderSide::Buy) > 1.08);
        assert!(p.risk_factor(OrderSide::Sell) < 0.92);
    }
}
