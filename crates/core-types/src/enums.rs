use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side of the order
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// +1.0 for buys, -1.0 for sells. Used to orient directional signals.
    pub fn sign(&self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }
}

/// The discrete market-condition label shared by every component.
///
/// `Mixed`, `TrueSideways` and `LowVolatility` are derived labels produced by the
/// classifier on top of the five trend labels. `Unknown` only exists before the
/// classifier has seen enough history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    #[default]
    Unknown,
    ExtremeBear,
    StrongBear,
    WeakBear,
    Sideways,
    TrueSideways,
    LowVolatility,
    Mixed,
    WeakBull,
    StrongBull,
}

impl MarketRegime {
    /// Downstream numeric code treats `Unknown` as `Mixed`.
    pub fn effective(self) -> Self {
        match self {
            MarketRegime::Unknown => MarketRegime::Mixed,
            other => other,
        }
    }

    pub fn is_bearish(self) -> bool {
        matches!(
            self,
            MarketRegime::WeakBear | MarketRegime::StrongBear | MarketRegime::ExtremeBear
        )
    }

    pub fn is_bullish(self) -> bool {
        matches!(self, MarketRegime::WeakBull | MarketRegime::StrongBull)
    }

    /// Strong trend regimes earn a longer switching cooldown.
    pub fn is_strong(self) -> bool {
        matches!(
            self,
            MarketRegime::StrongBull | MarketRegime::StrongBear | MarketRegime::ExtremeBear
        )
    }

    pub fn is_extreme(self) -> bool {
        matches!(self, MarketRegime::ExtremeBear | MarketRegime::StrongBear)
    }

    pub fn is_sideways(self) -> bool {
        matches!(
            self,
            MarketRegime::Sideways | MarketRegime::TrueSideways | MarketRegime::LowVolatility
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::Unknown => "unknown",
            MarketRegime::ExtremeBear => "extreme_bear",
            MarketRegime::StrongBear => "strong_bear",
            MarketRegime::WeakBear => "weak_bear",
            MarketRegime::Sideways => "sideways",
            MarketRegime::TrueSideways => "true_sideways",
            MarketRegime::LowVolatility => "low_volatility",
            MarketRegime::Mixed => "mixed",
            MarketRegime::WeakBull => "weak_bull",
            MarketRegime::StrongBull => "strong_bull",
        }
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three arbitrage detection algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbitrageKind {
    Statistical,
    Correlation,
    TemporalReversal,
}

impl fmt::Display for ArbitrageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArbitrageKind::Statistical => "statistical",
            ArbitrageKind::Correlation => "correlation",
            ArbitrageKind::TemporalReversal => "temporal_reversal",
        };
        f.write_str(s)
    }
}

/// Coarse per-opportunity risk classification, derived from recent volatility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    /// Classifies a per-bar return volatility into a tier.
    pub fn from_volatility(volatility: f64) -> Self {
        if volatility < 0.015 {
            RiskTier::Low
        } else if volatility < 0.035 {
            RiskTier::Medium
        } else {
            RiskTier::High
        }
    }
}

/// Identifies which candidate sources the scanner draws from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    /// Signal scoring and all three arbitrage detectors.
    #[default]
    Adaptive,
    /// Signal scoring only.
    TrendFollowing,
    /// Arbitrage detectors only.
    ArbitrageOnly,
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyId::Adaptive => "adaptive",
            StrategyId::TrendFollowing => "trend_following",
            StrategyId::ArbitrageOnly => "arbitrage_only",
        };
        f.write_str(s)
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    ProfitProtection,
    MaxHolding,
    Rotation,
    EndOfBacktest,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::ProfitProtection => "profit_protection",
            ExitReason::MaxHolding => "max_holding",
            ExitReason::Rotation => "rotation",
            ExitReason::EndOfBacktest => "end_of_backtest",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_is_treated_as_mixed() {
        assert_eq!(MarketRegime::Unknown.effective(), MarketRegime::Mixed);
        assert_eq!(MarketRegime::StrongBull.effective(), MarketRegime::StrongBull);
    }

    #[test]
    fn regime_serializes_snake_case() {
        let json = serde_json::to_string(&MarketRegime::StrongBull).unwrap();
        assert_eq!(json, "\"strong_bull\"");
        assert_eq!(MarketRegime::WeakBear.to_string(), "weak_bear");
    }

    #[test]
    fn risk_tier_buckets() {
        assert_eq!(RiskTier::from_volatility(0.001), RiskTier::Low);
        assert_eq!(RiskTier::from_volatility(0.02), RiskTier::Medium);
        assert_eq!(RiskTier::from_volatility(0.08), RiskTier::High);
    }
}
