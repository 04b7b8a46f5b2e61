use crate::enums::{ArbitrageKind, OrderSide, RiskTier};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured metadata attached to an arbitrage-derived opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageSignal {
    pub kind: ArbitrageKind,
    pub primary: String,
    /// The reference symbol for pair-based detectors.
    pub secondary: Option<String>,
    pub direction: OrderSide,
    pub expected_return: f64,
    pub confidence: f64,
    /// Z-score for statistical signals, correlation for pair signals, RSI for reversals.
    pub supporting_stat: f64,
    /// Expected holding horizon in bars.
    pub horizon: usize,
    pub risk_tier: RiskTier,
}

/// Where an opportunity (and later the position it opens) came from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpportunityOrigin {
    #[default]
    Signal,
    Arbitrage(ArbitrageSignal),
}

impl OpportunityOrigin {
    pub fn is_arbitrage(&self) -> bool {
        matches!(self, OpportunityOrigin::Arbitrage(_))
    }

    pub fn arbitrage(&self) -> Option<&ArbitrageSignal> {
        match self {
            OpportunityOrigin::Arbitrage(signal) => Some(signal),
            OpportunityOrigin::Signal => None,
        }
    }
}

impl fmt::Display for OpportunityOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpportunityOrigin::Signal => f.write_str("signal"),
            OpportunityOrigin::Arbitrage(signal) => write!(f, "arbitrage:{}", signal.kind),
        }
    }
}

/// A ranked, risk-annotated trading candidate produced by the scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub symbol: String,
    pub action: OrderSide,
    pub confidence: f64,
    /// Base score in [0, 1], before any risk adjustment.
    pub score: f64,
    pub risk_adjusted_score: f64,
    pub quality: f64,
    pub price: Decimal,
    pub volatility: f64,
    pub risk_tier: RiskTier,
    pub origin: OpportunityOrigin,
}

impl Opportunity {
    pub fn is_arbitrage(&self) -> bool {
        self.origin.is_arbitrage()
    }
}
