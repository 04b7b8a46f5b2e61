use serde::{Deserialize, Serialize};
use std::fmt;

/// How far a bear market has developed, from decline intensity and duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BearPhase {
    Early,
    Mid,
    Late,
    Deep,
    Recovery,
}

impl BearPhase {
    /// `decline` is the mean drawdown from the long-window peak, `hours` the time
    /// spent in bearish regimes. A bullish short-window bias means recovery.
    pub fn detect(decline: f64, hours: i64, short_bias_bullish: bool) -> Self {
        if short_bias_bullish {
            BearPhase::Recovery
        } else if decline > 0.30 || hours > 240 {
            BearPhase::Deep
        } else if decline > 0.20 || hours > 120 {
            BearPhase::Late
        } else if decline > 0.10 || hours > 48 {
            BearPhase::Mid
        } else {
            BearPhase::Early
        }
    }

    fn factor(self) -> f64 {
        match self {
            BearPhase::Early => 1.0,
            BearPhase::Mid => 1.1,
            BearPhase::Late => 1.2,
            BearPhase::Deep => 1.3,
            BearPhase::Recovery => 0.9,
        }
    }

    /// Multiplier applied to arbitrage confidence and return thresholds.
    pub fn threshold_multiplier(self, base: f64) -> f64 {
        base * self.factor()
    }
}

impl fmt::Display for BearPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BearPhase::Early => "early",
            BearPhase::Mid => "mid",
            BearPhase::Late => "late",
            BearPhase::Deep => "deep",
            BearPhase::Recovery => "recovery",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_escalate_with_decline_and_duration() {
        assert_eq!(BearPhase::detect(0.05, 10, false), BearPhase::Early);
        assert_eq!(BearPhase::detect(0.12, 10, false), BearPhase::Mid);
        assert_eq!(BearPhase::detect(0.05, 130, false), BearPhase::Late);
        assert_eq!(BearPhase::detect(0.35, 0, false), BearPhase::Deep);
        assert_eq!(BearPhase::detect(0.35, 500, true), BearPhase::Recovery);
    }

    #[test]
    fn deeper_phases_demand_more() {
        let base = 1.3;
        assert!(BearPhase::Deep.threshold_multiplier(base) > BearPhase::Early.threshold_multiplier(base));
        assert!(BearPhase::Recovery.threshold_multiplier(base) < base);
    }
}
