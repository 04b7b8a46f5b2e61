use configuration::CircuitBreaker as BreakerSettings;
use core_types::{MarketRegime, Opportunity};
use serde::Serialize;

const ARBITRAGE_CEILING_SPREAD: f64 = 0.05;

/// What the breaker allows for one opportunity at the current drawdown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum BreakerVerdict {
    /// Trading is allowed; `capital_cap` bounds the order notional as a fraction of equity.
    Allowed { capital_cap: Option<f64> },
    /// Non-arbitrage trading is halted at this drawdown.
    Blocked { drawdown: f64, ceiling: f64 },
}

/// Halts discretionary trading in deep drawdowns while still admitting
/// sufficiently confident arbitrage.
#[derive(Debug, Clone)]
pub struct DrawdownCircuitBreaker {
    settings: BreakerSettings,
}

impl DrawdownCircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        Self { settings }
    }

    fn regime_scale(regime: MarketRegime) -> f64 {
        match regime.effective() {
            MarketRegime::StrongBull => 1.1,
            MarketRegime::WeakBull => 1.05,
            MarketRegime::Sideways | MarketRegime::TrueSideways | MarketRegime::LowVolatility => 1.0,
            MarketRegime::Mixed | MarketRegime::Unknown => 0.95,
            MarketRegime::WeakBear => 0.9,
            MarketRegime::StrongBear => 0.85,
            MarketRegime::ExtremeBear => 0.8,
        }
    }

    /// Drawdown above which non-arbitrage trades are blocked.
    pub fn ceiling(&self, regime: MarketRegime) -> f64 {
        (self.settings.base_ceiling * Self::regime_scale(regime)).min(self.settings.arbitrage_ceiling)
    }

    /// Drawdown up to which confident arbitrage is still admitted. Bearish
    /// regimes pull it down by at most `ARBITRAGE_CEILING_SPREAD`.
    pub fn arbitrage_ceiling(&self, regime: MarketRegime) -> f64 {
        let ceiling = self.settings.arbitrage_ceiling;
        let shortfall = 1.0 - Self::regime_scale(regime).min(1.0);
        ceiling - shortfall * ARBITRAGE_CEILING_SPREAD
    }

    /// Capital-at-risk cap of the deepest drawdown tier crossed, if any.
    pub fn capital_cap(&self, drawdown: f64) -> Option<f64> {
        self.settings
            .tier_drawdowns
            .iter()
            .zip(&self.settings.tier_caps)
            .filter(|(level, _)| drawdown > **level)
            .map(|(_, cap)| *cap)
            .last()
    }

    pub fn check(&self, opportunity: &Opportunity, drawdown: f64, regime: MarketRegime) -> BreakerVerdict {
        let capital_cap = self.capital_cap(drawdown);
        let ceiling = self.ceiling(regime);
        if drawdown <= ceiling {
            return BreakerVerdict::Allowed { capital_cap };
        }

        let arbitrage_admitted = opportunity.is_arbitrage()
            && opportunity.confidence >= self.settings.arbitrage_min_confidence
            && drawdown <= self.arbitrage_ceiling(regime);
        if arbitrage_admitted {
            tracing::debug!(
                symbol = %opportunity.symbol,
                drawdown,
                ceiling,
                "breaker open, admitting arbitrage"
            );
            BreakerVerdict::Allowed { capital_cap }
        } else {
            BreakerVerdict::Blocked { drawdown, ceiling }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{ArbitrageKind, ArbitrageSignal, OpportunityOrigin, OrderSide, RiskTier};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn breaker() -> DrawdownCircuitBreaker {
        DrawdownCircuitBreaker::new(BreakerSettings::default())
    }

    fn opportunity(arbitrage: bool, confidence: f64) -> Opportunity {
        let origin = if arbitrage {
            OpportunityOrigin::Arbitrage(ArbitrageSignal {
                kind: ArbitrageKind::Correlation,
                primary: "A".into(),
                secondary: Some("B".into()),
                direction: OrderSide::Buy,
                expected_return: 0.02,
                confidence,
                supporting_stat: 0.9,
                horizon: 5,
                risk_tier: RiskTier::Low,
            })
        } else {
            OpportunityOrigin::Signal
        };
        Opportunity {
            symbol: "A".into(),
            action: OrderSide::Buy,
            confidence,
            score: confidence,
            risk_adjusted_score: confidence,
            quality: 0.7,
            price: dec!(10),
            volatility: 0.01,
            risk_tier: RiskTier::Low,
            origin,
        }
    }

    #[test]
    fn tiers_tighten_with_drawdown() {
        let b = breaker();
        assert_eq!(b.capital_cap(0.3), None);
        assert_eq!(b.capital_cap(0.55), Some(0.35));
        assert_eq!(b.capital_cap(0.75), Some(0.25));
        assert_eq!(b.capital_cap(0.9), Some(0.15));
    }

    #[test]
    fn ninety_percent_drawdown_admits_only_confident_arbitrage() {
        let b = breaker();
        let regime = MarketRegime::StrongBear;
        assert!(matches!(b.check(&opportunity(false, 0.9), 0.9, regime), BreakerVerdict::Blocked { .. }));
        assert!(matches!(b.check(&opportunity(true, 0.05), 0.9, regime), BreakerVerdict::Blocked { .. }));
        assert_eq!(
            b.check(&opportunity(true, 0.1), 0.9, regime),
            BreakerVerdict::Allowed { capital_cap: Some(0.15) }
        );
    }

    #[test]
    fn ceilings_scale_with_regime() {
        let b = breaker();
        assert!(b.ceiling(MarketRegime::StrongBull) > b.ceiling(MarketRegime::ExtremeBear));
        assert!(b.arbitrage_ceiling(MarketRegime::StrongBull) <= 0.9999);
    }

    proptest! {
        #[test]
        fn nothing_discretionary_passes_above_the_ceiling(
            drawdown in 0.0f64..1.0,
            confidence in 0.0f64..1.0,
            regime_idx in 0usize..8,
        ) {
            let regimes = [
                MarketRegime::StrongBull, MarketRegime::WeakBull, MarketRegime::Sideways,
                MarketRegime::Mixed, MarketRegime::WeakBear, MarketRegime::StrongBear,
                MarketRegime::ExtremeBear, MarketRegime::Unknown,
            ];
            let regime = regimes[regime_idx];
            let b = breaker();
            let verdict = b.check(&opportunity(false, confidence), drawdown, regime);
            if drawdown > b.ceiling(regime) {
                let blocked = matches!(verdict, BreakerVerdict::Blocked { .. });
                prop_assert!(blocked);
            }
        }
    }
}
