use configuration::RiskManagement;
use core_types::{MarketRegime, PerformanceRecord, PerformerClass};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// Why an opportunity was not sized. Rejections are outcomes, not failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum Rejection {
    #[error("not executable: {0}")]
    NotExecutable(String),

    #[error("circuit breaker: drawdown {drawdown:.4} above ceiling {ceiling:.4}")]
    CircuitBreaker { drawdown: f64, ceiling: f64 },

    #[error("drawdown {drawdown:.4} exceeds the budget {budget:.4}")]
    DrawdownBudget { drawdown: f64, budget: f64 },

    #[error("capital at risk {fraction:.4} of equity exceeds {limit:.4}")]
    CapitalAtRisk { fraction: f64, limit: f64 },

    #[error("total exposure {fraction:.4} of equity exceeds {limit:.4}")]
    TotalExposure { fraction: f64, limit: f64 },

    #[error("correlated exposure {fraction:.4} of equity exceeds {limit:.4}")]
    CorrelationExposure { fraction: f64, limit: f64 },

    #[error("order notional {notional} below the minimum {minimum}")]
    BelowMinimum { notional: Decimal, minimum: Decimal },
}

/// Exposure figures a candidate order would produce, in quote currency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Exposure {
    pub equity: f64,
    /// Current market value held in the candidate symbol.
    pub existing: f64,
    /// Current market value of all positions.
    pub total: f64,
    /// Current market value of holdings correlated with the candidate.
    pub correlated: f64,
    pub allocation: f64,
}

/// Hard limits that reject a sized order outright.
#[derive(Debug, Clone)]
pub struct RiskGates {
    settings: RiskManagement,
    /// Loss assumed on a position if its stop is hit.
    worst_case_stop: f64,
}

impl RiskGates {
    pub fn new(settings: RiskManagement, worst_case_stop: f64) -> Self {
        Self { settings, worst_case_stop }
    }

    pub fn capital_at_risk(&self, e: &Exposure) -> Result<(), Rejection> {
        let fraction = (e.existing + e.allocation) * self.worst_case_stop / e.equity;
        let limit = self.settings.max_capital_at_risk;
        if fraction > limit {
            return Err(Rejection::CapitalAtRisk { fraction, limit });
        }
        Ok(())
    }

    pub fn total_exposure(&self, e: &Exposure) -> Result<(), Rejection> {
        let fraction = (e.total + e.allocation) / e.equity;
        let limit = self.settings.max_total_exposure;
        if fraction > limit {
            return Err(Rejection::TotalExposure { fraction, limit });
        }
        Ok(())
    }

    pub fn correlation_exposure(&self, e: &Exposure) -> Result<(), Rejection> {
        if e.correlated <= 0.0 {
            return Ok(());
        }
        let fraction = (e.correlated + e.allocation) / e.equity;
        let limit = self.settings.max_correlation_exposure;
        if fraction > limit {
            return Err(Rejection::CorrelationExposure { fraction, limit });
        }
        Ok(())
    }

    /// Drawdown budget for discretionary trades; widened for proven symbols, tightened for poor ones.
    pub fn drawdown_budget(&self, regime: MarketRegime, record: Option<&PerformanceRecord>) -> f64 {
        let base = match regime.effective() {
            MarketRegime::StrongBull => 0.60,
            MarketRegime::WeakBull => 0.50,
            MarketRegime::Sideways | MarketRegime::TrueSideways | MarketRegime::LowVolatility => 0.40,
            MarketRegime::Mixed | MarketRegime::Unknown => 0.35,
            MarketRegime::WeakBear => 0.30,
            MarketRegime::StrongBear => 0.25,
            MarketRegime::ExtremeBear => 0.20,
        };
        let scale = match record {
            Some(r) if r.classify() == PerformerClass::Poor => 0.8,
            Some(r) if r.trade_count > 0 && (r.sharpe() > 1.0 || r.win_rate() > 0.6) => 1.2,
            _ => 1.0,
        };
        base * scale
    }

    pub fn check_drawdown(
        &self,
        drawdown: f64,
        regime: MarketRegime,
        record: Option<&PerformanceRecord>,
    ) -> Result<(), Rejection> {
        let budget = self.drawdown_budget(regime, record);
        if drawdown > budget {
            return Err(Rejection::DrawdownBudget { drawdown, budget });
        }
        Ok(())
    }

    /// Exposure gates, in order.
    pub fn check_exposure(&self, e: &Exposure) -> Result<(), Rejection> {
        self.capital_at_risk(e)?;
        self.total_exposure(e)?;
        self.correlation_exposure(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gates() -> RiskGates {
        RiskGates::new(RiskManagement::default(), 0.15)
    }

    fn exposure(total: f64, correlated: f64, allocation: f64) -> Exposure {
        Exposure { equity: 10_000.0, existing: 0.0, total, correlated, allocation }
    }

    #[test]
    fn total_exposure_is_capped() {
        assert!(gates().total_exposure(&exposure(5_000.0, 0.0, 900.0)).is_ok());
        assert!(matches!(
            gates().total_exposure(&exposure(5_500.0, 0.0, 900.0)),
            Err(Rejection::TotalExposure { .. })
        ));
    }

    #[test]
    fn correlation_gate_only_counts_correlated_holdings() {
        assert!(gates().correlation_exposure(&exposure(0.0, 0.0, 9_000.0)).is_ok());
        assert!(matches!(
            gates().correlation_exposure(&exposure(0.0, 6_500.0, 1_000.0)),
            Err(Rejection::CorrelationExposure { .. })
        ));
    }

    #[test]
    fn capital_at_risk_uses_the_worst_case_stop() {
        let e = Exposure { equity: 1_000.0, existing: 500.0, total: 500.0, correlated: 0.0, allocation: 600.0 };
        assert!(matches!(gates().capital_at_risk(&e), Err(Rejection::CapitalAtRisk { .. })));
    }

    #[test]
    fn drawdown_budget_adapts_to_the_symbol() {
        let g = gates();
        assert_eq!(g.drawdown_budget(MarketRegime::WeakBull, None), 0.50);

        let mut good = PerformanceRecord::default();
        for _ in 0..4 {
            good.record_close(10.0, 0.02);
        }
        assert!((g.drawdown_budget(MarketRegime::WeakBull, Some(&good)) - 0.60).abs() < 1e-12);

        let mut poor = PerformanceRecord::default();
        for _ in 0..3 {
            poor.record_close(-10.0, -0.02);
        }
        assert!((g.drawdown_budget(MarketRegime::WeakBull, Some(&poor)) - 0.40).abs() < 1e-12);
        assert!(g.check_drawdown(0.45, MarketRegime::WeakBull, Some(&poor)).is_err());
    }
}
