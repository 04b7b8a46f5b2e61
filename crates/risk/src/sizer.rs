use crate::circuit_breaker::{BreakerVerdict, DrawdownCircuitBreaker};
use crate::error::RiskError;
use crate::gates::{Exposure, Rejection, RiskGates};
use configuration::{CircuitBreaker as BreakerSettings, RiskManagement};
use core_types::{MarketRegime, Opportunity, OrderSide, PerformanceBook, PerformanceRecord, RiskTier};
use rust_decimal::RoundingStrategy;
use rust_decimal::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;

/// Cash, equity and holdings at the moment of sizing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PortfolioSnapshot {
    pub cash: Decimal,
    pub equity: Decimal,
    pub peak_equity: Decimal,
    /// Market value of every open position.
    pub positions: BTreeMap<String, Decimal>,
}

impl PortfolioSnapshot {
    /// Decline of equity from its peak, in [0, 1].
    pub fn drawdown(&self) -> f64 {
        if self.peak_equity <= Decimal::ZERO {
            return 0.0;
        }
        ((self.peak_equity - self.equity) / self.peak_equity)
            .to_f64()
            .unwrap_or(0.0)
            .clamp(0.0, 1.0)
    }

    pub fn exposure(&self) -> Decimal {
        self.positions.values().copied().sum()
    }

    pub fn position_value(&self, symbol: &str) -> Decimal {
        self.positions.get(symbol).copied().unwrap_or_default()
    }

    /// Position weights relative to total exposure.
    pub fn weights(&self) -> Vec<f64> {
        let total = self.exposure();
        if total <= Decimal::ZERO {
            return Vec::new();
        }
        self.positions
            .values()
            .map(|v| (*v / total).to_f64().unwrap_or(0.0))
            .collect()
    }
}

/// Everything needed to size one opportunity.
#[derive(Debug, Clone, Copy)]
pub struct SizingRequest<'a> {
    pub opportunity: &'a Opportunity,
    pub portfolio: &'a PortfolioSnapshot,
    pub regime: MarketRegime,
    pub step: usize,
    /// Average recent bar notional of the symbol.
    pub liquidity_notional: f64,
    /// Return correlation of the symbol with each held symbol.
    pub correlations: &'a BTreeMap<String, f64>,
}

/// One named multiplier of the sizing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stage {
    pub name: &'static str,
    pub factor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizedOrder {
    pub symbol: String,
    pub quantity: Decimal,
    pub notional: Decimal,
    pub kelly: f64,
    /// Fraction of cash after the multiplier stages, before portfolio constraints.
    pub fraction: f64,
    pub stages: Vec<Stage>,
    pub capital_cap: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SizingDecision {
    Accepted(SizedOrder),
    Rejected(Rejection),
}

impl SizingDecision {
    pub fn accepted(&self) -> Option<&SizedOrder> {
        match self {
            SizingDecision::Accepted(order) => Some(order),
            SizingDecision::Rejected(_) => None,
        }
    }
}

// =============================================================================
// Stages
// =============================================================================

/// Kelly fraction from the symbol's record, the portfolio aggregate, or the default.
pub fn kelly_fraction(record: Option<&PerformanceRecord>, aggregate: &PerformanceRecord, s: &RiskManagement) -> f64 {
    let source = record
        .filter(|r| r.trade_count >= s.kelly_min_trades)
        .or(Some(aggregate).filter(|r| r.trade_count >= s.kelly_min_trades));
    let Some(r) = source else {
        return s.kelly_default.clamp(s.kelly_min, s.kelly_max);
    };
    let w = r.win_rate();
    let raw = if r.avg_loss() <= f64::EPSILON {
        if w > 0.0 { s.kelly_max } else { s.kelly_min }
    } else if r.avg_win() <= f64::EPSILON {
        s.kelly_min
    } else {
        let payoff = r.avg_win() / r.avg_loss();
        w - (1.0 - w) / payoff
    };
    raw.clamp(s.kelly_min, s.kelly_max)
}

pub fn confidence_stage(confidence: f64) -> f64 {
    0.5 + 0.5 * confidence.clamp(0.0, 1.0)
}

pub fn regime_stage(regime: MarketRegime) -> f64 {
    match regime.effective() {
        MarketRegime::StrongBull => 1.3,
        MarketRegime::WeakBull => 1.15,
        MarketRegime::Sideways | MarketRegime::TrueSideways => 1.0,
        MarketRegime::LowVolatility => 0.9,
        MarketRegime::Mixed | MarketRegime::Unknown => 0.8,
        MarketRegime::WeakBear => 0.7,
        MarketRegime::StrongBear => 0.55,
        MarketRegime::ExtremeBear => 0.4,
    }
}

pub fn risk_tier_stage(tier: RiskTier) -> f64 {
    match tier {
        RiskTier::Low => 1.0,
        RiskTier::Medium => 0.85,
        RiskTier::High => 0.65,
    }
}

/// Scales toward the target per-bar volatility, within [0.5, 1.2].
pub fn volatility_stage(volatility: f64, target: f64) -> f64 {
    if volatility <= f64::EPSILON {
        return 1.0;
    }
    (target / volatility).clamp(0.5, 1.2)
}

pub fn liquidity_stage(average_notional: f64, minimum: f64) -> f64 {
    if minimum <= 0.0 {
        return 1.0;
    }
    (average_notional / minimum).clamp(0.25, 1.0)
}

/// Shrinks size for every recent entry in the same symbol.
pub fn frequency_stage(recent_entries: usize, decay: f64, floor: f64) -> f64 {
    (1.0 - decay * recent_entries as f64).max(floor)
}

/// Largest share of cash one trade may take, and of equity one symbol may hold.
pub fn regime_position_limit(regime: MarketRegime) -> f64 {
    match regime.effective() {
        MarketRegime::StrongBull => 0.35,
        MarketRegime::WeakBull => 0.30,
        MarketRegime::Sideways | MarketRegime::TrueSideways | MarketRegime::LowVolatility => 0.25,
        MarketRegime::Mixed | MarketRegime::Unknown => 0.20,
        MarketRegime::WeakBear | MarketRegime::StrongBear | MarketRegime::ExtremeBear => 0.15,
    }
}

/// Shannon entropy of `weights` divided by its maximum, in [0, 1].
pub fn normalized_entropy(weights: &[f64]) -> f64 {
    let positive: Vec<f64> = weights.iter().copied().filter(|w| *w > 0.0).collect();
    if positive.len() < 2 {
        return 0.0;
    }
    let total: f64 = positive.iter().sum();
    let entropy: f64 = positive
        .iter()
        .map(|w| {
            let p = w / total;
            -p * p.ln()
        })
        .sum();
    entropy / (positive.len() as f64).ln()
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64_retain(value).unwrap_or_default()
}

// =============================================================================
// Sizer
// =============================================================================

/// Kelly-derived, regime- and performance-adjusted position sizing behind hard gates.
///
/// Sizing is a pure function of the request and the performance book, so
/// identical inputs always give identical decisions.
#[derive(Debug, Clone)]
pub struct RiskAndPositionSizer {
    settings: RiskManagement,
    breaker: DrawdownCircuitBreaker,
    gates: RiskGates,
    book: PerformanceBook,
}

impl RiskAndPositionSizer {
    pub fn new(
        settings: RiskManagement,
        breaker: BreakerSettings,
        worst_case_stop: f64,
        book: PerformanceBook,
    ) -> Result<Self, RiskError> {
        if settings.kelly_min <= 0.0 || settings.kelly_min > settings.kelly_max || settings.kelly_max > 1.0 {
            return Err(RiskError::InvalidParameters(
                "kelly bounds must satisfy 0 < kelly_min <= kelly_max <= 1".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&worst_case_stop) || worst_case_stop == 0.0 {
            return Err(RiskError::InvalidParameters(
                "worst-case stop must be between 0 and 1".to_string(),
            ));
        }
        Ok(Self {
            gates: RiskGates::new(settings.clone(), worst_case_stop),
            breaker: DrawdownCircuitBreaker::new(breaker),
            settings,
            book,
        })
    }

    pub fn breaker(&self) -> &DrawdownCircuitBreaker {
        &self.breaker
    }

    fn stages(&self, req: &SizingRequest<'_>) -> Vec<Stage> {
        let o = req.opportunity;
        let s = &self.settings;
        let since = req.step.saturating_sub(s.frequency_window_steps);
        let recent = self.book.symbol_entries_since(&o.symbol, since);
        vec![
            Stage { name: "confidence", factor: confidence_stage(o.confidence) },
            Stage { name: "regime", factor: regime_stage(req.regime) },
            Stage { name: "risk_tier", factor: risk_tier_stage(o.risk_tier) },
            Stage { name: "volatility", factor: volatility_stage(o.volatility, s.target_volatility) },
            Stage { name: "liquidity", factor: liquidity_stage(req.liquidity_notional, s.min_liquidity_notional) },
            Stage { name: "frequency", factor: frequency_stage(recent, s.frequency_decay, s.frequency_floor) },
        ]
    }

    pub fn size(&self, req: &SizingRequest<'_>) -> Result<SizingDecision, RiskError> {
        let o = req.opportunity;
        let p = req.portfolio;
        if o.price <= Decimal::ZERO {
            return Err(RiskError::InvalidEntryPrice(o.price));
        }
        if p.equity <= Decimal::ZERO {
            return Err(RiskError::InsufficientEquity(p.equity));
        }

        let decision = self.evaluate(req);
        if let SizingDecision::Rejected(reason) = &decision {
            tracing::debug!(symbol = %o.symbol, origin = %o.origin, %reason, "opportunity rejected");
        }
        Ok(decision)
    }

    fn evaluate(&self, req: &SizingRequest<'_>) -> SizingDecision {
        let o = req.opportunity;
        let p = req.portfolio;
        let s = &self.settings;

        if o.action != OrderSide::Buy {
            return SizingDecision::Rejected(Rejection::NotExecutable("the book is long-only".into()));
        }

        let drawdown = p.drawdown();
        let capital_cap = match self.breaker.check(o, drawdown, req.regime) {
            BreakerVerdict::Allowed { capital_cap } => capital_cap,
            BreakerVerdict::Blocked { drawdown, ceiling } => {
                return SizingDecision::Rejected(Rejection::CircuitBreaker { drawdown, ceiling });
            }
        };

        let record = self.book.symbol(&o.symbol);
        if !o.is_arbitrage() {
            if let Err(rejection) = self.gates.check_drawdown(drawdown, req.regime, record.as_ref()) {
                return SizingDecision::Rejected(rejection);
            }
        }

        // Kelly and the multiplier stages.
        let kelly = kelly_fraction(record.as_ref(), &self.book.aggregate(), s);
        let stages = self.stages(req);
        let mut fraction = kelly;
        for stage in &stages {
            fraction *= stage.factor;
            tracing::debug!(symbol = %o.symbol, stage = stage.name, factor = stage.factor, fraction, "sizing stage");
        }
        let fraction = fraction.clamp(0.0, 1.0);

        // Portfolio constraints.
        let cash = p.cash.to_f64().unwrap_or(0.0).max(0.0);
        let equity = p.equity.to_f64().unwrap_or(0.0);
        let existing = p.position_value(&o.symbol).to_f64().unwrap_or(0.0);
        let limit = regime_position_limit(req.regime);

        let mut allocation = (cash * fraction).min(cash * limit);
        allocation = allocation.min((equity * limit - existing).max(0.0));
        if p.positions.len() >= 2 && normalized_entropy(&p.weights()) < s.entropy_threshold {
            allocation *= s.diversification_penalty;
        }
        if let Some(cap) = capital_cap {
            allocation = allocation.min(equity * cap);
        }

        // Hard gates.
        let correlated = req
            .correlations
            .iter()
            .filter(|(symbol, rho)| rho.abs() >= s.correlation_threshold && p.positions.contains_key(*symbol))
            .map(|(symbol, _)| p.position_value(symbol).to_f64().unwrap_or(0.0))
            .sum();
        let exposure = Exposure {
            equity,
            existing,
            total: p.exposure().to_f64().unwrap_or(0.0),
            correlated,
            allocation,
        };
        if let Err(rejection) = self.gates.check_exposure(&exposure) {
            return SizingDecision::Rejected(rejection);
        }

        let notional = to_decimal(allocation).round_dp_with_strategy(8, RoundingStrategy::ToZero);
        if notional < s.min_order_notional {
            return SizingDecision::Rejected(Rejection::BelowMinimum {
                notional,
                minimum: s.min_order_notional,
            });
        }
        let quantity = (notional / o.price).round_dp_with_strategy(8, RoundingStrategy::ToZero);

        SizingDecision::Accepted(SizedOrder {
            symbol: o.symbol.clone(),
            quantity,
            notional: quantity * o.price,
            kelly,
            fraction,
            stages,
            capital_cap,
        })
    }
}
