use crate::sizer::Stage;
use configuration::StopLoss as StopLossSettings;
use core_types::{ExitReason, MarketRegime, OpportunityOrigin, PerformanceRecord, PerformerClass, SymbolState};
use indicators::{atr_pct, percentile};
use rust_decimal::Decimal;
use serde::Serialize;

/// ATR periods and weights blended into one volatility reading.
const ATR_BLEND: [(usize, f64); 3] = [(5, 0.5), (14, 0.3), (30, 0.2)];
const FALLBACK_VOLATILITY: f64 = 0.02;
/// Volatility at which the learned adjustment's volatility score saturates.
const VOLATILITY_SATURATION: f64 = 0.05;

/// What the engine needs to know about one open position.
#[derive(Debug, Clone, Copy)]
pub struct StopInputs<'a> {
    pub closes: &'a [f64],
    pub unrealized_return: f64,
    pub peak_return: f64,
    pub holding_periods: usize,
    pub regime: MarketRegime,
    pub origin: &'a OpportunityOrigin,
    pub record: Option<&'a PerformanceRecord>,
}

impl<'a> StopInputs<'a> {
    pub fn from_state(
        state: &'a SymbolState,
        closes: &'a [f64],
        price: Decimal,
        regime: MarketRegime,
        record: Option<&'a PerformanceRecord>,
    ) -> Self {
        Self {
            closes,
            unrealized_return: state.unrealized_return(price),
            peak_return: state.peak_return(),
            holding_periods: state.holding_periods,
            regime,
            origin: &state.entry_origin,
            record,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopThreshold {
    pub volatility: f64,
    pub stages: Vec<Stage>,
    pub dynamic: f64,
    pub tier_floor: f64,
    pub var_floor: f64,
    /// Loss, as a positive fraction of the entry price, at which the position is stopped.
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopEvaluation {
    pub threshold: StopThreshold,
    pub take_profit: f64,
    pub exit: Option<ExitReason>,
}

/// Multi-factor adaptive stop for every open position.
#[derive(Debug, Clone)]
pub struct AdaptiveStopLossEngine {
    settings: StopLossSettings,
    /// Base bars per calendar day, for the daily VaR floor.
    bars_per_day: usize,
}

impl AdaptiveStopLossEngine {
    pub fn new(settings: StopLossSettings, bar_interval_minutes: u32) -> Self {
        let bars_per_day = (1440 / bar_interval_minutes.max(1)).max(1) as usize;
        Self { settings, bars_per_day }
    }

    /// ATR-like volatility over 5/14/30 bars, weighted 50/30/20.
    pub fn blended_volatility(closes: &[f64]) -> f64 {
        let (sum, weight) = ATR_BLEND
            .iter()
            .filter_map(|(period, w)| atr_pct(closes, *period).ok().map(|v| (v * w, *w)))
            .fold((0.0, 0.0), |(s, tw), (v, w)| (s + v, tw + w));
        if weight <= 0.0 { FALLBACK_VOLATILITY } else { sum / weight }
    }

    pub fn regime_factor(regime: MarketRegime) -> f64 {
        match regime.effective() {
            MarketRegime::StrongBull => 3.5,
            MarketRegime::WeakBull => 3.0,
            MarketRegime::Sideways | MarketRegime::Mixed | MarketRegime::Unknown => 2.5,
            MarketRegime::TrueSideways | MarketRegime::LowVolatility | MarketRegime::WeakBear => 2.0,
            MarketRegime::StrongBear => 1.75,
            MarketRegime::ExtremeBear => 1.5,
        }
    }

    pub fn performance_factor(record: Option<&PerformanceRecord>) -> f64 {
        match record {
            Some(r) if r.classify() == PerformerClass::Poor => 1.4,
            Some(r) if r.trade_count >= 5 && r.win_rate() >= 0.6 => 0.85,
            Some(r) if r.trade_count >= 5 => 1.0,
            _ => 1.5,
        }
    }

    pub fn holding_factor(&self, holding_periods: usize) -> f64 {
        let crossed = self
            .settings
            .holding_marks
            .iter()
            .filter(|mark| holding_periods >= **mark)
            .count();
        1.0 + self.settings.holding_step * crossed as f64
    }

    /// Heuristic stand-in for a learned adjustment, in [0.8, 1.2].
    pub fn learned_factor(&self, regime: MarketRegime, volatility: f64, holding_periods: usize, pnl: f64) -> f64 {
        let regime_score = match regime.effective() {
            r if r.is_bullish() => 1.0,
            r if r.is_bearish() => 0.0,
            _ => 0.5,
        };
        let volatility_score = (volatility / VOLATILITY_SATURATION).clamp(0.0, 1.0);
        let age = (holding_periods as f64 / self.settings.max_holding_periods.max(1) as f64).min(1.0);
        let time_pnl_score = 0.5 * age + 0.5 * (0.5 + 0.5 * (pnl * 20.0).tanh());
        let blended = 0.4 * regime_score + 0.3 * volatility_score + 0.3 * time_pnl_score;
        0.8 + 0.4 * blended
    }

    pub fn tier_floor(&self, record: Option<&PerformanceRecord>) -> f64 {
        match record.map_or(PerformerClass::Normal, PerformanceRecord::classify) {
            PerformerClass::Poor => self.settings.poor_floor,
            PerformerClass::Normal => self.settings.normal_floor,
            PerformerClass::Excellent => self.settings.excellent_floor,
        }
    }

    /// 95th percentile of historical daily losses over the VaR lookback.
    pub fn var_floor(&self, closes: &[f64]) -> f64 {
        let day = self.bars_per_day;
        let span = self.settings.var_lookback + day;
        let tail = &closes[closes.len().saturating_sub(span)..];
        if tail.len() <= day + 1 {
            return 0.0;
        }
        let losses: Vec<f64> = tail
            .windows(day + 1)
            .filter(|w| w[0] > 0.0)
            .map(|w| 1.0 - w[day] / w[0])
            .collect();
        percentile(&losses, 0.95).unwrap_or(0.0).max(0.0)
    }

    pub fn threshold(&self, inputs: &StopInputs<'_>) -> StopThreshold {
        let volatility = Self::blended_volatility(inputs.closes);
        let stages = vec![
            Stage { name: "regime", factor: Self::regime_factor(inputs.regime) },
            Stage { name: "performance", factor: Self::performance_factor(inputs.record) },
            Stage { name: "holding", factor: self.holding_factor(inputs.holding_periods) },
            Stage {
                name: "learned",
                factor: self.learned_factor(
                    inputs.regime,
                    volatility,
                    inputs.holding_periods,
                    inputs.unrealized_return,
                ),
            },
        ];
        let dynamic = stages.iter().fold(volatility, |acc, s| acc * s.factor);
        let tier_floor = self.tier_floor(inputs.record);
        let var_floor = self.var_floor(inputs.closes);
        let threshold = tier_floor.max(dynamic).max(var_floor).min(self.settings.max_stop);

        StopThreshold { volatility, stages, dynamic, tier_floor, var_floor, threshold }
    }

    fn max_holding(&self, regime: MarketRegime, origin: &OpportunityOrigin) -> usize {
        let s = &self.settings;
        let scale = match regime.effective() {
            r if r.is_bullish() => 1.5,
            r if r.is_bearish() => 0.75,
            _ => 1.0,
        };
        let limit = (s.max_holding_periods as f64 * scale).round() as usize;
        let limit = match origin.arbitrage() {
            Some(signal) => limit.min((signal.horizon * 3).max(s.min_holding_periods)),
            None => limit,
        };
        limit.max(s.min_holding_periods)
    }

    pub fn evaluate(&self, inputs: &StopInputs<'_>) -> StopEvaluation {
        let s = &self.settings;
        let threshold = self.threshold(inputs);
        let take_profit = (threshold.threshold * s.take_profit_ratio).max(s.min_take_profit);
        let pnl = inputs.unrealized_return;

        let exit = if inputs.holding_periods < s.min_holding_periods {
            (pnl < -s.emergency_loss).then_some(ExitReason::StopLoss)
        } else if pnl <= -threshold.threshold {
            Some(ExitReason::StopLoss)
        } else if pnl >= take_profit {
            Some(ExitReason::TakeProfit)
        } else if inputs.peak_return > s.profit_protection_trigger
            && pnl < inputs.peak_return * s.profit_lock_ratio
        {
            Some(ExitReason::ProfitProtection)
        } else if inputs.holding_periods >= self.max_holding(inputs.regime, inputs.origin) {
            Some(ExitReason::MaxHolding)
        } else {
            None
        };

        if let Some(reason) = exit {
            tracing::debug!(
                ?reason,
                pnl,
                threshold = threshold.threshold,
                holding = inputs.holding_periods,
                "exit triggered"
            );
        }
        StopEvaluation { threshold, take_profit, exit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{ArbitrageKind, ArbitrageSignal, OrderSide, RiskTier};
    use proptest::prelude::*;

    fn engine() -> AdaptiveStopLossEngine {
        AdaptiveStopLossEngine::new(StopLossSettings::default(), 60)
    }

    fn wavy(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + 2.0 * ((i as f64) * 0.5).sin()).collect()
    }

    fn inputs<'a>(
        closes: &'a [f64],
        origin: &'a OpportunityOrigin,
        pnl: f64,
        peak: f64,
        holding: usize,
    ) -> StopInputs<'a> {
        StopInputs {
            closes,
            unrealized_return: pnl,
            peak_return: peak,
            holding_periods: holding,
            regime: MarketRegime::Sideways,
            origin,
            record: None,
        }
    }

    #[test]
    fn only_an_emergency_exits_before_the_minimum_hold() {
        let closes = wavy(200);
        let origin = OpportunityOrigin::Signal;
        assert_eq!(engine().evaluate(&inputs(&closes, &origin, -0.04, 0.0, 1)).exit, None);
        assert_eq!(
            engine().evaluate(&inputs(&closes, &origin, -0.06, 0.0, 1)).exit,
            Some(ExitReason::StopLoss)
        );
    }

    #[test]
    fn stop_fires_past_the_threshold() {
        let closes = wavy(200);
        let origin = OpportunityOrigin::Signal;
        let eval = engine().evaluate(&inputs(&closes, &origin, -0.01, 0.0, 10));
        assert_eq!(eval.exit, None);
        let threshold = eval.threshold.threshold;
        assert!(threshold >= eval.threshold.tier_floor);
        let eval = engine().evaluate(&inputs(&closes, &origin, -threshold - 0.001, 0.0, 10));
        assert_eq!(eval.exit, Some(ExitReason::StopLoss));
    }

    #[test]
    fn take_profit_and_profit_protection() {
        let closes = wavy(200);
        let origin = OpportunityOrigin::Signal;
        assert_eq!(
            engine().evaluate(&inputs(&closes, &origin, 0.35, 0.35, 10)).exit,
            Some(ExitReason::TakeProfit)
        );
        assert_eq!(
            engine().evaluate(&inputs(&closes, &origin, 0.01, 0.05, 10)).exit,
            Some(ExitReason::ProfitProtection)
        );
        assert_eq!(engine().evaluate(&inputs(&closes, &origin, 0.03, 0.05, 10)).exit, None);
    }

    #[test]
    fn arbitrage_positions_respect_their_horizon() {
        let closes = wavy(200);
        let origin = OpportunityOrigin::Arbitrage(ArbitrageSignal {
            kind: ArbitrageKind::Correlation,
            primary: "A".into(),
            secondary: Some("B".into()),
            direction: OrderSide::Buy,
            expected_return: 0.02,
            confidence: 0.8,
            supporting_stat: 0.9,
            horizon: 5,
            risk_tier: RiskTier::Low,
        });
        assert_eq!(engine().evaluate(&inputs(&closes, &origin, 0.0, 0.0, 14)).exit, None);
        assert_eq!(
            engine().evaluate(&inputs(&closes, &origin, 0.0, 0.0, 15)).exit,
            Some(ExitReason::MaxHolding)
        );
        let signal = OpportunityOrigin::Signal;
        assert_eq!(engine().evaluate(&inputs(&closes, &signal, 0.0, 0.0, 15)).exit, None);
    }

    #[test]
    fn floors_follow_the_performer_class() {
        let e = engine();
        let mut excellent = PerformanceRecord::default();
        for _ in 0..5 {
            excellent.record_close(10.0, 0.02);
        }
        let mut poor = PerformanceRecord::default();
        for _ in 0..3 {
            poor.record_close(-10.0, -0.02);
        }
        assert_eq!(e.tier_floor(Some(&excellent)), 0.02);
        assert_eq!(e.tier_floor(None), 0.03);
        assert_eq!(e.tier_floor(Some(&poor)), 0.05);
    }

    #[test]
    fn var_floor_reflects_daily_losses() {
        let e = engine();
        let flat = vec![100.0; 200];
        assert_eq!(e.var_floor(&flat), 0.0);
        let falling: Vec<f64> = (0..200).map(|i| 100.0 * 0.999f64.powi(i)).collect();
        let floor = e.var_floor(&falling);
        assert!((floor - (1.0 - 0.999f64.powi(24))).abs() < 1e-9, "floor = {floor}");
    }

    #[test]
    fn threshold_never_exceeds_the_cap() {
        let volatile: Vec<f64> = (0..200).map(|i| if i % 2 == 0 { 100.0 } else { 130.0 }).collect();
        let origin = OpportunityOrigin::Signal;
        let eval = engine().evaluate(&inputs(&volatile, &origin, 0.0, 0.0, 130));
        assert_eq!(eval.threshold.threshold, 0.15);
    }

    proptest! {
        #[test]
        fn threshold_is_monotone_in_holding_duration(
            steps in prop::collection::vec(-0.03f64..0.03, 40..160),
            pnl in -0.1f64..0.1,
            holding in 0usize..200,
            extra in 1usize..100,
        ) {
            let mut price = 100.0;
            let closes: Vec<f64> = steps.iter().map(|s| { price *= 1.0 + s; price }).collect();
            let origin = OpportunityOrigin::Signal;
            let e = engine();
            let shorter = e.threshold(&inputs(&closes, &origin, pnl, pnl.max(0.0), holding)).threshold;
            let longer = e.threshold(&inputs(&closes, &origin, pnl, pnl.max(0.0), holding + extra)).threshold;
            prop_assert!(longer >= shorter - 1e-12);
        }
    }
}
