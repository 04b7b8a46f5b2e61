use crate::arbitrage::{ArbitrageDetector, MarketView};
use crate::error::StrategyError;
use crate::features::{FeatureVector, regime_adjusted_score};
use crate::prediction::MlPrediction;
use crate::timeframe::{CoordinatedSignal, TimeframeSignalCoordinator};
use configuration::{Scanner as ScannerSettings, Timeframes as TimeframeSettings};
use core_types::{
    ArbitrageSignal, MarketRegime, Opportunity, OpportunityOrigin, OrderSide, PerformanceBook, RiskTier,
    StrategyId,
};
use rayon::prelude::*;
use regime::RegimeSnapshot;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

const LOW_VOLATILITY: f64 = 0.01;
const HIGH_VOLATILITY: f64 = 0.04;

/// The per-symbol signal verdict, computed once per step and cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDecision {
    pub action: OrderSide,
    /// Weighted feature score before the regime multiplier.
    pub base_score: f64,
    pub confidence: f64,
    pub quality: f64,
    pub volatility: f64,
    pub risk_tier: RiskTier,
}

impl SignalDecision {
    pub fn decide(features: &FeatureVector, coordinated: &CoordinatedSignal) -> Self {
        let action = features.action();
        let base_score = features.base_score(action);
        let (confidence, quality) = if coordinated.is_neutral() {
            (base_score, 0.5)
        } else {
            (0.6 * base_score + 0.4 * coordinated.confidence, coordinated.quality)
        };
        Self {
            action,
            base_score,
            confidence: confidence.clamp(0.0, 1.0),
            quality: quality.clamp(0.0, 1.0),
            volatility: features.volatility,
            risk_tier: RiskTier::from_volatility(features.volatility),
        }
    }
}

/// Everything the scanner needs to know about one symbol at one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolAnalysis {
    pub symbol: String,
    pub price: Decimal,
    pub features: FeatureVector,
    pub coordinated: CoordinatedSignal,
    pub prediction: MlPrediction,
    pub decision: SignalDecision,
}

/// Computes features, the coordinated signal, the heuristic prediction and the decision.
pub fn analyze_symbol(
    symbol: &str,
    price: Decimal,
    closes: &[f64],
    volumes: &[f64],
    coordinator: &TimeframeSignalCoordinator,
) -> Result<SymbolAnalysis, StrategyError> {
    let features = FeatureVector::compute(closes, volumes)?;
    let coordinated = coordinator.coordinate(closes, volumes);
    let prediction = MlPrediction::from_features(&features);
    let decision = SignalDecision::decide(&features, &coordinated);
    Ok(SymbolAnalysis {
        symbol: symbol.to_string(),
        price,
        features,
        coordinated,
        prediction,
        decision,
    })
}

/// Step-level inputs shared by every candidate.
#[derive(Debug, Clone, Copy)]
pub struct ScanContext<'a> {
    pub regime: RegimeSnapshot,
    /// Current portfolio drawdown from its equity peak, in [0, 1].
    pub drawdown: f64,
    pub step: usize,
    pub book: &'a PerformanceBook,
    pub open_positions: &'a BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanVerdict {
    Selected,
    Throttled,
    NoCandidates,
    BelowThreshold,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    pub selected: Option<Opportunity>,
    /// The threshold the selected candidate cleared, or the leader's when none did.
    pub threshold: Option<f64>,
    pub candidates: usize,
    pub verdict: ScanVerdict,
}

impl ScanOutcome {
    fn empty(verdict: ScanVerdict) -> Self {
        Self { selected: None, threshold: None, candidates: 0, verdict }
    }
}

/// Merges signal and arbitrage candidates and picks at most one per step.
pub struct OpportunityScanner {
    strategy: StrategyId,
    settings: ScannerSettings,
    timeframes: TimeframeSettings,
    detectors: Vec<Box<dyn ArbitrageDetector>>,
}

impl std::fmt::Debug for OpportunityScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpportunityScanner")
            .field("strategy", &self.strategy)
            .field("detectors", &self.detectors.iter().map(|d| d.kind()).collect::<Vec<_>>())
            .finish()
    }
}

impl OpportunityScanner {
    pub fn new(
        strategy: StrategyId,
        settings: ScannerSettings,
        timeframes: TimeframeSettings,
        detectors: Vec<Box<dyn ArbitrageDetector>>,
    ) -> Self {
        Self { strategy, settings, timeframes, detectors }
    }

    pub fn strategy(&self) -> StrategyId {
        self.strategy
    }

    pub fn settings(&self) -> &ScannerSettings {
        &self.settings
    }

    fn uses_signals(&self) -> bool {
        !matches!(self.strategy, StrategyId::ArbitrageOnly)
    }

    fn uses_arbitrage(&self) -> bool {
        !matches!(self.strategy, StrategyId::TrendFollowing) && !self.detectors.is_empty()
    }

    fn risk_adjust(&self, score: f64, action: OrderSide, analysis: &SymbolAnalysis) -> f64 {
        let volatility_factor = 1.0 / (1.0 + 10.0 * analysis.features.volatility.max(0.0));
        score
            * analysis.coordinated.score_multiplier(action, &self.timeframes)
            * volatility_factor
            * analysis.prediction.risk_factor(action)
    }

    /// Feature-driven candidates for symbols without a position.
    pub fn signal_candidates(&self, analyses: &[SymbolAnalysis], ctx: &ScanContext<'_>) -> Vec<Opportunity> {
        let regime = ctx.regime.regime;
        analyses
            .iter()
            .filter(|a| !ctx.open_positions.contains(&a.symbol))
            .filter_map(|a| {
                let d = &a.decision;
                if a.coordinated.vetoes(d.action, regime, &self.timeframes) {
                    tracing::debug!(symbol = %a.symbol, action = ?d.action, "timeframe veto");
                    return None;
                }
                let score = regime_adjusted_score(
                    d.base_score,
                    regime,
                    self.settings.bull_multiplier,
                    self.settings.bear_multiplier,
                );
                Some(Opportunity {
                    symbol: a.symbol.clone(),
                    action: d.action,
                    confidence: d.confidence,
                    score,
                    risk_adjusted_score: self.risk_adjust(score, d.action, a),
                    quality: d.quality,
                    price: a.price,
                    volatility: d.volatility,
                    risk_tier: d.risk_tier,
                    origin: OpportunityOrigin::Signal,
                })
            })
            .collect()
    }

    /// Runs every detector in parallel and keeps the best signal per symbol.
    pub fn arbitrage_candidates(
        &self,
        analyses: &[SymbolAnalysis],
        market: &MarketView<'_>,
        ctx: &ScanContext<'_>,
    ) -> Vec<Opportunity> {
        let signals: Vec<ArbitrageSignal> = self
            .detectors
            .par_iter()
            .flat_map_iter(|detector| detector.detect(market, &ctx.regime))
            .collect();

        let by_symbol: BTreeMap<&str, &SymbolAnalysis> =
            analyses.iter().map(|a| (a.symbol.as_str(), a)).collect();
        let mut best: BTreeMap<String, Opportunity> = BTreeMap::new();
        for signal in signals {
            if ctx.open_positions.contains(&signal.primary) {
                continue;
            }
            let Some(analysis) = by_symbol.get(signal.primary.as_str()) else {
                tracing::debug!(symbol = %signal.primary, kind = %signal.kind, "arbitrage signal without analysis");
                continue;
            };
            let tier_factor = match signal.risk_tier {
                RiskTier::Low => 1.0,
                RiskTier::Medium => 0.9,
                RiskTier::High => 0.75,
            };
            let score = signal.confidence.clamp(0.0, 1.0);
            let candidate = Opportunity {
                symbol: signal.primary.clone(),
                action: signal.direction,
                confidence: signal.confidence,
                score,
                risk_adjusted_score: self.risk_adjust(score, signal.direction, analysis),
                quality: ((0.5 + 0.5 * signal.confidence) * tier_factor).clamp(0.0, 1.0),
                price: analysis.price,
                volatility: analysis.features.volatility,
                risk_tier: signal.risk_tier,
                origin: OpportunityOrigin::Arbitrage(signal),
            };
            match best.get(&candidate.symbol) {
                Some(existing) if existing.risk_adjusted_score >= candidate.risk_adjusted_score => {}
                _ => {
                    best.insert(candidate.symbol.clone(), candidate);
                }
            }
        }
        best.into_values().collect()
    }

    /// Orders executable candidates and applies the arbitrage preference.
    pub fn rank(&self, mut candidates: Vec<Opportunity>, drawdown: f64) -> Vec<Opportunity> {
        candidates.retain(|c| c.action == OrderSide::Buy);
        candidates.sort_by(|a, b| {
            b.risk_adjusted_score
                .total_cmp(&a.risk_adjusted_score)
                .then_with(|| a.symbol.cmp(&b.symbol))
                .then_with(|| a.is_arbitrage().cmp(&b.is_arbitrage()))
        });

        let Some(leader) = candidates.first() else {
            return candidates;
        };
        if leader.is_arbitrage() {
            return candidates;
        }
        let Some(pos) = candidates.iter().position(Opportunity::is_arbitrage) else {
            return candidates;
        };
        let best_arb = &candidates[pos];
        let ratio = if leader.risk_adjusted_score > 0.0 {
            best_arb.risk_adjusted_score / leader.risk_adjusted_score
        } else {
            1.0
        };

        let s = &self.settings;
        let dominated = candidates.iter().take(3).filter(|c| c.is_arbitrage()).count() >= 2;
        let preferred = (dominated
            && best_arb.quality > s.arbitrage_min_quality
            && ratio >= 1.0 - s.arbitrage_preference_margin)
            || (drawdown > s.recovery_drawdown && ratio >= 1.0 - s.recovery_preference_margin);
        if preferred {
            tracing::debug!(symbol = %best_arb.symbol, ratio, drawdown, "preferring arbitrage candidate");
            let arb = candidates.remove(pos);
            candidates.insert(0, arb);
        }
        candidates
    }

    /// Entry threshold for `candidate`, compared against its risk-adjusted score.
    pub fn dynamic_threshold(&self, candidate: &Opportunity, ctx: &ScanContext<'_>) -> f64 {
        let s = &self.settings;
        let base = match ctx.regime.regime.effective() {
            MarketRegime::StrongBull | MarketRegime::WeakBull => s.threshold_bull,
            MarketRegime::Sideways | MarketRegime::TrueSideways | MarketRegime::LowVolatility => {
                s.threshold_sideways
            }
            MarketRegime::WeakBear | MarketRegime::StrongBear => s.threshold_bear,
            MarketRegime::ExtremeBear => s.threshold_extreme_bear,
            MarketRegime::Mixed | MarketRegime::Unknown => s.threshold_mixed,
        };
        let volatility = if candidate.volatility < LOW_VOLATILITY {
            0.95
        } else if candidate.volatility > HIGH_VOLATILITY {
            1.08
        } else {
            1.0
        };
        let aggregate = ctx.book.aggregate();
        let portfolio = match aggregate.win_rate() {
            _ if aggregate.trade_count < 5 => 1.0,
            wr if wr > 0.6 => 0.92,
            wr if wr < 0.4 => 1.08,
            _ => 1.0,
        };
        let symbol = match ctx.book.symbol(&candidate.symbol) {
            Some(rec) if rec.trade_count >= 3 && rec.win_rate() < 0.25 => 1.4,
            Some(rec) if rec.trade_count >= 3 && rec.win_rate() > 0.8 => 0.85,
            _ => 1.0,
        };
        let quality = 1.1 - 0.2 * candidate.quality;

        (base * volatility * portfolio * symbol * quality).clamp(s.threshold_min, s.threshold_max)
    }

    /// Scans the universe and returns at most one opportunity.
    pub fn scan(
        &self,
        analyses: &[SymbolAnalysis],
        market: &MarketView<'_>,
        ctx: &ScanContext<'_>,
    ) -> ScanOutcome {
        let s = &self.settings;
        let recent = ctx.book.entries_since(ctx.step.saturating_sub(s.recent_trade_window));
        if recent >= s.max_recent_trades {
            tracing::debug!(recent, step = ctx.step, "trade frequency throttled");
            return ScanOutcome::empty(ScanVerdict::Throttled);
        }

        let (signals, arbitrage) = rayon::join(
            || {
                if self.uses_signals() {
                    self.signal_candidates(analyses, ctx)
                } else {
                    Vec::new()
                }
            },
            || {
                if self.uses_arbitrage() {
                    self.arbitrage_candidates(analyses, market, ctx)
                } else {
                    Vec::new()
                }
            },
        );

        let mut merged = signals;
        merged.extend(arbitrage);
        let ranked = self.rank(merged, ctx.drawdown);
        if ranked.is_empty() {
            return ScanOutcome::empty(ScanVerdict::NoCandidates);
        }

        let candidates = ranked.len();
        let mut leader_threshold = None;
        for candidate in ranked {
            let threshold = self.dynamic_threshold(&candidate, ctx);
            leader_threshold.get_or_insert(threshold);
            if candidate.risk_adjusted_score.partial_cmp(&threshold) != Some(Ordering::Less) {
                tracing::debug!(
                    symbol = %candidate.symbol,
                    origin = %candidate.origin,
                    score = candidate.risk_adjusted_score,
                    threshold,
                    "opportunity selected"
                );
                return ScanOutcome {
                    selected: Some(candidate),
                    threshold: Some(threshold),
                    candidates,
                    verdict: ScanVerdict::Selected,
                };
            }
        }
        ScanOutcome {
            selected: None,
            threshold: leader_threshold,
            candidates,
            verdict: ScanVerdict::BelowThreshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::{CorrelationArbitrage, SeriesView};
    use configuration::Arbitrage as ArbitrageSettings;
    use core_types::ArbitrageKind;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn scanner(strategy: StrategyId) -> OpportunityScanner {
        OpportunityScanner::new(
            strategy,
            ScannerSettings::default(),
            TimeframeSettings::default(),
            vec![Box::new(CorrelationArbitrage::new(ArbitrageSettings::default()))],
        )
    }

    fn coordinator() -> TimeframeSignalCoordinator {
        TimeframeSignalCoordinator::new(TimeframeSettings::default(), 60)
    }

    fn series(n: usize, step: f64) -> Vec<f64> {
        (0..n).map(|i| 100.0 * (1.0 + step).powi(i as i32)).collect()
    }

    fn analysis(symbol: &str, closes: &[f64]) -> SymbolAnalysis {
        let volumes = vec![1_000.0; closes.len()];
        analyze_symbol(symbol, dec!(100), closes, &volumes, &coordinator()).unwrap()
    }

    fn opportunity(symbol: &str, risk_adjusted_score: f64, quality: f64, arbitrage: bool) -> Opportunity {
        let origin = if arbitrage {
            OpportunityOrigin::Arbitrage(ArbitrageSignal {
                kind: ArbitrageKind::Statistical,
                primary: symbol.to_string(),
                secondary: None,
                direction: OrderSide::Buy,
                expected_return: 0.02,
                confidence: 0.8,
                supporting_stat: -2.5,
                horizon: 10,
                risk_tier: RiskTier::Low,
            })
        } else {
            OpportunityOrigin::Signal
        };
        Opportunity {
            symbol: symbol.to_string(),
            action: OrderSide::Buy,
            confidence: 0.8,
            score: 0.8,
            risk_adjusted_score,
            quality,
            price: dec!(10),
            volatility: 0.02,
            risk_tier: RiskTier::Medium,
            origin,
        }
    }

    fn ctx<'a>(book: &'a PerformanceBook, open: &'a BTreeSet<String>, regime: MarketRegime) -> ScanContext<'a> {
        ScanContext {
            regime: RegimeSnapshot::fixed(regime),
            drawdown: 0.0,
            step: 100,
            book,
            open_positions: open,
        }
    }

    #[test]
    fn uptrend_selects_a_buy_that_clears_its_threshold() {
        let closes = series(120, 0.005);
        let analyses = vec![analysis("UP", &closes)];
        let book = PerformanceBook::new();
        let open = BTreeSet::new();
        let c = ctx(&book, &open, MarketRegime::StrongBull);

        let outcome = scanner(StrategyId::Adaptive).scan(&analyses, &MarketView::default(), &c);
        assert_eq!(outcome.verdict, ScanVerdict::Selected);
        let selected = outcome.selected.unwrap();
        assert_eq!(selected.action, OrderSide::Buy);
        assert!(selected.risk_adjusted_score >= outcome.threshold.unwrap());
        assert!((0.0..=1.0).contains(&selected.score));
    }

    #[test]
    fn downtrend_sells_are_not_executable() {
        let closes = series(120, -0.005);
        let analyses = vec![analysis("DOWN", &closes)];
        let book = PerformanceBook::new();
        let open = BTreeSet::new();
        let c = ctx(&book, &open, MarketRegime::WeakBear);

        let outcome = scanner(StrategyId::TrendFollowing).scan(&analyses, &MarketView::default(), &c);
        assert_eq!(outcome.verdict, ScanVerdict::NoCandidates);
    }

    #[test]
    fn open_positions_are_skipped() {
        let closes = series(120, 0.005);
        let analyses = vec![analysis("UP", &closes)];
        let book = PerformanceBook::new();
        let open: BTreeSet<String> = ["UP".to_string()].into();
        let c = ctx(&book, &open, MarketRegime::StrongBull);
        assert!(scanner(StrategyId::Adaptive).signal_candidates(&analyses, &c).is_empty());
    }

    #[test]
    fn frequent_trading_throttles_the_scan() {
        let closes = series(120, 0.005);
        let analyses = vec![analysis("UP", &closes)];
        let book = PerformanceBook::new();
        for step in 90..95 {
            book.record_entry("OTHER", step);
        }
        let open = BTreeSet::new();
        let c = ctx(&book, &open, MarketRegime::StrongBull);
        let outcome = scanner(StrategyId::Adaptive).scan(&analyses, &MarketView::default(), &c);
        assert_eq!(outcome.verdict, ScanVerdict::Throttled);
        assert!(outcome.selected.is_none());
    }

    #[test]
    fn arbitrage_only_ignores_feature_signals() {
        let closes = series(120, 0.005);
        let analyses = vec![analysis("UP", &closes)];
        let book = PerformanceBook::new();
        let open = BTreeSet::new();
        let c = ctx(&book, &open, MarketRegime::StrongBull);
        let outcome = scanner(StrategyId::ArbitrageOnly).scan(&analyses, &MarketView::default(), &c);
        assert_eq!(outcome.verdict, ScanVerdict::NoCandidates);
    }

    #[test]
    fn correlation_signal_becomes_an_arbitrage_candidate() {
        let mut price = 100.0;
        let lag: Vec<f64> = (0..80)
            .map(|i| {
                price *= 1.0 + 0.01 * ((i as f64) * 0.7).sin();
                price
            })
            .collect();
        let mut lead = lag.clone();
        for (k, p) in lead[75..].iter_mut().enumerate() {
            *p *= 1.02f64.powi(k as i32 + 1);
        }
        let volumes = vec![1_000.0; 80];
        let analyses = vec![analysis("LAG", &lag), analysis("LEAD", &lead)];
        let market = MarketView::new(vec![
            SeriesView { symbol: "LAG", closes: &lag, volumes: &volumes, tradable: true },
            SeriesView { symbol: "LEAD", closes: &lead, volumes: &volumes, tradable: true },
        ]);
        let book = PerformanceBook::new();
        let open = BTreeSet::new();
        let c = ctx(&book, &open, MarketRegime::Sideways);

        let candidates = scanner(StrategyId::ArbitrageOnly).arbitrage_candidates(&analyses, &market, &c);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].symbol, "LAG");
        assert!(candidates[0].is_arbitrage());
        assert_eq!(candidates[0].price, dec!(100));
    }

    #[test]
    fn arbitrage_is_preferred_when_it_dominates_the_top_three() {
        let scanner = scanner(StrategyId::Adaptive);
        let ranked = scanner.rank(
            vec![
                opportunity("A", 1.0, 0.7, false),
                opportunity("B", 0.85, 0.8, true),
                opportunity("C", 0.80, 0.8, true),
            ],
            0.0,
        );
        assert_eq!(ranked[0].symbol, "B");

        // Outside the margin the leader stays.
        let ranked = scanner.rank(
            vec![
                opportunity("A", 1.0, 0.7, false),
                opportunity("B", 0.7, 0.8, true),
                opportunity("C", 0.6, 0.8, true),
            ],
            0.0,
        );
        assert_eq!(ranked[0].symbol, "A");
    }

    #[test]
    fn recovery_mode_prefers_arbitrage_within_the_wider_margin() {
        let scanner = scanner(StrategyId::Adaptive);
        let candidates = vec![opportunity("A", 1.0, 0.5, false), opportunity("B", 0.65, 0.5, true)];
        assert_eq!(scanner.rank(candidates.clone(), 0.1)[0].symbol, "A");
        assert_eq!(scanner.rank(candidates, 0.7)[0].symbol, "B");
    }

    #[test]
    fn poor_symbols_face_a_higher_threshold() {
        let scanner = scanner(StrategyId::Adaptive);
        let book = PerformanceBook::new();
        let open = BTreeSet::new();
        let c = ctx(&book, &open, MarketRegime::WeakBull);
        let candidate = opportunity("A", 0.6, 0.5, false);
        let before = scanner.dynamic_threshold(&candidate, &c);
        assert!((before - 0.50).abs() < 1e-12);

        for _ in 0..4 {
            book.record_close("A", -5.0, -0.02);
        }
        let after = scanner.dynamic_threshold(&candidate, &c);
        assert!((after - 0.70).abs() < 1e-12, "after = {after}");
    }

    #[test]
    fn threshold_stays_within_bounds() {
        let scanner = scanner(StrategyId::Adaptive);
        let book = PerformanceBook::new();
        for _ in 0..5 {
            book.record_close("A", -5.0, -0.02);
        }
        let open = BTreeSet::new();
        let c = ctx(&book, &open, MarketRegime::ExtremeBear);
        let mut candidate = opportunity("A", 0.6, 0.0, false);
        candidate.volatility = 0.1;
        assert_eq!(scanner.dynamic_threshold(&candidate, &c), 0.95);
    }

    proptest! {
        #[test]
        fn signal_scores_stay_in_unit_interval(
            steps in prop::collection::vec(-0.05f64..0.05, 60..150),
        ) {
            let mut price = 100.0;
            let closes: Vec<f64> = steps.iter().map(|s| { price *= 1.0 + s; price }).collect();
            let analyses = vec![analysis("P", &closes)];
            let book = PerformanceBook::new();
            let open = BTreeSet::new();
            for regime in [MarketRegime::StrongBull, MarketRegime::StrongBear, MarketRegime::Mixed] {
                let c = ctx(&book, &open, regime);
                for candidate in scanner(StrategyId::Adaptive).signal_candidates(&analyses, &c) {
                    prop_assert!((0.0..=1.0).contains(&candidate.score));
                    prop_assert!(candidate.risk_adjusted_score >= 0.0);
                }
            }
        }
    }
}
