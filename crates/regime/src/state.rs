use crate::classifier::WindowConsensus;
use crate::phase::BearPhase;
use chrono::{DateTime, Duration, Utc};
use configuration::Regime as RegimeSettings;
use core_types::MarketRegime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Stability assigned before the first switch.
const INITIAL_STABILITY: f64 = 0.5;
const STABILITY_GAIN: f64 = 0.05;
const LOW_STABILITY: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    Consensus,
    TurningPoint,
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionReason::Consensus => f.write_str("consensus"),
            TransitionReason::TurningPoint => f.write_str("turning_point"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeTransition {
    pub from: MarketRegime,
    pub to: MarketRegime,
    pub at: DateTime<Utc>,
    pub confidence: f64,
    pub reason: TransitionReason,
}

/// A candidate regime and how many consecutive evaluations proposed it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PendingRegime {
    pub regime: MarketRegime,
    pub confirmations: u32,
}

/// The single active market regime plus the hysteresis bookkeeping around it.
///
/// Only [`RegimeState::propose`] changes `current`.
#[derive(Debug, Clone)]
pub struct RegimeState {
    settings: RegimeSettings,
    current: MarketRegime,
    entered_at: Option<DateTime<Utc>>,
    stability: f64,
    pending: Option<PendingRegime>,
    consensus: BTreeMap<usize, WindowConsensus>,
    transitions: Vec<RegimeTransition>,
    bear_since: Option<DateTime<Utc>>,
    decline: f64,
    short_bias_bullish: bool,
    last_confidence: f64,
}

impl RegimeState {
    pub fn new(settings: RegimeSettings) -> Self {
        Self {
            settings,
            current: MarketRegime::Unknown,
            entered_at: None,
            stability: INITIAL_STABILITY,
            pending: None,
            consensus: BTreeMap::new(),
            transitions: Vec::new(),
            bear_since: None,
            decline: 0.0,
            short_bias_bullish: false,
            last_confidence: 0.0,
        }
    }

    pub fn current(&self) -> MarketRegime {
        self.current
    }

    pub fn entered_at(&self) -> Option<DateTime<Utc>> {
        self.entered_at
    }

    pub fn stability(&self) -> f64 {
        self.stability
    }

    pub fn pending(&self) -> Option<PendingRegime> {
        self.pending
    }

    pub fn transitions(&self) -> &[RegimeTransition] {
        &self.transitions
    }

    /// Latest consensus per lookback window, keyed by window length in bars.
    pub fn consensus(&self) -> &BTreeMap<usize, WindowConsensus> {
        &self.consensus
    }

    pub fn last_confidence(&self) -> f64 {
        self.last_confidence
    }

    /// Minimum time between switches given the current stability and regime.
    pub fn cooldown(&self) -> Duration {
        let mut minutes = self.settings.base_cooldown_minutes as f64;
        if self.stability < LOW_STABILITY {
            minutes *= 2.0;
        }
        if self.current.is_strong() {
            minutes *= 1.5;
        }
        Duration::minutes(minutes.round() as i64)
    }

    /// Confidence a proposal must exceed to replace the current regime.
    pub fn dynamic_threshold(&self, candidate: MarketRegime) -> f64 {
        let mut threshold = self.settings.base_confidence_threshold;
        if self.stability < LOW_STABILITY {
            threshold += 0.1;
        }
        if candidate.is_extreme() {
            threshold += 0.1;
        }
        if self.current == MarketRegime::Unknown {
            threshold -= 0.1;
        }
        threshold.clamp(0.6, 0.9)
    }

    pub fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.entered_at {
            None => true,
            Some(at) => now - at >= self.cooldown(),
        }
    }

    /// Stores the per-window consensus and market context of the latest evaluation.
    pub(crate) fn record_context(
        &mut self,
        consensus: BTreeMap<usize, WindowConsensus>,
        decline: f64,
        short_bias_bullish: bool,
    ) {
        self.consensus = consensus;
        self.decline = decline;
        self.short_bias_bullish = short_bias_bullish;
    }

    /// Offers a regime proposal. Returns the transition when the switch is accepted.
    ///
    /// A switch requires the cooldown to have elapsed (waived for turning points and
    /// for the initial `Unknown` state), `confidence` above the dynamic threshold and
    /// the candidate having been proposed on enough consecutive evaluations.
    pub fn propose(
        &mut self,
        proposal: MarketRegime,
        confidence: f64,
        turning_point: bool,
        now: DateTime<Utc>,
    ) -> Option<RegimeTransition> {
        self.last_confidence = confidence;

        if proposal == MarketRegime::Unknown {
            self.pending = None;
            return None;
        }

        if proposal == self.current {
            self.stability = (self.stability + STABILITY_GAIN).min(1.0);
            self.pending = None;
            return None;
        }

        let confirmations = match self.pending {
            Some(p) if p.regime == proposal => p.confirmations + 1,
            _ => 1,
        };
        self.pending = Some(PendingRegime {
            regime: proposal,
            confirmations,
        });

        let threshold = self.dynamic_threshold(proposal);
        if confidence <= threshold {
            tracing::trace!(%proposal, confidence, threshold, "regime proposal below threshold");
            return None;
        }
        if confirmations < self.settings.required_confirmations {
            return None;
        }
        if !turning_point && !self.cooldown_elapsed(now) {
            tracing::trace!(%proposal, current = %self.current, "regime switch blocked by cooldown");
            return None;
        }

        let transition = RegimeTransition {
            from: self.current,
            to: proposal,
            at: now,
            confidence,
            reason: if turning_point {
                TransitionReason::TurningPoint
            } else {
                TransitionReason::Consensus
            },
        };

        match (self.current.is_bearish(), proposal.is_bearish()) {
            (false, true) => self.bear_since = Some(now),
            (_, false) => self.bear_since = None,
            (true, true) => {}
        }

        self.current = proposal;
        self.entered_at = Some(now);
        self.stability = if transition.from == MarketRegime::Unknown {
            self.stability
        } else {
            self.stability * 0.5
        };
        self.pending = None;
        self.transitions.push(transition.clone());

        tracing::info!(
            from = %transition.from,
            to = %transition.to,
            confidence = transition.confidence,
            reason = %transition.reason,
            "market regime switched"
        );
        Some(transition)
    }

    /// The bear-market phase, when the active regime is bearish.
    pub fn bear_phase(&self, now: DateTime<Utc>) -> Option<BearPhase> {
        if !self.current.is_bearish() {
            return None;
        }
        let hours = self
            .bear_since
            .map(|since| (now - since).num_hours().max(0))
            .unwrap_or(0);
        Some(BearPhase::detect(self.decline, hours, self.short_bias_bullish))
    }
}

/// Read-only view handed to components that only consume the regime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeSnapshot {
    pub regime: MarketRegime,
    pub stability: f64,
    pub confidence: f64,
    pub bear_phase: Option<BearPhase>,
}

impl RegimeSnapshot {
    /// A neutral snapshot for contexts with no classifier, such as unit tests.
    pub fn fixed(regime: MarketRegime) -> Self {
        Self {
            regime,
            stability: 1.0,
            confidence: 1.0,
            bear_phase: regime.is_bearish().then_some(BearPhase::Early),
        }
    }

    /// Bear-phase scaling of arbitrage thresholds; 1.0 outside bear regimes.
    pub fn threshold_multiplier(&self, base_bear_multiplier: f64) -> f64 {
        self.bear_phase
            .map(|phase| phase.threshold_multiplier(base_bear_multiplier))
            .unwrap_or(1.0)
    }
}

/// Shared handle to the regime state. Cloning shares the same state.
#[derive(Debug, Clone)]
pub struct RegimeHandle {
    inner: Arc<RwLock<RegimeState>>,
}

impl RegimeHandle {
    pub fn new(settings: RegimeSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegimeState::new(settings))),
        }
    }

    pub fn current(&self) -> MarketRegime {
        self.read(|state| state.current())
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> RegimeSnapshot {
        self.read(|state| RegimeSnapshot {
            regime: state.current(),
            stability: state.stability(),
            confidence: state.last_confidence(),
            bear_phase: state.bear_phase(now),
        })
    }

    pub fn transitions(&self) -> Vec<RegimeTransition> {
        self.read(|state| state.transitions().to_vec())
    }

    pub fn read<R>(&self, f: impl FnOnce(&RegimeState) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut RegimeState) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn state() -> RegimeState {
        RegimeState::new(RegimeSettings::default())
    }

    #[test]
    fn first_switch_needs_two_confirmations_but_no_cooldown() {
        let mut s = state();
        assert!(s.propose(MarketRegime::StrongBull, 0.9, false, t0()).is_none());
        let tr = s.propose(MarketRegime::StrongBull, 0.9, false, t0()).unwrap();
        assert_eq!(tr.from, MarketRegime::Unknown);
        assert_eq!(tr.reason, TransitionReason::Consensus);
        assert_eq!(s.current(), MarketRegime::StrongBull);
    }

    #[test]
    fn unknown_never_replaces_a_known_regime() {
        let mut s = state();
        s.propose(MarketRegime::WeakBull, 0.9, false, t0());
        s.propose(MarketRegime::WeakBull, 0.9, false, t0());
        for i in 0..10 {
            assert!(s.propose(MarketRegime::Unknown, 1.0, true, t0() + Duration::days(i)).is_none());
        }
        assert_eq!(s.current(), MarketRegime::WeakBull);
    }

    #[test]
    fn cooldown_blocks_consensus_but_not_turning_points() {
        let mut s = state();
        s.propose(MarketRegime::WeakBull, 0.9, false, t0());
        s.propose(MarketRegime::WeakBull, 0.9, false, t0());

        let soon = t0() + Duration::minutes(30);
        s.propose(MarketRegime::WeakBear, 0.95, false, soon);
        assert!(s.propose(MarketRegime::WeakBear, 0.95, false, soon).is_none());

        let tr = s.propose(MarketRegime::WeakBear, 0.95, true, soon).unwrap();
        assert_eq!(tr.reason, TransitionReason::TurningPoint);
        assert_eq!(s.current(), MarketRegime::WeakBear);
    }

    #[test]
    fn threshold_is_clamped_and_adjusted() {
        let mut s = state();
        assert!((s.dynamic_threshold(MarketRegime::WeakBull) - 0.6).abs() < 1e-12);
        s.propose(MarketRegime::WeakBull, 0.9, false, t0());
        s.propose(MarketRegime::WeakBull, 0.9, false, t0());
        assert!((s.dynamic_threshold(MarketRegime::Sideways) - 0.7).abs() < 1e-12);
        assert!((s.dynamic_threshold(MarketRegime::ExtremeBear) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn bear_phase_only_in_bear_regimes() {
        let mut s = state();
        assert!(s.bear_phase(t0()).is_none());
        s.propose(MarketRegime::StrongBear, 0.95, false, t0());
        s.propose(MarketRegime::StrongBear, 0.95, false, t0());
        assert_eq!(s.bear_phase(t0()), Some(BearPhase::Early));
    }

    fn regime_strategy() -> impl Strategy<Value = MarketRegime> {
        prop_oneof![
            Just(MarketRegime::Unknown),
            Just(MarketRegime::StrongBull),
            Just(MarketRegime::WeakBull),
            Just(MarketRegime::Sideways),
            Just(MarketRegime::WeakBear),
            Just(MarketRegime::StrongBear),
            Just(MarketRegime::ExtremeBear),
            Just(MarketRegime::Mixed),
        ]
    }

    proptest! {
        #[test]
        fn transitions_respect_cooldown_confidence_and_confirmation(
            steps in prop::collection::vec(
                (regime_strategy(), 0.0f64..1.0, prop::bool::weighted(0.1), 0i64..240),
                1..120,
            )
        ) {
            let mut s = state();
            let mut now = t0();
            for (proposal, confidence, turning, advance) in steps {
                now += Duration::minutes(advance);
                let threshold = s.dynamic_threshold(proposal);
                let cooled = s.cooldown_elapsed(now);
                let prior = s.pending().filter(|p| p.regime == proposal).map_or(0, |p| p.confirmations);
                let before = s.current();

                if let Some(tr) = s.propose(proposal, confidence, turning, now) {
                    prop_assert_ne!(tr.to, MarketRegime::Unknown);
                    prop_assert_eq!(tr.from, before);
                    prop_assert!(confidence > threshold);
                    prop_assert!(prior + 1 >= 2);
                    prop_assert!(cooled || turning);
                } else {
                    prop_assert!(s.current() == before);
                }
            }
            prop_assert!((0.0..=1.0).contains(&s.stability()));
        }
    }
}
