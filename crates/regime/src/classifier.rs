use crate::state::{RegimeHandle, RegimeTransition};
use chrono::{DateTime, Utc};
use configuration::Regime as RegimeSettings;
use core_types::MarketRegime;
use indicators::{mean, volatility, window_return};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Universe size above which thresholds are no longer widened.
const FULL_UNIVERSE: usize = 5;

/// Majority vote of one lookback window across the universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConsensus {
    pub window: usize,
    pub label: MarketRegime,
    /// Fraction of voting symbols that agree with `label`.
    pub share: f64,
    pub voters: usize,
    pub shares: BTreeMap<MarketRegime, f64>,
}

/// Everything one evaluation concluded, before hysteresis is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RegimeAssessment {
    pub proposal: MarketRegime,
    pub confidence: f64,
    pub turning_point: bool,
    pub eligible_symbols: usize,
    pub mean_volatility: f64,
    /// Mean drawdown from the long-window peak.
    pub mean_decline: f64,
    pub consensus: BTreeMap<usize, WindowConsensus>,
}

impl RegimeAssessment {
    fn unknown() -> Self {
        Self {
            proposal: MarketRegime::Unknown,
            confidence: 0.0,
            turning_point: false,
            eligible_symbols: 0,
            mean_volatility: 0.0,
            mean_decline: 0.0,
            consensus: BTreeMap::new(),
        }
    }
}

/// Classifies the market regime from multi-window price action across the universe.
#[derive(Debug, Clone)]
pub struct RegimeClassifier {
    settings: RegimeSettings,
}

struct Window {
    bars: usize,
    weight: f64,
    threshold: f64,
}

impl RegimeClassifier {
    pub fn new(settings: RegimeSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RegimeSettings {
        &self.settings
    }

    fn windows(&self, scale: f64) -> [Window; 3] {
        let s = &self.settings;
        [
            Window { bars: s.short_window, weight: s.short_weight, threshold: s.short_threshold * scale },
            Window { bars: s.medium_window, weight: s.medium_weight, threshold: s.medium_threshold * scale },
            Window { bars: s.long_window, weight: s.long_weight, threshold: s.long_threshold * scale },
        ]
    }

    /// Small universes are noisier, so their thresholds are widened.
    pub fn threshold_scale(&self, symbols: usize) -> f64 {
        if symbols < FULL_UNIVERSE {
            1.0 + self.settings.small_universe_widening * (FULL_UNIVERSE - symbols) as f64
        } else {
            1.0
        }
    }

    /// Maps a window return to one of the five trend labels.
    pub fn label_return(ret: f64, threshold: f64) -> MarketRegime {
        if ret > 2.0 * threshold {
            MarketRegime::StrongBull
        } else if ret > threshold {
            MarketRegime::WeakBull
        } else if ret < -2.0 * threshold {
            MarketRegime::StrongBear
        } else if ret < -threshold {
            MarketRegime::WeakBear
        } else {
            MarketRegime::Sideways
        }
    }

    /// Evaluates the universe without touching any shared state.
    ///
    /// `series` holds each symbol's visible closes, oldest first.
    pub fn assess(&self, series: &[&[f64]]) -> RegimeAssessment {
        let s = &self.settings;
        let eligible: Vec<&[f64]> = series
            .iter()
            .copied()
            .filter(|closes| closes.len() > s.short_window)
            .collect();
        if eligible.is_empty() {
            return RegimeAssessment::unknown();
        }

        let scale = self.threshold_scale(eligible.len());
        let windows = self.windows(scale);

        let mut consensus = BTreeMap::new();
        let mut combined: BTreeMap<MarketRegime, f64> = BTreeMap::new();
        let mut weight_sum = 0.0;

        for window in &windows {
            let mut votes: BTreeMap<MarketRegime, usize> = BTreeMap::new();
            for closes in eligible.iter().filter(|c| c.len() > window.bars) {
                if let Ok(ret) = window_return(closes, window.bars) {
                    *votes.entry(Self::label_return(ret, window.threshold)).or_default() += 1;
                }
            }
            let voters: usize = votes.values().sum();
            if voters == 0 {
                continue;
            }

            let shares: BTreeMap<MarketRegime, f64> = votes
                .iter()
                .map(|(label, count)| (*label, *count as f64 / voters as f64))
                .collect();
            let (label, share) = best_of(&shares);

            for (label, share) in &shares {
                *combined.entry(*label).or_default() += window.weight * share;
            }
            weight_sum += window.weight;
            consensus.insert(
                window.bars,
                WindowConsensus { window: window.bars, label, share, voters, shares },
            );
        }

        if weight_sum <= 0.0 {
            return RegimeAssessment::unknown();
        }
        for value in combined.values_mut() {
            *value /= weight_sum;
        }
        let (best, best_share) = best_of(&combined);

        let mean_volatility = mean(
            &eligible
                .iter()
                .filter_map(|c| volatility(c, s.medium_window.min(c.len() - 1)).ok())
                .collect::<Vec<_>>(),
        );
        let long_returns: Vec<f64> = eligible
            .iter()
            .filter_map(|c| window_return(c, s.long_window).ok())
            .collect();
        let mean_decline = mean(&eligible.iter().map(|c| decline_from_peak(c, s.long_window)).collect::<Vec<_>>());

        let derived = if best_share < s.mixed_threshold {
            MarketRegime::Mixed
        } else {
            match best {
                MarketRegime::Sideways => {
                    let medium_sideways = consensus
                        .get(&s.medium_window)
                        .and_then(|c| c.shares.get(&MarketRegime::Sideways))
                        .copied()
                        .unwrap_or(0.0);
                    if mean_volatility < s.low_volatility_threshold {
                        MarketRegime::LowVolatility
                    } else if medium_sideways >= s.true_sideways_share {
                        MarketRegime::TrueSideways
                    } else {
                        MarketRegime::Sideways
                    }
                }
                MarketRegime::StrongBear
                    if !long_returns.is_empty() && mean(&long_returns) < -s.extreme_bear_drop =>
                {
                    MarketRegime::ExtremeBear
                }
                other => other,
            }
        };

        let mut assessment = RegimeAssessment {
            proposal: derived,
            confidence: best_share,
            turning_point: false,
            eligible_symbols: eligible.len(),
            mean_volatility,
            mean_decline,
            consensus,
        };

        // A turn only counts when the consensus does not point the other way.
        if let Some(up) = self.turning_point(&eligible, &windows) {
            let against = if up { derived.is_bearish() } else { derived.is_bullish() };
            if !against {
                let aligned = if up { derived.is_bullish() } else { derived.is_bearish() };
                assessment.turning_point = true;
                assessment.confidence = s.turning_point_confidence;
                if !aligned {
                    assessment.proposal = if up { MarketRegime::WeakBull } else { MarketRegime::WeakBear };
                }
            }
        }

        assessment
    }

    /// Detects a reversal: enough medium-window first/second-half direction flips,
    /// confirmed by the short window. Returns the new direction (true = up).
    fn turning_point(&self, eligible: &[&[f64]], windows: &[Window; 3]) -> Option<bool> {
        let s = &self.settings;
        let (short, medium) = (&windows[0], &windows[1]);

        let mut voters = 0usize;
        let mut reversals = 0usize;
        let mut direction = 0.0;
        for closes in eligible.iter().filter(|c| c.len() > medium.bars) {
            voters += 1;
            let (first, second) = split_returns(closes, medium.bars);
            let min_move = medium.threshold / 2.0;
            if first.abs() > min_move && second.abs() > min_move && first.signum() != second.signum() {
                reversals += 1;
                direction += second;
            }
        }
        if voters == 0 || reversals == 0 {
            return None;
        }
        if (reversals as f64 / voters as f64) < s.turning_point_reversal_share {
            return None;
        }

        let up = direction > 0.0;
        let short_voters: Vec<&&[f64]> = eligible.iter().filter(|c| c.len() > short.bars).collect();
        let confirmations = short_voters
            .iter()
            .filter(|c| {
                let (_, second) = split_returns(c, short.bars);
                second.abs() > short.threshold / 2.0 && (second > 0.0) == up
            })
            .count();
        if short_voters.is_empty()
            || (confirmations as f64 / short_voters.len() as f64) < s.turning_point_confirmation_share
        {
            return None;
        }

        tracing::debug!(reversals, voters, confirmations, up, "turning point detected");
        Some(up)
    }

    /// Assesses the universe and offers the result to the shared regime state.
    pub fn evaluate(
        &self,
        handle: &RegimeHandle,
        series: &[&[f64]],
        now: DateTime<Utc>,
    ) -> (RegimeAssessment, Option<RegimeTransition>) {
        let assessment = self.assess(series);
        let short_bias_bullish = assessment
            .consensus
            .get(&self.settings.short_window)
            .is_some_and(|c| c.label.is_bullish());

        let transition = handle.write(|state| {
            state.record_context(assessment.consensus.clone(), assessment.mean_decline, short_bias_bullish);
            state.propose(assessment.proposal, assessment.confidence, assessment.turning_point, now)
        });

        tracing::debug!(
            proposal = %assessment.proposal,
            confidence = assessment.confidence,
            turning_point = assessment.turning_point,
            eligible = assessment.eligible_symbols,
            "regime evaluated"
        );
        (assessment, transition)
    }
}

/// The entry with the highest value; ties resolve to the first in key order.
fn best_of(map: &BTreeMap<MarketRegime, f64>) -> (MarketRegime, f64) {
    map.iter()
        .fold((MarketRegime::Unknown, f64::NEG_INFINITY), |best, (label, value)| {
            if *value > best.1 { (*label, *value) } else { best }
        })
}

/// Returns of the first and second half of the last `window` bars.
fn split_returns(closes: &[f64], window: usize) -> (f64, f64) {
    let start = closes.len() - 1 - window;
    let mid = start + window / 2;
    let end = closes.len() - 1;
    let ret = |a: usize, b: usize| {
        if closes[a] == 0.0 { 0.0 } else { closes[b] / closes[a] - 1.0 }
    };
    (ret(start, mid), ret(mid, end))
}

fn decline_from_peak(closes: &[f64], window: usize) -> f64 {
    let tail = &closes[closes.len().saturating_sub(window + 1)..];
    let peak = tail.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let last = tail[tail.len() - 1];
    if peak <= 0.0 { 0.0 } else { ((peak - last) / peak).max(0.0) }
}
