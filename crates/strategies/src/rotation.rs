use configuration::Rotation as RotationSettings;
use core_types::{PerformanceBook, PerformanceRecord};
use indicators::window_return;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const W_PROFITABILITY: f64 = 0.40;
const W_WIN_RATE: f64 = 0.25;
const W_ACTIVITY: f64 = 0.15;
const W_RECENT_RETURN: f64 = 0.10;
const W_SHORT_TREND: f64 = 0.25;
const WEIGHT_SUM: f64 = W_PROFITABILITY + W_WIN_RATE + W_ACTIVITY + W_RECENT_RETURN + W_SHORT_TREND;

const POOR_PENALTY: f64 = 0.3;
const PROVEN_BONUS: f64 = 1.3;

/// The outcome of one rotation: who trades next, and whose positions must be closed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RotationPlan {
    pub active: BTreeSet<String>,
    /// Previously active symbols that fell out of the top K.
    pub demoted: Vec<String>,
    /// Every scored symbol, best first.
    pub ranking: Vec<(String, f64)>,
}

/// Periodically narrows the universe to the best-scoring K symbols.
#[derive(Debug, Clone)]
pub struct CoinRotationSelector {
    settings: RotationSettings,
}

impl CoinRotationSelector {
    pub fn new(settings: RotationSettings) -> Self {
        Self { settings }
    }

    pub fn due(&self, step: usize) -> bool {
        step % self.settings.interval_steps.max(1) == 0
    }

    pub fn score(&self, closes: &[f64], record: Option<&PerformanceRecord>) -> f64 {
        let traded = record.filter(|r| r.trade_count > 0);
        let profitability = traded.map_or(0.5, |r| 0.5 + 0.5 * (r.mean_return() * 20.0).tanh());
        let win_rate = traded.map_or(0.5, PerformanceRecord::win_rate);
        let activity = traded.map_or(0.0, |r| (r.trade_count as f64 / 10.0).min(1.0));
        let recent = window_return(closes, self.settings.return_lookback)
            .map_or(0.5, |r| 0.5 + 0.5 * (r * 10.0).tanh());
        let trend = window_return(closes, self.settings.trend_lookback)
            .map_or(0.5, |r| 0.5 + 0.5 * (r * 20.0).tanh());

        let raw = (W_PROFITABILITY * profitability
            + W_WIN_RATE * win_rate
            + W_ACTIVITY * activity
            + W_RECENT_RETURN * recent
            + W_SHORT_TREND * trend)
            / WEIGHT_SUM;

        match traded {
            Some(r) if r.trade_count >= 3 && r.win_rate() < 0.3 => raw * POOR_PENALTY,
            Some(r) if r.trade_count >= 5 && r.win_rate() >= 0.6 && r.total_pnl > 0.0 => raw * PROVEN_BONUS,
            _ => raw,
        }
    }

    /// Scores `universe` (symbol, visible closes) and keeps the top K.
    pub fn rotate(
        &self,
        universe: &[(&str, &[f64])],
        book: &PerformanceBook,
        current: &BTreeSet<String>,
    ) -> RotationPlan {
        let mut ranking: Vec<(String, f64)> = universe
            .iter()
            .map(|(symbol, closes)| {
                let record = book.symbol(symbol);
                (symbol.to_string(), self.score(closes, record.as_ref()))
            })
            .collect();
        ranking.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let active: BTreeSet<String> = ranking
            .iter()
            .take(self.settings.top_k.max(1))
            .map(|(s, _)| s.clone())
            .collect();
        let demoted: Vec<String> = current.difference(&active).cloned().collect();
        if !demoted.is_empty() {
            tracing::info!(?active, ?demoted, "universe rotated");
        }
        RotationPlan { active, demoted, ranking }
    }
}
