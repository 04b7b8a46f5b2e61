use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

/// Number of trade returns kept for the rolling Sharpe estimate.
const RETURN_WINDOW: usize = 50;
/// Number of recent entries remembered for frequency throttling.
const ENTRY_LOG_CAPACITY: usize = 256;

/// Coarse classification of how a symbol has been trading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformerClass {
    Poor,
    Normal,
    Excellent,
}

/// Realized trading statistics. Updated only when a trade closes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub trade_count: u32,
    pub wins: u32,
    pub losses: u32,
    pub total_pnl: f64,
    gross_win: f64,
    gross_loss: f64,
    cumulative_pnl: f64,
    peak_cumulative_pnl: f64,
    /// Largest decline of cumulative PnL from its running peak, in quote currency.
    pub max_drawdown: f64,
    recent_returns: VecDeque<f64>,
}

impl PerformanceRecord {
    pub fn record_close(&mut self, pnl: f64, return_pct: f64) {
        self.trade_count += 1;
        if pnl > 0.0 {
            self.wins += 1;
            self.gross_win += pnl;
        } else {
            self.losses += 1;
            self.gross_loss += -pnl;
        }
        self.total_pnl += pnl;

        self.cumulative_pnl += pnl;
        self.peak_cumulative_pnl = self.peak_cumulative_pnl.max(self.cumulative_pnl);
        self.max_drawdown = self
            .max_drawdown
            .max(self.peak_cumulative_pnl - self.cumulative_pnl);

        if self.recent_returns.len() == RETURN_WINDOW {
            self.recent_returns.pop_front();
        }
        self.recent_returns.push_back(return_pct);
    }

    pub fn win_rate(&self) -> f64 {
        if self.trade_count == 0 {
            0.0
        } else {
            self.wins as f64 / self.trade_count as f64
        }
    }

    pub fn avg_win(&self) -> f64 {
        if self.wins == 0 { 0.0 } else { self.gross_win / self.wins as f64 }
    }

    /// Average losing trade as a positive number.
    pub fn avg_loss(&self) -> f64 {
        if self.losses == 0 { 0.0 } else { self.gross_loss / self.losses as f64 }
    }

    /// Mean of the recent trade returns.
    pub fn mean_return(&self) -> f64 {
        if self.recent_returns.is_empty() {
            return 0.0;
        }
        self.recent_returns.iter().sum::<f64>() / self.recent_returns.len() as f64
    }

    /// Mean over standard deviation of the recent trade returns.
    pub fn sharpe(&self) -> f64 {
        let n = self.recent_returns.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.recent_returns.iter().sum::<f64>() / n as f64;
        let var = self
            .recent_returns
            .iter()
            .map(|r| (r - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        let std = var.sqrt();
        if std < f64::EPSILON { 0.0 } else { mean / std }
    }

    pub fn classify(&self) -> PerformerClass {
        if self.trade_count >= 5 && self.win_rate() >= 0.6 && self.total_pnl > 0.0 {
            PerformerClass::Excellent
        } else if self.trade_count >= 3 && (self.win_rate() < 0.3 || self.total_pnl < 0.0) {
            PerformerClass::Poor
        } else {
            PerformerClass::Normal
        }
    }
}

#[derive(Debug, Default)]
struct BookInner {
    symbols: HashMap<String, PerformanceRecord>,
    aggregate: PerformanceRecord,
    entries: VecDeque<(usize, String)>,
}

/// Shared, lock-guarded performance state read by sizing, stop-loss and rotation.
///
/// Cloning the book clones the handle, not the data.
#[derive(Debug, Clone, Default)]
pub struct PerformanceBook {
    inner: Arc<RwLock<BookInner>>,
}

impl PerformanceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a closed trade against the symbol and the portfolio aggregate.
    pub fn record_close(&self, symbol: &str, pnl: f64, return_pct: f64) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner
            .symbols
            .entry(symbol.to_string())
            .or_default()
            .record_close(pnl, return_pct);
        inner.aggregate.record_close(pnl, return_pct);
    }

    /// Records that a position was opened at `step`.
    pub fn record_entry(&self, symbol: &str, step: usize) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.entries.len() == ENTRY_LOG_CAPACITY {
            inner.entries.pop_front();
        }
        inner.entries.push_back((step, symbol.to_string()));
    }

    pub fn symbol(&self, symbol: &str) -> Option<PerformanceRecord> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.symbols.get(symbol).cloned()
    }

    pub fn aggregate(&self) -> PerformanceRecord {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.aggregate.clone()
    }

    /// Number of entries opened at or after `since_step`.
    pub fn entries_since(&self, since_step: usize) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.entries.iter().filter(|(step, _)| *step >= since_step).count()
    }

    pub fn symbol_entries_since(&self, symbol: &str, since_step: usize) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .entries
            .iter()
            .filter(|(step, s)| *step >= since_step && s == symbol)
            .count()
    }

    /// A point-in-time copy of every per-symbol record.
    pub fn snapshot(&self) -> HashMap<String, PerformanceRecord> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.symbols.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_tracks_drawdown_of_cumulative_pnl() {
        let mut record = PerformanceRecord::default();
        record.record_close(100.0, 0.10);
        record.record_close(-30.0, -0.03);
        record.record_close(-20.0, -0.02);
        record.record_close(80.0, 0.08);

        assert_eq!(record.trade_count, 4);
        assert_eq!(record.wins, 2);
        assert_eq!(record.losses, 2);
        assert!((record.win_rate() - 0.5).abs() < 1e-12);
        assert!((record.max_drawdown - 50.0).abs() < 1e-12);
        assert!((record.avg_win() - 90.0).abs() < 1e-12);
        assert!((record.avg_loss() - 25.0).abs() < 1e-12);
        assert!(record.sharpe() > 0.0);
    }

    #[test]
    fn book_updates_symbol_and_aggregate() {
        let book = PerformanceBook::new();
        book.record_close("BTCUSDT", 10.0, 0.01);
        book.record_close("ETHUSDT", -5.0, -0.005);

        assert_eq!(book.symbol("BTCUSDT").unwrap().wins, 1);
        assert_eq!(book.aggregate().trade_count, 2);
        assert!(book.symbol("SOLUSDT").is_none());
    }

    #[test]
    fn entry_log_counts_recent_steps() {
        let book = PerformanceBook::new();
        for step in [1, 4, 8, 9, 12] {
            book.record_entry("BTCUSDT", step);
        }
        book.record_entry("ETHUSDT", 12);
        assert_eq!(book.entries_since(8), 4);
        assert_eq!(book.symbol_entries_since("BTCUSDT", 8), 3);
    }

    #[test]
    fn classification_thresholds() {
        let mut poor = PerformanceRecord::default();
        for _ in 0..3 {
            poor.record_close(-1.0, -0.01);
        }
        assert_eq!(poor.classify(), PerformerClass::Poor);

        let mut excellent = PerformanceRecord::default();
        for _ in 0..5 {
            excellent.record_close(1.0, 0.01);
        }
        assert_eq!(excellent.classify(), PerformerClass::Excellent);
        assert_eq!(PerformanceRecord::default().classify(), PerformerClass::Normal);
    }
}
