use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use strategies::{CoordinatedSignal, FeatureVector, MlPrediction, SignalDecision};

/// The slice of history an analysis was computed on: every bar up to `end`, `bars` of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeWindow {
    pub end: DateTime<Utc>,
    pub bars: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub symbol: String,
    pub window: TimeWindow,
}

impl CacheKey {
    pub fn new(symbol: impl Into<String>, end: DateTime<Utc>, bars: usize) -> Self {
        Self {
            symbol: symbol.into(),
            window: TimeWindow { end, bars },
        }
    }
}

/// Features plus the coordinated multi-timeframe signal, cached together.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureEntry {
    pub features: FeatureVector,
    pub coordinated: CoordinatedSignal,
}

/// Per-window analysis results. A miss is never an error: the caller recomputes.
pub trait AnalysisCache: Send + Sync {
    fn get_features(&self, key: &CacheKey) -> Option<FeatureEntry>;
    fn put_features(&self, key: CacheKey, entry: FeatureEntry);
    fn get_prediction(&self, key: &CacheKey) -> Option<MlPrediction>;
    fn put_prediction(&self, key: CacheKey, prediction: MlPrediction);
    fn get_decision(&self, key: &CacheKey) -> Option<SignalDecision>;
    fn put_decision(&self, key: CacheKey, decision: SignalDecision);
    /// Drops windows of `symbol` shorter than `min_bars`.
    fn prune(&self, symbol: &str, min_bars: usize);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Sharded in-memory cache. Values are computed outside the maps; the shard
/// lock is held only for the insert.
#[derive(Debug, Default)]
pub struct MemoryCache {
    features: DashMap<CacheKey, FeatureEntry>,
    predictions: DashMap<CacheKey, MlPrediction>,
    decisions: DashMap<CacheKey, SignalDecision>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.features.len() + self.predictions.len() + self.decisions.len(),
        }
    }

    fn lookup<V: Clone>(&self, map: &DashMap<CacheKey, V>, key: &CacheKey) -> Option<V> {
        let found = map.get(key).map(|entry| entry.value().clone());
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }
}

impl AnalysisCache for MemoryCache {
    fn get_features(&self, key: &CacheKey) -> Option<FeatureEntry> {
        self.lookup(&self.features, key)
    }

    fn put_features(&self, key: CacheKey, entry: FeatureEntry) {
        self.features.insert(key, entry);
    }

    fn get_prediction(&self, key: &CacheKey) -> Option<MlPrediction> {
        self.lookup(&self.predictions, key)
    }

    fn put_prediction(&self, key: CacheKey, prediction: MlPrediction) {
        self.predictions.insert(key, prediction);
    }

    fn get_decision(&self, key: &CacheKey) -> Option<SignalDecision> {
        self.lookup(&self.decisions, key)
    }

    fn put_decision(&self, key: CacheKey, decision: SignalDecision) {
        self.decisions.insert(key, decision);
    }

    fn prune(&self, symbol: &str, min_bars: usize) {
        let keep = |key: &CacheKey| key.symbol != symbol || key.window.bars >= min_bars;
        self.features.retain(|key, _| keep(key));
        self.predictions.retain(|key, _| keep(key));
        self.decisions.retain(|key, _| keep(key));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use strategies::{FeatureVector, MlPrediction};

    fn features() -> FeatureVector {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let volumes = vec![10.0; 40];
        FeatureVector::compute(&closes, &volumes).unwrap()
    }

    fn key(symbol: &str, bars: usize) -> CacheKey {
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(bars as i64);
        CacheKey::new(symbol, end, bars)
    }

    #[test]
    fn misses_then_hits() {
        let cache = MemoryCache::new();
        let f = features();
        let prediction = MlPrediction::from_features(&f);
        assert!(cache.get_prediction(&key("BTC", 40)).is_none());
        cache.put_prediction(key("BTC", 40), prediction);
        assert_eq!(cache.get_prediction(&key("BTC", 40)), Some(prediction));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn pruning_only_touches_the_named_symbol() {
        let cache = MemoryCache::new();
        let prediction = MlPrediction::from_features(&features());
        for bars in 40..45 {
            cache.put_prediction(key("BTC", bars), prediction);
            cache.put_prediction(key("ETH", bars), prediction);
        }
        cache.prune("BTC", 43);
        assert!(cache.get_prediction(&key("BTC", 42)).is_none());
        assert!(cache.get_prediction(&key("BTC", 43)).is_some());
        assert!(cache.get_prediction(&key("ETH", 40)).is_some());
        assert_eq!(cache.stats().entries, 7);
    }
}
