use crate::cache::{AnalysisCache, CacheKey, FeatureEntry};
use chrono::{DateTime, Utc};
use configuration::Concurrency;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use strategies::{
    FeatureVector, MlPrediction, SignalDecision, StrategyError, SymbolAnalysis, TimeframeSignalCoordinator,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::sync::CancellationToken;

/// One symbol's history at the current step; only the first `bars` values are visible.
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub symbol: String,
    pub price: Decimal,
    pub end: DateTime<Utc>,
    pub bars: usize,
    pub closes: Arc<[f64]>,
    pub volumes: Arc<[f64]>,
}

impl AnalysisInput {
    pub fn closes(&self) -> &[f64] {
        &self.closes[..self.bars.min(self.closes.len())]
    }

    pub fn volumes(&self) -> &[f64] {
        &self.volumes[..self.bars.min(self.volumes.len())]
    }

    fn key(&self) -> CacheKey {
        CacheKey::new(self.symbol.clone(), self.end, self.bars)
    }
}

/// Runs the per-symbol analysis fan-out for one step.
///
/// At most `worker_limit` symbols are analyzed at once; whatever has not
/// finished by the step deadline is abandoned for this step.
pub struct Precomputer {
    coordinator: Arc<TimeframeSignalCoordinator>,
    cache: Arc<dyn AnalysisCache>,
    permits: Arc<Semaphore>,
    worker_limit: usize,
    step_timeout: Duration,
    shutdown_grace: Duration,
    retention: usize,
    cancel: CancellationToken,
}

impl Precomputer {
    pub fn new(
        coordinator: TimeframeSignalCoordinator,
        cache: Arc<dyn AnalysisCache>,
        settings: &Concurrency,
        cancel: CancellationToken,
    ) -> Self {
        let worker_limit = settings.worker_limit.max(1);
        Self {
            coordinator: Arc::new(coordinator),
            cache,
            permits: Arc::new(Semaphore::new(worker_limit)),
            worker_limit,
            step_timeout: Duration::from_millis(settings.step_timeout_ms.max(1)),
            shutdown_grace: Duration::from_millis(settings.shutdown_grace_ms),
            retention: settings.cache_retention.max(1),
            cancel,
        }
    }

    /// Analyses of every input that finished in time, sorted by symbol.
    pub async fn analyze(&self, inputs: Vec<AnalysisInput>) -> Vec<SymbolAnalysis> {
        let mut tasks = JoinSet::new();
        for input in inputs {
            let permits = Arc::clone(&self.permits);
            let coordinator = Arc::clone(&self.coordinator);
            let cache = Arc::clone(&self.cache);
            let cancel = self.cancel.clone();
            let retention = self.retention;
            tasks.spawn(async move {
                let _permit = tokio::select! {
                    permit = permits.acquire_owned() => permit.ok()?,
                    _ = cancel.cancelled() => return None,
                };
                // Indicator and feature work is CPU-bound; keep it off the async workers.
                let work = tokio::task::spawn_blocking(move || {
                    let result = analyze_cached(&input, &coordinator, cache.as_ref());
                    cache.prune(&input.symbol, input.bars.saturating_sub(retention - 1));
                    result.map_err(|error| (input.symbol, error))
                });
                match work.await {
                    Ok(Ok(analysis)) => Some(analysis),
                    Ok(Err((symbol, error))) => {
                        tracing::debug!(%symbol, %error, "analysis skipped");
                        None
                    }
                    Err(error) => {
                        tracing::warn!(%error, "analysis worker failed");
                        None
                    }
                }
            });
        }

        let deadline = Instant::now() + self.step_timeout;
        let mut analyses = Vec::with_capacity(tasks.len());
        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(Some(analysis)))) => analyses.push(analysis),
                Ok(Some(Ok(None))) => {}
                Ok(Some(Err(error))) => tracing::warn!(%error, "analysis worker failed"),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        abandoned = tasks.len(),
                        timeout_ms = self.step_timeout.as_millis() as u64,
                        "step deadline reached, abandoning unfinished analyses"
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }
        analyses.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        analyses
    }

    /// Cancels outstanding work and waits up to the grace period for workers to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let all = u32::try_from(self.worker_limit).unwrap_or(u32::MAX);
        match timeout(self.shutdown_grace, self.permits.acquire_many(all)).await {
            Ok(_) => tracing::debug!("analysis workers drained"),
            Err(_) => tracing::warn!(
                grace_ms = self.shutdown_grace.as_millis() as u64,
                "timed out waiting for analysis workers"
            ),
        }
        self.permits.close();
    }
}

/// Cache-first analysis; a miss recomputes and fills the cache.
pub fn analyze_cached(
    input: &AnalysisInput,
    coordinator: &TimeframeSignalCoordinator,
    cache: &dyn AnalysisCache,
) -> Result<SymbolAnalysis, StrategyError> {
    let key = input.key();

    let entry = match cache.get_features(&key) {
        Some(entry) => entry,
        None => {
            let entry = FeatureEntry {
                features: FeatureVector::compute(input.closes(), input.volumes())?,
                coordinated: coordinator.coordinate(input.closes(), input.volumes()),
            };
            cache.put_features(key.clone(), entry.clone());
            entry
        }
    };

    let prediction = cache.get_prediction(&key).unwrap_or_else(|| {
        let prediction = MlPrediction::from_features(&entry.features);
        cache.put_prediction(key.clone(), prediction);
        prediction
    });

    let decision = cache.get_decision(&key).unwrap_or_else(|| {
        let decision = SignalDecision::decide(&entry.features, &entry.coordinated);
        cache.put_decision(key.clone(), decision.clone());
        decision
    });

    Ok(SymbolAnalysis {
        symbol: input.symbol.clone(),
        price: input.price,
        features: entry.features,
        coordinated: entry.coordinated,
        prediction,
        decision,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use chrono::TimeZone;
    use configuration::Timeframes;
    use rust_decimal_macros::dec;
    use strategies::analyze_symbol;

    fn input(symbol: &str, n: usize) -> AnalysisInput {
        let closes: Vec<f64> = (0..n + 10).map(|i| 100.0 * 1.002f64.powi(i as i32)).collect();
        AnalysisInput {
            symbol: symbol.into(),
            price: dec!(100),
            end: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(n as i64),
            bars: n,
            closes: closes.into(),
            volumes: vec![50.0; n + 10].into(),
        }
    }

    fn precomputer(cache: Arc<MemoryCache>) -> Precomputer {
        Precomputer::new(
            TimeframeSignalCoordinator::new(Timeframes::default(), 60),
            cache,
            &Concurrency::default(),
            CancellationToken::new(),
        )
    }

    #[test]
    fn cached_analysis_matches_direct_analysis() {
        let cache = MemoryCache::new();
        let coordinator = TimeframeSignalCoordinator::new(Timeframes::default(), 60);
        let inp = input("BTC", 120);
        let direct = analyze_symbol("BTC", inp.price, inp.closes(), inp.volumes(), &coordinator).unwrap();

        let first = analyze_cached(&inp, &coordinator, &cache).unwrap();
        let second = analyze_cached(&inp, &coordinator, &cache).unwrap();
        assert_eq!(first, direct);
        assert_eq!(second, direct);
        assert_eq!(cache.stats().hits, 3);
    }

    #[tokio::test]
    async fn short_histories_are_dropped_and_results_sorted() {
        let cache = Arc::new(MemoryCache::new());
        let p = precomputer(Arc::clone(&cache));
        let analyses = p
            .analyze(vec![input("SOL", 120), input("ADA", 5), input("BTC", 120)])
            .await;
        let symbols: Vec<&str> = analyses.iter().map(|a| a.symbol.as_str()).collect();
        assert_eq!(symbols, ["BTC", "SOL"]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn more_symbols_than_workers_all_finish_on_a_single_thread() {
        let cache = Arc::new(MemoryCache::new());
        let settings = Concurrency { worker_limit: 2, step_timeout_ms: 30_000, ..Concurrency::default() };
        let p = Precomputer::new(
            TimeframeSignalCoordinator::new(Timeframes::default(), 60),
            Arc::clone(&cache) as Arc<dyn AnalysisCache>,
            &settings,
            CancellationToken::new(),
        );
        let symbols = ["A1", "A2", "A3", "A4", "A5", "A6", "A7", "A8"];
        let analyses = p.analyze(symbols.iter().map(|s| input(s, 120)).collect()).await;

        assert_eq!(analyses.len(), symbols.len());
        assert_eq!(cache.stats().misses, 3 * symbols.len() as u64);
    }

    #[tokio::test]
    async fn cancelled_precomputer_does_no_work() {
        let cache = Arc::new(MemoryCache::new());
        let p = precomputer(Arc::clone(&cache));
        p.shutdown().await;
        assert!(p.analyze(vec![input("BTC", 120)]).await.is_empty());
    }
}
