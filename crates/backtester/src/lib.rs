//! # Meridian Backtester
//!
//! Orchestrates a multi-asset backtest: loads bar histories through a
//! [`BarSource`], replays them on a single master clock, runs the regime,
//! scanning, sizing and stop-loss components at every step, and reports the
//! result through a [`ResultSink`].
//!
//! ## Concurrency
//!
//! The outer loop is sequential and strictly chronological. Bar loading and the
//! per-symbol analysis fan out to tokio tasks bounded by the configured worker
//! limit; analyses that miss the per-step deadline are abandoned for that step.
//! Cancellation goes through a [`CancellationToken`](tokio_util::sync::CancellationToken).

pub mod cache;
pub mod engine;
pub mod error;
pub mod loading;
pub mod ports;
pub mod precompute;
pub mod result;

pub use cache::{AnalysisCache, CacheKey, CacheStats, FeatureEntry, MemoryCache, TimeWindow};
pub use engine::{Backtester, run_backtest};
pub use error::BacktestError;
pub use loading::{LoadedUniverse, load_universe, master_clock};
pub use ports::{BarSource, DataError, InMemoryBarSource, MemorySink, PersistError, ResultSink};
pub use precompute::{AnalysisInput, Precomputer, analyze_cached};
pub use result::BacktestResult;
