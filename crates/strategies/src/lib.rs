//! # Meridian Strategy Library
//!
//! Everything that turns market history into a trading candidate: the
//! multi-timeframe coordinator, per-symbol feature vectors and heuristic
//! prediction, the three arbitrage detectors, the opportunity scanner that
//! merges and ranks them, and the periodic coin rotation.
//!
//! ## Architectural Principles
//!
//! - **Pure logic:** no I/O and no execution. Inputs are slices of visible
//!   history plus read-only handles (`RegimeSnapshot`, `PerformanceBook`).
//! - **Detector seam:** arbitrage detectors implement [`ArbitrageDetector`] and
//!   are run in parallel by the scanner; adding one means a new module and a
//!   line in [`factory::create_detectors`].
//! - **Configured, not loaded:** every component is handed its config section.

pub mod arbitrage;
pub mod error;
pub mod factory;
pub mod features;
pub mod prediction;
pub mod rotation;
pub mod scanner;
pub mod timeframe;

pub use arbitrage::{
    ArbitrageDetector, CorrelationArbitrage, MarketView, SeriesView, StatisticalArbitrage, TemporalReversal,
};
pub use error::StrategyError;
pub use factory::{create_coordinator, create_detectors, create_scanner};
pub use features::{FEATURE_HISTORY, FeatureVector, regime_adjusted_score};
pub use prediction::MlPrediction;
pub use rotation::{CoinRotationSelector, RotationPlan};
pub use scanner::{
    OpportunityScanner, ScanContext, ScanOutcome, ScanVerdict, SignalDecision, SymbolAnalysis, analyze_symbol,
};
pub use timeframe::{CoordinatedSignal, TIMEFRAMES, TimeframeSignal, TimeframeSignalCoordinator, TimeframeSpec};

// Re-export StrategyId from core_types
pub use core_types::enums::StrategyId;
