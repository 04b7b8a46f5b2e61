//! # Market Regime Classification
//!
//! Determines the single active market regime for the whole universe and guards
//! it with hysteresis so that the label does not flap from bar to bar.
//!
//! - `RegimeClassifier` turns bar histories into a proposal (a label plus confidence).
//! - `RegimeState` owns the active regime and decides whether a proposal is accepted.
//! - `RegimeHandle` is the shared, lock-guarded handle every reader receives.
//! - `BearPhase` grades an ongoing bear market and scales arbitrage thresholds.

pub mod classifier;
pub mod phase;
pub mod state;

pub use classifier::{RegimeAssessment, RegimeClassifier, WindowConsensus};
pub use phase::BearPhase;
pub use state::{
    PendingRegime, RegimeHandle, RegimeSnapshot, RegimeState, RegimeTransition, TransitionReason,
};
