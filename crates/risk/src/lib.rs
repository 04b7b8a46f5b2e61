//! # Meridian Risk Library
//!
//! Turns a chosen opportunity into a sized order, or a reasoned rejection, and
//! decides when open positions must be closed.
//!
//! - `sizer`: Kelly fraction, named multiplier stages and portfolio constraints.
//! - `gates`: hard exposure and drawdown-budget limits.
//! - `circuit_breaker`: drawdown ceiling with the arbitrage exception.
//! - `stop_loss`: the adaptive stop, take-profit, profit protection and holding limits.
//!
//! Gate failures are `SizingDecision::Rejected`, never errors. `RiskError` is
//! reserved for inputs that cannot be sized at all.

pub mod circuit_breaker;
pub mod error;
pub mod gates;
pub mod sizer;
pub mod stop_loss;

pub use circuit_breaker::{BreakerVerdict, DrawdownCircuitBreaker};
pub use error::RiskError;
pub use gates::{Exposure, Rejection, RiskGates};
pub use sizer::{PortfolioSnapshot, RiskAndPositionSizer, SizedOrder, SizingDecision, SizingRequest, Stage};
pub use stop_loss::{AdaptiveStopLossEngine, StopEvaluation, StopInputs, StopThreshold};
