//! # Meridian Executor Crate
//!
//! Trade execution and account state for the simulation. The `Executor` trait
//! prices a fill without touching state; the `Portfolio` applies fills to cash
//! and to the per-symbol `SymbolState`s.
//!
//! ## Public API
//!
//! - `Executor`: the seam between the backtest loop and whatever fills orders.
//! - `SimulatedExecutor`: the "virtual exchange" with commission and slippage.
//! - `Portfolio`: cash, symbol states, equity and drawdown.
//! - `ExecutorError`: the specific error types that can be returned from this crate.

pub mod error;
pub mod exchange;
pub mod portfolio;

pub use error::ExecutorError;
pub use exchange::{Executor, OrderRequest, SimulatedExecutor};
pub use portfolio::Portfolio;
