//! # Meridian Analytics Engine
//!
//! Quantitative evaluation of a finished backtest. This is a pure logic crate:
//! it takes the trade ledger and the daily equity curve and produces a
//! `PerformanceReport`.
//!
//! ## Public API
//!
//! - `AnalyticsEngine`: the stateless calculator.
//! - `PerformanceReport`: profitability, drawdown, risk ratios and trade statistics.
//! - `AnalyticsError`: the specific error types that can be returned from this crate.

pub mod engine;
pub mod error;
pub mod report;

pub use engine::AnalyticsEngine;
pub use error::AnalyticsError;
pub use report::PerformanceReport;
