//! # Meridian Indicator Library
//!
//! Pure numeric helpers shared by the regime classifier, the scanner and the
//! risk engine. Everything operates on `f64` slices ordered oldest first; the
//! caller converts from `Decimal` bars once per step.
//!
//! - `stats`: returns, moments, correlation, percentiles, exponentially weighted moments.
//! - `technical`: RSI, EMA, ATR-like range and rolling volatility, backed by `ta`.
//! - `resample`: down-sampling base bars into coarser timeframes.

pub mod resample;
pub mod stats;
pub mod technical;

pub use resample::{resample_closes, resample_volumes};
pub use stats::{
    correlation, ew_zscore, ew_zscore_path, ewma, mean, percentile, returns, std_dev, window_return,
};
pub use technical::{atr_pct, ema, rsi, volatility};
