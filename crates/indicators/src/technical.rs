use crate::stats::returns;
use core_types::CoreError;
use ta::Next as _;
use ta::indicators::{
    AverageTrueRange, ExponentialMovingAverage as Ema, RelativeStrengthIndex as Rsi,
    StandardDeviation,
};

/// Smoothed indicators are warmed up over this many periods rather than the full history.
const WARMUP_PERIODS: usize = 4;

fn init_err(name: &str, e: impl std::fmt::Debug) -> CoreError {
    CoreError::InvalidInput(name.to_string(), format!("{e:?}"))
}

fn require(values: &[f64], needed: usize) -> Result<(), CoreError> {
    if values.len() < needed {
        return Err(CoreError::InsufficientData {
            needed,
            available: values.len(),
        });
    }
    Ok(())
}

/// The tail an indicator of `period` is fed: enough to warm up, never the whole history.
fn warmup_tail(values: &[f64], period: usize) -> &[f64] {
    let take = (period * WARMUP_PERIODS + 1).min(values.len());
    &values[values.len() - take..]
}

/// Relative strength index of the latest close, in [0, 100].
pub fn rsi(closes: &[f64], period: usize) -> Result<f64, CoreError> {
    let mut ind = Rsi::new(period).map_err(|e| init_err("rsi", e))?;
    require(closes, period + 1)?;
    let mut last = 50.0;
    for &c in warmup_tail(closes, period) {
        last = ind.next(c);
    }
    Ok(last)
}

pub fn ema(values: &[f64], period: usize) -> Result<f64, CoreError> {
    let mut ind = Ema::new(period).map_err(|e| init_err("ema", e))?;
    require(values, period)?;
    let mut last = 0.0;
    for &v in warmup_tail(values, period) {
        last = ind.next(v);
    }
    Ok(last)
}

/// ATR-like average absolute close-to-close move over `period`, relative to the last price.
///
/// Only closes are available, so the true range degenerates to the absolute change.
pub fn atr_pct(closes: &[f64], period: usize) -> Result<f64, CoreError> {
    let mut ind = AverageTrueRange::new(period).map_err(|e| init_err("atr", e))?;
    require(closes, period + 1)?;
    let mut last = 0.0;
    for &c in warmup_tail(closes, period) {
        last = ind.next(c);
    }
    let price = closes[closes.len() - 1];
    if price <= 0.0 {
        return Err(CoreError::Calculation("non-positive price".into()));
    }
    Ok(last / price)
}

/// Standard deviation of the last `window` simple returns.
pub fn volatility(closes: &[f64], window: usize) -> Result<f64, CoreError> {
    let mut ind = StandardDeviation::new(window).map_err(|e| init_err("volatility", e))?;
    require(closes, window + 1)?;
    let tail = &closes[closes.len() - window - 1..];
    let mut last = 0.0;
    for r in returns(tail) {
        last = ind.next(r);
    }
    // Rounding can leave a NaN from a tiny negative variance.
    Ok(last.max(0.0))
}
