//! File-backed implementations of the backtester's ports.

use async_trait::async_trait;
use backtester::{BacktestResult, BarSource, DataError, PersistError, ResultSink};
use chrono::{DateTime, Duration, Utc};
use core_types::{Bar, Trade};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Reads `<dir>/<SYMBOL>.jsonl`, one serialized `Bar` per line.
#[derive(Debug, Clone)]
pub struct JsonlBarSource {
    dir: PathBuf,
}

impl JsonlBarSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{symbol}.jsonl"))
    }
}

#[async_trait]
impl BarSource for JsonlBarSource {
    async fn get_historical_bars(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, DataError> {
        let path = self.path_for(symbol);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DataError::NotFound(symbol.to_string()));
            }
            Err(e) => {
                return Err(DataError::Transient {
                    symbol: symbol.to_string(),
                    message: format!("{}: {e}", path.display()),
                });
            }
        };

        let mut bars = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let bar: Bar = serde_json::from_str(line).map_err(|e| DataError::Transient {
                symbol: symbol.to_string(),
                message: format!("{}:{}: {e}", path.display(), line_no + 1),
            })?;
            if bar.timestamp >= start && bar.timestamp <= end {
                bars.push(bar);
            }
        }
        tracing::debug!(%symbol, bars = bars.len(), path = %path.display(), "bars read");
        Ok(bars)
    }
}

/// Appends closed trades to `trades.jsonl` and writes the run summary to `summary.json`.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    /// Creates the output directory if needed and truncates any previous ledger.
    pub async fn create(dir: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join("trades.jsonl"), b"").await?;
        Ok(Self { dir })
    }
}

#[async_trait]
impl ResultSink for JsonFileSink {
    async fn persist_trade_record(&self, trade: &Trade) -> Result<(), PersistError> {
        let mut line = serde_json::to_vec(trade)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join("trades.jsonl"))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn persist_run_summary(&self, result: &BacktestResult) -> Result<(), PersistError> {
        let json = serde_json::to_vec_pretty(result)?;
        fs::write(self.dir.join("summary.json"), json).await?;
        tracing::info!(path = %self.dir.join("summary.json").display(), "run summary written");
        Ok(())
    }
}

/// Deterministic demo series: a drifting trend with two superimposed cycles.
///
/// `seed` shifts the phase and drift so different symbols do not move in lockstep.
pub fn synthetic_bars(symbol: &str, start: DateTime<Utc>, interval: Duration, count: usize, seed: u32) -> Vec<Bar> {
    let phase = f64::from(seed) * 0.7;
    let drift = 0.0004 * (f64::from(seed % 5) - 1.5);
    let base = 20.0 + 35.0 * f64::from(seed % 7);

    (0..count)
        .filter_map(|i| {
            let t = i as f64;
            let log_price = drift * t + 0.08 * (t / 90.0 + phase).sin() + 0.02 * (t / 7.0 + 2.0 * phase).sin();
            let price = Decimal::from_f64(base * log_price.exp())?.round_dp(6);
            let volume = Decimal::from_f64(1_000.0 * (1.5 + (t / 11.0 + phase).cos()))?.round_dp(2);
            let timestamp = start + interval * i32::try_from(i).ok()?;
            Some(Bar::new(symbol, timestamp, price, volume))
        })
        .collect()
}

/// Writes one `<SYMBOL>.jsonl` file per series into `dir`.
pub async fn write_jsonl(dir: &Path, symbol: &str, bars: &[Bar]) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir).await?;
    let mut buffer = Vec::new();
    for bar in bars {
        serde_json::to_writer(&mut buffer, bar)?;
        buffer.push(b'\n');
    }
    let path = dir.join(format!("{symbol}.jsonl"));
    fs::write(&path, buffer).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn written_series_reads_back_within_range() {
        let dir = tempfile::tempdir().unwrap();
        let bars = synthetic_bars("BTC", t0(), Duration::hours(1), 48, 3);
        write_jsonl(dir.path(), "BTC", &bars).await.unwrap();

        let source = JsonlBarSource::new(dir.path());
        let read = source
            .get_historical_bars("BTC", t0() + Duration::hours(10), t0() + Duration::hours(19))
            .await
            .unwrap();
        assert_eq!(read.len(), 10);
        assert_eq!(read[0], bars[10]);
    }

    #[tokio::test]
    async fn missing_file_is_not_found_and_garbage_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("BAD.jsonl"), "{not json}\n").unwrap();
        let source = JsonlBarSource::new(dir.path());

        let missing = source.get_historical_bars("NOPE", t0(), t0()).await.unwrap_err();
        assert_eq!(missing, DataError::NotFound("NOPE".into()));
        let bad = source.get_historical_bars("BAD", t0(), t0()).await.unwrap_err();
        assert!(matches!(bad, DataError::Transient { .. }));
    }

    fn fill(side: core_types::OrderSide, price: Decimal, step: usize) -> core_types::Execution {
        core_types::Execution {
            execution_id: uuid::Uuid::new_v4(),
            symbol: "BTC".into(),
            side,
            price,
            quantity: Decimal::ONE,
            commission: Decimal::ZERO,
            timestamp: t0() + Duration::hours(step as i64),
            step,
        }
    }

    fn trade() -> Trade {
        Trade {
            trade_id: uuid::Uuid::new_v4(),
            symbol: "BTC".into(),
            origin: core_types::OpportunityOrigin::Signal,
            entry_execution: fill(core_types::OrderSide::Buy, Decimal::from(100), 0),
            exit_execution: fill(core_types::OrderSide::Sell, Decimal::from(105), 3),
            exit_reason: core_types::ExitReason::TakeProfit,
            holding_periods: 3,
        }
    }

    #[tokio::test]
    async fn sink_appends_trades_and_starts_each_run_with_an_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::create(dir.path()).await.unwrap();
        let first = trade();
        sink.persist_trade_record(&first).await.unwrap();
        sink.persist_trade_record(&trade()).await.unwrap();

        let ledger = std::fs::read_to_string(dir.path().join("trades.jsonl")).unwrap();
        let lines: Vec<&str> = ledger.lines().collect();
        assert_eq!(lines.len(), 2);
        let decoded: Trade = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(decoded, first);

        JsonFileSink::create(dir.path()).await.unwrap();
        let ledger = std::fs::read_to_string(dir.path().join("trades.jsonl")).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn synthetic_series_are_positive_and_distinct_per_seed() {
        let a = synthetic_bars("A", t0(), Duration::hours(1), 200, 1);
        let b = synthetic_bars("B", t0(), Duration::hours(1), 200, 2);
        assert_eq!(a.len(), 200);
        assert!(a.iter().all(|bar| bar.price > Decimal::ZERO && bar.volume > Decimal::ZERO));
        assert_ne!(a[50].price, b[50].price);
    }
}
