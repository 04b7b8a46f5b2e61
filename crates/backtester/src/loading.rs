use crate::ports::{BarSource, DataError};
use chrono::{DateTime, Utc};
use core_types::Bar;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Bar histories that loaded, plus the symbols that did not.
#[derive(Debug, Default)]
pub struct LoadedUniverse {
    pub histories: BTreeMap<String, Arc<[Bar]>>,
    pub skipped: Vec<String>,
}

/// Loads every symbol concurrently, at most `limit` requests in flight.
///
/// Failed or empty symbols are skipped with a warning. Each history is sorted
/// by timestamp and keeps the first bar of any duplicated timestamp.
pub async fn load_universe(
    source: &dyn BarSource,
    symbols: &[String],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    limit: usize,
) -> LoadedUniverse {
    let results: Vec<(String, Result<Vec<Bar>, DataError>)> = stream::iter(symbols.iter().cloned())
        .map(|symbol| async move {
            let result = source.get_historical_bars(&symbol, start, end).await;
            (symbol, result)
        })
        .buffer_unordered(limit.max(1))
        .collect()
        .await;

    let mut universe = LoadedUniverse::default();
    for (symbol, result) in results {
        match result {
            Ok(mut bars) if !bars.is_empty() => {
                bars.sort_by_key(|bar| bar.timestamp);
                bars.dedup_by_key(|bar| bar.timestamp);
                tracing::debug!(%symbol, bars = bars.len(), "history loaded");
                universe.histories.insert(symbol, bars.into());
            }
            Ok(_) => {
                tracing::warn!(%symbol, "no bars in the requested range, skipping symbol");
                universe.skipped.push(symbol);
            }
            Err(error) => {
                tracing::warn!(%symbol, %error, "failed to load bars, skipping symbol");
                universe.skipped.push(symbol);
            }
        }
    }
    universe.skipped.sort();
    universe
}

/// The master clock: the sorted union of every bar timestamp.
pub fn master_clock(histories: &BTreeMap<String, Arc<[Bar]>>) -> Vec<DateTime<Utc>> {
    histories
        .values()
        .flat_map(|bars| bars.iter().map(|bar| bar.timestamp))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Bars of `history` stamped at or before `now`.
pub fn visible_at(history: &[Bar], now: DateTime<Utc>) -> &[Bar] {
    let end = history.partition_point(|bar| bar.timestamp <= now);
    &history[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::InMemoryBarSource;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn at(hour: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hour)
    }

    fn bars(symbol: &str, hours: &[i64]) -> Vec<Bar> {
        hours.iter().map(|h| Bar::new(symbol, at(*h), dec!(10), dec!(1))).collect()
    }

    #[tokio::test]
    async fn missing_and_empty_symbols_are_skipped() {
        let source = InMemoryBarSource::new()
            .with_bars("BTC", bars("BTC", &[2, 0, 1, 1]))
            .with_bars("ETH", Vec::new());
        let symbols = vec!["BTC".to_string(), "ETH".to_string(), "SOL".to_string()];

        let universe = load_universe(&source, &symbols, at(0), at(10), 2).await;
        assert_eq!(universe.skipped, vec!["ETH".to_string(), "SOL".to_string()]);
        let btc = &universe.histories["BTC"];
        assert_eq!(btc.len(), 3);
        assert!(btc.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn master_clock_is_the_sorted_union() {
        let mut histories = BTreeMap::new();
        histories.insert("A".to_string(), Arc::from(bars("A", &[0, 2, 4])));
        histories.insert("B".to_string(), Arc::from(bars("B", &[1, 2, 3])));
        let clock = master_clock(&histories);
        assert_eq!(clock, (0..=4).map(at).collect::<Vec<_>>());
        assert_eq!(visible_at(&histories["A"], at(3)).len(), 2);
    }
}
