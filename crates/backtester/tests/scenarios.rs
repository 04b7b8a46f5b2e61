use backtester::{
    BacktestError, Backtester, BarSource, InMemoryBarSource, MemorySink, ResultSink, run_backtest,
};
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use configuration::Config;
use core_types::{Bar, ExitReason, MarketRegime};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal_macros::dec;
use std::sync::Arc;

const SYMBOLS: [&str; 3] = ["AAA", "BBB", "CCC"];

/// Strictly rising hourly bars with slightly uneven steps.
fn rising(symbol: &str, n: usize, start_price: f64) -> Vec<Bar> {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut price = start_price;
    (0..n)
        .map(|i| {
            price *= 1.0 + 0.003 + 0.0005 * (i % 4) as f64;
            Bar::new(
                symbol,
                t0 + Duration::hours(i as i64),
                Decimal::from_f64(price).unwrap().round_dp(6),
                dec!(1000),
            )
        })
        .collect()
}

fn config() -> Config {
    let mut config = Config::default();
    config.backtest.universe = SYMBOLS.iter().map(|s| s.to_string()).collect();
    config.backtest.start_date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    config.backtest.end_date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
    config.backtest.initial_capital = dec!(10000);
    config.backtest.show_progress = false;
    config
}

fn rising_market() -> InMemoryBarSource {
    SYMBOLS
        .iter()
        .enumerate()
        .fold(InMemoryBarSource::new(), |source, (i, symbol)| {
            source.with_bars(*symbol, rising(symbol, 300, 50.0 * (i + 1) as f64))
        })
}

#[tokio::test]
async fn rising_market_turns_bullish_and_buys() {
    let sink = Arc::new(MemorySink::new());
    let result = run_backtest(config(), Arc::new(rising_market()), sink.clone() as Arc<dyn ResultSink>)
        .await
        .unwrap();

    assert_eq!(result.steps, 300);
    assert!(!result.cancelled);
    assert!(
        matches!(result.final_regime, MarketRegime::StrongBull | MarketRegime::WeakBull),
        "final regime {:?}",
        result.final_regime
    );
    assert!(!result.regime_transitions.is_empty());
    assert!(!result.trades.is_empty(), "expected at least one buy");

    // Every position is flat at the end, so cash moved by exactly the realized PnL.
    let pnl: Decimal = result.trades.iter().map(|t| t.pnl()).sum();
    assert_eq!(result.report.final_equity, dec!(10000) + pnl);
    let end_of_run = result.report.exits.get(&ExitReason::EndOfBacktest).copied().unwrap_or(0);
    assert!(end_of_run <= SYMBOLS.len());

    assert_eq!(sink.trades().len(), result.trades.len());
    assert_eq!(sink.summaries(), vec![result.run_id]);
    assert!(result.equity_curve.windows(2).all(|w| w[0].0 < w[1].0));
}

#[tokio::test]
async fn unknown_symbols_are_skipped_not_fatal() {
    let mut config = config();
    config.backtest.universe.push("ZZZ".into());
    let result = run_backtest(config, Arc::new(rising_market()), Arc::new(MemorySink::new()))
        .await
        .unwrap();
    assert_eq!(result.skipped_symbols, vec!["ZZZ".to_string()]);
}

#[tokio::test]
async fn no_data_at_all_is_an_error() {
    let source: Arc<dyn BarSource> = Arc::new(InMemoryBarSource::new());
    let err = run_backtest(config(), source, Arc::new(MemorySink::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, BacktestError::DataUnavailable));
}

#[tokio::test]
async fn invalid_configuration_is_rejected_up_front() {
    let mut config = config();
    config.backtest.initial_capital = Decimal::ZERO;
    let err = Backtester::new(config, Arc::new(rising_market()), Arc::new(MemorySink::new()))
        .err()
        .unwrap();
    assert!(matches!(err, BacktestError::Configuration(_)));
}

#[tokio::test]
async fn cancelled_run_reports_partial_result() {
    let backtester = Backtester::new(config(), Arc::new(rising_market()), Arc::new(MemorySink::new())).unwrap();
    backtester.cancellation_token().cancel();
    let result = backtester.run().await.unwrap();
    assert!(result.cancelled);
    assert_eq!(result.steps, 0);
    assert!(result.trades.is_empty());
    assert_eq!(result.report.final_equity, dec!(10000));
}
