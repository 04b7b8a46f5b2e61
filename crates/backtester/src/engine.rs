use crate::cache::{AnalysisCache, MemoryCache};
use crate::error::BacktestError;
use crate::loading::{load_universe, master_clock};
use crate::ports::{BarSource, ResultSink};
use crate::precompute::{AnalysisInput, Precomputer};
use crate::result::BacktestResult;
use analytics::AnalyticsEngine;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use configuration::Config;
use core_types::{Bar, ExitReason, MarketRegime, Opportunity, OrderSide, PerformanceBook, SymbolState, Trade};
use executor::{Executor, OrderRequest, Portfolio, SimulatedExecutor};
use indicatif::{ProgressBar, ProgressStyle};
use regime::{RegimeClassifier, RegimeHandle};
use risk::{AdaptiveStopLossEngine, PortfolioSnapshot, RiskAndPositionSizer, SizingDecision, SizingRequest, StopInputs};
use rust_decimal::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use strategies::{
    CoinRotationSelector, FEATURE_HISTORY, MarketView, OpportunityScanner, ScanContext, SeriesView,
    create_coordinator, create_scanner,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Bars averaged for the liquidity estimate.
const LIQUIDITY_WINDOW: usize = 20;

/// One symbol's full history, converted to `f64` once.
struct Series {
    bars: Arc<[Bar]>,
    closes: Arc<[f64]>,
    volumes: Arc<[f64]>,
}

impl Series {
    fn new(bars: Arc<[Bar]>) -> Self {
        let closes = bars.iter().map(Bar::price_f64).collect();
        let volumes = bars.iter().map(Bar::volume_f64).collect();
        Self { bars, closes, volumes }
    }

    fn visible_len(&self, now: DateTime<Utc>) -> usize {
        self.bars.partition_point(|bar| bar.timestamp <= now)
    }
}

/// The main backtesting engine.
///
/// Replays every loaded symbol against a single master clock. Per step: advance
/// cursors, classify the regime, rotate the universe when due, run the stops,
/// analyze and scan, then size and execute at most one entry.
pub struct Backtester {
    config: Config,
    source: Arc<dyn BarSource>,
    sink: Arc<dyn ResultSink>,
    cache: Arc<dyn AnalysisCache>,
    cancel: CancellationToken,
}

impl Backtester {
    /// Validates the configuration before any state is created.
    pub fn new(config: Config, source: Arc<dyn BarSource>, sink: Arc<dyn ResultSink>) -> Result<Self, BacktestError> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            sink,
            cache: Arc::new(MemoryCache::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cache(mut self, cache: Arc<dyn AnalysisCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Cancelling the token stops the run after the current step.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self) -> Result<BacktestResult, BacktestError> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let config = &self.config;
        let strategy = config.backtest.strategy;

        let book = PerformanceBook::new();
        let scanner = create_scanner(strategy, config)?;
        let sizer = RiskAndPositionSizer::new(
            config.risk_management.clone(),
            config.circuit_breaker.clone(),
            config.stop_loss.max_stop,
            book.clone(),
        )?;
        let precomputer = Precomputer::new(
            create_coordinator(config),
            Arc::clone(&self.cache),
            &config.concurrency,
            self.cancel.child_token(),
        );

        let (start, end) = period(config.backtest.start_date, config.backtest.end_date);
        let universe = load_universe(
            self.source.as_ref(),
            &config.backtest.universe,
            start,
            end,
            config.concurrency.worker_limit,
        )
        .await;
        if universe.histories.is_empty() {
            return Err(BacktestError::DataUnavailable);
        }
        let clock = master_clock(&universe.histories);
        tracing::info!(
            %run_id,
            %strategy,
            symbols = universe.histories.len(),
            skipped = universe.skipped.len(),
            steps = clock.len(),
            "backtest starting"
        );

        let mut portfolio = Portfolio::new(config.backtest.initial_capital);
        for (symbol, bars) in &universe.histories {
            portfolio.insert_state(SymbolState::new(symbol.clone(), Arc::clone(bars)));
        }
        let series = universe
            .histories
            .iter()
            .map(|(symbol, bars)| (symbol.clone(), Series::new(Arc::clone(bars))))
            .collect();

        let mut session = Session {
            config,
            sink: self.sink.as_ref(),
            series,
            scanner,
            sizer,
            stops: AdaptiveStopLossEngine::new(config.stop_loss.clone(), config.backtest.bar_interval_minutes),
            rotation: CoinRotationSelector::new(config.rotation.clone()),
            classifier: RegimeClassifier::new(config.regime.clone()),
            regime: RegimeHandle::new(config.regime.clone()),
            executor: SimulatedExecutor::new(config.simulation.clone()),
            book,
            precomputer,
            portfolio,
            trades: Vec::new(),
            daily: BTreeMap::new(),
        };

        let progress_bar = if config.backtest.show_progress {
            ProgressBar::new(clock.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
                .progress_chars("=>-"),
        );

        // --- Main "Master Clock" Loop ---
        let mut steps: usize = 0;
        let mut cancelled = false;
        for (step, now) in clock.iter().copied().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::warn!(step, "backtest cancelled");
                cancelled = true;
                break;
            }
            session.step(step, now).await;
            steps += 1;
            progress_bar.inc(1);
        }
        progress_bar.finish_with_message("simulation complete");

        let last_step = steps.saturating_sub(1);
        session.close_all(ExitReason::EndOfBacktest, last_step).await;
        if let Some(now) = clock.get(last_step).copied() {
            session.record_equity(now);
        }
        session.precomputer.shutdown().await;

        let equity_curve: Vec<(DateTime<Utc>, Decimal)> = session.daily.into_values().collect();
        let report = AnalyticsEngine::new().calculate(&session.trades, &equity_curve, config.backtest.initial_capital)?;

        let result = BacktestResult {
            run_id,
            strategy,
            started_at,
            finished_at: Utc::now(),
            steps,
            trades: session.trades,
            equity_curve,
            report,
            regime_transitions: session.regime.transitions(),
            final_regime: session.regime.current(),
            skipped_symbols: universe.skipped,
            cancelled,
        };
        if let Err(error) = self.sink.persist_run_summary(&result).await {
            tracing::warn!(%run_id, %error, "failed to persist run summary");
        }

        tracing::info!(
            %run_id,
            trades = result.trades.len(),
            final_equity = %result.report.final_equity,
            return_pct = %result.report.total_return_pct.round_dp(2),
            final_regime = %result.final_regime,
            cancelled,
            "backtest finished"
        );
        Ok(result)
    }
}

/// Builds a [`Backtester`] and runs it once.
pub async fn run_backtest(
    config: Config,
    source: Arc<dyn BarSource>,
    sink: Arc<dyn ResultSink>,
) -> Result<BacktestResult, BacktestError> {
    Backtester::new(config, source, sink)?.run().await
}

/// `[start 00:00, end 23:59:59.999]` in UTC.
fn period(start: NaiveDate, end: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = start.and_time(NaiveTime::MIN).and_utc();
    let end = end.and_time(NaiveTime::MIN).and_utc() + chrono::Duration::days(1) - chrono::Duration::milliseconds(1);
    (start, end)
}

/// Loop-owned state of one run.
struct Session<'a> {
    config: &'a Config,
    sink: &'a dyn ResultSink,
    series: BTreeMap<String, Series>,
    scanner: OpportunityScanner,
    sizer: RiskAndPositionSizer,
    stops: AdaptiveStopLossEngine,
    rotation: CoinRotationSelector,
    classifier: RegimeClassifier,
    regime: RegimeHandle,
    executor: SimulatedExecutor,
    book: PerformanceBook,
    precomputer: Precomputer,
    portfolio: Portfolio,
    trades: Vec<Trade>,
    /// Last equity of each calendar day.
    daily: BTreeMap<NaiveDate, (DateTime<Utc>, Decimal)>,
}

impl Session<'_> {
    async fn step(&mut self, step: usize, now: DateTime<Utc>) {
        // 1. Advance cursors; positions age only on their own bars.
        for state in self.portfolio.states_mut() {
            if state.advance_to(now) {
                if let Some(price) = state.current_price() {
                    state.mark(price);
                }
            }
        }

        // 2. Regime, across every loaded symbol.
        let (_, transition) = {
            let visible: Vec<&[f64]> = self
                .series
                .values()
                .map(|s| &s.closes[..s.visible_len(now)])
                .collect();
            self.classifier.evaluate(&self.regime, &visible, now)
        };
        if let Some(t) = transition {
            tracing::info!(from = %t.from, to = %t.to, confidence = t.confidence, reason = %t.reason, %now, "regime transition");
        }
        let snapshot = self.regime.snapshot(now);

        // 3. Rotation.
        if step > 0 && self.rotation.due(step) {
            self.rotate(step, now).await;
        }

        // 4. Stops on every open position.
        for (symbol, reason) in self.triggered_exits(snapshot.regime) {
            self.close_position(&symbol, reason, step).await;
        }

        // 5. Analysis fan-out.
        let min_history = self.config.scanner.min_history.max(FEATURE_HISTORY);
        let inputs: Vec<AnalysisInput> = self
            .portfolio
            .states()
            .filter(|state| state.cursor() >= min_history)
            .filter_map(|state| {
                let series = self.series.get(&state.symbol)?;
                let bar = state.current_bar()?;
                Some(AnalysisInput {
                    symbol: state.symbol.clone(),
                    price: bar.price,
                    end: bar.timestamp,
                    bars: state.cursor(),
                    closes: Arc::clone(&series.closes),
                    volumes: Arc::clone(&series.volumes),
                })
            })
            .collect();
        let analyses = self.precomputer.analyze(inputs).await;

        // 6. Scan.
        let open: BTreeSet<String> = self.portfolio.open_symbols().into_iter().collect();
        let outcome = {
            let views = self
                .series
                .iter()
                .map(|(symbol, series)| {
                    let len = series.visible_len(now);
                    let tradable = self.portfolio.state(symbol).is_some() && !open.contains(symbol);
                    SeriesView {
                        symbol,
                        closes: &series.closes[..len],
                        volumes: &series.volumes[..len],
                        tradable,
                    }
                })
                .collect();
            let market = MarketView::new(views);
            let ctx = ScanContext {
                regime: snapshot,
                drawdown: self.portfolio.drawdown(),
                step,
                book: &self.book,
                open_positions: &open,
            };
            self.scanner.scan(&analyses, &market, &ctx)
        };
        tracing::debug!(step, verdict = ?outcome.verdict, candidates = outcome.candidates, threshold = ?outcome.threshold, "scan complete");

        // 7. Size and execute.
        if let Some(opportunity) = outcome.selected {
            self.enter(opportunity, snapshot.regime, step).await;
        }

        self.record_equity(now);
    }

    fn triggered_exits(&self, regime: MarketRegime) -> Vec<(String, ExitReason)> {
        self.portfolio
            .states()
            .filter(|state| state.has_position())
            .filter_map(|state| {
                let series = self.series.get(&state.symbol)?;
                let price = state.current_price()?;
                let record = self.book.symbol(&state.symbol);
                let closes = &series.closes[..state.cursor()];
                let inputs = StopInputs::from_state(state, closes, price, regime, record.as_ref());
                let evaluation = self.stops.evaluate(&inputs);
                evaluation.exit.map(|reason| (state.symbol.clone(), reason))
            })
            .collect()
    }

    async fn rotate(&mut self, step: usize, now: DateTime<Utc>) {
        let current: BTreeSet<String> = self.portfolio.states().map(|s| s.symbol.clone()).collect();
        let plan = {
            let universe: Vec<(&str, &[f64])> = self
                .series
                .iter()
                .map(|(symbol, s)| (symbol.as_str(), &s.closes[..s.visible_len(now)]))
                .collect();
            self.rotation.rotate(&universe, &self.book, &current)
        };

        for symbol in &plan.demoted {
            self.close_position(symbol, ExitReason::Rotation, step).await;
            if let Err(error) = self.portfolio.remove_state(symbol) {
                tracing::warn!(%symbol, %error, "could not rotate symbol out");
            }
        }
        for symbol in plan.active.difference(&current) {
            if let Some(series) = self.series.get(symbol) {
                let mut state = SymbolState::new(symbol.clone(), Arc::clone(&series.bars));
                state.advance_to(now);
                self.portfolio.insert_state(state);
            }
        }
    }

    async fn enter(&mut self, opportunity: Opportunity, regime: MarketRegime, step: usize) {
        let symbol = opportunity.symbol.clone();
        let Some(bar) = self
            .portfolio
            .state(&symbol)
            .filter(|state| !state.has_position())
            .and_then(|state| state.current_bar().cloned())
        else {
            tracing::debug!(%symbol, "selected symbol is not enterable");
            return;
        };

        let snapshot = PortfolioSnapshot {
            cash: self.portfolio.cash(),
            equity: self.portfolio.equity(),
            peak_equity: self.portfolio.peak_equity(),
            positions: self.portfolio.positions_value(),
        };
        let correlations = self.correlations(&symbol);
        let request = SizingRequest {
            opportunity: &opportunity,
            portfolio: &snapshot,
            regime,
            step,
            liquidity_notional: self.liquidity_notional(&symbol),
            correlations: &correlations,
        };
        let order = match self.sizer.size(&request) {
            Ok(SizingDecision::Accepted(order)) => order,
            Ok(SizingDecision::Rejected(_)) => return,
            Err(error) => {
                tracing::warn!(%symbol, %error, "sizing failed");
                return;
            }
        };

        // Slippage and commission must still fit in cash.
        let cash = self.portfolio.cash();
        let mut quantity = order.quantity;
        let cost = self.executor.buy_cost(bar.price, quantity);
        if cost > cash && cost > Decimal::ZERO {
            quantity = (quantity * cash / cost).round_dp_with_strategy(8, RoundingStrategy::ToZero);
        }
        if quantity <= Decimal::ZERO {
            return;
        }

        let request = OrderRequest::new(symbol.clone(), OrderSide::Buy, quantity);
        let execution = match self.executor.execute(&request, &bar, step).await {
            Ok(execution) => execution,
            Err(error) => {
                tracing::warn!(%symbol, %error, "entry fill failed");
                return;
            }
        };
        let price = execution.price;
        match self.portfolio.open(execution, opportunity.origin.clone()) {
            Ok(()) => {
                self.book.record_entry(&symbol, step);
                tracing::info!(
                    %symbol,
                    origin = %opportunity.origin,
                    %quantity,
                    %price,
                    kelly = order.kelly,
                    fraction = order.fraction,
                    "position opened"
                );
            }
            Err(error) => tracing::warn!(%symbol, %error, "could not open position"),
        }
    }

    async fn close_position(&mut self, symbol: &str, reason: ExitReason, step: usize) {
        let Some((quantity, bar)) = self
            .portfolio
            .state(symbol)
            .filter(|state| state.has_position())
            .and_then(|state| Some((state.quantity, state.current_bar()?.clone())))
        else {
            return;
        };

        let request = OrderRequest::new(symbol, OrderSide::Sell, quantity);
        let execution = match self.executor.execute(&request, &bar, step).await {
            Ok(execution) => execution,
            Err(error) => {
                tracing::warn!(%symbol, %error, "exit fill failed");
                return;
            }
        };
        let trade = match self.portfolio.close(execution, reason) {
            Ok(trade) => trade,
            Err(error) => {
                tracing::warn!(%symbol, %error, "could not close position");
                return;
            }
        };

        self.book
            .record_close(symbol, trade.pnl().to_f64().unwrap_or(0.0), trade.return_pct());
        if let Err(error) = self.sink.persist_trade_record(&trade).await {
            tracing::warn!(%symbol, %error, "failed to persist trade");
        }
        tracing::info!(%symbol, %reason, pnl = %trade.pnl(), holding = trade.holding_periods, "position closed");
        self.trades.push(trade);
    }

    async fn close_all(&mut self, reason: ExitReason, step: usize) {
        for symbol in self.portfolio.open_symbols() {
            self.close_position(&symbol, reason, step).await;
        }
    }

    fn record_equity(&mut self, now: DateTime<Utc>) {
        let equity = self.portfolio.mark_to_market();
        self.daily.insert(now.date_naive(), (now, equity));
    }

    /// Mean traded notional over the last bars of `symbol`.
    fn liquidity_notional(&self, symbol: &str) -> f64 {
        let Some(state) = self.portfolio.state(symbol) else {
            return 0.0;
        };
        let visible = state.visible();
        let tail = &visible[visible.len().saturating_sub(LIQUIDITY_WINDOW)..];
        indicators::mean(&tail.iter().map(|bar| bar.price_f64() * bar.volume_f64()).collect::<Vec<_>>())
    }

    /// Return correlation of `symbol` with every open position.
    fn correlations(&self, symbol: &str) -> BTreeMap<String, f64> {
        let lookback = self.config.risk_management.correlation_lookback;
        let tail = |name: &str| -> Option<Vec<f64>> {
            let state = self.portfolio.state(name)?;
            let closes = &self.series.get(name)?.closes[..state.cursor()];
            Some(indicators::returns(&closes[closes.len().saturating_sub(lookback + 1)..]))
        };
        let Some(candidate) = tail(symbol) else {
            return BTreeMap::new();
        };
        self.portfolio
            .open_symbols()
            .into_iter()
            .filter(|other| other != symbol)
            .filter_map(|other| {
                let rho = indicators::correlation(&candidate, &tail(&other)?);
                Some((other, rho))
            })
            .collect()
    }
}
