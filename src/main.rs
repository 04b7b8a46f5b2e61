use anyhow::Context;
use backtester::{BacktestResult, Backtester, MemorySink, ResultSink};
use chrono::{Duration, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

mod data;

use data::{JsonFileSink, JsonlBarSource, synthetic_bars, write_jsonl};

/// The main entry point for the Meridian backtesting application.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; overrides can come from the real environment.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => handle_run(args).await,
        Commands::Synth(args) => handle_synth(args).await,
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// A regime-aware, multi-symbol crypto backtesting engine.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay historical bars through the adaptive strategy.
    Run(RunArgs),
    /// Write synthetic JSON-lines bars for demos.
    Synth(SynthArgs),
}

#[derive(Parser)]
struct RunArgs {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Directory holding one `<SYMBOL>.jsonl` file per symbol.
    #[arg(long)]
    data_dir: PathBuf,

    /// Where to write `trades.jsonl` and `summary.json`. Results stay in memory when omitted.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Parser)]
struct SynthArgs {
    /// Output directory for the generated files.
    #[arg(long, default_value = "data")]
    out_dir: PathBuf,

    /// Symbols to generate (comma separated).
    #[arg(long, value_delimiter = ',', default_value = "BTCUSDT,ETHUSDT,SOLUSDT,BNBUSDT,XRPUSDT")]
    symbols: Vec<String>,

    /// First bar date (format: YYYY-MM-DD).
    #[arg(long, default_value = "2024-01-01")]
    from: NaiveDate,

    /// Number of bars per symbol.
    #[arg(long, default_value_t = 2_000)]
    bars: usize,

    /// Minutes between consecutive bars.
    #[arg(long, default_value_t = 60)]
    interval_minutes: i64,
}

// ==============================================================================
// Command Logic
// ==============================================================================

async fn handle_run(args: RunArgs) -> anyhow::Result<()> {
    let config = configuration::load_config_from(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let _log_guard = configuration::init_tracing(&config.logging)?;

    tracing::info!(
        strategy = %config.backtest.strategy,
        symbols = config.backtest.universe.len(),
        from = %config.backtest.start_date,
        to = %config.backtest.end_date,
        "starting backtest"
    );

    let source = Arc::new(JsonlBarSource::new(&args.data_dir));
    let sink: Arc<dyn ResultSink> = match &args.out {
        Some(dir) => Arc::new(JsonFileSink::create(dir).await?),
        None => Arc::new(MemorySink::new()),
    };

    let backtester = Backtester::new(config, source, sink)?;
    let cancel = backtester.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing the current step");
            cancel.cancel();
        }
    });

    let result = backtester.run().await?;
    print_summary(&result);
    Ok(())
}

async fn handle_synth(args: SynthArgs) -> anyhow::Result<()> {
    let start = args
        .from
        .and_hms_opt(0, 0, 0)
        .context("invalid start date")?
        .and_utc();
    let interval = Duration::minutes(args.interval_minutes.max(1));

    for (seed, symbol) in args.symbols.iter().enumerate() {
        let seed = u32::try_from(seed).unwrap_or(u32::MAX);
        let bars = synthetic_bars(symbol, start, interval, args.bars, seed);
        let path = write_jsonl(&args.out_dir, symbol, &bars).await?;
        println!("wrote {} bars to {}", bars.len(), path.display());
    }
    Ok(())
}

fn print_summary(result: &BacktestResult) {
    let report = &result.report;
    let ratio = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{v:.3}"));

    println!("run {} ({})", result.run_id, result.strategy);
    if result.cancelled {
        println!("  cancelled after {} steps", result.steps);
    }
    println!("  steps            {}", result.steps);
    println!("  final equity     {:.2}", report.final_equity);
    println!("  net profit       {:.2} ({:.2}%)", report.total_net_profit, report.total_return_pct);
    println!("  max drawdown     {:.2} ({:.2}%)", report.max_drawdown, report.max_drawdown_pct);
    println!("  sharpe           {}", ratio(report.sharpe_ratio));
    println!("  sortino          {}", ratio(report.sortino_ratio));
    println!("  calmar           {}", ratio(report.calmar_ratio));
    println!(
        "  trades           {} ({} won, {} lost, {} arbitrage)",
        report.total_trades, report.winning_trades, report.losing_trades, report.arbitrage_trades
    );
    for (reason, count) in &report.exits {
        println!("    {reason:<14} {count}");
    }
    println!("  final regime     {}", result.final_regime);
    println!("  regime changes   {}", result.regime_transitions.len());
    if !result.skipped_symbols.is_empty() {
        println!("  skipped          {}", result.skipped_symbols.join(", "));
    }
}
