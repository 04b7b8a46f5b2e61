use crate::arbitrage::{ArbitrageDetector, CorrelationArbitrage, StatisticalArbitrage, TemporalReversal};
use crate::error::StrategyError;
use crate::scanner::OpportunityScanner;
use crate::timeframe::TimeframeSignalCoordinator;
use configuration::Config;
use core_types::enums::StrategyId;

/// The arbitrage detectors a strategy runs, in a fixed order.
pub fn create_detectors(id: StrategyId, config: &Config) -> Vec<Box<dyn ArbitrageDetector>> {
    let settings = &config.arbitrage;
    match id {
        StrategyId::TrendFollowing => Vec::new(),
        StrategyId::Adaptive | StrategyId::ArbitrageOnly => vec![
            Box::new(StatisticalArbitrage::new(settings.clone())),
            Box::new(CorrelationArbitrage::new(settings.clone())),
            Box::new(TemporalReversal::new(settings.clone())),
        ],
    }
}

/// Builds the scanner for `id` from an already validated configuration.
pub fn create_scanner(id: StrategyId, config: &Config) -> Result<OpportunityScanner, StrategyError> {
    let scanner = &config.scanner;
    if scanner.threshold_min > scanner.threshold_max {
        return Err(StrategyError::InvalidParameters(format!(
            "scanner threshold_min {} exceeds threshold_max {}",
            scanner.threshold_min, scanner.threshold_max
        )));
    }
    if config.arbitrage.fast_half_life <= 0.0 || config.arbitrage.slow_half_life < config.arbitrage.fast_half_life {
        return Err(StrategyError::InvalidParameters(
            "arbitrage half-lives must be positive with slow >= fast".to_string(),
        ));
    }
    Ok(OpportunityScanner::new(
        id,
        scanner.clone(),
        config.timeframes.clone(),
        create_detectors(id, config),
    ))
}

pub fn create_coordinator(config: &Config) -> TimeframeSignalCoordinator {
    TimeframeSignalCoordinator::new(config.timeframes.clone(), config.backtest.bar_interval_minutes)
}
