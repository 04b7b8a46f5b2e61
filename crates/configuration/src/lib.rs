use crate::error::ConfigError;
use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod logging;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use logging::{LogGuard, init_tracing};
pub use settings::{
    Arbitrage, Backtest, CircuitBreaker, Concurrency, Config, Logging, Regime, RiskManagement,
    Rotation, Scanner, Simulation, StopLoss, Timeframes,
};

/// Prefix for environment overrides, e.g. `MERIDIAN__BACKTEST__INITIAL_CAPITAL=5000`.
pub const ENV_PREFIX: &str = "MERIDIAN";

/// Loads and validates the configuration from `config.toml` in the working directory.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from("config.toml")
}

/// Loads the configuration from `path`, layers `MERIDIAN__*` environment overrides on
/// top, deserializes it into our strongly-typed `Config` and validates it.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from(path.as_ref()).required(true))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("backtest.universe")
                .try_parsing(true),
        )
        .build()?;

    let config = builder.try_deserialize::<Config>()?;
    config.validate()?;
    tracing::debug!(
        path = %path.as_ref().display(),
        symbols = config.backtest.universe.len(),
        "configuration loaded"
    );

    Ok(config)
}
