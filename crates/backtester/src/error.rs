use thiserror::Error;

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Invalid configuration: {0}")]
    Configuration(#[from] configuration::error::ConfigError),

    #[error("Strategy setup error: {0}")]
    Strategy(#[from] strategies::StrategyError),

    #[error("Risk management error: {0}")]
    Risk(#[from] risk::RiskError),

    #[error("Execution simulation error: {0}")]
    Executor(#[from] executor::ExecutorError),

    #[error("Analytics calculation error: {0}")]
    Analytics(#[from] analytics::AnalyticsError),

    #[error("Progress bar template error: {0}")]
    ProgressBarTemplate(String),

    #[error("No bars were loaded for any symbol in the universe.")]
    DataUnavailable,
}

impl From<indicatif::style::TemplateError> for BacktestError {
    fn from(error: indicatif::style::TemplateError) -> Self {
        BacktestError::ProgressBarTemplate(error.to_string())
    }
}
