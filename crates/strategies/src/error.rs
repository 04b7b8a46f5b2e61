use core_types::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Strategy received invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("An error occurred during indicator calculation: {0}")]
    IndicatorError(#[from] CoreError),

    #[error("Not enough history: need {needed} bars, have {available}")]
    InsufficientHistory { needed: usize, available: usize },
}
