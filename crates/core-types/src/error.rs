use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid input for {0}: {1}")]
    InvalidInput(String, String),

    #[error("Insufficient data: need {needed} values, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("Calculation error: {0}")]
    Calculation(String),
}
