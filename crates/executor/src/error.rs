use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutorError {
    #[error("Not enough cash available to execute trade. Required: {required}, Available: {available}")]
    InsufficientCash { required: Decimal, available: Decimal },

    #[error("Position not found for symbol: {0}")]
    PositionNotFound(String),

    #[error("Invalid order quantity for closing position. Requested: {requested}, Available: {available}")]
    InvalidClosingQuantity { requested: Decimal, available: Decimal },

    #[error("Invalid order: {0}")]
    InvalidOrder(String),
}
