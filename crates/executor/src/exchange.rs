use crate::error::ExecutorError;
use async_trait::async_trait;
use configuration::Simulation;
use core_types::{Bar, Execution, OrderSide};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A market order for a quantity of one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
}

impl OrderRequest {
    pub fn new(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
        }
    }
}

/// A generic trait for an execution engine.
///
/// Implementations calculate the effects of a fill (price, commission) but
/// **do not modify the portfolio state**. The caller applies the returned
/// `Execution` to the `Portfolio`.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, order: &OrderRequest, bar: &Bar, step: usize) -> Result<Execution, ExecutorError>;
}

/// The "virtual exchange" for backtesting.
///
/// Fills at the bar price moved against the order by `slippage_pct`, and
/// charges `commission_pct` of the filled notional.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    params: Simulation,
}

impl SimulatedExecutor {
    pub fn new(params: Simulation) -> Self {
        Self { params }
    }

    /// The execution price after slippage.
    pub fn fill_price(&self, side: OrderSide, price: Decimal) -> Decimal {
        let slippage = price * self.params.slippage_pct;
        match side {
            // For a buy, slippage makes the price HIGHER (worse).
            OrderSide::Buy => price + slippage,
            // For a sell, slippage makes the price LOWER (worse).
            OrderSide::Sell => price - slippage,
        }
    }

    pub fn commission(&self, price: Decimal, quantity: Decimal) -> Decimal {
        price * quantity * self.params.commission_pct
    }

    /// Cash a buy of `quantity` at `price` will consume, commission included.
    pub fn buy_cost(&self, price: Decimal, quantity: Decimal) -> Decimal {
        let fill = self.fill_price(OrderSide::Buy, price);
        fill * quantity + self.commission(fill, quantity)
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    async fn execute(&self, order: &OrderRequest, bar: &Bar, step: usize) -> Result<Execution, ExecutorError> {
        if order.quantity <= Decimal::ZERO {
            return Err(ExecutorError::InvalidOrder(format!(
                "quantity must be positive, got {}",
                order.quantity
            )));
        }
        if bar.symbol != order.symbol || bar.price <= Decimal::ZERO {
            return Err(ExecutorError::InvalidOrder(format!(
                "no usable {} price in bar for {}",
                order.symbol, bar.symbol
            )));
        }

        let price = self.fill_price(order.side, bar.price);
        let commission = self.commission(price, order.quantity);
        tracing::debug!(
            symbol = %order.symbol,
            side = ?order.side,
            quantity = %order.quantity,
            bar_price = %bar.price,
            fill_price = %price,
            %commission,
            "simulated fill"
        );

        Ok(Execution {
            execution_id: Uuid::new_v4(),
            symbol: order.symbol.clone(),
            side: order.side,
            price,
            quantity: order.quantity,
            commission,
            timestamp: bar.timestamp,
            step,
        })
    }
}
