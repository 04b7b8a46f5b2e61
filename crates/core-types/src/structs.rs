use crate::enums::{ExitReason, OrderSide};
use crate::opportunity::OpportunityOrigin;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One observation of a symbol's market. Immutable and append-only per symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub volume: Decimal,
}

impl Bar {
    pub fn new(symbol: impl Into<String>, timestamp: DateTime<Utc>, price: Decimal, volume: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            price,
            volume,
        }
    }

    /// The price as `f64` for indicator math. Non-representable values map to 0.
    pub fn price_f64(&self) -> f64 {
        self.price.to_f64().unwrap_or(0.0)
    }

    pub fn volume_f64(&self) -> f64 {
        self.volume.to_f64().unwrap_or(0.0)
    }
}

/// Represents the result of a simulated fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub execution_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    /// The fill price after slippage.
    pub price: Decimal,
    pub quantity: Decimal,
    pub commission: Decimal,
    pub timestamp: DateTime<Utc>,
    /// Index of the simulation step that produced the fill.
    pub step: usize,
}

impl Execution {
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// A completed round trip: one entry fill and the fill that closed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: Uuid,
    pub symbol: String,
    pub origin: OpportunityOrigin,
    pub entry_execution: Execution,
    pub exit_execution: Execution,
    pub exit_reason: ExitReason,
    pub holding_periods: usize,
}

impl Trade {
    pub fn total_commission(&self) -> Decimal {
        self.entry_execution.commission + self.exit_execution.commission
    }

    /// Realized PnL: `(exit_price - entry_price) * quantity - total_commission`.
    pub fn pnl(&self) -> Decimal {
        (self.exit_execution.price - self.entry_execution.price) * self.entry_execution.quantity
            - self.total_commission()
    }

    /// PnL relative to the capital committed at entry.
    pub fn return_pct(&self) -> f64 {
        let cost = self.entry_execution.notional();
        if cost.is_zero() {
            return 0.0;
        }
        (self.pnl() / cost).to_f64().unwrap_or(0.0)
    }

    pub fn is_win(&self) -> bool {
        self.pnl() > Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fill(side: OrderSide, price: Decimal, quantity: Decimal, commission: Decimal) -> Execution {
        Execution {
            execution_id: Uuid::new_v4(),
            symbol: "BTCUSDT".to_string(),
            side,
            price,
            quantity,
            commission,
            timestamp: Utc::now(),
            step: 0,
        }
    }

    #[test]
    fn pnl_reconciles_with_fills_and_commission() {
        let trade = Trade {
            trade_id: Uuid::new_v4(),
            symbol: "BTCUSDT".to_string(),
            origin: OpportunityOrigin::Signal,
            entry_execution: fill(OrderSide::Buy, dec!(100.05), dec!(3.125), dec!(0.312656)),
            exit_execution: fill(OrderSide::Sell, dec!(107.93), dec!(3.125), dec!(0.337281)),
            exit_reason: ExitReason::TakeProfit,
            holding_periods: 12,
        };

        let expected = (dec!(107.93) - dec!(100.05)) * dec!(3.125) - (dec!(0.312656) + dec!(0.337281));
        assert_eq!(trade.pnl(), expected);
        assert!(trade.is_win());
        assert!(trade.return_pct() > 0.07);
    }

    #[test]
    fn bar_converts_to_f64() {
        let bar = Bar::new("ETHUSDT", Utc::now(), dec!(2500.5), dec!(12));
        assert!((bar.price_f64() - 2500.5).abs() < 1e-9);
        assert!((bar.volume_f64() - 12.0).abs() < 1e-9);
    }
}
