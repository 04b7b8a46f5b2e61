use crate::opportunity::OpportunityOrigin;
use crate::structs::{Bar, Execution};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use std::sync::Arc;

/// Per-symbol simulation state. Owned and mutated only by the simulation loop.
///
/// The bar history is shared (`Arc<[Bar]>`) and never copied; `cursor` is the
/// number of bars visible at the current simulated time, so analysis never
/// looks ahead.
#[derive(Debug, Clone)]
pub struct SymbolState {
    pub symbol: String,
    pub quantity: Decimal,
    /// Cost basis of the open position, commission included.
    pub allocated_cash: Decimal,
    pub entry_price: Decimal,
    pub peak_price: Decimal,
    pub holding_periods: usize,
    pub last_trade_step: Option<usize>,
    pub entry_origin: OpportunityOrigin,
    pub entry_execution: Option<Execution>,
    history: Arc<[Bar]>,
    cursor: usize,
}

impl SymbolState {
    pub fn new(symbol: impl Into<String>, history: Arc<[Bar]>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: Decimal::ZERO,
            allocated_cash: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            peak_price: Decimal::ZERO,
            holding_periods: 0,
            last_trade_step: None,
            entry_origin: OpportunityOrigin::Signal,
            entry_execution: None,
            history,
            cursor: 0,
        }
    }

    pub fn has_position(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    /// Moves the cursor forward over every bar stamped at or before `now`.
    /// Returns true when a new bar became visible.
    pub fn advance_to(&mut self, now: DateTime<Utc>) -> bool {
        let before = self.cursor;
        while self.cursor < self.history.len() && self.history[self.cursor].timestamp <= now {
            self.cursor += 1;
        }
        self.cursor > before
    }

    /// Bars visible at the current simulated time.
    pub fn visible(&self) -> &[Bar] {
        &self.history[..self.cursor]
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current_bar(&self) -> Option<&Bar> {
        self.visible().last()
    }

    pub fn current_price(&self) -> Option<Decimal> {
        self.current_bar().map(|bar| bar.price)
    }

    /// Records a fill that opens a position.
    pub fn open(&mut self, execution: Execution, origin: OpportunityOrigin) {
        debug_assert!(!self.has_position(), "position for {} already open", self.symbol);
        self.quantity = execution.quantity;
        self.allocated_cash = execution.notional() + execution.commission;
        self.entry_price = execution.price;
        self.peak_price = execution.price;
        self.holding_periods = 0;
        self.last_trade_step = Some(execution.step);
        self.entry_origin = origin;
        self.entry_execution = Some(execution);
    }

    /// Clears the position and hands back the entry fill and origin.
    pub fn close(&mut self, step: usize) -> Option<(Execution, OpportunityOrigin, usize)> {
        let entry = self.entry_execution.take()?;
        let origin = std::mem::take(&mut self.entry_origin);
        let held = self.holding_periods;
        self.quantity = Decimal::ZERO;
        self.allocated_cash = Decimal::ZERO;
        self.entry_price = Decimal::ZERO;
        self.peak_price = Decimal::ZERO;
        self.holding_periods = 0;
        self.last_trade_step = Some(step);
        debug_assert!(self.quantity >= Decimal::ZERO);
        Some((entry, origin, held))
    }

    /// Called once per step for an open position at the latest price.
    pub fn mark(&mut self, price: Decimal) {
        if !self.has_position() {
            return;
        }
        self.holding_periods += 1;
        if price > self.peak_price {
            self.peak_price = price;
        }
    }

    /// Unrealized return relative to the entry price.
    pub fn unrealized_return(&self, price: Decimal) -> f64 {
        relative_change(self.entry_price, price)
    }

    /// Best unrealized return seen since entry.
    pub fn peak_return(&self) -> f64 {
        relative_change(self.entry_price, self.peak_price)
    }

    pub fn market_value(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }
}

fn relative_change(from: Decimal, to: Decimal) -> f64 {
    if from.is_zero() {
        return 0.0;
    }
    ((to - from) / from).to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::OrderSide;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn history() -> Arc<[Bar]> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..5)
            .map(|i| Bar::new("BTCUSDT", start + Duration::hours(i), Decimal::from(100 + i), dec!(1)))
            .collect::<Vec<_>>()
            .into()
    }

    #[test]
    fn cursor_never_exposes_future_bars() {
        let bars = history();
        let mut state = SymbolState::new("BTCUSDT", bars.clone());
        assert!(state.visible().is_empty());

        assert!(state.advance_to(bars[2].timestamp));
        assert_eq!(state.visible().len(), 3);
        assert_eq!(state.current_price(), Some(dec!(102)));

        assert!(!state.advance_to(bars[2].timestamp));
    }

    #[test]
    fn open_mark_close_cycle() {
        let mut state = SymbolState::new("BTCUSDT", history());
        let fill = Execution {
            execution_id: Uuid::new_v4(),
            symbol: "BTCUSDT".into(),
            side: OrderSide::Buy,
            price: dec!(100),
            quantity: dec!(2),
            commission: dec!(0.2),
            timestamp: Utc::now(),
            step: 3,
        };
        state.open(fill, OpportunityOrigin::Signal);
        assert_eq!(state.allocated_cash, dec!(200.2));

        state.mark(dec!(110));
        state.mark(dec!(105));
        assert_eq!(state.holding_periods, 2);
        assert_eq!(state.peak_price, dec!(110));
        assert!((state.peak_return() - 0.10).abs() < 1e-12);
        assert!((state.unrealized_return(dec!(105)) - 0.05).abs() < 1e-12);

        let (entry, origin, held) = state.close(9).unwrap();
        assert_eq!(entry.quantity, dec!(2));
        assert_eq!(origin, OpportunityOrigin::Signal);
        assert_eq!(held, 2);
        assert!(!state.has_position());
        assert_eq!(state.last_trade_step, Some(9));
    }
}
