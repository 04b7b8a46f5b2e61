use crate::error::ExecutorError;
use core_types::{Execution, ExitReason, OpportunityOrigin, OrderSide, SymbolState, Trade};
use rust_decimal::prelude::*;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Cash plus the per-symbol states of the simulated account.
///
/// Its sole responsibility is to reflect the account accurately from fills;
/// it does not decide anything.
#[derive(Debug, Clone)]
pub struct Portfolio {
    cash: Decimal,
    initial_capital: Decimal,
    peak_equity: Decimal,
    states: BTreeMap<String, SymbolState>,
}

impl Portfolio {
    /// Creates a new `Portfolio` with a given amount of starting capital.
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            cash: initial_capital,
            initial_capital,
            peak_equity: initial_capital,
            states: BTreeMap::new(),
        }
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn initial_capital(&self) -> Decimal {
        self.initial_capital
    }

    pub fn peak_equity(&self) -> Decimal {
        self.peak_equity
    }

    pub fn insert_state(&mut self, state: SymbolState) {
        self.states.insert(state.symbol.clone(), state);
    }

    pub fn state(&self, symbol: &str) -> Option<&SymbolState> {
        self.states.get(symbol)
    }

    pub fn state_mut(&mut self, symbol: &str) -> Option<&mut SymbolState> {
        self.states.get_mut(symbol)
    }

    /// Drops a flat symbol from the account. Open positions must be closed first.
    pub fn remove_state(&mut self, symbol: &str) -> Result<SymbolState, ExecutorError> {
        match self.states.get(symbol) {
            None => Err(ExecutorError::PositionNotFound(symbol.to_string())),
            Some(state) if state.has_position() => Err(ExecutorError::InvalidOrder(format!(
                "{symbol} still has an open position"
            ))),
            Some(_) => self
                .states
                .remove(symbol)
                .ok_or_else(|| ExecutorError::PositionNotFound(symbol.to_string())),
        }
    }

    pub fn states(&self) -> impl Iterator<Item = &SymbolState> {
        self.states.values()
    }

    pub fn states_mut(&mut self) -> impl Iterator<Item = &mut SymbolState> {
        self.states.values_mut()
    }

    /// Symbols with an open position.
    pub fn open_symbols(&self) -> Vec<String> {
        self.states
            .values()
            .filter(|s| s.has_position())
            .map(|s| s.symbol.clone())
            .collect()
    }

    /// Applies a buy fill and opens the symbol's position.
    pub fn open(&mut self, execution: Execution, origin: OpportunityOrigin) -> Result<(), ExecutorError> {
        if execution.side != OrderSide::Buy {
            return Err(ExecutorError::InvalidOrder("positions are opened with a buy".into()));
        }
        let cost = execution.notional() + execution.commission;
        if cost > self.cash {
            return Err(ExecutorError::InsufficientCash {
                required: cost,
                available: self.cash,
            });
        }
        let state = self
            .states
            .get_mut(&execution.symbol)
            .ok_or_else(|| ExecutorError::PositionNotFound(execution.symbol.clone()))?;
        if state.has_position() {
            return Err(ExecutorError::InvalidOrder(format!("{} already has an open position", execution.symbol)));
        }

        self.cash -= cost;
        tracing::debug!(symbol = %execution.symbol, %cost, cash = %self.cash, "position opened");
        state.open(execution, origin);
        Ok(())
    }

    /// Applies a sell fill that closes the whole position and returns the round trip.
    pub fn close(&mut self, execution: Execution, reason: ExitReason) -> Result<Trade, ExecutorError> {
        if execution.side != OrderSide::Sell {
            return Err(ExecutorError::InvalidOrder("positions are closed with a sell".into()));
        }
        let state = self
            .states
            .get_mut(&execution.symbol)
            .ok_or_else(|| ExecutorError::PositionNotFound(execution.symbol.clone()))?;
        if execution.quantity != state.quantity {
            return Err(ExecutorError::InvalidClosingQuantity {
                requested: execution.quantity,
                available: state.quantity,
            });
        }
        let (entry, origin, holding_periods) = state
            .close(execution.step)
            .ok_or_else(|| ExecutorError::PositionNotFound(execution.symbol.clone()))?;

        self.cash += execution.notional() - execution.commission;
        debug_assert!(self.cash >= Decimal::ZERO, "cash went negative");

        let trade = Trade {
            trade_id: Uuid::new_v4(),
            symbol: execution.symbol.clone(),
            origin,
            entry_execution: entry,
            exit_execution: execution,
            exit_reason: reason,
            holding_periods,
        };
        tracing::debug!(symbol = %trade.symbol, pnl = %trade.pnl(), ?reason, "position closed");
        Ok(trade)
    }

    /// Market value of every open position at its latest visible price.
    pub fn positions_value(&self) -> BTreeMap<String, Decimal> {
        self.states
            .values()
            .filter(|s| s.has_position())
            .map(|s| {
                let price = s.current_price().unwrap_or(s.entry_price);
                (s.symbol.clone(), s.market_value(price))
            })
            .collect()
    }

    /// Cash + market value of all open positions.
    pub fn equity(&self) -> Decimal {
        self.cash + self.positions_value().values().copied().sum::<Decimal>()
    }

    /// Revalues the account and updates the equity peak.
    pub fn mark_to_market(&mut self) -> Decimal {
        let equity = self.equity();
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        equity
    }

    /// Decline of current equity from its peak, in [0, 1].
    pub fn drawdown(&self) -> f64 {
        if self.peak_equity <= Decimal::ZERO {
            return 0.0;
        }
        ((self.peak_equity - self.equity()) / self.peak_equity)
            .to_f64()
            .unwrap_or(0.0)
            .clamp(0.0, 1.0)
    }
}
