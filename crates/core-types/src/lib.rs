//! Shared domain vocabulary for the meridian workspace.
//!
//! Everything here is plain data plus the small amount of behavior that has to
//! be identical wherever the type is used (PnL arithmetic, regime predicates,
//! performance bookkeeping).

pub mod enums;
pub mod error;
pub mod opportunity;
pub mod performance;
pub mod state;
pub mod structs;

pub use enums::{ArbitrageKind, ExitReason, MarketRegime, OrderSide, RiskTier, StrategyId};
pub use error::CoreError;
pub use opportunity::{ArbitrageSignal, Opportunity, OpportunityOrigin};
pub use performance::{PerformanceBook, PerformanceRecord, PerformerClass};
pub use state::SymbolState;
pub use structs::{Bar, Execution, Trade};
