//! Deterministic options strategy engine.
//!
//! One [`StrategyEngine`] per configured rule set. On every tick it:
//! - Works out the market-session phase and the next actionable wake time
//! - Reconciles persisted orders and positions with the brokerage account
//! - Keeps a profit-target closing order working for every open position
//! - Neutralizes positions expiring today shortly before the close
//! - Opens a new position (delta-banded strike, max-loss sizing) when flat
//!
//! Broker failures never escape a tick; they end the current step and the
//! next tick starts over from fresh account data.

pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod monitor;
pub mod opening;
pub mod session;
pub mod sizing;
pub mod stops;
pub mod strikes;
pub mod targets;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use engine::StrategyEngine;
pub use error::EngineError;
pub use lifecycle::OrderLifecycleManager;
pub use opening::{ChainOrderBuilder, OpeningOrderBuilder};
pub use session::{MarketSessionClock, Phase, SessionOffsets};
pub use sizing::PositionSizer;
pub use strikes::{nearest_strike, select_strike, DeltaBand, Selection};
pub use types::{Collaborators, OpenOutcome, TickReport};
