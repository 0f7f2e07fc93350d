//! Types shared by the engine's decision steps.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use strikebot_core::{Broker, Clock, ControlView, Database, Notifier, OrderId};

use crate::session::Phase;

/// Everything an engine talks to, resolved by the router at startup.
#[derive(Clone)]
pub struct Collaborators {
    pub broker: Arc<dyn Broker>,
    pub database: Arc<dyn Database>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub control: ControlView,
}

/// Result of one pass through the opening sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// No admissible strike, zero size, or no market data.
    NothingToOpen,
    /// Kill switch engaged before a mutating broker call.
    Halted,
    /// A closing order was accepted; it is left working.
    Submitted(OrderId),
    Filled(OrderId),
    /// A broker call failed; the next tick starts over.
    Abandoned,
    /// Every attempt was canceled unfilled.
    Exhausted { attempts: u32 },
}

/// What one `tick` did, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TickReport {
    /// `None` when the tick was skipped (sleeping or no market data).
    pub phase: Option<Phase>,
    pub sleep_until: Option<DateTime<Utc>>,
    pub opened: Option<OpenOutcome>,
    pub closing_orders_placed: u32,
    pub orders_canceled: u32,
    pub positions_retired: u32,
    pub positions_neutralized: u32,
}

impl TickReport {
    pub(crate) fn skipped(sleep_until: Option<DateTime<Utc>>) -> Self {
        Self {
            sleep_until,
            ..Self::default()
        }
    }
}
