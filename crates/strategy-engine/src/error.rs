use chrono::NaiveDate;
use thiserror::Error;

/// Fatal runtime conditions. Everything else is handled inside a tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The broker reported no future session for every day in the window;
    /// the calendar or broker configuration is wrong.
    #[error("no trading session found within {days} days from {from}")]
    SessionLookaheadExhausted { from: NaiveDate, days: u32 },
}
