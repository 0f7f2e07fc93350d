//! Market-session phases and wake-up scheduling.
//!
//! A trading day is split into half-open windows around the regular session:
//!
//! ```text
//! PreMarket | EarlyOpen | CoreOpen | LateOpen | EarlyAfterHours | LateAfterHours
//!           open     +early     close-late   close         +after_hours
//! ```
//!
//! Days the broker reports without a session are `Closed` throughout.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use strikebot_core::{BotSettings, Broker, Market, MarketHours, MarketSession};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Closed,
    PreMarket,
    EarlyOpen,
    CoreOpen,
    LateOpen,
    EarlyAfterHours,
    LateAfterHours,
}

impl Phase {
    pub const ALL: [Self; 7] = [
        Self::Closed,
        Self::PreMarket,
        Self::EarlyOpen,
        Self::CoreOpen,
        Self::LateOpen,
        Self::EarlyAfterHours,
        Self::LateAfterHours,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::PreMarket => "pre_market",
            Self::EarlyOpen => "early_open",
            Self::CoreOpen => "core_open",
            Self::LateOpen => "late_open",
            Self::EarlyAfterHours => "early_after_hours",
            Self::LateAfterHours => "late_after_hours",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Window widths measured from the session open and close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOffsets {
    /// `EarlyOpen` ends this long after the open.
    pub early_open: Duration,
    /// `LateOpen` starts this long before the close.
    pub late_open: Duration,
    /// `EarlyAfterHours` ends this long after the close.
    pub after_hours: Duration,
}

impl Default for SessionOffsets {
    fn default() -> Self {
        Self::from(&BotSettings::default())
    }
}

impl From<&BotSettings> for SessionOffsets {
    fn from(settings: &BotSettings) -> Self {
        Self {
            early_open: Duration::minutes(settings.early_open_minutes),
            late_open: Duration::minutes(settings.late_open_minutes),
            after_hours: Duration::minutes(settings.after_hours_minutes),
        }
    }
}

/// Phase of the trading day at `now`. `today` is `None` when the market has
/// no session on the current exchange date.
#[must_use]
pub fn current_phase(
    now: DateTime<Utc>,
    today: Option<&MarketSession>,
    offsets: &SessionOffsets,
) -> Phase {
    let Some(session) = today else {
        return Phase::Closed;
    };
    if now < session.open {
        Phase::PreMarket
    } else if now < session.open + offsets.early_open {
        Phase::EarlyOpen
    } else if now < session.close - offsets.late_open {
        Phase::CoreOpen
    } else if now < session.close {
        Phase::LateOpen
    } else if now < session.close + offsets.after_hours {
        Phase::EarlyAfterHours
    } else {
        Phase::LateAfterHours
    }
}

/// Next instant worth re-evaluating, or `None` to evaluate every tick.
#[must_use]
pub fn sleep_until(
    phase: Phase,
    today: Option<&MarketSession>,
    upcoming: Option<&MarketSession>,
    offsets: &SessionOffsets,
) -> Option<DateTime<Utc>> {
    match phase {
        Phase::Closed | Phase::LateAfterHours => upcoming.map(|s| s.open),
        Phase::PreMarket => today.map(|s| s.open),
        Phase::EarlyOpen => today.map(|s| s.open + offsets.early_open),
        Phase::CoreOpen | Phase::LateOpen | Phase::EarlyAfterHours => None,
    }
}

/// True from `window` before the close up to the close itself, both ends
/// included.
#[must_use]
pub fn within_close_window(now: DateTime<Utc>, session: &MarketSession, window: Duration) -> bool {
    let remaining = session.close - now;
    remaining >= Duration::zero() && remaining <= window
}

/// Session lookups against one broker's calendar.
pub struct MarketSessionClock {
    broker: Arc<dyn Broker>,
    timezone: Tz,
    offsets: SessionOffsets,
    max_lookahead_days: u32,
}

impl MarketSessionClock {
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, settings: &BotSettings) -> Self {
        Self {
            broker,
            timezone: settings.market_timezone,
            offsets: SessionOffsets::from(settings),
            max_lookahead_days: settings.max_session_lookahead_days.max(1),
        }
    }

    #[must_use]
    pub const fn offsets(&self) -> &SessionOffsets {
        &self.offsets
    }

    /// Calendar date on the exchange at `now`.
    #[must_use]
    pub fn exchange_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }

    /// Market hours for `date`; `None` if the broker could not be asked.
    pub async fn session_for(&self, date: NaiveDate) -> Option<MarketHours> {
        match self.broker.get_market_hours(Market::Option, date).await {
            Ok(hours) => Some(hours),
            Err(e) => {
                warn!(broker = self.broker.name(), %date, error = %e, "Market hours lookup failed");
                None
            }
        }
    }

    /// First session on or after `from` that has not closed yet at `now`.
    ///
    /// `Ok(None)` means a broker call failed and the caller should simply try
    /// again later.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SessionLookaheadExhausted`] when no session is
    /// found within the configured number of days.
    pub async fn upcoming_session(
        &self,
        now: DateTime<Utc>,
        from: NaiveDate,
    ) -> Result<Option<MarketSession>, EngineError> {
        for offset in 0..self.max_lookahead_days {
            let date = from + Duration::days(i64::from(offset));
            let Some(hours) = self.session_for(date).await else {
                return Ok(None);
            };
            match hours.session {
                Some(session) if session.close > now => {
                    debug!(%date, open = %session.open, "Upcoming session found");
                    return Ok(Some(session));
                }
                _ => {}
            }
        }
        Err(EngineError::SessionLookaheadExhausted {
            from,
            days: self.max_lookahead_days,
        })
    }

    #[must_use]
    pub fn current_phase(&self, now: DateTime<Utc>, today: Option<&MarketSession>) -> Phase {
        current_phase(now, today, &self.offsets)
    }

    #[must_use]
    pub fn sleep_until(
        &self,
        phase: Phase,
        today: Option<&MarketSession>,
        upcoming: Option<&MarketSession>,
    ) -> Option<DateTime<Utc>> {
        sleep_until(phase, today, upcoming, &self.offsets)
    }
}
