//! Exchange calendar and snapshot quotes.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use rust_decimal::Decimal;
use tracing::debug;

use strikebot_core::{BrokerError, MarketHours, MarketSession, Quote};

use crate::client::PaperBroker;

impl PaperBroker {
    pub(crate) fn is_holiday(&self, date: NaiveDate) -> bool {
        matches!(date.weekday(), Weekday::Sat | Weekday::Sun) || self.config.holidays.contains(&date)
    }

    /// Converts an exchange-local wall time to UTC, taking the earlier
    /// instant when DST makes it ambiguous.
    pub(crate) fn local_instant(&self, date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
        let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
        let local = date.and_time(time);
        self.config
            .timezone
            .from_local_datetime(&local)
            .earliest()
            .map_or_else(|| Utc.from_utc_datetime(&local), |dt| dt.with_timezone(&Utc))
    }

    /// Regular session 09:30–16:00 exchange time on business days.
    pub(crate) fn market_hours(&self, date: NaiveDate) -> MarketHours {
        let session = (!self.is_holiday(date)).then(|| MarketSession {
            open: self.local_instant(date, 9, 30),
            close: self.local_instant(date, 16, 0),
        });
        debug!(%date, open = session.is_some(), "Market hours");
        MarketHours { date, session }
    }

    pub(crate) fn quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, BrokerError> {
        let mut quotes = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let key = symbol.to_uppercase();
            let (underlying, instrument) = {
                let state = self.state();
                (
                    state.prices.get(&key).map(|(price, _)| *price),
                    state.instruments.get(&key).cloned(),
                )
            };

            let quote = if let Some(price) = underlying {
                Quote {
                    symbol: key,
                    bid: Some(price),
                    ask: Some(price),
                    last: Some(price),
                }
            } else if let Some(instrument) = instrument {
                let value = self
                    .theoretical_value(&instrument)
                    .ok_or_else(|| BrokerError::Rejected(format!("no market data for {key}")))?;
                Quote {
                    symbol: key,
                    bid: Some((value - self.config.half_spread).max(Decimal::ZERO)),
                    ask: Some(value + self.config.half_spread),
                    last: None,
                }
            } else {
                return Err(BrokerError::Rejected(format!("unknown symbol {key}")));
            };
            quotes.push(quote);
        }
        Ok(quotes)
    }
}
