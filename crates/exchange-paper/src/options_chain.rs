//! Synthetic option chain priced with Black-Scholes (zero rates, no dividends).

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use tracing::debug;

use strikebot_core::{
    BrokerError, ChainRange, ChainRequest, Expiration, OptionChain, OptionInstrument, PutCall,
    Strike,
};

use crate::client::PaperBroker;

const MINUTES_PER_YEAR: f64 = 365.0 * 24.0 * 60.0;

/// Standard normal cumulative distribution.
#[must_use]
pub fn norm_cdf(x: f64) -> f64 {
    0.5 * libm::erfc(-x / std::f64::consts::SQRT_2)
}

/// Theoretical price and delta of a European option.
#[must_use]
pub fn black_scholes(
    put_or_call: PutCall,
    spot: f64,
    strike: f64,
    volatility: f64,
    years: f64,
) -> (f64, f64) {
    if years <= 0.0 || volatility <= 0.0 || spot <= 0.0 || strike <= 0.0 {
        return match put_or_call {
            PutCall::Call if spot > strike => (spot - strike, 1.0),
            PutCall::Put if spot < strike => (strike - spot, -1.0),
            _ => (0.0, 0.0),
        };
    }
    let sd = volatility * years.sqrt();
    let d1 = ((spot / strike).ln() + 0.5 * volatility * volatility * years) / sd;
    let d2 = d1 - sd;
    match put_or_call {
        PutCall::Call => (spot * norm_cdf(d1) - strike * norm_cdf(d2), norm_cdf(d1)),
        PutCall::Put => (
            strike * norm_cdf(-d2) - spot * norm_cdf(-d1),
            norm_cdf(d1) - 1.0,
        ),
    }
}

/// Broker-style option symbol, e.g. `SPY_032026P400`.
#[must_use]
pub fn option_symbol(underlying: &str, expiration: NaiveDate, put_or_call: PutCall, strike: Decimal) -> String {
    let right = match put_or_call {
        PutCall::Put => 'P',
        PutCall::Call => 'C',
    };
    format!(
        "{}_{}{}{}",
        underlying.to_uppercase(),
        expiration.format("%m%d%y"),
        right,
        strike.normalize()
    )
}

impl PaperBroker {
    pub(crate) fn today(&self) -> NaiveDate {
        self.clock
            .now()
            .with_timezone(&self.config.timezone)
            .date_naive()
    }

    /// Instant an option expiring on `date` stops trading (16:00 exchange time).
    pub(crate) fn expiry_instant(&self, date: NaiveDate) -> DateTime<Utc> {
        self.local_instant(date, 16, 0)
    }

    /// Weekly expirations from `today`, moved off holidays to the prior business day.
    pub(crate) fn listed_expirations(&self, today: NaiveDate) -> Vec<NaiveDate> {
        let target = self.config.expiry_weekday % 7;
        let offset = (i64::from(target) - i64::from(today.weekday().num_days_from_monday()) + 7) % 7;
        let first = today + Duration::days(offset);
        (0..i64::from(self.config.listed_weeks))
            .map(|week| {
                let mut date = first + Duration::weeks(week);
                while self.is_holiday(date) && date > today {
                    date -= Duration::days(1);
                }
                date
            })
            .filter(|date| !self.is_holiday(*date))
            .collect()
    }

    /// Midpoint value of `instrument` now, `None` for an unknown underlying.
    pub(crate) fn theoretical_value(&self, instrument: &OptionInstrument) -> Option<Decimal> {
        let (spot, volatility) = self
            .state()
            .prices
            .get(&instrument.underlying_symbol)
            .copied()?;
        let minutes = (self.expiry_instant(instrument.expiration_date) - self.clock.now())
            .num_minutes()
            .max(0);
        #[allow(clippy::cast_precision_loss)]
        let years = minutes as f64 / MINUTES_PER_YEAR;
        let (price, _) = black_scholes(
            instrument.put_or_call,
            spot.to_f64()?,
            instrument.strike_price.to_f64()?,
            volatility,
            years,
        );
        Decimal::from_f64(price).map(|p| p.round_dp(2))
    }

    pub(crate) fn option_chain(&self, request: &ChainRequest) -> Result<OptionChain, BrokerError> {
        let symbol = request.symbol.to_uppercase();
        let (spot, volatility) = self
            .state()
            .prices
            .get(&symbol)
            .copied()
            .ok_or_else(|| BrokerError::Rejected(format!("no market data for {symbol}")))?;
        let spot_f = spot
            .to_f64()
            .ok_or_else(|| BrokerError::Malformed(format!("bad price for {symbol}")))?;

        let now = self.clock.now();
        let today = self.today();
        let step = self.config.strike_step.max(Decimal::new(1, 2));
        let low = (spot / Decimal::TWO / step).floor() * step;
        let high = spot * Decimal::new(15, 1);

        let mut expirations = BTreeMap::new();
        let mut listed = Vec::new();
        for date in self.listed_expirations(today) {
            if date < request.from_date || date > request.to_date {
                continue;
            }
            let expiry = self.expiry_instant(date);
            if expiry <= now {
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let years = (expiry - now).num_minutes() as f64 / MINUTES_PER_YEAR;

            let mut strikes = BTreeMap::new();
            let mut strike = low.max(step);
            while strike <= high {
                if in_range(request.range, request.put_or_call, strike, spot) {
                    let (price, delta) = black_scholes(
                        request.put_or_call,
                        spot_f,
                        strike.to_f64().unwrap_or_default(),
                        volatility,
                        years,
                    );
                    let value = Decimal::from_f64(price).unwrap_or_default().round_dp(2);
                    let contract = Strike {
                        symbol: option_symbol(&symbol, date, request.put_or_call, strike),
                        underlying_symbol: symbol.clone(),
                        put_or_call: request.put_or_call,
                        strike,
                        expiration_date: date,
                        bid: Some((value - self.config.half_spread).max(Decimal::ZERO)),
                        ask: Some(value + self.config.half_spread),
                        delta,
                    };
                    listed.push(contract.instrument());
                    strikes.insert(strike, contract);
                }
                strike += step;
            }

            expirations.insert(
                date,
                Expiration {
                    date,
                    days_to_expiration: (date - today).num_days(),
                    strikes,
                },
            );
        }

        {
            let mut state = self.state();
            for instrument in listed {
                state.instruments.insert(instrument.symbol.clone(), instrument);
            }
        }

        debug!(symbol, expirations = expirations.len(), "Synthetic option chain built");
        Ok(OptionChain {
            symbol,
            underlying_price: Some(spot),
            expirations,
        })
    }
}

fn in_range(range: ChainRange, put_or_call: PutCall, strike: Decimal, spot: Decimal) -> bool {
    let out_of_the_money = match put_or_call {
        PutCall::Put => strike < spot,
        PutCall::Call => strike > spot,
    };
    match range {
        ChainRange::All => true,
        ChainRange::OutOfTheMoney => out_of_the_money,
        ChainRange::InTheMoney => !out_of_the_money,
        ChainRange::NearTheMoney => (strike - spot).abs() <= spot * Decimal::new(5, 2),
    }
}
