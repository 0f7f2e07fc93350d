//! Strike selection within a delta band.

use rust_decimal::Decimal;
use tracing::trace;

use strikebot_core::Strike;

/// Inclusive band on absolute delta, `[|min_delta|, |target_delta|]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaBand {
    low: f64,
    high: f64,
}

impl DeltaBand {
    /// `None` if either edge is not finite or the band is empty.
    #[must_use]
    pub fn new(min_delta: f64, target_delta: f64) -> Option<Self> {
        if !min_delta.is_finite() || !target_delta.is_finite() {
            return None;
        }
        let (low, high) = (min_delta.abs(), target_delta.abs());
        (low <= high).then_some(Self { low, high })
    }

    #[must_use]
    pub const fn low(&self) -> f64 {
        self.low
    }

    #[must_use]
    pub const fn high(&self) -> f64 {
        self.high
    }

    /// NaN never matches.
    #[must_use]
    pub fn contains(&self, delta: f64) -> bool {
        let delta = delta.abs();
        delta >= self.low && delta <= self.high
    }
}

/// Winning strike with the size and premium that made it win.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection<'a> {
    pub strike: &'a Strike,
    pub quantity: u32,
    pub total_premium: Decimal,
}

/// Picks the admitted strike with the greatest `mid * quantity`.
///
/// A strike is admitted when its absolute delta lies inside the band and it
/// has both a bid and an ask. `sizer` receives `(strike_price, buying_power,
/// liquidation_value)`. Ties keep the first strike seen. Returns `None` when
/// nothing is admitted or every admitted strike sizes to zero.
pub fn select_strike<'a, I, F>(
    strikes: I,
    min_delta: f64,
    target_delta: f64,
    buying_power: Decimal,
    liquidation_value: Decimal,
    sizer: F,
) -> Option<Selection<'a>>
where
    I: IntoIterator<Item = &'a Strike>,
    F: Fn(Decimal, Decimal, Decimal) -> u32,
{
    let band = DeltaBand::new(min_delta, target_delta)?;
    let mut best: Option<Selection<'a>> = None;

    for strike in strikes {
        if !band.contains(strike.delta) {
            continue;
        }
        let Some(mid) = strike.mid() else {
            trace!(symbol = %strike.symbol, "Skipping strike without a two-sided quote");
            continue;
        };
        let quantity = sizer(strike.strike, buying_power, liquidation_value);
        if quantity == 0 {
            continue;
        }
        let total_premium = mid * Decimal::from(quantity);
        trace!(strike = %strike.strike, delta = strike.delta, quantity, %total_premium, "Candidate");
        if best
            .as_ref()
            .map_or(true, |b| total_premium > b.total_premium)
        {
            best = Some(Selection {
                strike,
                quantity,
                total_premium,
            });
        }
    }

    best
}

/// Strike whose price is closest to `target`; ties keep the first seen.
pub fn nearest_strike<'a, I>(strikes: I, target: Decimal) -> Option<&'a Strike>
where
    I: IntoIterator<Item = &'a Strike>,
{
    let mut best: Option<(&'a Strike, Decimal)> = None;
    for strike in strikes {
        let distance = (strike.strike - target).abs();
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((strike, distance));
        }
    }
    best.map(|(strike, _)| strike)
}
