//! Max-loss budget position sizing.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use strikebot_core::{StrategyConfig, CONTRACT_MULTIPLIER};

/// Contracts affordable at `strike_price` without risking more than the
/// strategy's share of the account.
///
/// `remaining = buying_power - (liquidation_value - liquidation_value * allocation)`,
/// divided by `strike_price * 100 * max_loss` and floored. Never negative.
#[must_use]
pub fn quantity(
    strike_price: Decimal,
    buying_power: Decimal,
    liquidation_value: Decimal,
    max_loss: Decimal,
    allocation: Decimal,
) -> u32 {
    let max_loss_per_contract = strike_price * Decimal::from(CONTRACT_MULTIPLIER) * max_loss;
    if max_loss_per_contract <= Decimal::ZERO {
        return 0;
    }
    let balance_to_risk = liquidation_value * allocation;
    let remaining = buying_power - (liquidation_value - balance_to_risk);
    if remaining < max_loss_per_contract {
        return 0;
    }
    (remaining / max_loss_per_contract)
        .floor()
        .to_u32()
        .unwrap_or(u32::MAX)
}

/// [`quantity`] bound to one strategy's risk fractions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionSizer {
    pub max_loss: Decimal,
    pub allocation: Decimal,
}

impl PositionSizer {
    #[must_use]
    pub const fn new(max_loss: Decimal, allocation: Decimal) -> Self {
        Self {
            max_loss,
            allocation,
        }
    }

    #[must_use]
    pub fn from_config(config: &StrategyConfig) -> Self {
        Self::new(config.max_loss, config.portfolio_allocation)
    }

    #[must_use]
    pub fn quantity(
        &self,
        strike_price: Decimal,
        buying_power: Decimal,
        liquidation_value: Decimal,
    ) -> u32 {
        quantity(
            strike_price,
            buying_power,
            liquidation_value,
            self.max_loss,
            self.allocation,
        )
    }
}
