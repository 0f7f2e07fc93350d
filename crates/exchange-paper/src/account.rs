//! Account snapshot, collateral, and expiration settlement.

use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::info;

use strikebot_core::{AccountSnapshot, OrderStatus, Position, PutCall, CONTRACT_MULTIPLIER};

use crate::client::PaperBroker;

/// Cash set aside for short options, netted against long protection in the
/// same underlying, expiration, and right.
pub(crate) fn collateral(positions: &[Position]) -> Decimal {
    let multiplier = Decimal::from(CONTRACT_MULTIPLIER);
    let mut groups: HashMap<(String, NaiveDate, PutCall), (u32, u32, Decimal, Decimal)> =
        HashMap::new();
    for p in positions {
        let entry = groups
            .entry((p.underlying_symbol.clone(), p.expiration_date, p.put_or_call))
            .or_default();
        entry.0 += p.short_quantity;
        entry.1 += p.long_quantity;
        entry.2 += p.strike_price * multiplier * Decimal::from(p.short_quantity);
        entry.3 += p.strike_price * multiplier * Decimal::from(p.long_quantity);
    }

    groups
        .values()
        .map(|(short, long, short_notional, long_notional)| {
            if *short == 0 {
                Decimal::ZERO
            } else if long >= short {
                (*short_notional - *long_notional).abs()
            } else {
                *short_notional
            }
        })
        .sum()
}

impl PaperBroker {
    pub(crate) fn account_snapshot(
        &self,
        include_orders: bool,
        include_positions: bool,
    ) -> AccountSnapshot {
        self.settle_expired();
        self.match_working_orders();

        let (cash, positions, orders) = {
            let state = self.state();
            (
                state.cash,
                state.positions.values().cloned().collect::<Vec<_>>(),
                state.orders.values().cloned().collect::<Vec<_>>(),
            )
        };

        let multiplier = Decimal::from(CONTRACT_MULTIPLIER);
        let market_value: Decimal = positions
            .iter()
            .map(|p| {
                let mark = self
                    .theoretical_value(&p.instrument())
                    .unwrap_or(p.average_price);
                mark * multiplier * Decimal::from(p.net_quantity())
            })
            .sum();

        AccountSnapshot {
            liquidation_value: cash + market_value,
            buying_power: (cash - collateral(&positions)).max(Decimal::ZERO),
            positions: if include_positions { positions } else { Vec::new() },
            orders: if include_orders { orders } else { Vec::new() },
        }
    }

    /// Removes positions whose contracts have stopped trading, settling
    /// intrinsic value into cash.
    pub(crate) fn settle_expired(&self) {
        let now = self.clock.now();
        let expired: Vec<Position> = self
            .state()
            .positions
            .values()
            .filter(|p| self.expiry_instant(p.expiration_date) <= now)
            .cloned()
            .collect();
        if expired.is_empty() {
            return;
        }

        let mut state = self.state();
        for position in expired {
            let spot = state
                .prices
                .get(&position.underlying_symbol)
                .map_or(Decimal::ZERO, |(price, _)| *price);
            let intrinsic = match position.put_or_call {
                PutCall::Put => (position.strike_price - spot).max(Decimal::ZERO),
                PutCall::Call => (spot - position.strike_price).max(Decimal::ZERO),
            };
            let settlement =
                intrinsic * Decimal::from(CONTRACT_MULTIPLIER) * Decimal::from(position.net_quantity());
            state.cash += settlement;
            state.positions.remove(&position.symbol);
            for order in state.orders.values_mut() {
                if order.status.is_working() && order.involves_symbol(&position.symbol) {
                    order.status = OrderStatus::Expired;
                }
            }
            info!(symbol = %position.symbol, %intrinsic, %settlement, "Paper position expired");
        }
    }
}
