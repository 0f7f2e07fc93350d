//! Profit-target closing orders.

use rust_decimal::Decimal;

use strikebot_core::{Instruction, Order, OrderDuration, OrderLeg, OrderType, PositionRecord};

const MIN_TICK: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Net credit per unit collected when the group was opened.
#[must_use]
pub fn entry_credit(group: &[PositionRecord]) -> Decimal {
    group
        .iter()
        .map(|r| {
            if r.position.is_short() {
                r.position.average_price
            } else {
                -r.position.average_price
            }
        })
        .sum()
}

/// Buy-back price that keeps `profit_target` of the entry credit.
#[must_use]
pub fn target_price(entry_credit: Decimal, profit_target: Decimal) -> Decimal {
    (entry_credit * (Decimal::ONE - profit_target))
        .round_dp(2)
        .max(MIN_TICK)
}

/// One closing leg per held side of every position in the group.
pub(crate) fn closing_legs(group: &[PositionRecord]) -> Vec<OrderLeg> {
    let mut legs = Vec::with_capacity(group.len());
    for record in group {
        let p = &record.position;
        if p.short_quantity > 0 {
            legs.push(OrderLeg::new(
                p.instrument(),
                Instruction::BuyToClose,
                p.short_quantity,
                None,
            ));
        }
        if p.long_quantity > 0 {
            legs.push(OrderLeg::new(
                p.instrument(),
                Instruction::SellToClose,
                p.long_quantity,
                None,
            ));
        }
    }
    legs
}

/// Good-till-cancel order buying the group back at its profit target.
///
/// `None` for an empty group or one opened for a debit.
#[must_use]
pub fn closing_order(group: &[PositionRecord], profit_target: Decimal) -> Option<Order> {
    let entry = entry_credit(group);
    if group.is_empty() || entry <= Decimal::ZERO {
        return None;
    }
    let price = target_price(entry, profit_target);
    let legs = closing_legs(group);
    let order_type = if legs.len() == 1 {
        OrderType::Limit
    } else {
        OrderType::NetDebit
    };

    tracing::debug!(
        order_id = group[0].order_id,
        entry = %entry,
        target = %price,
        "Profit target order built"
    );
    Some(Order::new(
        order_type,
        OrderDuration::GoodTillCancel,
        Some(price),
        legs,
    ))
}
