//! Expiration-day neutralization rules.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use strikebot_core::{Order, OrderDuration, OrderType, PositionRecord};

use crate::targets::closing_legs;

/// What to do with a position group in the final minutes of its last session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryAction {
    /// A short leg is in the money: buy the whole group back now.
    CloseAtMarket,
    /// Everything short is out of the money: let it expire worthless.
    LetExpire,
}

#[must_use]
pub fn expires_on(group: &[PositionRecord], date: NaiveDate) -> bool {
    group.iter().any(|r| r.position.expiration_date == date)
}

#[must_use]
pub fn expiry_action(group: &[PositionRecord], underlying_price: Decimal) -> ExpiryAction {
    let assignable = group
        .iter()
        .any(|r| r.position.is_short() && r.position.is_in_the_money(underlying_price));
    if assignable {
        tracing::warn!(
            order_id = group.first().map(|r| r.order_id),
            %underlying_price,
            "Short leg in the money on expiration day"
        );
        ExpiryAction::CloseAtMarket
    } else {
        ExpiryAction::LetExpire
    }
}

/// Market order unwinding every leg of the group.
#[must_use]
pub fn neutralizing_order(group: &[PositionRecord]) -> Option<Order> {
    let legs = closing_legs(group);
    if legs.is_empty() {
        return None;
    }
    Some(Order::new(OrderType::Market, OrderDuration::Day, None, legs))
}
