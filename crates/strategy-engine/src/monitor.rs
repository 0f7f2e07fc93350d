//! Reconciliation of persisted positions with the brokerage account.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use strikebot_core::{
    AccountSnapshot, Instruction, Order, OrderId, Position, PositionEffect, PositionRecord,
    PositionStatus, StrategyId,
};

/// Open position records keyed by the opening order that created them, so a
/// spread is managed as one unit.
#[must_use]
pub fn group_by_order(records: Vec<PositionRecord>) -> BTreeMap<OrderId, Vec<PositionRecord>> {
    let mut groups: BTreeMap<OrderId, Vec<PositionRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.order_id).or_default().push(record);
    }
    groups
}

/// Symbols touched by one strategy's own closing orders, as of the latest
/// reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosingActivity {
    /// Closing orders that filled since the previous look.
    pub filled: BTreeSet<String>,
    /// Closing orders still working, possibly partly filled.
    pub working: BTreeSet<String>,
}

/// Status a persisted open position should be retired with, if any.
///
/// Positions past their expiration date are `EXPIRED`. A position is
/// `CLOSED` once one of the strategy's own closing orders for its symbol has
/// filled, when the account no longer holds the symbol, or when it holds
/// fewer contracts than the record while none of the strategy's closing
/// orders is working on it.
#[must_use]
pub fn retirement(
    record: &PositionRecord,
    account: &AccountSnapshot,
    today: NaiveDate,
    closing: &ClosingActivity,
) -> Option<PositionStatus> {
    let p = &record.position;
    if p.expiration_date < today {
        return Some(PositionStatus::Expired);
    }
    if closing.filled.contains(&p.symbol) {
        return Some(PositionStatus::Closed);
    }
    let Some(held) = account.position(&p.symbol) else {
        return Some(PositionStatus::Closed);
    };
    let short_of_record =
        held.short_quantity < p.short_quantity || held.long_quantity < p.long_quantity;
    if short_of_record && !closing.working.contains(&p.symbol) {
        Some(PositionStatus::Closed)
    } else {
        None
    }
}

/// One open position record per opening leg of a filled order.
#[must_use]
pub fn positions_from_fill(
    strategy_id: StrategyId,
    order_id: OrderId,
    order: &Order,
) -> Vec<PositionRecord> {
    let single_leg = order.legs.len() == 1;
    order
        .legs
        .iter()
        .filter(|leg| leg.position_effect == PositionEffect::Opening)
        .map(|leg| {
            let price = if single_leg {
                order.price.or(leg.price)
            } else {
                leg.price.or(order.price)
            };
            let (short_quantity, long_quantity) = match leg.instruction {
                Instruction::SellToOpen | Instruction::SellToClose => (leg.quantity, 0),
                Instruction::BuyToOpen | Instruction::BuyToClose => (0, leg.quantity),
            };
            let instrument = &leg.instrument;
            PositionRecord {
                id: None,
                strategy_id,
                order_id,
                status: PositionStatus::Open,
                position: Position {
                    symbol: instrument.symbol.clone(),
                    underlying_symbol: instrument.underlying_symbol.clone(),
                    put_or_call: instrument.put_or_call,
                    strike_price: instrument.strike_price,
                    short_quantity,
                    long_quantity,
                    average_price: price.unwrap_or_default(),
                    expiration_date: instrument.expiration_date,
                },
            }
        })
        .collect()
}
