//! Order placement, matching, and cancellation.

use rust_decimal::Decimal;
use tracing::{debug, info};

use strikebot_core::{
    BrokerError, Instruction, Order, OrderId, OrderStatus, OrderType, Position, CONTRACT_MULTIPLIER,
};

use crate::client::{FillMode, PaperBroker};

impl PaperBroker {
    pub(crate) fn submit(&self, order: &Order) -> Result<OrderId, BrokerError> {
        if order.legs.is_empty() || order.quantity == 0 {
            return Err(BrokerError::Rejected("order has no quantity".to_string()));
        }
        if order.order_type != OrderType::Market && order.price.is_none() {
            return Err(BrokerError::Rejected(format!(
                "{} order without a price",
                order.order_type
            )));
        }

        let now = self.clock.now();
        let order_id = {
            let mut state = self.state();
            let order_id = state.next_order_id;
            state.next_order_id += 1;
            for leg in &order.legs {
                state
                    .instruments
                    .insert(leg.instrument.symbol.clone(), leg.instrument.clone());
            }
            let mut placed = order.clone();
            placed.order_id = Some(order_id);
            placed.status = OrderStatus::Working;
            placed.filled_quantity = 0;
            placed.entered_at = Some(now);
            state.orders.insert(order_id, placed);
            order_id
        };

        info!(
            order_id,
            order_type = %order.order_type,
            price = ?order.price,
            quantity = order.quantity,
            legs = order.legs.len(),
            "Paper order accepted"
        );
        self.match_order(order_id);
        Ok(order_id)
    }

    pub(crate) fn cancel(&self, order_id: OrderId) -> Result<(), BrokerError> {
        let mut state = self.state();
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(BrokerError::OrderNotFound(order_id))?;
        if !order.status.is_working() {
            return Err(BrokerError::Rejected(format!(
                "order {order_id} is already {}",
                order.status
            )));
        }
        order.status = OrderStatus::Canceled;
        info!(order_id, "Paper order canceled");
        Ok(())
    }

    pub(crate) fn order(&self, order_id: OrderId) -> Result<Order, BrokerError> {
        self.match_order(order_id);
        self.state()
            .orders
            .get(&order_id)
            .cloned()
            .ok_or(BrokerError::OrderNotFound(order_id))
    }

    pub(crate) fn match_working_orders(&self) {
        let working: Vec<OrderId> = self
            .state()
            .orders
            .values()
            .filter(|o| o.status.is_working())
            .filter_map(|o| o.order_id)
            .collect();
        for order_id in working {
            self.match_order(order_id);
        }
    }

    /// Fills a working order if the current theoretical prices allow it.
    fn match_order(&self, order_id: OrderId) {
        let (order, mode) = {
            let state = self.state();
            match state.orders.get(&order_id) {
                Some(order) if order.status.is_working() => (order.clone(), state.fill_mode),
                _ => return,
            }
        };

        let now = self.clock.now();
        if order
            .legs
            .iter()
            .any(|leg| self.expiry_instant(leg.instrument.expiration_date) <= now)
        {
            if let Some(o) = self.state().orders.get_mut(&order_id) {
                o.status = OrderStatus::Expired;
            }
            debug!(order_id, "Paper order expired with its contract");
            return;
        }
        if mode == FillMode::Never {
            return;
        }

        let mut leg_values = Vec::with_capacity(order.legs.len());
        for leg in &order.legs {
            match self.theoretical_value(&leg.instrument) {
                Some(value) => leg_values.push(value),
                None => return,
            }
        }

        // Signed net credit per unit at the current midpoints.
        let net: Decimal = order
            .legs
            .iter()
            .zip(&leg_values)
            .map(|(leg, value)| if leg.instruction.is_sell() { *value } else { -*value })
            .sum();
        let sells = order.legs.first().is_some_and(|leg| leg.instruction.is_sell());
        let limit = order.price.unwrap_or_default();

        let (marketable, fill_net) = match order.order_type {
            OrderType::Market => (true, net),
            OrderType::NetCredit => (net >= limit, limit),
            OrderType::NetDebit => (-net <= limit, -limit),
            OrderType::Limit if sells => (net >= limit, limit),
            OrderType::Limit => (-net <= limit, -limit),
        };
        if !(marketable || mode == FillMode::Always) {
            debug!(order_id, %net, %limit, "Paper order not marketable");
            return;
        }

        let mut state = self.state();
        let quantity = order.quantity;
        for (leg, value) in order.legs.iter().zip(&leg_values) {
            let price = if order.legs.len() == 1 {
                fill_net.abs()
            } else {
                *value
            };
            apply_leg(&mut state.positions, leg, price);
        }
        state.cash += fill_net * Decimal::from(CONTRACT_MULTIPLIER) * Decimal::from(quantity);
        if let Some(o) = state.orders.get_mut(&order_id) {
            o.status = OrderStatus::Filled;
            o.filled_quantity = quantity;
            if o.order_type == OrderType::Market {
                o.price = Some(fill_net.abs());
            }
        }
        info!(order_id, price = %fill_net.abs(), quantity, "Paper order filled");
    }
}

fn apply_leg(
    positions: &mut std::collections::BTreeMap<String, Position>,
    leg: &strikebot_core::OrderLeg,
    price: Decimal,
) {
    let instrument = &leg.instrument;
    let position = positions
        .entry(instrument.symbol.clone())
        .or_insert_with(|| Position {
            symbol: instrument.symbol.clone(),
            underlying_symbol: instrument.underlying_symbol.clone(),
            put_or_call: instrument.put_or_call,
            strike_price: instrument.strike_price,
            short_quantity: 0,
            long_quantity: 0,
            average_price: price,
            expiration_date: instrument.expiration_date,
        });

    let quantity = leg.quantity;
    match leg.instruction {
        Instruction::SellToOpen => {
            position.average_price = weighted(position.average_price, position.short_quantity, price, quantity);
            position.short_quantity += quantity;
        }
        Instruction::BuyToOpen => {
            position.average_price = weighted(position.average_price, position.long_quantity, price, quantity);
            position.long_quantity += quantity;
        }
        Instruction::BuyToClose => {
            position.short_quantity = position.short_quantity.saturating_sub(quantity);
        }
        Instruction::SellToClose => {
            position.long_quantity = position.long_quantity.saturating_sub(quantity);
        }
    }

    if position.short_quantity == 0 && position.long_quantity == 0 {
        positions.remove(&instrument.symbol);
    }
}

fn weighted(current: Decimal, held: u32, price: Decimal, added: u32) -> Decimal {
    let total = held + added;
    if total == 0 {
        return price;
    }
    (current * Decimal::from(held) + price * Decimal::from(added)) / Decimal::from(total)
}
