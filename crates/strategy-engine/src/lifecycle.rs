//! Order life cycle: place, confirm, cancel and retry, persist.
//!
//! ```text
//! BUILT -> SUBMITTED -> FILLED
//!                    -> CANCELED (not filled after the wait; rebuild and retry)
//!                    -> REJECTED (broker refused; abandoned for this tick)
//! ```
//!
//! Closing orders stop at SUBMITTED and are left to work. Broker errors never
//! propagate out of this module; persistence errors are logged and the order
//! work continues, since rows are keyed by the broker order id.

use std::time::Duration;

use tracing::{error, info, warn};

use strikebot_core::{Order, OrderId, OrderRecord, OrderStatus, StrategyConfig, StrategyId};

use crate::monitor::positions_from_fill;
use crate::opening::OpeningOrderBuilder;
use crate::types::{Collaborators, OpenOutcome};

pub struct OrderLifecycleManager {
    strategy: String,
    strategy_id: StrategyId,
    deps: Collaborators,
    confirm_wait: Duration,
    max_attempts: u32,
}

impl OrderLifecycleManager {
    #[must_use]
    pub fn new(
        strategy: impl Into<String>,
        strategy_id: StrategyId,
        deps: Collaborators,
        confirm_wait: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            strategy: strategy.into(),
            strategy_id,
            deps,
            confirm_wait,
            max_attempts: max_attempts.max(1),
        }
    }

    #[must_use]
    pub fn from_config(config: &StrategyConfig, strategy_id: StrategyId, deps: Collaborators) -> Self {
        Self::new(
            config.name.clone(),
            strategy_id,
            deps,
            Duration::from_secs(config.opening_order_loop_secs),
            config.max_opening_attempts,
        )
    }

    /// Runs the opening sequence until a fill, a failure, or the attempt
    /// ceiling. Every attempt asks `builder` for a fresh order.
    pub async fn open(&self, builder: &dyn OpeningOrderBuilder) -> OpenOutcome {
        for attempt in 1..=self.max_attempts {
            let Some(order) = builder.build().await else {
                return OpenOutcome::NothingToOpen;
            };
            if self.deps.control.kill_switch_engaged() {
                warn!(strategy = %self.strategy, "Kill switch engaged, not placing order");
                return OpenOutcome::Halted;
            }
            let Some(order_id) = self.submit(&order).await else {
                return OpenOutcome::Abandoned;
            };
            if !order.is_opening() {
                return OpenOutcome::Submitted(order_id);
            }

            self.deps.clock.sleep(self.confirm_wait).await;
            let current = match self.deps.broker.get_order(order_id).await {
                Ok(current) => current,
                Err(e) => {
                    warn!(strategy = %self.strategy, order_id, error = %e, "Order lookup failed");
                    return OpenOutcome::Abandoned;
                }
            };

            match current.status {
                OrderStatus::Filled => {
                    self.record_fill(order_id, &current).await;
                    return OpenOutcome::Filled(order_id);
                }
                status if status.is_working() => {
                    info!(
                        strategy = %self.strategy,
                        order_id,
                        attempt,
                        %status,
                        "Opening order not filled, canceling"
                    );
                    if self.deps.control.kill_switch_engaged() {
                        warn!(strategy = %self.strategy, order_id, "Kill switch engaged, leaving order");
                        return OpenOutcome::Halted;
                    }
                    if !self.cancel(order_id).await {
                        return OpenOutcome::Abandoned;
                    }
                }
                status => {
                    warn!(strategy = %self.strategy, order_id, %status, "Opening order ended unfilled");
                    self.persist_status(order_id, status).await;
                    return OpenOutcome::Abandoned;
                }
            }
        }

        let message = format!(
            "{}: opening order not filled after {} attempts",
            self.strategy, self.max_attempts
        );
        warn!(strategy = %self.strategy, attempts = self.max_attempts, "Opening attempts exhausted");
        self.deps.notifier.send_notification(&message).await;
        OpenOutcome::Exhausted {
            attempts: self.max_attempts,
        }
    }

    /// Places `order` and persists it with status `NEW`. `None` when the kill
    /// switch is engaged or the broker did not accept the order.
    pub async fn submit(&self, order: &Order) -> Option<OrderId> {
        if self.deps.control.kill_switch_engaged() {
            warn!(strategy = %self.strategy, "Kill switch engaged, not placing order");
            return None;
        }
        let order_id = match self.deps.broker.place_order(order).await {
            Ok(id) if id != 0 => id,
            Ok(_) => {
                warn!(strategy = %self.strategy, "Broker returned no order id");
                return None;
            }
            Err(e) => {
                warn!(strategy = %self.strategy, error = %e, "Order placement failed");
                return None;
            }
        };

        let record = OrderRecord {
            order_id,
            strategy_id: self.strategy_id,
            status: OrderStatus::New,
            position_effect: order.position_effect(),
            order: Order {
                order_id: Some(order_id),
                ..order.clone()
            },
        };
        if let Err(e) = self.deps.database.create_order(&record).await {
            error!(strategy = %self.strategy, order_id, error = %e, "Failed to persist order");
        }

        info!(
            strategy = %self.strategy,
            order_id,
            effect = %record.position_effect,
            order_type = %order.order_type,
            price = ?order.price,
            quantity = order.quantity,
            "Order submitted"
        );
        Some(order_id)
    }

    /// Cancels a working order and marks it `CANCELED`. `false` when the kill
    /// switch is engaged or the broker call failed.
    pub async fn cancel(&self, order_id: OrderId) -> bool {
        if self.deps.control.kill_switch_engaged() {
            warn!(strategy = %self.strategy, order_id, "Kill switch engaged, not canceling");
            return false;
        }
        if let Err(e) = self.deps.broker.cancel_order(order_id).await {
            warn!(strategy = %self.strategy, order_id, error = %e, "Cancel failed");
            return false;
        }
        self.persist_status(order_id, OrderStatus::Canceled).await;
        info!(strategy = %self.strategy, order_id, "Order canceled");
        true
    }

    /// Persists the positions created by a filled opening order and notifies.
    pub async fn record_fill(&self, order_id: OrderId, filled: &Order) {
        for record in positions_from_fill(self.strategy_id, order_id, filled) {
            if let Err(e) = self.deps.database.create_position(&record).await {
                error!(
                    strategy = %self.strategy,
                    order_id,
                    symbol = %record.position.symbol,
                    error = %e,
                    "Failed to persist position"
                );
            }
        }
        self.persist_status(order_id, OrderStatus::Filled).await;

        let symbols: Vec<&str> = filled
            .legs
            .iter()
            .map(|leg| leg.instrument.symbol.as_str())
            .collect();
        let price = filled
            .price
            .map_or_else(|| "market".to_string(), |p| p.to_string());
        info!(strategy = %self.strategy, order_id, quantity = filled.quantity, %price, "Opening order filled");
        self.deps
            .notifier
            .send_notification(&format!(
                "{}: opened {} x {} at {} (order {})",
                self.strategy,
                filled.quantity,
                symbols.join("/"),
                price,
                order_id
            ))
            .await;
    }

    pub(crate) async fn persist_status(&self, order_id: OrderId, status: OrderStatus) {
        if let Err(e) = self.deps.database.update_order_status(order_id, status).await {
            error!(strategy = %self.strategy, order_id, %status, error = %e, "Failed to update order status");
        }
    }
}
