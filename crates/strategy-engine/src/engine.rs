//! Per-strategy decision loop body.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use strikebot_core::{
    AccountSnapshot, BotSettings, Broker, BrokerError, MarketSession, Order, OrderId,
    OrderStatus, OrderType, PositionEffect, PositionRecord, Quote, StrategyConfig, StrategyId,
};

use crate::error::EngineError;
use crate::lifecycle::OrderLifecycleManager;
use crate::monitor::{group_by_order, retirement, ClosingActivity};
use crate::opening::ChainOrderBuilder;
use crate::session::{within_close_window, MarketSessionClock, Phase};
use crate::stops::{expires_on, expiry_action, neutralizing_order, ExpiryAction};
use crate::targets::closing_order;
use crate::types::{Collaborators, TickReport};

type Groups = BTreeMap<OrderId, Vec<PositionRecord>>;

/// Consecutive failed market-hours lookups before the operator is told.
const HOURS_LOOKUP_ALERT_AFTER: u32 = 5;

/// One strategy's open positions and the orders it has working for them.
struct Book {
    groups: Groups,
    /// Orders this strategy placed that the broker still has working.
    working: Vec<Order>,
}

impl Book {
    fn working_closing_for<'a>(
        &'a self,
        group: &'a [PositionRecord],
    ) -> impl Iterator<Item = &'a Order> + 'a {
        self.working.iter().filter(move |o| {
            !o.is_opening()
                && group
                    .iter()
                    .any(|r| o.involves_symbol(&r.position.symbol))
        })
    }

    /// Every held contract in `group` already has a working closing leg.
    fn fully_covered(&self, group: &[PositionRecord]) -> bool {
        group.iter().all(|r| {
            let held = r.position.short_quantity + r.position.long_quantity;
            let covering: u32 = self
                .working_closing_for(group)
                .flat_map(|o| o.legs.iter())
                .filter(|leg| leg.instrument.symbol == r.position.symbol)
                .map(|leg| leg.quantity)
                .sum();
            covering >= held
        })
    }

    fn has_working_opening_order(&self) -> bool {
        self.working.iter().any(Order::is_opening)
    }
}

/// One configured rule set bound to its broker and persisted identity.
pub struct StrategyEngine {
    config: StrategyConfig,
    strategy_id: StrategyId,
    deps: Collaborators,
    sessions: MarketSessionClock,
    lifecycle: OrderLifecycleManager,
    expiry_window: Duration,
    failed_hours_lookups: u32,
    sleep_until: Option<DateTime<Utc>>,
}

impl StrategyEngine {
    #[must_use]
    pub fn new(
        config: StrategyConfig,
        strategy_id: StrategyId,
        deps: Collaborators,
        settings: &BotSettings,
    ) -> Self {
        let sessions = MarketSessionClock::new(Arc::clone(&deps.broker), settings);
        let lifecycle = OrderLifecycleManager::from_config(&config, strategy_id, deps.clone());
        Self {
            config,
            strategy_id,
            deps,
            sessions,
            lifecycle,
            expiry_window: Duration::minutes(settings.expiry_close_window_minutes),
            failed_hours_lookups: 0,
            sleep_until: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub const fn strategy_id(&self) -> StrategyId {
        self.strategy_id
    }

    #[must_use]
    pub const fn config(&self) -> &StrategyConfig {
        &self.config
    }

    #[must_use]
    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.deps.broker
    }

    #[must_use]
    pub const fn sleep_until(&self) -> Option<DateTime<Utc>> {
        self.sleep_until
    }

    /// Evaluates the strategy once.
    ///
    /// # Errors
    ///
    /// Only fatal conditions are returned; broker and persistence failures
    /// end the tick early and are logged.
    pub async fn tick(&mut self) -> Result<TickReport, EngineError> {
        let now = self.deps.clock.now();
        if let Some(until) = self.sleep_until {
            if now < until {
                debug!(strategy = %self.config.name, %until, "Sleeping");
                return Ok(TickReport::skipped(Some(until)));
            }
            self.sleep_until = None;
        }

        let today = self.sessions.exchange_date(now);
        let Some(hours) = self.sessions.session_for(today).await else {
            self.hours_lookup_failed().await;
            return Ok(TickReport::skipped(None));
        };
        self.failed_hours_lookups = 0;
        let session = hours.session;
        let phase = self.sessions.current_phase(now, session.as_ref());
        let upcoming = match phase {
            Phase::Closed | Phase::LateAfterHours => {
                self.sessions.upcoming_session(now, today).await?
            }
            _ => None,
        };
        self.sleep_until = self
            .sessions
            .sleep_until(phase, session.as_ref(), upcoming.as_ref());

        debug!(
            strategy = %self.config.name,
            %phase,
            sleep_until = ?self.sleep_until,
            "Evaluating"
        );
        let mut report = TickReport {
            phase: Some(phase),
            sleep_until: self.sleep_until,
            ..TickReport::default()
        };

        match (phase, session) {
            (Phase::CoreOpen, Some(session)) => {
                self.core_open(now, today, &session, &mut report).await;
            }
            (Phase::LateOpen, _) => self.cancel_stale_opening_orders(&mut report).await,
            (Phase::EarlyAfterHours, _) => {
                if let Some(book) = self.load_book(today, &mut report).await {
                    self.ensure_closing_orders(&book, &mut report).await;
                }
            }
            _ => {}
        }
        Ok(report)
    }

    async fn hours_lookup_failed(&mut self) {
        self.failed_hours_lookups = self.failed_hours_lookups.saturating_add(1);
        if self.failed_hours_lookups != HOURS_LOOKUP_ALERT_AFTER {
            return;
        }
        error!(
            strategy = %self.config.name,
            failures = self.failed_hours_lookups,
            "Market hours unavailable"
        );
        self.deps
            .notifier
            .send_notification(&format!(
                "{}: market hours lookup failed {} times in a row",
                self.config.name, self.failed_hours_lookups
            ))
            .await;
    }

    async fn core_open(
        &self,
        now: DateTime<Utc>,
        today: NaiveDate,
        session: &MarketSession,
        report: &mut TickReport,
    ) {
        let Some(book) = self.load_book(today, report).await else {
            return;
        };

        if within_close_window(now, session, self.expiry_window) {
            self.neutralize_expiring(today, &book, report).await;
            return;
        }

        self.ensure_closing_orders(&book, report).await;

        if !book.groups.is_empty() {
            debug!(strategy = %self.config.name, positions = book.groups.len(), "Position open, not opening");
            return;
        }
        if book.has_working_opening_order() {
            debug!(strategy = %self.config.name, "Opening order already working");
            return;
        }

        let builder = ChainOrderBuilder::new(self.deps.broker.as_ref(), &self.config, today);
        let outcome = self.lifecycle.open(&builder).await;
        info!(strategy = %self.config.name, ?outcome, "Opening sequence finished");
        report.opened = Some(outcome);
    }

    /// This strategy's open positions and working orders, after syncing order
    /// statuses and retiring positions that are gone.
    async fn load_book(&self, today: NaiveDate, report: &mut TickReport) -> Option<Book> {
        let account = match self.deps.broker.get_account(true, true).await {
            Ok(account) => account,
            Err(e) => {
                warn!(strategy = %self.config.name, error = %e, "Account lookup failed");
                return None;
            }
        };

        let (working, closing) = self.reconcile_orders(&account).await?;

        let records = match self
            .deps
            .database
            .read_open_positions_by_strategy(self.strategy_id)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                error!(strategy = %self.config.name, error = %e, "Failed to read open positions");
                return None;
            }
        };

        let mut open = Vec::with_capacity(records.len());
        for record in records {
            match (retirement(&record, &account, today, &closing), record.id) {
                (Some(status), Some(id)) => {
                    info!(
                        strategy = %self.config.name,
                        symbol = %record.position.symbol,
                        %status,
                        "Retiring position"
                    );
                    if let Err(e) = self.deps.database.close_position(id, status).await {
                        error!(strategy = %self.config.name, position_id = id, error = %e, "Failed to retire position");
                    }
                    report.positions_retired += 1;
                }
                _ => open.push(record),
            }
        }
        Some(Book {
            groups: group_by_order(open),
            working,
        })
    }

    /// Brings persisted order rows up to date with the broker, recording
    /// positions for opening orders that filled after the confirmation wait.
    ///
    /// Returns the strategy's orders that are still working, plus the symbols
    /// its closing orders touch. Rows the broker no longer knows are marked
    /// `EXPIRED`; rows that could not be looked up are assumed still working.
    async fn reconcile_orders(
        &self,
        account: &AccountSnapshot,
    ) -> Option<(Vec<Order>, ClosingActivity)> {
        let records = match self
            .deps
            .database
            .read_open_orders_by_strategy(self.strategy_id)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                error!(strategy = %self.config.name, error = %e, "Failed to read open orders");
                return None;
            }
        };

        let mut working = Vec::new();
        let mut closing = ClosingActivity::default();
        for record in records {
            let known = account
                .orders
                .iter()
                .find(|o| o.order_id == Some(record.order_id))
                .cloned();
            let current = match known {
                Some(order) => order,
                None => match self.deps.broker.get_order(record.order_id).await {
                    Ok(order) => order,
                    Err(BrokerError::OrderNotFound(_)) => {
                        warn!(
                            strategy = %self.config.name,
                            order_id = record.order_id,
                            status = %record.status,
                            "Order unknown to broker, marking expired"
                        );
                        self.lifecycle
                            .persist_status(record.order_id, OrderStatus::Expired)
                            .await;
                        continue;
                    }
                    Err(e) => {
                        debug!(order_id = record.order_id, error = %e, "Order lookup failed");
                        Order {
                            order_id: Some(record.order_id),
                            status: record.status,
                            ..record.order.clone()
                        }
                    }
                },
            };

            if current.status != record.status {
                if current.status == OrderStatus::Filled
                    && record.position_effect == PositionEffect::Opening
                {
                    self.lifecycle.record_fill(record.order_id, &current).await;
                } else {
                    self.lifecycle
                        .persist_status(record.order_id, current.status)
                        .await;
                }
            }

            if record.position_effect == PositionEffect::Closing {
                let symbols = record.order.legs.iter().map(|l| l.instrument.symbol.clone());
                if current.status.is_working() {
                    closing.working.extend(symbols);
                } else if current.status == OrderStatus::Filled {
                    closing.filled.extend(symbols);
                }
            }
            if current.status.is_working() {
                working.push(Order {
                    order_id: Some(record.order_id),
                    ..current
                });
            }
        }
        Some((working, closing))
    }

    /// Keeps one profit-target order working for the full size of every
    /// group. Closing orders covering only part of a group are replaced.
    async fn ensure_closing_orders(&self, book: &Book, report: &mut TickReport) {
        for (order_id, group) in &book.groups {
            if book.fully_covered(group) {
                continue;
            }
            let Some(order) = closing_order(group, self.config.profit_target) else {
                debug!(strategy = %self.config.name, order_id, "No profit target for position");
                continue;
            };

            let partial: Vec<OrderId> = book
                .working_closing_for(group)
                .filter_map(|o| o.order_id)
                .collect();
            if !partial.is_empty() {
                info!(
                    strategy = %self.config.name,
                    order_id,
                    orders = ?partial,
                    "Closing orders cover part of the position, replacing"
                );
            }
            if !self.cancel_all(&partial, report).await {
                continue;
            }
            if self.lifecycle.submit(&order).await.is_some() {
                report.closing_orders_placed += 1;
            }
        }
    }

    /// `false` as soon as one cancel fails.
    async fn cancel_all(&self, ids: &[OrderId], report: &mut TickReport) -> bool {
        for &id in ids {
            if !self.lifecycle.cancel(id).await {
                return false;
            }
            report.orders_canceled += 1;
        }
        true
    }

    async fn underlying_price(&self) -> Option<Decimal> {
        let symbols = [self.config.underlying.clone()];
        match self.deps.broker.get_quote(&symbols).await {
            Ok(quotes) => quotes.first().and_then(Quote::reference_price),
            Err(e) => {
                warn!(strategy = %self.config.name, error = %e, "Quote lookup failed");
                None
            }
        }
    }

    /// Closes short legs that would be assigned at today's close; leaves
    /// out-of-the-money positions to expire.
    async fn neutralize_expiring(&self, today: NaiveDate, book: &Book, report: &mut TickReport) {
        let expiring: Vec<&Vec<PositionRecord>> = book
            .groups
            .values()
            .filter(|g| expires_on(g, today))
            .collect();
        if expiring.is_empty() {
            return;
        }
        let Some(price) = self.underlying_price().await else {
            return;
        };

        for group in expiring {
            if expiry_action(group, price) == ExpiryAction::LetExpire {
                debug!(strategy = %self.config.name, %price, "Letting position expire");
                continue;
            }

            let closing: Vec<&Order> = book.working_closing_for(group).collect();
            if closing.iter().any(|o| o.order_type == OrderType::Market) {
                continue;
            }
            let ids: Vec<OrderId> = closing.iter().filter_map(|o| o.order_id).collect();
            if !self.cancel_all(&ids, report).await {
                continue;
            }

            let Some(order) = neutralizing_order(group) else {
                continue;
            };
            if self.lifecycle.submit(&order).await.is_some() {
                report.positions_neutralized += 1;
                let symbols: Vec<&str> = group.iter().map(|r| r.position.symbol.as_str()).collect();
                self.deps
                    .notifier
                    .send_notification(&format!(
                        "{}: closing {} at market, in the money at {} on expiration day",
                        self.config.name,
                        symbols.join("/"),
                        price
                    ))
                    .await;
            }
        }
    }

    async fn cancel_stale_opening_orders(&self, report: &mut TickReport) {
        let account = match self.deps.broker.get_account(true, false).await {
            Ok(account) => account,
            Err(e) => {
                warn!(strategy = %self.config.name, error = %e, "Account lookup failed");
                return;
            }
        };
        let records = match self
            .deps
            .database
            .read_open_orders_by_strategy(self.strategy_id)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                error!(strategy = %self.config.name, error = %e, "Failed to read open orders");
                return;
            }
        };

        for record in records
            .iter()
            .filter(|r| r.position_effect == PositionEffect::Opening)
        {
            let working = account
                .orders
                .iter()
                .any(|o| o.order_id == Some(record.order_id) && o.status.is_working());
            if working && self.lifecycle.cancel(record.order_id).await {
                report.orders_canceled += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{csp_config, position_record, scenario_a_chain, Harness};
    use crate::types::OpenOutcome;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use strikebot_core::{Instruction, OrderDuration, OrderLeg, OrderRecord, PutCall};

    fn monday(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn funded(h: &Harness) {
        h.broker.set_balances(dec!(200000), dec!(200000));
        h.broker.set_chain(scenario_a_chain(today(), 4));
    }

    /// Persists a filled short put (order 5) and puts it in the account.
    async fn seed_position(h: &Harness, expiration: NaiveDate) -> PositionRecord {
        let mut record = position_record(5, dec!(1010), PutCall::Put, 9, 0, dec!(1.20));
        record.position.expiration_date = expiration;
        let id = h.database.seed_position(record.clone()).await;
        record.id = Some(id);
        h.broker.hold(record.position.clone());
        record
    }

    fn buy_to_close(record: &PositionRecord, quantity: u32) -> Order {
        Order::new(
            OrderType::Limit,
            OrderDuration::GoodTillCancel,
            Some(dec!(0.60)),
            vec![OrderLeg::new(record.position.instrument(), Instruction::BuyToClose, quantity, None)],
        )
    }

    fn sell_to_open(quantity: u32) -> Order {
        let held = position_record(0, dec!(1010), PutCall::Put, quantity, 0, dec!(1.2)).position;
        Order::new(
            OrderType::Limit,
            OrderDuration::Day,
            Some(dec!(1.2)),
            vec![OrderLeg::new(held.instrument(), Instruction::SellToOpen, quantity, Some(dec!(1.2)))],
        )
    }

    /// Persists `order` as one of this strategy's and shows it working at
    /// the broker.
    async fn seed_working(h: &Harness, order_id: OrderId, mut order: Order) {
        order.order_id = Some(order_id);
        order.status = OrderStatus::Working;
        h.database
            .seed_order(OrderRecord {
                order_id,
                strategy_id: 1,
                status: OrderStatus::Working,
                position_effect: order.position_effect(),
                order: order.clone(),
            })
            .await;
        h.broker.add_account_order(order);
    }

    #[tokio::test]
    async fn core_open_opens_when_flat() {
        let h = Harness::at(monday(15, 0));
        funded(&h);
        let mut engine = h.engine(csp_config());

        let report = engine.tick().await.unwrap();

        assert_eq!(report.phase, Some(Phase::CoreOpen));
        assert_eq!(report.opened, Some(OpenOutcome::Filled(1)));
        let placed = h.broker.placed();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].legs[0].instrument.strike_price, dec!(1010));
        assert_eq!(h.database.positions().len(), 1);
    }

    #[tokio::test]
    async fn filled_position_is_never_reopened() {
        let h = Harness::at(monday(15, 0));
        funded(&h);
        h.database
            .seed_order(OrderRecord {
                order_id: 5,
                strategy_id: 1,
                status: OrderStatus::Filled,
                position_effect: PositionEffect::Opening,
                order: Order::new(OrderType::Limit, OrderDuration::Day, Some(dec!(1.2)), vec![]),
            })
            .await;
        seed_position(&h, today() + Duration::days(4)).await;
        let mut engine = h.engine(csp_config());

        let first = engine.tick().await.unwrap();
        h.clock.advance(Duration::minutes(1));
        let second = engine.tick().await.unwrap();

        assert_eq!(first.positions_retired, 0);
        assert!(first.opened.is_none() && second.opened.is_none());
        assert_eq!(first.closing_orders_placed, 1);
        assert_eq!(second.closing_orders_placed, 0);
        let placed = h.broker.placed();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].legs[0].instruction, Instruction::BuyToClose);
        assert_eq!(placed[0].price, Some(dec!(0.60)));
    }

    #[tokio::test]
    async fn early_after_hours_only_places_closing_orders() {
        let h = Harness::at(monday(21, 10));
        funded(&h);
        seed_position(&h, today() + Duration::days(4)).await;
        let mut engine = h.engine(csp_config());

        let report = engine.tick().await.unwrap();

        assert_eq!(report.phase, Some(Phase::EarlyAfterHours));
        assert!(report.opened.is_none());
        assert_eq!(report.closing_orders_placed, 1);
        assert!(h.broker.placed().iter().all(|o| !o.is_opening()));
        assert_eq!(h.broker.calls("get_option_chain"), 0);
    }

    #[tokio::test]
    async fn early_after_hours_never_opens_when_flat() {
        let h = Harness::at(monday(21, 0));
        funded(&h);
        let mut engine = h.engine(csp_config());
        let report = engine.tick().await.unwrap();
        assert_eq!(report.phase, Some(Phase::EarlyAfterHours));
        assert!(h.broker.placed().is_empty());
    }

    #[tokio::test]
    async fn expired_and_closed_positions_are_retired() {
        let h = Harness::at(monday(15, 0));
        funded(&h);
        let expired = seed_position(&h, today() - Duration::days(3)).await;
        let mut engine = h.engine(csp_config());

        let report = engine.tick().await.unwrap();

        assert_eq!(report.positions_retired, 1);
        assert_eq!(
            h.database.position_status(expired.id.unwrap()),
            Some(strikebot_core::PositionStatus::Expired)
        );
        // Flat again, so it opens.
        assert!(matches!(report.opened, Some(OpenOutcome::Filled(_))));
    }

    #[tokio::test]
    async fn in_the_money_short_is_neutralized_before_the_close() {
        let h = Harness::at(monday(20, 50));
        funded(&h);
        h.broker.set_quote("SPY", dec!(1000));
        let record = seed_position(&h, today()).await;
        seed_working(&h, 77, buy_to_close(&record, 9)).await;
        let mut engine = h.engine(csp_config());

        let report = engine.tick().await.unwrap();

        assert_eq!(report.phase, Some(Phase::CoreOpen));
        assert_eq!(report.orders_canceled, 1);
        assert_eq!(report.positions_neutralized, 1);
        assert!(report.opened.is_none());
        assert_eq!(h.broker.canceled(), vec![77]);
        assert_eq!(h.database.orders()[&77].status, OrderStatus::Canceled);
        let placed = h.broker.placed();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].order_type, OrderType::Market);
        assert_eq!(h.notifier.messages().len(), 1);
    }

    #[tokio::test]
    async fn expiry_window_starts_exactly_fifteen_minutes_before_the_close() {
        let h = Harness::at(monday(20, 45));
        funded(&h);
        h.broker.set_quote("SPY", dec!(1000));
        seed_position(&h, today()).await;
        let mut engine = h.engine(csp_config());

        let report = engine.tick().await.unwrap();

        assert_eq!(report.phase, Some(Phase::CoreOpen));
        assert_eq!(report.positions_neutralized, 1);
        assert_eq!(report.closing_orders_placed, 0);
        assert!(report.opened.is_none());
        let placed = h.broker.placed();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].order_type, OrderType::Market);
        assert_eq!(placed[0].legs[0].quantity, 9);
    }

    #[tokio::test]
    async fn just_outside_the_expiry_window_keeps_the_profit_target() {
        let h = Harness::at(monday(20, 44));
        funded(&h);
        h.broker.set_quote("SPY", dec!(1000));
        seed_position(&h, today()).await;
        let mut engine = h.engine(csp_config());

        let report = engine.tick().await.unwrap();

        assert_eq!(report.positions_neutralized, 0);
        assert_eq!(report.closing_orders_placed, 1);
        assert_eq!(h.broker.placed()[0].order_type, OrderType::Limit);
    }

    #[tokio::test]
    async fn another_strategys_closing_order_does_not_cover_the_position() {
        let h = Harness::at(monday(15, 0));
        funded(&h);
        let record = seed_position(&h, today() + Duration::days(4)).await;
        let mut foreign = buy_to_close(&record, 1);
        foreign.order_id = Some(88);
        foreign.status = OrderStatus::Working;
        h.broker.add_account_order(foreign);
        let mut engine = h.engine(csp_config());

        let report = engine.tick().await.unwrap();

        assert_eq!(report.closing_orders_placed, 1);
        assert_eq!(report.orders_canceled, 0);
        assert!(h.broker.canceled().is_empty());
        let placed = h.broker.placed();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].legs[0].quantity, 9);
    }

    #[tokio::test]
    async fn undersized_closing_order_is_replaced() {
        let h = Harness::at(monday(15, 0));
        funded(&h);
        let record = seed_position(&h, today() + Duration::days(4)).await;
        seed_working(&h, 88, buy_to_close(&record, 1)).await;
        let mut engine = h.engine(csp_config());

        let report = engine.tick().await.unwrap();

        assert_eq!(report.orders_canceled, 1);
        assert_eq!(report.closing_orders_placed, 1);
        assert_eq!(h.broker.canceled(), vec![88]);
        assert_eq!(h.database.orders()[&88].status, OrderStatus::Canceled);
        assert_eq!(h.broker.placed()[0].legs[0].quantity, 9);
    }

    #[tokio::test]
    async fn full_size_closing_order_is_left_alone() {
        let h = Harness::at(monday(15, 0));
        funded(&h);
        let record = seed_position(&h, today() + Duration::days(4)).await;
        seed_working(&h, 88, buy_to_close(&record, 9)).await;
        let mut engine = h.engine(csp_config());

        let report = engine.tick().await.unwrap();

        assert_eq!(report.closing_orders_placed, 0);
        assert_eq!(report.orders_canceled, 0);
        assert!(h.broker.placed().is_empty());
    }

    #[tokio::test]
    async fn working_opening_order_blocks_another_open() {
        let h = Harness::at(monday(15, 0));
        funded(&h);
        seed_working(&h, 31, sell_to_open(9)).await;
        let mut engine = h.engine(csp_config());

        let report = engine.tick().await.unwrap();

        assert_eq!(report.phase, Some(Phase::CoreOpen));
        assert!(report.opened.is_none());
        assert_eq!(h.broker.calls("place_order"), 0);
        assert_eq!(h.broker.calls("get_option_chain"), 0);
        assert_eq!(h.database.orders()[&31].status, OrderStatus::Working);
    }

    #[tokio::test]
    async fn another_strategys_opening_order_does_not_block_opening() {
        let h = Harness::at(monday(15, 0));
        funded(&h);
        let mut foreign = sell_to_open(3);
        foreign.order_id = Some(31);
        foreign.status = OrderStatus::Working;
        h.broker.add_account_order(foreign);
        let mut engine = h.engine(csp_config());

        let report = engine.tick().await.unwrap();

        assert!(matches!(report.opened, Some(OpenOutcome::Filled(_))));
    }

    #[tokio::test]
    async fn out_of_the_money_short_is_left_to_expire() {
        let h = Harness::at(monday(20, 50));
        funded(&h);
        h.broker.set_quote("SPY", dec!(1100));
        seed_position(&h, today()).await;
        let mut engine = h.engine(csp_config());

        let report = engine.tick().await.unwrap();

        assert_eq!(report.positions_neutralized, 0);
        assert!(h.broker.placed().is_empty());
    }

    #[tokio::test]
    async fn late_open_cancels_stale_opening_orders() {
        let h = Harness::at(monday(20, 57));
        funded(&h);
        let mut order = Order::new(OrderType::Limit, OrderDuration::Day, Some(dec!(1.2)), vec![]);
        order.order_id = Some(31);
        order.status = OrderStatus::Working;
        h.broker.add_account_order(order.clone());
        h.database
            .seed_order(OrderRecord {
                order_id: 31,
                strategy_id: 1,
                status: OrderStatus::Working,
                position_effect: PositionEffect::Opening,
                order,
            })
            .await;
        let mut engine = h.engine(csp_config());

        let report = engine.tick().await.unwrap();

        assert_eq!(report.phase, Some(Phase::LateOpen));
        assert_eq!(report.orders_canceled, 1);
        assert_eq!(h.database.orders()[&31].status, OrderStatus::Canceled);
        assert!(h.broker.placed().is_empty());
    }

    #[tokio::test]
    async fn sleeps_until_the_open_before_the_session() {
        let h = Harness::at(monday(13, 0));
        funded(&h);
        let mut engine = h.engine(csp_config());

        let report = engine.tick().await.unwrap();
        assert_eq!(report.phase, Some(Phase::PreMarket));
        assert_eq!(report.sleep_until, Some(monday(14, 30)));

        h.clock.set(monday(14, 0));
        let skipped = engine.tick().await.unwrap();
        assert_eq!(skipped.phase, None);
        assert_eq!(h.broker.calls("get_market_hours"), 1);

        h.clock.set(monday(14, 45));
        let report = engine.tick().await.unwrap();
        assert_eq!(report.phase, Some(Phase::CoreOpen));
    }

    #[tokio::test]
    async fn weekend_sleeps_until_monday() {
        let h = Harness::at(Utc.with_ymd_and_hms(2026, 3, 7, 16, 0, 0).unwrap());
        let mut engine = h.engine(csp_config());
        let report = engine.tick().await.unwrap();
        assert_eq!(report.phase, Some(Phase::Closed));
        assert_eq!(
            report.sleep_until,
            Some(Utc.with_ymd_and_hms(2026, 3, 9, 14, 30, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn unreachable_session_is_fatal() {
        let h = Harness::at(monday(15, 0));
        h.broker.close_every_day();
        let mut engine = h.engine(csp_config());
        assert!(matches!(
            engine.tick().await,
            Err(EngineError::SessionLookaheadExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn broker_outage_skips_the_tick() {
        let h = Harness::at(monday(15, 0));
        h.broker.fail("get_market_hours");
        let mut engine = h.engine(csp_config());
        let report = engine.tick().await.unwrap();
        assert_eq!(report, TickReport::default());
    }

    #[tokio::test]
    async fn repeated_hours_failures_alert_once() {
        let h = Harness::at(monday(15, 0));
        h.broker.fail("get_market_hours");
        let mut engine = h.engine(csp_config());
        let alerts = |h: &Harness| {
            h.notifier
                .messages()
                .iter()
                .filter(|m| m.contains("market hours lookup failed"))
                .count()
        };

        for _ in 0..4 {
            engine.tick().await.unwrap();
        }
        assert_eq!(alerts(&h), 0);
        engine.tick().await.unwrap();
        assert_eq!(alerts(&h), 1);
        assert!(h.notifier.messages()[0].contains("5 times in a row"));
        engine.tick().await.unwrap();
        assert_eq!(alerts(&h), 1);

        // A successful lookup starts the count over.
        h.broker.recover("get_market_hours");
        engine.tick().await.unwrap();
        h.broker.fail("get_market_hours");
        for _ in 0..4 {
            engine.tick().await.unwrap();
        }
        assert_eq!(alerts(&h), 1);
        engine.tick().await.unwrap();
        assert_eq!(alerts(&h), 2);
    }

    #[tokio::test]
    async fn order_unknown_to_broker_is_marked_expired() {
        let h = Harness::at(monday(15, 0));
        let mut order = sell_to_open(9);
        order.order_id = Some(40);
        h.database
            .seed_order(OrderRecord {
                order_id: 40,
                strategy_id: 1,
                status: OrderStatus::Working,
                position_effect: PositionEffect::Opening,
                order,
            })
            .await;
        let mut engine = h.engine(csp_config());

        let report = engine.tick().await.unwrap();

        assert_eq!(h.database.orders()[&40].status, OrderStatus::Expired);
        assert_eq!(h.broker.calls("get_order"), 1);
        // No longer counted as a working opening order.
        assert_eq!(report.opened, Some(OpenOutcome::NothingToOpen));

        h.clock.advance(Duration::minutes(1));
        engine.tick().await.unwrap();
        assert_eq!(h.broker.calls("get_order"), 1);
    }

    #[tokio::test]
    async fn unreachable_order_is_still_treated_as_working() {
        let h = Harness::at(monday(15, 0));
        funded(&h);
        let mut order = sell_to_open(9);
        order.order_id = Some(40);
        h.database
            .seed_order(OrderRecord {
                order_id: 40,
                strategy_id: 1,
                status: OrderStatus::Working,
                position_effect: PositionEffect::Opening,
                order,
            })
            .await;
        h.broker
            .fail_with("get_order", BrokerError::Transport("reset".into()));
        let mut engine = h.engine(csp_config());

        let report = engine.tick().await.unwrap();

        assert_eq!(h.database.orders()[&40].status, OrderStatus::Working);
        assert!(report.opened.is_none());
        assert_eq!(h.broker.calls("place_order"), 0);
    }

    #[tokio::test]
    async fn late_fill_is_recorded_on_the_next_tick() {
        let h = Harness::at(monday(15, 0));
        funded(&h);
        let held = position_record(13, dec!(1010), PutCall::Put, 9, 0, dec!(1.2)).position;
        let mut order = Order::new(
            OrderType::Limit,
            OrderDuration::Day,
            Some(dec!(1.2)),
            vec![OrderLeg::new(held.instrument(), Instruction::SellToOpen, 9, Some(dec!(1.2)))],
        );
        h.database
            .seed_order(OrderRecord {
                order_id: 13,
                strategy_id: 1,
                status: OrderStatus::New,
                position_effect: PositionEffect::Opening,
                order: order.clone(),
            })
            .await;
        order.order_id = Some(13);
        order.status = OrderStatus::Filled;
        h.broker.add_account_order(order);
        h.broker.hold(held);
        let mut engine = h.engine(csp_config());

        let report = engine.tick().await.unwrap();

        assert_eq!(h.database.orders()[&13].status, OrderStatus::Filled);
        assert_eq!(h.database.open_positions().len(), 1);
        assert_eq!(h.notifier.messages().len(), 1);
        assert!(report.opened.is_none());
        assert_eq!(report.closing_orders_placed, 1);
    }

    #[tokio::test]
    async fn paper_round_trip_opens_then_takes_profit() {
        use strikebot_core::{Clock, ManualClock, PaperBrokerConfig, PaperUnderlying};
        use strikebot_paper::{FillMode, PaperBroker};

        let clock = ManualClock::new(monday(15, 0));
        let config = PaperBrokerConfig {
            starting_cash: dec!(500000),
            underlyings: [(
                "SPY".to_string(),
                PaperUnderlying {
                    price: dec!(500),
                    volatility: 0.2,
                },
            )]
            .into(),
            ..PaperBrokerConfig::default()
        };
        let paper = Arc::new(PaperBroker::new("paper", config, Arc::new(clock.clone())));
        paper.set_fill_mode(FillMode::Always);

        let h = Harness::at(monday(15, 0));
        let deps = Collaborators {
            broker: paper.clone(),
            clock: Arc::new(clock.clone()) as Arc<dyn Clock>,
            ..h.deps()
        };
        let strategy = StrategyConfig {
            min_delta: -0.05,
            target_delta: -0.30,
            ..csp_config()
        };
        let mut engine = StrategyEngine::new(strategy, 1, deps, &BotSettings::default());

        let first = engine.tick().await.unwrap();
        assert!(matches!(first.opened, Some(OpenOutcome::Filled(_))));
        assert_eq!(paper.positions().len(), 1);
        assert!(paper.positions()[0].is_short());
        assert_eq!(h.database.open_positions().len(), 1);

        clock.advance(Duration::minutes(1));
        let second = engine.tick().await.unwrap();
        assert_eq!(second.closing_orders_placed, 1);
        assert!(second.opened.is_none());
        assert!(paper.positions().is_empty());

        clock.advance(Duration::minutes(1));
        let third = engine.tick().await.unwrap();
        assert_eq!(third.positions_retired, 1);
        assert_eq!(
            h.database.positions()[0].status,
            strikebot_core::PositionStatus::Closed
        );
    }
}
