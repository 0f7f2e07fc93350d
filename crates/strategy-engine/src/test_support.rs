//! Scripted collaborators and fixtures for unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc, Weekday};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use strikebot_core::{
    AccountSnapshot, BotSettings, Broker, BrokerError, ChainRequest, ControlFlags, Database,
    Expiration, Instruction, ManualClock, Market, MarketHours, MarketSession, Notifier,
    OptionChain, Order, OrderDuration, OrderId, OrderLeg, OrderRecord, OrderStatus, OrderType,
    Position, PositionRecord, PositionStatus, PutCall, Quote, StrategyConfig, StrategyId,
    StrategyKind, Strike,
};

use crate::engine::StrategyEngine;
use crate::lifecycle::OrderLifecycleManager;
use crate::opening::OpeningOrderBuilder;
use crate::types::Collaborators;

const UNDERLYING: &str = "SPY";

fn fixture_expiration() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 6).unwrap()
}

fn symbol(expiration: NaiveDate, put_or_call: PutCall, strike: Decimal) -> String {
    let right = match put_or_call {
        PutCall::Put => 'P',
        PutCall::Call => 'C',
    };
    format!("{UNDERLYING}_{}{right}{strike}", expiration.format("%m%d%y"))
}

/// Regular session 14:30-21:00 UTC on `date`.
pub fn session_on(date: NaiveDate) -> MarketSession {
    MarketSession {
        open: Utc.from_utc_datetime(&date.and_hms_opt(14, 30, 0).unwrap()),
        close: Utc.from_utc_datetime(&date.and_hms_opt(21, 0, 0).unwrap()),
    }
}

fn strike_on(expiration: NaiveDate, strike: Decimal, delta: f64, mid: Decimal) -> Strike {
    Strike {
        symbol: symbol(expiration, PutCall::Put, strike),
        underlying_symbol: UNDERLYING.to_string(),
        put_or_call: PutCall::Put,
        strike,
        expiration_date: expiration,
        bid: Some(mid - dec!(0.01)),
        ask: Some(mid + dec!(0.01)),
        delta,
    }
}

/// Put quote whose midpoint is exactly `mid`.
pub fn put_strike(strike: Decimal, delta: f64, mid: Decimal) -> Strike {
    strike_on(fixture_expiration(), strike, delta, mid)
}

fn scenario_a_on(expiration: NaiveDate) -> BTreeMap<Decimal, Strike> {
    [
        (dec!(4000), -0.10, dec!(40)),
        (dec!(3090), -0.09, dec!(30)),
        (dec!(2500), -0.08, dec!(20)),
        (dec!(2000), -0.07, dec!(10)),
        (dec!(1800), -0.06, dec!(2.0)),
        (dec!(1500), -0.05, dec!(1.7)),
        (dec!(1010), -0.04, dec!(1.2)),
    ]
    .into_iter()
    .map(|(strike, delta, mid)| (strike, strike_on(expiration, strike, delta, mid)))
    .collect()
}

/// Seven puts where the 1010 strike wins on total premium for a 200k account.
pub fn scenario_a_strikes() -> BTreeMap<Decimal, Strike> {
    scenario_a_on(fixture_expiration())
}

/// Chain with one expiration `dte` days after `today`.
pub fn scenario_a_chain(today: NaiveDate, dte: i64) -> OptionChain {
    let date = today + chrono::Duration::days(dte);
    let expiration = Expiration {
        date,
        days_to_expiration: dte,
        strikes: scenario_a_on(date),
    };
    OptionChain {
        symbol: UNDERLYING.to_string(),
        underlying_price: Some(dec!(4100)),
        expirations: BTreeMap::from([(date, expiration)]),
    }
}

pub fn csp_config() -> StrategyConfig {
    StrategyConfig {
        name: "csp".to_string(),
        broker: "paper".to_string(),
        kind: StrategyKind::CashSecuredPut,
        underlying: UNDERLYING.to_string(),
        put_or_call: PutCall::Put,
        target_delta: -0.06,
        min_delta: -0.03,
        min_dte: 0,
        max_dte: 7,
        profit_target: dec!(0.5),
        max_loss: dec!(0.2),
        portfolio_allocation: dec!(1),
        spread_width: None,
        opening_order_loop_secs: 60,
        max_opening_attempts: 5,
    }
}

/// Open position record for strategy 1.
pub fn position_record(
    order_id: OrderId,
    strike: Decimal,
    put_or_call: PutCall,
    short_quantity: u32,
    long_quantity: u32,
    average_price: Decimal,
) -> PositionRecord {
    let expiration = fixture_expiration();
    PositionRecord {
        id: None,
        strategy_id: 1,
        order_id,
        status: PositionStatus::Open,
        position: Position {
            symbol: symbol(expiration, put_or_call, strike),
            underlying_symbol: UNDERLYING.to_string(),
            put_or_call,
            strike_price: strike,
            short_quantity,
            long_quantity,
            average_price,
            expiration_date: expiration,
        },
    }
}

pub fn account(
    buying_power: Decimal,
    liquidation_value: Decimal,
    positions: Vec<Position>,
) -> AccountSnapshot {
    AccountSnapshot {
        liquidation_value,
        buying_power,
        positions,
        orders: Vec::new(),
    }
}

struct Script {
    account: AccountSnapshot,
    chain: Option<OptionChain>,
    closed_every_day: bool,
    failing: HashMap<String, BrokerError>,
    statuses: VecDeque<OrderStatus>,
    placed: BTreeMap<OrderId, Order>,
    canceled: Vec<OrderId>,
    calls: HashMap<String, usize>,
    quotes: HashMap<String, Decimal>,
    next_id: OrderId,
}

/// In-memory broker driven by a script. Weekdays have a session, weekends
/// don't; placed orders start `WORKING` and move through the scripted
/// statuses on each `get_order` (`FILLED` once the script runs out).
pub struct ScriptedBroker {
    script: Mutex<Script>,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                account: account(Decimal::ZERO, Decimal::ZERO, Vec::new()),
                chain: None,
                closed_every_day: false,
                failing: HashMap::new(),
                statuses: VecDeque::new(),
                placed: BTreeMap::new(),
                canceled: Vec::new(),
                calls: HashMap::new(),
                quotes: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut Script) -> T) -> T {
        f(&mut self.script.lock().unwrap())
    }

    pub fn set_account(&self, snapshot: AccountSnapshot) {
        self.with(|s| s.account = snapshot);
    }

    pub fn set_balances(&self, buying_power: Decimal, liquidation_value: Decimal) {
        self.with(|s| {
            s.account.buying_power = buying_power;
            s.account.liquidation_value = liquidation_value;
        });
    }

    pub fn hold(&self, position: Position) {
        self.with(|s| s.account.positions.push(position));
    }

    /// Adds an order the broker already knows about.
    pub fn add_account_order(&self, order: Order) {
        self.with(|s| s.account.orders.push(order));
    }

    pub fn set_chain(&self, chain: OptionChain) {
        self.with(|s| s.chain = Some(chain));
    }

    pub fn set_quote(&self, symbol: &str, last: Decimal) {
        self.with(|s| s.quotes.insert(symbol.to_string(), last));
    }

    pub fn close_every_day(&self) {
        self.with(|s| s.closed_every_day = true);
    }

    pub fn fail(&self, call: &str) {
        self.fail_with(call, BrokerError::Transport("scripted failure".to_string()));
    }

    pub fn fail_with(&self, call: &str, error: BrokerError) {
        self.with(|s| s.failing.insert(call.to_string(), error));
    }

    pub fn recover(&self, call: &str) {
        self.with(|s| s.failing.remove(call));
    }

    pub fn script_statuses(&self, statuses: Vec<OrderStatus>) {
        self.with(|s| s.statuses = statuses.into());
    }

    pub fn calls(&self, call: &str) -> usize {
        self.with(|s| s.calls.get(call).copied().unwrap_or(0))
    }

    pub fn placed(&self) -> Vec<Order> {
        self.with(|s| s.placed.values().cloned().collect())
    }

    pub fn canceled(&self) -> Vec<OrderId> {
        self.with(|s| s.canceled.clone())
    }

    fn enter(&self, call: &str) -> Result<(), BrokerError> {
        self.with(|s| {
            *s.calls.entry(call.to_string()).or_default() += 1;
            s.failing.get(call).cloned().map_or(Ok(()), Err)
        })
    }
}

#[async_trait]
impl Broker for ScriptedBroker {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn get_account(
        &self,
        include_orders: bool,
        include_positions: bool,
    ) -> Result<AccountSnapshot, BrokerError> {
        self.enter("get_account")?;
        Ok(self.with(|s| {
            let mut snapshot = s.account.clone();
            if include_orders {
                snapshot.orders.extend(s.placed.values().cloned());
            } else {
                snapshot.orders.clear();
            }
            if !include_positions {
                snapshot.positions.clear();
            }
            snapshot
        }))
    }

    async fn get_option_chain(&self, _request: &ChainRequest) -> Result<OptionChain, BrokerError> {
        self.enter("get_option_chain")?;
        self.with(|s| s.chain.clone())
            .ok_or_else(|| BrokerError::Malformed("no chain scripted".to_string()))
    }

    async fn get_market_hours(
        &self,
        _market: Market,
        date: NaiveDate,
    ) -> Result<MarketHours, BrokerError> {
        self.enter("get_market_hours")?;
        let closed = self.with(|s| s.closed_every_day)
            || matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
        Ok(MarketHours {
            date,
            session: (!closed).then(|| session_on(date)),
        })
    }

    async fn place_order(&self, order: &Order) -> Result<OrderId, BrokerError> {
        self.enter("place_order")?;
        Ok(self.with(|s| {
            let id = s.next_id;
            s.next_id += 1;
            let mut placed = order.clone();
            placed.order_id = Some(id);
            placed.status = OrderStatus::Working;
            s.placed.insert(id, placed);
            id
        }))
    }

    async fn cancel_order(&self, order_id: OrderId) -> Result<(), BrokerError> {
        self.enter("cancel_order")?;
        self.with(|s| {
            s.canceled.push(order_id);
            if let Some(order) = s.placed.get_mut(&order_id) {
                order.status = OrderStatus::Canceled;
            }
        });
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Order, BrokerError> {
        self.enter("get_order")?;
        self.with(|s| {
            if let Some(order) = s.placed.get_mut(&order_id) {
                if order.status.is_working() {
                    order.status = s.statuses.pop_front().unwrap_or(OrderStatus::Filled);
                    if order.status == OrderStatus::Filled {
                        order.filled_quantity = order.quantity;
                    }
                }
                return Ok(order.clone());
            }
            s.account
                .orders
                .iter()
                .find(|o| o.order_id == Some(order_id))
                .cloned()
                .ok_or(BrokerError::OrderNotFound(order_id))
        })
    }

    async fn get_quote(&self, symbols: &[String]) -> Result<Vec<Quote>, BrokerError> {
        self.enter("get_quote")?;
        Ok(self.with(|s| {
            symbols
                .iter()
                .filter_map(|symbol| {
                    s.quotes.get(symbol).map(|last| Quote {
                        symbol: symbol.clone(),
                        bid: None,
                        ask: None,
                        last: Some(*last),
                    })
                })
                .collect()
        }))
    }
}

#[derive(Default)]
struct Tables {
    strategies: Vec<String>,
    orders: BTreeMap<OrderId, OrderRecord>,
    positions: Vec<PositionRecord>,
    fail_writes: bool,
}

#[derive(Default)]
pub struct MemoryDatabase {
    tables: Mutex<Tables>,
}

impl MemoryDatabase {
    fn with<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> T {
        f(&mut self.tables.lock().unwrap())
    }

    fn write<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> Result<T> {
        self.with(|t| {
            if t.fail_writes {
                bail!("disk full");
            }
            Ok(f(t))
        })
    }

    pub fn fail_writes(&self, fail: bool) {
        self.with(|t| t.fail_writes = fail);
    }

    pub fn orders(&self) -> BTreeMap<OrderId, OrderRecord> {
        self.with(|t| t.orders.clone())
    }

    pub fn positions(&self) -> Vec<PositionRecord> {
        self.with(|t| t.positions.clone())
    }

    pub fn open_positions(&self) -> Vec<PositionRecord> {
        self.with(|t| {
            t.positions
                .iter()
                .filter(|p| p.status == PositionStatus::Open)
                .cloned()
                .collect()
        })
    }

    pub fn position_status(&self, id: i64) -> Option<PositionStatus> {
        self.with(|t| t.positions.iter().find(|p| p.id == Some(id)).map(|p| p.status))
    }

    pub async fn seed_order(&self, record: OrderRecord) {
        self.create_order(&record).await.unwrap();
    }

    pub async fn seed_position(&self, record: PositionRecord) -> i64 {
        self.create_position(&record).await.unwrap()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn create_strategy(&self, name: &str) -> Result<StrategyId> {
        self.write(|t| {
            t.strategies.push(name.to_string());
            t.strategies.len() as StrategyId
        })
    }

    async fn read_strategy_by_name(&self, name: &str) -> Result<Option<StrategyId>> {
        Ok(self.with(|t| {
            t.strategies
                .iter()
                .position(|s| s == name)
                .map(|i| i as StrategyId + 1)
        }))
    }

    async fn create_order(&self, record: &OrderRecord) -> Result<OrderId> {
        self.write(|t| {
            t.orders.insert(record.order_id, record.clone());
            record.order_id
        })
    }

    async fn update_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<()> {
        self.write(|t| {
            if let Some(record) = t.orders.get_mut(&order_id) {
                record.status = status;
                record.order.status = status;
            }
        })
    }

    async fn create_position(&self, record: &PositionRecord) -> Result<i64> {
        self.write(|t| {
            let id = t.positions.len() as i64 + 1;
            t.positions.push(PositionRecord {
                id: Some(id),
                ..record.clone()
            });
            id
        })
    }

    async fn close_position(&self, position_id: i64, status: PositionStatus) -> Result<()> {
        self.write(|t| {
            if let Some(record) = t.positions.iter_mut().find(|p| p.id == Some(position_id)) {
                record.status = status;
            }
        })
    }

    async fn read_open_orders_by_strategy(&self, strategy_id: StrategyId) -> Result<Vec<OrderRecord>> {
        Ok(self.with(|t| {
            t.orders
                .values()
                .filter(|o| o.strategy_id == strategy_id && o.status.is_working())
                .cloned()
                .collect()
        }))
    }

    async fn read_open_positions_by_strategy(
        &self,
        strategy_id: StrategyId,
    ) -> Result<Vec<PositionRecord>> {
        Ok(self.with(|t| {
            t.positions
                .iter()
                .filter(|p| p.strategy_id == strategy_id && p.status == PositionStatus::Open)
                .cloned()
                .collect()
        }))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_notification(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

/// Scripted collaborators for strategy 1, starting Monday 2026-03-02.
pub struct Harness {
    pub broker: Arc<ScriptedBroker>,
    pub database: Arc<MemoryDatabase>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: ManualClock,
    pub flags: ControlFlags,
}

impl Harness {
    pub fn new() -> Self {
        Self::at(Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap())
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            broker: Arc::new(ScriptedBroker::new()),
            database: Arc::new(MemoryDatabase::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            clock: ManualClock::new(now),
            flags: ControlFlags::new(),
        }
    }

    pub fn deps(&self) -> Collaborators {
        Collaborators {
            broker: self.broker.clone(),
            database: self.database.clone(),
            notifier: self.notifier.clone(),
            clock: Arc::new(self.clock.clone()),
            control: self.flags.view(),
        }
    }

    pub fn lifecycle(&self, max_attempts: u32) -> OrderLifecycleManager {
        OrderLifecycleManager::new("csp", 1, self.deps(), Duration::from_secs(60), max_attempts)
    }

    pub fn engine(&self, config: StrategyConfig) -> StrategyEngine {
        StrategyEngine::new(config, 1, self.deps(), &BotSettings::default())
    }
}

/// Hands out the same order on every build.
pub struct StaticBuilder {
    order: Option<Order>,
    builds: AtomicU32,
}

impl StaticBuilder {
    fn with_order(order: Option<Order>) -> Self {
        Self {
            order,
            builds: AtomicU32::new(0),
        }
    }

    pub fn opening(strike: Decimal, quantity: u32, price: Decimal) -> Self {
        let leg = OrderLeg::new(
            put_strike(strike, -0.04, price).instrument(),
            Instruction::SellToOpen,
            quantity,
            Some(price),
        );
        Self::with_order(Some(Order::new(
            OrderType::Limit,
            OrderDuration::Day,
            Some(price),
            vec![leg],
        )))
    }

    pub fn closing(strike: Decimal, quantity: u32, price: Decimal) -> Self {
        let leg = OrderLeg::new(
            put_strike(strike, -0.04, price).instrument(),
            Instruction::BuyToClose,
            quantity,
            None,
        );
        Self::with_order(Some(Order::new(
            OrderType::Limit,
            OrderDuration::GoodTillCancel,
            Some(price),
            vec![leg],
        )))
    }

    pub fn empty() -> Self {
        Self::with_order(None)
    }

    pub fn builds(&self) -> u32 {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OpeningOrderBuilder for StaticBuilder {
    async fn build(&self) -> Option<Order> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.order.clone()
    }
}
