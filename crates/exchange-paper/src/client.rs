//! Paper broker handle and its `Broker` implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::info;

use strikebot_core::{
    AccountSnapshot, Broker, BrokerError, ChainRequest, Clock, Market, MarketHours,
    OptionChain, OptionInstrument, Order, OrderId, PaperBrokerConfig, Position, Quote,
};

/// How working limit orders are matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillMode {
    /// Fill when the limit price is at or through the current midpoint.
    #[default]
    Marketable,
    /// Fill every order at its limit price.
    Always,
    /// Leave every order working.
    Never,
}

pub(crate) struct PaperState {
    pub(crate) cash: Decimal,
    pub(crate) positions: BTreeMap<String, Position>,
    pub(crate) orders: BTreeMap<OrderId, Order>,
    pub(crate) instruments: HashMap<String, OptionInstrument>,
    pub(crate) prices: HashMap<String, (Decimal, f64)>,
    pub(crate) next_order_id: OrderId,
    pub(crate) fill_mode: FillMode,
    pub(crate) offline: bool,
}

/// Simulated brokerage account.
pub struct PaperBroker {
    name: String,
    pub(crate) config: PaperBrokerConfig,
    pub(crate) clock: Arc<dyn Clock>,
    state: Mutex<PaperState>,
}

impl PaperBroker {
    #[must_use]
    pub fn new(name: impl Into<String>, config: PaperBrokerConfig, clock: Arc<dyn Clock>) -> Self {
        let name = name.into();
        let prices = config
            .underlyings
            .iter()
            .map(|(symbol, u)| (symbol.to_uppercase(), (u.price, u.volatility)))
            .collect();
        info!(
            broker = %name,
            starting_cash = %config.starting_cash,
            underlyings = config.underlyings.len(),
            "Paper broker ready"
        );
        let state = PaperState {
            cash: config.starting_cash,
            positions: BTreeMap::new(),
            orders: BTreeMap::new(),
            instruments: HashMap::new(),
            prices,
            next_order_id: 1,
            fill_mode: FillMode::default(),
            offline: false,
        };
        Self {
            name,
            config,
            clock,
            state: Mutex::new(state),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn ensure_online(&self) -> Result<(), BrokerError> {
        if self.state().offline {
            return Err(BrokerError::Transport(format!("{} is offline", self.name)));
        }
        Ok(())
    }

    pub fn set_fill_mode(&self, mode: FillMode) {
        self.state().fill_mode = mode;
    }

    /// Makes every call fail with a transport error while `offline` is set.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn set_underlying_price(&self, symbol: &str, price: Decimal) {
        let mut state = self.state();
        let volatility = state
            .prices
            .get(&symbol.to_uppercase())
            .map_or(0.2, |(_, vol)| *vol);
        state
            .prices
            .insert(symbol.to_uppercase(), (price, volatility));
    }

    /// Orders in id order, for inspection.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.state().orders.values().cloned().collect()
    }

    #[must_use]
    pub fn positions(&self) -> Vec<Position> {
        self.state().positions.values().cloned().collect()
    }

    #[must_use]
    pub fn cash(&self) -> Decimal {
        self.state().cash
    }
}

#[async_trait]
impl Broker for PaperBroker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_account(
        &self,
        include_orders: bool,
        include_positions: bool,
    ) -> Result<AccountSnapshot, BrokerError> {
        self.ensure_online()?;
        Ok(self.account_snapshot(include_orders, include_positions))
    }

    async fn get_option_chain(&self, request: &ChainRequest) -> Result<OptionChain, BrokerError> {
        self.ensure_online()?;
        self.option_chain(request)
    }

    async fn get_market_hours(
        &self,
        _market: Market,
        date: NaiveDate,
    ) -> Result<MarketHours, BrokerError> {
        self.ensure_online()?;
        Ok(self.market_hours(date))
    }

    async fn place_order(&self, order: &Order) -> Result<OrderId, BrokerError> {
        self.ensure_online()?;
        self.submit(order)
    }

    async fn cancel_order(&self, order_id: OrderId) -> Result<(), BrokerError> {
        self.ensure_online()?;
        self.cancel(order_id)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Order, BrokerError> {
        self.ensure_online()?;
        self.order(order_id)
    }

    async fn get_quote(&self, symbols: &[String]) -> Result<Vec<Quote>, BrokerError> {
        self.ensure_online()?;
        self.quotes(symbols)
    }
}
