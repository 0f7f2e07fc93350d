use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::BrokerError;
use crate::types::{
    AccountSnapshot, ChainRequest, Market, MarketHours, OptionChain, Order, OrderId, OrderRecord,
    OrderStatus, PositionRecord, PositionStatus, Quote, StrategyId,
};

/// Brokerage capability: account, orders, quotes, chains, calendar.
///
/// Adapters translate a vendor's wire format into the domain model. Callers
/// in the engine never let a `BrokerError` escape a tick.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Human-readable adapter name for logs.
    fn name(&self) -> &str;

    async fn get_account(
        &self,
        include_orders: bool,
        include_positions: bool,
    ) -> Result<AccountSnapshot, BrokerError>;

    async fn get_option_chain(&self, request: &ChainRequest) -> Result<OptionChain, BrokerError>;

    async fn get_market_hours(
        &self,
        market: Market,
        date: NaiveDate,
    ) -> Result<MarketHours, BrokerError>;

    /// Submits an order and returns the broker's order id.
    async fn place_order(&self, order: &Order) -> Result<OrderId, BrokerError>;

    async fn cancel_order(&self, order_id: OrderId) -> Result<(), BrokerError>;

    async fn get_order(&self, order_id: OrderId) -> Result<Order, BrokerError>;

    async fn get_quote(&self, symbols: &[String]) -> Result<Vec<Quote>, BrokerError>;
}

/// Persistence capability for strategies, orders, and positions.
#[async_trait]
pub trait Database: Send + Sync {
    async fn create_strategy(&self, name: &str) -> Result<StrategyId>;

    async fn read_strategy_by_name(&self, name: &str) -> Result<Option<StrategyId>>;

    /// Inserts the order row, or updates it when the order id already exists.
    async fn create_order(&self, record: &OrderRecord) -> Result<OrderId>;

    async fn update_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<()>;

    async fn create_position(&self, record: &PositionRecord) -> Result<i64>;

    async fn close_position(&self, position_id: i64, status: PositionStatus) -> Result<()>;

    async fn read_open_orders_by_strategy(&self, strategy_id: StrategyId)
        -> Result<Vec<OrderRecord>>;

    async fn read_open_positions_by_strategy(
        &self,
        strategy_id: StrategyId,
    ) -> Result<Vec<PositionRecord>>;
}

/// Outbound alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_notification(&self, message: &str);
}
