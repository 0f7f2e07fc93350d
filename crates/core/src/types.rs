//! Domain model shared by the engine, brokers, and persistence adapters.
//!
//! Enumerated string fields coming from a broker or the database are closed
//! enums; anything outside the known set is rejected at the boundary with a
//! [`ParseEnumError`].

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Standard US equity option multiplier.
pub const CONTRACT_MULTIPLIER: u32 = 100;

/// Broker-assigned order identifier.
pub type OrderId = i64;

/// Persisted strategy identity.
pub type StrategyId = i64;

/// Error returned when a string does not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant),+
        }

        impl $name {
            /// Wire/storage representation.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(ParseEnumError {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum! {
    /// Option contract right.
    PutCall, "put/call" {
        Put => "PUT",
        Call => "CALL",
    }
}

string_enum! {
    /// Order status as reported by the broker. `New` is local only: it marks a
    /// persisted order the broker has accepted but not yet reported on.
    OrderStatus, "order status" {
        New => "NEW",
        AwaitingParentOrder => "AWAITING_PARENT_ORDER",
        Accepted => "ACCEPTED",
        PendingActivation => "PENDING_ACTIVATION",
        Queued => "QUEUED",
        Working => "WORKING",
        PendingCancel => "PENDING_CANCEL",
        Filled => "FILLED",
        Canceled => "CANCELED",
        Rejected => "REJECTED",
        Expired => "EXPIRED",
        Replaced => "REPLACED",
    }
}

string_enum! {
    OrderType, "order type" {
        Market => "MARKET",
        Limit => "LIMIT",
        NetCredit => "NET_CREDIT",
        NetDebit => "NET_DEBIT",
    }
}

string_enum! {
    OrderDuration, "order duration" {
        Day => "DAY",
        GoodTillCancel => "GOOD_TILL_CANCEL",
    }
}

string_enum! {
    Instruction, "instruction" {
        BuyToOpen => "BUY_TO_OPEN",
        SellToOpen => "SELL_TO_OPEN",
        BuyToClose => "BUY_TO_CLOSE",
        SellToClose => "SELL_TO_CLOSE",
    }
}

string_enum! {
    PositionEffect, "position effect" {
        Opening => "OPENING",
        Closing => "CLOSING",
    }
}

string_enum! {
    /// Life-cycle state of a persisted position.
    PositionStatus, "position status" {
        Open => "OPEN",
        Closed => "CLOSED",
        Expired => "EXPIRED",
    }
}

string_enum! {
    /// Moneyness filter for option chain requests.
    ChainRange, "chain range" {
        All => "ALL",
        InTheMoney => "ITM",
        NearTheMoney => "NTM",
        OutOfTheMoney => "OTM",
    }
}

string_enum! {
    Market, "market" {
        Equity => "EQUITY",
        Option => "OPTION",
    }
}

impl OrderStatus {
    /// Still live at the broker (may fill or be canceled).
    #[must_use]
    pub const fn is_working(self) -> bool {
        matches!(
            self,
            Self::New
                | Self::AwaitingParentOrder
                | Self::Accepted
                | Self::PendingActivation
                | Self::Queued
                | Self::Working
                | Self::PendingCancel
        )
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !self.is_working()
    }
}

impl Instruction {
    #[must_use]
    pub const fn position_effect(self) -> PositionEffect {
        match self {
            Self::BuyToOpen | Self::SellToOpen => PositionEffect::Opening,
            Self::BuyToClose | Self::SellToClose => PositionEffect::Closing,
        }
    }

    #[must_use]
    pub const fn is_sell(self) -> bool {
        matches!(self, Self::SellToOpen | Self::SellToClose)
    }

    /// The instruction that unwinds a position opened with `self`.
    #[must_use]
    pub const fn closing_counterpart(self) -> Self {
        match self {
            Self::SellToOpen | Self::BuyToClose => Self::BuyToClose,
            Self::BuyToOpen | Self::SellToClose => Self::SellToClose,
        }
    }
}

/// Regular trading window for one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSession {
    pub open: DateTime<Utc>,
    pub close: DateTime<Utc>,
}

impl MarketSession {
    #[must_use]
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.open <= now && now < self.close
    }
}

/// Broker answer for one calendar day. `session` is `None` when the market is
/// closed all day (weekend or holiday).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketHours {
    pub date: NaiveDate,
    pub session: Option<MarketSession>,
}

/// One option contract quote within a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strike {
    pub symbol: String,
    pub underlying_symbol: String,
    pub put_or_call: PutCall,
    pub strike: Decimal,
    pub expiration_date: NaiveDate,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub delta: f64,
}

impl Strike {
    /// Bid/ask midpoint, `None` when either side is missing.
    #[must_use]
    pub fn mid(&self) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    #[must_use]
    pub fn instrument(&self) -> OptionInstrument {
        OptionInstrument {
            symbol: self.symbol.clone(),
            underlying_symbol: self.underlying_symbol.clone(),
            put_or_call: self.put_or_call,
            strike_price: self.strike,
            expiration_date: self.expiration_date,
        }
    }
}

/// All strikes for one expiration date, keyed by strike price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expiration {
    pub date: NaiveDate,
    pub days_to_expiration: i64,
    pub strikes: BTreeMap<Decimal, Strike>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionChain {
    pub symbol: String,
    pub underlying_price: Option<Decimal>,
    pub expirations: BTreeMap<NaiveDate, Expiration>,
}

/// Parameters for an option chain lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainRequest {
    pub symbol: String,
    pub put_or_call: PutCall,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub range: ChainRange,
}

/// Snapshot quote for an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub last: Option<Decimal>,
}

impl Quote {
    /// Last trade, falling back to the midpoint.
    #[must_use]
    pub fn reference_price(&self) -> Option<Decimal> {
        self.last.or_else(|| match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        })
    }
}

/// Option position held in the brokerage account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub underlying_symbol: String,
    pub put_or_call: PutCall,
    pub strike_price: Decimal,
    pub short_quantity: u32,
    pub long_quantity: u32,
    pub average_price: Decimal,
    pub expiration_date: NaiveDate,
}

impl Position {
    #[must_use]
    pub const fn is_short(&self) -> bool {
        self.short_quantity > 0
    }

    /// Net contracts held, negative when short.
    #[must_use]
    pub fn net_quantity(&self) -> i64 {
        i64::from(self.long_quantity) - i64::from(self.short_quantity)
    }

    #[must_use]
    pub fn instrument(&self) -> OptionInstrument {
        OptionInstrument {
            symbol: self.symbol.clone(),
            underlying_symbol: self.underlying_symbol.clone(),
            put_or_call: self.put_or_call,
            strike_price: self.strike_price,
            expiration_date: self.expiration_date,
        }
    }

    /// Whether the option would be exercised at `underlying_price`.
    #[must_use]
    pub fn is_in_the_money(&self, underlying_price: Decimal) -> bool {
        match self.put_or_call {
            PutCall::Put => underlying_price < self.strike_price,
            PutCall::Call => underlying_price > self.strike_price,
        }
    }
}

/// Contract description carried on an order leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionInstrument {
    pub symbol: String,
    pub underlying_symbol: String,
    pub put_or_call: PutCall,
    pub strike_price: Decimal,
    pub expiration_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLeg {
    pub instrument: OptionInstrument,
    pub instruction: Instruction,
    pub position_effect: PositionEffect,
    pub quantity: u32,
    /// Per-leg reference price used when the order was built.
    pub price: Option<Decimal>,
}

impl OrderLeg {
    #[must_use]
    pub fn new(
        instrument: OptionInstrument,
        instruction: Instruction,
        quantity: u32,
        price: Option<Decimal>,
    ) -> Self {
        Self {
            instrument,
            position_effect: instruction.position_effect(),
            instruction,
            quantity,
            price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Assigned by the broker once placed.
    pub order_id: Option<OrderId>,
    pub status: OrderStatus,
    pub order_type: OrderType,
    pub duration: OrderDuration,
    pub price: Option<Decimal>,
    pub quantity: u32,
    pub filled_quantity: u32,
    pub legs: Vec<OrderLeg>,
    pub entered_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Builds an unplaced order; quantity is taken from the first leg.
    #[must_use]
    pub fn new(
        order_type: OrderType,
        duration: OrderDuration,
        price: Option<Decimal>,
        legs: Vec<OrderLeg>,
    ) -> Self {
        let quantity = legs.first().map_or(0, |leg| leg.quantity);
        Self {
            order_id: None,
            status: OrderStatus::New,
            order_type,
            duration,
            price,
            quantity,
            filled_quantity: 0,
            legs,
            entered_at: None,
        }
    }

    /// Position effect of the order; an order with any opening leg is opening.
    #[must_use]
    pub fn position_effect(&self) -> PositionEffect {
        if self
            .legs
            .iter()
            .any(|leg| leg.position_effect == PositionEffect::Opening)
        {
            PositionEffect::Opening
        } else {
            PositionEffect::Closing
        }
    }

    #[must_use]
    pub fn is_opening(&self) -> bool {
        self.position_effect() == PositionEffect::Opening
    }

    #[must_use]
    pub fn involves_symbol(&self, symbol: &str) -> bool {
        self.legs.iter().any(|leg| leg.instrument.symbol == symbol)
    }
}

/// Read-only account view fetched fresh for every decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub liquidation_value: Decimal,
    pub buying_power: Decimal,
    pub positions: Vec<Position>,
    pub orders: Vec<Order>,
}

impl AccountSnapshot {
    #[must_use]
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }
}

/// Persisted order row, keyed by broker order id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: OrderId,
    pub strategy_id: StrategyId,
    pub status: OrderStatus,
    pub position_effect: PositionEffect,
    pub order: Order,
}

/// Persisted position row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    /// Database id; `None` until inserted.
    pub id: Option<i64>,
    pub strategy_id: StrategyId,
    pub order_id: OrderId,
    pub status: PositionStatus,
    pub position: Position,
}
