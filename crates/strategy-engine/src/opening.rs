//! Opening order construction from fresh market data.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use strikebot_core::{
    Broker, ChainRange, ChainRequest, Expiration, Instruction, OptionChain, Order, OrderDuration,
    OrderLeg, OrderType, PutCall, StrategyConfig, StrategyKind, Strike,
};

use crate::sizing::PositionSizer;
use crate::strikes::{nearest_strike, select_strike};

/// Produces the next opening order; called again on every retry so each
/// attempt is priced from current data.
#[async_trait]
pub trait OpeningOrderBuilder: Send + Sync {
    /// `None` when there is nothing worth opening right now.
    async fn build(&self) -> Option<Order>;
}

/// Builds orders from the broker's account and option chain.
pub struct ChainOrderBuilder<'a> {
    broker: &'a dyn Broker,
    config: &'a StrategyConfig,
    today: NaiveDate,
}

impl<'a> ChainOrderBuilder<'a> {
    #[must_use]
    pub fn new(broker: &'a dyn Broker, config: &'a StrategyConfig, today: NaiveDate) -> Self {
        Self {
            broker,
            config,
            today,
        }
    }

    #[must_use]
    pub fn chain_request(&self) -> ChainRequest {
        ChainRequest {
            symbol: self.config.underlying.clone(),
            put_or_call: self.config.put_or_call,
            from_date: self.today + Duration::days(self.config.min_dte),
            to_date: self.today + Duration::days(self.config.max_dte),
            range: ChainRange::OutOfTheMoney,
        }
    }
}

#[async_trait]
impl OpeningOrderBuilder for ChainOrderBuilder<'_> {
    async fn build(&self) -> Option<Order> {
        let account = match self.broker.get_account(false, false).await {
            Ok(account) => account,
            Err(e) => {
                warn!(strategy = %self.config.name, error = %e, "Account lookup failed");
                return None;
            }
        };
        let chain = match self.broker.get_option_chain(&self.chain_request()).await {
            Ok(chain) => chain,
            Err(e) => {
                warn!(strategy = %self.config.name, error = %e, "Option chain lookup failed");
                return None;
            }
        };

        let Some(expiration) = nearest_expiration(&chain, self.config.min_dte, self.config.max_dte)
        else {
            info!(
                strategy = %self.config.name,
                min_dte = self.config.min_dte,
                max_dte = self.config.max_dte,
                "No expiration in DTE window"
            );
            return None;
        };

        let sizer = PositionSizer::from_config(self.config);
        let order = match self.config.kind {
            StrategyKind::CashSecuredPut => single_leg_order(
                expiration,
                self.config,
                account.buying_power,
                account.liquidation_value,
                sizer,
            ),
            StrategyKind::CreditSpread => credit_spread_order(
                expiration,
                self.config,
                account.buying_power,
                account.liquidation_value,
                sizer,
            ),
        };
        if order.is_none() {
            info!(
                strategy = %self.config.name,
                expiration = %expiration.date,
                buying_power = %account.buying_power,
                "No admissible strike"
            );
        }
        order
    }
}

/// Expiration with the fewest days left inside `[min_dte, max_dte]`.
#[must_use]
pub fn nearest_expiration(chain: &OptionChain, min_dte: i64, max_dte: i64) -> Option<&Expiration> {
    chain
        .expirations
        .values()
        .filter(|e| (min_dte..=max_dte).contains(&e.days_to_expiration) && !e.strikes.is_empty())
        .min_by_key(|e| e.days_to_expiration)
}

/// Sell-to-open limit order at the midpoint of the selected strike.
#[must_use]
pub fn single_leg_order(
    expiration: &Expiration,
    config: &StrategyConfig,
    buying_power: Decimal,
    liquidation_value: Decimal,
    sizer: PositionSizer,
) -> Option<Order> {
    let selection = select_strike(
        expiration.strikes.values(),
        config.min_delta,
        config.target_delta,
        buying_power,
        liquidation_value,
        |price, bp, lv| sizer.quantity(price, bp, lv),
    )?;
    let price = selection.strike.mid()?.round_dp(2);
    debug!(
        symbol = %selection.strike.symbol,
        delta = selection.strike.delta,
        quantity = selection.quantity,
        %price,
        "Short option selected"
    );
    Some(Order::new(
        OrderType::Limit,
        OrderDuration::Day,
        Some(price),
        vec![OrderLeg::new(
            selection.strike.instrument(),
            Instruction::SellToOpen,
            selection.quantity,
            Some(price),
        )],
    ))
}

/// Protective leg `width` further out of the money than `short`.
fn protective_leg<'a>(
    expiration: &'a Expiration,
    put_or_call: PutCall,
    short: Decimal,
    width: Decimal,
) -> Option<&'a Strike> {
    let target = match put_or_call {
        PutCall::Put => short - width,
        PutCall::Call => short + width,
    };
    let further_out = |strike: Decimal| match put_or_call {
        PutCall::Put => strike < short,
        PutCall::Call => strike > short,
    };
    nearest_strike(
        expiration.strikes.values().filter(|s| further_out(s.strike)),
        target,
    )
}

/// Net-credit vertical spread. The short leg is chosen like a single-leg
/// order but sized against the actual distance to its protective leg.
#[must_use]
pub fn credit_spread_order(
    expiration: &Expiration,
    config: &StrategyConfig,
    buying_power: Decimal,
    liquidation_value: Decimal,
    sizer: PositionSizer,
) -> Option<Order> {
    let width = config.spread_width?;
    let pc = config.put_or_call;

    let selection = select_strike(
        expiration.strikes.values(),
        config.min_delta,
        config.target_delta,
        buying_power,
        liquidation_value,
        |price, bp, lv| {
            protective_leg(expiration, pc, price, width)
                .map_or(0, |long| sizer.quantity((price - long.strike).abs(), bp, lv))
        },
    )?;
    let short = selection.strike;
    let long = protective_leg(expiration, pc, short.strike, width)?;

    let short_mid = short.mid()?.round_dp(2);
    let long_mid = long.mid()?.round_dp(2);
    let credit = short_mid - long_mid;
    if credit <= Decimal::ZERO {
        debug!(short = %short.symbol, long = %long.symbol, %credit, "Spread pays no credit");
        return None;
    }

    debug!(
        short = %short.symbol,
        long = %long.symbol,
        quantity = selection.quantity,
        %credit,
        "Credit spread selected"
    );
    Some(Order::new(
        OrderType::NetCredit,
        OrderDuration::Day,
        Some(credit),
        vec![
            OrderLeg::new(
                short.instrument(),
                Instruction::SellToOpen,
                selection.quantity,
                Some(short_mid),
            ),
            OrderLeg::new(
                long.instrument(),
                Instruction::BuyToOpen,
                selection.quantity,
                Some(long_mid),
            ),
        ],
    ))
}
