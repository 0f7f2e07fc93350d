use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::types::PutCall;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bot: BotSettings,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub brokers: Vec<BrokerConfig>,
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
}

/// Loop cadence and session offsets shared by every strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSettings {
    /// Seconds between loop iterations.
    #[serde(default = "default_loop_frequency")]
    pub loop_frequency_secs: u64,
    /// How many calendar days to look ahead for the next session.
    #[serde(default = "default_lookahead_days")]
    pub max_session_lookahead_days: u32,
    /// Exchange time zone used to derive calendar dates.
    #[serde(default = "default_timezone")]
    pub market_timezone: Tz,
    /// Minutes after the open during which nothing is done.
    #[serde(default = "default_early_open")]
    pub early_open_minutes: i64,
    /// Minutes before the close during which no new risk is opened.
    #[serde(default = "default_late_open")]
    pub late_open_minutes: i64,
    /// Minutes after the close counted as early after-hours.
    #[serde(default = "default_after_hours")]
    pub after_hours_minutes: i64,
    /// Minutes before the close when positions expiring today are neutralized.
    #[serde(default = "default_expiry_window")]
    pub expiry_close_window_minutes: i64,
}

const fn default_loop_frequency() -> u64 {
    60
}

const fn default_lookahead_days() -> u32 {
    14
}

const fn default_timezone() -> Tz {
    chrono_tz::America::New_York
}

const fn default_early_open() -> i64 {
    10
}

const fn default_late_open() -> i64 {
    5
}

const fn default_after_hours() -> i64 {
    30
}

const fn default_expiry_window() -> i64 {
    15
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            loop_frequency_secs: default_loop_frequency(),
            max_session_lookahead_days: default_lookahead_days(),
            market_timezone: default_timezone(),
            early_open_minutes: default_early_open(),
            late_open_minutes: default_late_open(),
            after_hours_minutes: default_after_hours(),
            expiry_close_window_minutes: default_expiry_window(),
        }
    }
}

impl BotSettings {
    /// # Errors
    ///
    /// Returns an error if any interval is zero or negative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loop_frequency_secs == 0 {
            return Err(ConfigError::InvalidSettings(
                "loop_frequency_secs must be positive".to_string(),
            ));
        }
        if self.max_session_lookahead_days == 0 {
            return Err(ConfigError::InvalidSettings(
                "max_session_lookahead_days must be positive".to_string(),
            ));
        }
        if self.early_open_minutes < 0
            || self.late_open_minutes < 0
            || self.after_hours_minutes < 0
            || self.expiry_close_window_minutes < 0
        {
            return Err(ConfigError::InvalidSettings(
                "session offsets must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://strikebot.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotifierConfig {
    /// Notifications go to the log only.
    #[default]
    Log,
    /// JSON POST to a chat webhook.
    Webhook {
        url: String,
        #[serde(default = "default_webhook_timeout")]
        timeout_secs: u64,
    },
}

const fn default_webhook_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub name: String,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(flatten)]
    pub settings: BrokerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BrokerSettings {
    Paper(PaperBrokerConfig),
}

/// Simulated account and market for the paper broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperBrokerConfig {
    #[serde(default = "default_starting_cash")]
    pub starting_cash: Decimal,
    /// Underlying symbol → reference price and volatility.
    #[serde(default)]
    pub underlyings: HashMap<String, PaperUnderlying>,
    /// Distance between listed strikes.
    #[serde(default = "default_strike_step")]
    pub strike_step: Decimal,
    /// Half of the quoted bid/ask spread.
    #[serde(default = "default_half_spread")]
    pub half_spread: Decimal,
    /// Listed expirations fall on this weekday (0 = Monday).
    #[serde(default = "default_expiry_weekday")]
    pub expiry_weekday: u32,
    /// Weeks of expirations listed ahead.
    #[serde(default = "default_listed_weeks")]
    pub listed_weeks: u32,
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
}

fn default_starting_cash() -> Decimal {
    Decimal::from(100_000)
}

fn default_strike_step() -> Decimal {
    Decimal::from(5)
}

fn default_half_spread() -> Decimal {
    Decimal::new(5, 2)
}

const fn default_expiry_weekday() -> u32 {
    4
}

const fn default_listed_weeks() -> u32 {
    8
}

impl Default for PaperBrokerConfig {
    fn default() -> Self {
        Self {
            starting_cash: default_starting_cash(),
            underlyings: HashMap::new(),
            strike_step: default_strike_step(),
            half_spread: default_half_spread(),
            expiry_weekday: default_expiry_weekday(),
            listed_weeks: default_listed_weeks(),
            holidays: Vec::new(),
            timezone: default_timezone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperUnderlying {
    pub price: Decimal,
    /// Annualized implied volatility, e.g. 0.2.
    pub volatility: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Single short option, sized against the strike.
    CashSecuredPut,
    /// Short option plus a further out-of-the-money long option.
    CreditSpread,
}

/// One trading rule set, evaluated by its own engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Unique within one router.
    pub name: String,
    /// Name of the broker entry this strategy trades through.
    pub broker: String,
    #[serde(default = "default_kind")]
    pub kind: StrategyKind,
    pub underlying: String,
    #[serde(default = "default_put_or_call")]
    pub put_or_call: PutCall,
    /// Outer edge of the admitted delta band.
    pub target_delta: f64,
    /// Inner edge of the admitted delta band.
    pub min_delta: f64,
    #[serde(default)]
    pub min_dte: i64,
    #[serde(default = "default_max_dte")]
    pub max_dte: i64,
    /// Fraction of the entry credit captured before closing, e.g. 0.5.
    #[serde(default = "default_profit_target")]
    pub profit_target: Decimal,
    /// Fraction of the strike value at risk per contract.
    #[serde(default = "default_max_loss")]
    pub max_loss: Decimal,
    /// Fraction of liquidation value this strategy may commit.
    #[serde(default = "default_allocation")]
    pub portfolio_allocation: Decimal,
    /// Strike distance between the short and long legs of a spread.
    #[serde(default)]
    pub spread_width: Option<Decimal>,
    /// Seconds to wait before checking an opening order for a fill.
    #[serde(default = "default_opening_loop")]
    pub opening_order_loop_secs: u64,
    #[serde(default = "default_opening_attempts")]
    pub max_opening_attempts: u32,
}

const fn default_kind() -> StrategyKind {
    StrategyKind::CashSecuredPut
}

const fn default_put_or_call() -> PutCall {
    PutCall::Put
}

const fn default_max_dte() -> i64 {
    7
}

fn default_profit_target() -> Decimal {
    Decimal::new(5, 1)
}

fn default_max_loss() -> Decimal {
    Decimal::new(2, 1)
}

fn default_allocation() -> Decimal {
    Decimal::ONE
}

const fn default_opening_loop() -> u64 {
    60
}

const fn default_opening_attempts() -> u32 {
    5
}

impl StrategyConfig {
    /// Checks delta band, DTE window, fractions, and spread settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidStrategy` naming the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidStrategy {
            strategy: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if !self.target_delta.is_finite() || !self.min_delta.is_finite() {
            return Err(invalid("deltas must be finite"));
        }
        if self.target_delta * self.min_delta < 0.0 {
            return Err(invalid("min_delta and target_delta must share a sign"));
        }
        let (min, target) = (self.min_delta.abs(), self.target_delta.abs());
        if min > target || target >= 1.0 || target == 0.0 {
            return Err(invalid("delta band must satisfy |min_delta| <= |target_delta| < 1"));
        }
        if self.min_dte < 0 || self.min_dte > self.max_dte {
            return Err(invalid("DTE window must satisfy 0 <= min_dte <= max_dte"));
        }
        if self.profit_target <= Decimal::ZERO || self.profit_target >= Decimal::ONE {
            return Err(invalid("profit_target must be in (0, 1)"));
        }
        if self.max_loss <= Decimal::ZERO || self.max_loss > Decimal::ONE {
            return Err(invalid("max_loss must be in (0, 1]"));
        }
        if self.portfolio_allocation <= Decimal::ZERO || self.portfolio_allocation > Decimal::ONE {
            return Err(invalid("portfolio_allocation must be in (0, 1]"));
        }
        if self.kind == StrategyKind::CreditSpread
            && !self.spread_width.is_some_and(|w| w > Decimal::ZERO)
        {
            return Err(invalid("credit spreads need a positive spread_width"));
        }
        if self.opening_order_loop_secs == 0 {
            return Err(invalid("opening_order_loop_secs must be positive"));
        }
        if self.max_opening_attempts == 0 {
            return Err(invalid("max_opening_attempts must be at least 1"));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Validates the whole configuration; any error is fatal at startup.
    ///
    /// # Errors
    ///
    /// Returns the first configuration problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bot.validate()?;

        if self.strategies.is_empty() {
            return Err(ConfigError::NoStrategies);
        }

        let mut brokers = HashSet::new();
        for broker in &self.brokers {
            if !brokers.insert(broker.name.as_str()) {
                return Err(ConfigError::DuplicateBroker(broker.name.clone()));
            }
        }

        let mut names = HashSet::new();
        for strategy in &self.strategies {
            if !names.insert(strategy.name.as_str()) {
                return Err(ConfigError::DuplicateStrategy(strategy.name.clone()));
            }
            if !brokers.contains(strategy.broker.as_str()) {
                return Err(ConfigError::UnknownBroker {
                    strategy: strategy.name.clone(),
                    broker: strategy.broker.clone(),
                });
            }
            strategy.validate()?;
        }
        Ok(())
    }
}
