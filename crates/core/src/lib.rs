//! Core types, capability traits, and configuration for strikebot.

pub mod clock;
pub mod config;
pub mod config_loader;
pub mod control;
pub mod error;
pub mod retry;
pub mod traits;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AppConfig, BotSettings, BrokerConfig, BrokerSettings, DatabaseConfig, NotifierConfig,
    PaperBrokerConfig, PaperUnderlying, StrategyConfig, StrategyKind,
};
pub use config_loader::ConfigLoader;
pub use control::{ControlFlags, ControlView};
pub use error::{BrokerError, ConfigError};
pub use retry::{RetryPolicy, RetryingBroker};
pub use traits::{Broker, Database, Notifier};
pub use types::*;
