pub mod brokers;
pub mod commands;
pub mod control;
pub mod database;
pub mod notifier;
pub mod router;

pub use brokers::build_brokers;
pub use commands::ControlCommand;
pub use control::ControlHandle;
pub use database::SqliteDatabase;
pub use notifier::{notifier_from_config, LogNotifier, WebhookNotifier};
pub use router::{Router, Services, Step};
