//! CLI commands for the strikebot binary.

pub mod check_config;
pub mod run;
pub mod session;

pub use check_config::{run_check_config, CheckConfigArgs};
pub use run::{run_bot, RunArgs};
pub use session::{run_session, SessionArgs};
