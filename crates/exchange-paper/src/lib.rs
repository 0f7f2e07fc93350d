//! Paper broker for strikebot.
//!
//! Simulates a margin account, a Black-Scholes priced option chain, an
//! exchange calendar, and marketable-limit fills without touching a real
//! brokerage. Implements [`strikebot_core::Broker`] so the engine runs end to
//! end in paper mode and in integration tests.

pub mod account;
pub mod client;
pub mod execution;
pub mod market_data;
pub mod options_chain;

pub use client::{FillMode, PaperBroker};
