//! Bounded retries with exponential backoff for broker calls.
//!
//! Only transient failures (`BrokerError::is_transient`) are retried, and
//! order placement is never retried: a transport error after submission may
//! still have created the order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock::Clock;
use crate::error::BrokerError;
use crate::traits::Broker;
use crate::types::{
    AccountSnapshot, ChainRequest, Market, MarketHours, OptionChain, Order, OrderId, Quote,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry (default: 500ms).
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Ceiling for any single delay (default: 10s).
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Growth factor between delays (default: 2.0).
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    10_000
}

const fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay before retry number `retry` (0-based).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(retry.min(32) as i32);
        let millis = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(millis as u64)
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// # Errors
    ///
    /// Returns the last error seen.
    pub async fn run<T, F, Fut>(
        &self,
        clock: &dyn Clock,
        operation: &str,
        mut op: F,
    ) -> Result<T, BrokerError>
    where
        T: Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, BrokerError>> + Send,
    {
        let attempts = self.max_attempts.max(1);
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retry + 1 < attempts => {
                    let delay = self.backoff(retry);
                    warn!(operation, attempt = retry + 1, ?delay, error = %e, "Transient broker failure, retrying");
                    clock.sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Decorates a broker with [`RetryPolicy`] on every idempotent call.
pub struct RetryingBroker {
    inner: Arc<dyn Broker>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl RetryingBroker {
    #[must_use]
    pub fn new(inner: Arc<dyn Broker>, policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            policy,
            clock,
        }
    }
}

#[async_trait]
impl Broker for RetryingBroker {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get_account(
        &self,
        include_orders: bool,
        include_positions: bool,
    ) -> Result<AccountSnapshot, BrokerError> {
        let inner = &self.inner;
        self.policy
            .run(self.clock.as_ref(), "get_account", move || {
                inner.get_account(include_orders, include_positions)
            })
            .await
    }

    async fn get_option_chain(&self, request: &ChainRequest) -> Result<OptionChain, BrokerError> {
        let inner = &self.inner;
        self.policy
            .run(self.clock.as_ref(), "get_option_chain", move || {
                inner.get_option_chain(request)
            })
            .await
    }

    async fn get_market_hours(
        &self,
        market: Market,
        date: NaiveDate,
    ) -> Result<MarketHours, BrokerError> {
        let inner = &self.inner;
        self.policy
            .run(self.clock.as_ref(), "get_market_hours", move || {
                inner.get_market_hours(market, date)
            })
            .await
    }

    async fn place_order(&self, order: &Order) -> Result<OrderId, BrokerError> {
        self.inner.place_order(order).await
    }

    async fn cancel_order(&self, order_id: OrderId) -> Result<(), BrokerError> {
        let inner = &self.inner;
        self.policy
            .run(self.clock.as_ref(), "cancel_order", move || {
                inner.cancel_order(order_id)
            })
            .await
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Order, BrokerError> {
        let inner = &self.inner;
        self.policy
            .run(self.clock.as_ref(), "get_order", move || inner.get_order(order_id))
            .await
    }

    async fn get_quote(&self, symbols: &[String]) -> Result<Vec<Quote>, BrokerError> {
        let inner = &self.inner;
        self.policy
            .run(self.clock.as_ref(), "get_quote", move || inner.get_quote(symbols))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap())
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(10), Duration::from_millis(10_000));
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let clock = clock();
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::default()
            .run(&clock, "test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(BrokerError::Transport("reset".to_string()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let clock = clock();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::default()
            .run(&clock, "test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BrokerError::RateLimited) }
            })
            .await;
        assert_eq!(result, Err(BrokerError::RateLimited));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let clock = clock();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::default()
            .run(&clock, "test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BrokerError::Rejected("bad symbol".to_string())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
