use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use strikebot_core::{Notifier, NotifierConfig};

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_notification(&self, message: &str) {
        info!(notification = message, "Notification");
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
}

/// Posts `{"text": message}` to a chat webhook. Delivery failures are logged,
/// never returned.
pub struct WebhookNotifier {
    http: Client,
    url: String,
}

impl WebhookNotifier {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_notification(&self, message: &str) {
        let response = self
            .http
            .post(&self.url)
            .json(&WebhookPayload { text: message })
            .send()
            .await;
        match response {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(status = %response.status(), "Webhook delivered");
            }
            Ok(response) => {
                warn!(status = %response.status(), notification = message, "Webhook rejected notification");
            }
            Err(e) => {
                warn!(error = %e, notification = message, "Webhook delivery failed");
            }
        }
    }
}

/// Builds the notifier selected in configuration.
///
/// # Errors
///
/// Returns an error if the webhook client cannot be built.
pub fn notifier_from_config(config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
    Ok(match config {
        NotifierConfig::Log => Arc::new(LogNotifier),
        NotifierConfig::Webhook { url, timeout_secs } => {
            info!(url = %url, "Webhook notifications enabled");
            Arc::new(WebhookNotifier::new(
                url.clone(),
                Duration::from_secs(*timeout_secs),
            )?)
        }
    })
}
