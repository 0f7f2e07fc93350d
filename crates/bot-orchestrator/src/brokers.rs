use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use strikebot_core::{Broker, BrokerConfig, BrokerSettings, Clock, RetryingBroker};
use strikebot_paper::PaperBroker;

/// Instantiates every configured broker, keyed by name, each behind its
/// retry policy.
#[must_use]
pub fn build_brokers(
    configs: &[BrokerConfig],
    clock: &Arc<dyn Clock>,
) -> BTreeMap<String, Arc<dyn Broker>> {
    configs
        .iter()
        .map(|config| {
            let inner: Arc<dyn Broker> = match &config.settings {
                BrokerSettings::Paper(paper) => Arc::new(PaperBroker::new(
                    config.name.clone(),
                    paper.clone(),
                    Arc::clone(clock),
                )),
            };
            info!(
                broker = %config.name,
                max_attempts = config.retry.max_attempts,
                "Broker configured"
            );
            let broker: Arc<dyn Broker> = Arc::new(RetryingBroker::new(
                inner,
                config.retry.clone(),
                Arc::clone(clock),
            ));
            (config.name.clone(), broker)
        })
        .collect()
}
