//! Mediator between configured strategies and the brokers they trade through.
//!
//! One loop on one task: drain control commands, honor the kill switch and
//! pause flag, tick every engine in configuration order, then sleep out the
//! rest of the loop period.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use strikebot_core::{
    BotSettings, Broker, Clock, ConfigError, ControlFlags, ControlView, Database, Notifier,
    StrategyConfig, StrategyId,
};
use strikebot_engine::{Collaborators, StrategyEngine};

use crate::commands::ControlCommand;
use crate::control::ControlHandle;

const CONTROL_CHANNEL_CAPACITY: usize = 32;

/// Shared collaborators handed to every engine.
#[derive(Clone)]
pub struct Services {
    pub database: Arc<dyn Database>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// Kill switch engaged; the loop must stop.
    Shutdown,
}

pub struct Router {
    settings: BotSettings,
    engines: Vec<StrategyEngine>,
    services: Services,
    flags: ControlFlags,
    view: ControlView,
    commands: mpsc::Receiver<ControlCommand>,
}

impl Router {
    /// Validates the strategy set, resolves persisted strategy ids, and wires
    /// one engine per strategy to the broker it names.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigError::DuplicateStrategy`] or
    /// [`ConfigError::UnknownBroker`], or when strategy ids cannot be resolved.
    pub async fn build(
        settings: BotSettings,
        strategies: Vec<StrategyConfig>,
        brokers: &BTreeMap<String, Arc<dyn Broker>>,
        services: Services,
    ) -> Result<(Self, ControlHandle)> {
        settings.validate()?;
        if strategies.is_empty() {
            return Err(ConfigError::NoStrategies.into());
        }
        let mut names = HashSet::new();
        for strategy in &strategies {
            if !names.insert(strategy.name.as_str()) {
                return Err(ConfigError::DuplicateStrategy(strategy.name.clone()).into());
            }
            if !brokers.contains_key(&strategy.broker) {
                return Err(ConfigError::UnknownBroker {
                    strategy: strategy.name.clone(),
                    broker: strategy.broker.clone(),
                }
                .into());
            }
            strategy.validate()?;
        }

        let flags = ControlFlags::new();
        let view = flags.view();
        let mut engines = Vec::with_capacity(strategies.len());
        for config in strategies {
            let strategy_id = resolve_strategy_id(services.database.as_ref(), &config.name).await?;
            let broker = Arc::clone(&brokers[&config.broker]);
            info!(
                strategy = %config.name,
                strategy_id,
                broker = broker.name(),
                underlying = %config.underlying,
                kind = ?config.kind,
                "Strategy registered"
            );
            let deps = Collaborators {
                broker,
                database: Arc::clone(&services.database),
                notifier: Arc::clone(&services.notifier),
                clock: Arc::clone(&services.clock),
                control: view.clone(),
            };
            engines.push(StrategyEngine::new(config, strategy_id, deps, &settings));
        }

        let (handle, commands) = ControlHandle::channel(CONTROL_CHANNEL_CAPACITY);
        let router = Self {
            settings,
            engines,
            services,
            flags,
            view,
            commands,
        };
        Ok((router, handle))
    }

    /// Strategy names in evaluation order.
    pub fn strategies(&self) -> impl Iterator<Item = &str> {
        self.engines.iter().map(StrategyEngine::name)
    }

    /// Broker the named strategy trades through.
    #[must_use]
    pub fn broker_for(&self, strategy: &str) -> Option<&Arc<dyn Broker>> {
        self.engines
            .iter()
            .find(|engine| engine.name() == strategy)
            .map(StrategyEngine::broker)
    }

    #[must_use]
    pub fn control(&self) -> &ControlView {
        &self.view
    }

    /// Runs until the kill switch is engaged.
    ///
    /// # Errors
    ///
    /// Returns the first fatal engine error.
    pub async fn run(mut self) -> Result<()> {
        info!(
            strategies = self.engines.len(),
            loop_frequency_secs = self.settings.loop_frequency_secs,
            "Router started"
        );
        while self.step().await? == Step::Continue {}
        info!("Router stopped");
        Ok(())
    }

    /// One loop iteration.
    ///
    /// # Errors
    ///
    /// Returns the first fatal engine error.
    pub async fn step(&mut self) -> Result<Step> {
        self.drain_commands();
        if self.view.kill_switch_engaged() {
            warn!("Kill switch engaged, shutting down");
            self.services
                .notifier
                .send_notification("strikebot: kill switch engaged, shutting down")
                .await;
            return Ok(Step::Shutdown);
        }

        let started = self.services.clock.now();
        if self.view.is_paused() {
            debug!("Paused, skipping strategies");
        } else {
            self.tick_all().await?;
        }

        let period = Duration::from_secs(self.settings.loop_frequency_secs);
        let elapsed = (self.services.clock.now() - started)
            .to_std()
            .unwrap_or_default();
        if let Some(remaining) = period.checked_sub(elapsed).filter(|d| !d.is_zero()) {
            self.services.clock.sleep(remaining).await;
        }
        Ok(Step::Continue)
    }

    async fn tick_all(&mut self) -> Result<()> {
        for engine in &mut self.engines {
            if self.view.kill_switch_engaged() {
                break;
            }
            match engine.tick().await {
                Ok(report) => debug!(strategy = %engine.name(), ?report, "Tick finished"),
                Err(e) => {
                    error!(strategy = %engine.name(), error = %e, "Fatal strategy error");
                    self.services
                        .notifier
                        .send_notification(&format!("{}: stopping, {e}", engine.name()))
                        .await;
                    return Err(e).with_context(|| format!("Strategy {} failed", engine.name()));
                }
            }
        }
        Ok(())
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            info!(?command, "Control command");
            match command {
                ControlCommand::Pause => self.flags.set_paused(true),
                ControlCommand::Resume => self.flags.set_paused(false),
                ControlCommand::SetKillSwitch(engaged) => self.flags.set_kill_switch(engaged),
            }
        }
    }
}

async fn resolve_strategy_id(database: &dyn Database, name: &str) -> Result<StrategyId> {
    if let Some(id) = database
        .read_strategy_by_name(name)
        .await
        .with_context(|| format!("Failed to look up strategy {name}"))?
    {
        return Ok(id);
    }
    database.create_strategy(name).await
}
