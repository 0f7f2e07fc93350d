use anyhow::Result;
use tokio::sync::mpsc;

use crate::commands::ControlCommand;

/// Cloneable sender side of the router's control channel.
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlCommand>,
}

impl ControlHandle {
    #[must_use]
    pub const fn new(tx: mpsc::Sender<ControlCommand>) -> Self {
        Self { tx }
    }

    /// Creates a handle and the receiver the router drains.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ControlCommand>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// # Errors
    /// Returns an error if the router has already shut down.
    pub async fn send(&self, command: ControlCommand) -> Result<()> {
        self.tx.send(command).await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the router has already shut down.
    pub async fn pause(&self) -> Result<()> {
        self.send(ControlCommand::Pause).await
    }

    /// # Errors
    /// Returns an error if the router has already shut down.
    pub async fn resume(&self) -> Result<()> {
        self.send(ControlCommand::Resume).await
    }

    /// # Errors
    /// Returns an error if the router has already shut down.
    pub async fn set_kill_switch(&self, engaged: bool) -> Result<()> {
        self.send(ControlCommand::SetKillSwitch(engaged)).await
    }
}
