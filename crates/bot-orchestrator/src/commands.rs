use serde::{Deserialize, Serialize};

/// Inbound operator command, applied by the router at the top of each loop
/// iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlCommand {
    /// Stop evaluating strategies until resumed. Working orders are left alone.
    Pause,
    Resume,
    /// Engaged: no further place/cancel calls and the router shuts down.
    SetKillSwitch(bool),
}
