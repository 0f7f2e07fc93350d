//! Global pause and kill-switch flags.
//!
//! [`ControlFlags`] is the only writer and is owned by whoever applies
//! inbound control commands. Engines only ever see a [`ControlView`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Flags {
    paused: AtomicBool,
    kill_switch: AtomicBool,
}

/// Write side of the shared control state. Not `Clone`; there is one writer.
#[derive(Debug, Default)]
pub struct ControlFlags {
    flags: Arc<Flags>,
}

impl ControlFlags {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn view(&self) -> ControlView {
        ControlView {
            flags: Arc::clone(&self.flags),
        }
    }

    pub fn set_paused(&self, paused: bool) {
        self.flags.paused.store(paused, Ordering::SeqCst);
    }

    pub fn set_kill_switch(&self, engaged: bool) {
        self.flags.kill_switch.store(engaged, Ordering::SeqCst);
    }
}

/// Read-only handle on the control state.
#[derive(Debug, Clone, Default)]
pub struct ControlView {
    flags: Arc<Flags>,
}

impl ControlView {
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.flags.paused.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn kill_switch_engaged(&self) -> bool {
        self.flags.kill_switch.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_observe_writes() {
        let flags = ControlFlags::new();
        let view = flags.view();
        let other = view.clone();
        assert!(!view.is_paused() && !view.kill_switch_engaged());

        flags.set_paused(true);
        flags.set_kill_switch(true);
        assert!(other.is_paused());
        assert!(other.kill_switch_engaged());

        flags.set_paused(false);
        assert!(!view.is_paused());
    }
}
