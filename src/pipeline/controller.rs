use tokio::sync::watch;

use crate::domain::{ControlMessage, Mode};

/// Process-wide filter switches. Readers get the current value synchronously;
/// the watcher additionally subscribes to `enabled` transitions.
#[derive(Debug)]
pub struct Controller {
    enabled: watch::Sender<bool>,
    mode: watch::Sender<Mode>,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new(true, Mode::default())
    }
}

impl Controller {
    pub fn new(enabled: bool, mode: Mode) -> Self {
        let (enabled, _) = watch::channel(enabled);
        let (mode, _) = watch::channel(mode);
        Self { enabled, mode }
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.borrow()
    }

    pub fn mode(&self) -> Mode {
        *self.mode.borrow()
    }

    pub fn subscribe_enabled(&self) -> watch::Receiver<bool> {
        self.enabled.subscribe()
    }

    pub fn set_enabled(&self, enabled: bool) -> bool {
        let previous = self.enabled.send_replace(enabled);
        if previous != enabled {
            tracing::info!(target: "control", enabled, "filter toggled");
        }
        previous != enabled
    }

    pub fn set_mode(&self, mode: Mode) -> bool {
        let previous = self.mode.send_replace(mode);
        if previous != mode {
            tracing::info!(target: "control", %mode, "mode updated");
        }
        previous != mode
    }

    pub fn apply(&self, message: &ControlMessage) -> bool {
        match message {
            ControlMessage::ToggleExtension(enabled) => self.set_enabled(*enabled),
            ControlMessage::UpdateMode(mode) => self.set_mode(*mode),
        }
    }
}
