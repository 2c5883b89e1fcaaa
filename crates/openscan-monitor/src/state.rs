//! The ADF trigger state machine.

use openscan_core::AdfState;

/// Debounce flag for the feeder.
///
/// `Waiting` until paper shows up, `Triggered` once a scan was started for
/// it, back to `Waiting` only when a poll sees the feeder no longer loaded.
/// The monitor starts in `Waiting`, so paper already loaded at startup counts
/// as a fresh load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MonitorState {
    /// No paper, or paper not yet scanned
    #[default]
    Waiting,
    /// A scan was started for the paper currently in the feeder
    Triggered,
}

impl MonitorState {
    /// Feed one observed feeder state. Returns `true` when a scan may start.
    ///
    /// Any state other than `Loaded` re-arms the trigger.
    pub fn observe(&mut self, adf: AdfState) -> bool {
        if adf == AdfState::Loaded {
            *self == Self::Waiting
        } else {
            *self = Self::Waiting;
            false
        }
    }

    /// Record that a scan was started.
    pub fn mark_triggered(&mut self) {
        *self = Self::Triggered;
    }

    /// Whether a scan was started for the current paper.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self == Self::Triggered
    }
}
