//! Process-wide scheduler switch.

use std::sync::atomic::{AtomicBool, Ordering};

/// Global on/off switch for scheduled execution.
///
/// One instance is owned per engine and handed to it at construction. While
/// stopped, no job fires on its schedule and every job's next run time reads
/// as absent. Manual triggers are unaffected.
#[derive(Debug, Default)]
pub struct SchedulerStatus {
    running: AtomicBool,
}

impl SchedulerStatus {
    #[must_use]
    pub fn new(running: bool) -> Self {
        Self {
            running: AtomicBool::new(running),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Store a new value, returning the previous one.
    pub(crate) fn set(&self, running: bool) -> bool {
        self.running.swap(running, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_returns_previous_value() {
        let status = SchedulerStatus::new(false);
        assert!(!status.set(true));
        assert!(status.is_running());
        assert!(status.set(false));
        assert!(!status.is_running());
    }

    #[test]
    fn default_is_stopped() {
        assert!(!SchedulerStatus::default().is_running());
    }
}
