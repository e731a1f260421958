//! One-shot report latches.

use std::sync::atomic::{AtomicBool, Ordering};

/// Latch that lets a class of warning through once per process lifetime.
#[derive(Debug)]
pub struct ReportOnce {
    armed: AtomicBool,
}

impl ReportOnce {
    pub const fn new() -> Self {
        Self {
            armed: AtomicBool::new(true),
        }
    }

    /// Returns `true` the first time only, then stays disarmed.
    pub fn first(&self) -> bool {
        self.armed.swap(false, Ordering::AcqRel)
    }

    /// Whether reports of this class are still shown.
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Silence further reports.
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }
}

impl Default for ReportOnce {
    fn default() -> Self {
        Self::new()
    }
}
