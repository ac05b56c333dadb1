//! Local host role: is this node the group's injection target, and where
//! does injected text go.
//!
//! The broadcaster reads the flag when it builds each announcement, so
//! toggling it changes what the next announcement says. The chat relay reads
//! both the flag and the selected target when deciding whether to inject.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::application::inject_text::TargetHandle;

#[derive(Debug, Default)]
pub struct HostRole {
    is_host: AtomicBool,
    target: Mutex<Option<TargetHandle>>,
}

impl HostRole {
    pub fn new(is_host: bool) -> Self {
        Self {
            is_host: AtomicBool::new(is_host),
            target: Mutex::new(None),
        }
    }

    pub fn is_host(&self) -> bool {
        self.is_host.load(Ordering::Relaxed)
    }

    /// Sets the host flag and returns the previous value.
    pub fn set_host(&self, is_host: bool) -> bool {
        self.is_host.swap(is_host, Ordering::Relaxed)
    }

    /// Returns the selected injection target, if any.
    pub fn target(&self) -> Option<TargetHandle> {
        self.target
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_target(&self, target: Option<TargetHandle>) {
        *self
            .target
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = target;
    }
}
