//! Mock input injector for unit and integration testing.
//!
//! Real injectors activate windows and synthesise keystrokes on the test
//! machine, which needs a desktop session and cannot be observed from test
//! code. `MockInputInjector` records every call in `Mutex<Vec<...>>` fields
//! instead, so assertions can inspect exactly what was typed and in what
//! order.
//!
//! # Failure simulation
//!
//! [`MockInputInjector::failing_first`] makes the first `n` activations fail;
//! [`MockInputInjector::fail_always`] makes every activation fail from then
//! on. Both return [`InjectionError::Activation`], the transient error a
//! not-yet-focusable window produces.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use crate::application::inject_text::{InjectionError, InputInjector, TargetHandle};

#[derive(Default)]
pub struct MockInputInjector {
    /// Every target passed to `activate`, including failed attempts.
    pub activations: Mutex<Vec<TargetHandle>>,
    /// Every `(target, text)` pair passed to `type_text`.
    pub typed: Mutex<Vec<(TargetHandle, String)>>,
    failures_left: AtomicU32,
    always_fail: AtomicBool,
}

impl MockInputInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// An injector whose first `n` activations fail.
    pub fn failing_first(n: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(n),
            ..Self::default()
        }
    }

    /// Makes every later activation fail.
    pub fn fail_always(&self) {
        self.always_fail.store(true, Ordering::SeqCst);
    }

    /// Number of activation attempts so far.
    pub fn attempts(&self) -> usize {
        self.activations.lock().map(|a| a.len()).unwrap_or(0)
    }

    /// The typed texts in order.
    pub fn typed_texts(&self) -> Vec<String> {
        self.typed
            .lock()
            .map(|t| t.iter().map(|(_, text)| text.clone()).collect())
            .unwrap_or_default()
    }
}

impl InputInjector for MockInputInjector {
    fn activate(&self, target: &TargetHandle) -> Result<(), InjectionError> {
        if let Ok(mut a) = self.activations.lock() {
            a.push(target.clone());
        }

        if self.always_fail.load(Ordering::SeqCst) {
            return Err(InjectionError::Activation("mock always fails".to_string()));
        }
        let consumed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(InjectionError::Activation("mock scripted failure".to_string()));
        }
        Ok(())
    }

    fn type_text(&self, target: &TargetHandle, text: &str) -> Result<(), InjectionError> {
        if let Ok(mut t) = self.typed.lock() {
            t.push((target.clone(), text.to_string()));
        }
        Ok(())
    }
}
