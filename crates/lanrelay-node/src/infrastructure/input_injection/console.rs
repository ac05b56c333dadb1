//! Console injection back-end for the headless node.
//!
//! There is no desktop to type into, so "injecting" writes the text to a
//! stream, tagged with the target's window title. [`ConsoleWindows`] offers a
//! fixed list of window titles so `/target` can be exercised the same way a
//! desktop window list would be.

use std::io::Write;
use std::sync::Mutex;

use crate::application::inject_text::{
    ControlHandle, InjectionError, InputInjector, TargetHandle, WindowHandle,
};
use crate::application::select_target::WindowEnumerator;

/// Title of the single window [`ConsoleWindows::default`] exposes.
pub const CONSOLE_WINDOW_TITLE: &str = "console";

pub struct ConsoleInjector<W: Write + Send> {
    out: Mutex<W>,
}

impl ConsoleInjector<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ConsoleInjector<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: Write + Send> InputInjector for ConsoleInjector<W> {
    fn activate(&self, target: &TargetHandle) -> Result<(), InjectionError> {
        if target.window.title.is_empty() {
            return Err(InjectionError::Activation(format!(
                "window {} has no title",
                target.window.id
            )));
        }
        Ok(())
    }

    fn type_text(&self, target: &TargetHandle, text: &str) -> Result<(), InjectionError> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| InjectionError::Platform("console writer poisoned".to_string()))?;
        writeln!(out, "[{}] {text}", target.window.title)
            .and_then(|()| out.flush())
            .map_err(|e| InjectionError::Typing(e.to_string()))
    }
}

/// A fixed window list with no controls.
#[derive(Debug, Clone)]
pub struct ConsoleWindows {
    windows: Vec<WindowHandle>,
}

impl ConsoleWindows {
    pub fn new<I, S>(titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let windows = titles
            .into_iter()
            .zip(1u64..)
            .map(|(title, id)| WindowHandle::new(id, title))
            .collect();
        Self { windows }
    }
}

impl Default for ConsoleWindows {
    fn default() -> Self {
        Self::new([CONSOLE_WINDOW_TITLE])
    }
}

impl WindowEnumerator for ConsoleWindows {
    fn enumerate_windows(&self) -> Vec<WindowHandle> {
        self.windows.clone()
    }

    fn enumerate_controls(&self, _window: &WindowHandle) -> Vec<ControlHandle> {
        Vec::new()
    }
}
