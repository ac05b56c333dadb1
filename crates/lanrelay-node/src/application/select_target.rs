//! Resolves a window title into an injection target.
//!
//! Window and control enumeration is platform work behind the
//! [`WindowEnumerator`] seam; this module only decides which of the
//! enumerated handles becomes the [`TargetHandle`].

use thiserror::Error;
use tracing::debug;

use crate::application::inject_text::{ControlHandle, TargetHandle, WindowHandle};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("no window titled {0:?}")]
    NotFound(String),
    #[error("window title must not be empty")]
    EmptyTitle,
}

/// Lists the windows and controls text can be injected into.
#[cfg_attr(test, mockall::automock)]
pub trait WindowEnumerator: Send + Sync {
    fn enumerate_windows(&self) -> Vec<WindowHandle>;
    fn enumerate_controls(&self, window: &WindowHandle) -> Vec<ControlHandle>;
}

/// Returns the titles of every titled window, in enumeration order.
pub fn list_window_titles(enumerator: &dyn WindowEnumerator) -> Vec<String> {
    enumerator
        .enumerate_windows()
        .into_iter()
        .filter(|w| !w.title.trim().is_empty())
        .map(|w| w.title)
        .collect()
}

/// Picks the first window whose title equals `title`.
///
/// Untitled windows are never candidates. The window's first control is
/// targeted if it has any; otherwise the window itself.
///
/// # Errors
///
/// [`TargetError::EmptyTitle`] for a blank title and
/// [`TargetError::NotFound`] when no window matches.
pub fn select_target(
    enumerator: &dyn WindowEnumerator,
    title: &str,
) -> Result<TargetHandle, TargetError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(TargetError::EmptyTitle);
    }

    let window = enumerator
        .enumerate_windows()
        .into_iter()
        .filter(|w| !w.title.trim().is_empty())
        .find(|w| w.title == title)
        .ok_or_else(|| TargetError::NotFound(title.to_string()))?;

    let control = enumerator.enumerate_controls(&window).into_iter().next();
    debug!(
        "selected window {} ({:?}) control {:?}",
        window.id,
        window.title,
        control.as_ref().map(|c| c.id)
    );
    Ok(TargetHandle { window, control })
}
