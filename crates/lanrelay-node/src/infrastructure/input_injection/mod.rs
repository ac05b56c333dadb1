//! Input injection back-ends.
//!
//! - **`console`** – Writes injected text to a stream (stdout in the binary)
//!   and exposes a fixed window list. Used by the headless node.
//! - **`mock`** – Records every call in memory. Used by tests.
//!
//! Desktop back-ends implement the same two traits,
//! [`crate::application::inject_text::InputInjector`] and
//! [`crate::application::select_target::WindowEnumerator`].

pub mod console;
pub mod mock;
