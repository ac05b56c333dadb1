//! Application layer use cases for a LanRelay node.
//!
//! - **`events`** – The [`events::NodeEvent`] notifications every service
//!   emits and the unbounded channel that carries them to the UI / log.
//!
//! - **`host_role`** – Whether this node currently acts as the group's
//!   injection target, and which local target is selected.
//!
//! - **`inject_text`** – The [`inject_text::InputInjector`] seam and the
//!   strictly FIFO, retrying [`inject_text::InjectionQueue`].
//!
//! - **`relay_chat`** – Decides which received chat messages and transfer
//!   payloads reach the injection queue.
//!
//! - **`select_target`** – Resolves a window title into a
//!   [`inject_text::TargetHandle`] through the [`select_target::WindowEnumerator`] seam.

pub mod events;
pub mod host_role;
pub mod inject_text;
pub mod relay_chat;
pub mod select_target;
