//! Network infrastructure for a LanRelay node.
//!
//! # Sub-modules
//!
//! - **`interfaces`** – Enumerates the usable IPv4 interfaces discovery binds to.
//!
//! - **`discovery`** – One UDP receive loop per bound interface. Decodes
//!   announcements, feeds the [`lanrelay_core::PeerDirectory`], and reports new
//!   peers and host-status transitions. Also hosts the optional peer reaper.
//!
//! - **`broadcaster`** – Periodically announces this node on every bound
//!   interface's subnet broadcast address plus `255.255.255.255`.
//!
//! - **`message_channel`** – Unicast UDP chat: send to one peer, send to every
//!   known peer, and receive.
//!
//! - **`transfer`** – TCP transfer sessions gated by an explicit local
//!   approval before any byte is read.
//!
//! Every blocking loop polls with a short socket timeout and re-checks a shared
//! `running` flag; that flag is the only cancellation mechanism.

pub mod broadcaster;
pub mod discovery;
pub mod interfaces;
pub mod message_channel;
pub mod transfer;

use std::io::{Error, ErrorKind};

/// Returns `true` for OS timeout / would-block errors that should be retried.
pub(crate) fn is_timeout_error(e: &Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// Returns `true` for "forcibly closed" errors.
///
/// On Windows a UDP socket reports `ConnectionReset` when an earlier send hit
/// a closed port; the socket itself is still usable.
pub(crate) fn is_connection_reset(e: &Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
}
