//! Peer records and the change an upsert reports.
//!
//! A peer is identified by a string `id` that takes one of two shapes,
//! depending on which announcement variant the peer speaks:
//!
//! - **Composite** (`<displayName>_<address>`): built locally from a
//!   presence announcement and the datagram's source address.
//! - **Persistent**: the id carried in a `DISCOVER:<id>` announcement,
//!   generated once by the remote node and stable across its restarts.

use std::net::Ipv4Addr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::protocol::messages::Announcement;

/// Everything the directory knows about one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub id: String,
    pub display_name: String,
    pub address: Ipv4Addr,
    pub is_host: bool,
    pub last_seen: SystemTime,
}

/// One received announcement, ready to be merged into the directory.
///
/// `is_host` is `None` when the announcement variant carries no host flag;
/// the stored flag is then left as it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSighting {
    pub id: String,
    pub display_name: String,
    pub address: Ipv4Addr,
    pub is_host: Option<bool>,
    pub seen_at: SystemTime,
}

impl PeerSighting {
    /// Builds a sighting from a decoded announcement and its source address.
    pub fn from_announcement(announcement: Announcement, address: Ipv4Addr) -> Self {
        match announcement {
            Announcement::Presence {
                display_name,
                is_host,
            } => Self {
                id: composite_id(&display_name, address),
                display_name,
                address,
                is_host: Some(is_host),
                seen_at: SystemTime::now(),
            },
            Announcement::Discover { id } => Self {
                display_name: id.clone(),
                id,
                address,
                is_host: None,
                seen_at: SystemTime::now(),
            },
        }
    }
}

/// What an upsert changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The id had never been seen.
    NewPeer,
    /// The id was known and its host flag flipped.
    HostStatusChanged,
    /// Only `last_seen` / `address` were refreshed.
    NoChange,
}

/// Builds the composite id used for presence-announcement peers.
///
/// # Examples
///
/// ```rust
/// use lanrelay_core::domain::peer::composite_id;
///
/// assert_eq!(composite_id("desk", "10.0.0.7".parse().unwrap()), "desk_10.0.0.7");
/// ```
pub fn composite_id(display_name: &str, address: Ipv4Addr) -> String {
    format!("{display_name}_{address}")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
