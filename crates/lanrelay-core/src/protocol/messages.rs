//! Wire message types.
//!
//! All messages are UTF-8 text with no length prefix; one UDP datagram
//! carries exactly one message.
//!
//! | Shape                        | Port       | Example                 |
//! |------------------------------|------------|-------------------------|
//! | Presence announcement        | discovery  | `alice-pc\|True`        |
//! | Persistent-id announcement   | discovery  | `DISCOVER:5f0c…`        |
//! | Chat message                 | message    | `alice-pc\|hello\|world` |

use serde::{Deserialize, Serialize};

/// Separates the sender / display name from the rest of a datagram.
pub const FIELD_DELIMITER: char = '|';

/// Prefix of the persistent-id announcement variant.
pub const DISCOVER_PREFIX: &str = "DISCOVER:";

/// Host flag spelling used on the wire when the peer is the host.
pub const HOST_TRUE: &str = "True";

/// Host flag spelling used on the wire when the peer is not the host.
pub const HOST_FALSE: &str = "False";

/// A periodic, stateless presence broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Announcement {
    /// `"<displayName>|<isHost>"`: the peer is keyed by display name plus the
    /// datagram's source address.
    Presence { display_name: String, is_host: bool },
    /// `"DISCOVER:<persistentId>"`: the peer is keyed by a stable id and
    /// carries no host flag.
    Discover { id: String },
}

impl Announcement {
    /// Builds a presence announcement, replacing any delimiter in the name.
    pub fn presence(display_name: &str, is_host: bool) -> Self {
        Self::Presence {
            display_name: sanitize_display_name(display_name),
            is_host,
        }
    }

    /// Builds a persistent-id announcement.
    pub fn discover(id: impl Into<String>) -> Self {
        Self::Discover { id: id.into() }
    }
}

/// A unicast chat datagram: `"<sender>|<content>"`.
///
/// Only the first delimiter separates the fields, so `content` may itself
/// contain `|`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: String,
    pub content: String,
}

impl ChatMessage {
    /// Builds a chat message, replacing any delimiter in the sender name.
    pub fn new(sender: &str, content: impl Into<String>) -> Self {
        Self {
            sender: sanitize_display_name(sender),
            content: content.into(),
        }
    }
}

/// Replaces every [`FIELD_DELIMITER`] in `name` with `_`.
///
/// Names are the leading field of both presence and chat datagrams, so a
/// delimiter inside a name would shift every following field.
pub fn sanitize_display_name(name: &str) -> String {
    name.replace(FIELD_DELIMITER, "_")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
