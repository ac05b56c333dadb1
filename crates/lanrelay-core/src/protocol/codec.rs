//! Text codec for discovery announcements and chat datagrams.
//!
//! Decoding is total: every function returns `None` for bytes that are not a
//! well-formed message of the expected shape (invalid UTF-8, missing
//! delimiter, empty identifier). The discovery and chat ports are shared with
//! whatever else happens to broadcast on the LAN, so a `None` is expected
//! noise and callers discard it without logging an error.

use crate::protocol::messages::{
    Announcement, ChatMessage, DISCOVER_PREFIX, FIELD_DELIMITER, HOST_FALSE, HOST_TRUE,
};

// ── Announcements ─────────────────────────────────────────────────────────────

/// Encodes an [`Announcement`] into its datagram bytes.
///
/// # Examples
///
/// ```rust
/// use lanrelay_core::protocol::{encode_announcement, Announcement};
///
/// let bytes = encode_announcement(&Announcement::presence("alice", true));
/// assert_eq!(bytes, b"alice|True");
/// ```
pub fn encode_announcement(announcement: &Announcement) -> Vec<u8> {
    match announcement {
        Announcement::Presence {
            display_name,
            is_host,
        } => {
            let flag = if *is_host { HOST_TRUE } else { HOST_FALSE };
            format!("{display_name}{FIELD_DELIMITER}{flag}").into_bytes()
        }
        Announcement::Discover { id } => format!("{DISCOVER_PREFIX}{id}").into_bytes(),
    }
}

/// Decodes one announcement datagram.
///
/// - `DISCOVER:<id>` yields [`Announcement::Discover`] when `<id>` is non-empty.
/// - `<name>|<flag>` yields [`Announcement::Presence`] when there is exactly
///   one delimiter and `<name>` is non-empty. The flag is `true` only for the
///   literal `True`; any other value reads as `false`.
///
/// # Examples
///
/// ```rust
/// use lanrelay_core::protocol::{decode_announcement, Announcement};
///
/// assert_eq!(
///     decode_announcement(b"DISCOVER:abc"),
///     Some(Announcement::Discover { id: "abc".into() })
/// );
/// assert_eq!(decode_announcement(b"no delimiter"), None);
/// ```
pub fn decode_announcement(bytes: &[u8]) -> Option<Announcement> {
    let text = std::str::from_utf8(bytes).ok()?;

    if let Some(id) = text.strip_prefix(DISCOVER_PREFIX) {
        if id.is_empty() {
            return None;
        }
        return Some(Announcement::Discover { id: id.to_string() });
    }

    let (name, flag) = text.split_once(FIELD_DELIMITER)?;
    if name.is_empty() || flag.contains(FIELD_DELIMITER) {
        return None;
    }

    Some(Announcement::Presence {
        display_name: name.to_string(),
        is_host: flag == HOST_TRUE,
    })
}

// ── Chat ──────────────────────────────────────────────────────────────────────

/// Encodes a [`ChatMessage`] as `"<sender>|<content>"`.
pub fn encode_chat(message: &ChatMessage) -> Vec<u8> {
    format!("{}{FIELD_DELIMITER}{}", message.sender, message.content).into_bytes()
}

/// Decodes a chat datagram, splitting on the first delimiter only.
///
/// # Examples
///
/// ```rust
/// use lanrelay_core::protocol::decode_chat;
///
/// let msg = decode_chat(b"alice|hello|world").unwrap();
/// assert_eq!(msg.sender, "alice");
/// assert_eq!(msg.content, "hello|world");
/// ```
pub fn decode_chat(bytes: &[u8]) -> Option<ChatMessage> {
    let text = std::str::from_utf8(bytes).ok()?;
    let (sender, content) = text.split_once(FIELD_DELIMITER)?;
    Some(ChatMessage {
        sender: sender.to_string(),
        content: content.to_string(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
