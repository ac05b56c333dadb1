//! # lanrelay-core
//!
//! Shared library for LanRelay containing the text wire codec, optional
//! stream framing, and the peer directory.
//!
//! This crate is used by the node application and by any UI layered on top
//! of it. It has zero dependencies on OS APIs, UI frameworks, or network
//! sockets.
//!
//! - **`protocol`** – How text travels over the network. Discovery
//!   announcements and chat messages are short UTF-8 datagrams with a `|`
//!   delimiter; transfer streams may optionally carry length-prefixed frames.
//!
//! - **`domain`** – The [`PeerDirectory`]: the single registry of every peer
//!   heard on the LAN, with change detection for new peers and host-status
//!   transitions.

pub mod domain;
pub mod protocol;

pub use domain::directory::PeerDirectory;
pub use domain::peer::{ChangeKind, PeerRecord, PeerSighting};
pub use protocol::codec::{decode_announcement, decode_chat, encode_announcement, encode_chat};
pub use protocol::messages::{Announcement, ChatMessage};
