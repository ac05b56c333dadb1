//! Domain layer: pure peer-tracking logic with no OS dependencies.
//!
//! - **`peer`** – [`PeerRecord`], the inbound [`PeerSighting`], and the
//!   [`ChangeKind`] an upsert reports.
//! - **`directory`** – [`PeerDirectory`], the thread-safe registry shared by
//!   every discovery listener and read by the chat and transfer channels.

pub mod directory;
pub mod peer;

pub use directory::PeerDirectory;
pub use peer::{ChangeKind, PeerRecord, PeerSighting};
