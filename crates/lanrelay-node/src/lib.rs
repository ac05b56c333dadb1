//! lanrelay-node library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! A node does four things at once:
//!
//! 1. Announces itself on every usable IPv4 interface and listens for the
//!    announcements of others, keeping a [`lanrelay_core::PeerDirectory`].
//! 2. Sends and receives short chat messages over unicast UDP.
//! 3. Accepts TCP transfer connections, but streams nothing until a local
//!    approval gate says yes.
//! 4. Hands received text to a single FIFO injection queue that types it into
//!    the locally selected target, retrying a bounded number of times.

/// Application layer: use cases and the seams the infrastructure plugs into.
pub mod application;

/// Infrastructure layer: sockets, input injection adapters, and storage.
pub mod infrastructure;
