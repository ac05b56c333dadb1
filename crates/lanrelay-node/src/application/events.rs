//! Notifications emitted by the node's services.
//!
//! Every long-lived loop reports through one unbounded Tokio channel. Sending
//! on an unbounded channel never blocks, so a slow consumer can never stall a
//! discovery thread or the injection consumer.

use std::net::{Ipv4Addr, SocketAddr};

use lanrelay_core::PeerRecord;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Sending half shared by every service.
pub type EventSender = mpsc::UnboundedSender<NodeEvent>;

/// Receiving half owned by the UI / log pump.
pub type EventReceiver = mpsc::UnboundedReceiver<NodeEvent>;

/// Terminal result of one injection job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionOutcome {
    pub job_id: Uuid,
    pub success: bool,
    /// Attempts actually made, between 1 and the configured maximum.
    pub attempts: u32,
    /// Message of the last failed attempt; `None` on success.
    pub last_error: Option<String>,
}

/// A notification for the UI / log layer.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// An id was announced for the first time.
    PeerJoined { peer: PeerRecord },
    /// A known peer's host flag flipped.
    HostStatusChanged {
        id: String,
        display_name: String,
        is_host: bool,
    },
    /// The reaper dropped a peer that stopped announcing.
    PeerLeft { peer: PeerRecord },
    /// A chat datagram arrived.
    ChatReceived {
        sender: String,
        content: String,
        from: Ipv4Addr,
    },
    /// A transfer connection is waiting for a local accept / reject decision.
    TransferPending { request_id: u64, peer: SocketAddr },
    TransferAccepted { peer: SocketAddr },
    TransferRejected { peer: SocketAddr },
    /// An accepted transfer session ended after delivering `payloads` payloads.
    TransferClosed { peer: SocketAddr, payloads: usize },
    InjectionOutcome(InjectionOutcome),
}

/// Creates the node's event channel.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Sends `event`, ignoring a closed receiver.
///
/// A dropped receiver only happens during shutdown; services keep running
/// until they observe the shutdown flag.
pub fn emit(events: &EventSender, event: NodeEvent) {
    if events.send(event).is_err() {
        debug!("event receiver dropped; notification discarded");
    }
}
