//! UDP discovery listeners and the optional peer reaper.
//!
//! One socket is bound per usable interface on the discovery port, and each
//! gets its own receive thread. The same sockets are handed to the
//! broadcaster, so every announcement leaves from the interface whose subnet
//! it targets.
//!
//! # Read timeout
//!
//! Each socket has a short read timeout (1s by default). `recv_from` returns
//! a timeout error at least that often, and the loop re-checks the `running`
//! flag before blocking again.
//!
//! # Foreign traffic
//!
//! Anything may arrive on the discovery port. Datagrams that do not decode as
//! an announcement are dropped with a debug log; they never stop the loop.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use lanrelay_core::{decode_announcement, Announcement, ChangeKind, PeerDirectory, PeerSighting};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::events::{emit, EventSender, NodeEvent};
use crate::infrastructure::network::interfaces::LocalInterface;
use crate::infrastructure::network::{is_connection_reset, is_timeout_error};

/// Large enough for any UDP payload.
const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Error type for discovery service operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// A UDP socket could not be bound or configured.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// Not a single interface could be bound.
    #[error("no usable network interface could be bound")]
    NoUsableInterface,
    /// The OS interface table could not be read.
    #[error("failed to enumerate network interfaces: {0}")]
    Interfaces(String),
    /// A discovery thread could not be created.
    #[error("failed to spawn discovery thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// A discovery socket together with the interface it belongs to.
#[derive(Debug, Clone)]
pub struct BoundSocket {
    /// Interface name, or `"any"` for a wildcard socket.
    pub label: String,
    /// Address the socket is bound to; unspecified for a wildcard socket.
    pub local_ip: Ipv4Addr,
    pub socket: Arc<UdpSocket>,
}

impl BoundSocket {
    pub fn is_wildcard(&self) -> bool {
        self.local_ip.is_unspecified()
    }
}

fn bind_one(
    label: &str,
    ip: Ipv4Addr,
    port: u16,
    recv_timeout: Duration,
) -> Result<BoundSocket, DiscoveryError> {
    let addr = SocketAddr::V4(SocketAddrV4::new(ip, port));
    let bind_err = |source| DiscoveryError::BindFailed { addr, source };

    let socket = UdpSocket::bind(addr).map_err(bind_err)?;
    socket.set_broadcast(true).map_err(bind_err)?;
    socket.set_read_timeout(Some(recv_timeout)).map_err(bind_err)?;

    Ok(BoundSocket {
        label: label.to_string(),
        local_ip: ip,
        socket: Arc::new(socket),
    })
}

/// Binds one broadcast-enabled socket per interface.
///
/// An interface that fails to bind is logged and skipped.
///
/// # Errors
///
/// Returns [`DiscoveryError::NoUsableInterface`] only when no interface binds.
pub fn bind_interfaces(
    interfaces: &[LocalInterface],
    port: u16,
    recv_timeout: Duration,
) -> Result<Vec<BoundSocket>, DiscoveryError> {
    let mut bound = Vec::with_capacity(interfaces.len());
    for iface in interfaces {
        match bind_one(&iface.name, iface.address, port, recv_timeout) {
            Ok(socket) => {
                info!("discovery bound on {} ({}:{port})", iface.name, iface.address);
                bound.push(socket);
            }
            Err(e) => warn!("skipping interface {}: {e}", iface.name),
        }
    }

    if bound.is_empty() {
        return Err(DiscoveryError::NoUsableInterface);
    }
    Ok(bound)
}

/// Binds a single socket on `0.0.0.0:port`.
///
/// Some platforms do not deliver subnet broadcasts to a socket bound to a
/// specific unicast address; a wildcard socket receives them everywhere.
///
/// # Errors
///
/// Returns [`DiscoveryError::BindFailed`] if the socket cannot be bound.
pub fn bind_wildcard(port: u16, recv_timeout: Duration) -> Result<BoundSocket, DiscoveryError> {
    let socket = bind_one("any", Ipv4Addr::UNSPECIFIED, port, recv_timeout)?;
    info!("discovery bound on 0.0.0.0:{port}");
    Ok(socket)
}

/// Recognises this node's own announcements.
#[derive(Debug, Clone, Default)]
pub struct SelfFilter {
    own_id: Option<String>,
    own_name: String,
    local_addrs: HashSet<Ipv4Addr>,
}

impl SelfFilter {
    /// `own_id` is the persistent id when this node announces one.
    pub fn new(
        own_id: Option<String>,
        own_name: &str,
        local_addrs: impl IntoIterator<Item = Ipv4Addr>,
    ) -> Self {
        Self {
            own_id,
            own_name: lanrelay_core::protocol::sanitize_display_name(own_name),
            local_addrs: local_addrs.into_iter().collect(),
        }
    }

    pub fn is_self(&self, announcement: &Announcement, source: Ipv4Addr) -> bool {
        match announcement {
            Announcement::Discover { id } => self.own_id.as_deref() == Some(id.as_str()),
            Announcement::Presence { display_name, .. } => {
                *display_name == self.own_name
                    && (self.local_addrs.contains(&source) || source.is_loopback())
            }
        }
    }
}

/// Processes one discovery datagram.
///
/// Returns the change it caused, or `None` when it was foreign traffic, an
/// IPv6 source, or our own announcement.
pub fn handle_datagram(
    bytes: &[u8],
    source: SocketAddr,
    directory: &PeerDirectory,
    filter: &SelfFilter,
    events: &EventSender,
) -> Option<ChangeKind> {
    let IpAddr::V4(source_ip) = source.ip() else {
        return None;
    };

    let Some(announcement) = decode_announcement(bytes) else {
        debug!("ignoring non-announcement datagram ({} bytes) from {source}", bytes.len());
        return None;
    };

    if filter.is_self(&announcement, source_ip) {
        return None;
    }

    let sighting = PeerSighting::from_announcement(announcement, source_ip);
    let (change, peer) = directory.upsert_record(sighting);

    match change {
        ChangeKind::NewPeer => {
            info!("new peer {} at {}", peer.display_name, peer.address);
            emit(events, NodeEvent::PeerJoined { peer });
        }
        ChangeKind::HostStatusChanged => {
            info!("peer {} host status is now {}", peer.display_name, peer.is_host);
            emit(
                events,
                NodeEvent::HostStatusChanged {
                    id: peer.id,
                    display_name: peer.display_name,
                    is_host: peer.is_host,
                },
            );
        }
        ChangeKind::NoChange => {}
    }
    Some(change)
}

/// Spawns the receive thread for one bound socket.
///
/// # Errors
///
/// Returns [`DiscoveryError::Spawn`] if the thread cannot be created.
pub fn spawn_listener(
    bound: BoundSocket,
    directory: Arc<PeerDirectory>,
    filter: Arc<SelfFilter>,
    events: EventSender,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, DiscoveryError> {
    std::thread::Builder::new()
        .name(format!("lanrelay-discovery-{}", bound.label))
        .spawn(move || listen_loop(&bound, &directory, &filter, &events, &running))
        .map_err(DiscoveryError::Spawn)
}

fn listen_loop(
    bound: &BoundSocket,
    directory: &PeerDirectory,
    filter: &SelfFilter,
    events: &EventSender,
    running: &AtomicBool,
) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    debug!("discovery listener on {} started", bound.label);

    while running.load(Ordering::Relaxed) {
        let (len, src) = match bound.socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) if is_connection_reset(&e) => {
                debug!("discovery socket on {} reported {e}; continuing", bound.label);
                continue;
            }
            Err(e) => {
                warn!("discovery recv error on {}: {e}", bound.label);
                continue;
            }
        };

        handle_datagram(&buf[..len], src, directory, filter, events);
    }

    info!("discovery listener on {} stopped", bound.label);
}

/// Spawns a thread that drops peers silent for longer than `ttl` and emits
/// [`NodeEvent::PeerLeft`] for each.
///
/// # Errors
///
/// Returns [`DiscoveryError::Spawn`] if the thread cannot be created.
pub fn spawn_peer_reaper(
    directory: Arc<PeerDirectory>,
    ttl: Duration,
    events: EventSender,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, DiscoveryError> {
    let sweep_every = (ttl / 2).clamp(Duration::from_millis(50), Duration::from_secs(5));
    let tick = sweep_every.min(Duration::from_millis(200));

    std::thread::Builder::new()
        .name("lanrelay-reaper".to_string())
        .spawn(move || {
            let mut since_sweep = Duration::ZERO;
            while running.load(Ordering::Relaxed) {
                std::thread::sleep(tick);
                since_sweep += tick;
                if since_sweep < sweep_every {
                    continue;
                }
                since_sweep = Duration::ZERO;

                for peer in directory.remove_stale(ttl, SystemTime::now()) {
                    info!("peer {} at {} timed out", peer.display_name, peer.address);
                    emit(&events, NodeEvent::PeerLeft { peer });
                }
            }
            debug!("peer reaper stopped");
        })
        .map_err(DiscoveryError::Spawn)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
