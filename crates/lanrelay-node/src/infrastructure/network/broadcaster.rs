//! Periodic presence announcements.
//!
//! Every round, each bound discovery socket sends the current announcement to
//! its subnet broadcast address (the local IPv4 address with the last octet
//! set to 255). The limited broadcast address `255.255.255.255` is sent once
//! per round as a fallback for networks where the /24 guess is wrong. A
//! broadcast address reached by two interfaces is only sent once.
//!
//! Send failures ("network unreachable" on an interface that just went down)
//! are logged and the round continues.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use lanrelay_core::{encode_announcement, Announcement};
use tracing::{debug, info, warn};

use crate::application::host_role::HostRole;
use crate::infrastructure::network::discovery::{BoundSocket, DiscoveryError};
use crate::infrastructure::network::transfer::ActiveSessions;

/// Longest uninterrupted sleep between `running` checks.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Replaces the host octet of `addr` with 255.
///
/// # Examples
///
/// ```rust
/// use lanrelay_node::infrastructure::network::broadcaster::subnet_broadcast;
///
/// assert_eq!(
///     subnet_broadcast("192.168.1.37".parse().unwrap()),
///     "192.168.1.255".parse::<std::net::Ipv4Addr>().unwrap()
/// );
/// ```
pub fn subnet_broadcast(addr: Ipv4Addr) -> Ipv4Addr {
    let [a, b, c, _] = addr.octets();
    Ipv4Addr::new(a, b, c, 255)
}

/// Every address one round targets: each distinct subnet broadcast address
/// in order of first appearance, then the limited broadcast address.
pub fn broadcast_targets(local_addrs: &[Ipv4Addr]) -> Vec<Ipv4Addr> {
    let mut seen = HashSet::new();
    let mut targets: Vec<Ipv4Addr> = local_addrs
        .iter()
        .map(|ip| subnet_broadcast(*ip))
        .filter(|b| seen.insert(*b))
        .collect();
    if seen.insert(Ipv4Addr::BROADCAST) {
        targets.push(Ipv4Addr::BROADCAST);
    }
    targets
}

/// Assigns each target address to the socket that sends it.
///
/// A socket bound to an interface sends to that interface's subnet; a
/// wildcard socket sends to the subnets of all `interface_addrs`. The limited
/// broadcast address goes out once, from the first socket.
pub fn plan_round(sockets: &[BoundSocket], interface_addrs: &[Ipv4Addr]) -> Vec<(usize, Ipv4Addr)> {
    let mut seen = HashSet::new();
    let mut plan = Vec::new();

    for (i, bound) in sockets.iter().enumerate() {
        let sources: Vec<Ipv4Addr> = if bound.is_wildcard() {
            interface_addrs.to_vec()
        } else {
            vec![bound.local_ip]
        };
        for ip in sources {
            let target = subnet_broadcast(ip);
            if seen.insert(target) {
                plan.push((i, target));
            }
        }
    }

    if !sockets.is_empty() && seen.insert(Ipv4Addr::BROADCAST) {
        plan.push((0, Ipv4Addr::BROADCAST));
    }
    plan
}

/// What this node announces itself as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnounceIdentity {
    /// `"<name>|<isHost>"`; the host flag is read from the role every round.
    Hostname { display_name: String },
    /// `"DISCOVER:<id>"`.
    Persistent { id: String },
}

#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    /// Destination port (the discovery port).
    pub port: u16,
    pub interval: Duration,
    pub identity: AnnounceIdentity,
    /// Stay quiet while a transfer session is open.
    pub suppress_while_connected: bool,
}

pub struct Broadcaster {
    sockets: Vec<BoundSocket>,
    interface_addrs: Vec<Ipv4Addr>,
    config: BroadcasterConfig,
    role: Arc<HostRole>,
    sessions: Arc<ActiveSessions>,
}

impl Broadcaster {
    pub fn new(
        sockets: Vec<BoundSocket>,
        interface_addrs: Vec<Ipv4Addr>,
        config: BroadcasterConfig,
        role: Arc<HostRole>,
        sessions: Arc<ActiveSessions>,
    ) -> Self {
        Self {
            sockets,
            interface_addrs,
            config,
            role,
            sessions,
        }
    }

    /// The announcement the next round sends.
    pub fn announcement(&self) -> Announcement {
        match &self.config.identity {
            AnnounceIdentity::Hostname { display_name } => {
                Announcement::presence(display_name, self.role.is_host())
            }
            AnnounceIdentity::Persistent { id } => Announcement::discover(id.clone()),
        }
    }

    /// Sends one round and returns how many sends succeeded.
    pub fn broadcast_round(&self) -> usize {
        if self.config.suppress_while_connected && self.sessions.active() > 0 {
            debug!("broadcast suppressed: {} transfer session(s) open", self.sessions.active());
            return 0;
        }

        let payload = encode_announcement(&self.announcement());
        let mut sent = 0;
        for (i, target) in plan_round(&self.sockets, &self.interface_addrs) {
            let bound = &self.sockets[i];
            let dest = SocketAddr::V4(SocketAddrV4::new(target, self.config.port));
            match bound.socket.send_to(&payload, dest) {
                Ok(_) => sent += 1,
                Err(e) => warn!("broadcast to {dest} via {} failed: {e}", bound.label),
            }
        }
        sent
    }

    /// Spawns the broadcast thread. It sends immediately, then once per
    /// interval until `running` is cleared.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Spawn`] if the thread cannot be created.
    pub fn spawn(self, running: Arc<AtomicBool>) -> Result<JoinHandle<()>, DiscoveryError> {
        std::thread::Builder::new()
            .name("lanrelay-broadcast".to_string())
            .spawn(move || {
                let local: Vec<Ipv4Addr> = self
                    .sockets
                    .iter()
                    .filter(|s| !s.is_wildcard())
                    .map(|s| s.local_ip)
                    .chain(self.interface_addrs.iter().copied())
                    .collect();
                info!(
                    "broadcasting to {:?} every {:?}",
                    broadcast_targets(&local),
                    self.config.interval
                );
                while running.load(Ordering::Relaxed) {
                    let sent = self.broadcast_round();
                    debug!("announcement round sent {sent} datagram(s)");
                    sleep_while_running(self.config.interval, &running);
                }
                info!("broadcaster stopped");
            })
            .map_err(DiscoveryError::Spawn)
    }
}

fn sleep_while_running(total: Duration, running: &AtomicBool) {
    let mut remaining = total;
    while !remaining.is_zero() && running.load(Ordering::Relaxed) {
        let step = remaining.min(SLEEP_SLICE);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use lanrelay_core::decode_announcement;
    use std::net::UdpSocket;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn bound(label: &str, local: Ipv4Addr) -> BoundSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        BoundSocket {
            label: label.to_string(),
            local_ip: local,
            socket: Arc::new(socket),
        }
    }

    fn config(identity: AnnounceIdentity, port: u16) -> BroadcasterConfig {
        BroadcasterConfig {
            port,
            interval: Duration::from_millis(50),
            identity,
            suppress_while_connected: true,
        }
    }

    // ── Address computation ───────────────────────────────────────────────────

    #[test]
    fn test_subnet_broadcast_replaces_last_octet() {
        assert_eq!(subnet_broadcast(ip("192.168.1.37")), ip("192.168.1.255"));
        assert_eq!(subnet_broadcast(ip("10.20.30.1")), ip("10.20.30.255"));
    }

    #[test]
    fn test_broadcast_targets_always_include_limited_broadcast() {
        assert_eq!(
            broadcast_targets(&[ip("192.168.1.37")]),
            vec![ip("192.168.1.255"), Ipv4Addr::BROADCAST]
        );
        assert_eq!(broadcast_targets(&[]), vec![Ipv4Addr::BROADCAST]);
    }

    #[test]
    fn test_broadcast_targets_deduplicate_shared_subnets() {
        let targets = broadcast_targets(&[ip("192.168.1.2"), ip("192.168.1.3"), ip("10.0.0.5")]);
        assert_eq!(
            targets,
            vec![ip("192.168.1.255"), ip("10.0.0.255"), Ipv4Addr::BROADCAST]
        );
    }

    #[test]
    fn test_plan_round_sends_each_subnet_from_its_own_socket() {
        // Arrange
        let sockets = vec![
            bound("eth0", ip("192.168.1.2")),
            bound("wlan0", ip("192.168.1.9")),
            bound("eth1", ip("10.0.0.5")),
        ];

        // Act
        let plan = plan_round(&sockets, &[]);

        // Assert
        assert_eq!(
            plan,
            vec![
                (0, ip("192.168.1.255")),
                (2, ip("10.0.0.255")),
                (0, Ipv4Addr::BROADCAST),
            ]
        );
    }

    #[test]
    fn test_plan_round_wildcard_socket_covers_every_interface() {
        let sockets = vec![bound("any", Ipv4Addr::UNSPECIFIED)];
        let plan = plan_round(&sockets, &[ip("192.168.1.2"), ip("10.0.0.5")]);
        assert_eq!(
            plan,
            vec![
                (0, ip("192.168.1.255")),
                (0, ip("10.0.0.255")),
                (0, Ipv4Addr::BROADCAST),
            ]
        );
    }

    #[test]
    fn test_plan_round_without_sockets_is_empty() {
        assert!(plan_round(&[], &[ip("192.168.1.2")]).is_empty());
    }

    // ── Announcement content ──────────────────────────────────────────────────

    #[test]
    fn test_announcement_follows_host_role_toggle() {
        // Arrange
        let role = Arc::new(HostRole::new(false));
        let b = Broadcaster::new(
            Vec::new(),
            Vec::new(),
            config(AnnounceIdentity::Hostname { display_name: "desk".into() }, 0),
            Arc::clone(&role),
            Arc::new(ActiveSessions::new()),
        );

        // Act / Assert
        assert_eq!(b.announcement(), Announcement::presence("desk", false));
        role.set_host(true);
        assert_eq!(b.announcement(), Announcement::presence("desk", true));
    }

    #[test]
    fn test_persistent_identity_announces_discover() {
        let b = Broadcaster::new(
            Vec::new(),
            Vec::new(),
            config(AnnounceIdentity::Persistent { id: "abc".into() }, 0),
            Arc::new(HostRole::new(true)),
            Arc::new(ActiveSessions::new()),
        );
        assert_eq!(b.announcement(), Announcement::discover("abc"));
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    #[test]
    fn test_broadcast_round_suppressed_while_session_open() {
        let sessions = Arc::new(ActiveSessions::new());
        let b = Broadcaster::new(
            vec![bound("lo", Ipv4Addr::LOCALHOST)],
            Vec::new(),
            config(AnnounceIdentity::Persistent { id: "abc".into() }, 9),
            Arc::new(HostRole::default()),
            Arc::clone(&sessions),
        );

        let _guard = sessions.enter();
        assert_eq!(b.broadcast_round(), 0);
    }

    #[test]
    fn test_broadcast_round_reaches_loopback_subnet() {
        // Arrange: a socket "on" 127.0.0.1 targets 127.0.0.255, which Linux
        // routes over loopback
        let listener = UdpSocket::bind("0.0.0.0:0").unwrap();
        listener.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let port = listener.local_addr().unwrap().port();
        let sender = bound("lo", Ipv4Addr::LOCALHOST);
        sender.socket.set_broadcast(true).unwrap();
        let b = Broadcaster::new(
            vec![sender],
            Vec::new(),
            config(AnnounceIdentity::Hostname { display_name: "desk".into() }, port),
            Arc::new(HostRole::new(true)),
            Arc::new(ActiveSessions::new()),
        );

        // Act
        let sent = b.broadcast_round();

        // Assert: delivery of broadcasts is environment dependent; only check
        // content when something arrived
        let mut buf = [0u8; 256];
        if sent > 0 {
            if let Ok((n, _)) = listener.recv_from(&mut buf) {
                assert_eq!(
                    decode_announcement(&buf[..n]),
                    Some(Announcement::presence("desk", true))
                );
            }
        }
    }

    #[test]
    fn test_spawned_broadcaster_stops_on_flag() {
        let b = Broadcaster::new(
            Vec::new(),
            Vec::new(),
            config(AnnounceIdentity::Persistent { id: "abc".into() }, 0),
            Arc::new(HostRole::default()),
            Arc::new(ActiveSessions::new()),
        );
        let running = Arc::new(AtomicBool::new(true));
        let handle = b.spawn(Arc::clone(&running)).unwrap();
        std::thread::sleep(Duration::from_millis(80));
        running.store(false, Ordering::Relaxed);
        handle.join().unwrap();
    }
}
