//! Unicast UDP chat.
//!
//! One socket on the message port both sends and receives. Outbound messages
//! go to a single peer or to every distinct address in the peer directory.
//! Inbound messages are reported as [`NodeEvent::ChatReceived`] and offered
//! to the [`ChatRelay`], which injects them when this node is the host.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use lanrelay_core::{decode_chat, encode_chat, ChatMessage, PeerDirectory};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::events::{emit, EventSender, NodeEvent};
use crate::application::relay_chat::ChatRelay;
use crate::infrastructure::network::{is_connection_reset, is_timeout_error};

const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Errors that can occur on the chat channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to bind message socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to send message to {dest}: {source}")]
    Send {
        dest: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn chat receive thread: {0}")]
    Spawn(#[source] std::io::Error),
}

pub struct MessageChannel {
    socket: Arc<UdpSocket>,
    own_name: String,
    /// Port peers listen on for chat.
    peer_port: u16,
}

impl MessageChannel {
    /// Binds the chat socket on `bind_ip:port`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Bind`] if the socket cannot be bound or configured.
    pub fn bind(
        bind_ip: Ipv4Addr,
        port: u16,
        peer_port: u16,
        own_name: &str,
        recv_timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let addr = SocketAddr::V4(SocketAddrV4::new(bind_ip, port));
        let socket =
            UdpSocket::bind(addr).map_err(|source| ChannelError::Bind { addr, source })?;
        socket
            .set_read_timeout(Some(recv_timeout))
            .map_err(|source| ChannelError::Bind { addr, source })?;
        info!("message channel bound on {addr}");

        Ok(Self {
            socket: Arc::new(socket),
            own_name: own_name.to_string(),
            peer_port,
        })
    }

    /// # Errors
    ///
    /// Returns the OS error if the socket address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sends `content` to a peer's message port.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Send`] when the OS rejects the datagram.
    pub fn send(&self, ip: Ipv4Addr, content: &str) -> Result<(), ChannelError> {
        self.send_to(SocketAddr::V4(SocketAddrV4::new(ip, self.peer_port)), content)
    }

    /// Sends `content` to an explicit socket address.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Send`] when the OS rejects the datagram.
    pub fn send_to(&self, dest: SocketAddr, content: &str) -> Result<(), ChannelError> {
        let bytes = encode_chat(&ChatMessage::new(&self.own_name, content));
        self.socket
            .send_to(&bytes, dest)
            .map(|_| ())
            .map_err(|source| ChannelError::Send { dest, source })
    }

    /// Sends `content` once to every distinct peer address.
    ///
    /// Returns `true` if at least one send succeeded.
    pub fn broadcast_to_all_known(&self, directory: &PeerDirectory, content: &str) -> bool {
        let mut any = false;
        for ip in directory.unique_addresses() {
            match self.send(ip, content) {
                Ok(()) => any = true,
                Err(e) => warn!("{e}"),
            }
        }
        if !any {
            debug!("chat not delivered: no reachable peers");
        }
        any
    }

    /// Spawns the receive thread.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Spawn`] if the thread cannot be created.
    pub fn spawn_receiver(
        &self,
        events: EventSender,
        relay: Option<Arc<ChatRelay>>,
        running: Arc<AtomicBool>,
    ) -> Result<JoinHandle<()>, ChannelError> {
        let socket = Arc::clone(&self.socket);
        std::thread::Builder::new()
            .name("lanrelay-chat-rx".to_string())
            .spawn(move || receive_loop(&socket, &events, relay.as_deref(), &running))
            .map_err(ChannelError::Spawn)
    }
}

fn receive_loop(
    socket: &UdpSocket,
    events: &EventSender,
    relay: Option<&ChatRelay>,
    running: &AtomicBool,
) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    while running.load(Ordering::Relaxed) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) if is_connection_reset(&e) => {
                debug!("message socket reported {e}; continuing");
                continue;
            }
            Err(e) => {
                warn!("message recv error: {e}");
                continue;
            }
        };

        let IpAddr::V4(from) = src.ip() else {
            continue;
        };
        let Some(message) = decode_chat(&buf[..len]) else {
            debug!("ignoring undecodable chat datagram from {src}");
            continue;
        };

        debug!("chat from {} at {from}", message.sender);
        emit(
            events,
            NodeEvent::ChatReceived {
                sender: message.sender.clone(),
                content: message.content.clone(),
                from,
            },
        );
        if let Some(relay) = relay {
            relay.handle_chat(&message);
        }
    }

    info!("chat receiver stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
