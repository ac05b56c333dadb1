//! TCP transfer sessions with an explicit local approval gate.
//!
//! Any LAN peer can open the transfer port. Accepting the TCP connection does
//! not imply trust: every accepted socket is first handed to an
//! [`ApprovalGate`], and until the gate says yes not a single byte is read.
//! A rejected connection is closed immediately.
//!
//! Per-connection states:
//!
//! ```text
//! Listening -> PendingAccept -> Accepted -> Streaming -> Closed
//!                            \-> Rejected -> Closed
//! ```
//!
//! Once streaming, payloads go to a [`PayloadSink`] (normally the chat
//! relay, which queues them for injection). With [`TransferFraming::Raw`]
//! every OS-level read becomes one payload; with
//! [`TransferFraming::LengthPrefixed`] payloads are 4-byte big-endian length
//! prefixed frames and arrive whole regardless of how the sender's writes
//! were split.
//!
//! The accept loop runs on Tokio and polls with a 200 ms accept timeout so it
//! can observe the shared `running` flag. Each session gets its own task in a
//! `JoinSet` owned by the accept loop, and polls the same flag between reads.
//! Clearing `running` stops delivery on every open session; the accept loop
//! then waits briefly for its sessions and aborts any that remain.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lanrelay_core::protocol::{encode_frame, FrameDecoder, FramingError, Utf8StreamDecoder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::events::{emit, EventSender, NodeEvent};
use crate::application::relay_chat::PayloadSink;
use crate::infrastructure::network::is_connection_reset;

const ACCEPT_POLL: Duration = Duration::from_millis(200);
const READ_POLL: Duration = Duration::from_millis(200);
/// How long the accept loop waits for open sessions after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Errors that can occur in the transfer channel.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("failed to bind transfer listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("connection to {0} timed out")]
    ConnectTimeout(SocketAddr),
    #[error("transfer I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Framing(#[from] FramingError),
}

/// How payloads are delimited on a transfer stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferFraming {
    /// Every read is one payload.
    #[default]
    Raw,
    /// 4-byte big-endian length prefix per payload.
    LengthPrefixed,
}

/// Lifecycle of one inbound transfer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Listening,
    PendingAccept,
    Accepted,
    Streaming,
    Rejected,
    Closed,
}

/// Result of one finished inbound session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    pub accepted: bool,
    pub payloads: usize,
}

// ── Approval gates ────────────────────────────────────────────────────────────

/// Decides whether an accepted connection may stream.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn approve(&self, peer: SocketAddr) -> bool;
}

/// Approves everything. For trusted networks and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn approve(&self, _peer: SocketAddr) -> bool {
        true
    }
}

/// Rejects everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoReject;

#[async_trait]
impl ApprovalGate for AutoReject {
    async fn approve(&self, _peer: SocketAddr) -> bool {
        false
    }
}

/// Asks the local user.
///
/// Each request emits [`NodeEvent::TransferPending`] with a request id and
/// waits for [`PromptApprovalGate::resolve`]. A request left unanswered for
/// the configured timeout is rejected.
pub struct PromptApprovalGate {
    events: EventSender,
    decision_timeout: Duration,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<bool>>>,
}

impl PromptApprovalGate {
    pub fn new(events: EventSender, decision_timeout: Duration) -> Self {
        Self {
            events,
            decision_timeout,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Answers a pending request. Returns `false` if no such request is waiting.
    pub fn resolve(&self, request_id: u64, accept: bool) -> bool {
        match self.lock_pending().remove(&request_id) {
            Some(tx) => tx.send(accept).is_ok(),
            None => false,
        }
    }

    /// Ids of requests still waiting for a decision, ascending.
    pub fn pending_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.lock_pending().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<bool>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ApprovalGate for PromptApprovalGate {
    async fn approve(&self, peer: SocketAddr) -> bool {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(request_id, tx);

        info!("transfer from {peer} awaiting approval (request {request_id})");
        emit(&self.events, NodeEvent::TransferPending { request_id, peer });

        match timeout(self.decision_timeout, rx).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_)) => false,
            Err(_) => {
                self.lock_pending().remove(&request_id);
                info!("transfer request {request_id} from {peer} timed out");
                false
            }
        }
    }
}

// ── Active session counter ────────────────────────────────────────────────────

/// Number of transfer sessions currently streaming, in either direction.
///
/// The broadcaster reads this when configured to stay quiet while connected.
#[derive(Debug, Default)]
pub struct ActiveSessions {
    count: AtomicUsize,
}

impl ActiveSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Marks a session as active until the guard is dropped.
    pub fn enter(self: &Arc<Self>) -> SessionGuard {
        self.count.fetch_add(1, Ordering::Relaxed);
        SessionGuard {
            sessions: Arc::clone(self),
        }
    }
}

pub struct SessionGuard {
    sessions: Arc<ActiveSessions>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.count.fetch_sub(1, Ordering::Relaxed);
    }
}

// ── Server side ───────────────────────────────────────────────────────────────

struct SessionContext {
    gate: Arc<dyn ApprovalGate>,
    sink: Arc<dyn PayloadSink>,
    framing: TransferFraming,
    events: EventSender,
    sessions: Arc<ActiveSessions>,
}

/// Listens for inbound transfer connections.
pub struct TransferServer {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
}

impl TransferServer {
    /// Binds the transfer listener.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Bind`] if the port cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        gate: Arc<dyn ApprovalGate>,
        sink: Arc<dyn PayloadSink>,
        framing: TransferFraming,
        events: EventSender,
        sessions: Arc<ActiveSessions>,
    ) -> Result<Self, TransferError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransferError::Bind { addr, source })?;
        Ok(Self {
            listener,
            ctx: Arc::new(SessionContext {
                gate,
                sink,
                framing,
                events,
                sessions,
            }),
        })
    }

    /// # Errors
    ///
    /// Returns the OS error if the listener address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, TransferError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `running` is cleared, one task per session.
    pub async fn run(self, running: Arc<AtomicBool>) {
        match self.listener.local_addr() {
            Ok(addr) => info!(
                "transfer {:?} on {addr} ({:?} framing)",
                SessionState::Listening,
                self.ctx.framing
            ),
            Err(e) => warn!("transfer listener address unavailable: {e}"),
        }

        let mut sessions = JoinSet::new();
        while running.load(Ordering::Relaxed) {
            while let Some(done) = sessions.try_join_next() {
                log_session_join(done);
            }
            match timeout(ACCEPT_POLL, self.listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    debug!("transfer connection from {peer}: {:?}", SessionState::PendingAccept);
                    let ctx = Arc::clone(&self.ctx);
                    let running = Arc::clone(&running);
                    sessions.spawn(async move {
                        let outcome = handle_session(stream, peer, &ctx, &running).await;
                        debug!("transfer session with {peer} finished: {outcome:?}");
                    });
                }
                Ok(Err(e)) => accept_backoff(&e).await,
                Err(_) => {}
            }
        }
        drop(self.listener);

        let drained = timeout(SHUTDOWN_GRACE, async {
            while let Some(done) = sessions.join_next().await {
                log_session_join(done);
            }
        })
        .await;
        if drained.is_err() {
            warn!("aborting {} transfer session(s) still open", sessions.len());
            sessions.shutdown().await;
        }

        info!("transfer listener stopped");
    }
}

/// Logs a failed accept and pauses before the next one.
async fn accept_backoff(e: &std::io::Error) {
    error!("transfer accept error: {e}");
    tokio::time::sleep(ACCEPT_POLL).await;
}

fn log_session_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        warn!("transfer session task ended abnormally: {e}");
    }
}

/// Resolves once `running` is cleared.
async fn shutdown_requested(running: &AtomicBool) {
    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(READ_POLL).await;
    }
}

async fn handle_session(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: &SessionContext,
    running: &AtomicBool,
) -> SessionOutcome {
    let approved = tokio::select! {
        approved = ctx.gate.approve(peer) => approved,
        () = shutdown_requested(running) => false,
    };
    if !approved {
        info!("transfer from {peer}: {:?}", SessionState::Rejected);
        let _ = stream.shutdown().await;
        emit(&ctx.events, NodeEvent::TransferRejected { peer });
        return SessionOutcome {
            accepted: false,
            payloads: 0,
        };
    }

    info!("transfer from {peer}: {:?}", SessionState::Accepted);
    emit(&ctx.events, NodeEvent::TransferAccepted { peer });
    let _guard = ctx.sessions.enter();

    let payloads = stream_payloads(&mut stream, peer, ctx, running).await;

    info!("transfer from {peer}: {:?} after {payloads} payload(s)", SessionState::Closed);
    emit(&ctx.events, NodeEvent::TransferClosed { peer, payloads });
    SessionOutcome {
        accepted: true,
        payloads,
    }
}

async fn stream_payloads(
    stream: &mut TcpStream,
    peer: SocketAddr,
    ctx: &SessionContext,
    running: &AtomicBool,
) -> usize {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut frames = FrameDecoder::new();
    let mut text = Utf8StreamDecoder::new();
    let mut delivered = 0;

    debug!("transfer from {peer}: {:?}", SessionState::Streaming);
    while running.load(Ordering::Relaxed) {
        let n = match timeout(READ_POLL, stream.read(&mut buf)).await {
            Err(_) => continue,
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(e)) if is_connection_reset(&e) => {
                debug!("transfer peer {peer} reset the connection");
                break;
            }
            Ok(Err(e)) => {
                warn!("transfer read error from {peer}: {e}");
                break;
            }
        };

        match ctx.framing {
            TransferFraming::Raw => {
                let chunk = text.push(&buf[..n]);
                if !chunk.is_empty() {
                    ctx.sink.deliver(peer, chunk);
                    delivered += 1;
                }
            }
            TransferFraming::LengthPrefixed => match frames.push(&buf[..n]) {
                Ok(complete) => {
                    for frame in complete {
                        ctx.sink
                            .deliver(peer, String::from_utf8_lossy(&frame).into_owned());
                        delivered += 1;
                    }
                }
                Err(e) => {
                    warn!("closing transfer from {peer}: {e}");
                    break;
                }
            },
        }
    }

    if !running.load(Ordering::Relaxed) {
        info!("transfer from {peer} interrupted by shutdown");
        return delivered;
    }
    if let Some(tail) = text.finish() {
        ctx.sink.deliver(peer, tail);
        delivered += 1;
    }
    if frames.pending_len() > 0 {
        debug!(
            "transfer from {peer} closed with {} byte(s) of an incomplete frame",
            frames.pending_len()
        );
    }
    delivered
}

// ── Client side ───────────────────────────────────────────────────────────────

/// An outbound transfer connection.
pub struct TransferConnection {
    stream: TcpStream,
    peer: SocketAddr,
    framing: TransferFraming,
    _guard: SessionGuard,
}

impl TransferConnection {
    /// Connects to a peer's transfer port.
    ///
    /// # Errors
    ///
    /// [`TransferError::Connect`] if the peer refuses, and
    /// [`TransferError::ConnectTimeout`] if it does not answer within
    /// `connect_timeout`.
    pub async fn connect(
        peer: SocketAddr,
        framing: TransferFraming,
        connect_timeout: Duration,
        sessions: &Arc<ActiveSessions>,
    ) -> Result<Self, TransferError> {
        let stream = match timeout(connect_timeout, TcpStream::connect(peer)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(TransferError::Connect { addr: peer, source }),
            Err(_) => return Err(TransferError::ConnectTimeout(peer)),
        };
        info!("transfer connection to {peer} established");
        Ok(Self {
            stream,
            peer,
            framing,
            _guard: sessions.enter(),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Writes one payload.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the peer closed the connection, or
    /// [`TransferError::Framing`] for an oversized length-prefixed payload.
    pub async fn send(&mut self, text: &str) -> Result<(), TransferError> {
        match self.framing {
            TransferFraming::Raw => self.stream.write_all(text.as_bytes()).await?,
            TransferFraming::LengthPrefixed => {
                let frame = encode_frame(text.as_bytes())?;
                self.stream.write_all(&frame).await?;
            }
        }
        self.stream.flush().await?;
        Ok(())
    }

    /// Half-closes the stream so the peer sees end-of-stream.
    ///
    /// # Errors
    ///
    /// Returns the OS error from the shutdown call.
    pub async fn close(mut self) -> Result<(), TransferError> {
        self.stream.shutdown().await?;
        debug!("transfer connection to {} closed", self.peer);
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::{event_channel, EventReceiver};

    #[derive(Default)]
    struct RecordingSink {
        payloads: Mutex<Vec<String>>,
    }

    impl PayloadSink for RecordingSink {
        fn deliver(&self, _from: SocketAddr, payload: String) {
            self.payloads.lock().unwrap().push(payload);
        }
    }

    impl RecordingSink {
        fn joined(&self) -> String {
            self.payloads.lock().unwrap().concat()
        }

        fn count(&self) -> usize {
            self.payloads.lock().unwrap().len()
        }
    }

    struct Harness {
        addr: SocketAddr,
        sink: Arc<RecordingSink>,
        events: EventReceiver,
        running: Arc<AtomicBool>,
        server: tokio::task::JoinHandle<()>,
    }

    async fn start(gate: Arc<dyn ApprovalGate>, framing: TransferFraming) -> Harness {
        let sink = Arc::new(RecordingSink::default());
        let (tx, events) = event_channel();
        let sessions = Arc::new(ActiveSessions::new());
        let server = TransferServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            gate,
            Arc::clone(&sink) as Arc<dyn PayloadSink>,
            framing,
            tx,
            sessions,
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let server = tokio::spawn(server.run(Arc::clone(&running)));
        Harness {
            addr,
            sink,
            events,
            running,
            server,
        }
    }

    async fn next_event(events: &mut EventReceiver) -> NodeEvent {
        timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event within 5s")
            .expect("channel open")
    }

    async fn stop(h: Harness) {
        h.running.store(false, Ordering::Relaxed);
        h.server.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_transfer_delivers_zero_bytes() {
        // Arrange
        let mut h = start(Arc::new(AutoReject), TransferFraming::Raw).await;
        let client_sessions = Arc::new(ActiveSessions::new());

        // Act
        let mut conn = TransferConnection::connect(
            h.addr,
            TransferFraming::Raw,
            Duration::from_secs(2),
            &client_sessions,
        )
        .await
        .unwrap();
        let _ = conn.send("must never be injected").await;

        // Assert
        assert!(matches!(next_event(&mut h.events).await, NodeEvent::TransferRejected { .. }));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.sink.count(), 0);
        stop(h).await;
    }

    #[tokio::test]
    async fn test_approved_raw_transfer_delivers_payload_bytes() {
        // Arrange
        let mut h = start(Arc::new(AutoApprove), TransferFraming::Raw).await;
        let client_sessions = Arc::new(ActiveSessions::new());

        // Act
        let mut conn = TransferConnection::connect(
            h.addr,
            TransferFraming::Raw,
            Duration::from_secs(2),
            &client_sessions,
        )
        .await
        .unwrap();
        conn.send("hello over tcp").await.unwrap();
        conn.close().await.unwrap();

        // Assert
        assert!(matches!(next_event(&mut h.events).await, NodeEvent::TransferAccepted { .. }));
        match next_event(&mut h.events).await {
            NodeEvent::TransferClosed { payloads, .. } => assert!(payloads >= 1),
            other => panic!("expected TransferClosed, got {other:?}"),
        }
        assert_eq!(h.sink.joined(), "hello over tcp");
        stop(h).await;
    }

    #[tokio::test]
    async fn test_length_prefixed_transfer_keeps_payload_boundaries() {
        // Arrange
        let mut h = start(Arc::new(AutoApprove), TransferFraming::LengthPrefixed).await;
        let client_sessions = Arc::new(ActiveSessions::new());

        // Act
        let mut conn = TransferConnection::connect(
            h.addr,
            TransferFraming::LengthPrefixed,
            Duration::from_secs(2),
            &client_sessions,
        )
        .await
        .unwrap();
        conn.send("first").await.unwrap();
        conn.send("second|with delimiter").await.unwrap();
        conn.close().await.unwrap();

        // Assert
        let _accepted = next_event(&mut h.events).await;
        match next_event(&mut h.events).await {
            NodeEvent::TransferClosed { payloads, .. } => assert_eq!(payloads, 2),
            other => panic!("expected TransferClosed, got {other:?}"),
        }
        assert_eq!(
            *h.sink.payloads.lock().unwrap(),
            vec!["first".to_string(), "second|with delimiter".to_string()]
        );
        stop(h).await;
    }

    #[tokio::test]
    async fn test_prompt_gate_waits_for_resolution() {
        // Arrange
        let (tx, mut events) = event_channel();
        let gate = Arc::new(PromptApprovalGate::new(tx, Duration::from_secs(5)));
        let peer: SocketAddr = "10.0.0.2:50000".parse().unwrap();

        // Act
        let waiting = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.approve(peer).await })
        };
        let request_id = match next_event(&mut events).await {
            NodeEvent::TransferPending { request_id, peer: p } => {
                assert_eq!(p, peer);
                request_id
            }
            other => panic!("expected TransferPending, got {other:?}"),
        };

        // Assert
        assert_eq!(gate.pending_ids(), vec![request_id]);
        assert!(gate.resolve(request_id, true));
        assert!(waiting.await.unwrap());
        assert!(gate.pending_ids().is_empty());
        assert!(!gate.resolve(request_id, true), "a request resolves once");
    }

    #[tokio::test]
    async fn test_prompt_gate_rejects_on_timeout() {
        let (tx, _events) = event_channel();
        let gate = PromptApprovalGate::new(tx, Duration::from_millis(50));

        assert!(!gate.approve("10.0.0.2:50000".parse().unwrap()).await);
        assert!(gate.pending_ids().is_empty());
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_reports_error() {
        // Arrange: grab a free port, then release it
        let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = reserved.local_addr().unwrap();
        drop(reserved);
        let sessions = Arc::new(ActiveSessions::new());

        // Act
        let result =
            TransferConnection::connect(addr, TransferFraming::Raw, Duration::from_secs(2), &sessions)
                .await;

        // Assert
        assert!(matches!(
            result,
            Err(TransferError::Connect { .. }) | Err(TransferError::ConnectTimeout(_))
        ));
        assert_eq!(sessions.active(), 0);
    }

    #[tokio::test]
    async fn test_active_sessions_track_open_connections() {
        let h = start(Arc::new(AutoApprove), TransferFraming::Raw).await;
        let client_sessions = Arc::new(ActiveSessions::new());

        let conn = TransferConnection::connect(
            h.addr,
            TransferFraming::Raw,
            Duration::from_secs(2),
            &client_sessions,
        )
        .await
        .unwrap();
        assert_eq!(client_sessions.active(), 1);

        conn.close().await.unwrap();
        assert_eq!(client_sessions.active(), 0);
        stop(h).await;
    }

    #[tokio::test]
    async fn test_handle_session_rejection_reads_nothing() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"queued before the decision").await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        let sink = Arc::new(RecordingSink::default());
        let (tx, mut events) = event_channel();
        let ctx = SessionContext {
            gate: Arc::new(AutoReject),
            sink: Arc::clone(&sink) as Arc<dyn PayloadSink>,
            framing: TransferFraming::Raw,
            events: tx,
            sessions: Arc::new(ActiveSessions::new()),
        };

        // Act
        let outcome = handle_session(stream, peer, &ctx, &AtomicBool::new(true)).await;

        // Assert
        assert_eq!(outcome, SessionOutcome { accepted: false, payloads: 0 });
        assert_eq!(sink.count(), 0);
        assert_eq!(ctx.sessions.active(), 0);
        assert_eq!(events.recv().await, Some(NodeEvent::TransferRejected { peer }));
    }

    #[tokio::test]
    async fn test_raw_transfer_keeps_character_split_across_writes() {
        // Arrange
        let mut h = start(Arc::new(AutoApprove), TransferFraming::Raw).await;
        let mut client = TcpStream::connect(h.addr).await.unwrap();

        // Act
        client.write_all(b"caf\xC3").await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        client.write_all(b"\xA9").await.unwrap();
        client.shutdown().await.unwrap();

        // Assert
        assert!(matches!(next_event(&mut h.events).await, NodeEvent::TransferAccepted { .. }));
        assert!(matches!(next_event(&mut h.events).await, NodeEvent::TransferClosed { .. }));
        assert_eq!(h.sink.joined(), "caf\u{e9}");
        stop(h).await;
    }

    #[tokio::test]
    async fn test_clearing_running_stops_open_session_delivery() {
        // Arrange
        let mut h = start(Arc::new(AutoApprove), TransferFraming::Raw).await;
        let mut client = TcpStream::connect(h.addr).await.unwrap();
        client.write_all(b"before").await.unwrap();
        assert!(matches!(next_event(&mut h.events).await, NodeEvent::TransferAccepted { .. }));
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while h.sink.count() == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Act
        h.running.store(false, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(600)).await;
        let _ = client.write_all(b"after-shutdown").await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Assert
        assert_eq!(*h.sink.payloads.lock().unwrap(), vec!["before".to_string()]);
        assert!(matches!(next_event(&mut h.events).await, NodeEvent::TransferClosed { .. }));
        timeout(Duration::from_secs(3), h.server)
            .await
            .expect("accept loop stops after shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_withdraws_pending_approval() {
        // Arrange: a prompt nobody answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        let (tx, _events) = event_channel();
        let sink = Arc::new(RecordingSink::default());
        let ctx = SessionContext {
            gate: Arc::new(PromptApprovalGate::new(tx.clone(), Duration::from_secs(30))),
            sink: Arc::clone(&sink) as Arc<dyn PayloadSink>,
            framing: TransferFraming::Raw,
            events: tx,
            sessions: Arc::new(ActiveSessions::new()),
        };
        let running = AtomicBool::new(true);

        // Act
        let session = handle_session(stream, peer, &ctx, &running);
        let stopper = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            running.store(false, Ordering::Relaxed);
        };
        let (outcome, ()) = timeout(Duration::from_secs(3), async { tokio::join!(session, stopper) })
            .await
            .expect("session ends soon after shutdown");

        // Assert
        assert_eq!(outcome, SessionOutcome { accepted: false, payloads: 0 });
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn test_accept_backoff_pauses_before_retry() {
        let started = tokio::time::Instant::now();

        accept_backoff(&std::io::Error::from(std::io::ErrorKind::Other)).await;

        assert!(started.elapsed() >= ACCEPT_POLL);
    }
}
