//! LanRelay node: entry point.
//!
//! Starts every service of a node and runs a small line-oriented console:
//!
//! ```text
//! lanrelay [OPTIONS]
//!
//! Options:
//!   --config <PATH>    Config file [default: platform config dir]
//!   --name <NAME>      Display name announced to peers [default: hostname]
//!   --host             Start as the group's injection target
//!   --auto-accept      Approve every inbound transfer without asking
//!   --persistent-id    Announce a stored id instead of name + host flag
//!   --write-config     Write the effective config file and exit
//! ```
//!
//! # Console commands
//!
//! | Input               | Effect                                          |
//! |---------------------|-------------------------------------------------|
//! | any other line      | Chat to every known peer                        |
//! | `/send <ip> <text>` | Open a transfer to `<ip>` and stream `<text>`   |
//! | `/host on\|off`     | Toggle the host flag announced to peers         |
//! | `/target <title>`   | Select the window injected text goes to         |
//! | `/peers`            | List known peers                                |
//! | `/accept <id>`      | Approve pending transfer `<id>`                 |
//! | `/reject <id>`      | Reject pending transfer `<id>`                  |
//! | `/quit`             | Shut down                                       |
//!
//! # Threads and tasks
//!
//! ```text
//! lanrelay-discovery-<iface>  one per bound interface (std thread)
//! lanrelay-broadcast          announcement loop       (std thread)
//! lanrelay-chat-rx            chat receive loop       (std thread)
//! lanrelay-inject             injection consumer      (std thread)
//! lanrelay-reaper             optional peer expiry    (std thread)
//! transfer accept loop + one task per session         (tokio)
//! lanrelay-console           stdin line reader       (std thread)
//! event pump, console loop, Ctrl+C watcher            (tokio)
//! ```
//!
//! All of them stop once the shared `running` flag is cleared.

use std::io::BufRead;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lanrelay_core::PeerDirectory;
use lanrelay_node::application::{
    events::{event_channel, EventReceiver, NodeEvent},
    host_role::HostRole,
    inject_text::{InjectionQueue, InputInjector},
    relay_chat::{ChatRelay, PayloadSink},
    select_target::{list_window_titles, select_target, WindowEnumerator},
};
use lanrelay_node::infrastructure::{
    input_injection::console::{ConsoleInjector, ConsoleWindows, CONSOLE_WINDOW_TITLE},
    network::{
        broadcaster::{AnnounceIdentity, Broadcaster, BroadcasterConfig},
        discovery::{self, SelfFilter},
        interfaces::enumerate_interfaces,
        message_channel::MessageChannel,
        transfer::{
            ActiveSessions, ApprovalGate, AutoApprove, PromptApprovalGate, TransferConnection,
            TransferFraming, TransferServer,
        },
    },
    storage::{
        config::{config_file_path, load_config_from, save_config_to, IdentityMode, NodeConfig},
        identity::{get_or_create_persistent_id, NODE_ID_FILE},
    },
};

const CONSOLE_POLL: Duration = Duration::from_millis(200);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// LanRelay node.
///
/// Discovers peers on the LAN, exchanges chat, accepts approved transfers,
/// and types received text into the selected target.
#[derive(Debug, Parser)]
#[command(
    name = "lanrelay",
    about = "LAN peer discovery, chat and approved text transfer",
    version
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "LANRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Display name announced to peers. Overrides `node.display_name`.
    #[arg(long, env = "LANRELAY_NAME")]
    name: Option<String>,

    /// Start as the group's injection target.
    #[arg(long)]
    host: bool,

    /// Approve every inbound transfer without asking.
    #[arg(long)]
    auto_accept: bool,

    /// Announce a stored persistent id. Overrides `node.identity`.
    #[arg(long)]
    persistent_id: bool,

    /// Write the effective config (file plus overrides) to the config path and exit.
    #[arg(long)]
    write_config: bool,
}

impl Cli {
    /// Applies command-line overrides on top of the file config.
    fn apply_to(&self, config: &mut NodeConfig) {
        if let Some(name) = &self.name {
            config.node.display_name = name.clone();
        }
        if self.persistent_id {
            config.node.identity = IdentityMode::Persistent;
        }
    }
}

// ── Console commands ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Chat(String),
    Send { ip: Ipv4Addr, text: String },
    Host(bool),
    Target(String),
    Peers,
    Accept(u64),
    Reject(u64),
    Quit,
    Empty,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(Command::Empty);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Chat(line.to_string()));
    };

    let (verb, args) = rest.split_once(' ').unwrap_or((rest, ""));
    let args = args.trim();
    match verb {
        "send" => {
            let (ip, text) = args
                .split_once(' ')
                .ok_or_else(|| "usage: /send <ip> <text>".to_string())?;
            let ip = ip
                .parse()
                .map_err(|_| format!("not an IPv4 address: {ip}"))?;
            Ok(Command::Send {
                ip,
                text: text.to_string(),
            })
        }
        "host" => match args {
            "on" => Ok(Command::Host(true)),
            "off" => Ok(Command::Host(false)),
            _ => Err("usage: /host on|off".to_string()),
        },
        "target" if !args.is_empty() => Ok(Command::Target(args.to_string())),
        "target" => Err("usage: /target <window title>".to_string()),
        "peers" => Ok(Command::Peers),
        "accept" | "reject" => {
            let id = args
                .parse()
                .map_err(|_| format!("usage: /{verb} <request id>"))?;
            Ok(if verb == "accept" {
                Command::Accept(id)
            } else {
                Command::Reject(id)
            })
        }
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(format!("unknown command /{other}")),
    }
}

// ── Wiring ────────────────────────────────────────────────────────────────────

struct Node {
    display_name: String,
    config: NodeConfig,
    directory: Arc<PeerDirectory>,
    role: Arc<HostRole>,
    sessions: Arc<ActiveSessions>,
    chat: MessageChannel,
    windows: Arc<dyn WindowEnumerator>,
    prompt: Option<Arc<PromptApprovalGate>>,
    threads: Vec<JoinHandle<()>>,
    transfer: tokio::task::JoinHandle<()>,
}

fn resolve_display_name(configured: &str) -> String {
    if !configured.trim().is_empty() {
        return configured.trim().to_string();
    }
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "lanrelay".to_string())
}

async fn start_node(
    config: NodeConfig,
    config_path: Option<PathBuf>,
    start_as_host: bool,
    auto_accept: bool,
    running: Arc<AtomicBool>,
) -> anyhow::Result<(Node, EventReceiver)> {
    let (events, event_rx) = event_channel();
    let display_name = resolve_display_name(&config.node.display_name);
    let net = &config.network;

    let persistent_id = match config.node.identity {
        IdentityMode::Hostname => None,
        IdentityMode::Persistent => {
            let dir = config_path
                .as_ref()
                .and_then(|p| p.parent().map(PathBuf::from))
                .context("persistent identity needs a config directory")?;
            let id = get_or_create_persistent_id(&dir.join(NODE_ID_FILE))
                .context("failed to load persistent node id")?;
            Some(id)
        }
    };
    info!("node {display_name} starting (id: {persistent_id:?})");

    let directory = Arc::new(PeerDirectory::new());
    let role = Arc::new(HostRole::new(start_as_host));
    let sessions = Arc::new(ActiveSessions::new());
    let mut threads = Vec::new();

    // ── Injection ─────────────────────────────────────────────────────────────
    let windows: Arc<dyn WindowEnumerator> = Arc::new(ConsoleWindows::default());
    if start_as_host {
        role.set_target(select_target(windows.as_ref(), CONSOLE_WINDOW_TITLE).ok());
    }
    let injector: Arc<dyn InputInjector> = Arc::new(ConsoleInjector::stdout());
    let (queue, consumer) = InjectionQueue::start(
        injector,
        config.injection.to_injection_config(),
        events.clone(),
        Arc::clone(&running),
    )?;
    threads.push(consumer);
    let relay = Arc::new(ChatRelay::new(&display_name, Arc::clone(&role), queue));

    // ── Discovery ─────────────────────────────────────────────────────────────
    let interfaces = enumerate_interfaces()?;
    let interface_addrs: Vec<Ipv4Addr> = interfaces.iter().map(|i| i.address).collect();
    let sockets = if net.bind_wildcard {
        vec![discovery::bind_wildcard(net.discovery_port, net.receive_timeout())?]
    } else {
        discovery::bind_interfaces(&interfaces, net.discovery_port, net.receive_timeout())?
    };

    let filter = Arc::new(SelfFilter::new(
        persistent_id.clone(),
        &display_name,
        interface_addrs.iter().copied(),
    ));
    for bound in &sockets {
        threads.push(discovery::spawn_listener(
            bound.clone(),
            Arc::clone(&directory),
            Arc::clone(&filter),
            events.clone(),
            Arc::clone(&running),
        )?);
    }

    let identity = match &persistent_id {
        Some(id) => AnnounceIdentity::Persistent { id: id.clone() },
        None => AnnounceIdentity::Hostname {
            display_name: display_name.clone(),
        },
    };
    let broadcaster = Broadcaster::new(
        sockets,
        interface_addrs,
        BroadcasterConfig {
            port: net.discovery_port,
            interval: net.broadcast_interval(),
            identity,
            suppress_while_connected: net.suppress_broadcast_while_connected,
        },
        Arc::clone(&role),
        Arc::clone(&sessions),
    );
    threads.push(broadcaster.spawn(Arc::clone(&running))?);

    if let Some(ttl) = net.peer_ttl() {
        threads.push(discovery::spawn_peer_reaper(
            Arc::clone(&directory),
            ttl,
            events.clone(),
            Arc::clone(&running),
        )?);
    }

    // ── Chat ──────────────────────────────────────────────────────────────────
    let chat = MessageChannel::bind(
        Ipv4Addr::UNSPECIFIED,
        net.message_port,
        net.message_port,
        &display_name,
        net.receive_timeout(),
    )?;
    threads.push(chat.spawn_receiver(
        events.clone(),
        Some(Arc::clone(&relay)),
        Arc::clone(&running),
    )?);

    // ── Transfer ──────────────────────────────────────────────────────────────
    let prompt = (!auto_accept).then(|| {
        Arc::new(PromptApprovalGate::new(
            events.clone(),
            config.transfer.approval_timeout(),
        ))
    });
    let gate: Arc<dyn ApprovalGate> = match &prompt {
        Some(p) => Arc::clone(p) as Arc<dyn ApprovalGate>,
        None => Arc::new(AutoApprove),
    };
    let server = TransferServer::bind(
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, net.transfer_port)),
        gate,
        relay as Arc<dyn PayloadSink>,
        config.transfer.framing,
        events,
        Arc::clone(&sessions),
    )
    .await?;
    let transfer = tokio::spawn(server.run(Arc::clone(&running)));

    Ok((
        Node {
            display_name,
            config,
            directory,
            role,
            sessions,
            chat,
            windows,
            prompt,
            threads,
            transfer,
        },
        event_rx,
    ))
}

// ── Console handling ──────────────────────────────────────────────────────────

/// Executes one console command. Returns `false` to shut down.
fn handle_command(node: &Node, command: Command) -> bool {
    match command {
        Command::Empty => {}
        Command::Chat(text) => {
            if !node.chat.broadcast_to_all_known(&node.directory, &text) {
                println!("no peers reachable yet");
            }
        }
        Command::Send { ip, text } => {
            let peer = SocketAddr::V4(SocketAddrV4::new(ip, node.config.network.transfer_port));
            let framing = node.config.transfer.framing;
            let connect_timeout = node.config.transfer.connect_timeout();
            let sessions = Arc::clone(&node.sessions);
            tokio::spawn(async move {
                if let Err(e) = send_transfer(peer, framing, connect_timeout, &sessions, &text).await
                {
                    warn!("transfer to {peer} failed: {e}");
                }
            });
        }
        Command::Host(on) => {
            node.role.set_host(on);
            println!("host mode {}", if on { "on" } else { "off" });
        }
        Command::Target(title) => match select_target(node.windows.as_ref(), &title) {
            Ok(target) => {
                println!("injecting into {:?}", target.window.title);
                node.role.set_target(Some(target));
            }
            Err(e) => println!(
                "{e}; available: {:?}",
                list_window_titles(node.windows.as_ref())
            ),
        },
        Command::Peers => {
            let peers = node.directory.list();
            if peers.is_empty() {
                println!("no peers yet");
            }
            let hosts = node.directory.hosts();
            if !hosts.is_empty() {
                println!("host: {}", hosts.join(", "));
            }
            for p in peers {
                println!(
                    "{:<24} {:<15} {}",
                    p.display_name,
                    p.address,
                    if p.is_host { "host" } else { "" }
                );
            }
        }
        Command::Accept(id) => resolve_transfer(node, id, true),
        Command::Reject(id) => resolve_transfer(node, id, false),
        Command::Quit => return false,
    }
    true
}

fn resolve_transfer(node: &Node, id: u64, accept: bool) {
    match &node.prompt {
        Some(gate) if gate.resolve(id, accept) => {}
        Some(_) => println!("no pending transfer {id}"),
        None => println!("transfers are auto-accepted"),
    }
}

async fn send_transfer(
    peer: SocketAddr,
    framing: TransferFraming,
    connect_timeout: Duration,
    sessions: &Arc<ActiveSessions>,
    text: &str,
) -> anyhow::Result<()> {
    let mut conn = TransferConnection::connect(peer, framing, connect_timeout, sessions).await?;
    conn.send(text).await?;
    conn.close().await?;
    info!("sent {} byte(s) to {peer}", text.len());
    Ok(())
}

/// Forwards stdin lines from a dedicated thread.
fn spawn_stdin_reader() -> anyhow::Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("lanrelay-console".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("stdin read error: {e}");
                        break;
                    }
                }
            }
        })
        .context("failed to spawn console thread")?;
    Ok(rx)
}

async fn run_console(
    node: &Node,
    mut lines: mpsc::UnboundedReceiver<String>,
    running: &AtomicBool,
) {
    while running.load(Ordering::Relaxed) {
        match tokio::time::timeout(CONSOLE_POLL, lines.recv()).await {
            Ok(Some(line)) => match parse_command(&line) {
                Ok(cmd) => {
                    if !handle_command(node, cmd) {
                        break;
                    }
                }
                Err(msg) => println!("{msg}"),
            },
            Ok(None) => {
                info!("stdin closed; running until Ctrl+C");
                while running.load(Ordering::Relaxed) {
                    tokio::time::sleep(CONSOLE_POLL).await;
                }
            }
            Err(_) => {}
        }
    }
}

fn log_event(event: &NodeEvent) {
    match event {
        NodeEvent::PeerJoined { peer } => {
            info!("peer joined: {} ({})", peer.display_name, peer.address)
        }
        NodeEvent::HostStatusChanged {
            display_name,
            is_host,
            ..
        } => info!("{display_name} is {}the host", if *is_host { "" } else { "no longer " }),
        NodeEvent::PeerLeft { peer } => info!("peer left: {}", peer.display_name),
        NodeEvent::ChatReceived {
            sender, content, ..
        } => println!("<{sender}> {content}"),
        NodeEvent::TransferPending { request_id, peer } => println!(
            "transfer request {request_id} from {peer}: /accept {request_id} or /reject {request_id}"
        ),
        NodeEvent::TransferAccepted { peer } => info!("transfer from {peer} accepted"),
        NodeEvent::TransferRejected { peer } => info!("transfer from {peer} rejected"),
        NodeEvent::TransferClosed { peer, payloads } => {
            info!("transfer from {peer} closed after {payloads} payload(s)")
        }
        NodeEvent::InjectionOutcome(o) if o.success => {
            info!("injected job {} in {} attempt(s)", o.job_id, o.attempts)
        }
        NodeEvent::InjectionOutcome(o) => warn!(
            "injection job {} failed: {}",
            o.job_id,
            o.last_error.as_deref().unwrap_or("unknown error")
        ),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(p) => Some(p.clone()),
        None => config_file_path().ok(),
    };
    let mut config = match &config_path {
        Some(path) => load_config_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => NodeConfig::default(),
    };
    cli.apply_to(&mut config);

    if cli.write_config {
        let path = config_path.context("no config location; pass --config <PATH>")?;
        save_config_to(&config, &path)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.node.log_level)),
        )
        .init();

    let running = Arc::new(AtomicBool::new(true));

    let (node, mut event_rx) = start_node(
        config,
        config_path,
        cli.host,
        cli.auto_accept,
        Arc::clone(&running),
    )
    .await?;
    info!(
        "{} ready: discovery {}, chat {}, transfer {}",
        node.display_name,
        node.config.network.discovery_port,
        node.config.network.message_port,
        node.config.network.transfer_port
    );

    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    let pump = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            log_event(&event);
        }
    });

    let lines = spawn_stdin_reader()?;
    run_console(&node, lines, &running).await;

    // ── Shutdown ──────────────────────────────────────────────────────────────
    running.store(false, Ordering::Relaxed);
    let Node {
        threads, transfer, ..
    } = node;
    if let Err(e) = transfer.await {
        error!("transfer listener task failed: {e}");
    }
    tokio::task::spawn_blocking(move || {
        for handle in threads {
            if handle.join().is_err() {
                error!("a service thread panicked");
            }
        }
    })
    .await?;
    pump.abort();

    info!("lanrelay stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
