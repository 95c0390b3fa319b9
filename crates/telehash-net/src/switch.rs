//! The switch: UDP socket, reactor task, and session tables
//!
//! One reactor task owns the socket, the line and pending-open tables,
//! and the drain side of the write queue. Application threads reach it
//! only through a bounded command channel; pushing a command is the
//! "wake" that corresponds to enqueueing a packet. Everything that
//! mutates session state runs on the reactor, so no state needs locking
//! beyond the read-mostly views shared with applications.

use crate::channel::{Channel, ChannelHandler, ChannelPacket};
use crate::line::{self, Line, LineKeys};
use crate::open::{self, OpenError, ParsedOpen};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use telehash_core::crypto::{Crypto, CryptoError, EcSecretKey};
use telehash_core::types::{ChannelId, Hashname, LineId, IV_SIZE};
use telehash_core::{crypto, packet, Identity, Node, PacketError};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Default UDP port.
pub const DEFAULT_PORT: u16 = 42424;

/// Receive buffer size; comfortably above the recommended datagram bound.
const RECV_BUFFER_SIZE: usize = 2048;

/// Switch errors surfaced to applications, completions, and channel
/// handlers.
#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("failed to start switch: {0}")]
    Start(#[from] std::io::Error),
    #[error("open timed out")]
    OpenTimeout,
    #[error("line replaced by a newer open")]
    LineReplaced,
    #[error("line idle for too long")]
    LineIdle,
    #[error("switch stopped")]
    SwitchStopped,
    #[error("write queue full")]
    Backpressure,
    #[error("node has no known endpoint")]
    NoEndpoint,
    #[error("no such line")]
    UnknownLine,
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Open(#[from] OpenError),
}

/// At-most-once completion for an open attempt, invoked on the reactor.
pub type OpenCallback = Box<dyn FnOnce(Result<Line, SwitchError>) + Send + 'static>;

/// Factory producing a handler for an inbound channel of a registered
/// type.
pub type ChannelFactory = Box<dyn Fn(&Channel) -> Box<dyn ChannelHandler> + Send + Sync>;

pub(crate) enum Command {
    OpenLine {
        node: Node,
        completion: OpenCallback,
    },
    OpenChannel {
        line_in: LineId,
        channel: ChannelId,
        kind: String,
        handler: Box<dyn ChannelHandler>,
    },
    ChannelSend {
        line_in: LineId,
        channel: ChannelId,
        fields: Map<String, Value>,
        body: Vec<u8>,
        end: bool,
    },
}

pub(crate) fn map_send_error<T>(err: mpsc::error::TrySendError<T>) -> SwitchError {
    match err {
        mpsc::error::TrySendError::Full(_) => SwitchError::Backpressure,
        mpsc::error::TrySendError::Closed(_) => SwitchError::SwitchStopped,
    }
}

/// Switch tunables.
#[derive(Clone, Debug)]
pub struct SwitchConfig {
    /// UDP listen address.
    pub listen: SocketAddr,
    /// How long an outstanding open waits for a matching reply.
    pub open_timeout: Duration,
    /// Idle cutoff for established lines; inbound traffic resets it.
    pub idle_timeout: Duration,
    /// Depth of the bounded command/write queue.
    pub queue_depth: usize,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            open_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            queue_depth: 256,
        }
    }
}

struct Shared {
    commands: mpsc::Sender<Command>,
    shutdown: broadcast::Sender<()>,
    lines: RwLock<HashMap<Hashname, Line>>,
    channel_types: RwLock<HashMap<String, ChannelFactory>>,
    local_addr: SocketAddr,
    hashname: Hashname,
    seeds: Vec<Node>,
}

/// The per-process switch handle. Cheap to clone.
#[derive(Clone)]
pub struct Switch {
    shared: Arc<Shared>,
}

impl Switch {
    /// Bind the UDP socket and spawn the reactor. Returns once the
    /// reactor is running.
    pub async fn start(
        config: SwitchConfig,
        identity: Identity,
        seeds: Vec<Node>,
        crypto: Crypto,
    ) -> Result<Self, SwitchError> {
        let socket = UdpSocket::bind(config.listen).await?;
        let local_addr = socket.local_addr()?;

        let (command_tx, command_rx) = mpsc::channel(config.queue_depth);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let shared = Arc::new(Shared {
            commands: command_tx,
            shutdown: shutdown_tx,
            lines: RwLock::new(HashMap::new()),
            channel_types: RwLock::new(HashMap::new()),
            local_addr,
            hashname: identity.hashname(),
            seeds,
        });

        info!(
            addr = %local_addr,
            hashname = %identity.hashname().short(),
            "switch started"
        );

        let reactor = Reactor {
            config,
            crypto,
            identity,
            shared: shared.clone(),
            outbound: VecDeque::new(),
            pending: HashMap::new(),
            lines: HashMap::new(),
            by_hashname: HashMap::new(),
            last_open_at: HashMap::new(),
        };
        tokio::spawn(reactor.run(socket, command_rx, shutdown_rx));

        Ok(Self { shared })
    }

    /// Request shutdown. Idempotent and non-blocking; the reactor drains
    /// outstanding completions and channels with
    /// [`SwitchError::SwitchStopped`].
    pub fn stop(&self) {
        let _ = self.shared.shutdown.send(());
    }

    pub fn hashname(&self) -> Hashname {
        self.shared.hashname
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    pub fn seeds(&self) -> &[Node] {
        &self.shared.seeds
    }

    /// Look up the established line to a peer, if any.
    pub fn line(&self, hashname: &Hashname) -> Option<Line> {
        self.shared.lines.read().get(hashname).cloned()
    }

    /// Register a factory for inbound channels of the given type.
    pub fn register_channel_type(&self, kind: impl Into<String>, factory: ChannelFactory) {
        self.shared.channel_types.write().insert(kind.into(), factory);
    }

    /// Begin an open handshake towards `node`.
    ///
    /// The completion fires exactly once on the reactor, with the
    /// established [`Line`] or the failure. Non-blocking: returns
    /// [`SwitchError::Backpressure`] when the command queue is full.
    pub fn open_line(&self, node: Node, completion: OpenCallback) -> Result<(), SwitchError> {
        self.shared
            .commands
            .try_send(Command::OpenLine { node, completion })
            .map_err(map_send_error)
    }

    /// Async convenience over [`Switch::open_line`].
    pub async fn connect(&self, node: Node) -> Result<Line, SwitchError> {
        let (tx, rx) = oneshot::channel();
        self.open_line(
            node,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        )?;
        rx.await.map_err(|_| SwitchError::SwitchStopped)?
    }
}

struct PendingOpen {
    node: Node,
    ec_secret: EcSecretKey,
    line: LineId,
    at: u64,
    deadline: Instant,
    completions: Vec<OpenCallback>,
}

struct ChannelState {
    kind: String,
    handler: Box<dyn ChannelHandler>,
    next_seq: u64,
    announce: bool,
}

struct LineState {
    remote: Node,
    line_in: LineId,
    line_out: LineId,
    keys: LineKeys,
    channels: HashMap<ChannelId, ChannelState>,
    last_recv: Instant,
}

struct Reactor {
    config: SwitchConfig,
    crypto: Crypto,
    identity: Identity,
    shared: Arc<Shared>,
    outbound: VecDeque<(SocketAddr, Vec<u8>)>,
    /// Outstanding opens, keyed by destination hashname. The line
    /// identifier we chose lives inside the entry.
    pending: HashMap<Hashname, PendingOpen>,
    /// Established lines, keyed by our line identifier for inbound
    /// demultiplexing.
    lines: HashMap<LineId, LineState>,
    by_hashname: HashMap<Hashname, LineId>,
    /// Greatest accepted open time per sender, for replay rejection.
    last_open_at: HashMap<Hashname, u64>,
}

async fn send_front(
    socket: &UdpSocket,
    outbound: &VecDeque<(SocketAddr, Vec<u8>)>,
) -> std::io::Result<()> {
    match outbound.front() {
        Some((dest, bytes)) => socket.send_to(bytes, *dest).await.map(|_| ()),
        // unreachable under the branch guard
        None => std::future::pending().await,
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl Reactor {
    async fn run(
        mut self,
        socket: UdpSocket,
        mut commands: mpsc::Receiver<Command>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut sweep = tokio::time::interval(Duration::from_millis(100));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                sent = send_front(&socket, &self.outbound), if !self.outbound.is_empty() => {
                    if let Err(e) = sent {
                        warn!("datagram send failed: {e}");
                    }
                    self.outbound.pop_front();
                },
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => self.on_datagram(&buf[..len], from),
                    Err(e) => {
                        error!("socket receive failed: {e}");
                        break;
                    }
                },
                _ = sweep.tick() => self.on_sweep(Instant::now()),
            }
        }

        self.teardown();
        // socket and channels close on drop, on every exit path
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::OpenLine { node, completion } => self.on_open_line(node, completion),
            Command::OpenChannel {
                line_in,
                channel,
                kind,
                handler,
            } => self.on_open_channel(line_in, channel, kind, handler),
            Command::ChannelSend {
                line_in,
                channel,
                fields,
                body,
                end,
            } => self.on_channel_send(line_in, channel, fields, body, end),
        }
    }

    fn on_open_line(&mut self, node: Node, completion: OpenCallback) {
        let Some(endpoint) = node.endpoint() else {
            completion(Err(SwitchError::NoEndpoint));
            return;
        };
        let hashname = node.hashname();

        // an open is already in flight: share its outcome rather than
        // emitting a second open with reused material
        if let Some(p) = self.pending.get_mut(&hashname) {
            p.completions.push(completion);
            return;
        }

        let (ec_secret, ec_public) = self.crypto.generate_ec_keypair();
        let line = LineId::new(self.crypto.random_array());
        let at = unix_millis();

        match open::render(&self.crypto, &self.identity, &node, &ec_public, at, line) {
            Ok(bytes) => {
                debug!(peer = %hashname.short(), "sending open");
                self.outbound.push_back((endpoint, bytes));
                self.pending.insert(
                    hashname,
                    PendingOpen {
                        node,
                        ec_secret,
                        line,
                        at,
                        deadline: Instant::now() + self.config.open_timeout,
                        completions: vec![completion],
                    },
                );
            }
            Err(e) => completion(Err(e.into())),
        }
    }

    fn on_open_channel(
        &mut self,
        line_in: LineId,
        channel: ChannelId,
        kind: String,
        mut handler: Box<dyn ChannelHandler>,
    ) {
        match self.lines.get_mut(&line_in) {
            Some(state) => {
                state.channels.insert(
                    channel,
                    ChannelState {
                        kind,
                        handler,
                        next_seq: 0,
                        announce: true,
                    },
                );
            }
            None => handler.handle_error(SwitchError::UnknownLine),
        }
    }

    fn on_channel_send(
        &mut self,
        line_in: LineId,
        channel: ChannelId,
        fields: Map<String, Value>,
        body: Vec<u8>,
        end: bool,
    ) {
        let iv = self.crypto.random_array::<IV_SIZE>();
        let Some(state) = self.lines.get_mut(&line_in) else {
            warn!(line = %line_in, "send on unknown line");
            return;
        };
        let Some(ch) = state.channels.get_mut(&channel) else {
            warn!(channel = %channel, "send on unknown channel");
            return;
        };

        let packet = ChannelPacket {
            channel,
            kind: ch.announce.then(|| ch.kind.clone()),
            seq: Some(ch.next_seq),
            end,
            fields,
            body,
        };
        ch.next_seq += 1;
        ch.announce = false;

        let inner = match packet.render() {
            Ok(inner) => inner,
            Err(e) => {
                warn!("channel packet render failed: {e}");
                return;
            }
        };
        let rendered = match line::render(&state.line_out, &state.keys.encrypt, iv, &inner) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!("line packet render failed: {e}");
                return;
            }
        };
        let Some(endpoint) = state.remote.endpoint() else {
            warn!(peer = %state.remote.hashname().short(), "line has no endpoint");
            return;
        };
        self.outbound.push_back((endpoint, rendered));
        if end {
            state.channels.remove(&channel);
        }
    }

    fn on_datagram(&mut self, data: &[u8], from: SocketAddr) {
        debug!(%from, len = data.len(), "datagram received");
        let (header, body) = match packet::split(data) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(%from, "dropping datagram: {e}");
                return;
            }
        };
        match packet::header_type(&header) {
            Ok(open::OPEN_TYPE) => self.on_open(&header, body, from),
            Ok(line::LINE_TYPE) => self.on_line(&header, body, from),
            Ok(other) => {
                warn!(%from, "{}", PacketError::UnknownType(other.to_string()));
            }
            Err(e) => warn!(%from, "dropping datagram: {e}"),
        }
    }

    fn on_open(&mut self, header: &Map<String, Value>, body: &[u8], from: SocketAddr) {
        let parsed = match open::parse(&self.identity, header, body, from, unix_millis(), |hn| {
            self.last_open_at.get(hn).copied()
        }) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(%from, "rejected open: {e}");
                return;
            }
        };

        let hashname = parsed.source.hashname();
        self.last_open_at.insert(hashname, parsed.at);

        match self.pending.remove(&hashname) {
            Some(pending) => {
                self.establish(parsed, pending.ec_secret, pending.line, pending.completions);
            }
            None => {
                // unsolicited: answer with our own open before the line
                // exists on both sides, making the handshake symmetric
                let (ec_secret, ec_public) = self.crypto.generate_ec_keypair();
                let line = LineId::new(self.crypto.random_array());
                let at = unix_millis();
                match open::render(
                    &self.crypto,
                    &self.identity,
                    &parsed.source,
                    &ec_public,
                    at,
                    line,
                ) {
                    Ok(bytes) => {
                        debug!(peer = %hashname.short(), "answering unsolicited open");
                        self.outbound.push_back((from, bytes));
                        self.establish(parsed, ec_secret, line, Vec::new());
                    }
                    Err(e) => warn!(%from, "failed to answer open: {e}"),
                }
            }
        }
    }

    fn establish(
        &mut self,
        parsed: ParsedOpen,
        ec_secret: EcSecretKey,
        line_in: LineId,
        completions: Vec<OpenCallback>,
    ) {
        let hashname = parsed.source.hashname();

        // a newer open supersedes any existing line with this peer
        if let Some(old) = self.by_hashname.get(&hashname).copied() {
            self.teardown_line(old, || SwitchError::LineReplaced);
        }

        let shared_secret = crypto::ecdh_shared_secret(&ec_secret, &parsed.ec_public);
        let keys = line::derive_line_keys(&shared_secret, &parsed.line, &line_in);
        let handle = Line {
            remote: parsed.source.clone(),
            line_in,
            commands: self.shared.commands.clone(),
        };
        let state = LineState {
            remote: parsed.source,
            line_in,
            line_out: parsed.line,
            keys,
            channels: HashMap::new(),
            last_recv: Instant::now(),
        };

        info!(peer = %hashname.short(), line = %line_in, "line established");
        self.lines.insert(line_in, state);
        self.by_hashname.insert(hashname, line_in);
        self.shared.lines.write().insert(hashname, handle.clone());

        for completion in completions {
            completion(Ok(handle.clone()));
        }
    }

    fn on_line(&mut self, header: &Map<String, Value>, body: &[u8], from: SocketAddr) {
        let envelope = match line::parse_header(header) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%from, "dropping line packet: {e}");
                return;
            }
        };
        let Some(state) = self.lines.get_mut(&envelope.line) else {
            warn!(%from, line = %envelope.line, "line packet for unknown line");
            return;
        };
        state.last_recv = Instant::now();

        let inner = line::decrypt(&state.keys.decrypt, &envelope, body);
        let packet = match ChannelPacket::parse(&inner) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(peer = %state.remote.hashname().short(), "undecipherable line packet: {e}");
                return;
            }
        };

        let channel_id = packet.channel;
        let end = packet.end;
        if let Some(ch) = state.channels.get_mut(&channel_id) {
            ch.handler.handle_incoming(packet);
            if end {
                state.channels.remove(&channel_id);
            }
            return;
        }

        // unknown channel: only a typed first packet may open one
        let Some(kind) = packet.kind.clone() else {
            warn!(channel = %channel_id, "packet for unknown channel without type");
            return;
        };
        let factories = self.shared.channel_types.read();
        let Some(factory) = factories.get(&kind) else {
            warn!(%kind, "no handler registered for inbound channel type");
            return;
        };
        let handle = Channel {
            line_in: state.line_in,
            id: channel_id,
            kind: kind.clone(),
            commands: self.shared.commands.clone(),
        };
        let mut handler = factory(&handle);
        drop(factories);

        debug!(%kind, channel = %channel_id, "inbound channel opened");
        handler.handle_incoming(packet);
        if !end {
            state.channels.insert(
                channel_id,
                ChannelState {
                    kind,
                    handler,
                    next_seq: 0,
                    announce: false,
                },
            );
        }
    }

    fn on_sweep(&mut self, now: Instant) {
        let expired: Vec<Hashname> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(hashname, _)| *hashname)
            .collect();
        for hashname in expired {
            if let Some(pending) = self.pending.remove(&hashname) {
                debug!(
                    peer = %pending.node.hashname().short(),
                    at = pending.at,
                    "open timed out"
                );
                for completion in pending.completions {
                    completion(Err(SwitchError::OpenTimeout));
                }
            }
        }

        let idle: Vec<LineId> = self
            .lines
            .iter()
            .filter(|(_, s)| now.duration_since(s.last_recv) >= self.config.idle_timeout)
            .map(|(line_in, _)| *line_in)
            .collect();
        for line_in in idle {
            debug!(line = %line_in, "line idle timeout");
            self.teardown_line(line_in, || SwitchError::LineIdle);
        }
    }

    fn teardown_line(&mut self, line_in: LineId, reason: impl Fn() -> SwitchError) {
        let Some(mut state) = self.lines.remove(&line_in) else {
            return;
        };
        let hashname = state.remote.hashname();
        if self.by_hashname.get(&hashname) == Some(&line_in) {
            self.by_hashname.remove(&hashname);
        }
        {
            let mut lines = self.shared.lines.write();
            if lines.get(&hashname).map(|l| l.line_in) == Some(line_in) {
                lines.remove(&hashname);
            }
        }
        for channel in state.channels.values_mut() {
            channel.handler.handle_error(reason());
        }
    }

    fn teardown(&mut self) {
        info!("switch stopping");
        for (_, pending) in self.pending.drain() {
            for completion in pending.completions {
                completion(Err(SwitchError::SwitchStopped));
            }
        }
        let line_ids: Vec<LineId> = self.lines.keys().copied().collect();
        for line_in in line_ids {
            self.teardown_line(line_in, || SwitchError::SwitchStopped);
        }
        self.shared.lines.write().clear();
    }
}
