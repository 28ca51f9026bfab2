//! Client accept loop and per-session tasks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, mpsc, watch};

use dimensions_config::Config;
use dimensions_net::{
    ChatText, Frame, FrameConfig, FrameError, PacketType, Rgb, read_frame, write_frame,
};
use dimensions_proxy::{
    Backend, ChannelSink, Command, CommandDispatcher, Notice, RoutingDirectory, Session,
    SessionId, TransportError, disconnect, parse_command,
};

use crate::error::ServerError;
use crate::link::connect_backend;

/// Atomic generator for monotonically increasing [`SessionId`]s.
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> SessionId {
        SessionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Error returned when the connection map is at capacity.
#[derive(Debug)]
pub struct ConnectionLimitReached;

/// Live client connections keyed by session.
pub struct ConnectionMap {
    inner: RwLock<HashMap<SessionId, SocketAddr>>,
    max_connections: usize,
}

impl ConnectionMap {
    /// Create a new map with the given capacity limit.
    pub fn new(max_connections: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    /// Insert a connection. Returns `Err` if the map is at capacity.
    pub async fn insert(
        &self,
        id: SessionId,
        peer: SocketAddr,
    ) -> Result<(), ConnectionLimitReached> {
        let mut map = self.inner.write().await;
        if map.len() >= self.max_connections {
            return Err(ConnectionLimitReached);
        }
        map.insert(id, peer);
        Ok(())
    }

    pub async fn remove(&self, id: &SessionId) -> Option<SocketAddr> {
        self.inner.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

/// Runtime settings for [`ProxyServer`], resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind to. Default: `0.0.0.0:7777`.
    pub bind_addr: String,
    /// Maximum concurrent clients. Default: 256.
    pub max_connections: usize,
    /// Dimension new clients are bound to.
    pub default_dimension: String,
    /// Chat command marker.
    pub marker: char,
    /// Delay before the `who` reply.
    pub who_delay: Duration,
    /// Frame limits on both hops.
    pub frame: FrameConfig,
}

impl ProxyConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bind_addr: config.listen.socket_address(),
            max_connections: config.listen.max_connections,
            default_dimension: config.default_dimension.to_lowercase(),
            marker: config.commands.marker,
            who_delay: config.commands.who_reply_delay(),
            frame: FrameConfig::default(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Build the routing directory from the configured dimensions, in order.
pub fn build_directory(config: &Config) -> Result<RoutingDirectory, ServerError> {
    let mut directory = RoutingDirectory::new();
    for dimension in &config.dimensions {
        directory.insert(Backend::new(&dimension.name, dimension.address.clone()))?;
    }
    Ok(directory)
}

/// State shared by every session task.
struct Shared {
    config: ProxyConfig,
    default_backend: Arc<Backend>,
    dispatcher: CommandDispatcher,
}

/// TCP proxy that binds clients to dimensions and relays their traffic.
pub struct ProxyServer {
    shared: Arc<Shared>,
    /// Active connection map (public for test inspection).
    pub connections: Arc<ConnectionMap>,
    id_gen: Arc<IdGenerator>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ProxyServer {
    /// Create a server routing over `directory`.
    pub fn new(config: ProxyConfig, directory: Arc<RoutingDirectory>) -> Result<Self, ServerError> {
        let default_backend = directory
            .get(&config.default_dimension)
            .cloned()
            .ok_or_else(|| ServerError::UnknownDimension(config.default_dimension.clone()))?;
        let dispatcher = CommandDispatcher::new(directory)
            .with_marker(config.marker)
            .with_who_delay(config.who_delay);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            connections: Arc::new(ConnectionMap::new(config.max_connections)),
            shared: Arc::new(Shared {
                config,
                default_backend,
                dispatcher,
            }),
            id_gen: Arc::new(IdGenerator::new()),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Validate `config` and build a server for it.
    pub fn from_config(config: &Config) -> Result<Self, ServerError> {
        config.validate()?;
        let directory = build_directory(config)?;
        Self::new(ProxyConfig::from_config(config), Arc::new(directory))
    }

    pub fn directory(&self) -> &Arc<RoutingDirectory> {
        self.shared.dispatcher.directory()
    }

    /// Bind to the configured address and run the accept loop.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.shared.config.bind_addr).await?;
        tracing::info!("Proxy listening on {}", self.shared.config.bind_addr);
        self.run_with_listener(listener).await
    }

    /// Run the accept loop with a pre-bound listener (useful for tests).
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer_addr) = result?;
                    stream.set_nodelay(true)?;

                    let id = self.id_gen.next_id();
                    if self.connections.insert(id, peer_addr).await.is_err() {
                        tracing::warn!("Connection limit reached, rejecting {peer_addr}");
                        continue;
                    }

                    tracing::info!(session = %id, "Accepted client from {peer_addr}");

                    let shared = Arc::clone(&self.shared);
                    let connections = Arc::clone(&self.connections);
                    let task_shutdown = self.shutdown_rx.clone();

                    tokio::spawn(async move {
                        serve_client(id, stream, &shared, task_shutdown).await;
                        connections.remove(&id).await;
                        tracing::info!(session = %id, "Client disconnected");
                    });
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::info!("Proxy shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Signal the server and every session to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Drive one client until it disconnects or the server shuts down.
async fn serve_client(
    id: SessionId,
    stream: TcpStream,
    shared: &Shared,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let frame_config = &shared.config.frame;
    let (reader, writer) = stream.into_split();

    let (sink, outbound) = ChannelSink::channel();
    let writer_task = tokio::spawn(client_write_loop(writer, outbound, frame_config.clone()));
    let (inbound_tx, mut inbound) = mpsc::unbounded_channel();
    let reader_task = tokio::spawn(client_read_loop(reader, inbound_tx, frame_config.clone()));

    let mut session = Session::new(id, Arc::clone(&shared.default_backend), Arc::new(sink));
    ensure_link(&mut session, frame_config).await;

    loop {
        tokio::select! {
            frame = inbound.recv() => {
                let Some(frame) = frame else { break };
                handle_client_frame(&mut session, frame, shared);
            }
            event = session.next_backend_event() => {
                session.apply_backend_event(event);
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
        ensure_link(&mut session, frame_config).await;
    }

    reader_task.abort();
    drop(session);
    // Finishes once every queued frame is flushed and the last sink handle
    // (a pending `who` reply may hold one) is gone.
    let _ = writer_task.await;
}

/// Route one client frame: chat commands go to the dispatcher, everything
/// else (including unhandled commands) goes to the backend.
fn handle_client_frame(session: &mut Session, frame: Frame, shared: &Shared) {
    if frame.packet_type == PacketType::CHAT_TEXT
        && let Ok(chat) = ChatText::decode(&frame.payload)
        && Command::is_command(&chat.text, shared.config.marker)
        && let Some(command) = parse_command(&chat.text, shared.config.marker)
        && shared.dispatcher.handle(&command, session)
    {
        return;
    }

    let sent = frame
        .to_bytes()
        .map_err(TransportError::from)
        .and_then(|bytes| session.send_to_backend(bytes));
    if let Err(e) = sent {
        tracing::debug!(session = %session.id(), error = %e, "client frame dropped");
    }
}

/// Connect the session's current backend if it is bound without a link,
/// as it is right after joining or switching dimensions.
async fn ensure_link(session: &mut Session, frame_config: &FrameConfig) {
    if !session.is_bound() || session.has_link() {
        return;
    }

    let backend = Arc::clone(session.backend());
    match connect_backend(&backend, frame_config).await {
        Ok(link) => {
            tracing::info!(session = %session.id(), backend = backend.name(), "bound to dimension");
            session.attach_link(link);
        }
        Err(e) => {
            tracing::warn!(
                session = %session.id(),
                backend = backend.name(),
                error = %e,
                "backend unreachable"
            );
            session.notify(Notice::colored(
                format!("The {} Dimension is unreachable.", backend.display_name()),
                Rgb::RED,
            ));
            disconnect(session);
        }
    }
}

async fn client_read_loop(
    mut reader: OwnedReadHalf,
    inbound: mpsc::UnboundedSender<Frame>,
    config: FrameConfig,
) {
    loop {
        match read_frame(&mut reader, &config).await {
            Ok(frame) => {
                if inbound.send(frame).is_err() {
                    break;
                }
            }
            Err(FrameError::ConnectionClosed) => break,
            Err(e) => {
                tracing::debug!(error = %e, "client read failed");
                break;
            }
        }
    }
}

async fn client_write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    config: FrameConfig,
) {
    while let Some(bytes) = outbound.recv().await {
        if let Err(e) = write_frame(&mut writer, &bytes, &config).await {
            tracing::debug!(error = %e, "client write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}
