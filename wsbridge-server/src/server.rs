//! TCP server implementation.

use crate::config::Config;
use crate::error::ServerError;
use crate::handler::MessageHandler;
use crate::http::{HttpConnection, RequestHead, DEFAULT_MAX_HEADER_BYTES};
use crate::session::{Session, SessionState};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use wsbridge_protocol::{upgrade, FrameCodec, WebSocket};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Time allowed for the request head to arrive (`None` = no limit).
    pub handshake_timeout: Option<Duration>,
    /// Maximum size of the HTTP request head.
    pub max_header_bytes: usize,
    /// Codec used on upgraded connections.
    pub codec: FrameCodec,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], crate::config::DEFAULT_PORT)),
            max_connections: 1000,
            handshake_timeout: Some(Duration::from_secs(10)),
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            codec: FrameCodec::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Builds server settings from a loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            max_connections: config.network.max_connections,
            handshake_timeout: config.network.handshake_timeout(),
            max_header_bytes: config.network.max_header_bytes,
            codec: config.websocket.codec(),
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_codec(mut self, codec: FrameCodec) -> Self {
        self.codec = codec;
        self
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub handshakes_failed: AtomicU64,
    pub messages_received: AtomicU64,
    pub messages_sent: AtomicU64,
    pub errors_total: AtomicU64,
}

/// WebSocket server: accepts TCP connections, upgrades them and hands each
/// message to a [`MessageHandler`].
pub struct Server {
    config: ServerConfig,
    handler: Arc<dyn MessageHandler>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server.
    pub fn new(config: ServerConfig, handler: Arc<dyn MessageHandler>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            handler,
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and runs the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Runs the accept loop on an already bound listener until
    /// [`Server::shutdown`] is called.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        self.running.store(true, Ordering::SeqCst);

        tracing::info!("Server listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                                continue;
                            }

                            if let Err(e) = tcp_stream.set_nodelay(true) {
                                tracing::debug!("[{}] Failed to set TCP_NODELAY: {}", addr, e);
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let handler = self.handler.clone();
                            let stats = self.stats.clone();
                            let config = self.config.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                let result = Self::handle_connection(
                                    tcp_stream,
                                    addr,
                                    handler,
                                    stats.clone(),
                                    &config,
                                    &mut conn_shutdown,
                                )
                                .await;

                                if let Err(e) = result {
                                    if e.is_client_fault() {
                                        tracing::debug!("Connection {} error: {}", addr, e);
                                    } else {
                                        tracing::warn!("Connection {} error: {}", addr, e);
                                    }
                                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                tracing::info!("Client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Serves one connection: reads the upgrade request, switches protocols
    /// and runs the message loop until the peer goes away.
    async fn handle_connection<S>(
        stream: S,
        addr: SocketAddr,
        handler: Arc<dyn MessageHandler>,
        stats: Arc<ServerStats>,
        config: &ServerConfig,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut session = Session::new(addr);
        tracing::info!("Client connected: {} (session {})", addr, session.id);

        let mut conn = HttpConnection::new(stream, config.max_header_bytes);

        let head = tokio::select! {
            result = Self::read_head(&mut conn, config.handshake_timeout) => result,
            _ = shutdown.recv() => Err(ServerError::ShuttingDown),
        };
        let head = match head {
            Ok(head) => head,
            Err(e) => {
                stats.handshakes_failed.fetch_add(1, Ordering::Relaxed);
                Self::reject(&mut conn, &e, addr).await;
                return Err(e);
            }
        };

        let upgraded = match upgrade(&head, Some(&mut conn)).await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                let e = ServerError::from(e);
                stats.handshakes_failed.fetch_add(1, Ordering::Relaxed);
                Self::reject(&mut conn, &e, addr).await;
                return Err(e);
            }
        };

        session.open(head.target.as_str());
        tracing::debug!("[{}] Upgraded {} {}", addr, head.method, head.target);
        handler.on_open(&session);

        let mut ws = WebSocket::with_codec(upgraded, config.codec);
        let result =
            Self::message_loop(&mut ws, &session, handler.as_ref(), &stats, shutdown).await;

        session.set_state(SessionState::Closing);
        handler.on_close(&session);
        tracing::debug!(
            "[{}] Session {} closed after {:?}: {} messages in, {} out",
            addr,
            session.id,
            session.age(),
            session.messages_received(),
            session.messages_sent()
        );

        result
    }

    async fn read_head<S>(
        conn: &mut HttpConnection<S>,
        timeout: Option<Duration>,
    ) -> Result<RequestHead, ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, conn.read_head())
                .await
                .map_err(|_| ServerError::HandshakeTimeout(limit))?,
            None => conn.read_head().await,
        }
    }

    /// Answers a failed upgrade with an HTTP error when one applies.
    async fn reject<S>(conn: &mut HttpConnection<S>, err: &ServerError, addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        tracing::warn!("[{}] Handshake failed: {}", addr, err);

        if let Some((status, reason)) = err.http_status() {
            if let Err(e) = conn.respond_error(status, reason, &err.to_string()).await {
                tracing::debug!("[{}] Failed to send {} response: {}", addr, status, e);
            }
        }
    }

    async fn message_loop<S>(
        ws: &mut WebSocket<S>,
        session: &Session,
        handler: &dyn MessageHandler,
        stats: &ServerStats,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            tokio::select! {
                result = ws.recv() => {
                    let message = match result {
                        Ok(message) => message,
                        Err(e) if e.is_closed() => {
                            tracing::debug!("[{}] Peer closed the stream", session.remote_addr);
                            return Ok(());
                        }
                        Err(e) => return Err(e.into()),
                    };

                    tracing::trace!("[{}] Received {} bytes", session.remote_addr, message.len());
                    session.record_received(message.len());
                    stats.messages_received.fetch_add(1, Ordering::Relaxed);

                    if let Some(reply) = handler.handle(session, message) {
                        ws.send(&reply).await?;
                        session.record_sent(reply.len());
                        stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("[{}] Closing on shutdown", session.remote_addr);
                    return Ok(());
                }
            }
        }
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
