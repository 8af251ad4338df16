use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio_util::codec::Framed;
use tracing::{debug, error};

use crate::config::{BackendConfig, Endpoint};
use crate::protocol::{
    capabilities, clear_password_response, compute_auth_response, compute_caching_sha2_response,
    is_eof_packet, is_err_packet, is_ok_packet, parse_column_count, parse_text_row,
    AuthSwitchRequest, Command, ErrPacket, HandshakeResponse, InitialHandshake, Packet,
    PacketCodec, TextRow, AUTH_MORE_DATA_HEADER, AUTH_SWITCH_HEADER, CACHING_SHA2_PLUGIN,
    CLEAR_PASSWORD_PLUGIN, NATIVE_PASSWORD_PLUGIN, SHA2_FAST_AUTH_SUCCESS, SHA2_PERFORM_FULL_AUTH,
};

/// Byte stream to the backend, TCP or UNIX socket
pub trait BackendStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> BackendStream for T {}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is available for use
    Idle,
    /// Connection is currently in use
    InUse,
    /// Connection is broken/closed
    Closed,
}

/// An authenticated connection to the node under check
pub struct BackendConnection {
    framed: Framed<Box<dyn BackendStream>, PacketCodec>,
    state: ConnectionState,
    created_at: Instant,
    last_used_at: Instant,
    /// Negotiated capability flags
    capabilities: u32,
    /// Bound on each query round trip
    io_timeout: Duration,
    /// Set while a query is in flight; a dropped query leaves it set
    pending: bool,
}

impl BackendConnection {
    /// Connect and authenticate, bounded by the configured timeout
    pub async fn connect(
        config: &BackendConfig,
        endpoint: &Endpoint,
    ) -> Result<Self, ConnectionError> {
        let timeout = config.connect_timeout();
        match tokio::time::timeout(timeout, Self::establish(config, endpoint)).await {
            Ok(result) => result,
            Err(_) => {
                error!(endpoint = %endpoint, timeout_ms = timeout.as_millis() as u64, "Backend connect timed out");
                Err(ConnectionError::Timeout(format!(
                    "connecting to {} after {:?}",
                    endpoint, timeout
                )))
            }
        }
    }

    async fn establish(
        config: &BackendConfig,
        endpoint: &Endpoint,
    ) -> Result<Self, ConnectionError> {
        debug!(endpoint = %endpoint, "Connecting to backend");

        let stream: Box<dyn BackendStream> = match endpoint {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await.map_err(|e| {
                    error!(endpoint = %endpoint, error = %e, "Failed to connect to backend");
                    ConnectionError::Connect(format!("dial tcp {}: {}", addr, e))
                })?;
                // Status round trips are tiny
                let _ = stream.set_nodelay(true);
                Box::new(stream)
            }
            Endpoint::Unix(path) => {
                let stream = UnixStream::connect(path).await.map_err(|e| {
                    error!(endpoint = %endpoint, error = %e, "Failed to connect to backend");
                    ConnectionError::Connect(format!("dial unix {}: {}", path.display(), e))
                })?;
                Box::new(stream)
            }
        };

        let mut framed = Framed::new(stream, PacketCodec);

        let handshake_packet = next_packet(&mut framed).await?;

        if is_err_packet(&handshake_packet.payload) {
            // e.g. "Host is blocked" or "Too many connections" before the handshake
            let err = ErrPacket::parse(&handshake_packet.payload, 0)
                .unwrap_or_else(|| ErrPacket::new(2013, "HY000", "Lost connection"));
            return Err(ConnectionError::Server(err.error_message));
        }

        let backend_handshake = InitialHandshake::parse(&handshake_packet.payload)
            .ok_or_else(|| ConnectionError::Protocol("Invalid backend handshake".into()))?;

        debug!(
            server_version = %backend_handshake.server_version,
            connection_id = backend_handshake.connection_id,
            auth_plugin = %backend_handshake.auth_plugin_name,
            "Received backend handshake"
        );

        if backend_handshake.capability_flags & capabilities::CLIENT_PROTOCOL_41 == 0 {
            return Err(ConnectionError::Protocol(
                "Backend does not support protocol 4.1".into(),
            ));
        }

        let caps = capabilities::DEFAULT_CAPABILITIES & backend_handshake.capability_flags;

        // Answer in the server's default plugin when we speak it; anything
        // else starts with native password and lets the server switch.
        let mut plugin = match backend_handshake.auth_plugin_name.as_str() {
            CLEAR_PASSWORD_PLUGIN => CLEAR_PASSWORD_PLUGIN,
            CACHING_SHA2_PLUGIN => CACHING_SHA2_PLUGIN,
            _ => NATIVE_PASSWORD_PLUGIN,
        };
        let auth_response =
            plugin_response(config, plugin, &backend_handshake.auth_plugin_data())?;

        let backend_response = HandshakeResponse {
            capability_flags: caps,
            max_packet_size: 16 * 1024 * 1024,
            character_set: 0x21, // utf8_general_ci
            username: config.user.clone(),
            auth_response,
            auth_plugin_name: plugin.to_string(),
        };

        framed
            .send(backend_response.encode(handshake_packet.sequence_id.wrapping_add(1)))
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        let mut response = next_packet(&mut framed).await?;

        if response.payload.first() == Some(&AUTH_SWITCH_HEADER) {
            let switch = AuthSwitchRequest::parse(&response.payload)
                .ok_or_else(|| ConnectionError::Protocol("Invalid auth switch request".into()))?;
            debug!(plugin = %switch.plugin_name, "Backend requested auth switch");

            plugin = match switch.plugin_name.as_str() {
                NATIVE_PASSWORD_PLUGIN => NATIVE_PASSWORD_PLUGIN,
                CLEAR_PASSWORD_PLUGIN => CLEAR_PASSWORD_PLUGIN,
                CACHING_SHA2_PLUGIN => CACHING_SHA2_PLUGIN,
                other => {
                    return Err(ConnectionError::Auth(format!(
                        "this authentication plugin is not supported: {}",
                        other
                    )));
                }
            };
            let data = plugin_response(config, plugin, &switch.plugin_data)?;

            framed
                .send(Packet::new(response.sequence_id.wrapping_add(1), data))
                .await
                .map_err(|e| ConnectionError::Io(e.to_string()))?;

            response = next_packet(&mut framed).await?;
        }

        if plugin == CACHING_SHA2_PLUGIN && response.payload.first() == Some(&AUTH_MORE_DATA_HEADER)
        {
            match response.payload.get(1) {
                Some(&SHA2_FAST_AUTH_SUCCESS) => {
                    debug!("caching_sha2_password fast auth succeeded");
                }
                Some(&SHA2_PERFORM_FULL_AUTH) => {
                    // Without TLS the password may only travel over a local socket
                    if !matches!(endpoint, Endpoint::Unix(_)) {
                        return Err(ConnectionError::Auth(
                            "caching_sha2_password full authentication needs a UNIX socket; \
                             log in once locally to populate the server cache or use mysql_native_password"
                                .into(),
                        ));
                    }
                    debug!("caching_sha2_password full auth over UNIX socket");
                    framed
                        .send(Packet::new(
                            response.sequence_id.wrapping_add(1),
                            clear_password_response(&config.password),
                        ))
                        .await
                        .map_err(|e| ConnectionError::Io(e.to_string()))?;
                }
                _ => {
                    return Err(ConnectionError::Protocol(
                        "Unexpected caching_sha2_password auth data".into(),
                    ));
                }
            }
            response = next_packet(&mut framed).await?;
        }

        if is_err_packet(&response.payload) {
            let err = ErrPacket::parse(&response.payload, caps)
                .unwrap_or_else(|| ErrPacket::new(1045, "28000", "Access denied"));
            error!(
                error_code = err.error_code,
                error_message = %err.error_message,
                "Backend authentication failed"
            );
            return Err(ConnectionError::Auth(err.to_string()));
        }

        if !is_ok_packet(&response.payload) {
            return Err(ConnectionError::Protocol(
                "Expected OK packet from backend".into(),
            ));
        }

        debug!("Backend authentication successful");

        let now = Instant::now();
        Ok(Self {
            framed,
            state: ConnectionState::Idle,
            created_at: now,
            last_used_at: now,
            capabilities: caps,
            io_timeout: config.connect_timeout(),
            pending: false,
        })
    }

    /// Run a text query and return all rows
    ///
    /// The whole round trip is bounded by the connect timeout; a timed-out
    /// connection is closed since its stream position is unknown.
    pub async fn query(&mut self, sql: &str) -> Result<Vec<TextRow>, ConnectionError> {
        self.pending = true;
        match tokio::time::timeout(self.io_timeout, self.query_inner(sql)).await {
            Ok(result) => {
                self.pending = false;
                if result.is_ok() {
                    self.last_used_at = Instant::now();
                }
                result
            }
            Err(_) => {
                self.state = ConnectionState::Closed;
                Err(ConnectionError::Timeout(format!(
                    "query after {:?}",
                    self.io_timeout
                )))
            }
        }
    }

    async fn query_inner(&mut self, sql: &str) -> Result<Vec<TextRow>, ConnectionError> {
        self.send(Packet::command(Command::Query, sql.as_bytes()))
            .await?;

        let first = self.recv().await?;

        if is_err_packet(&first.payload) {
            let err = ErrPacket::parse(&first.payload, self.capabilities)
                .unwrap_or_else(|| ErrPacket::new(1064, "HY000", "Query failed"));
            return Err(ConnectionError::Query(err.to_string()));
        }

        if is_ok_packet(&first.payload) {
            // Statement without a result set
            return Ok(Vec::new());
        }

        let columns = parse_column_count(&first.payload)
            .and_then(|c| usize::try_from(c).ok())
            .ok_or_else(|| self.protocol_error("Invalid column count"))?;

        for _ in 0..columns {
            self.recv().await?;
        }

        let eof = self.recv().await?;
        if !is_eof_packet(&eof.payload, self.capabilities) {
            return Err(self.protocol_error("Expected EOF after column definitions"));
        }

        let mut rows = Vec::new();
        loop {
            let packet = self.recv().await?;
            if is_eof_packet(&packet.payload, self.capabilities) {
                break;
            }
            if is_err_packet(&packet.payload) {
                let err = ErrPacket::parse(&packet.payload, self.capabilities)
                    .unwrap_or_else(|| ErrPacket::new(1105, "HY000", "Query aborted"));
                return Err(ConnectionError::Query(err.to_string()));
            }
            let row = parse_text_row(&packet.payload, columns)
                .ok_or_else(|| self.protocol_error("Malformed row"))?;
            rows.push(row);
        }

        Ok(rows)
    }

    /// Check if connection is healthy by sending a ping
    pub async fn ping(&mut self) -> bool {
        let timeout = self.io_timeout;
        let exchange = async {
            self.send(Packet::command(Command::Ping, &[])).await?;
            self.recv().await
        };
        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(packet)) if is_ok_packet(&packet.payload) => {
                self.last_used_at = Instant::now();
                true
            }
            _ => {
                self.state = ConnectionState::Closed;
                false
            }
        }
    }

    /// Send COM_QUIT; the server closes the socket without replying
    pub async fn quit(mut self) {
        let _ = tokio::time::timeout(
            self.io_timeout,
            self.framed.send(Packet::command(Command::Quit, &[])),
        )
        .await;
        self.state = ConnectionState::Closed;
    }

    /// Check if connection has exceeded max age
    pub fn is_expired(&self, max_age: Duration) -> bool {
        self.created_at.elapsed() > max_age
    }

    /// Check if connection has been idle too long
    pub fn is_idle_too_long(&self, max_idle: Duration) -> bool {
        self.last_used_at.elapsed() > max_idle
    }

    /// Mark connection as in use
    pub fn acquire(&mut self) {
        self.state = ConnectionState::InUse;
        self.last_used_at = Instant::now();
    }

    /// Mark connection as available
    pub fn release(&mut self) {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Idle;
        }
    }

    /// Check if connection is usable
    pub fn is_usable(&self) -> bool {
        self.state != ConnectionState::Closed && !self.pending
    }

    async fn send(&mut self, packet: Packet) -> Result<(), ConnectionError> {
        match self.framed.send(packet).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = ConnectionState::Closed;
                Err(ConnectionError::Io(e.to_string()))
            }
        }
    }

    async fn recv(&mut self) -> Result<Packet, ConnectionError> {
        match self.framed.next().await {
            Some(Ok(packet)) => Ok(packet),
            Some(Err(e)) => {
                self.state = ConnectionState::Closed;
                Err(ConnectionError::Io(e.to_string()))
            }
            None => {
                self.state = ConnectionState::Closed;
                Err(ConnectionError::Disconnected)
            }
        }
    }

    /// Protocol errors leave the stream mid-result-set
    fn protocol_error(&mut self, message: &str) -> ConnectionError {
        self.state = ConnectionState::Closed;
        ConnectionError::Protocol(message.to_string())
    }
}

fn cleartext_refused() -> String {
    "this user requires clear text authentication; enable cleartext passwords to allow it".into()
}

/// Auth data for `plugin` against the server's scramble
fn plugin_response(
    config: &BackendConfig,
    plugin: &str,
    scramble: &[u8],
) -> Result<Vec<u8>, ConnectionError> {
    match plugin {
        CLEAR_PASSWORD_PLUGIN if config.allow_cleartext_password => {
            Ok(clear_password_response(&config.password))
        }
        CLEAR_PASSWORD_PLUGIN => Err(ConnectionError::Auth(cleartext_refused())),
        CACHING_SHA2_PLUGIN => Ok(compute_caching_sha2_response(&config.password, scramble)),
        _ => Ok(compute_auth_response(&config.password, scramble)),
    }
}

async fn next_packet(
    framed: &mut Framed<Box<dyn BackendStream>, PacketCodec>,
) -> Result<Packet, ConnectionError> {
    framed
        .next()
        .await
        .ok_or(ConnectionError::Disconnected)?
        .map_err(|e| ConnectionError::Io(e.to_string()))
}

/// Connection errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Server refused connection: {0}")]
    Server(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Timed out {0}")]
    Timeout(String),

    #[error("Connection disconnected")]
    Disconnected,
}
