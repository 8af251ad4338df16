//! In-process stand-in for a Galera node, speaking just enough of the MySQL
//! protocol to answer the two status queries.

use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::config::BackendConfig;
use crate::protocol::packet::NULL_VALUE;
use crate::protocol::{
    capabilities::{CLIENT_CONNECT_WITH_DB, DEFAULT_CAPABILITIES},
    clear_password_response, compute_auth_response, compute_caching_sha2_response, Packet,
    PacketCodec, AUTH_MORE_DATA_HEADER, AUTH_SWITCH_HEADER, CACHING_SHA2_PLUGIN,
    CLEAR_PASSWORD_PLUGIN, NATIVE_PASSWORD_PLUGIN, SHA2_FAST_AUTH_SUCCESS, SHA2_PERFORM_FULL_AUTH,
};

pub const SCRAMBLE: [u8; 20] = *b"abcdefghijklmnopqrst";
/// Nonce sent with auth switch requests, distinct from the handshake's
pub const SWITCH_SCRAMBLE: [u8; 20] = *b"ABCDEFGHIJKLMNOPQRST";
pub const USER: &str = "clustercheckuser";
pub const PASSWORD: &str = "secret";

/// How the mock node authenticates clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockAuth {
    /// mysql_native_password from the first response
    Native,
    /// Handshake advertises mysql_clear_password directly
    ClearInitial,
    /// Native handshake followed by an auth switch to mysql_clear_password
    ClearSwitch,
    /// Native handshake followed by an auth switch to an unsupported plugin
    UnsupportedSwitch,
    /// Native handshake, switch to caching_sha2_password, cached (fast) auth
    Sha2FastSwitch,
    /// caching_sha2_password handshake with a cache miss (full auth)
    Sha2FullAuth,
}

/// Observable state of the mock node
#[derive(Debug, Clone)]
pub struct MockNode {
    pub password: String,
    pub auth: MockAuth,
    /// `None` answers the status query with an empty result set
    pub wsrep_local_state: Option<String>,
    pub read_only: Option<String>,
    pub status_error: Option<String>,
    pub read_only_error: Option<String>,
    pub reply_delay: Option<Duration>,
}

impl Default for MockNode {
    fn default() -> Self {
        Self {
            password: PASSWORD.to_string(),
            auth: MockAuth::Native,
            wsrep_local_state: Some("4".to_string()),
            read_only: Some("OFF".to_string()),
            status_error: None,
            read_only_error: None,
            reply_delay: None,
        }
    }
}

impl MockNode {
    pub fn with_state(state: &str) -> Self {
        Self {
            wsrep_local_state: Some(state.to_string()),
            ..Default::default()
        }
    }

    pub fn read_only(mut self, value: &str) -> Self {
        self.read_only = Some(value.to_string());
        self
    }
}

struct Shared {
    node: Mutex<MockNode>,
    /// Cancelled to hang up every open session
    sessions: Mutex<CancellationToken>,
    connections: AtomicUsize,
    next_connection_id: AtomicU32,
    queries: Mutex<Vec<String>>,
}

/// A running mock node
pub struct MockMysql {
    pub port: u16,
    shared: Arc<Shared>,
    handle: JoinHandle<()>,
}

impl MockMysql {
    /// Listen on an ephemeral localhost TCP port
    pub async fn start(node: MockNode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shared = Self::shared(node);

        let accept_shared = shared.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_connection(stream, accept_shared.clone()));
            }
        });

        Self {
            port,
            shared,
            handle,
        }
    }

    /// Listen on a UNIX socket at `path`
    pub async fn start_unix(node: MockNode, path: &Path) -> Self {
        let listener = UnixListener::bind(path).unwrap();
        let shared = Self::shared(node);

        let accept_shared = shared.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_connection(stream, accept_shared.clone()));
            }
        });

        Self {
            port: 0,
            shared,
            handle,
        }
    }

    fn shared(node: MockNode) -> Arc<Shared> {
        Arc::new(Shared {
            node: Mutex::new(node),
            sessions: Mutex::new(CancellationToken::new()),
            connections: AtomicUsize::new(0),
            next_connection_id: AtomicU32::new(1),
            queries: Mutex::new(Vec::new()),
        })
    }

    /// Change what the node reports from now on
    pub fn set_node(&self, node: MockNode) {
        *self.shared.node.lock() = node;
    }

    /// Close every open session server-side, as a restart or `wait_timeout` would
    ///
    /// The listener keeps accepting.
    pub fn drop_sessions(&self) {
        let old = std::mem::replace(&mut *self.shared.sessions.lock(), CancellationToken::new());
        old.cancel();
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Queries received so far, in order
    pub fn queries(&self) -> Vec<String> {
        self.shared.queries.lock().clone()
    }
}

impl Drop for MockMysql {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Backend settings pointing at a TCP mock
pub fn backend_config(mock: &MockMysql) -> BackendConfig {
    BackendConfig {
        user: USER.to_string(),
        password: PASSWORD.to_string(),
        socket: String::new(),
        host: "127.0.0.1".to_string(),
        port: mock.port,
        connect_timeout_ms: 2_000,
        allow_cleartext_password: true,
    }
}

/// Backend settings pointing at a localhost port nobody listens on
pub async fn unreachable_backend_config() -> BackendConfig {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    BackendConfig {
        user: USER.to_string(),
        password: PASSWORD.to_string(),
        socket: String::new(),
        host: "127.0.0.1".to_string(),
        port,
        connect_timeout_ms: 2_000,
        allow_cleartext_password: true,
    }
}

/// Accepts TCP connections and never sends a handshake
pub async fn silent_listener() -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    (port, handle)
}

async fn serve_connection<S>(stream: S, shared: Arc<Shared>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    shared.connections.fetch_add(1, Ordering::SeqCst);
    let hangup = shared.sessions.lock().clone();
    tokio::select! {
        _ = hangup.cancelled() => {}
        _ = run_session(Framed::new(stream, PacketCodec), &shared) => {}
    }
}

async fn next<S>(framed: &mut Framed<S, PacketCodec>) -> std::io::Result<Option<Packet>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framed.next().await.transpose()
}

async fn run_session<S>(
    mut framed: Framed<S, PacketCodec>,
    shared: &Shared,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let node = shared.node.lock().clone();
    let connection_id = shared.next_connection_id.fetch_add(1, Ordering::SeqCst);

    let plugin = match node.auth {
        MockAuth::ClearInitial => CLEAR_PASSWORD_PLUGIN,
        MockAuth::Sha2FullAuth => CACHING_SHA2_PLUGIN,
        _ => NATIVE_PASSWORD_PLUGIN,
    };
    framed
        .send(handshake_packet(connection_id, &SCRAMBLE, plugin))
        .await?;

    let Some(packet) = next(&mut framed).await? else {
        return Ok(());
    };
    let hello = parse_client_hello(&packet.payload).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "bad handshake response")
    })?;
    let mut seq = packet.sequence_id.wrapping_add(1);

    let switch_to = match node.auth {
        MockAuth::ClearSwitch => Some((CLEAR_PASSWORD_PLUGIN, &[][..])),
        MockAuth::UnsupportedSwitch => Some(("auth_gssapi_client", &[][..])),
        MockAuth::Sha2FastSwitch => Some((CACHING_SHA2_PLUGIN, &SWITCH_SCRAMBLE[..])),
        _ => None,
    };

    let authenticated = match switch_to {
        None => {
            let expected = match node.auth {
                MockAuth::ClearInitial => clear_password_response(&node.password),
                MockAuth::Sha2FullAuth => compute_caching_sha2_response(&node.password, &SCRAMBLE),
                _ => compute_auth_response(&node.password, &SCRAMBLE),
            };
            hello.auth_response == expected
        }
        Some((plugin, nonce)) => {
            framed.send(auth_switch_packet(seq, plugin, nonce)).await?;
            let Some(reply) = next(&mut framed).await? else {
                return Ok(());
            };
            seq = reply.sequence_id.wrapping_add(1);
            let expected = if plugin == CACHING_SHA2_PLUGIN {
                compute_caching_sha2_response(&node.password, nonce)
            } else {
                clear_password_response(&node.password)
            };
            reply.payload[..] == expected[..]
        }
    };

    let authenticated = match node.auth {
        MockAuth::Sha2FastSwitch if authenticated => {
            framed
                .send(auth_more_data_packet(seq, SHA2_FAST_AUTH_SUCCESS))
                .await?;
            seq = seq.wrapping_add(1);
            true
        }
        MockAuth::Sha2FullAuth => {
            // Cache miss: the scramble is not enough, ask for the password
            framed
                .send(auth_more_data_packet(seq, SHA2_PERFORM_FULL_AUTH))
                .await?;
            let Some(reply) = next(&mut framed).await? else {
                return Ok(());
            };
            seq = reply.sequence_id.wrapping_add(1);
            reply.payload[..] == clear_password_response(&node.password)[..]
        }
        _ => authenticated,
    };

    if !authenticated {
        let message = format!(
            "Access denied for user '{}'@'localhost' (using password: YES)",
            hello.username
        );
        framed.send(err_packet(seq, 1045, "28000", &message)).await?;
        return Ok(());
    }
    framed.send(ok_packet(seq)).await?;

    while let Some(packet) = next(&mut framed).await? {
        match packet.payload.first() {
            Some(0x01) => break,
            Some(0x0e) => framed.send(ok_packet(1)).await?,
            Some(0x03) => {
                let sql = String::from_utf8_lossy(&packet.payload[1..]).to_string();
                shared.queries.lock().push(sql.clone());
                let node = shared.node.lock().clone();
                if let Some(delay) = node.reply_delay {
                    tokio::time::sleep(delay).await;
                }
                for reply in answer(&node, &sql) {
                    framed.send(reply).await?;
                }
            }
            _ => {
                framed
                    .send(err_packet(1, 1047, "08S01", "Unknown command"))
                    .await?
            }
        }
    }
    Ok(())
}

fn answer(node: &MockNode, sql: &str) -> Vec<Packet> {
    let (name, value, error) = if sql.contains("wsrep_local_state") {
        ("wsrep_local_state", &node.wsrep_local_state, &node.status_error)
    } else if sql.contains("read_only") {
        ("read_only", &node.read_only, &node.read_only_error)
    } else {
        return vec![err_packet(1, 1064, "42000", "You have an error in your SQL syntax")];
    };

    if let Some(message) = error {
        return vec![err_packet(1, 1227, "42000", message)];
    }

    let mut packets = vec![
        column_count_packet(1, 2),
        column_definition_packet(2, "Variable_name"),
        column_definition_packet(3, "Value"),
        eof_packet(4),
    ];
    match value {
        Some(value) => {
            packets.push(text_row_packet(5, &[Some(name), Some(value.as_str())]));
            packets.push(eof_packet(6));
        }
        None => packets.push(eof_packet(5)),
    }
    packets
}

// Server-side packet builders

fn put_lenenc(buf: &mut BytesMut, value: &[u8]) {
    // Mock values stay well below 251 bytes
    buf.put_u8(value.len() as u8);
    buf.put_slice(value);
}

/// Handshake v10 advertising `scramble` and `plugin`
pub fn handshake_packet(connection_id: u32, scramble: &[u8; 20], plugin: &str) -> Packet {
    let caps = DEFAULT_CAPABILITIES | CLIENT_CONNECT_WITH_DB;
    let mut buf = BytesMut::new();
    buf.put_u8(10);
    buf.put_slice(b"8.0.35-26-galera\0");
    buf.put_u32_le(connection_id);
    buf.put_slice(&scramble[..8]);
    buf.put_u8(0);
    buf.put_u16_le(caps as u16);
    buf.put_u8(0x21);
    buf.put_u16_le(0x0002);
    buf.put_u16_le((caps >> 16) as u16);
    buf.put_u8(21);
    buf.put_bytes(0, 10);
    buf.put_slice(&scramble[8..]);
    buf.put_u8(0);
    buf.put_slice(plugin.as_bytes());
    buf.put_u8(0);
    Packet::new(0, buf.freeze())
}

/// What the mock needs from a client's HandshakeResponse41
pub struct ClientHello {
    pub username: String,
    pub auth_response: Vec<u8>,
    pub plugin: String,
}

/// Read a HandshakeResponse41 sent without CLIENT_CONNECT_WITH_DB
pub fn parse_client_hello(payload: &[u8]) -> Option<ClientHello> {
    // caps(4) + max packet(4) + charset(1) + reserved(23)
    let rest = payload.get(32..)?;
    let end = rest.iter().position(|&b| b == 0)?;
    let username = String::from_utf8_lossy(&rest[..end]).to_string();
    let rest = &rest[end + 1..];
    let len = *rest.first()? as usize;
    let auth_response = rest.get(1..1 + len)?.to_vec();
    let rest = &rest[1 + len..];
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    Some(ClientHello {
        username,
        auth_response,
        plugin: String::from_utf8_lossy(&rest[..end]).to_string(),
    })
}

pub fn auth_switch_packet(seq: u8, plugin: &str, data: &[u8]) -> Packet {
    let mut buf = BytesMut::new();
    buf.put_u8(AUTH_SWITCH_HEADER);
    buf.put_slice(plugin.as_bytes());
    buf.put_u8(0);
    buf.put_slice(data);
    buf.put_u8(0);
    Packet::new(seq, buf.freeze())
}

pub fn auth_more_data_packet(seq: u8, status: u8) -> Packet {
    Packet::new(seq, vec![AUTH_MORE_DATA_HEADER, status])
}

pub fn ok_packet(seq: u8) -> Packet {
    // affected rows, insert id, autocommit status, no warnings
    Packet::new(seq, vec![0x00, 0, 0, 0x02, 0, 0, 0])
}

pub fn err_packet(seq: u8, code: u16, state: &str, message: &str) -> Packet {
    let mut buf = BytesMut::new();
    buf.put_u8(0xFF);
    buf.put_u16_le(code);
    buf.put_u8(b'#');
    buf.put_slice(state.as_bytes());
    buf.put_slice(message.as_bytes());
    Packet::new(seq, buf.freeze())
}

pub fn eof_packet(seq: u8) -> Packet {
    Packet::new(seq, vec![0xFE, 0, 0, 0x02, 0])
}

pub fn column_count_packet(seq: u8, count: u8) -> Packet {
    Packet::new(seq, vec![count])
}

/// Minimal VAR_STRING ColumnDefinition41
pub fn column_definition_packet(seq: u8, name: &str) -> Packet {
    let mut buf = BytesMut::new();
    for part in [&b"def"[..], b"", b"", b"", name.as_bytes(), name.as_bytes()] {
        put_lenenc(&mut buf, part);
    }
    buf.put_u8(0x0c);
    buf.put_u16_le(0x21);
    buf.put_u32_le(1024);
    buf.put_u8(0xFD);
    buf.put_u16_le(0);
    buf.put_u8(0);
    buf.put_u16_le(0);
    Packet::new(seq, buf.freeze())
}

pub fn text_row_packet(seq: u8, values: &[Option<&str>]) -> Packet {
    let mut buf = BytesMut::new();
    for value in values {
        match value {
            Some(v) => put_lenenc(&mut buf, v.as_bytes()),
            None => buf.put_u8(NULL_VALUE),
        }
    }
    Packet::new(seq, buf.freeze())
}
