use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use super::packet::{capabilities::*, Packet};

/// Scramble-based password plugin
pub const NATIVE_PASSWORD_PLUGIN: &str = "mysql_native_password";
/// Plugin that sends the password as-is (needs cleartext to be allowed)
pub const CLEAR_PASSWORD_PLUGIN: &str = "mysql_clear_password";
/// SHA-256 scramble plugin, the MySQL 8 default
pub const CACHING_SHA2_PLUGIN: &str = "caching_sha2_password";

/// Header byte of an auth switch request during authentication
pub const AUTH_SWITCH_HEADER: u8 = 0xFE;
/// Header byte of an auth-more-data packet during authentication
pub const AUTH_MORE_DATA_HEADER: u8 = 0x01;

/// caching_sha2_password: scramble matched the server's cache
pub const SHA2_FAST_AUTH_SUCCESS: u8 = 0x03;
/// caching_sha2_password: cache miss, the server wants the password itself
pub const SHA2_PERFORM_FULL_AUTH: u8 = 0x04;

/// MySQL initial handshake packet (server -> client)
#[derive(Debug, Clone)]
pub struct InitialHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub auth_plugin_data_part1: [u8; 8],
    pub capability_flags: u32,
    pub character_set: u8,
    pub status_flags: u16,
    pub auth_plugin_data_part2: Vec<u8>,
    pub auth_plugin_name: String,
}

impl InitialHandshake {
    /// Full scramble (normally 20 bytes)
    pub fn auth_plugin_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(20);
        data.extend_from_slice(&self.auth_plugin_data_part1);
        data.extend_from_slice(&self.auth_plugin_data_part2);
        data
    }

    /// Parse from packet payload
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 32 {
            return None;
        }

        let mut buf = payload;

        let protocol_version = buf.get_u8();

        // Server version (null-terminated string)
        let null_pos = buf.iter().position(|&b| b == 0)?;
        let server_version = String::from_utf8_lossy(&buf[..null_pos]).to_string();
        buf.advance(null_pos + 1);

        // connection id + scramble part 1 + filler + caps + charset + status + caps + len + reserved
        if buf.len() < 31 {
            return None;
        }

        let connection_id = buf.get_u32_le();

        let mut auth_plugin_data_part1 = [0u8; 8];
        auth_plugin_data_part1.copy_from_slice(&buf[..8]);
        buf.advance(8);

        // Filler
        buf.advance(1);

        let capability_flags_lower = buf.get_u16_le() as u32;
        let character_set = buf.get_u8();
        let status_flags = buf.get_u16_le();
        let capability_flags_upper = buf.get_u16_le() as u32;
        let capability_flags = capability_flags_lower | (capability_flags_upper << 16);

        let auth_plugin_data_len = buf.get_u8();

        // Reserved
        buf.advance(10);

        let mut auth_plugin_data_part2 = Vec::new();
        if capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            let len = std::cmp::max(13, (auth_plugin_data_len as usize).saturating_sub(8))
                .min(buf.len());
            let data_len = buf.iter().take(len).position(|&b| b == 0).unwrap_or(len);
            auth_plugin_data_part2.extend_from_slice(&buf[..data_len]);
            buf.advance(len);
        }

        let auth_plugin_name = if capability_flags & CLIENT_PLUGIN_AUTH != 0 && !buf.is_empty() {
            let null_pos = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            String::from_utf8_lossy(&buf[..null_pos]).to_string()
        } else {
            NATIVE_PASSWORD_PLUGIN.to_string()
        };

        Some(Self {
            protocol_version,
            server_version,
            connection_id,
            auth_plugin_data_part1,
            capability_flags,
            character_set,
            status_flags,
            auth_plugin_data_part2,
            auth_plugin_name,
        })
    }
}

/// HandshakeResponse41 (client -> server)
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    pub capability_flags: u32,
    pub max_packet_size: u32,
    pub character_set: u8,
    pub username: String,
    pub auth_response: Vec<u8>,
    pub auth_plugin_name: String,
}

impl HandshakeResponse {
    pub fn encode(&self, sequence_id: u8) -> Packet {
        let mut buf = BytesMut::new();

        buf.put_u32_le(self.capability_flags);
        buf.put_u32_le(self.max_packet_size);
        buf.put_u8(self.character_set);
        buf.put_bytes(0, 23);

        buf.extend_from_slice(self.username.as_bytes());
        buf.put_u8(0);

        if self.capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            buf.put_u8(self.auth_response.len() as u8);
            buf.extend_from_slice(&self.auth_response);
        } else {
            buf.extend_from_slice(&self.auth_response);
            buf.put_u8(0);
        }

        if self.capability_flags & CLIENT_PLUGIN_AUTH != 0 {
            buf.extend_from_slice(self.auth_plugin_name.as_bytes());
            buf.put_u8(0);
        }

        Packet::new(sequence_id, buf.freeze())
    }
}

/// Auth switch request (server -> client, 0xFE during authentication)
#[derive(Debug, Clone)]
pub struct AuthSwitchRequest {
    pub plugin_name: String,
    pub plugin_data: Vec<u8>,
}

impl AuthSwitchRequest {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.first() != Some(&AUTH_SWITCH_HEADER) {
            return None;
        }
        let buf = &payload[1..];
        let null_pos = buf.iter().position(|&b| b == 0)?;
        let plugin_name = String::from_utf8_lossy(&buf[..null_pos]).to_string();

        // Scramble is usually null-terminated
        let mut plugin_data = &buf[null_pos + 1..];
        if plugin_data.last() == Some(&0) {
            plugin_data = &plugin_data[..plugin_data.len() - 1];
        }

        Some(Self {
            plugin_name,
            plugin_data: plugin_data.to_vec(),
        })
    }
}

/// Compute mysql_native_password auth response
///
/// SHA1(password) XOR SHA1(scramble + SHA1(SHA1(password)))
pub fn compute_auth_response(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let auth_data = scramble_prefix(auth_data);

    let hash1 = Sha1::digest(password.as_bytes());
    let hash2 = Sha1::digest(hash1);

    let mut hasher = Sha1::new();
    hasher.update(auth_data);
    hasher.update(hash2);
    let hash3 = hasher.finalize();

    xor(&hash1, &hash3)
}

/// Compute caching_sha2_password auth response
///
/// SHA256(password) XOR SHA256(SHA256(SHA256(password)) + scramble)
pub fn compute_caching_sha2_response(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let auth_data = scramble_prefix(auth_data);

    let hash1 = Sha256::digest(password.as_bytes());
    let hash2 = Sha256::digest(hash1);

    let mut hasher = Sha256::new();
    hasher.update(hash2);
    hasher.update(auth_data);
    let hash3 = hasher.finalize();

    xor(&hash1, &hash3)
}

/// The scramble is 20 bytes; anything after that is padding
fn scramble_prefix(auth_data: &[u8]) -> &[u8] {
    &auth_data[..auth_data.len().min(20)]
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

/// Compute mysql_clear_password auth response (null-terminated password)
pub fn clear_password_response(password: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(password.len() + 1);
    data.extend_from_slice(password.as_bytes());
    data.push(0);
    data
}

/// ERR packet
#[derive(Debug, Clone)]
pub struct ErrPacket {
    pub error_code: u16,
    pub sql_state: String,
    pub error_message: String,
}

impl ErrPacket {
    pub fn new(error_code: u16, sql_state: &str, error_message: &str) -> Self {
        Self {
            error_code,
            sql_state: sql_state.to_string(),
            error_message: error_message.to_string(),
        }
    }

    /// Parse from packet payload
    pub fn parse(payload: &[u8], capabilities: u32) -> Option<Self> {
        if payload.first() != Some(&0xFF) {
            return None;
        }

        let mut buf = &payload[1..];
        if buf.len() < 2 {
            return None;
        }

        let error_code = buf.get_u16_le();

        let (sql_state, error_message) =
            if capabilities & CLIENT_PROTOCOL_41 != 0 && buf.first() == Some(&b'#') && buf.len() >= 6
            {
                let sql_state = String::from_utf8_lossy(&buf[1..6]).to_string();
                (sql_state, String::from_utf8_lossy(&buf[6..]).to_string())
            } else {
                ("HY000".to_string(), String::from_utf8_lossy(buf).to_string())
            };

        Some(Self {
            error_code,
            sql_state,
            error_message,
        })
    }
}

impl std::fmt::Display for ErrPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Error {} ({}): {}",
            self.error_code, self.sql_state, self.error_message
        )
    }
}

/// Check if packet is OK packet
pub fn is_ok_packet(payload: &Bytes) -> bool {
    payload.first() == Some(&0x00)
}

/// Check if packet is ERR packet
pub fn is_err_packet(payload: &Bytes) -> bool {
    payload.first() == Some(&0xFF)
}

/// Check if packet is EOF packet
pub fn is_eof_packet(payload: &Bytes, capabilities: u32) -> bool {
    if capabilities & CLIENT_DEPRECATE_EOF != 0 {
        false
    } else {
        payload.first() == Some(&0xFE) && payload.len() < 9
    }
}
