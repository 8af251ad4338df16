//! Client side of the MySQL wire protocol
//!
//! Covers just what the status probe needs: the v10 handshake with
//! native, caching_sha2 and cleartext password auth, `COM_QUERY` with text
//! result sets, `COM_PING` and `COM_QUIT`.

pub mod codec;
pub mod handshake;
pub mod packet;
pub mod resultset;

pub use codec::PacketCodec;
pub use handshake::{
    clear_password_response, compute_auth_response, compute_caching_sha2_response,
    is_eof_packet, is_err_packet, is_ok_packet, AuthSwitchRequest, ErrPacket, HandshakeResponse,
    InitialHandshake, AUTH_MORE_DATA_HEADER, AUTH_SWITCH_HEADER, CACHING_SHA2_PLUGIN,
    CLEAR_PASSWORD_PLUGIN, NATIVE_PASSWORD_PLUGIN, SHA2_FAST_AUTH_SUCCESS, SHA2_PERFORM_FULL_AUTH,
};
pub use packet::{capabilities, Command, Packet};
pub use resultset::{parse_column_count, parse_text_row, TextRow};
