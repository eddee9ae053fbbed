//! MySQL wire protocol: packet framing primitives and response descriptors.
//!
//! Every packet starts with a 4-byte header: a 3-byte little-endian payload
//! length and a 1-byte sequence number. Payloads of 2^24 - 1 bytes signal
//! continuation; the receiver concatenates frames until a shorter one
//! arrives.

pub mod prepared;
pub mod reader;
pub mod writer;

pub use reader::PacketReader;
pub use writer::PacketWriter;

/// Maximum payload carried by a single frame (2^24 - 1 bytes).
pub const MAX_PACKET_SIZE: usize = 0xFF_FFFF;

/// Client/server capability flags exchanged during the handshake.
#[allow(dead_code)]
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_FOUND_ROWS: u32 = 1 << 1;
    pub const CLIENT_LONG_FLAG: u32 = 1 << 2;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_COMPRESS: u32 = 1 << 5;
    pub const CLIENT_LOCAL_FILES: u32 = 1 << 7;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_STATEMENTS: u32 = 1 << 16;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PS_MULTI_RESULTS: u32 = 1 << 18;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;

    /// Baseline capabilities this client always advertises.
    ///
    /// CLIENT_DEPRECATE_EOF is deliberately absent: result sets are framed
    /// with explicit EOF packets.
    pub const DEFAULT_CLIENT_FLAGS: u32 = CLIENT_LONG_PASSWORD
        | CLIENT_PROTOCOL_41
        | CLIENT_TRANSACTIONS
        | CLIENT_SECURE_CONNECTION
        | CLIENT_MULTI_RESULTS;
}

/// Command codes for the request packets this client sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// COM_QUIT
    Quit = 0x01,
    /// COM_QUERY, text protocol
    Query = 0x03,
    /// COM_PING
    Ping = 0x0E,
    /// COM_STMT_PREPARE
    StmtPrepare = 0x16,
    /// COM_STMT_EXECUTE, binary protocol
    StmtExecute = 0x17,
    /// COM_STMT_CLOSE (no server reply)
    StmtClose = 0x19,
    /// COM_STMT_RESET
    StmtReset = 0x1A,
}

/// Server status flags carried in OK and EOF packets.
#[allow(dead_code)]
pub mod server_status {
    pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
    pub const SERVER_STATUS_CURSOR_EXISTS: u16 = 0x0040;
    pub const SERVER_STATUS_LAST_ROW_SENT: u16 = 0x0080;
}

/// Character set codes. 63 is the binary pseudo-charset: columns carrying it
/// hold raw bytes rather than text.
#[allow(dead_code)]
pub mod charset {
    pub const LATIN1_SWEDISH_CI: u8 = 8;
    pub const UTF8_GENERAL_CI: u8 = 33;
    pub const BINARY: u8 = 63;
    pub const UTF8MB4_GENERAL_CI: u8 = 45;

    pub const DEFAULT_CHARSET: u8 = UTF8MB4_GENERAL_CI;
}

/// The 4-byte packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Payload length; at most [`MAX_PACKET_SIZE`]
    pub payload_length: u32,
    /// Wraps at 255
    pub sequence_id: u8,
}

impl PacketHeader {
    pub const SIZE: usize = 4;

    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        Self {
            payload_length: u32::from(bytes[0])
                | u32::from(bytes[1]) << 8
                | u32::from(bytes[2]) << 16,
            sequence_id: bytes[3],
        }
    }

    pub fn to_bytes(self) -> [u8; 4] {
        [
            (self.payload_length & 0xFF) as u8,
            (self.payload_length >> 8 & 0xFF) as u8,
            (self.payload_length >> 16 & 0xFF) as u8,
            self.sequence_id,
        ]
    }
}

/// Coarse classification of a response payload by its leading byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// `0x00`
    Ok,
    /// `0xFF`
    Err,
    /// `0xFE` with a payload shorter than 9 bytes; longer `0xFE` payloads are
    /// length-encoded integers in other contexts
    Eof,
    /// Anything else: a result-set header, column definition, or row
    Data,
}

impl PacketType {
    pub fn classify(payload: &[u8]) -> Self {
        match payload.first() {
            Some(0x00) => PacketType::Ok,
            Some(0xFF) => PacketType::Err,
            Some(0xFE) if payload.len() < 9 => PacketType::Eof,
            _ => PacketType::Data,
        }
    }
}

/// Parsed OK packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    /// Human-readable session info, often empty
    pub info: String,
}

impl OkPacket {
    /// Parse from a payload whose leading byte is `0x00`.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let mut r = PacketReader::new(payload);
        if r.peek() == Some(0x00) {
            r.skip(1);
        }
        let affected_rows = r.read_lenenc_int()?;
        let last_insert_id = r.read_lenenc_int()?;
        let status_flags = r.read_u16_le()?;
        let warnings = r.read_u16_le()?;
        let info = r.read_rest_string();
        Some(Self {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            info,
        })
    }
}

/// Parsed ERR packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    pub error_code: u16,
    /// Five characters after the `#` marker; empty on pre-4.1 packets
    pub sql_state: String,
    pub error_message: String,
}

impl ErrPacket {
    /// Parse from a payload whose leading byte is `0xFF`.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let mut r = PacketReader::new(payload);
        if r.peek() == Some(0xFF) {
            r.skip(1);
        }
        let error_code = r.read_u16_le()?;
        let sql_state = if r.peek() == Some(b'#') {
            r.skip(1);
            String::from_utf8_lossy(r.read_bytes(5)?).into_owned()
        } else {
            String::new()
        };
        let error_message = r.read_rest_string();
        Some(Self {
            error_code,
            sql_state,
            error_message,
        })
    }
}

/// Parsed EOF packet (legacy result-set framing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}

impl EofPacket {
    /// Parse from a short payload whose leading byte is `0xFE`.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let mut r = PacketReader::new(payload);
        if r.peek() == Some(0xFE) {
            r.skip(1);
        }
        let warnings = r.read_u16_le()?;
        let status_flags = r.read_u16_le()?;
        Some(Self {
            warnings,
            status_flags,
        })
    }
}

/// The server's initial handshake (protocol version 10).
#[derive(Debug, Clone)]
pub struct Greeting {
    pub protocol_version: u8,
    pub server_version: String,
    /// The server calls this the thread id
    pub connection_id: u32,
    /// Scramble seed: the 8-byte first part concatenated with the second part
    /// (12 bytes on modern servers, trailing NUL stripped)
    pub auth_data: Vec<u8>,
    pub capabilities: u32,
    pub charset: u8,
    pub status_flags: u16,
    /// Announced plugin, `mysql_native_password` when absent
    pub auth_plugin: String,
}

impl Greeting {
    /// Parse the v10 greeting payload.
    ///
    /// Layout: protocol version, NUL-terminated server version, thread id,
    /// 8 salt bytes, filler, capability low word, charset, status flags,
    /// capability high word, auth-data length, 10 reserved bytes, the rest
    /// of the salt, and optionally the auth plugin name.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let mut r = PacketReader::new(payload);

        let protocol_version = r.read_u8()?;
        let server_version = r.read_null_string()?;
        let connection_id = r.read_u32_le()?;

        let salt1 = r.read_bytes(8)?;
        r.skip(1); // filler

        let caps_low = r.read_u16_le()?;
        let charset = r.read_u8()?;
        let status_flags = r.read_u16_le()?;
        let caps_high = r.read_u16_le()?;
        let caps = u32::from(caps_low) | u32::from(caps_high) << 16;

        let auth_data_len = if caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            r.read_u8()? as usize
        } else {
            r.skip(1);
            0
        };
        r.skip(10); // reserved

        let mut auth_data = salt1.to_vec();
        if caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            let salt2_len = if auth_data_len > 8 {
                auth_data_len - 8
            } else {
                13
            };
            if let Some(salt2) = r.read_bytes(salt2_len) {
                let salt2 = match salt2.last() {
                    Some(0) => &salt2[..salt2.len() - 1],
                    _ => salt2,
                };
                auth_data.extend_from_slice(salt2);
            }
        }

        let auth_plugin = if caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            r.read_null_string().unwrap_or_default()
        } else {
            crate::auth::plugins::MYSQL_NATIVE_PASSWORD.to_string()
        };

        Some(Self {
            protocol_version,
            server_version,
            connection_id,
            auth_data,
            capabilities: caps,
            charset,
            status_flags,
            auth_plugin,
        })
    }
}
