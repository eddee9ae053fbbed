//! Error types for the MySQL client.

use std::fmt;
use std::io;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The primary error type for all client operations.
#[derive(Debug)]
pub enum Error {
    /// Transport EOF or I/O failure mid-packet. Fatal to the connection.
    Network(NetworkError),
    /// The server rejected the handshake. Fatal.
    Auth(AuthError),
    /// A server-reported command failure (ERR packet). Recoverable at the
    /// caller level when it arrived before any rows began streaming.
    Server(ServerError),
    /// A packet whose leading byte matched no expected response for the
    /// current command. Protocol desync; fatal.
    UnexpectedPacket(UnexpectedPacket),
    /// A command was issued while a prior row stream was still open.
    /// Precondition violation; the connection itself stays usable.
    UnconsumedResultSet,
    /// The value codec failed to parse a field. Surfaces through row streams.
    Decode(DecodeError),
}

/// Transport-level failure.
#[derive(Debug)]
pub struct NetworkError {
    pub kind: NetworkErrorKind,
    pub message: String,
    pub source: Option<io::Error>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// Failed to establish the TCP connection
    Connect,
    /// The stream ended or failed mid-conversation
    Disconnected,
    /// TLS negotiation failed
    Tls,
}

/// Handshake rejection. Carries the server's ERR payload when one was sent.
#[derive(Debug)]
pub struct AuthError {
    pub message: String,
    pub server: Option<ServerError>,
}

/// An ERR packet reported by the server for a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// MySQL error code (e.g. 1062 for ER_DUP_ENTRY)
    pub code: u16,
    /// Five-character SQLSTATE, empty on pre-4.1 style packets
    pub sql_state: String,
    pub message: String,
}

/// A response packet that fit no expected shape.
#[derive(Debug)]
pub struct UnexpectedPacket {
    /// What the client was doing when the packet arrived
    pub context: &'static str,
    pub payload: Vec<u8>,
}

/// Value codec failure: bad length, bad lexeme, or unsupported type.
#[derive(Debug)]
pub struct DecodeError {
    pub message: String,
    /// Column name, when the failure is attributable to one
    pub column: Option<String>,
}

impl Error {
    /// Does this error leave the connection unusable?
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Auth(_) | Error::UnexpectedPacket(_)
        )
    }

    /// MySQL error code, when the server reported one.
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Error::Server(e) => Some(e.code),
            Error::Auth(e) => e.server.as_ref().map(|s| s.code),
            _ => None,
        }
    }

    /// SQLSTATE, when the server reported one.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Error::Server(e) => Some(e.sql_state.as_str()),
            _ => None,
        }
    }

    pub(crate) fn network(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        Error::Network(NetworkError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    pub(crate) fn io(kind: NetworkErrorKind, message: impl Into<String>, source: io::Error) -> Self {
        Error::Network(NetworkError {
            kind,
            message: message.into(),
            source: Some(source),
        })
    }

    pub(crate) fn auth(message: impl Into<String>, server: Option<ServerError>) -> Self {
        Error::Auth(AuthError {
            message: message.into(),
            server,
        })
    }

    pub(crate) fn unexpected(context: &'static str, payload: &[u8]) -> Self {
        Error::UnexpectedPacket(UnexpectedPacket {
            context,
            payload: payload.to_vec(),
        })
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Error::Decode(DecodeError {
            message: message.into(),
            column: None,
        })
    }

    pub(crate) fn decode_column(message: impl Into<String>, column: impl Into<String>) -> Self {
        Error::Decode(DecodeError {
            message: message.into(),
            column: Some(column.into()),
        })
    }
}

impl ServerError {
    /// Is this a unique constraint violation? (ER_DUP_ENTRY)
    pub fn is_duplicate_key(&self) -> bool {
        self.code == 1062
    }

    /// Is this a foreign key constraint violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        self.code == 1451 || self.code == 1452
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Network(e) => write!(f, "network error: {}", e.message),
            Error::Auth(e) => match &e.server {
                Some(s) => write!(f, "authentication failed: {} ({})", s.message, s.code),
                None => write!(f, "authentication failed: {}", e.message),
            },
            Error::Server(e) => {
                if e.sql_state.is_empty() {
                    write!(f, "server error {}: {}", e.code, e.message)
                } else {
                    write!(
                        f,
                        "server error {} (SQLSTATE {}): {}",
                        e.code, e.sql_state, e.message
                    )
                }
            }
            Error::UnexpectedPacket(e) => {
                let lead = e.payload.first().copied().unwrap_or(0);
                write!(
                    f,
                    "unexpected packet while {}: leading byte 0x{:02X}, {} bytes",
                    e.context,
                    lead,
                    e.payload.len()
                )
            }
            Error::UnconsumedResultSet => {
                write!(f, "a result set is still open; drain it before issuing commands")
            }
            Error::Decode(e) => match &e.column {
                Some(col) => write!(f, "decode error in column `{}`: {}", col, e.message),
                None => write!(f, "decode error: {}", e.message),
            },
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Network(e) => e.source.as_ref().map(|e| e as _),
            _ => None,
        }
    }
}
