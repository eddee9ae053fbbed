//! MySQL client core, speaking the wire protocol from scratch.
//!
//! This crate implements the engine under a MySQL client:
//!
//! - Packet framing with sequence ids, including reassembly and splitting at
//!   the 16 MiB boundary
//! - A value codec for the text and binary protocols: length-encoded
//!   integers, variable-width temporals, and null bitmaps
//! - Handshake authentication (`mysql_native_password`, the
//!   `caching_sha2_password` fast path, TLS upgrade behind the `tls` feature)
//! - A connection state machine with lazy row streams and the server's
//!   "consume one result set before the next command" rule enforced
//!   fail-fast
//!
//! # Example
//!
//! ```rust,no_run
//! use mysql_wire::{MySqlConfig, MySqlConnection};
//!
//! # fn main() -> mysql_wire::Result<()> {
//! let config = MySqlConfig::new()
//!     .host("localhost")
//!     .user("root")
//!     .database("test");
//!
//! let mut conn = MySqlConnection::connect(config)?;
//! let rows = conn.query("SELECT id, name FROM users")?;
//! for row in rows {
//!     let row = row?;
//!     println!("{:?}", row.get_by_name("name"));
//! }
//! conn.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! Out of scope here: pooling, SQL construction, TLS certificate management
//! beyond file paths, and every higher-level API. One connection is one
//! serial conversation; share it across threads only behind your own lock.

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod row;
pub mod tls;
pub mod types;
pub mod value;

pub use config::{MySqlConfig, SslMode, TlsConfig};
pub use connection::{BinaryRows, MySqlConnection, Stream, TextRows};
pub use error::{Error, Result};
pub use protocol::prepared::{PreparedStatement, StmtPrepareOk};
pub use protocol::{EofPacket, ErrPacket, Greeting, OkPacket};
pub use row::{ColumnInfo, Row};
pub use types::{ColumnDef, FieldType};
pub use value::{Date, DateTime, MySqlValue, Time};
