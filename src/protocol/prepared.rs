//! Prepared-statement packets: COM_STMT_PREPARE / EXECUTE / CLOSE / RESET.
//!
//! The execute packet carries parameters in the binary protocol: a null
//! bitmap (offset 0, unlike result rows), one `(type, flag)` pair per
//! parameter, then the non-NULL values back to back.

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::writer::PacketWriter;
use crate::protocol::Command;
use crate::types::{binary_param_type, encode_binary_value, ColumnDef};
use crate::value::MySqlValue;

/// The server's reply to COM_STMT_PREPARE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmtPrepareOk {
    pub statement_id: u32,
    /// Columns in the eventual result set; 0 for non-SELECT statements
    pub num_columns: u16,
    /// Placeholders in the SQL
    pub num_params: u16,
    pub warnings: u16,
}

impl StmtPrepareOk {
    /// Parse the 12-byte prepare-OK payload.
    ///
    /// Layout: `0x00` status, statement id (u32), column count (u16),
    /// parameter count (u16), one reserved byte, warning count (u16).
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 12 || payload[0] != 0x00 {
            return None;
        }
        Some(Self {
            statement_id: u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]),
            num_columns: u16::from_le_bytes([payload[5], payload[6]]),
            num_params: u16::from_le_bytes([payload[7], payload[8]]),
            warnings: u16::from_le_bytes([payload[10], payload[11]]),
        })
    }
}

/// A prepared statement and the metadata the server sent back for it.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub statement_id: u32,
    /// The prepared SQL, kept for diagnostics
    pub sql: String,
    /// Placeholder metadata
    pub params: Vec<ColumnDef>,
    /// Result-set column metadata
    pub columns: Vec<ColumnDef>,
}

impl PreparedStatement {
    pub fn new(
        statement_id: u32,
        sql: String,
        params: Vec<ColumnDef>,
        columns: Vec<ColumnDef>,
    ) -> Self {
        Self {
            statement_id,
            sql,
            params,
            columns,
        }
    }

    #[must_use]
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// COM_STMT_PREPARE payload: command byte followed by the raw SQL.
pub fn stmt_prepare_payload(sql: &str) -> Vec<u8> {
    let mut w = PacketWriter::with_capacity(1 + sql.len());
    w.write_u8(Command::StmtPrepare as u8);
    w.write_bytes(sql.as_bytes());
    w.into_bytes()
}

/// COM_STMT_EXECUTE payload.
///
/// Layout: command byte, statement id (u32), cursor flags (`0x00`, no
/// cursor), iteration count (always 1), then — only when there are
/// parameters — the null bitmap, a new-params-bound marker of 1, the
/// advertised `(type, flag)` pairs derived from the values themselves, and
/// the encoded non-NULL values.
pub fn stmt_execute_payload(statement_id: u32, params: &[MySqlValue]) -> Vec<u8> {
    let mut w = PacketWriter::with_capacity(16 + params.len() * 16);

    w.write_u8(Command::StmtExecute as u8);
    w.write_u32_le(statement_id);
    w.write_u8(0x00);
    w.write_u32_le(1);

    if !params.is_empty() {
        w.write_bytes(&param_null_bitmap(params));
        w.write_u8(1);

        for param in params {
            let (field_type, flag) = binary_param_type(param);
            w.write_u8(field_type as u8);
            w.write_u8(flag);
        }

        for param in params {
            encode_binary_value(&mut w, param);
        }
    }

    w.into_bytes()
}

/// COM_STMT_CLOSE payload. The server never replies to this command.
pub fn stmt_close_payload(statement_id: u32) -> Vec<u8> {
    let mut w = PacketWriter::with_capacity(5);
    w.write_u8(Command::StmtClose as u8);
    w.write_u32_le(statement_id);
    w.into_bytes()
}

/// COM_STMT_RESET payload.
pub fn stmt_reset_payload(statement_id: u32) -> Vec<u8> {
    let mut w = PacketWriter::with_capacity(5);
    w.write_u8(Command::StmtReset as u8);
    w.write_u32_le(statement_id);
    w.into_bytes()
}

/// Build the parameter null bitmap: bit `k` set iff parameter `k` is NULL,
/// `(n + 7) / 8` bytes, no bit offset.
pub fn param_null_bitmap(params: &[MySqlValue]) -> Vec<u8> {
    let mut bitmap = vec![0u8; params.len().div_ceil(8)];
    for (k, param) in params.iter().enumerate() {
        if param.is_null() {
            bitmap[k / 8] |= 1 << (k % 8);
        }
    }
    bitmap
}
