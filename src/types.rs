//! MySQL column types and the text/binary value codecs.
//!
//! The text protocol renders every field as a length-encoded lexeme with
//! `0xFB` marking NULL in place. The binary protocol uses native
//! little-endian widths and moves NULLs out-of-band into a per-row bitmap
//! whose bits start at offset 2.

#![allow(clippy::cast_possible_truncation)]

use crate::error::{Error, Result};
use crate::protocol::reader::PacketReader;
use crate::protocol::writer::PacketWriter;
use crate::value::{Date, DateTime, MySqlValue, Time};

/// Text-protocol NULL marker, valid only where a length-encoded string begins.
pub const NULL_SENTINEL: u8 = 0xFB;

/// Column type codes (the `MYSQL_TYPE_*` constants).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0A,
    Time = 0x0B,
    DateTime = 0x0C,
    Year = 0x0D,
    NewDate = 0x0E,
    VarChar = 0x0F,
    Bit = 0x10,
    Timestamp2 = 0x11,
    DateTime2 = 0x12,
    Time2 = 0x13,
    Json = 0xF5,
    NewDecimal = 0xF6,
    Enum = 0xF7,
    Set = 0xF8,
    TinyBlob = 0xF9,
    MediumBlob = 0xFA,
    LongBlob = 0xFB,
    Blob = 0xFC,
    VarString = 0xFD,
    String = 0xFE,
    Geometry = 0xFF,
}

impl FieldType {
    /// Parse a type code. Unknown codes fall back to `String`, which keeps
    /// the raw payload reachable instead of failing the whole row.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0A => FieldType::Date,
            0x0B => FieldType::Time,
            0x0C => FieldType::DateTime,
            0x0D => FieldType::Year,
            0x0E => FieldType::NewDate,
            0x0F => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0x11 => FieldType::Timestamp2,
            0x12 => FieldType::DateTime2,
            0x13 => FieldType::Time2,
            0xF5 => FieldType::Json,
            0xF6 => FieldType::NewDecimal,
            0xF7 => FieldType::Enum,
            0xF8 => FieldType::Set,
            0xF9 => FieldType::TinyBlob,
            0xFA => FieldType::MediumBlob,
            0xFB => FieldType::LongBlob,
            0xFC => FieldType::Blob,
            0xFD => FieldType::VarString,
            0xFE => FieldType::String,
            0xFF => FieldType::Geometry,
            _ => FieldType::String,
        }
    }

    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            FieldType::Tiny
                | FieldType::Short
                | FieldType::Long
                | FieldType::Int24
                | FieldType::LongLong
                | FieldType::Year
        )
    }

    #[must_use]
    pub const fn is_temporal(self) -> bool {
        matches!(
            self,
            FieldType::Date
                | FieldType::NewDate
                | FieldType::Time
                | FieldType::Time2
                | FieldType::DateTime
                | FieldType::DateTime2
                | FieldType::Timestamp
                | FieldType::Timestamp2
        )
    }

    /// Types whose text lexeme is parsed rather than passed through.
    #[must_use]
    pub const fn is_parsed_from_text(self) -> bool {
        self.is_integer()
            || self.is_temporal()
            || matches!(
                self,
                FieldType::Decimal | FieldType::NewDecimal | FieldType::Float | FieldType::Double
            )
    }
}

/// Column definition flags.
#[allow(dead_code)]
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const UNIQUE_KEY: u16 = 4;
    pub const BLOB: u16 = 16;
    pub const UNSIGNED: u16 = 32;
    pub const ZEROFILL: u16 = 64;
    pub const BINARY: u16 = 128;
    pub const AUTO_INCREMENT: u16 = 512;
}

/// A column definition packet from result-set metadata.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    /// Always "def"
    pub catalog: String,
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub charset: u16,
    pub column_length: u32,
    pub column_type: FieldType,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDef {
    /// Parse a protocol-4.1 column definition payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = PacketReader::new(payload);
        let field = |r: &mut PacketReader<'_>, what: &str| {
            r.read_lenenc_string()
                .ok_or_else(|| Error::decode(format!("column definition missing {what}")))
        };

        let catalog = field(&mut r, "catalog")?;
        let schema = field(&mut r, "schema")?;
        let table = field(&mut r, "table")?;
        let org_table = field(&mut r, "original table")?;
        let name = field(&mut r, "name")?;
        let org_name = field(&mut r, "original name")?;

        // length of the fixed-size tail, always 0x0C
        r.read_lenenc_int()
            .ok_or_else(|| Error::decode("column definition missing fixed-length marker"))?;

        let charset = r
            .read_u16_le()
            .ok_or_else(|| Error::decode_column("missing charset", &name))?;
        let column_length = r
            .read_u32_le()
            .ok_or_else(|| Error::decode_column("missing column length", &name))?;
        let column_type = FieldType::from_u8(
            r.read_u8()
                .ok_or_else(|| Error::decode_column("missing column type", &name))?,
        );
        let flags = r
            .read_u16_le()
            .ok_or_else(|| Error::decode_column("missing flags", &name))?;
        let decimals = r
            .read_u8()
            .ok_or_else(|| Error::decode_column("missing decimals", &name))?;

        Ok(Self {
            catalog,
            schema,
            table,
            org_table,
            name,
            org_name,
            charset,
            column_length,
            column_type,
            flags,
            decimals,
        })
    }

    #[must_use]
    pub const fn is_unsigned(&self) -> bool {
        self.flags & column_flags::UNSIGNED != 0
    }

    /// Charset 63 is the binary pseudo-charset; such columns carry raw bytes.
    #[must_use]
    pub const fn is_binary_charset(&self) -> bool {
        self.charset == 63
    }

    #[must_use]
    pub const fn is_not_null(&self) -> bool {
        self.flags & column_flags::NOT_NULL != 0
    }

    #[must_use]
    pub const fn is_auto_increment(&self) -> bool {
        self.flags & column_flags::AUTO_INCREMENT != 0
    }
}

// ---------------------------------------------------------------------------
// Text protocol
// ---------------------------------------------------------------------------

/// Parse one text-protocol row payload against its column definitions.
///
/// Each field is either the `0xFB` NULL sentinel or a length-encoded lexeme.
pub fn parse_text_row(payload: &[u8], columns: &[ColumnDef]) -> Result<Vec<MySqlValue>> {
    let mut r = PacketReader::new(payload);
    let mut values = Vec::with_capacity(columns.len());

    for col in columns {
        if r.peek() == Some(NULL_SENTINEL) {
            r.skip(1);
            values.push(MySqlValue::Null);
            continue;
        }
        let lexeme = r
            .read_lenenc_bytes()
            .ok_or_else(|| Error::decode_column("truncated text row", &col.name))?;
        values.push(decode_text_value(col, lexeme)?);
    }

    Ok(values)
}

/// Decode one text-protocol lexeme per its column type.
pub fn decode_text_value(col: &ColumnDef, data: &[u8]) -> Result<MySqlValue> {
    // Servers have been seen sending an empty lexeme where a typed value
    // belongs; treat it as NULL rather than a parse failure.
    if data.is_empty() && col.column_type.is_parsed_from_text() {
        return Ok(MySqlValue::Null);
    }

    let text = || String::from_utf8_lossy(data);
    let bad = |what: &str| Error::decode_column(format!("bad {what} lexeme: {:?}", text()), &col.name);

    match col.column_type {
        FieldType::Null => Ok(MySqlValue::Null),

        FieldType::Decimal | FieldType::NewDecimal => {
            let lexeme = text().into_owned();
            if is_decimal_lexeme(&lexeme) {
                Ok(MySqlValue::Decimal(lexeme))
            } else {
                Err(bad("decimal"))
            }
        }

        FieldType::Tiny => {
            if col.is_unsigned() {
                text().parse().map(MySqlValue::TinyUInt)
            } else {
                text().parse().map(MySqlValue::TinyInt)
            }
            .map_err(|_| bad("integer"))
        }
        FieldType::Short => {
            if col.is_unsigned() {
                text().parse().map(MySqlValue::SmallUInt)
            } else {
                text().parse().map(MySqlValue::SmallInt)
            }
            .map_err(|_| bad("integer"))
        }
        FieldType::Long | FieldType::Int24 => {
            if col.is_unsigned() {
                text().parse().map(MySqlValue::UInt)
            } else {
                text().parse().map(MySqlValue::Int)
            }
            .map_err(|_| bad("integer"))
        }
        FieldType::LongLong => {
            if col.is_unsigned() {
                text().parse().map(MySqlValue::BigUInt)
            } else {
                text().parse().map(MySqlValue::BigInt)
            }
            .map_err(|_| bad("integer"))
        }
        FieldType::Year => text().parse().map(MySqlValue::Year).map_err(|_| bad("year")),

        FieldType::Float => text().parse().map(MySqlValue::Float).map_err(|_| bad("float")),
        FieldType::Double => text()
            .parse()
            .map(MySqlValue::Double)
            .map_err(|_| bad("double")),

        FieldType::Timestamp | FieldType::DateTime | FieldType::Timestamp2 | FieldType::DateTime2 => {
            DateTime::parse(&text())
                .map(MySqlValue::DateTime)
                .ok_or_else(|| bad("datetime"))
        }
        FieldType::Date | FieldType::NewDate => Date::parse(&text())
            .map(MySqlValue::Date)
            .ok_or_else(|| bad("date")),
        FieldType::Time | FieldType::Time2 => Time::parse(&text())
            .map(MySqlValue::Time)
            .ok_or_else(|| bad("time")),

        FieldType::Geometry => Ok(MySqlValue::Bytes(data.to_vec())),

        // Every string/blob/enum/set/bit family: text unless the column
        // carries the binary pseudo-charset.
        FieldType::VarChar
        | FieldType::Bit
        | FieldType::Json
        | FieldType::Enum
        | FieldType::Set
        | FieldType::TinyBlob
        | FieldType::MediumBlob
        | FieldType::LongBlob
        | FieldType::Blob
        | FieldType::VarString
        | FieldType::String => {
            if col.is_binary_charset() {
                Ok(MySqlValue::Bytes(data.to_vec()))
            } else {
                Ok(MySqlValue::Text(text().into_owned()))
            }
        }
    }
}

/// Render a value in its canonical text-protocol form.
///
/// NULL has no textual rendering; on the wire it is the `0xFB` sentinel in
/// place of the whole length-encoded field, which is the caller's job.
pub fn encode_text_value(value: &MySqlValue) -> Vec<u8> {
    match value {
        MySqlValue::Null => Vec::new(),
        MySqlValue::Decimal(s) => s.clone().into_bytes(),
        MySqlValue::TinyInt(v) => v.to_string().into_bytes(),
        MySqlValue::TinyUInt(v) => v.to_string().into_bytes(),
        MySqlValue::SmallInt(v) => v.to_string().into_bytes(),
        MySqlValue::SmallUInt(v) => v.to_string().into_bytes(),
        MySqlValue::Int(v) => v.to_string().into_bytes(),
        MySqlValue::UInt(v) => v.to_string().into_bytes(),
        MySqlValue::BigInt(v) => v.to_string().into_bytes(),
        MySqlValue::BigUInt(v) => v.to_string().into_bytes(),
        MySqlValue::Float(v) => v.to_string().into_bytes(),
        MySqlValue::Double(v) => v.to_string().into_bytes(),
        MySqlValue::Year(v) => v.to_string().into_bytes(),
        MySqlValue::Date(v) => v.to_string().into_bytes(),
        MySqlValue::Time(v) => v.to_string().into_bytes(),
        MySqlValue::DateTime(v) => v.to_string().into_bytes(),
        MySqlValue::Bytes(b) => b.clone(),
        MySqlValue::Text(s) => s.clone().into_bytes(),
    }
}

/// A decimal lexeme: optional sign, digits, at most one dot.
fn is_decimal_lexeme(s: &str) -> bool {
    let body = s.strip_prefix(['+', '-']).unwrap_or(s);
    if body.is_empty() {
        return false;
    }
    let mut dots = 0;
    for b in body.bytes() {
        match b {
            b'0'..=b'9' => {}
            b'.' => dots += 1,
            _ => return false,
        }
    }
    dots <= 1 && body != "."
}

// ---------------------------------------------------------------------------
// Binary protocol
// ---------------------------------------------------------------------------

/// Bit offset of the first column in a binary *row* null bitmap. The first
/// two bits are reserved, so column `k` lives at bit `k + 2`.
pub const ROW_BITMAP_OFFSET: usize = 2;

/// Parse one binary-protocol row payload against its column definitions.
///
/// Layout: a `0x00` row header (not an OK packet), a null bitmap of
/// `(columns + 7 + 2) / 8` bytes with bit offset 2, then the non-NULL values
/// back to back in column order.
pub fn parse_binary_row(payload: &[u8], columns: &[ColumnDef]) -> Result<Vec<MySqlValue>> {
    let mut r = PacketReader::new(payload);

    match r.read_u8() {
        Some(0x00) => {}
        _ => return Err(Error::decode("binary row missing 0x00 header byte")),
    }

    let bitmap_len = (columns.len() + 7 + ROW_BITMAP_OFFSET) / 8;
    let bitmap = r
        .read_bytes(bitmap_len)
        .ok_or_else(|| Error::decode("binary row shorter than its null bitmap"))?;

    let mut values = Vec::with_capacity(columns.len());
    for (k, col) in columns.iter().enumerate() {
        let bit = k + ROW_BITMAP_OFFSET;
        if bitmap[bit >> 3] & (1 << (bit & 7)) != 0 {
            values.push(MySqlValue::Null);
        } else {
            values.push(decode_binary_value(col, &mut r)?);
        }
    }

    Ok(values)
}

/// Decode one binary-protocol value per its column type.
pub fn decode_binary_value(col: &ColumnDef, r: &mut PacketReader<'_>) -> Result<MySqlValue> {
    let short = || Error::decode_column("binary value truncated", &col.name);

    match col.column_type {
        FieldType::Null => Ok(MySqlValue::Null),

        FieldType::Tiny => {
            let v = r.read_u8().ok_or_else(short)?;
            Ok(if col.is_unsigned() {
                MySqlValue::TinyUInt(v)
            } else {
                MySqlValue::TinyInt(v as i8)
            })
        }
        FieldType::Short => {
            let v = r.read_u16_le().ok_or_else(short)?;
            Ok(if col.is_unsigned() {
                MySqlValue::SmallUInt(v)
            } else {
                MySqlValue::SmallInt(v as i16)
            })
        }
        FieldType::Year => Ok(MySqlValue::Year(r.read_u16_le().ok_or_else(short)?)),
        FieldType::Long | FieldType::Int24 => {
            let v = r.read_u32_le().ok_or_else(short)?;
            Ok(if col.is_unsigned() {
                MySqlValue::UInt(v)
            } else {
                MySqlValue::Int(v as i32)
            })
        }
        FieldType::LongLong => {
            let v = r.read_u64_le().ok_or_else(short)?;
            Ok(if col.is_unsigned() {
                MySqlValue::BigUInt(v)
            } else {
                MySqlValue::BigInt(v as i64)
            })
        }

        FieldType::Float => Ok(MySqlValue::Float(r.read_f32_le().ok_or_else(short)?)),
        FieldType::Double => Ok(MySqlValue::Double(r.read_f64_le().ok_or_else(short)?)),

        FieldType::Timestamp | FieldType::DateTime => {
            let len = r.read_lenenc_int().ok_or_else(short)?;
            let mut dt = DateTime::ZERO;
            match len {
                0 => {}
                4 | 7 | 11 => {
                    dt.date.year = r.read_u16_le().ok_or_else(short)?;
                    dt.date.month = r.read_u8().ok_or_else(short)?;
                    dt.date.day = r.read_u8().ok_or_else(short)?;
                    if len >= 7 {
                        dt.hour = r.read_u8().ok_or_else(short)?;
                        dt.minute = r.read_u8().ok_or_else(short)?;
                        dt.second = r.read_u8().ok_or_else(short)?;
                    }
                    if len == 11 {
                        dt.micros = r.read_u32_le().ok_or_else(short)?;
                    }
                }
                other => {
                    return Err(Error::decode_column(
                        format!("bad binary datetime length {other}"),
                        &col.name,
                    ))
                }
            }
            Ok(MySqlValue::DateTime(dt))
        }

        FieldType::Date | FieldType::NewDate => {
            let len = r.read_lenenc_int().ok_or_else(short)?;
            match len {
                0 => Ok(MySqlValue::Date(Date::ZERO)),
                4 => {
                    let year = r.read_u16_le().ok_or_else(short)?;
                    let month = r.read_u8().ok_or_else(short)?;
                    let day = r.read_u8().ok_or_else(short)?;
                    Ok(MySqlValue::Date(Date { year, month, day }))
                }
                other => Err(Error::decode_column(
                    format!("bad binary date length {other}"),
                    &col.name,
                )),
            }
        }

        FieldType::Time => {
            let len = r.read_lenenc_int().ok_or_else(short)?;
            match len {
                0 => Ok(MySqlValue::Time(Time::ZERO)),
                8 | 12 => {
                    // sign and day count have no representation here
                    r.read_u8().ok_or_else(short)?;
                    r.read_u32_le().ok_or_else(short)?;
                    let hour = u16::from(r.read_u8().ok_or_else(short)?);
                    let minute = r.read_u8().ok_or_else(short)?;
                    let second = r.read_u8().ok_or_else(short)?;
                    let micros = if len == 12 {
                        r.read_u32_le().ok_or_else(short)?
                    } else {
                        0
                    };
                    Ok(MySqlValue::Time(Time {
                        hour,
                        minute,
                        second,
                        micros,
                    }))
                }
                other => Err(Error::decode_column(
                    format!("bad binary time length {other}"),
                    &col.name,
                )),
            }
        }

        FieldType::Geometry => {
            let bytes = r.read_lenenc_bytes().ok_or_else(short)?;
            Ok(MySqlValue::Bytes(bytes.to_vec()))
        }

        FieldType::VarChar
        | FieldType::Bit
        | FieldType::Json
        | FieldType::Enum
        | FieldType::Set
        | FieldType::TinyBlob
        | FieldType::MediumBlob
        | FieldType::LongBlob
        | FieldType::Blob
        | FieldType::VarString
        | FieldType::String => {
            let bytes = r.read_lenenc_bytes().ok_or_else(short)?;
            if col.is_binary_charset() {
                Ok(MySqlValue::Bytes(bytes.to_vec()))
            } else {
                Ok(MySqlValue::Text(String::from_utf8_lossy(bytes).into_owned()))
            }
        }

        FieldType::Decimal
        | FieldType::NewDecimal
        | FieldType::Timestamp2
        | FieldType::DateTime2
        | FieldType::Time2 => Err(Error::decode_column(
            format!("no binary codec for {:?}", col.column_type),
            &col.name,
        )),
    }
}

/// The `(type, flag)` pair advertised for a parameter in COM_STMT_EXECUTE.
///
/// All integers wider than a byte advertise LONGLONG; the flag byte is 0x01
/// for unsigned variants and 0x00 otherwise.
pub fn binary_param_type(value: &MySqlValue) -> (FieldType, u8) {
    match value {
        MySqlValue::Null => (FieldType::Null, 0x00),
        MySqlValue::Decimal(_) => (FieldType::Decimal, 0x00),
        MySqlValue::TinyInt(_) => (FieldType::Long, 0x00),
        MySqlValue::TinyUInt(_) => (FieldType::Long, 0x01),
        MySqlValue::SmallInt(_) | MySqlValue::Int(_) | MySqlValue::BigInt(_) => {
            (FieldType::LongLong, 0x00)
        }
        MySqlValue::SmallUInt(_) | MySqlValue::UInt(_) | MySqlValue::BigUInt(_) => {
            (FieldType::LongLong, 0x01)
        }
        MySqlValue::Float(_) => (FieldType::Float, 0x00),
        MySqlValue::Double(_) => (FieldType::Double, 0x00),
        MySqlValue::Year(_) => (FieldType::Year, 0x00),
        MySqlValue::DateTime(_) => (FieldType::DateTime, 0x00),
        MySqlValue::Date(_) => (FieldType::Date, 0x00),
        MySqlValue::Time(_) => (FieldType::Time, 0x00),
        MySqlValue::Bytes(_) => (FieldType::Blob, 0x00),
        MySqlValue::Text(_) => (FieldType::String, 0x00),
    }
}

/// Write one parameter value in its binary-protocol form.
///
/// The server reads exactly the byte count implied by the advertised type,
/// so integers are widened to that width: the LONG pair carries 4 bytes,
/// LONGLONG carries 8. Floats go out at their natural widths; blobs and
/// lexemes are length-encoded; temporals always use the extended
/// fixed-length layouts (4 bytes for dates, 11 for datetimes, 12 for times).
/// NULL writes nothing: the parameter null bitmap is its only carrier.
pub fn encode_binary_value(w: &mut PacketWriter, value: &MySqlValue) {
    match value {
        MySqlValue::Null => {}

        MySqlValue::TinyInt(v) => w.write_u32_le(i32::from(*v) as u32),
        MySqlValue::TinyUInt(v) => w.write_u32_le(u32::from(*v)),
        MySqlValue::SmallInt(v) => w.write_u64_le(i64::from(*v) as u64),
        MySqlValue::SmallUInt(v) => w.write_u64_le(u64::from(*v)),
        MySqlValue::Int(v) => w.write_u64_le(i64::from(*v) as u64),
        MySqlValue::UInt(v) => w.write_u64_le(u64::from(*v)),
        MySqlValue::BigInt(v) => w.write_u64_le(*v as u64),
        MySqlValue::BigUInt(v) => w.write_u64_le(*v),

        MySqlValue::Float(v) => w.write_f32_le(*v),
        MySqlValue::Double(v) => w.write_f64_le(*v),
        MySqlValue::Year(v) => w.write_u16_le(*v),

        MySqlValue::Date(d) => {
            w.write_u8(4);
            w.write_u16_le(d.year);
            w.write_u8(d.month);
            w.write_u8(d.day);
        }
        MySqlValue::DateTime(dt) => {
            w.write_u8(11);
            w.write_u16_le(dt.date.year);
            w.write_u8(dt.date.month);
            w.write_u8(dt.date.day);
            w.write_u8(dt.hour);
            w.write_u8(dt.minute);
            w.write_u8(dt.second);
            w.write_u32_le(dt.micros);
        }
        MySqlValue::Time(t) => {
            w.write_u8(12);
            w.write_u8(0); // sign
            w.write_u32_le(u32::from(t.hour / 24));
            w.write_u8((t.hour % 24) as u8);
            w.write_u8(t.minute);
            w.write_u8(t.second);
            w.write_u32_le(t.micros);
        }

        MySqlValue::Decimal(s) => w.write_lenenc_bytes(s.as_bytes()),
        MySqlValue::Text(s) => w.write_lenenc_bytes(s.as_bytes()),
        MySqlValue::Bytes(b) => w.write_lenenc_bytes(b),
    }
}
