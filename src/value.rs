//! Dynamically-typed MySQL values.
//!
//! The text protocol transmits every field as a decimal/temporal lexeme; the
//! binary protocol uses native little-endian widths. Both codecs produce and
//! consume [`MySqlValue`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// A dynamically-typed MySQL value.
///
/// This enum is closed over everything the wire can carry: every consumer
/// matches exhaustively. Unsigned columns get their own variants because the
/// UNSIGNED column flag changes how the same bytes must be interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MySqlValue {
    /// SQL NULL
    Null,

    /// DECIMAL / NEWDECIMAL, lexeme preserved to keep arbitrary precision
    Decimal(String),

    /// TINYINT
    TinyInt(i8),
    /// TINYINT UNSIGNED
    TinyUInt(u8),

    /// SMALLINT
    SmallInt(i16),
    /// SMALLINT UNSIGNED
    SmallUInt(u16),

    /// INT and MEDIUMINT
    Int(i32),
    /// INT UNSIGNED and MEDIUMINT UNSIGNED
    UInt(u32),

    /// BIGINT
    BigInt(i64),
    /// BIGINT UNSIGNED
    BigUInt(u64),

    /// FLOAT (IEEE-754 single)
    Float(f32),
    /// DOUBLE (IEEE-754 double)
    Double(f64),

    /// YEAR
    Year(u16),

    /// DATE
    Date(Date),
    /// TIME, day and sign already folded away
    Time(Time),
    /// DATETIME / TIMESTAMP, local wall-clock
    DateTime(DateTime),

    /// Binary payloads (blobs, binary-charset strings, GEOMETRY)
    Bytes(Vec<u8>),
    /// Text payloads (any string family with a non-binary charset)
    Text(String),
}

/// Calendar date as MySQL stores it: no timezone, year 0 allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

/// Time of day. MySQL TIME also carries a sign and a day count on the wire;
/// both are dropped here, so `hour` can still exceed 23 when a textual
/// `HH:MM:SS` lexeme did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Time {
    pub hour: u16,
    pub minute: u8,
    pub second: u8,
    /// Fractional seconds in microseconds
    pub micros: u32,
}

/// Local wall-clock datetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateTime {
    pub date: Date,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Fractional seconds in microseconds
    pub micros: u32,
}

impl MySqlValue {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, MySqlValue::Null)
    }

    /// SQL-ish name of the carried type.
    pub const fn type_name(&self) -> &'static str {
        match self {
            MySqlValue::Null => "NULL",
            MySqlValue::Decimal(_) => "DECIMAL",
            MySqlValue::TinyInt(_) => "TINYINT",
            MySqlValue::TinyUInt(_) => "TINYINT UNSIGNED",
            MySqlValue::SmallInt(_) => "SMALLINT",
            MySqlValue::SmallUInt(_) => "SMALLINT UNSIGNED",
            MySqlValue::Int(_) => "INT",
            MySqlValue::UInt(_) => "INT UNSIGNED",
            MySqlValue::BigInt(_) => "BIGINT",
            MySqlValue::BigUInt(_) => "BIGINT UNSIGNED",
            MySqlValue::Float(_) => "FLOAT",
            MySqlValue::Double(_) => "DOUBLE",
            MySqlValue::Year(_) => "YEAR",
            MySqlValue::Date(_) => "DATE",
            MySqlValue::Time(_) => "TIME",
            MySqlValue::DateTime(_) => "DATETIME",
            MySqlValue::Bytes(_) => "BLOB",
            MySqlValue::Text(_) => "TEXT",
        }
    }

    /// Widen any integer variant to i64, when it fits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MySqlValue::TinyInt(v) => Some(i64::from(*v)),
            MySqlValue::TinyUInt(v) => Some(i64::from(*v)),
            MySqlValue::SmallInt(v) => Some(i64::from(*v)),
            MySqlValue::SmallUInt(v) => Some(i64::from(*v)),
            MySqlValue::Int(v) => Some(i64::from(*v)),
            MySqlValue::UInt(v) => Some(i64::from(*v)),
            MySqlValue::BigInt(v) => Some(*v),
            MySqlValue::BigUInt(v) => i64::try_from(*v).ok(),
            MySqlValue::Year(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Borrow the textual payload, when there is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MySqlValue::Text(s) => Some(s),
            MySqlValue::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the raw byte payload, when there is one.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            MySqlValue::Bytes(b) => Some(b),
            MySqlValue::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

impl Date {
    pub const fn new(year: u16, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }

    /// The all-zero date MySQL uses for "zero" DATE values.
    pub const ZERO: Date = Date {
        year: 0,
        month: 0,
        day: 0,
    };

    /// Parse a `YYYY-MM-DD` lexeme.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(3, '-');
        let year = parts.next()?.parse().ok()?;
        let month = parts.next()?.parse().ok()?;
        let day = parts.next()?.parse().ok()?;
        Some(Self { year, month, day })
    }
}

impl Time {
    pub const ZERO: Time = Time {
        hour: 0,
        minute: 0,
        second: 0,
        micros: 0,
    };

    /// Parse an `HH:MM:SS[.frac]` lexeme. `HH` may exceed two digits.
    pub fn parse(s: &str) -> Option<Self> {
        let (clock, frac) = split_fraction(s);
        let mut parts = clock.splitn(3, ':');
        let hour = parts.next()?.parse().ok()?;
        let minute = parts.next()?.parse().ok()?;
        let second = parts.next()?.parse().ok()?;
        let micros = parse_micros(frac)?;
        Some(Self {
            hour,
            minute,
            second,
            micros,
        })
    }
}

impl DateTime {
    pub const ZERO: DateTime = DateTime {
        date: Date::ZERO,
        hour: 0,
        minute: 0,
        second: 0,
        micros: 0,
    };

    /// Parse a `YYYY-MM-DD HH:MM:SS[.frac]` lexeme.
    pub fn parse(s: &str) -> Option<Self> {
        let (date_part, time_part) = s.split_once(' ')?;
        let date = Date::parse(date_part)?;
        let (clock, frac) = split_fraction(time_part);
        let mut parts = clock.splitn(3, ':');
        let hour = parts.next()?.parse().ok()?;
        let minute = parts.next()?.parse().ok()?;
        let second = parts.next()?.parse().ok()?;
        let micros = parse_micros(frac)?;
        Some(Self {
            date,
            hour,
            minute,
            second,
            micros,
        })
    }
}

/// Split off a trailing `.frac` component, if present.
fn split_fraction(s: &str) -> (&str, Option<&str>) {
    match s.split_once('.') {
        Some((clock, frac)) => (clock, Some(frac)),
        None => (s, None),
    }
}

/// Convert a fractional-seconds lexeme to microseconds. MySQL sends at most
/// six digits; shorter fractions are right-padded (`.78` is 780000 µs).
fn parse_micros(frac: Option<&str>) -> Option<u32> {
    let Some(frac) = frac else {
        return Some(0);
    };
    if frac.is_empty() || frac.len() > 6 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let digits: u32 = frac.parse().ok()?;
    Some(digits * 10u32.pow(6 - frac.len() as u32))
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)?;
        if self.micros != 0 {
            write!(f, ".{:06}", self.micros)?;
        }
        Ok(())
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:02}:{:02}:{:02}",
            self.date, self.hour, self.minute, self.second
        )?;
        if self.micros != 0 {
            write!(f, ".{:06}", self.micros)?;
        }
        Ok(())
    }
}

// Conversions from plain Rust types, for ergonomic parameter binding.

impl From<i8> for MySqlValue {
    fn from(v: i8) -> Self {
        MySqlValue::TinyInt(v)
    }
}

impl From<u8> for MySqlValue {
    fn from(v: u8) -> Self {
        MySqlValue::TinyUInt(v)
    }
}

impl From<i16> for MySqlValue {
    fn from(v: i16) -> Self {
        MySqlValue::SmallInt(v)
    }
}

impl From<u16> for MySqlValue {
    fn from(v: u16) -> Self {
        MySqlValue::SmallUInt(v)
    }
}

impl From<i32> for MySqlValue {
    fn from(v: i32) -> Self {
        MySqlValue::Int(v)
    }
}

impl From<u32> for MySqlValue {
    fn from(v: u32) -> Self {
        MySqlValue::UInt(v)
    }
}

impl From<i64> for MySqlValue {
    fn from(v: i64) -> Self {
        MySqlValue::BigInt(v)
    }
}

impl From<u64> for MySqlValue {
    fn from(v: u64) -> Self {
        MySqlValue::BigUInt(v)
    }
}

impl From<f32> for MySqlValue {
    fn from(v: f32) -> Self {
        MySqlValue::Float(v)
    }
}

impl From<f64> for MySqlValue {
    fn from(v: f64) -> Self {
        MySqlValue::Double(v)
    }
}

impl From<String> for MySqlValue {
    fn from(v: String) -> Self {
        MySqlValue::Text(v)
    }
}

impl From<&str> for MySqlValue {
    fn from(v: &str) -> Self {
        MySqlValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for MySqlValue {
    fn from(v: Vec<u8>) -> Self {
        MySqlValue::Bytes(v)
    }
}

impl From<&[u8]> for MySqlValue {
    fn from(v: &[u8]) -> Self {
        MySqlValue::Bytes(v.to_vec())
    }
}

impl From<Date> for MySqlValue {
    fn from(v: Date) -> Self {
        MySqlValue::Date(v)
    }
}

impl From<Time> for MySqlValue {
    fn from(v: Time) -> Self {
        MySqlValue::Time(v)
    }
}

impl From<DateTime> for MySqlValue {
    fn from(v: DateTime) -> Self {
        MySqlValue::DateTime(v)
    }
}

impl<T: Into<MySqlValue>> From<Option<T>> for MySqlValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => MySqlValue::Null,
        }
    }
}
