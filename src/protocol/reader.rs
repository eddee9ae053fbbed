//! Cursor-style reader over a packet payload.
//!
//! Every multi-byte integer on the MySQL wire is little-endian. Sizes are
//! usually carried as length-encoded integers; see [`PacketReader::read_lenenc_int`].

#![allow(clippy::cast_possible_truncation)]

/// A non-owning reader positioned inside a payload buffer.
///
/// All `read_*` methods return `None` once the buffer is exhausted, leaving
/// error construction to the caller, which knows what it was parsing.
#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes left between the cursor and the end of the payload.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Look at the next byte without consuming it.
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let byte = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    pub fn read_u16_le(&mut self) -> Option<u16> {
        let bytes = self.read_bytes(2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Three-byte little-endian integer, as used in packet headers.
    pub fn read_u24_le(&mut self) -> Option<u32> {
        let bytes = self.read_bytes(3)?;
        Some(u32::from(bytes[0]) | u32::from(bytes[1]) << 8 | u32::from(bytes[2]) << 16)
    }

    pub fn read_u32_le(&mut self) -> Option<u32> {
        let bytes = self.read_bytes(4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64_le(&mut self) -> Option<u64> {
        let bytes = self.read_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Some(u64::from_le_bytes(buf))
    }

    pub fn read_f32_le(&mut self) -> Option<f32> {
        self.read_u32_le().map(f32::from_bits)
    }

    pub fn read_f64_le(&mut self) -> Option<f64> {
        self.read_u64_le().map(f64::from_bits)
    }

    /// Read a length-encoded integer.
    ///
    /// The first byte picks the form:
    /// - `< 0xFB`: the value itself
    /// - `0xFC`: u16 follows
    /// - `0xFD`: u24 follows
    /// - `0xFE`: u64 follows
    ///
    /// `0xFB` is the NULL marker for length-encoded *strings* and is never a
    /// valid integer lead byte, so it returns `None` here, as does `0xFF`.
    pub fn read_lenenc_int(&mut self) -> Option<u64> {
        match self.read_u8()? {
            first @ 0x00..=0xFA => Some(u64::from(first)),
            0xFC => self.read_u16_le().map(u64::from),
            0xFD => self.read_u24_le().map(u64::from),
            0xFE => self.read_u64_le(),
            0xFB | 0xFF => None,
        }
    }

    /// Read a length-encoded byte blob, borrowing from the payload.
    pub fn read_lenenc_bytes(&mut self) -> Option<&'a [u8]> {
        let len = self.read_lenenc_int()? as usize;
        self.read_bytes(len)
    }

    /// Read a length-encoded string, lossily decoding to UTF-8.
    pub fn read_lenenc_string(&mut self) -> Option<String> {
        let bytes = self.read_lenenc_bytes()?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Read up to (and consume) a NUL terminator.
    pub fn read_null_string(&mut self) -> Option<String> {
        let start = self.pos;
        while self.pos < self.data.len() && self.data[self.pos] != 0 {
            self.pos += 1;
        }
        let s = String::from_utf8_lossy(&self.data[start..self.pos]).into_owned();
        if self.pos < self.data.len() {
            self.pos += 1; // the NUL itself
        }
        Some(s)
    }

    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return None;
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Some(bytes)
    }

    /// Everything from the cursor to the end of the payload.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    /// Remaining payload, lossily decoded to UTF-8.
    pub fn read_rest_string(&mut self) -> String {
        String::from_utf8_lossy(self.read_rest()).into_owned()
    }

    pub fn skip(&mut self, n: usize) -> bool {
        if self.remaining() >= n {
            self.pos += n;
            true
        } else {
            false
        }
    }
}
