//! Payload builder and packet framing for the outbound direction.

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::{PacketHeader, MAX_PACKET_SIZE};

/// An append-only buffer speaking MySQL's wire encodings.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buffer: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_u16_le(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u24_le(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes()[..3]);
    }

    pub fn write_u32_le(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64_le(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32_le(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f64_le(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a length-encoded integer in its shortest form.
    ///
    /// Values below 0xFB fit in the lead byte itself; 0xFB/0xFC/0xFD/0xFE are
    /// reserved as markers, so 251..=65535 take the 0xFC form.
    pub fn write_lenenc_int(&mut self, value: u64) {
        if value < 0xFB {
            self.write_u8(value as u8);
        } else if value <= 0xFFFF {
            self.write_u8(0xFC);
            self.write_u16_le(value as u16);
        } else if value <= 0xFF_FFFF {
            self.write_u8(0xFD);
            self.write_u24_le(value as u32);
        } else {
            self.write_u8(0xFE);
            self.write_u64_le(value);
        }
    }

    /// Length-encoded byte blob: lenenc length prefix, then the bytes.
    pub fn write_lenenc_bytes(&mut self, data: &[u8]) {
        self.write_lenenc_int(data.len() as u64);
        self.buffer.extend_from_slice(data);
    }

    pub fn write_lenenc_string(&mut self, s: &str) {
        self.write_lenenc_bytes(s.as_bytes());
    }

    pub fn write_null_string(&mut self, s: &str) {
        self.buffer.extend_from_slice(s.as_bytes());
        self.buffer.push(0);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn write_zeros(&mut self, count: usize) {
        self.buffer.resize(self.buffer.len() + count, 0);
    }
}

/// Frame a command payload into one or more wire packets.
///
/// Each frame carries at most [`MAX_PACKET_SIZE`] payload bytes; the sequence
/// id advances per frame. A payload that is an exact multiple of the maximum
/// is followed by an empty terminating frame, since the receiver keeps
/// concatenating until it sees a frame shorter than the maximum.
pub fn frame_payload(payload: &[u8], sequence_id: &mut u8) -> Vec<u8> {
    let mut framed = Vec::with_capacity(payload.len() + 4);

    let mut offset = 0;
    loop {
        let chunk_len = (payload.len() - offset).min(MAX_PACKET_SIZE);
        let header = PacketHeader {
            payload_length: chunk_len as u32,
            sequence_id: *sequence_id,
        };
        framed.extend_from_slice(&header.to_bytes());
        framed.extend_from_slice(&payload[offset..offset + chunk_len]);
        offset += chunk_len;
        *sequence_id = sequence_id.wrapping_add(1);

        // A short frame (possibly empty) terminates the packet.
        if chunk_len < MAX_PACKET_SIZE {
            break;
        }
    }

    framed
}
