//! Meshtastic stream framing.
//!
//! On serial and TCP links every protobuf is preceded by a 4-byte header:
//!
//!   `0x94 0xC3 <len_hi> <len_lo>`
//!
//! Anything between frames (boot banners, debug console text) is skipped by scanning
//! forward to the next `0x94 0xC3` pair.

use crate::transport::TransportError;

pub const START1: u8 = 0x94;
pub const START2: u8 = 0xC3;
pub const HEADER_LEN: usize = 4;

/// Largest `ToRadio` the firmware accepts.
pub const MAX_TO_RADIO_SIZE: usize = 512;

/// Declared lengths above this are treated as garbage and resynced past.
pub const MAX_FROM_RADIO_SIZE: usize = 8192;

/// Incremental decoder: feed arbitrary chunks, pull whole payloads.
#[derive(Debug, Default)]
pub struct StreamFramer {
    buf: Vec<u8>,
    skipped: usize,
}

impl StreamFramer {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(1024),
            skipped: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Bytes discarded while resyncing since the last call.
    pub fn take_skipped(&mut self) -> usize {
        std::mem::take(&mut self.skipped)
    }

    /// Next complete payload, or `None` until more data arrives.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            if !self.align() || self.buf.len() < HEADER_LEN {
                return None;
            }
            let declared = ((self.buf[2] as usize) << 8) | self.buf[3] as usize;
            if declared == 0 || declared > MAX_FROM_RADIO_SIZE {
                self.discard(1);
                continue;
            }
            if self.buf.len() < HEADER_LEN + declared {
                return None;
            }
            let frame = self.buf[HEADER_LEN..HEADER_LEN + declared].to_vec();
            self.buf.drain(..HEADER_LEN + declared);
            return Some(frame);
        }
    }

    /// Move the buffer start to a frame header. Returns false when the buffer holds no
    /// candidate at all (a lone trailing `0x94` is kept).
    fn align(&mut self) -> bool {
        loop {
            match self.buf.iter().position(|&b| b == START1) {
                None => {
                    let n = self.buf.len();
                    self.discard(n);
                    return false;
                }
                Some(pos) => {
                    self.discard(pos);
                    if self.buf.len() < 2 || self.buf[1] == START2 {
                        return true;
                    }
                    self.discard(1);
                }
            }
        }
    }

    fn discard(&mut self, n: usize) {
        if n > 0 {
            self.buf.drain(..n);
            self.skipped += n;
        }
    }
}

/// Prefix `payload` with a stream header.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    if payload.len() > MAX_TO_RADIO_SIZE {
        return Err(TransportError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_TO_RADIO_SIZE,
        });
    }
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(START1);
    out.push(START2);
    out.push(((payload.len() >> 8) & 0xFF) as u8);
    out.push((payload.len() & 0xFF) as u8);
    out.extend_from_slice(payload);
    Ok(out)
}
