//! Bitstream writer and reader for packet bodies.
//!
//! Bit fields are packed least-significant bit first and may cross byte boundaries. Byte-level
//! fields always start on a fresh byte; a partially filled byte is left as is.

use crate::error::DecodeError;

/// Owned, growable packet writer. The first byte is the opcode.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
    bit_pos: u32,
}

impl Writer {
    pub fn new(opcode: u8) -> Self {
        Self {
            buf: vec![opcode],
            bit_pos: 0,
        }
    }

    pub fn u8(&mut self, v: u8) {
        self.bit_pos = 0;
        self.buf.push(v);
    }

    pub fn bool(&mut self, v: bool) {
        self.u8(v as u8);
    }

    pub fn u16(&mut self, v: u16) {
        self.bytes(&v.to_le_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.bytes(&v.to_le_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.bytes(&v.to_le_bytes());
    }

    pub fn bytes(&mut self, v: &[u8]) {
        self.bit_pos = 0;
        self.buf.extend_from_slice(v);
    }

    pub fn str(&mut self, v: &str) {
        self.bytes(v.as_bytes());
    }

    /// Low `width` bits of `value` (1..=64).
    pub fn bits(&mut self, value: u64, width: u32) {
        for i in 0..width {
            if self.bit_pos == 0 {
                self.buf.push(0);
            }
            let bit = ((value >> i) & 1) as u8;
            if let Some(last) = self.buf.last_mut() {
                *last |= bit << self.bit_pos;
            }
            self.bit_pos = (self.bit_pos + 1) % 8;
        }
    }

    pub fn bit_bool(&mut self, v: bool) {
        self.bits(v as u64, 1);
    }

    pub fn padding(&mut self, width: u32) {
        self.bits(0, width);
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Reader over a packet body (opcode already stripped).
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    bit_pos: u32,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            bit_pos: 0,
        }
    }

    /// Whole bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        self.bit_pos = 0;
        let v = *self.buf.get(self.pos).ok_or(DecodeError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(v)
    }

    pub fn bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.bit_pos = 0;
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(DecodeError::UnexpectedEnd)?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    /// `len` bytes as text; invalid UTF-8 sequences become U+FFFD.
    pub fn str(&mut self, len: usize) -> Result<String, DecodeError> {
        Ok(String::from_utf8_lossy(self.bytes(len)?).into_owned())
    }

    pub fn skip(&mut self, len: usize) -> Result<(), DecodeError> {
        self.bytes(len).map(|_| ())
    }

    /// Next `width` bits (1..=64) as an unsigned value.
    pub fn bits(&mut self, width: u32) -> Result<u64, DecodeError> {
        let mut v = 0u64;
        for i in 0..width {
            if self.bit_pos == 0 {
                if self.pos >= self.buf.len() {
                    return Err(DecodeError::UnexpectedEnd);
                }
                self.pos += 1;
            }
            let bit = (self.buf[self.pos - 1] >> self.bit_pos) & 1;
            v |= (bit as u64) << i;
            self.bit_pos = (self.bit_pos + 1) % 8;
        }
        Ok(v)
    }

    pub fn bit_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.bits(1)? != 0)
    }

    pub fn padding(&mut self, width: u32) -> Result<(), DecodeError> {
        self.bits(width).map(|_| ())
    }
}
