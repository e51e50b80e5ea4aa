//! MLS variable-length integers (RFC 9420 §2.1.2).
//!
//! The two most significant bits of the first byte select the total length:
//!
//! | Prefix | Length  | Range              |
//! |--------|---------|--------------------|
//! | `00`   | 1 byte  | 0 to 63            |
//! | `01`   | 2 bytes | 64 to 16383        |
//! | `10`   | 4 bytes | 16384 to 2^30 - 1  |
//! | `11`   | invalid |                    |
//!
//! Decoding requires the shortest form. Accepting a longer form would give one
//! value two encodings and break canonical round-trips.

use bytes::BufMut;

use crate::errors::{CodecError, Result};

/// Largest value representable as a varint.
pub const MAX_VARINT: u32 = (1 << 30) - 1;

/// Number of bytes `value` occupies once encoded, or `None` if it is out of
/// range.
pub fn encoded_len(value: u32) -> Option<usize> {
    match value {
        0..=63 => Some(1),
        64..=16383 => Some(2),
        16384..=MAX_VARINT => Some(4),
        _ => None,
    }
}

/// Writes `value` in its shortest form.
///
/// # Errors
///
/// - `CodecError::ValueTooLarge` if `value` exceeds [`MAX_VARINT`]
pub fn put_varint(dst: &mut impl BufMut, field: &'static str, value: usize) -> Result<()> {
    let small = u32::try_from(value)
        .ok()
        .filter(|v| *v <= MAX_VARINT)
        .ok_or(CodecError::ValueTooLarge { field, value })?;

    match encoded_len(small) {
        Some(1) => dst.put_u8(small as u8),
        Some(2) => dst.put_u16(small as u16 | 0x4000),
        _ => dst.put_u32(small | 0x8000_0000),
    }

    Ok(())
}

/// Forward-only cursor over untrusted input.
///
/// Every read checks the remaining length first, so malformed input produces
/// an error instead of a panic or a partially-filled value.
pub(crate) struct Reader<'a> {
    input: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(input: &'a [u8]) -> Self {
        Self { input }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.input.len()
    }

    fn take(&mut self, field: &'static str, len: usize) -> Result<&'a [u8]> {
        if len > self.input.len() {
            return Err(CodecError::Truncated { field, needed: len, remaining: self.input.len() });
        }
        let (head, tail) = self.input.split_at(len);
        self.input = tail;
        Ok(head)
    }

    pub(crate) fn varint(&mut self, field: &'static str) -> Result<u32> {
        let first = *self.input.first().ok_or(CodecError::Truncated {
            field,
            needed: 1,
            remaining: 0,
        })?;

        let len = match first >> 6 {
            0 => 1,
            1 => 2,
            2 => 4,
            _ => return Err(CodecError::InvalidVarintPrefix { field }),
        };

        let bytes = self.take(field, len)?;
        let value = bytes[1..]
            .iter()
            .fold(u32::from(first & 0x3f), |acc, byte| (acc << 8) | u32::from(*byte));

        if encoded_len(value) != Some(len) {
            return Err(CodecError::NonMinimalVarint { field, value });
        }

        Ok(value)
    }

    /// Reads a varint length and checks it against the remaining input before
    /// anything is allocated.
    pub(crate) fn length(&mut self, field: &'static str, unit: usize) -> Result<usize> {
        let count = self.varint(field)? as usize;
        let declared = count.saturating_mul(unit);
        if declared > self.remaining() {
            return Err(CodecError::LengthOverflow {
                field,
                declared,
                remaining: self.remaining(),
            });
        }
        Ok(count)
    }

    pub(crate) fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N]> {
        let bytes = self.take(field, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub(crate) fn string(&mut self, field: &'static str) -> Result<String> {
        let len = self.length(field, 1)?;
        let bytes = self.take(field, len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8 { field })
    }

    /// Fails if any input is left unread.
    pub(crate) fn finish(self) -> Result<()> {
        match self.input.len() {
            0 => Ok(()),
            left => Err(CodecError::TrailingBytes(left)),
        }
    }
}
