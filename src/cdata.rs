//! Big-endian integer helpers.
//!
//! Every read is bounds checked and reports [`Mp4Error::TruncatedInput`]
//! instead of panicking, and every narrowing conversion reports
//! [`Mp4Error::LengthOverflow`].

use crate::error::{Mp4Error, Result};

/// A read cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Cursor starting at `pos` instead of the beginning.
    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the current position.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Take the next `len` bytes.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Mp4Error::truncated(format!(
                "need {} bytes at offset {}, have {}",
                len,
                self.pos,
                self.remaining()
            )));
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.data[start..start + len])
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    /// Everything from the current position to the end.
    pub fn rest(&mut self) -> &'a [u8] {
        let start = self.pos.min(self.data.len());
        self.pos = self.data.len();
        &self.data[start..]
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16_be(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    /// Unsigned 24-bit value, as used by full atom flags.
    pub fn u24_be(&mut self) -> Result<u32> {
        let [a, b, c] = self.array::<3>()?;
        Ok(u32::from_be_bytes([0, a, b, c]))
    }

    pub fn u32_be(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn u64_be(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    pub fn fourcc(&mut self) -> Result<[u8; 4]> {
        self.array()
    }
}

/// Decode a signed big-endian integer of 1, 2, 3, 4 or 8 bytes.
pub fn int_be(data: &[u8]) -> Result<i64> {
    let value = match *data {
        [a] => i8::from_be_bytes([a]) as i64,
        [a, b] => i16::from_be_bytes([a, b]) as i64,
        // sign extend through the top byte of an i32
        [a, b, c] => (i32::from_be_bytes([a, b, c, 0]) >> 8) as i64,
        [a, b, c, d] => i32::from_be_bytes([a, b, c, d]) as i64,
        [a, b, c, d, e, f, g, h] => i64::from_be_bytes([a, b, c, d, e, f, g, h]),
        _ => {
            return Err(Mp4Error::invalid_value(format!(
                "invalid integer size {}",
                data.len()
            )))
        }
    };
    Ok(value)
}

/// Encode `value` in the narrowest of 1, 2, 4 or 8 bytes that holds it,
/// never narrower than `min_bytes`.
pub fn int_be_min(value: i64, min_bytes: usize) -> Vec<u8> {
    if min_bytes <= 1 && i8::try_from(value).is_ok() {
        (value as i8).to_be_bytes().to_vec()
    } else if min_bytes <= 2 && i16::try_from(value).is_ok() {
        (value as i16).to_be_bytes().to_vec()
    } else if min_bytes <= 4 && i32::try_from(value).is_ok() {
        (value as i32).to_be_bytes().to_vec()
    } else {
        value.to_be_bytes().to_vec()
    }
}

/// Narrow a length to the 32-bit field used by atom headers and tables.
pub fn to_u32(value: u64, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| Mp4Error::LengthOverflow(format!("{} {} does not fit 32 bits", what, value)))
}

/// Apply a signed delta to an unsigned quantity.
pub fn apply_delta(value: u64, delta: i64, what: &str) -> Result<u64> {
    value.checked_add_signed(delta).ok_or_else(|| {
        Mp4Error::LengthOverflow(format!("{} {} cannot move by {}", what, value, delta))
    })
}
