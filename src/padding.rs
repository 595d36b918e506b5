//! Padding policy for in-place saves.
//!
//! When the tag list changes size the engine asks a policy how many padding
//! bytes to leave behind in a `free` atom. Reserving some space lets the
//! next edit happen without moving the media data.

use crate::error::{Mp4Error, Result};

/// The largest padding payload that still fits a `free` atom with a plain
/// 32-bit header.
pub const MAX_PADDING: u64 = u32::MAX as u64 - crate::atom::HEADER_SIZE;

/// A padding policy. Returns the number of padding bytes to write.
pub type PaddingFn<'a> = &'a dyn Fn(&PaddingInfo) -> i64;

/// Input for a padding policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddingInfo {
    /// Padding that would be left if the file were not resized. Negative
    /// when the new tag list does not fit the space of the old one.
    pub padding: i64,
    /// Number of bytes following the tag region, i.e. what has to be moved
    /// when the file is resized.
    pub size: u64,
}

impl PaddingInfo {
    pub fn new(padding: i64, size: u64) -> Self {
        Self { padding, size }
    }

    /// Default policy: keep the current padding unless it is negative or
    /// grew too large, otherwise reserve 1 KiB plus 0.1% of the data that
    /// follows.
    pub fn default_padding(&self) -> i64 {
        let high = 1024 * 10 + (self.size / 100) as i64;
        let low = 1024 + (self.size / 1000) as i64;

        if self.padding >= 0 {
            if self.padding > high {
                low
            } else {
                self.padding
            }
        } else {
            low
        }
    }

    /// Run `policy`, or the default one, and clamp the result so the padding
    /// atom keeps an 8 byte header.
    pub fn resolve(&self, policy: Option<PaddingFn<'_>>) -> Result<u64> {
        let padding = match policy {
            Some(policy) => policy(self),
            None => self.default_padding(),
        };
        if padding < 0 {
            return Err(Mp4Error::InvalidPadding(padding));
        }
        Ok((padding as u64).min(MAX_PADDING))
    }
}
