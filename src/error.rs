//! Error types for MP4 tag reading and writing.

use std::io;
use thiserror::Error;

use crate::atom::Fourcc;

/// Result type for m4atag operations.
pub type Result<T> = std::result::Result<T, Mp4Error>;

/// Error type for m4atag operations.
#[derive(Debug, Error)]
pub enum Mp4Error {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stream ended before a declared length was satisfied.
    #[error("truncated input: {0}")]
    TruncatedInput(String),

    /// A declared length breaks the container rules.
    #[error("invalid atom length: {0}")]
    InvalidLength(String),

    /// A length or offset no longer fits its on-disk encoding.
    #[error("length overflow: {0}")]
    LengthOverflow(String),

    /// An expected atom chain is absent.
    #[error("atom path not found: {0}")]
    PathNotFound(String),

    /// A known tag atom failed its typed decode.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// A tag value was rejected by its renderer.
    #[error("invalid metadata value: {0}")]
    InvalidValue(String),

    /// A tag key cannot be mapped to an atom name.
    #[error("invalid metadata key: {0:?}")]
    InvalidKey(String),

    /// An atom carries a version this crate does not understand.
    #[error("unsupported version {version} in '{atom}' atom")]
    UnsupportedVersion { atom: Fourcc, version: u8 },

    /// Stream information could not be extracted.
    #[error("stream info error: {0}")]
    StreamInfo(String),

    /// A padding policy returned a negative amount.
    #[error("padding has to be positive, got {0}")]
    InvalidPadding(i64),

    /// The stream does not start with an `ftyp` atom.
    #[error("not an MP4 file")]
    NotMp4,

    /// `add_tags` was called on a file that already has a tag list.
    #[error("an MP4 tag already exists")]
    TagsAlreadyPresent,
}

impl Mp4Error {
    /// Create a truncated input error.
    pub fn truncated(msg: impl Into<String>) -> Self {
        Self::TruncatedInput(msg.into())
    }

    /// Create an invalid length error.
    pub fn invalid_length(msg: impl Into<String>) -> Self {
        Self::InvalidLength(msg.into())
    }

    /// Create a metadata error.
    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::Metadata(msg.into())
    }

    /// Create an invalid value error.
    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Self::InvalidValue(msg.into())
    }

    /// Returns true for errors that concern the tag list itself rather than
    /// the container structure.
    pub fn is_metadata(&self) -> bool {
        matches!(
            self,
            Self::Metadata(_) | Self::InvalidValue(_) | Self::InvalidKey(_)
        )
    }
}
