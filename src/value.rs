//! Typed tag values.

use serde::{Serialize, Serializer};
use std::fmt;

/// Data type code stored in the flags of a `data` atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DataType {
    /// No explicit type, meaning depends on the item.
    Implicit,
    Utf8,
    Utf16,
    Sjis,
    Html,
    Xml,
    Uuid,
    Isrc,
    Mi3p,
    Gif,
    Jpeg,
    Png,
    Url,
    Duration,
    DateTime,
    Genres,
    Integer,
    RiaaPa,
    Upc,
    Bmp,
    /// Any code without a name of its own.
    Other(u32),
}

impl DataType {
    pub fn code(self) -> u32 {
        match self {
            Self::Implicit => 0,
            Self::Utf8 => 1,
            Self::Utf16 => 2,
            Self::Sjis => 3,
            Self::Html => 6,
            Self::Xml => 7,
            Self::Uuid => 8,
            Self::Isrc => 9,
            Self::Mi3p => 10,
            Self::Gif => 12,
            Self::Jpeg => 13,
            Self::Png => 14,
            Self::Url => 15,
            Self::Duration => 16,
            Self::DateTime => 17,
            Self::Genres => 18,
            Self::Integer => 21,
            Self::RiaaPa => 24,
            Self::Upc => 25,
            Self::Bmp => 27,
            Self::Other(code) => code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Implicit,
            1 => Self::Utf8,
            2 => Self::Utf16,
            3 => Self::Sjis,
            6 => Self::Html,
            7 => Self::Xml,
            8 => Self::Uuid,
            9 => Self::Isrc,
            10 => Self::Mi3p,
            12 => Self::Gif,
            13 => Self::Jpeg,
            14 => Self::Png,
            15 => Self::Url,
            16 => Self::Duration,
            17 => Self::DateTime,
            18 => Self::Genres,
            21 => Self::Integer,
            24 => Self::RiaaPa,
            25 => Self::Upc,
            27 => Self::Bmp,
            other => Self::Other(other),
        }
    }
}

/// Image format of a cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum ImageFormat {
    #[default]
    Jpeg,
    Png,
    Gif,
    Bmp,
}

impl ImageFormat {
    /// The `data` atom type code.
    pub fn data_type(self) -> DataType {
        match self {
            Self::Jpeg => DataType::Jpeg,
            Self::Png => DataType::Png,
            Self::Gif => DataType::Gif,
            Self::Bmp => DataType::Bmp,
        }
    }

    /// Map a type code to a format. Covers written with a missing or wrong
    /// code are JPEG in practice.
    pub fn from_data_type(data_type: DataType) -> Self {
        match data_type {
            DataType::Png => Self::Png,
            DataType::Gif => Self::Gif,
            DataType::Bmp => Self::Bmp,
            _ => Self::Jpeg,
        }
    }
}

fn byte_len<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(data.len() as u64)
}

/// Cover art.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cover {
    #[serde(serialize_with = "byte_len")]
    pub data: Vec<u8>,
    pub format: ImageFormat,
}

impl Cover {
    pub fn new(data: impl Into<Vec<u8>>, format: ImageFormat) -> Self {
        Self {
            data: data.into(),
            format,
        }
    }
}

/// Payload of a freeform (`----`) item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreeForm {
    #[serde(serialize_with = "byte_len")]
    pub data: Vec<u8>,
    pub data_type: DataType,
    pub version: u8,
}

impl FreeForm {
    /// UTF-8 text payload, the most common freeform kind.
    pub fn text(text: &str) -> Self {
        Self::new(text.as_bytes(), DataType::Utf8)
    }

    pub fn new(data: impl Into<Vec<u8>>, data_type: DataType) -> Self {
        Self {
            data: data.into(),
            data_type,
            version: 0,
        }
    }
}

/// A single tag value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    Text(String),
    Integer(i64),
    /// Track or disc number and total.
    Pair(i64, i64),
    Bool(bool),
    /// Genre name from the ID3v1 table.
    Genre(String),
    Cover(Cover),
    FreeForm(FreeForm),
}

impl TagValue {
    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Integer(_) => "integer",
            Self::Pair(..) => "pair",
            Self::Bool(_) => "bool",
            Self::Genre(_) => "genre",
            Self::Cover(_) => "cover",
            Self::FreeForm(_) => "freeform",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Genre(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) | Self::Genre(s) => write!(f, "{}", s),
            Self::Integer(v) => write!(f, "{}", v),
            Self::Pair(a, b) => write!(f, "({}, {})", a, b),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Cover(c) => write!(f, "[{} bytes of data]", c.data.len()),
            Self::FreeForm(v) => match v.data_type {
                DataType::Utf8 => write!(f, "{}", String::from_utf8_lossy(&v.data)),
                _ => write!(f, "[{} bytes of data]", v.data.len()),
            },
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<(i64, i64)> for TagValue {
    fn from((a, b): (i64, i64)) -> Self {
        Self::Pair(a, b)
    }
}

impl From<Cover> for TagValue {
    fn from(value: Cover) -> Self {
        Self::Cover(value)
    }
}

impl From<FreeForm> for TagValue {
    fn from(value: FreeForm) -> Self {
        Self::FreeForm(value)
    }
}
