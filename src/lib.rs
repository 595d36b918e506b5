//! # m4atag
//!
//! Read and rewrite iTunes-style metadata in MP4/M4A files in place.
//!
//! Tags live in the `moov.udta.meta.ilst` atom. Saving rewrites only that
//! atom, reusing the padding around it where possible, and patches the
//! parent atom sizes and chunk offset tables that the edit invalidates.
//! Audio data is never decoded or copied through memory.
//!
//! ## Example
//!
//! ```no_run
//! use m4atag::{read_tags, write_tags, Mp4Tags};
//! use std::path::Path;
//!
//! let path = Path::new("song.m4a");
//! let mut tags = read_tags(path).unwrap().unwrap_or_else(Mp4Tags::new);
//! tags.set_value("\u{a9}nam", "A Title").unwrap();
//! tags.set_value("trkn", (3i64, 12i64)).unwrap();
//! write_tags(path, &tags, None).unwrap();
//! ```
//!
//! ## Technical Details
//!
//! Padding after a save is chosen by [`PaddingInfo::default_padding`]
//! unless a [`PaddingFn`] is supplied. Streams only need to implement
//! [`Resizable`], which `File` and `Cursor<Vec<u8>>` already do.

use anyhow::Context;
use std::fs::{File, OpenOptions};
use std::path::Path;

pub mod atom;
pub mod cdata;
pub mod error;
pub mod file;
pub mod genres;
pub mod info;
mod item;
pub mod padding;
pub mod resize;
pub mod save;
pub mod tags;
pub mod value;

pub use atom::{Atom, Atoms, Fourcc};
pub use error::{Mp4Error, Result};
pub use file::Mp4;
pub use info::Mp4Info;
pub use padding::{PaddingFn, PaddingInfo};
pub use resize::Resizable;
pub use save::save_tags;
pub use tags::Mp4Tags;
pub use value::{Cover, DataType, FreeForm, ImageFormat, TagValue};

fn open_rw(file_path: &Path) -> anyhow::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(file_path)
        .with_context(|| format!("Failed to open: {}", file_path.display()))
}

/// Load stream information and tags from a file
pub fn open(file_path: &Path) -> anyhow::Result<Mp4> {
    let mut file =
        File::open(file_path).with_context(|| format!("Failed to open: {}", file_path.display()))?;
    let mp4 =
        Mp4::load(&mut file).with_context(|| format!("Failed to read: {}", file_path.display()))?;
    Ok(mp4)
}

/// Read the tag list from a file, `None` if it has none
pub fn read_tags(file_path: &Path) -> anyhow::Result<Option<Mp4Tags>> {
    let mut file =
        File::open(file_path).with_context(|| format!("Failed to open: {}", file_path.display()))?;
    let atoms =
        Atoms::load(&mut file).with_context(|| format!("Failed to read: {}", file_path.display()))?;
    if !Mp4Tags::can_load(&atoms) {
        return Ok(None);
    }
    let tags = Mp4Tags::load(&atoms, &mut file)
        .with_context(|| format!("Failed to read tags: {}", file_path.display()))?;
    Ok(Some(tags))
}

/// Write a tag list into a file in place
pub fn write_tags(
    file_path: &Path,
    tags: &Mp4Tags,
    padding: Option<PaddingFn<'_>>,
) -> anyhow::Result<()> {
    let mut file = open_rw(file_path)?;
    save_tags(&mut file, tags, padding)
        .with_context(|| format!("Failed to write: {}", file_path.display()))?;
    Ok(())
}

/// Remove every tag from a file. Files without a tag list are left alone.
pub fn delete_tags(file_path: &Path) -> anyhow::Result<()> {
    let mut file = open_rw(file_path)?;
    let mut mp4 =
        Mp4::load(&mut file).with_context(|| format!("Failed to read: {}", file_path.display()))?;
    mp4.delete(&mut file)
        .with_context(|| format!("Failed to write: {}", file_path.display()))?;
    Ok(())
}
