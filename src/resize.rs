//! In-place file resizing.
//!
//! Moving the tail of a multi-gigabyte file is done in fixed-size chunks so
//! memory use does not depend on the file size.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use crate::error::{Mp4Error, Result};

/// Chunk size used when moving file contents.
const BUFFER_SIZE: u64 = 1 << 16;

/// A seekable read/write stream that can change its length.
pub trait Resizable: Read + Write + Seek {
    /// Truncate or zero-extend the stream to `len` bytes.
    fn set_len(&mut self, len: u64) -> io::Result<()>;
}

impl Resizable for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }
}

impl Resizable for Cursor<Vec<u8>> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::OutOfMemory, "buffer too large"))?;
        self.get_mut().resize(len, 0);
        Ok(())
    }
}

impl<T: Resizable + ?Sized> Resizable for &mut T {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        (**self).set_len(len)
    }
}

fn stream_size<S: Seek + ?Sized>(stream: &mut S) -> Result<u64> {
    Ok(stream.seek(SeekFrom::End(0))?)
}

/// Copy `count` bytes from `src` to `dest` inside the stream. The ranges
/// may overlap.
pub fn move_bytes<S: Resizable + ?Sized>(
    stream: &mut S,
    dest: u64,
    src: u64,
    count: u64,
) -> Result<()> {
    if count == 0 || dest == src {
        return Ok(());
    }
    let size = stream_size(stream)?;
    if src.saturating_add(count) > size || dest.saturating_add(count) > size {
        return Err(Mp4Error::truncated(format!(
            "cannot move {} bytes from {} to {} in a {} byte stream",
            count, src, dest, size
        )));
    }

    let mut buf = vec![0u8; BUFFER_SIZE.min(count) as usize];
    let mut moved = 0;
    while moved < count {
        let chunk = BUFFER_SIZE.min(count - moved);
        // copy from the far end first when moving forward
        let at = if dest > src { count - moved - chunk } else { moved };
        let data = &mut buf[..chunk as usize];
        stream.seek(SeekFrom::Start(src + at))?;
        stream.read_exact(data)?;
        stream.seek(SeekFrom::Start(dest + at))?;
        stream.write_all(data)?;
        moved += chunk;
    }
    stream.flush()?;
    Ok(())
}

/// Insert `size` zero-filled bytes at `offset`, moving everything after it.
pub fn insert_bytes<S: Resizable + ?Sized>(stream: &mut S, size: u64, offset: u64) -> Result<()> {
    if size == 0 {
        return Ok(());
    }
    let file_size = stream_size(stream)?;
    if offset > file_size {
        return Err(Mp4Error::invalid_length(format!(
            "insert offset {} past end of {} byte stream",
            offset, file_size
        )));
    }
    stream.set_len(file_size + size)?;
    move_bytes(stream, offset + size, offset, file_size - offset)?;
    tracing::trace!(size, offset, "inserted bytes");
    Ok(())
}

/// Remove `size` bytes at `offset`, moving everything after them back.
pub fn delete_bytes<S: Resizable + ?Sized>(stream: &mut S, size: u64, offset: u64) -> Result<()> {
    if size == 0 {
        return Ok(());
    }
    let file_size = stream_size(stream)?;
    let end = offset.saturating_add(size);
    if end > file_size {
        return Err(Mp4Error::truncated(format!(
            "cannot delete {} bytes at {} from {} byte stream",
            size, offset, file_size
        )));
    }
    move_bytes(stream, offset, end, file_size - end)?;
    stream.set_len(file_size - size)?;
    tracing::trace!(size, offset, "deleted bytes");
    Ok(())
}

/// Grow or shrink the region of `old_size` bytes at `offset` to `new_size`
/// bytes. Content beyond the smaller of the two sizes is left undefined.
pub fn resize_bytes<S: Resizable + ?Sized>(
    stream: &mut S,
    old_size: u64,
    new_size: u64,
    offset: u64,
) -> Result<()> {
    if new_size < old_size {
        delete_bytes(stream, old_size - new_size, offset + new_size)
    } else if new_size > old_size {
        insert_bytes(stream, new_size - old_size, offset + old_size)
    } else {
        Ok(())
    }
}
