//! Writing a tag list back into an MP4 file in place.
//!
//! The `ilst` atom and a neighbouring `free` atom are treated as one region.
//! Saving replaces that region with the new tag list and a fresh `free`
//! atom, or inserts both at the end of `moov.udta.meta` (creating missing
//! containers) when the file has no tag list yet.
//!
//! When the region changes size by `delta`:
//! - every container enclosing it grows by `delta`
//! - every absolute offset in `stco`, `co64` and `tfhd` pointing past the
//!   edit point moves by `delta`, so chunks keep pointing at their media data

use std::fmt;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::atom::{Atom, Atoms, Fourcc, HEADER_SIZE};
use crate::cdata::{self, ByteCursor};
use crate::error::{Mp4Error, Result};
use crate::padding::{PaddingFn, PaddingInfo};
use crate::resize::{self, Resizable};
use crate::tags::{self, Mp4Tags, ILST_PATH};

/// Handler of a freshly created `meta` atom.
pub(crate) const MDIR_HDLR: [u8; 25] = [
    0, 0, 0, 0, 0, 0, 0, 0, // version, flags, pre-defined
    b'm', b'd', b'i', b'r', // handler type
    b'a', b'p', b'p', b'l', // manufacturer
    0, 0, 0, 0, 0, 0, 0, 0, 0, // reserved, empty name
];

/// Progress of a save, logged for diagnostics. A failure leaves the file
/// in whatever stage was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Unmodified,
    PendingResize,
    LengthPatched,
    OffsetsPatched,
    Committed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unmodified => "unmodified",
            Self::PendingResize => "pending-resize",
            Self::LengthPatched => "length-patched",
            Self::OffsetsPatched => "offsets-patched",
            Self::Committed => "committed",
        };
        f.write_str(name)
    }
}

struct Progress(Stage);

impl Progress {
    fn advance(&mut self, next: Stage) {
        tracing::trace!(from = %self.0, to = %next, "save stage");
        self.0 = next;
    }
}

/// Write `tags` into the MP4 file in `stream`.
///
/// `padding` picks the size of the `free` atom left after the tag list, the
/// default policy from [`PaddingInfo::default_padding`] is used for `None`.
pub fn save_tags<S: Resizable>(
    stream: &mut S,
    tags: &Mp4Tags,
    padding: Option<PaddingFn<'_>>,
) -> Result<()> {
    let ilst = tags.render()?;
    let mut atoms = Atoms::load(stream)?;
    let mut progress = Progress(Stage::Unmodified);

    if atoms.contains(&ILST_PATH) {
        tracing::debug!(ilst = ilst.len(), "replacing existing tag list");
        save_existing(stream, &mut atoms, &ilst, padding, &mut progress)?;
    } else {
        tracing::debug!(ilst = ilst.len(), "inserting new tag list");
        save_new(stream, &mut atoms, &ilst, padding, &mut progress)?;
    }

    stream.flush()?;
    progress.advance(Stage::Committed);
    Ok(())
}

fn render_free(padding: u64) -> Result<Vec<u8>> {
    let size = usize::try_from(padding)
        .map_err(|_| Mp4Error::LengthOverflow(format!("padding {} too large", padding)))?;
    Atom::render(Fourcc::FREE, &vec![0; size])
}

fn stream_size<S: Seek>(stream: &mut S) -> Result<u64> {
    Ok(stream.seek(SeekFrom::End(0))?)
}

fn write_at<S: Write + Seek>(stream: &mut S, offset: u64, data: &[u8]) -> Result<()> {
    stream.seek(SeekFrom::Start(offset))?;
    stream.write_all(data)?;
    Ok(())
}

fn signed(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| Mp4Error::LengthOverflow(format!("{} {} too large", what, value)))
}

/// Insert the tag list at the end of the deepest existing container along
/// `moov.udta.meta`.
fn save_new<S: Resizable>(
    stream: &mut S,
    atoms: &mut Atoms,
    ilst: &[u8],
    padding: Option<PaddingFn<'_>>,
    progress: &mut Progress,
) -> Result<()> {
    let containers = &ILST_PATH[..3];
    let depth = (1..=containers.len())
        .rev()
        .find(|&depth| atoms.contains(&containers[..depth]))
        .ok_or_else(|| Mp4Error::PathNotFound(Fourcc::MOOV.to_key()))?;
    let path = &containers[..depth];

    let parents = atoms.path(path)?;
    let parent_offsets: Vec<u64> = parents.iter().map(|a| a.offset).collect();
    let offset = parents[parents.len() - 1].end();

    // everything that ends up next to the free atom
    let mut content = Vec::new();
    if depth < 3 {
        content.extend_from_slice(&[0; 4]);
        content.extend(Atom::render(Fourcc::HDLR, &MDIR_HDLR)?);
    }
    content.extend_from_slice(ilst);

    let content_size = stream_size(stream)?.saturating_sub(offset);
    let info = PaddingInfo::new(-signed(content.len() as u64, "tag size")?, content_size);
    let padding = info.resolve(padding)?;
    tracing::debug!(padding, content_size, depth, "computed padding for new tag list");

    content.extend(render_free(padding)?);
    let mut data = content;
    if depth < 3 {
        data = Atom::render(Fourcc::META, &data)?;
    }
    if depth < 2 {
        data = Atom::render(Fourcc::UDTA, &data)?;
    }

    resize::insert_bytes(stream, data.len() as u64, offset)?;
    write_at(stream, offset, &data)?;
    progress.advance(Stage::PendingResize);

    let delta = signed(data.len() as u64, "inserted size")?;
    update_parents(stream, &parent_offsets, delta)?;
    atoms.apply_resize(path, offset, delta)?;
    progress.advance(Stage::LengthPatched);

    update_offsets(stream, atoms, delta, offset)?;
    progress.advance(Stage::OffsetsPatched);
    Ok(())
}

/// Replace the tag list and its neighbouring `free` atom.
fn save_existing<S: Resizable>(
    stream: &mut S,
    atoms: &mut Atoms,
    ilst: &[u8],
    padding: Option<PaddingFn<'_>>,
    progress: &mut Progress,
) -> Result<()> {
    let path = atoms.path(&ILST_PATH)?;
    let (meta, old_ilst) = (path[2], path[3]);
    let parent_offsets: Vec<u64> = path[..3].iter().map(|a| a.offset).collect();

    let (offset, length) = match tags::adjacent_free(meta, old_ilst) {
        Some(free) => (
            old_ilst.offset.min(free.offset),
            old_ilst.length + free.length,
        ),
        None => (old_ilst.offset, old_ilst.length),
    };

    let content_size = stream_size(stream)?.saturating_sub(offset + length);
    let available = signed(length, "tag region")? - signed(ilst.len() as u64 + HEADER_SIZE, "tag size")?;
    let info = PaddingInfo::new(available, content_size);
    let padding = info.resolve(padding)?;
    tracing::debug!(padding, available, content_size, "computed padding for tag list");

    let mut data = ilst.to_vec();
    data.extend(render_free(padding)?);

    let new_length = data.len() as u64;
    resize::resize_bytes(stream, length, new_length, offset)?;
    write_at(stream, offset, &data)?;
    progress.advance(Stage::PendingResize);

    let delta = signed(new_length, "tag region")? - signed(length, "tag region")?;
    tracing::debug!(offset, old = length, new = new_length, delta, "resized tag region");
    if delta != 0 {
        update_parents(stream, &parent_offsets, delta)?;
        atoms.apply_resize(&ILST_PATH[..3], offset + length, delta)?;
    }
    progress.advance(Stage::LengthPatched);

    update_offsets(stream, atoms, delta, offset)?;
    progress.advance(Stage::OffsetsPatched);
    Ok(())
}

/// Grow the stored length of every atom starting at `offsets` by `delta`.
fn update_parents<S: Resizable>(stream: &mut S, offsets: &[u64], delta: i64) -> Result<()> {
    for &offset in offsets {
        stream.seek(SeekFrom::Start(offset))?;
        let mut header = [0u8; 4];
        stream.read_exact(&mut header)?;
        let size = u32::from_be_bytes(header);
        match size {
            // extends to the end of the file
            0 => continue,
            1 => {
                let mut ext = [0u8; 8];
                stream.seek(SeekFrom::Start(offset + 8))?;
                stream.read_exact(&mut ext)?;
                let size = cdata::apply_delta(u64::from_be_bytes(ext), delta, "atom length")?;
                write_at(stream, offset + 8, &size.to_be_bytes())?;
            }
            _ => {
                let size = cdata::apply_delta(u64::from(size), delta, "atom length")?;
                let size = cdata::to_u32(size, "atom length")?;
                write_at(stream, offset, &size.to_be_bytes())?;
            }
        }
    }
    Ok(())
}

/// Move every absolute offset in the file that points past `edit_point`.
///
/// `atoms` must already describe the resized file.
fn update_offsets<S: Resizable>(
    stream: &mut S,
    atoms: &Atoms,
    delta: i64,
    edit_point: u64,
) -> Result<()> {
    if delta == 0 {
        return Ok(());
    }
    let mut patched = 0;
    for atom in atoms.findall(Fourcc::STCO, true) {
        patched += update_offset_table(stream, atom, 4, delta, edit_point)?;
    }
    for atom in atoms.findall(Fourcc::CO64, true) {
        patched += update_offset_table(stream, atom, 8, delta, edit_point)?;
    }
    for atom in atoms.findall(Fourcc::TFHD, true) {
        patched += update_tfhd(stream, atom, delta, edit_point)?;
    }
    tracing::debug!(patched, delta, edit_point, "updated chunk offsets");
    Ok(())
}

/// Patch a `stco` (4 byte entries) or `co64` (8 byte entries) table.
fn update_offset_table<S: Resizable>(
    stream: &mut S,
    atom: &Atom,
    width: usize,
    delta: i64,
    edit_point: u64,
) -> Result<usize> {
    let data = atom.read(stream)?;
    let mut cursor = ByteCursor::new(&data);
    let version = cursor.u8()?;
    if version != 0 {
        return Err(Mp4Error::UnsupportedVersion {
            atom: atom.name,
            version,
        });
    }
    cursor.skip(3)?; // flags
    let count = cursor.u32_be()? as usize;
    let start = cursor.position();
    if cursor.remaining() / width < count {
        return Err(Mp4Error::truncated(format!(
            "'{}' declares {} entries, has room for {}",
            atom.name,
            count,
            cursor.remaining() / width
        )));
    }

    let mut table = Vec::with_capacity(count * width);
    let mut patched = 0;
    for _ in 0..count {
        let mut offset = if width == 4 {
            u64::from(cursor.u32_be()?)
        } else {
            cursor.u64_be()?
        };
        if offset > edit_point {
            offset = cdata::apply_delta(offset, delta, "chunk offset")?;
            patched += 1;
        }
        if width == 4 {
            table.extend_from_slice(&cdata::to_u32(offset, "chunk offset")?.to_be_bytes());
        } else {
            table.extend_from_slice(&offset.to_be_bytes());
        }
    }

    write_at(stream, atom.data_offset() + start as u64, &table)?;
    tracing::trace!(atom = %atom.name, offset = atom.offset, count, patched, "patched offset table");
    Ok(patched)
}

/// Patch the base data offset of a `tfhd` atom, if it has one.
fn update_tfhd<S: Resizable>(
    stream: &mut S,
    atom: &Atom,
    delta: i64,
    edit_point: u64,
) -> Result<usize> {
    let data = atom.read(stream)?;
    let mut cursor = ByteCursor::new(&data);
    cursor.skip(1)?; // version
    let flags = cursor.u24_be()?;
    if flags & 1 == 0 {
        return Ok(0);
    }
    cursor.skip(4)?; // track id
    let start = cursor.position();
    let offset = cursor.u64_be()?;
    if offset <= edit_point {
        return Ok(0);
    }
    let moved = cdata::apply_delta(offset, delta, "base data offset")?;
    write_at(stream, atom.data_offset() + start as u64, &moved.to_be_bytes())?;
    tracing::trace!(offset, moved, "patched fragment base data offset");
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::TagValue;
    use std::io::Cursor;

    fn render(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        Atom::render(Fourcc(*name), payload).unwrap()
    }

    fn stco(entries: &[u32]) -> Vec<u8> {
        let mut data = vec![0, 0, 0, 0];
        data.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        for e in entries {
            data.extend_from_slice(&e.to_be_bytes());
        }
        render(b"stco", &data)
    }

    fn read_stco(data: &[u8]) -> Vec<u32> {
        let mut cursor = Cursor::new(data.to_vec());
        let atoms = Atoms::load(&mut cursor).unwrap();
        let stco = atoms.findall(Fourcc::STCO, true).next().unwrap();
        let payload = stco.read(&mut cursor).unwrap();
        payload[8..]
            .chunks(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn no_padding(_: &PaddingInfo) -> i64 {
        0
    }

    /// ftyp, moov with a chunk table and optional meta, mdat
    fn file(meta: Option<Vec<u8>>) -> Vec<u8> {
        let ftyp = render(b"ftyp", b"M4A \0\0\0\0");
        let trak = |offset: u32| {
            let stbl = render(b"stbl", &stco(&[offset, 3]));
            render(b"trak", &render(b"mdia", &render(b"minf", &stbl)))
        };
        let udta = meta.map(|m| render(b"udta", &m)).unwrap_or_default();
        let moov_len = 8 + trak(0).len() + udta.len();
        let mdat_payload = (ftyp.len() + moov_len + 8) as u32;
        let moov = render(b"moov", &[trak(mdat_payload), udta].concat());
        [ftyp, moov, render(b"mdat", &[7; 16])].concat()
    }

    fn meta(ilst: &[u8], free: usize) -> Vec<u8> {
        let mut meta = vec![0u8; 4];
        meta.extend(render(b"hdlr", &MDIR_HDLR));
        meta.extend(render(b"ilst", ilst));
        if free > 0 {
            meta.extend(render(b"free", &vec![0; free]));
        }
        render(b"meta", &meta)
    }

    fn mdat_payload(data: &[u8]) -> u64 {
        let mut cursor = Cursor::new(data.to_vec());
        let atoms = Atoms::load(&mut cursor).unwrap();
        atoms.get(&[Fourcc::MDAT]).unwrap().data_offset()
    }

    #[test]
    fn test_save_new_creates_containers() {
        let original = file(None);
        let mut stream = Cursor::new(original.clone());
        let mut tags = Mp4Tags::new();
        tags.set_value("\u{a9}nam", "Title").unwrap();
        save_tags(&mut stream, &tags, Some(&no_padding)).unwrap();

        let data = stream.into_inner();
        let mut cursor = Cursor::new(data.clone());
        let atoms = Atoms::load(&mut cursor).unwrap();
        let loaded = Mp4Tags::load(&atoms, &mut cursor).unwrap();
        assert_eq!(loaded.get("\u{a9}nam").unwrap(), &[TagValue::from("Title")]);

        let hdlr = atoms
            .get(&[Fourcc::MOOV, Fourcc::UDTA, Fourcc::META, Fourcc::HDLR])
            .unwrap();
        assert_eq!(hdlr.read(&mut cursor).unwrap(), MDIR_HDLR);

        // everything after moov moved by the inserted size
        let delta = (data.len() - original.len()) as u32;
        let offsets = read_stco(&data);
        assert_eq!(offsets, vec![read_stco(&original)[0] + delta, 3]);
        assert_eq!(u64::from(offsets[0]), mdat_payload(&data));
        assert_eq!(&data[data.len() - 16..], &[7; 16]);
    }

    #[test]
    fn test_save_existing_reuses_padding() {
        // 100 byte ilst followed by 50 bytes of free
        let ilst_payload = render(b"\xa9nam", &render(b"data", &[&[0, 0, 0, 1, 0, 0, 0, 0][..], &[b'x'; 68]].concat()));
        assert_eq!(ilst_payload.len() + 8, 100);
        let original = file(Some(meta(&ilst_payload, 42)));
        let mut stream = Cursor::new(original.clone());

        let atoms = Atoms::load(&mut Cursor::new(&original)).unwrap();
        let tags_before = Mp4Tags::load(&atoms, &mut Cursor::new(&original)).unwrap();
        assert_eq!(tags_before.padding(), 42);

        // 80 byte ilst
        let mut tags = Mp4Tags::new();
        tags.set_value("\u{a9}nam", "x".repeat(48)).unwrap();
        assert_eq!(tags.render().unwrap().len(), 80);

        let seen = std::cell::Cell::new(None);
        let policy = |info: &PaddingInfo| {
            seen.set(Some(info.padding));
            info.default_padding()
        };
        save_tags(&mut stream, &tags, Some(&policy)).unwrap();
        assert_eq!(seen.get(), Some(150 - 80 - 8));

        let data = stream.into_inner();
        assert_eq!(data.len(), original.len());
        assert_eq!(read_stco(&data), read_stco(&original));

        let mut cursor = Cursor::new(data.clone());
        let atoms = Atoms::load(&mut cursor).unwrap();
        let meta = atoms.get(&[Fourcc::MOOV, Fourcc::UDTA, Fourcc::META]).unwrap();
        let children = meta.children.as_ref().unwrap();
        assert_eq!(children[1].name, Fourcc::ILST);
        assert_eq!(children[1].length, 80);
        assert_eq!(children[2].name, Fourcc::FREE);
        assert_eq!(children[2].data_length(), 62);
    }

    #[test]
    fn test_save_is_idempotent() {
        let mut stream = Cursor::new(file(None));
        let mut tags = Mp4Tags::new();
        tags.set_value("\u{a9}ART", "Artist").unwrap();
        tags.set_value("trkn", (1i64, 9i64)).unwrap();
        save_tags(&mut stream, &tags, None).unwrap();
        let first = stream.get_ref().clone();
        save_tags(&mut stream, &tags, None).unwrap();
        assert_eq!(stream.get_ref(), &first);
    }

    #[test]
    fn test_shrinking_moves_offsets_back() {
        let original = file(Some(meta(&render(b"\xa9nam", &render(b"data", &[0; 200])), 0)));
        let mut stream = Cursor::new(original.clone());
        save_tags(&mut stream, &Mp4Tags::new(), Some(&no_padding)).unwrap();

        let data = stream.into_inner();
        let shrunk = (original.len() - data.len()) as u32;
        assert_eq!(shrunk, 216 - 8);
        let offsets = read_stco(&data);
        assert_eq!(offsets, vec![read_stco(&original)[0] - shrunk, 3]);
        assert_eq!(u64::from(offsets[0]), mdat_payload(&data));
    }

    #[test]
    fn test_offset_at_edit_point_is_kept() {
        // an entry equal to the edit point does not move
        let ilst = render(b"ilst", &[]);
        let mut meta_payload = vec![0u8; 4];
        meta_payload.extend(&ilst);
        let moov_payload = render(b"udta", &render(b"meta", &meta_payload));
        let ilst_offset = (8 + 8 + 8 + 4) as u32;
        let moov = render(
            b"moov",
            &[moov_payload, stco(&[ilst_offset, ilst_offset + 1])].concat(),
        );
        let mut stream = Cursor::new(moov);
        let mut tags = Mp4Tags::new();
        tags.set_value("aART", "x").unwrap();
        save_tags(&mut stream, &tags, Some(&no_padding)).unwrap();

        let data = stream.into_inner();
        let offsets = read_stco(&data);
        // the empty ilst is replaced by the new one plus an empty free atom
        let delta = tags.render().unwrap().len() as u32;
        assert_eq!(offsets, vec![ilst_offset, ilst_offset + 1 + delta]);
    }

    #[test]
    fn test_unsupported_stco_version() {
        let mut table = stco(&[100]);
        table[8] = 1;
        let moov = render(b"moov", &table);
        let mut stream = Cursor::new(moov);
        let mut tags = Mp4Tags::new();
        tags.set_value("aART", "x").unwrap();
        assert!(matches!(
            save_tags(&mut stream, &tags, None),
            Err(Mp4Error::UnsupportedVersion { version: 1, .. })
        ));
    }

    #[test]
    fn test_negative_padding_policy() {
        let mut stream = Cursor::new(file(None));
        let original = stream.get_ref().clone();
        let tags = Mp4Tags::new();
        let policy = |_: &PaddingInfo| -> i64 { -1 };
        assert!(matches!(
            save_tags(&mut stream, &tags, Some(&policy)),
            Err(Mp4Error::InvalidPadding(-1))
        ));
        assert_eq!(stream.get_ref(), &original);
    }

    #[test]
    fn test_missing_moov() {
        let mut stream = Cursor::new(render(b"ftyp", b"M4A "));
        assert!(matches!(
            save_tags(&mut stream, &Mp4Tags::new(), None),
            Err(Mp4Error::PathNotFound(_))
        ));
    }

    #[test]
    fn test_update_parents_extended() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(b"moov");
        data.extend_from_slice(&24u64.to_be_bytes());
        data.extend_from_slice(&[0; 8]);
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&20u32.to_be_bytes()); // plain atom
        data.extend_from_slice(b"free");
        let mut stream = Cursor::new(data);
        update_parents(&mut stream, &[0, 24, 32], 10).unwrap();
        let data = stream.into_inner();
        assert_eq!(&data[8..16], &34u64.to_be_bytes());
        assert_eq!(&data[24..28], &0u32.to_be_bytes());
        assert_eq!(&data[32..36], &30u32.to_be_bytes());

        let mut stream = Cursor::new(data);
        assert!(matches!(
            update_parents(&mut stream, &[32], i64::from(u32::MAX)),
            Err(Mp4Error::LengthOverflow(_))
        ));
    }
}
