//! MP4 atom tree.
//!
//! Relevant structure of an MP4 audio file:
//! ```text
//! ftyp (file type)
//! moov (movie/metadata container)
//!   ├── mvhd (movie header)
//!   ├── trak (track)
//!   │   └── mdia ── minf ── stbl
//!   │                       ├── stsd (sample description)
//!   │                       └── stco / co64 (chunk offsets)
//!   └── udta (user data)
//!       └── meta (metadata)
//!           ├── hdlr (handler)
//!           ├── ilst (iTunes metadata list)
//!           └── free (padding)
//! moof (movie fragment)
//!   └── traf ── tfhd (fragment header, base data offset)
//! mdat (media data)
//! ```
//!
//! Leaf payloads are never kept in the tree. An [`Atom`] remembers where its
//! payload lives and [`Atom::read`] copies it into an owned buffer on demand,
//! so nothing borrowed from the stream survives a resize.

use std::fmt;
use std::io::{Read, Seek, SeekFrom};

use crate::cdata;
use crate::error::{Mp4Error, Result};

/// Four-character atom identifier. Not necessarily printable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fourcc(pub [u8; 4]);

impl Fourcc {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MDAT: Self = Self(*b"mdat");
    pub const TRAK: Self = Self(*b"trak");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const STCO: Self = Self(*b"stco");
    pub const CO64: Self = Self(*b"co64");
    pub const UDTA: Self = Self(*b"udta");
    pub const META: Self = Self(*b"meta");
    pub const ILST: Self = Self(*b"ilst");
    pub const FREE: Self = Self(*b"free");
    pub const MOOF: Self = Self(*b"moof");
    pub const TRAF: Self = Self(*b"traf");
    pub const TFHD: Self = Self(*b"tfhd");
    pub const DATA: Self = Self(*b"data");
    pub const MEAN: Self = Self(*b"mean");
    pub const NAME: Self = Self(*b"name");
    pub const FREEFORM: Self = Self(*b"----");
    pub const MP4A: Self = Self(*b"mp4a");
    pub const ALAC: Self = Self(*b"alac");
    pub const ESDS: Self = Self(*b"esds");

    /// Decode the identifier as Latin-1, which maps every byte to exactly
    /// one `char` and back.
    pub fn to_key(self) -> String {
        self.0.iter().map(|&b| b as char).collect()
    }

    /// Inverse of [`Fourcc::to_key`] for keys that are exactly four Latin-1
    /// characters.
    pub fn from_key(key: &str) -> Option<Self> {
        let bytes = latin1(key)?;
        <[u8; 4]>::try_from(bytes.as_slice()).ok().map(Self)
    }

    /// Whether atoms with this identifier hold child atoms.
    pub fn is_container(self) -> bool {
        CONTAINERS.contains(&self)
    }

    /// Bytes between the header and the first child.
    fn child_skip(self) -> u64 {
        if self == Self::META {
            4
        } else {
            0
        }
    }
}

impl fmt::Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_key())
    }
}

impl fmt::Debug for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fourcc({:?})", self.to_key())
    }
}

/// Encode a string as Latin-1, failing on characters above U+00FF.
pub(crate) fn latin1(text: &str) -> Option<Vec<u8>> {
    text.chars().map(|c| u8::try_from(u32::from(c)).ok()).collect()
}

/// Containers this crate needs to look inside. Not exhaustive.
const CONTAINERS: [Fourcc; 10] = [
    Fourcc::MOOV,
    Fourcc::UDTA,
    Fourcc::TRAK,
    Fourcc::MDIA,
    Fourcc::META,
    Fourcc::ILST,
    Fourcc::STBL,
    Fourcc::MINF,
    Fourcc::MOOF,
    Fourcc::TRAF,
];

/// Size of a plain 32-bit atom header.
pub const HEADER_SIZE: u64 = 8;

/// Size of an atom header carrying the 64-bit length escape.
pub const EXTENDED_HEADER_SIZE: u64 = 16;

/// A single atom. Only meant to be used through [`Atoms`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    /// Four byte identifier.
    pub name: Fourcc,
    /// Length of the atom including its header.
    pub length: u64,
    /// Absolute position of the first header byte.
    pub offset: u64,
    /// Absolute position of the first payload byte.
    data_offset: u64,
    /// Child atoms, `None` for leaf atoms.
    pub children: Option<Vec<Atom>>,
}

impl Atom {
    /// Parse the atom at the current stream position.
    ///
    /// `enclosing_end` is the end of the parent atom, or of the stream for
    /// top-level atoms. Only `level` 0 may use the zero length form, and
    /// only a top-level atom may run past `enclosing_end`.
    pub fn parse<R: Read + Seek>(reader: &mut R, enclosing_end: u64, level: usize) -> Result<Self> {
        let offset = reader.stream_position()?;

        let mut header = [0u8; 8];
        read_exact(reader, &mut header, "atom header")?;
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let name = Fourcc([header[4], header[5], header[6], header[7]]);

        let (length, header_size) = match length {
            1 => {
                let mut ext = [0u8; 8];
                read_exact(reader, &mut ext, "extended atom length")?;
                let length = u64::from_be_bytes(ext);
                if length < EXTENDED_HEADER_SIZE {
                    return Err(Mp4Error::invalid_length(format!(
                        "64 bit length of '{}' is {}, must be 16 or higher",
                        name, length
                    )));
                }
                (length, EXTENDED_HEADER_SIZE)
            }
            0 => {
                if level != 0 {
                    return Err(Mp4Error::invalid_length(format!(
                        "only a top-level atom can have zero length, found '{}'",
                        name
                    )));
                }
                // the last atom may extend to the end of the stream
                (enclosing_end.saturating_sub(offset), HEADER_SIZE)
            }
            2..=7 => {
                return Err(Mp4Error::invalid_length(format!(
                    "length of '{}' is {}, must be 0, 1 or 8 and higher",
                    name, length
                )));
            }
            n => (u64::from(n), HEADER_SIZE),
        };
        if length < header_size {
            return Err(Mp4Error::invalid_length(format!(
                "'{}' is shorter than its own header",
                name
            )));
        }

        let data_offset = offset + header_size;
        let end = offset
            .checked_add(length)
            .ok_or_else(|| Mp4Error::invalid_length(format!("'{}' ends past u64", name)))?;
        if level > 0 && end > enclosing_end {
            return Err(Mp4Error::invalid_length(format!(
                "'{}' ends at {}, past its parent's end {}",
                name, end, enclosing_end
            )));
        }

        let children = if name.is_container() {
            let first_child = data_offset + name.child_skip();
            if first_child > end {
                return Err(Mp4Error::invalid_length(format!(
                    "'{}' of length {} is too short for its header",
                    name, length
                )));
            }
            reader.seek(SeekFrom::Start(first_child))?;
            let mut children = Vec::new();
            let mut pos = first_child;
            while pos < end {
                if end - pos < HEADER_SIZE {
                    return Err(Mp4Error::truncated(format!(
                        "{} stray bytes at the end of '{}'",
                        end - pos,
                        name
                    )));
                }
                let child = Atom::parse(reader, end, level + 1)?;
                pos = child.end();
                children.push(child);
            }
            Some(children)
        } else {
            None
        };

        reader.seek(SeekFrom::Start(end))?;

        Ok(Atom {
            name,
            length,
            offset,
            data_offset,
            children,
        })
    }

    /// Size of the header, 8 or 16 bytes.
    pub fn header_size(&self) -> u64 {
        self.data_offset - self.offset
    }

    /// Absolute position of the payload.
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    /// Length of the payload.
    pub fn data_length(&self) -> u64 {
        self.length - self.header_size()
    }

    /// Absolute position just past this atom.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Copy the payload out of the stream.
    pub fn read<R: Read + Seek>(&self, reader: &mut R) -> Result<Vec<u8>> {
        let length = usize::try_from(self.data_length()).map_err(|_| {
            Mp4Error::LengthOverflow(format!("payload of '{}' is too large", self.name))
        })?;
        reader.seek(SeekFrom::Start(self.data_offset))?;
        let mut data = Vec::with_capacity(length.min(1 << 20));
        (&mut *reader).take(self.data_length()).read_to_end(&mut data)?;
        if data.len() != length {
            return Err(Mp4Error::truncated(format!(
                "'{}' declares {} payload bytes, only {} available",
                self.name,
                length,
                data.len()
            )));
        }
        Ok(data)
    }

    /// Render raw atom data.
    pub fn render(name: Fourcc, data: &[u8]) -> Result<Vec<u8>> {
        let size = (data.len() as u64)
            .checked_add(HEADER_SIZE)
            .ok_or_else(|| Mp4Error::LengthOverflow(format!("'{}' payload too large", name)))?;
        let mut out;
        if let Ok(size) = u32::try_from(size) {
            out = Vec::with_capacity(size as usize);
            out.extend_from_slice(&size.to_be_bytes());
            out.extend_from_slice(&name.0);
        } else {
            let size = size
                .checked_add(HEADER_SIZE)
                .ok_or_else(|| Mp4Error::LengthOverflow(format!("'{}' payload too large", name)))?;
            out = Vec::with_capacity(data.len() + EXTENDED_HEADER_SIZE as usize);
            out.extend_from_slice(&1u32.to_be_bytes());
            out.extend_from_slice(&name.0);
            out.extend_from_slice(&size.to_be_bytes());
        }
        out.extend_from_slice(data);
        Ok(out)
    }

    /// Serialize this atom and all of its descendants.
    ///
    /// Headers are re-encoded in their smallest legal form, leaf payloads
    /// and the `meta` version prefix are copied from the stream.
    pub fn serialize<R: Read + Seek>(&self, reader: &mut R) -> Result<Vec<u8>> {
        match &self.children {
            None => Atom::render(self.name, &self.read(reader)?),
            Some(children) => {
                let mut data = Vec::new();
                let skip = self.name.child_skip();
                if skip > 0 {
                    reader.seek(SeekFrom::Start(self.data_offset))?;
                    let mut prefix = vec![0u8; skip as usize];
                    read_exact(reader, &mut prefix, "container prefix")?;
                    data.extend_from_slice(&prefix);
                }
                for child in children {
                    data.extend_from_slice(&child.serialize(reader)?);
                }
                Atom::render(self.name, &data)
            }
        }
    }

    /// Direct children named `name`, or every descendant named `name` when
    /// `recursive` is set. Depth first, pre-order.
    pub fn findall(&self, name: Fourcc, recursive: bool) -> FindAll<'_> {
        FindAll::new(std::slice::from_ref(self), name, recursive, true)
    }

    /// Look up a descendant by a path of names, first match at each level.
    pub fn get(&self, names: &[Fourcc]) -> Option<&Atom> {
        let mut atom = self;
        for name in names {
            atom = atom.children.as_ref()?.iter().find(|c| c.name == *name)?;
        }
        Some(atom)
    }

    /// Shift this atom and its descendants after the bytes from `moved_from`
    /// onwards moved by `delta`.
    pub(crate) fn shift(&mut self, moved_from: u64, delta: i64) -> Result<()> {
        if self.offset >= moved_from {
            self.offset = cdata::apply_delta(self.offset, delta, "atom offset")?;
            self.data_offset = cdata::apply_delta(self.data_offset, delta, "atom offset")?;
        }
        if let Some(children) = &mut self.children {
            for child in children {
                child.shift(moved_from, delta)?;
            }
        }
        Ok(())
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Mp4Error::truncated(format!("stream ended inside {}", what))
        } else {
            e.into()
        }
    })
}

/// Depth-first, pre-order iterator over atoms with a given name.
pub struct FindAll<'a> {
    stack: Vec<std::slice::Iter<'a, Atom>>,
    name: Fourcc,
    recursive: bool,
}

impl<'a> FindAll<'a> {
    /// With `from_parent` set, `roots` are the starting atoms themselves and
    /// only their descendants are searched.
    fn new(roots: &'a [Atom], name: Fourcc, recursive: bool, from_parent: bool) -> Self {
        let mut stack = Vec::new();
        if from_parent {
            for root in roots.iter().rev() {
                if let Some(children) = &root.children {
                    stack.push(children.iter());
                }
            }
        } else {
            stack.push(roots.iter());
        }
        Self {
            stack,
            name,
            recursive,
        }
    }
}

impl<'a> Iterator for FindAll<'a> {
    type Item = &'a Atom;

    fn next(&mut self) -> Option<&'a Atom> {
        loop {
            let level = self.stack.last_mut()?;
            let Some(atom) = level.next() else {
                self.stack.pop();
                continue;
            };
            if self.recursive {
                if let Some(children) = &atom.children {
                    self.stack.push(children.iter());
                }
            }
            if atom.name == self.name {
                return Some(atom);
            }
        }
    }
}

/// Root atoms of a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Atoms {
    pub atoms: Vec<Atom>,
}

/// Whether the atom at `pos` announces a 64-bit length the stream is too
/// short to hold. Leaves the reader at `pos`.
fn extended_header_cut_off<R: Read + Seek>(reader: &mut R, pos: u64, end: u64) -> Result<bool> {
    let mut size = [0u8; 4];
    reader.seek(SeekFrom::Start(pos))?;
    read_exact(reader, &mut size, "atom header")?;
    reader.seek(SeekFrom::Start(pos))?;
    Ok(u32::from_be_bytes(size) == 1 && end - pos < EXTENDED_HEADER_SIZE)
}

impl Atoms {
    /// Parse every top-level atom.
    ///
    /// A tail shorter than an atom header is ignored, as is a final 64-bit
    /// header cut off by the end of the stream. Anything malformed inside an
    /// atom is an error.
    pub fn load<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let end = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut atoms = Vec::new();
        let mut pos = 0;
        while pos + HEADER_SIZE <= end {
            if extended_header_cut_off(reader, pos, end)? {
                break;
            }
            let atom = Atom::parse(reader, end, 0)?;
            pos = atom.end();
            atoms.push(atom);
        }
        if pos < end {
            tracing::debug!(trailing = end - pos, "ignoring trailing bytes after last atom");
        }
        tracing::trace!(count = atoms.len(), size = end, "loaded top-level atoms");
        Ok(Atoms { atoms })
    }

    /// Look up an atom, first match at every level.
    pub fn get(&self, names: &[Fourcc]) -> Result<&Atom> {
        self.path(names)?
            .pop()
            .ok_or_else(|| Mp4Error::PathNotFound("empty path".to_string()))
    }

    /// Look up every atom along a path.
    ///
    /// `path(&[MOOV, UDTA, META])` returns the moov, udta and meta atoms.
    pub fn path(&self, names: &[Fourcc]) -> Result<Vec<&Atom>> {
        let mut path = Vec::with_capacity(names.len());
        let mut level: &[Atom] = &self.atoms;
        for (depth, name) in names.iter().enumerate() {
            let atom = level
                .iter()
                .find(|a| a.name == *name)
                .ok_or_else(|| Mp4Error::PathNotFound(format_path(&names[..=depth])))?;
            level = atom.children.as_deref().unwrap_or(&[]);
            path.push(atom);
        }
        Ok(path)
    }

    /// Whether the complete path exists.
    pub fn contains(&self, names: &[Fourcc]) -> bool {
        self.path(names).is_ok()
    }

    /// Find every atom named `name`, top-level atoms included when
    /// `recursive` is set.
    pub fn findall(&self, name: Fourcc, recursive: bool) -> FindAll<'_> {
        FindAll::new(&self.atoms, name, recursive, false)
    }

    /// Fix up the tree after the bytes from `moved_from` onwards moved by
    /// `delta`, inside the atom at the end of `path`.
    ///
    /// Every atom along the path grows by `delta`; every atom starting at or
    /// after `moved_from` moves by `delta`.
    pub(crate) fn apply_resize(
        &mut self,
        path: &[Fourcc],
        moved_from: u64,
        delta: i64,
    ) -> Result<()> {
        let mut level: &mut [Atom] = &mut self.atoms;
        for (depth, name) in path.iter().enumerate() {
            let atom = level
                .iter_mut()
                .find(|a| a.name == *name)
                .ok_or_else(|| Mp4Error::PathNotFound(format_path(&path[..=depth])))?;
            atom.length = cdata::apply_delta(atom.length, delta, "atom length")?;
            match atom.children.as_mut() {
                Some(children) => level = children,
                None => break,
            }
        }
        for atom in &mut self.atoms {
            atom.shift(moved_from, delta)?;
        }
        Ok(())
    }
}

pub(crate) fn format_path(names: &[Fourcc]) -> String {
    names
        .iter()
        .map(|n| n.to_key())
        .collect::<Vec<_>>()
        .join(".")
}

impl fmt::Display for Atoms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_atom(f: &mut fmt::Formatter<'_>, atom: &Atom, depth: usize) -> fmt::Result {
            writeln!(
                f,
                "{:indent$}{} length={} offset={}",
                "",
                atom.name,
                atom.length,
                atom.offset,
                indent = depth * 2
            )?;
            for child in atom.children.iter().flatten() {
                write_atom(f, child, depth + 1)?;
            }
            Ok(())
        }
        for atom in &self.atoms {
            write_atom(f, atom, 0)?;
        }
        Ok(())
    }
}
