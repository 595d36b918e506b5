//! The tag dictionary stored in `moov.udta.meta.ilst`.

use indexmap::IndexMap;
use std::io::{Read, Seek};

use crate::atom::{Atom, Atoms, Fourcc};
use crate::error::{Mp4Error, Result};
use crate::item::{self, ParsedItem};
use crate::value::TagValue;

/// Atom path of the tag list.
pub const ILST_PATH: [Fourcc; 4] = [Fourcc::MOOV, Fourcc::UDTA, Fourcc::META, Fourcc::ILST];

/// Render order used by iTunes, matched against the first four characters
/// of a key. Everything else goes after these.
const KEY_ORDER: [&[u8; 4]; 17] = [
    b"\xa9nam", b"\xa9ART", b"\xa9wrt", b"\xa9alb", b"\xa9gen", b"gnre", b"trkn", b"disk",
    b"\xa9day", b"cpil", b"pgap", b"pcst", b"tmpo", b"\xa9too", b"----", b"covr", b"\xa9lyr",
];

fn key_priority(key: &str) -> usize {
    let prefix: Vec<u32> = key.chars().take(4).map(u32::from).collect();
    KEY_ORDER
        .iter()
        .position(|name| name.iter().map(|&b| u32::from(b)).eq(prefix.iter().copied()))
        .unwrap_or(KEY_ORDER.len())
}

/// MP4 tag dictionary.
///
/// Keys are atom names decoded as Latin-1 (`"\u{a9}nam"`, `"trkn"`) or
/// freeform keys of the form `"----:mean:name"`. Every key maps to a list
/// of values, `cpil`, `pgap` and `pcst` hold a single [`TagValue::Bool`].
///
/// Items that could not be decoded are kept as raw payloads and written
/// back unchanged, unless a value with the same key was set since. Items
/// with an unknown name keep their payloads too, so vendor data with an
/// unusual locale or version survives a save untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mp4Tags {
    items: IndexMap<String, Vec<TagValue>>,
    failed_atoms: IndexMap<String, Vec<Vec<u8>>>,
    /// Loaded payloads of decoded items with an unknown name
    originals: IndexMap<String, Vec<Vec<u8>>>,
    padding: u64,
}

impl Mp4Tags {
    /// Create an empty tag dictionary
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `atoms` has a tag list to load.
    pub fn can_load(atoms: &Atoms) -> bool {
        atoms.contains(&ILST_PATH)
    }

    /// Load the tag list.
    ///
    /// Fails with [`Mp4Error::PathNotFound`] when there is no tag list.
    /// Items with an unknown name that cannot be decoded are kept as raw
    /// data, decode errors of known items are returned.
    pub fn load<R: Read + Seek>(atoms: &Atoms, reader: &mut R) -> Result<Self> {
        let path = atoms.path(&ILST_PATH)?;
        let ilst = path[path.len() - 1];
        let meta = path[path.len() - 2];

        let mut tags = Mp4Tags::new();
        for atom in ilst.children.iter().flatten() {
            let data = atom.read(reader)?;
            match item::parse_item(atom.name, &data) {
                Ok(parsed) => {
                    if item::ItemKind::lookup(atom.name).is_none() {
                        tags.originals
                            .entry(parsed.key.clone())
                            .or_default()
                            .push(data);
                    }
                    tags.add_parsed(parsed);
                }
                Err(e) if e.is_metadata() && item::ItemKind::lookup(atom.name).is_none() => {
                    tracing::debug!(atom = %atom.name, error = %e, "keeping undecodable item as is");
                    tags.failed_atoms
                        .entry(atom.name.to_key())
                        .or_default()
                        .push(data);
                }
                Err(e) => return Err(e),
            }
        }

        tags.padding = adjacent_free(meta, ilst).map_or(0, Atom::data_length);
        tracing::debug!(
            items = tags.items.len(),
            failed = tags.failed_atoms.len(),
            padding = tags.padding,
            "loaded tags"
        );
        Ok(tags)
    }

    fn add_parsed(&mut self, parsed: ParsedItem) {
        let ParsedItem {
            key,
            values,
            replace,
        } = parsed;
        if replace {
            self.items.insert(key, values);
        } else {
            self.items.entry(key).or_default().extend(values);
        }
    }

    /// Get the values of a tag
    pub fn get(&self, key: &str) -> Option<&[TagValue]> {
        self.items.get(key).map(Vec::as_slice)
    }

    /// Set the values of a tag, replacing existing ones.
    ///
    /// The values are rendered right away, so a value the key cannot hold
    /// is rejected here instead of when saving.
    pub fn set(&mut self, key: impl Into<String>, values: Vec<TagValue>) -> Result<()> {
        let key = key.into();
        item::render_item(&key, &values)?;
        self.originals.shift_remove(&key);
        self.items.insert(key, values);
        Ok(())
    }

    /// Set a tag to a single value
    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Result<()> {
        self.set(key, vec![value.into()])
    }

    /// Remove a tag
    pub fn remove(&mut self, key: &str) -> Option<Vec<TagValue>> {
        self.originals.shift_remove(key);
        self.items.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    /// Iterate over the tags in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[TagValue])> {
        self.items.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove all tags, undecodable items included
    pub fn clear(&mut self) {
        self.items.clear();
        self.failed_atoms.clear();
        self.originals.clear();
    }

    /// Raw payloads of items that could not be decoded, by key
    pub fn failed_atoms(&self) -> impl Iterator<Item = (&str, &[Vec<u8>])> {
        self.failed_atoms
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Size of the padding next to the tag list when it was loaded
    pub fn padding(&self) -> u64 {
        self.padding
    }

    /// Render the complete `ilst` atom.
    pub fn render(&self) -> Result<Vec<u8>> {
        let mut rendered = self
            .items
            .iter()
            .map(|(key, values)| {
                let bytes = match self.originals.get(key) {
                    Some(payloads) => render_raw(key, payloads)?,
                    None => item::render_item(key, values)?,
                };
                Ok((key_priority(key), bytes))
            })
            .collect::<Result<Vec<_>>>()?;
        rendered.sort_by(|(pa, a), (pb, b)| {
            pa.cmp(pb)
                .then_with(|| a.len().cmp(&b.len()))
                .then_with(|| a.cmp(b))
        });

        let mut data: Vec<u8> = rendered.into_iter().flat_map(|(_, bytes)| bytes).collect();
        for (key, payloads) in &self.failed_atoms {
            // freeform items can repeat, everything else was replaced
            // unless the key still holds what was loaded
            let replaced = self.items.contains_key(key) && !self.originals.contains_key(key);
            if key != "----" && replaced {
                continue;
            }
            data.extend(render_raw(key, payloads)?);
        }
        Atom::render(Fourcc::ILST, &data)
    }

    /// One `key=value` line per tag
    pub fn pprint(&self) -> String {
        self.items
            .iter()
            .map(|(key, values)| {
                let joined = values
                    .iter()
                    .map(TagValue::to_string)
                    .collect::<Vec<_>>();
                let separator = if key == "covr" { ", " } else { " / " };
                format!("{}={}", key, joined.join(separator))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Wrap stored payloads back into atoms named after `key`.
fn render_raw(key: &str, payloads: &[Vec<u8>]) -> Result<Vec<u8>> {
    let name = Fourcc::from_key(key).ok_or_else(|| Mp4Error::InvalidKey(key.to_string()))?;
    let mut data = Vec::new();
    for payload in payloads {
        data.extend(Atom::render(name, payload)?);
    }
    Ok(data)
}

/// The `free` atom directly before or after `ilst` inside `meta`.
pub(crate) fn adjacent_free<'a>(meta: &'a Atom, ilst: &Atom) -> Option<&'a Atom> {
    let siblings = meta.children.as_deref()?;
    let index = siblings.iter().position(|a| a.offset == ilst.offset)?;
    let prev = index.checked_sub(1).and_then(|i| siblings.get(i));
    let next = siblings.get(index + 1);
    [prev, next]
        .into_iter()
        .flatten()
        .find(|a| a.name == Fourcc::FREE)
}
