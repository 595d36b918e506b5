//! Encoding of the individual `ilst` items.
//!
//! Each child of `ilst` is an atom named after the tag, holding one or more
//! `data` atoms:
//!
//! ```text
//! [size:4]["data"][version:1][flags:3][locale:4][payload...]
//! ```
//!
//! The flags carry the [`DataType`]. Freeform (`----`) items carry a `mean`
//! and a `name` atom before their `data` atoms, cover items may carry
//! `name` atoms in between.

use crate::atom::{latin1, Atom, Fourcc};
use crate::cdata::{self, ByteCursor};
use crate::error::{Mp4Error, Result};
use crate::genres;
use crate::value::{Cover, DataType, FreeForm, ImageFormat, TagValue};

/// How the payload of an item is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemKind {
    /// UTF-8 text, implicit type accepted as well.
    Text,
    /// Signed integer written at least `min_bytes` wide.
    Integer { min_bytes: usize },
    /// One byte flag, stored as a single value.
    Bool,
    /// Number and total. `trkn` has a trailing reserved field, `disk` not.
    Pair { trailing: bool },
    /// Index into the ID3v1 genre table.
    Genre,
    Cover,
    FreeForm,
}

impl ItemKind {
    /// Kind of a known item, `None` for identifiers that are parsed as
    /// plain UTF-8 text.
    pub(crate) fn lookup(name: Fourcc) -> Option<Self> {
        let kind = match &name.0 {
            b"\xa9nam" | b"\xa9alb" | b"\xa9ART" | b"aART" | b"\xa9wrt" | b"\xa9day"
            | b"\xa9cmt" | b"desc" | b"purd" | b"\xa9grp" | b"\xa9gen" | b"\xa9lyr"
            | b"catg" | b"keyw" | b"\xa9too" | b"cprt" | b"soal" | b"soaa" | b"soar"
            | b"sonm" | b"soco" | b"sosn" | b"tvsh" | b"\xa9wrk" | b"\xa9mvn" | b"purl"
            | b"egid" => Self::Text,
            b"plID" => Self::Integer { min_bytes: 8 },
            b"cnID" | b"geID" | b"atID" | b"sfID" | b"cmID" | b"tvsn" | b"tves" => {
                Self::Integer { min_bytes: 4 }
            }
            b"tmpo" | b"\xa9mvi" | b"\xa9mvc" => Self::Integer { min_bytes: 2 },
            b"akID" | b"shwm" | b"stik" | b"hdvd" | b"rtng" => Self::Integer { min_bytes: 1 },
            b"cpil" | b"pgap" | b"pcst" => Self::Bool,
            b"trkn" => Self::Pair { trailing: true },
            b"disk" => Self::Pair { trailing: false },
            b"gnre" => Self::Genre,
            b"covr" => Self::Cover,
            b"----" => Self::FreeForm,
            _ => return None,
        };
        Some(kind)
    }
}

/// The decoded form of one `ilst` child.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParsedItem {
    pub key: String,
    pub values: Vec<TagValue>,
    /// Replace an existing entry for the key instead of extending it.
    pub replace: bool,
}

impl ParsedItem {
    fn list(key: String, values: Vec<TagValue>) -> Self {
        Self {
            key,
            values,
            replace: false,
        }
    }
}

/// A sub-atom inside an item.
struct SubAtom<'a> {
    name: Fourcc,
    body: &'a [u8],
}

/// A decoded `data` atom.
struct DataAtom<'a> {
    version: u8,
    flags: u32,
    payload: &'a [u8],
}

fn truncated(parent: Fourcc) -> Mp4Error {
    Mp4Error::metadata(format!("truncated atom '{}'", parent))
}

fn sub_atoms(parent: Fourcc, data: &[u8]) -> Result<Vec<SubAtom<'_>>> {
    let mut cursor = ByteCursor::new(data);
    let mut atoms = Vec::new();
    while !cursor.is_empty() {
        let length = cursor.u32_be().map_err(|_| truncated(parent))? as usize;
        let name = Fourcc(cursor.fourcc().map_err(|_| truncated(parent))?);
        if length < 8 {
            return Err(Mp4Error::metadata(format!(
                "invalid length {} of '{}' inside '{}'",
                length, name, parent
            )));
        }
        let body = cursor.take(length - 8).map_err(|_| truncated(parent))?;
        atoms.push(SubAtom { name, body });
    }
    Ok(atoms)
}

impl<'a> SubAtom<'a> {
    fn data(&self, parent: Fourcc) -> Result<DataAtom<'a>> {
        if self.name != Fourcc::DATA {
            return Err(Mp4Error::metadata(format!(
                "unexpected atom '{}' inside '{}'",
                self.name, parent
            )));
        }
        let mut cursor = ByteCursor::new(self.body);
        let version = cursor.u8().map_err(|_| truncated(parent))?;
        let flags = cursor.u24_be().map_err(|_| truncated(parent))?;
        cursor.skip(4).map_err(|_| truncated(parent))?; // locale
        Ok(DataAtom {
            version,
            flags,
            payload: cursor.rest(),
        })
    }
}

fn data_atoms(parent: Fourcc, data: &[u8]) -> Result<Vec<DataAtom<'_>>> {
    sub_atoms(parent, data)?
        .iter()
        .map(|atom| atom.data(parent))
        .collect()
}

/// Decode the payload of the `ilst` child named `name`.
///
/// Failures are [`Mp4Error::is_metadata`] errors, except for integer items
/// with an unknown `data` version.
pub(crate) fn parse_item(name: Fourcc, data: &[u8]) -> Result<ParsedItem> {
    let key = name.to_key();
    match ItemKind::lookup(name) {
        None => parse_text(name, data, false),
        Some(ItemKind::Text) => parse_text(name, data, true),
        Some(ItemKind::Integer { .. }) => {
            let mut values = Vec::new();
            for atom in data_atoms(name, data)? {
                if atom.version != 0 {
                    return Err(Mp4Error::UnsupportedVersion {
                        atom: name,
                        version: atom.version,
                    });
                }
                if atom.flags != DataType::Implicit.code() && atom.flags != DataType::Integer.code()
                {
                    return Err(Mp4Error::metadata(format!(
                        "unknown data type {} for '{}'",
                        atom.flags, name
                    )));
                }
                values.push(TagValue::Integer(cdata::int_be(atom.payload)?));
            }
            Ok(ParsedItem::list(key, values))
        }
        Some(ItemKind::Bool) => {
            let mut value = None;
            for atom in data_atoms(name, data)? {
                match atom.payload {
                    [b] => value = Some(TagValue::Bool(*b != 0)),
                    _ => return Err(Mp4Error::metadata(format!("invalid bool in '{}'", name))),
                }
            }
            Ok(ParsedItem {
                key,
                values: value.into_iter().collect(),
                replace: true,
            })
        }
        Some(ItemKind::Pair { .. }) => {
            let mut values = Vec::new();
            for atom in data_atoms(name, data)? {
                let Some(pair) = atom.payload.get(2..6) else {
                    return Err(Mp4Error::metadata(format!("invalid pair in '{}'", name)));
                };
                let number = u16::from_be_bytes([pair[0], pair[1]]);
                let total = u16::from_be_bytes([pair[2], pair[3]]);
                values.push(TagValue::Pair(number.into(), total.into()));
            }
            Ok(ParsedItem::list(key, values))
        }
        Some(ItemKind::Genre) => {
            let mut values = Vec::new();
            for atom in data_atoms(name, data)? {
                let [a, b] = *atom.payload else {
                    return Err(Mp4Error::metadata("invalid genre"));
                };
                let index = u16::from_be_bytes([a, b]);
                let genre = genres::genre_name(index)
                    .ok_or_else(|| Mp4Error::metadata(format!("unknown genre {}", index)))?;
                values.push(TagValue::Genre(genre.to_string()));
            }
            Ok(ParsedItem::list(key, values))
        }
        Some(ItemKind::Cover) => {
            let mut values = Vec::new();
            for atom in sub_atoms(name, data)? {
                if atom.name == Fourcc::NAME {
                    continue;
                }
                let atom = atom.data(name)?;
                let format = ImageFormat::from_data_type(DataType::from_code(atom.flags));
                values.push(TagValue::Cover(Cover::new(atom.payload, format)));
            }
            Ok(ParsedItem::list(key, values))
        }
        Some(ItemKind::FreeForm) => parse_freeform(data),
    }
}

/// Known text items accept the implicit type, unknown items only count as
/// text when they are explicitly UTF-8.
fn parse_text(name: Fourcc, data: &[u8], known: bool) -> Result<ParsedItem> {
    let mut values = Vec::new();
    for atom in data_atoms(name, data)? {
        let flags = DataType::from_code(atom.flags);
        let is_text = match flags {
            DataType::Utf8 => true,
            DataType::Implicit => known,
            _ => false,
        };
        if !is_text {
            return Err(Mp4Error::metadata(format!(
                "'{}' is not text, data type {}",
                name, atom.flags
            )));
        }
        let text = std::str::from_utf8(atom.payload)
            .map_err(|e| Mp4Error::metadata(format!("'{}': {}", name, e)))?;
        values.push(TagValue::Text(text.to_string()));
    }
    Ok(ParsedItem::list(name.to_key(), values))
}

fn parse_freeform(data: &[u8]) -> Result<ParsedItem> {
    let name = Fourcc::FREEFORM;
    let atoms = sub_atoms(name, data)?;
    let (mean, key_name) = match atoms.as_slice() {
        [mean, key_name, ..] if mean.name == Fourcc::MEAN && key_name.name == Fourcc::NAME => {
            (mean, key_name)
        }
        _ => return Err(Mp4Error::metadata("freeform item without mean and name")),
    };
    // both carry 4 bytes of version and flags before the text
    let (Some(mean), Some(key_name)) = (mean.body.get(4..), key_name.body.get(4..)) else {
        return Err(truncated(name));
    };

    let mut values = Vec::new();
    for atom in &atoms[2..] {
        let atom = atom.data(name)?;
        values.push(TagValue::FreeForm(FreeForm {
            data: atom.payload.to_vec(),
            data_type: DataType::from_code(atom.flags),
            version: atom.version,
        }));
    }

    let mut key = Vec::with_capacity(6 + mean.len() + key_name.len());
    key.extend_from_slice(b"----:");
    key.extend_from_slice(mean);
    key.push(b':');
    key.extend_from_slice(key_name);
    let key = key.iter().map(|&b| b as char).collect();
    Ok(ParsedItem::list(key, values))
}

/// Atom name for a tag key. Freeform keys map to `----`.
pub(crate) fn key_to_name(key: &str) -> Result<Fourcc> {
    if key.starts_with("----") {
        return Ok(Fourcc::FREEFORM);
    }
    Fourcc::from_key(key).ok_or_else(|| Mp4Error::InvalidKey(key.to_string()))
}

fn render_data<'a, I>(name: Fourcc, data_type: DataType, payloads: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    render_versioned(name, payloads.into_iter().map(|p| (0, data_type, p)))
}

fn render_versioned<'a, I>(name: Fourcc, payloads: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (u8, DataType, &'a [u8])>,
{
    Atom::render(name, &data_atoms_bytes(payloads)?)
}

fn data_atoms_bytes<'a, I>(payloads: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (u8, DataType, &'a [u8])>,
{
    let mut data = Vec::new();
    for (version, data_type, payload) in payloads {
        let mut body = Vec::with_capacity(8 + payload.len());
        body.extend_from_slice(&((u32::from(version) << 24) | data_type.code()).to_be_bytes());
        body.extend_from_slice(&[0; 4]); // locale
        body.extend_from_slice(payload);
        data.extend(Atom::render(Fourcc::DATA, &body)?);
    }
    Ok(data)
}

fn mismatch(key: &str, expected: &str, value: &TagValue) -> Mp4Error {
    Mp4Error::invalid_value(format!(
        "'{}' takes {} values, got {}",
        key,
        expected,
        value.kind()
    ))
}

/// Render the `ilst` child for `key`.
pub(crate) fn render_item(key: &str, values: &[TagValue]) -> Result<Vec<u8>> {
    let name = key_to_name(key)?;
    match ItemKind::lookup(name).unwrap_or(ItemKind::Text) {
        ItemKind::Text => {
            let texts = values
                .iter()
                .map(|v| match v {
                    TagValue::Text(s) => Ok(s.as_bytes()),
                    other => Err(mismatch(key, "text", other)),
                })
                .collect::<Result<Vec<_>>>()?;
            render_data(name, DataType::Utf8, texts)
        }
        ItemKind::Integer { min_bytes } => {
            let encoded = values
                .iter()
                .map(|v| match v {
                    TagValue::Integer(i) => Ok(cdata::int_be_min(*i, min_bytes)),
                    other => Err(mismatch(key, "integer", other)),
                })
                .collect::<Result<Vec<_>>>()?;
            render_data(name, DataType::Integer, encoded.iter().map(Vec::as_slice))
        }
        ItemKind::Bool => match values {
            [TagValue::Bool(b)] => render_data(name, DataType::Integer, [&[u8::from(*b)][..]]),
            [other] => Err(mismatch(key, "bool", other)),
            _ => Err(Mp4Error::invalid_value(format!(
                "'{}' takes exactly one bool, got {}",
                key,
                values.len()
            ))),
        },
        ItemKind::Pair { trailing } => {
            let mut encoded = Vec::with_capacity(values.len());
            for value in values {
                let TagValue::Pair(number, total) = *value else {
                    return Err(mismatch(key, "pair", value));
                };
                let (Ok(n), Ok(t)) = (u16::try_from(number), u16::try_from(total)) else {
                    return Err(Mp4Error::invalid_value(format!(
                        "invalid numeric pair ({}, {})",
                        number, total
                    )));
                };
                let mut data = Vec::with_capacity(8);
                data.extend_from_slice(&[0, 0]);
                data.extend_from_slice(&n.to_be_bytes());
                data.extend_from_slice(&t.to_be_bytes());
                if trailing {
                    data.extend_from_slice(&[0, 0]);
                }
                encoded.push(data);
            }
            render_data(name, DataType::Implicit, encoded.iter().map(Vec::as_slice))
        }
        ItemKind::Genre => {
            let encoded = values
                .iter()
                .map(|v| {
                    let genre = v.as_text().ok_or_else(|| mismatch(key, "genre", v))?;
                    genres::genre_index(genre)
                        .map(u16::to_be_bytes)
                        .ok_or_else(|| Mp4Error::invalid_value(format!("unknown genre {:?}", genre)))
                })
                .collect::<Result<Vec<_>>>()?;
            render_data(name, DataType::Implicit, encoded.iter().map(|b| &b[..]))
        }
        ItemKind::Cover => {
            let covers = values
                .iter()
                .map(|v| match v {
                    TagValue::Cover(c) => Ok((0u8, c.format.data_type(), c.data.as_slice())),
                    other => Err(mismatch(key, "cover", other)),
                })
                .collect::<Result<Vec<_>>>()?;
            render_versioned(name, covers)
        }
        ItemKind::FreeForm => render_freeform(key, values),
    }
}

fn render_freeform(key: &str, values: &[TagValue]) -> Result<Vec<u8>> {
    let mut parts = key.splitn(3, ':');
    let (Some("----"), Some(mean), Some(key_name)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(Mp4Error::InvalidKey(key.to_string()));
    };
    let (Some(mean), Some(key_name)) = (latin1(mean), latin1(key_name)) else {
        return Err(Mp4Error::InvalidKey(key.to_string()));
    };

    let mut data = Vec::new();
    for (sub, text) in [(Fourcc::MEAN, mean), (Fourcc::NAME, key_name)] {
        data.extend(Atom::render(sub, &[&[0u8; 4][..], &text].concat())?);
    }

    let payloads = values
        .iter()
        .map(|v| match v {
            TagValue::FreeForm(f) => Ok((f.version, f.data_type, f.data.as_slice())),
            TagValue::Text(s) => Ok((0, DataType::Utf8, s.as_bytes())),
            other => Err(mismatch(key, "freeform", other)),
        })
        .collect::<Result<Vec<_>>>()?;
    data.extend(data_atoms_bytes(payloads)?);
    Atom::render(Fourcc::FREEFORM, &data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_atom(flags: u32, payload: &[u8]) -> Vec<u8> {
        Atom::render(
            Fourcc::DATA,
            &[&flags.to_be_bytes()[..], &[0; 4], payload].concat(),
        )
        .unwrap()
    }

    fn item_payload(rendered: &[u8]) -> &[u8] {
        &rendered[8..]
    }

    #[test]
    fn test_lookup() {
        assert_eq!(ItemKind::lookup(Fourcc(*b"\xa9nam")), Some(ItemKind::Text));
        assert_eq!(
            ItemKind::lookup(Fourcc(*b"plID")),
            Some(ItemKind::Integer { min_bytes: 8 })
        );
        assert_eq!(
            ItemKind::lookup(Fourcc(*b"disk")),
            Some(ItemKind::Pair { trailing: false })
        );
        assert_eq!(ItemKind::lookup(Fourcc(*b"foob")), None);
    }

    #[test]
    fn test_render_bool() {
        let rendered = render_item("pgap", &[TagValue::Bool(true)]).unwrap();
        assert_eq!(
            rendered,
            b"\x00\x00\x00\x19pgap\x00\x00\x00\x11data\x00\x00\x00\x15\x00\x00\x00\x00\x01"
        );
        let rendered = render_item("pgap", &[TagValue::Bool(false)]).unwrap();
        assert_eq!(rendered[24], 0);
        assert!(render_item("pgap", &[]).is_err());
    }

    #[test]
    fn test_render_text() {
        let rendered = render_item("aART", &["Album Artist".into(), "Whee".into()]).unwrap();
        assert_eq!(
            rendered,
            [
                &b"\x00\x00\x008aART"[..],
                b"\x00\x00\x00\x1cdata\x00\x00\x00\x01\x00\x00\x00\x00Album Artist",
                b"\x00\x00\x00\x14data\x00\x00\x00\x01\x00\x00\x00\x00Whee",
            ]
            .concat()
        );
        assert!(render_item("aART", &[TagValue::Integer(1)]).is_err());
    }

    #[test]
    fn test_render_freeform() {
        let rendered = render_item(
            "----:net.sacredchao.Mutagen:test",
            &["whee".into(), FreeForm::text("wee").into()],
        )
        .unwrap();
        assert_eq!(
            rendered,
            [
                &b"\x00\x00\x00a----"[..],
                b"\x00\x00\x00\"mean\x00\x00\x00\x00net.sacredchao.Mutagen",
                b"\x00\x00\x00\x10name\x00\x00\x00\x00test",
                b"\x00\x00\x00\x14data\x00\x00\x00\x01\x00\x00\x00\x00whee",
                b"\x00\x00\x00\x13data\x00\x00\x00\x01\x00\x00\x00\x00wee",
            ]
            .concat()
        );

        let parsed = parse_item(Fourcc::FREEFORM, item_payload(&rendered)).unwrap();
        assert_eq!(parsed.key, "----:net.sacredchao.Mutagen:test");
        assert_eq!(parsed.values.len(), 2);
        assert_eq!(parsed.values[1], TagValue::FreeForm(FreeForm::text("wee")));

        assert!(matches!(
            render_item("----:nomean", &[]),
            Err(Mp4Error::InvalidKey(_))
        ));
    }

    #[test]
    fn test_freeform_keeps_type_and_version() {
        let value = FreeForm {
            data: vec![0xDE, 0xAD],
            data_type: DataType::Other(99),
            version: 1,
        };
        let rendered = render_item("----:com.apple.iTunes:x", &[value.clone().into()]).unwrap();
        let parsed = parse_item(Fourcc::FREEFORM, item_payload(&rendered)).unwrap();
        assert_eq!(parsed.values, vec![TagValue::FreeForm(value)]);
    }

    #[test]
    fn test_bad_freeform() {
        let mean = Atom::render(Fourcc::MEAN, b"net.sacredchao.Mutagen").unwrap();
        let name = Atom::render(Fourcc::NAME, b"empty test key").unwrap();
        let bad = [&[0u8; 4][..], &mean, &name].concat();
        assert!(parse_item(Fourcc::FREEFORM, &bad).unwrap_err().is_metadata());
    }

    #[test]
    fn test_integer_widths() {
        let rendered = render_item("tmpo", &[TagValue::Integer(120)]).unwrap();
        // 2 byte minimum for tmpo
        assert_eq!(&rendered[24..], &[0, 120]);
        let rendered = render_item("plID", &[TagValue::Integer(1)]).unwrap();
        assert_eq!(rendered.len(), 24 + 8);
        let rendered = render_item("stik", &[TagValue::Integer(300)]).unwrap();
        assert_eq!(&rendered[24..], &[0x01, 0x2C]);

        let parsed = parse_item(Fourcc(*b"stik"), item_payload(&rendered)).unwrap();
        assert_eq!(parsed.values, vec![TagValue::Integer(300)]);

        let three = data_atom(21, &[0x01, 0x00, 0x00]);
        let parsed = parse_item(Fourcc(*b"cnID"), &three).unwrap();
        assert_eq!(parsed.values, vec![TagValue::Integer(65536)]);
    }

    #[test]
    fn test_integer_version_and_type() {
        let versioned = data_atom(1 << 24 | 21, &[1]);
        assert!(matches!(
            parse_item(Fourcc(*b"tmpo"), &versioned),
            Err(Mp4Error::UnsupportedVersion { version: 1, .. })
        ));
        let text_typed = data_atom(1, &[1]);
        assert!(parse_item(Fourcc(*b"tmpo"), &text_typed).is_err());
        let implicit = data_atom(0, &[0, 90]);
        assert_eq!(
            parse_item(Fourcc(*b"tmpo"), &implicit).unwrap().values,
            vec![TagValue::Integer(90)]
        );
    }

    #[test]
    fn test_pair_ranges() {
        let ok = [TagValue::Pair(0, 65535)];
        let rendered = render_item("trkn", &ok).unwrap();
        assert_eq!(&rendered[24..], &[0, 0, 0, 0, 0xFF, 0xFF, 0, 0]);
        let parsed = parse_item(Fourcc(*b"trkn"), item_payload(&rendered)).unwrap();
        assert_eq!(parsed.values, ok);

        let rendered = render_item("disk", &[TagValue::Pair(1, 2)]).unwrap();
        assert_eq!(&rendered[24..], &[0, 0, 0, 1, 0, 2]);

        assert!(render_item("trkn", &[TagValue::Pair(65536, 1)]).is_err());
        assert!(render_item("disk", &[TagValue::Pair(1, -1)]).is_err());
    }

    #[test]
    fn test_genre() {
        let blues = data_atom(0, &[0, 1]);
        let parsed = parse_item(Fourcc(*b"gnre"), &blues).unwrap();
        assert_eq!(parsed.key, "gnre");
        assert_eq!(parsed.values, vec![TagValue::Genre("Blues".into())]);
        assert_eq!(
            render_item("gnre", &parsed.values).unwrap(),
            Atom::render(Fourcc(*b"gnre"), &blues).unwrap()
        );

        let past_end = data_atom(0, &(genres::GENRES.len() as u16 + 1).to_be_bytes());
        assert!(parse_item(Fourcc(*b"gnre"), &past_end).is_err());
        assert!(parse_item(Fourcc(*b"gnre"), &data_atom(0, &[0, 0])).is_err());
        assert!(render_item("gnre", &[TagValue::Genre("Nope".into())]).is_err());
    }

    #[test]
    fn test_cover() {
        let name = Atom::render(Fourcc::NAME, b"\0\0\0\0front").unwrap();
        let png = data_atom(14, b"\x89PNG");
        let blank = data_atom(0, b"whee");
        let payload = [png, name, blank].concat();
        let parsed = parse_item(Fourcc(*b"covr"), &payload).unwrap();
        assert_eq!(
            parsed.values,
            vec![
                TagValue::Cover(Cover::new(*b"\x89PNG", ImageFormat::Png)),
                TagValue::Cover(Cover::new(*b"whee", ImageFormat::Jpeg)),
            ]
        );

        let bad = Atom::render(Fourcc(*b"foob"), b"\0\0\0\x0e\0\0\0\0whee").unwrap();
        assert!(parse_item(Fourcc(*b"covr"), &bad).unwrap_err().is_metadata());
    }

    #[test]
    fn test_unknown_items_need_utf8() {
        let utf8 = data_atom(1, "caf\u{e9}".as_bytes());
        let parsed = parse_item(Fourcc(*b"foob"), &utf8).unwrap();
        assert_eq!(parsed.values, vec![TagValue::Text("caf\u{e9}".into())]);

        let implicit = data_atom(0, b"whee");
        assert!(parse_item(Fourcc(*b"foob"), &implicit).is_err());
        // known text items accept the implicit type
        assert!(parse_item(Fourcc(*b"\xa9nam"), &implicit).is_ok());

        let invalid = data_atom(1, &[0xFF, 0xFE]);
        assert!(parse_item(Fourcc(*b"\xa9nam"), &invalid).unwrap_err().is_metadata());
    }

    #[test]
    fn test_bad_text_data() {
        let data = Atom::render(Fourcc(*b"datA"), b"\x00\x00\x00\x01\x00\x00\x00\x00whee").unwrap();
        assert!(parse_item(Fourcc(*b"aART"), &data).unwrap_err().is_metadata());
        // truncated data atom
        let mut short = data_atom(1, b"whee");
        short.truncate(14);
        assert!(parse_item(Fourcc(*b"aART"), &short).unwrap_err().is_metadata());
    }

    #[test]
    fn test_bool_single_value() {
        let payload = [data_atom(21, &[1]), data_atom(21, &[0])].concat();
        let parsed = parse_item(Fourcc(*b"cpil"), &payload).unwrap();
        assert!(parsed.replace);
        assert_eq!(parsed.values, vec![TagValue::Bool(false)]);
        assert!(parse_item(Fourcc(*b"cpil"), &data_atom(21, &[])).is_err());
    }

    #[test]
    fn test_key_to_name() {
        assert_eq!(key_to_name("----:a:b").unwrap(), Fourcc::FREEFORM);
        assert_eq!(key_to_name("\u{a9}nam").unwrap(), Fourcc(*b"\xa9nam"));
        assert!(matches!(key_to_name("nam"), Err(Mp4Error::InvalidKey(_))));
    }
}
