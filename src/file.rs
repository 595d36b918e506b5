//! An MP4 audio file: stream information plus the optional tag list.

use std::io::{Read, Seek};

use crate::atom::{Atoms, Fourcc};
use crate::error::{Mp4Error, Result};
use crate::info::Mp4Info;
use crate::padding::PaddingFn;
use crate::resize::Resizable;
use crate::save;
use crate::tags::Mp4Tags;

/// An MPEG-4 audio file, probably containing AAC.
///
/// Only the first `soun` track is used for the stream information.
#[derive(Debug, Clone, PartialEq)]
pub struct Mp4 {
    pub info: Mp4Info,
    /// `None` when the file has no `moov.udta.meta.ilst`
    pub tags: Option<Mp4Tags>,
}

impl Mp4 {
    /// Load stream information and tags.
    pub fn load<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let atoms = Atoms::load(reader)?;
        match atoms.atoms.first() {
            Some(first) if first.name == Fourcc::FTYP => {}
            _ => return Err(Mp4Error::NotMp4),
        }

        let info = Mp4Info::load(&atoms, reader)?;
        let tags = if Mp4Tags::can_load(&atoms) {
            Some(Mp4Tags::load(&atoms, reader)?)
        } else {
            None
        };
        Ok(Self { info, tags })
    }

    /// Add an empty tag list.
    pub fn add_tags(&mut self) -> Result<&mut Mp4Tags> {
        if self.tags.is_some() {
            return Err(Mp4Error::TagsAlreadyPresent);
        }
        Ok(self.tags.insert(Mp4Tags::new()))
    }

    /// Tags, created empty if the file had none.
    pub fn tags_mut(&mut self) -> &mut Mp4Tags {
        self.tags.get_or_insert_with(Mp4Tags::new)
    }

    /// Write the tags back into `stream`, which must hold the file this was
    /// loaded from. Does nothing without tags.
    pub fn save<S: Resizable>(&self, stream: &mut S, padding: Option<PaddingFn<'_>>) -> Result<()> {
        match &self.tags {
            Some(tags) => save::save_tags(stream, tags, padding),
            None => Ok(()),
        }
    }

    /// Remove all tags from the file. The empty tag list stays in place.
    pub fn delete<S: Resizable>(&mut self, stream: &mut S) -> Result<()> {
        if let Some(tags) = &mut self.tags {
            tags.clear();
            save::save_tags(stream, tags, None)?;
        }
        Ok(())
    }

    /// Stream information followed by one line per tag
    pub fn pprint(&self) -> String {
        let mut out = self.info.pprint();
        if let Some(tags) = &self.tags {
            let tags = tags.pprint();
            if !tags.is_empty() {
                out.push('\n');
                out.push_str(&tags);
            }
        }
        out
    }

    /// `{"info": ..., "tags": {key: [values]} | null}`
    pub fn to_json(&self) -> serde_json::Value {
        let tags = self.tags.as_ref().map(|tags| {
            tags.iter()
                .map(|(key, values)| (key.to_string(), serde_json::json!(values)))
                .collect::<serde_json::Map<_, _>>()
        });
        serde_json::json!({
            "info": self.info,
            "tags": tags,
        })
    }
}
