//! Stream information of the first audio track.

use serde::Serialize;
use std::io::{Cursor, Read, Seek};

use crate::atom::{Atom, Atoms, Fourcc};
use crate::cdata::ByteCursor;
use crate::error::{Mp4Error, Result};

/// Size of the AudioSampleEntry fields before the codec specific atoms.
const AUDIO_SAMPLE_ENTRY_SIZE: usize = 28;

/// ES_Descriptor tag in an `esds` atom.
const ES_DESCR_TAG: u8 = 0x03;

/// DecoderConfigDescriptor tag in an `esds` atom.
const DECODER_CONFIG_DESCR_TAG: u8 = 0x04;

/// MPEG-4 audio stream information.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Mp4Info {
    /// Length in seconds
    pub length: f64,
    /// Bits per second, 0 if unknown
    pub bitrate: u32,
    pub channels: u32,
    /// Sample rate in Hz
    pub sample_rate: u32,
    pub bits_per_sample: u32,
    /// `mp4a.<object type>` for AAC and friends, `alac`, or the name of the
    /// sample entry for anything else
    pub codec: String,
}

fn stream_error(e: Mp4Error) -> Mp4Error {
    match e {
        Mp4Error::StreamInfo(_) | Mp4Error::Io(_) => e,
        other => Mp4Error::StreamInfo(other.to_string()),
    }
}

/// Split a full atom payload into version, flags and the rest.
fn full_atom(data: &[u8]) -> Result<(u8, u32, ByteCursor<'_>)> {
    let mut cursor = ByteCursor::new(data);
    let version = cursor.u8()?;
    let flags = cursor.u24_be()?;
    Ok((version, flags, cursor))
}

impl Mp4Info {
    /// Read the stream information of the first `soun` track.
    pub fn load<R: Read + Seek>(atoms: &Atoms, reader: &mut R) -> Result<Self> {
        let moov = atoms
            .get(&[Fourcc::MOOV])
            .map_err(|_| Mp4Error::StreamInfo("no moov atom".to_string()))?;

        let mut audio = None;
        for trak in moov.findall(Fourcc::TRAK, false) {
            let Some(hdlr) = trak.get(&[Fourcc::MDIA, Fourcc::HDLR]) else {
                continue;
            };
            let data = hdlr.read(reader).map_err(stream_error)?;
            if data.get(8..12) == Some(&b"soun"[..]) {
                audio = Some(trak);
                break;
            }
        }
        let trak = audio.ok_or_else(|| Mp4Error::StreamInfo("track has no audio data".to_string()))?;

        let mut info = Mp4Info::default();
        let mdhd = trak
            .get(&[Fourcc::MDIA, Fourcc::MDHD])
            .ok_or_else(|| Mp4Error::StreamInfo("no mdhd atom".to_string()))?;
        info.parse_mdhd(&mdhd.read(reader).map_err(stream_error)?)
            .map_err(stream_error)?;

        if let Some(stsd) = trak.get(&[Fourcc::MDIA, Fourcc::MINF, Fourcc::STBL, Fourcc::STSD]) {
            info.parse_stsd(&stsd.read(reader).map_err(stream_error)?)
                .map_err(stream_error)?;
        }
        tracing::debug!(codec = %info.codec, length = info.length, "loaded stream info");
        Ok(info)
    }

    fn parse_mdhd(&mut self, data: &[u8]) -> Result<()> {
        let (version, _, mut cursor) = full_atom(data)?;
        let (timescale, duration) = match version {
            0 => {
                cursor.skip(8)?; // creation and modification time
                (cursor.u32_be()?, u64::from(cursor.u32_be()?))
            }
            1 => {
                cursor.skip(16)?;
                (cursor.u32_be()?, cursor.u64_be()?)
            }
            _ => {
                tracing::warn!(version, "unsupported mdhd version, length unknown");
                return Ok(());
            }
        };
        if timescale != 0 {
            self.length = duration as f64 / f64::from(timescale);
        }
        Ok(())
    }

    /// Channels, sample size, sample rate and bitrate from the first sample
    /// description.
    fn parse_stsd(&mut self, data: &[u8]) -> Result<()> {
        let (_, _, mut cursor) = full_atom(data)?;
        let entries = cursor.u32_be()?;
        if entries == 0 {
            return Ok(());
        }

        // only the first entry is looked at
        let rest = cursor.rest();
        let mut reader = Cursor::new(rest);
        let entry = Atom::parse(&mut reader, rest.len() as u64, 0)?;
        let data = entry.read(&mut reader)?;

        self.codec = entry.name.to_key();
        if entry.name != Fourcc::MP4A && entry.name != Fourcc::ALAC {
            return Ok(());
        }

        let mut cursor = ByteCursor::new(&data);
        cursor.skip(6 + 2 + 8)?; // reserved, data reference index, reserved
        self.channels = cursor.u16_be()?.into();
        self.bits_per_sample = cursor.u16_be()?.into();
        cursor.skip(4)?; // pre-defined, reserved
        // 16.16 fixed point, the fraction is unused
        self.sample_rate = cursor.u32_be()? >> 16;
        debug_assert_eq!(cursor.position(), AUDIO_SAMPLE_ENTRY_SIZE);

        let extra = cursor.rest();
        if extra.is_empty() {
            return Ok(());
        }
        let mut extra_reader = Cursor::new(extra);
        let extra = Atom::parse(&mut extra_reader, extra.len() as u64, 0)?;
        let payload = extra.read(&mut extra_reader)?;
        match (entry.name, extra.name) {
            (Fourcc::MP4A, Fourcc::ESDS) => self.parse_esds(&payload),
            (Fourcc::ALAC, Fourcc::ALAC) => self.parse_alac(&payload),
            _ => Ok(()),
        }
    }

    fn parse_esds(&mut self, data: &[u8]) -> Result<()> {
        let (version, _, mut cursor) = full_atom(data)?;
        if version != 0 {
            tracing::warn!(version, "unsupported esds version, bitrate unknown");
            return Ok(());
        }

        let tag = cursor.u8()?;
        if tag != ES_DESCR_TAG {
            return Err(Mp4Error::StreamInfo(format!("unexpected descriptor: {}", tag)));
        }
        descriptor_length(&mut cursor)?;
        cursor.skip(2)?; // ES_ID
        let es_flags = cursor.u8()?;
        if es_flags & 0x80 != 0 {
            cursor.skip(2)?; // dependsOn_ES_ID
        }
        if es_flags & 0x40 != 0 {
            let url_len = cursor.u8()?;
            cursor.skip(url_len.into())?;
        }
        if es_flags & 0x20 != 0 {
            cursor.skip(2)?; // OCR_ES_Id
        }

        let tag = cursor.u8()?;
        if tag != DECODER_CONFIG_DESCR_TAG {
            return Err(Mp4Error::StreamInfo(format!(
                "unexpected DecoderConfigDescrTag {}",
                tag
            )));
        }
        descriptor_length(&mut cursor)?;
        let object_type = cursor.u8()?;
        self.codec = format!("mp4a.{:X}", object_type);
        cursor.skip(1 + 3 + 4)?; // stream type, buffer size, max bitrate
        self.bitrate = cursor.u32_be()?;
        Ok(())
    }

    /// ALAC magic cookie. Some encoders leave the sample entry at defaults
    /// and only fill in the cookie, so it wins.
    fn parse_alac(&mut self, data: &[u8]) -> Result<()> {
        let (version, _, mut cursor) = full_atom(data)?;
        if version != 0 {
            tracing::warn!(version, "unsupported alac version, using sample entry");
            return Ok(());
        }
        let cookie = cursor.rest();
        let mut cursor = ByteCursor::at(cookie, 5);
        self.bits_per_sample = cursor.u8()?.into();
        cursor.skip(3)?;
        self.channels = cursor.u8()?.into();
        cursor.skip(6)?;
        self.bitrate = cursor.u32_be()?;
        self.sample_rate = cursor.u32_be()?;
        Ok(())
    }

    /// One line summary
    pub fn pprint(&self) -> String {
        let codec = if self.codec.is_empty() {
            String::new()
        } else {
            format!(" ({})", self.codec)
        };
        format!(
            "MPEG-4 audio{}, {:.2} seconds, {} bps",
            codec, self.length, self.bitrate
        )
    }
}

/// Expandable descriptor length, up to four 7-bit groups.
fn descriptor_length(cursor: &mut ByteCursor<'_>) -> Result<u32> {
    let mut value = 0u32;
    for _ in 0..4 {
        let b = cursor.u8()?;
        value = (value << 7) | u32::from(b & 0x7F);
        if b & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(Mp4Error::StreamInfo("invalid descriptor length".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        Atom::render(Fourcc(*name), payload).unwrap()
    }

    fn mdhd_v1() -> Vec<u8> {
        let mut data = vec![1, 0, 0, 0];
        data.extend_from_slice(&[0; 16]); // creation, modification
        data.extend_from_slice(&2u32.to_be_bytes()); // 2 Hz
        data.extend_from_slice(&16u64.to_be_bytes());
        render(b"mdhd", &data)
    }

    fn hdlr(kind: &[u8; 4]) -> Vec<u8> {
        render(b"hdlr", &[&[0u8; 8][..], kind].concat())
    }

    fn load(moov_payload: &[u8]) -> Result<Mp4Info> {
        let data = render(b"moov", moov_payload);
        let mut cursor = Cursor::new(data);
        let atoms = Atoms::load(&mut cursor).unwrap();
        Mp4Info::load(&atoms, &mut cursor)
    }

    fn sample_entry(name: &[u8; 4], extra: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; 16];
        data.extend_from_slice(&2u16.to_be_bytes()); // channels
        data.extend_from_slice(&16u16.to_be_bytes()); // sample size
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(&(44100u32 << 16).to_be_bytes());
        data.extend_from_slice(extra);
        render(name, &data)
    }

    fn stsd(entry: &[u8]) -> Vec<u8> {
        let mut data = vec![0, 0, 0, 0, 0, 0, 0, 1];
        data.extend_from_slice(entry);
        render(b"stsd", &data)
    }

    fn audio_trak(stsd: &[u8]) -> Vec<u8> {
        let stbl = render(b"stbl", stsd);
        let minf = render(b"minf", &stbl);
        render(b"trak", &render(b"mdia", &[mdhd_v1(), hdlr(b"soun"), minf].concat()))
    }

    #[test]
    fn test_mdhd_version_1() {
        let mdia = render(b"mdia", &[mdhd_v1(), hdlr(b"soun")].concat());
        let info = load(&render(b"trak", &mdia)).unwrap();
        assert_eq!(info.length, 8.0);
        assert_eq!(info.codec, "");
    }

    #[test]
    fn test_mdhd_version_0() {
        let mut data = vec![0u8; 12];
        data.extend_from_slice(&44100u32.to_be_bytes());
        data.extend_from_slice(&(44100u32 * 3).to_be_bytes());
        let mdia = render(b"mdia", &[render(b"mdhd", &data), hdlr(b"soun")].concat());
        let info = load(&render(b"trak", &mdia)).unwrap();
        assert_eq!(info.length, 3.0);
    }

    #[test]
    fn test_unknown_mdhd_version() {
        let mut data = vec![2u8, 0, 0, 0];
        data.extend_from_slice(&[0xFF; 32]);
        let mdia = render(b"mdia", &[render(b"mdhd", &data), hdlr(b"soun")].concat());
        let info = load(&render(b"trak", &mdia)).unwrap();
        assert_eq!(info.length, 0.0);
    }

    #[test]
    fn test_no_soun() {
        let mdia = render(b"mdia", &[mdhd_v1(), hdlr(b"vide")].concat());
        assert!(matches!(
            load(&render(b"trak", &mdia)),
            Err(Mp4Error::StreamInfo(_))
        ));
    }

    #[test]
    fn test_multiple_tracks() {
        let video = render(b"trak", &render(b"mdia", &hdlr(b"whee")));
        let audio = render(b"trak", &render(b"mdia", &[mdhd_v1(), hdlr(b"soun")].concat()));
        let info = load(&[video, audio].concat()).unwrap();
        assert_eq!(info.length, 8.0);
    }

    #[test]
    fn test_mp4a_esds() {
        let mut esds = vec![0, 0, 0, 0]; // version, flags
        esds.extend_from_slice(&[0x03, 0x80, 0x80, 0x80, 0x22]); // ES_Descr, padded length
        esds.extend_from_slice(&[0x00, 0x01, 0x00]); // ES_ID, flags
        esds.extend_from_slice(&[0x04, 0x14]); // DecoderConfigDescr
        esds.push(0x40); // object type
        esds.push(0x15); // stream type
        esds.extend_from_slice(&[0, 0, 0]); // buffer size
        esds.extend_from_slice(&128_000u32.to_be_bytes()); // max bitrate
        esds.extend_from_slice(&96_000u32.to_be_bytes()); // avg bitrate
        let entry = sample_entry(b"mp4a", &render(b"esds", &esds));
        let info = load(&audio_trak(&stsd(&entry))).unwrap();

        assert_eq!(info.codec, "mp4a.40");
        assert_eq!(info.bitrate, 96_000);
        assert_eq!(info.channels, 2);
        assert_eq!(info.bits_per_sample, 16);
        assert_eq!(info.sample_rate, 44100);
        assert_eq!(info.pprint(), "MPEG-4 audio (mp4a.40), 8.00 seconds, 96000 bps");
    }

    #[test]
    fn test_esds_url_flag() {
        let mut esds = vec![0, 0, 0, 0];
        esds.extend_from_slice(&[0x03, 0x20, 0x00, 0x01]);
        esds.push(0x40 | 0x80); // URL and dependency flags
        esds.extend_from_slice(&[0x00, 0x02]); // dependsOn_ES_ID
        esds.extend_from_slice(&[3, b'a', b'b', b'c']);
        esds.extend_from_slice(&[0x04, 0x11, 0x6B, 0x15, 0, 0, 0]);
        esds.extend_from_slice(&[0; 4]);
        esds.extend_from_slice(&320_000u32.to_be_bytes());
        let entry = sample_entry(b"mp4a", &render(b"esds", &esds));
        let info = load(&audio_trak(&stsd(&entry))).unwrap();
        assert_eq!(info.codec, "mp4a.6B");
        assert_eq!(info.bitrate, 320_000);
    }

    #[test]
    fn test_bad_esds() {
        let esds = vec![0, 0, 0, 0, 0x05, 0x00];
        let entry = sample_entry(b"mp4a", &render(b"esds", &esds));
        assert!(matches!(
            load(&audio_trak(&stsd(&entry))),
            Err(Mp4Error::StreamInfo(_))
        ));

        // version 1 is skipped
        let esds = vec![1, 0, 0, 0, 0x05, 0x00];
        let entry = sample_entry(b"mp4a", &render(b"esds", &esds));
        let info = load(&audio_trak(&stsd(&entry))).unwrap();
        assert_eq!(info.codec, "mp4a");
        assert_eq!(info.bitrate, 0);
    }

    #[test]
    fn test_alac_cookie() {
        let mut cookie = vec![0, 0, 0, 0]; // version, flags
        cookie.extend_from_slice(&4096u32.to_be_bytes()); // frame length
        cookie.push(0); // compatible version
        cookie.push(24); // bit depth
        cookie.extend_from_slice(&[40, 10, 14]); // tuning
        cookie.push(1); // channels
        cookie.extend_from_slice(&[0, 255]); // max run
        cookie.extend_from_slice(&[0; 4]); // max frame bytes
        cookie.extend_from_slice(&1_000_000u32.to_be_bytes());
        cookie.extend_from_slice(&96_000u32.to_be_bytes());
        let entry = sample_entry(b"alac", &render(b"alac", &cookie));
        let info = load(&audio_trak(&stsd(&entry))).unwrap();
        assert_eq!(info.codec, "alac");
        assert_eq!(info.bits_per_sample, 24);
        assert_eq!(info.channels, 1);
        assert_eq!(info.bitrate, 1_000_000);
        assert_eq!(info.sample_rate, 96_000);
    }

    #[test]
    fn test_other_codec() {
        let entry = render(b"ac-3", &[0; 28]);
        let info = load(&audio_trak(&stsd(&entry))).unwrap();
        assert_eq!(info.codec, "ac-3");
        assert_eq!(info.channels, 0);
    }

    #[test]
    fn test_descriptor_length() {
        let data = [0x80, 0x80, 0x80, 0x22, 0x81, 0x01, 0x80, 0x80, 0x80, 0x80];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(descriptor_length(&mut cursor).unwrap(), 0x22);
        assert_eq!(descriptor_length(&mut cursor).unwrap(), 0x81);
        assert!(descriptor_length(&mut cursor).is_err());
    }
}
