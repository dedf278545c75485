//! OPUS configuration frame parsing.
//!
//! Hardware and platform OPUS encoders emit their codec-specific data as one
//! configuration buffer made of chained sections, each prefixed by a 64-bit
//! marker and a 64-bit little-endian length:
//!
//! ```text
//! 00000000  41 4f 50 55 53 48 44 52  13 00 00 00 00 00 00 00  |AOPUSHDR........|
//! 00000010  4f 70 75 73 48 65 61 64  01 02 38 01 80 bb 00 00  |OpusHead..8.....|
//! 00000020  00 00 00 41 4f 50 55 53  44 4c 59 08 00 00 00 00  |...AOPUSDLY.....|
//! 00000030  00 00 00 a0 2e 63 00 00  00 00 00 41 4f 50 55 53  |.....c.....AOPUS|
//! 00000040  50 52 4c 08 00 00 00 00  00 00 00 00 b4 c4 04 00  |PRL.............|
//! 00000050  00 00 00                                          |...|
//! ```
//!
//! - `AOPUSHDR`: identification header (`OpusHead`), becomes CSD-0
//! - `AOPUSDLY`: pre-skip in nanoseconds, becomes CSD-1
//! - `AOPUSPRL`: seek pre-roll in nanoseconds, becomes CSD-2
//!
//! The identification header is mandatory. The two trailing sections are
//! optional: when missing or cut short they fall back to an 8-byte zero
//! block instead of failing the parse, since decoders accept that default.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::OpusConfigError;

/// `"AOPUSHDR"` read as a little-endian u64.
pub const OPUS_AOPUSHDR: u64 = u64::from_le_bytes(*b"AOPUSHDR");
/// `"AOPUSDLY"` read as a little-endian u64.
pub const OPUS_AOPUSDLY: u64 = u64::from_le_bytes(*b"AOPUSDLY");
/// `"AOPUSPRL"` read as a little-endian u64.
pub const OPUS_AOPUSPRL: u64 = u64::from_le_bytes(*b"AOPUSPRL");

/// Default value for an absent CSD-1/CSD-2 section.
pub const EMPTY_CSD: [u8; 8] = [0; 8];

/// Largest section length accepted.
pub const MAX_SECTION_LEN: u64 = 0x7fff_fffe;

const SECTION_HEADER_LEN: usize = 16;
const MARKER_LEN: usize = 8;

/// Byte order used to read section markers and lengths.
///
/// Config frames produced by codecs are little endian; `Big` exists for
/// callers that hand over buffers in network order and mainly fails the
/// marker check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// Codec-specific data extracted from an OPUS configuration frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusCsd {
    /// Identification header (`OpusHead`).
    pub csd0: Bytes,
    /// Pre-skip block, or [`EMPTY_CSD`].
    pub csd1: Bytes,
    /// Seek pre-roll block, or [`EMPTY_CSD`].
    pub csd2: Bytes,
}

impl OpusCsd {
    pub fn new(csd0: impl Into<Bytes>, csd1: impl Into<Bytes>, csd2: impl Into<Bytes>) -> Self {
        Self {
            csd0: csd0.into(),
            csd1: csd1.into(),
            csd2: csd2.into(),
        }
    }

    fn with_defaults(csd0: Bytes, csd1: Option<Bytes>, csd2: Option<Bytes>) -> Self {
        let empty = || Bytes::from_static(&EMPTY_CSD);
        Self {
            csd0,
            csd1: csd1.unwrap_or_else(empty),
            csd2: csd2.unwrap_or_else(empty),
        }
    }

    /// Pre-skip in nanoseconds, if CSD-1 holds a 64-bit value.
    pub fn pre_skip_ns(&self) -> Option<u64> {
        read_u64_le(&self.csd1)
    }

    /// Seek pre-roll in nanoseconds, if CSD-2 holds a 64-bit value.
    pub fn seek_pre_roll_ns(&self) -> Option<u64> {
        read_u64_le(&self.csd2)
    }

    /// Parse CSD-0 as an RFC 7845 identification header.
    pub fn head(&self) -> Option<OpusHead> {
        OpusHead::parse(&self.csd0)
    }
}

fn read_u64_le(data: &[u8]) -> Option<u64> {
    let raw: [u8; 8] = data.get(..8)?.try_into().ok()?;
    Some(u64::from_le_bytes(raw))
}

/// Returns true when `data` starts with the `AOPUSHDR` marker.
///
/// The marker is always compared little endian, which is what codecs emit.
pub fn is_opus_config_frame(data: &[u8]) -> bool {
    if data.len() < SECTION_HEADER_LEN {
        return false;
    }
    read_u64_le(data) == Some(OPUS_AOPUSHDR)
}

/// Parse a little-endian OPUS configuration frame.
///
/// Returns `None` if `data` is not a config frame or the mandatory header
/// section is unusable. The reason is logged.
pub fn parse_config_frame(data: &[u8]) -> Option<OpusCsd> {
    parse_config_frame_with_order(data, ByteOrder::Little)
}

/// Like [`parse_config_frame`] with an explicit byte order for the section
/// markers and lengths.
pub fn parse_config_frame_with_order(data: &[u8], order: ByteOrder) -> Option<OpusCsd> {
    match try_parse_config_frame(data, order) {
        Ok(csd) => Some(csd),
        Err(OpusConfigError::NotConfigFrame) => None,
        Err(e) => {
            log::error!("OPUS config frame rejected: {}", e);
            None
        }
    }
}

/// Parse an OPUS configuration frame, reporting why it was rejected.
pub fn try_parse_config_frame(data: &[u8], order: ByteOrder) -> Result<OpusCsd, OpusConfigError> {
    if !is_opus_config_frame(data) {
        return Err(OpusConfigError::NotConfigFrame);
    }
    let mut buf = data;

    let id = get_u64(&mut buf, order);
    if id != OPUS_AOPUSHDR {
        return Err(OpusConfigError::NotConfigFrame);
    }
    let header_len = section_len(get_u64(&mut buf, order), "AOPUSHDR")?;
    if buf.remaining() < header_len {
        return Err(OpusConfigError::Truncated {
            section: "AOPUSHDR",
            needed: header_len,
            remaining: buf.remaining(),
        });
    }
    if header_len == 0 {
        return Err(OpusConfigError::EmptyHeader);
    }
    let csd0 = buf.copy_to_bytes(header_len);

    let csd1 = match optional_section(&mut buf, order, OPUS_AOPUSDLY, "AOPUSDLY")? {
        Section::Present(bytes) => Some(bytes),
        Section::Absent => None,
        Section::Truncated => return Ok(OpusCsd::with_defaults(csd0, None, None)),
    };

    let csd2 = match optional_section(&mut buf, order, OPUS_AOPUSPRL, "AOPUSPRL")? {
        Section::Present(bytes) => Some(bytes),
        Section::Absent => None,
        Section::Truncated => return Ok(OpusCsd::with_defaults(csd0, csd1, None)),
    };

    if buf.has_remaining() {
        log::debug!("{} trailing bytes after OPUS config sections", buf.remaining());
    }
    Ok(OpusCsd::with_defaults(csd0, csd1, csd2))
}

enum Section {
    Present(Bytes),
    Absent,
    Truncated,
}

/// Reads the next section if its marker matches `marker`; otherwise leaves
/// `buf` untouched.
fn optional_section(
    buf: &mut &[u8],
    order: ByteOrder,
    marker: u64,
    name: &'static str,
) -> Result<Section, OpusConfigError> {
    if buf.remaining() < MARKER_LEN {
        return Ok(Section::Absent);
    }
    let mut peek = &buf[..MARKER_LEN];
    if get_u64(&mut peek, order) != marker {
        return Ok(Section::Absent);
    }
    if buf.remaining() < SECTION_HEADER_LEN {
        log::error!("Not enough data in OPUS {} (missing length)", name);
        return Ok(Section::Truncated);
    }
    buf.advance(MARKER_LEN);
    let len = section_len(get_u64(buf, order), name)?;
    if buf.remaining() < len {
        log::error!("Not enough data in OPUS {} (invalid size: {})", name, len);
        return Ok(Section::Truncated);
    }
    Ok(Section::Present(buf.copy_to_bytes(len)))
}

fn get_u64(buf: &mut &[u8], order: ByteOrder) -> u64 {
    match order {
        ByteOrder::Little => buf.get_u64_le(),
        ByteOrder::Big => buf.get_u64(),
    }
}

fn section_len(raw: u64, section: &'static str) -> Result<usize, OpusConfigError> {
    if raw > MAX_SECTION_LEN {
        return Err(OpusConfigError::InvalidLength {
            section,
            length: raw,
        });
    }
    Ok(raw as usize)
}

/// Serialize `csd` as a little-endian configuration frame carrying all three
/// sections.
pub fn build_config_frame(csd: &OpusCsd) -> Bytes {
    let sections = [
        (OPUS_AOPUSHDR, &csd.csd0),
        (OPUS_AOPUSDLY, &csd.csd1),
        (OPUS_AOPUSPRL, &csd.csd2),
    ];
    let total: usize = sections
        .iter()
        .map(|(_, data)| SECTION_HEADER_LEN + data.len())
        .sum();
    let mut out = BytesMut::with_capacity(total);
    for (marker, data) in sections {
        out.put_u64_le(marker);
        out.put_u64_le(data.len() as u64);
        out.put_slice(data);
    }
    out.freeze()
}

// ======================== Identification header ========================

const OPUS_HEAD_MAGIC: &[u8; 8] = b"OpusHead";
const OPUS_HEAD_LEN: usize = 19;

/// RFC 7845 identification header (CSD-0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusHead {
    pub version: u8,
    pub channel_count: u8,
    /// Samples at 48 kHz to discard at the start of playback.
    pub pre_skip: u16,
    /// Sample rate of the original input; not the playback rate.
    pub input_sample_rate: u32,
    /// Q7.8 dB gain applied when decoding.
    pub output_gain: i16,
    pub mapping_family: u8,
    /// Channel mapping table, present only for mapping family != 0.
    pub mapping_table: Vec<u8>,
}

impl OpusHead {
    /// Header for a plain mono/stereo stream (mapping family 0).
    pub fn new(channel_count: u8, pre_skip: u16, input_sample_rate: u32) -> Self {
        Self {
            version: 1,
            channel_count,
            pre_skip,
            input_sample_rate,
            output_gain: 0,
            mapping_family: 0,
            mapping_table: Vec::new(),
        }
    }

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < OPUS_HEAD_LEN || &data[..8] != OPUS_HEAD_MAGIC {
            return None;
        }
        let mut buf = &data[8..];
        let version = buf.get_u8();
        let channel_count = buf.get_u8();
        if channel_count == 0 {
            return None;
        }
        let pre_skip = buf.get_u16_le();
        let input_sample_rate = buf.get_u32_le();
        let output_gain = buf.get_i16_le();
        let mapping_family = buf.get_u8();
        Some(Self {
            version,
            channel_count,
            pre_skip,
            input_sample_rate,
            output_gain,
            mapping_family,
            mapping_table: buf.to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(OPUS_HEAD_LEN + self.mapping_table.len());
        out.put_slice(OPUS_HEAD_MAGIC);
        out.put_u8(self.version);
        out.put_u8(self.channel_count);
        out.put_u16_le(self.pre_skip);
        out.put_u32_le(self.input_sample_rate);
        out.put_i16_le(self.output_gain);
        out.put_u8(self.mapping_family);
        out.put_slice(&self.mapping_table);
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Config packet captured from a platform OPUS encoder.
    const CAPTURED: [u8; 83] = [
        0x41, 0x4f, 0x50, 0x55, 0x53, 0x48, 0x44, 0x52, 0x13, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x4f, 0x70, 0x75, 0x73, 0x48, 0x65, 0x61, 0x64, 0x01, 0x02, 0x38, 0x01, 0x80, 0xbb,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x41, 0x4f, 0x50, 0x55, 0x53, 0x44, 0x4c, 0x59, 0x08, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xa0, 0x2e, 0x63, 0x00, 0x00, 0x00, 0x00, 0x00, 0x41,
        0x4f, 0x50, 0x55, 0x53, 0x50, 0x52, 0x4c, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0xb4, 0xc4, 0x04, 0x00, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn parses_captured_packet() {
        let csd = parse_config_frame(&CAPTURED).unwrap();
        assert_eq!(csd.csd0.len(), 19);
        assert_eq!(csd.pre_skip_ns(), Some(6_500_000));
        assert_eq!(csd.seek_pre_roll_ns(), Some(80_000_000));

        let head = csd.head().unwrap();
        assert_eq!(head.version, 1);
        assert_eq!(head.channel_count, 2);
        assert_eq!(head.pre_skip, 312);
        assert_eq!(head.input_sample_rate, 48000);
        assert_eq!(head.output_gain, 0);
        assert_eq!(head.mapping_family, 0);
    }

    #[test]
    fn builder_reproduces_captured_packet() {
        let csd = parse_config_frame(&CAPTURED).unwrap();
        assert_eq!(&build_config_frame(&csd)[..], &CAPTURED[..]);
    }

    #[test]
    fn big_endian_order_fails_marker_check() {
        assert!(parse_config_frame_with_order(&CAPTURED, ByteOrder::Big).is_none());
    }

    #[test]
    fn prl_without_dly_is_picked_up() {
        let mut data = CAPTURED[..35].to_vec();
        data.extend_from_slice(&CAPTURED[59..]);
        let csd = parse_config_frame(&data).unwrap();
        assert_eq!(&csd.csd1[..], &EMPTY_CSD);
        assert_eq!(csd.seek_pre_roll_ns(), Some(80_000_000));
    }

    #[test]
    fn opus_head_round_trip() {
        let head = OpusHead::new(1, 312, 16000);
        let bytes = head.to_bytes();
        assert_eq!(bytes.len(), 19);
        assert_eq!(OpusHead::parse(&bytes), Some(head));
    }
}
