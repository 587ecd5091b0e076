//! Top-level ISO BMFF box scanning for CMAF fragments.
//!
//! Only what the player needs without a full demuxer: walking top-level
//! boxes and reading the producer reference time (`prft`) a fragment starts
//! with.

use bytes::BufMut;

pub type FourCc = [u8; 4];

pub const FTYP: FourCc = *b"ftyp";
pub const MOOV: FourCc = *b"moov";
pub const PRFT: FourCc = *b"prft";
pub const MOOF: FourCc = *b"moof";
pub const MDAT: FourCc = *b"mdat";

/// Milliseconds between 1900-01-01 (NTP epoch) and 1970-01-01.
const NTP_EPOCH_OFFSET_MS: f64 = 2_208_988_800_000.0;
const TWO_POW_32: f64 = 4_294_967_296.0;

/// Convert a 64-bit NTP timestamp to Unix milliseconds.
#[expect(clippy::cast_precision_loss)] // sub-millisecond precision is irrelevant
pub fn ntp_to_ms(ntp: u64) -> f64 {
    let upper = (ntp >> 32) as f64;
    let lower = (ntp & 0xFFFF_FFFF) as f64;
    upper * 1000.0 + lower / TWO_POW_32 * 1000.0 - NTP_EPOCH_OFFSET_MS
}

/// Convert Unix milliseconds to a 64-bit NTP timestamp.
#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)] // callers pass post-1970 wall-clock times
pub fn ms_to_ntp(unix_ms: u64) -> u64 {
    let ntp_ms = unix_ms as f64 + NTP_EPOCH_OFFSET_MS;
    let secs = (ntp_ms / 1000.0).floor();
    let frac = ((ntp_ms - secs * 1000.0) / 1000.0 * TWO_POW_32) as u64;
    ((secs as u64) << 32) | (frac & 0xFFFF_FFFF)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoxHeader {
    /// Total box size including the header.
    pub size: u64,
    pub kind: FourCc,
    pub header_len: usize,
}

/// Parse a box header from the front of `data`.
///
/// `None` if fewer header bytes are available or the declared size is
/// smaller than the header itself. A zero size (box runs to end of file)
/// is reported as the length of `data`.
pub fn read_box_header(data: &[u8]) -> Option<BoxHeader> {
    let size32 = u32::from_be_bytes(data.get(0..4)?.try_into().ok()?);
    let kind: FourCc = data.get(4..8)?.try_into().ok()?;
    let (size, header_len) = match size32 {
        0 => (data.len() as u64, 8),
        1 => (u64::from_be_bytes(data.get(8..16)?.try_into().ok()?), 16),
        n => (u64::from(n), 8),
    };
    (size >= header_len as u64).then_some(BoxHeader {
        size,
        kind,
        header_len,
    })
}

/// A complete top-level box.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mp4Box<'a> {
    pub kind: FourCc,
    header_len: usize,
    bytes: &'a [u8],
}

impl<'a> Mp4Box<'a> {
    /// The whole box, header included.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[self.header_len..]
    }
}

/// Iterator over complete top-level boxes. Stops at the first truncated or
/// malformed box.
pub struct Boxes<'a> {
    data: &'a [u8],
}

impl<'a> Iterator for Boxes<'a> {
    type Item = Mp4Box<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let header = read_box_header(self.data)?;
        let size = usize::try_from(header.size).ok()?;
        if size > self.data.len() {
            return None;
        }
        let (bytes, rest) = self.data.split_at(size);
        self.data = rest;
        Some(Mp4Box {
            kind: header.kind,
            header_len: header.header_len,
            bytes,
        })
    }
}

pub fn boxes(data: &[u8]) -> Boxes<'_> {
    Boxes { data }
}

/// Append a box with a 32-bit size header.
pub fn write_box<B: BufMut>(kind: FourCc, payload: &[u8], out: &mut B) {
    let size = u32::try_from(payload.len() + 8).unwrap_or(u32::MAX);
    out.put_u32(size);
    out.put_slice(&kind);
    out.put_slice(payload);
}

/// Producer reference time box.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Prft {
    pub version: u8,
    pub flags: u32,
    pub reference_track_id: u32,
    pub ntp_timestamp: u64,
    pub media_time: u64,
}

impl Prft {
    /// Parse a `prft` payload (the bytes after the box header).
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let version = *payload.first()?;
        let flags = u32::from_be_bytes([0, *payload.get(1)?, *payload.get(2)?, *payload.get(3)?]);
        let reference_track_id = u32::from_be_bytes(payload.get(4..8)?.try_into().ok()?);
        let ntp_timestamp = u64::from_be_bytes(payload.get(8..16)?.try_into().ok()?);
        let media_time = if version == 0 {
            u64::from(u32::from_be_bytes(payload.get(16..20)?.try_into().ok()?))
        } else {
            u64::from_be_bytes(payload.get(16..24)?.try_into().ok()?)
        };
        Some(Self {
            version,
            flags,
            reference_track_id,
            ntp_timestamp,
            media_time,
        })
    }

    /// Wall-clock production time in Unix milliseconds.
    pub fn unix_ms(&self) -> f64 {
        ntp_to_ms(self.ntp_timestamp)
    }

    /// Append this as a complete `prft` box.
    pub fn write<B: BufMut>(&self, out: &mut B) {
        let mut payload = Vec::with_capacity(24);
        payload.put_u8(self.version);
        payload.put_uint(u64::from(self.flags & 0x00FF_FFFF), 3);
        payload.put_u32(self.reference_track_id);
        payload.put_u64(self.ntp_timestamp);
        if self.version == 0 {
            payload.put_u32(u32::try_from(self.media_time).unwrap_or(u32::MAX));
        } else {
            payload.put_u64(self.media_time);
        }
        write_box(PRFT, &payload, out);
    }
}

/// The first `prft` among the top-level boxes of `data`.
pub fn find_prft(data: &[u8]) -> Option<Prft> {
    boxes(data)
        .find(|b| b.kind == PRFT)
        .and_then(|b| Prft::parse(b.payload()))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn fragment(ntp: u64) -> Vec<u8> {
        let mut out = Vec::new();
        Prft {
            version: 1,
            reference_track_id: 1,
            ntp_timestamp: ntp,
            media_time: 90_000,
            ..Default::default()
        }
        .write(&mut out);
        write_box(MOOF, &[0; 16], &mut out);
        write_box(MDAT, &[7; 100], &mut out);
        out
    }

    #[test]
    fn ntp_epoch_maps_to_negative_offset() {
        assert!((ntp_to_ms(0) + NTP_EPOCH_OFFSET_MS).abs() < f64::EPSILON);
    }

    #[rstest]
    #[case::whole_second(1_700_000_000_000)]
    #[case::with_millis(1_700_000_000_250)]
    fn ntp_conversion_inverts(#[case] unix_ms: u64) {
        #[expect(clippy::cast_precision_loss)]
        let expected = unix_ms as f64;
        assert!((ntp_to_ms(ms_to_ntp(unix_ms)) - expected).abs() < 0.01);
    }

    #[test]
    fn scans_top_level_boxes() {
        let data = fragment(ms_to_ntp(1_700_000_000_000));
        let kinds: Vec<_> = boxes(&data).map(|b| b.kind).collect();
        assert_eq!(kinds, [PRFT, MOOF, MDAT]);
        assert_eq!(boxes(&data).last().map(|b| b.payload().len()), Some(100));
    }

    #[test]
    fn truncated_box_stops_iteration() {
        let data = fragment(1);
        let kinds: Vec<_> = boxes(&data[..data.len() - 1]).map(|b| b.kind).collect();
        assert_eq!(kinds, [PRFT, MOOF]);
    }

    #[test]
    fn prft_is_found_and_decoded() {
        let ntp = ms_to_ntp(1_700_000_000_500);
        let prft = find_prft(&fragment(ntp)).unwrap();
        assert_eq!(prft.ntp_timestamp, ntp);
        assert_eq!(prft.media_time, 90_000);
        assert!((prft.unix_ms() - 1_700_000_000_500.0).abs() < 0.01);
    }

    #[test]
    fn version_zero_prft_has_short_media_time() {
        let mut out = Vec::new();
        Prft {
            version: 0,
            ntp_timestamp: 5,
            media_time: 42,
            ..Default::default()
        }
        .write(&mut out);
        assert_eq!(out.len(), 8 + 20);
        assert_eq!(find_prft(&out).map(|p| p.media_time), Some(42));
    }

    #[rstest]
    #[case::short(&[0, 0, 0])]
    #[case::size_below_header(&[0, 0, 0, 4, b'm', b'o', b'o', b'f'])]
    fn malformed_headers(#[case] data: &[u8]) {
        assert_eq!(read_box_header(data), None);
    }

    #[test]
    fn large_size_header() {
        let mut data = vec![0, 0, 0, 1];
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&20u64.to_be_bytes());
        data.extend_from_slice(&[0; 4]);
        let header = read_box_header(&data).unwrap();
        assert_eq!((header.size, header.header_len), (20, 16));
        assert_eq!(boxes(&data).next().map(|b| b.payload().len()), Some(4));
    }
}
