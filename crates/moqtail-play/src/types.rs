use std::{fmt, io::Cursor};

use bytes::Bytes;
use moqtail_media::{Track, TrackKind};
use moqtail_transport::{ObjectHeader, RecvStream};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn of(track: &Track) -> Self {
        match track.kind {
            TrackKind::Video(_) => Self::Video,
            TrackKind::Audio(_) => Self::Audio,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One object handed to the decode worker. The payload may still be
/// arriving.
pub struct Segment {
    /// Init track the payload decodes against.
    pub init: String,
    /// Data track the object came from.
    pub data: String,
    pub kind: MediaKind,
    pub header: ObjectHeader,
    pub stream: RecvStream,
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("init", &self.init)
            .field("data", &self.data)
            .field("kind", &self.kind)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

/// A fully received object waiting in a track buffer.
#[derive(Clone, Debug)]
pub struct BufferedSegment {
    pub init: String,
    pub data: String,
    pub kind: MediaKind,
    pub header: ObjectHeader,
    pub payload: Bytes,
}

impl BufferedSegment {
    pub fn into_segment(self) -> Segment {
        Segment {
            init: self.init,
            data: self.data,
            kind: self.kind,
            header: self.header,
            stream: Box::new(Cursor::new(self.payload)),
        }
    }
}

/// `"{group} {object} {ntp}"`, used to tag throughput measurements.
pub(crate) fn segment_id(header: &ObjectHeader) -> String {
    format!(
        "{} {} {}",
        header.group,
        header.object,
        header.ntp_timestamp.unwrap_or_default()
    )
}

/// A decoded access unit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    /// Presentation time in seconds.
    pub timestamp: f64,
    /// Seconds.
    pub duration: f64,
    pub keyframe: bool,
    /// Producer reference time (64-bit NTP) attached to this frame.
    pub ntp: Option<u64>,
    pub data: Bytes,
}
