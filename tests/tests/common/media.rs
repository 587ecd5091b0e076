use std::time::Duration;

use moqtail_media::{Catalog, mp4};
use moqtail_play::{DecodeError, Frame, FrameDecoder, FrameSink, MediaKind};
use moqtail_test_utils::{FakeRelay, LiveTrack, audio_track, video_track};
use parking_lot::Mutex;

pub const NAMESPACE: &str = "live";
pub const GROUP: Duration = Duration::from_millis(100);

/// Two video renditions and one audio track.
pub fn ladder() -> Catalog {
    Catalog::new(vec![
        video_track("v-low", 500_000, 360),
        video_track("v-high", 3_000_000, 720),
        audio_track("a"),
    ])
}

/// Relay serving `catalog` with a new group every [`GROUP`] on each track.
pub fn live_relay(catalog: &Catalog) -> FakeRelay {
    relay_with(catalog, LiveTrack::new(GROUP, 1024))
}

pub fn relay_with(catalog: &Catalog, live: LiveTrack) -> FakeRelay {
    let mut builder = FakeRelay::builder(NAMESPACE).catalog(catalog);
    for track in catalog.tracks() {
        builder = builder.media(track, live.clone());
    }
    builder.spawn()
}

/// One frame per segment, timestamped by the segment's `prft`.
pub struct GroupDecoder;

impl FrameDecoder for GroupDecoder {
    fn decode(&self, _kind: MediaKind, _init: &[u8], segment: &[u8]) -> Result<Vec<Frame>, DecodeError> {
        let prft = mp4::find_prft(segment).ok_or_else(|| DecodeError::Backend("no prft".into()))?;
        #[expect(clippy::cast_precision_loss)] // media time stays far below 2^52
        let timestamp = prft.media_time as f64 / 90_000.0;
        Ok(vec![Frame {
            timestamp,
            duration: GROUP.as_secs_f64(),
            keyframe: true,
            ntp: Some(prft.ntp_timestamp),
            data: segment.to_vec().into(),
        }])
    }
}

/// Remembers every presented frame.
#[derive(Default)]
pub struct RecordingSink {
    pub video: Mutex<Vec<f64>>,
    pub audio: Mutex<Vec<f64>>,
}

impl FrameSink for RecordingSink {
    fn render_video(&self, frame: &Frame) {
        self.video.lock().push(frame.timestamp);
    }

    fn play_audio(&self, frame: &Frame) {
        self.audio.lock().push(frame.timestamp);
    }
}
