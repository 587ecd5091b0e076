//! CMAF fragments and catalog entries.

use bytes::{Bytes, BytesMut};
use moqtail_media::{
    AudioParams, Track, TrackKind, VideoParams,
    mp4::{FTYP, MDAT, MOOF, MOOV, Prft, ms_to_ntp, write_box},
};
use web_time::{SystemTime, UNIX_EPOCH};

pub fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// `ftyp` followed by a `moov` carrying the codec string.
pub fn init_segment(codec: &str) -> Bytes {
    let mut out = BytesMut::new();
    write_box(FTYP, b"iso6cmfc", &mut out);
    write_box(MOOV, codec.as_bytes(), &mut out);
    out.freeze()
}

/// `prft` + `moof` + `mdat` fragment produced at `unix_ms`.
pub fn media_segment(unix_ms: u64, sequence: u64, payload_len: usize) -> Bytes {
    let mut out = BytesMut::new();
    Prft {
        version: 1,
        reference_track_id: 1,
        ntp_timestamp: ms_to_ntp(unix_ms),
        media_time: sequence * 90_000,
        ..Default::default()
    }
    .write(&mut out);
    write_box(MOOF, &sequence.to_be_bytes(), &mut out);
    write_box(MDAT, &vec![0; payload_len], &mut out);
    out.freeze()
}

/// Video rendition named `name`, with init track `{name}-init`.
pub fn video_track(name: &str, bit_rate: u64, height: u32) -> Track {
    Track {
        container: "mp4".into(),
        init_track: format!("{name}-init"),
        data_track: name.into(),
        codec: "avc1.42e01e".into(),
        bit_rate: Some(bit_rate),
        kind: TrackKind::Video(VideoParams {
            width: height * 16 / 9,
            height,
            frame_rate: Some(30.0),
        }),
    }
}

pub fn audio_track(name: &str) -> Track {
    Track {
        container: "mp4".into(),
        init_track: format!("{name}-init"),
        data_track: name.into(),
        codec: "mp4a.40.2".into(),
        bit_rate: Some(128_000),
        kind: TrackKind::Audio(AudioParams {
            channel_count: 2,
            sample_rate: 48_000,
            sample_size: 16,
        }),
    }
}
