//! Play a simulated live stream from an in-process relay.
//!
//! Three video renditions and one audio track are published at one group
//! per second. Decoding is stubbed; the log shows track changes, latency
//! and ABR decisions.
//!
//! ```
//! cargo run -p moqtail-play --example play [LATENCY_SECONDS]
//! ```

use std::{env::args, error::Error, sync::Arc, time::Duration};

use moqtail_abr::AbrOptions;
use moqtail_media::Catalog;
use moqtail_play::{DecodeError, Frame, FrameDecoder, FrameSink, MediaKind, Player, PlayerConfig};
use moqtail_test_utils::{FakeRelay, LiveTrack, audio_track, video_track};
use tracing::{info, metadata::LevelFilter, trace};
use tracing_subscriber::EnvFilter;

const GROUP: Duration = Duration::from_secs(1);

/// One frame per segment, sized after the payload.
struct NullDecoder;

impl FrameDecoder for NullDecoder {
    fn decode(&self, _kind: MediaKind, _init: &[u8], segment: &[u8]) -> Result<Vec<Frame>, DecodeError> {
        Ok(vec![Frame {
            duration: GROUP.as_secs_f64(),
            keyframe: true,
            data: segment.to_vec().into(),
            ..Default::default()
        }])
    }
}

struct LogSink;

impl FrameSink for LogSink {
    fn render_video(&self, frame: &Frame) {
        trace!(ts = frame.timestamp, bytes = frame.data.len(), "video frame");
    }

    fn play_audio(&self, frame: &Frame) {
        trace!(ts = frame.timestamp, bytes = frame.data.len(), "audio frame");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::default()
                .add_directive("moqtail_play=debug".parse()?)
                .add_directive("moqtail_transport=info".parse()?)
                .add_directive(LevelFilter::INFO.into()),
        )
        .with_line_number(false)
        .with_file(false)
        .init();

    let latency: f64 = args().nth(1).map_or(Ok(2.0), |s| s.parse())?;

    let catalog = Catalog::new(vec![
        video_track("360p", 800_000, 360),
        video_track("720p", 2_500_000, 720),
        video_track("1080p", 5_000_000, 1080),
        audio_track("audio"),
    ]);
    let mut relay = FakeRelay::builder("demo").catalog(&catalog);
    for track in catalog.tracks() {
        let bytes = track.bit_rate.unwrap_or(128_000) / 8;
        relay = relay.media(track, LiveTrack::new(GROUP, usize::try_from(bytes)?));
    }
    let relay = relay.spawn();

    let config = PlayerConfig::default()
        .with_namespace("demo".to_string())
        .with_group_duration(GROUP)
        .with_latency_target(Duration::from_secs_f64(latency))
        .with_switch_track_id(true)
        .with_abr(AbrOptions::default());
    let player = Player::create(config, relay.transport(), Arc::new(NullDecoder), Arc::new(LogSink)).await?;
    let mut events_rx = player.events();

    info!(latency = ?player.latency_target(), "Starting playback... (Press Ctrl+C to stop)");
    player.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, stopping...");
                player.close(None);
                break;
            }
            ev = events_rx.next() => {
                match ev {
                    Some(ev) => info!(?ev, missed = events_rx.missed()),
                    None => break,
                }
            }
            err = player.closed() => {
                if let Some(err) = err {
                    return Err(err.into());
                }
                break;
            }
        }
    }

    info!(stats = ?player.stats(), "Playback stopped");
    Ok(())
}
