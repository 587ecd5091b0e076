//! Decode worker: turns segments into frames and paces them out.
//!
//! The worker runs in its own tasks and talks to the player only through
//! commands in and [`RendererEvent`]s out. Each media kind has its own
//! [`Timeline`]; video frames are paced at the configured frame rate and
//! drive latency, stall and track-change reporting.

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use moqtail_events::{SkipEvent, Stat};
use moqtail_media::{Track, mp4};
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
use parking_lot::Mutex;
use tokio::{io::AsyncReadExt, sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use web_time::{Instant, SystemTime, UNIX_EPOCH};

use crate::{
    config::RendererOptions,
    error::DecodeError,
    stall::StallDetector,
    timeline::{Pulled, Timeline, TimelineSegment},
    types::{Frame, MediaKind, Segment},
};

/// Codec backend.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
pub trait FrameDecoder: Send + Sync + 'static {
    /// Decode one complete media segment against its init segment.
    fn decode(&self, kind: MediaKind, init: &[u8], segment: &[u8])
    -> Result<Vec<Frame>, DecodeError>;
}

/// Presentation backend.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
pub trait FrameSink: Send + Sync + 'static {
    fn render_video(&self, frame: &Frame);
    fn play_audio(&self, frame: &Frame);
}

#[derive(Debug)]
enum Command {
    Init { name: String, data: Bytes },
    Segment(Segment),
    SetVideoTrack(Track),
    SetServerTimeOffset(f64),
}

/// Reported by the decode worker.
#[derive(Clone, Debug, PartialEq)]
pub enum RendererEvent {
    Stat(Stat),
    Skip(SkipEvent),
    /// Data track of the video now on screen.
    TrackId(String),
    /// Fatal decode failure.
    Error(DecodeError),
}

type Events = mpsc::UnboundedSender<RendererEvent>;

#[derive(Default)]
struct Shared {
    /// Data track of the selected video rendition.
    video_track: Option<String>,
    /// Milliseconds the server clock runs ahead of ours.
    server_time_offset: f64,
}

/// Handle to a running decode worker.
#[derive(Clone)]
pub struct Renderer {
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
}

impl Renderer {
    /// Start the worker. Must be called inside a tokio runtime.
    pub fn spawn(
        decoder: Arc<dyn FrameDecoder>,
        sink: Arc<dyn FrameSink>,
        options: &RendererOptions,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<RendererEvent>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared::default()));

        let (video_tx, video) = Timeline::channel(options.lookahead);
        let (audio_tx, audio) = Timeline::channel(options.lookahead);

        let worker = Worker {
            decoder,
            inits: HashMap::new(),
            shared: Arc::clone(&shared),
            video: video_tx,
            audio: audio_tx,
            events: events.clone(),
            decodes: JoinSet::new(),
            frame_capacity: options.frame_capacity.max(1),
        };
        tokio::spawn(worker.run(command_rx, cancel.clone()));

        let video = VideoOutput {
            timeline: video,
            sink: Arc::clone(&sink),
            shared,
            events: events.clone(),
            frame_interval: frame_interval(options.frame_rate),
            stall: StallDetector::new(options.stall_window),
            stall_check: options.stall_check_interval,
            last_track: None,
            anchor: None,
        };
        tokio::spawn(video.run(cancel.clone()));
        tokio::spawn(run_audio(audio, sink, events, cancel.clone()));

        (Self { commands, cancel }, event_rx)
    }

    /// Register an init segment under its track name.
    pub fn init(&self, name: &str, data: Bytes) {
        self.send(Command::Init {
            name: name.to_string(),
            data,
        });
    }

    pub fn segment(&self, segment: Segment) {
        self.send(Command::Segment(segment));
    }

    pub fn set_video_track(&self, track: Track) {
        self.send(Command::SetVideoTrack(track));
    }

    pub fn set_server_time_offset(&self, offset_ms: f64) {
        self.send(Command::SetServerTimeOffset(offset_ms));
    }

    /// Stop every worker task. Pending segments are dropped.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            trace!("renderer gone, command dropped");
        }
    }
}

fn frame_interval(frame_rate: f64) -> Duration {
    if frame_rate > 0.0 {
        Duration::from_secs_f64(1.0 / frame_rate)
    } else {
        Duration::ZERO
    }
}

struct Worker {
    decoder: Arc<dyn FrameDecoder>,
    inits: HashMap<String, Bytes>,
    shared: Arc<Mutex<Shared>>,
    video: mpsc::Sender<TimelineSegment>,
    audio: mpsc::Sender<TimelineSegment>,
    events: Events,
    decodes: JoinSet<()>,
    frame_capacity: usize,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(joined) = self.decodes.join_next() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "decode task failed");
                    }
                }
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    self.on_command(command, &cancel).await;
                }
            }
        }
        self.decodes.shutdown().await;
        debug!("decode worker stopped");
    }

    async fn on_command(&mut self, command: Command, cancel: &CancellationToken) {
        match command {
            Command::Init { name, data } => {
                debug!(%name, bytes = data.len(), "init segment registered");
                self.inits.insert(name, data);
            }
            Command::Segment(segment) => self.on_segment(segment, cancel).await,
            Command::SetVideoTrack(track) => {
                debug!(track = %track.data_track, "video track set");
                self.shared.lock().video_track = Some(track.data_track);
            }
            Command::SetServerTimeOffset(offset) => {
                debug!(offset_ms = offset, "server time offset set");
                self.shared.lock().server_time_offset = offset;
            }
        }
    }

    async fn on_segment(&mut self, segment: Segment, cancel: &CancellationToken) {
        if segment.header.object != 0 {
            let _ = self
                .events
                .send(RendererEvent::Error(DecodeError::MultipleObjects(segment.header.object)));
            return;
        }
        let Some(init) = self.inits.get(&segment.init).cloned() else {
            let err = DecodeError::UnknownInit(segment.init.clone());
            warn!(error = %err, group = segment.header.group, "segment dropped");
            return;
        };

        let timeline = match segment.kind {
            MediaKind::Video => {
                let current = self.shared.lock().video_track.clone();
                if current.is_some_and(|t| t != segment.data) {
                    debug!(track = %segment.data, group = segment.header.group, "not the selected video track, skipping");
                    return;
                }
                &self.video
            }
            MediaKind::Audio => &self.audio,
        };

        let (frames_tx, frames_rx) = mpsc::channel(self.frame_capacity);
        let entry = TimelineSegment {
            track: segment.data.clone(),
            sequence: segment.header.group,
            frames: frames_rx,
        };
        tokio::select! {
            () = cancel.cancelled() => return,
            sent = timeline.send(entry) => if sent.is_err() {
                trace!("timeline closed, segment dropped");
                return;
            },
        }

        self.decodes.spawn(decode_segment(
            Arc::clone(&self.decoder),
            init,
            segment,
            frames_tx,
            self.events.clone(),
        ));
    }
}

/// Read the payload, decode it and feed the frames to the timeline.
async fn decode_segment(
    decoder: Arc<dyn FrameDecoder>,
    init: Bytes,
    mut segment: Segment,
    frames: mpsc::Sender<Frame>,
    events: Events,
) {
    let mut payload = Vec::new();
    let read = tokio::select! {
        // Timeline dropped the segment: stop downloading it.
        () = frames.closed() => {
            debug!(track = %segment.data, group = segment.header.group, "segment cancelled while reading");
            return;
        }
        read = segment.stream.read_to_end(&mut payload) => read,
    };
    if let Err(e) = read {
        // A torn object stream is a network problem, not a decode failure.
        warn!(track = %segment.data, group = segment.header.group, error = %e, "segment read failed");
        return;
    }

    let kind = segment.kind;
    let data = Bytes::from(payload);
    let decoded = tokio::task::spawn_blocking({
        let data = data.clone();
        move || decoder.decode(kind, &init, &data)
    })
    .await
    .unwrap_or_else(|e| Err(DecodeError::Backend(e.to_string())));

    let mut decoded = match decoded {
        Ok(frames) => frames,
        Err(e) => {
            warn!(track = %segment.data, group = segment.header.group, error = %e, "decode failed");
            let _ = events.send(RendererEvent::Error(e));
            return;
        }
    };

    if let Some(first) = decoded.first_mut().filter(|f| f.ntp.is_none()) {
        first.ntp = mp4::find_prft(&data).map(|p| p.ntp_timestamp);
    }
    trace!(track = %segment.data, group = segment.header.group, frames = decoded.len(), "segment decoded");

    for frame in decoded {
        if frames.send(frame).await.is_err() {
            debug!(track = %segment.data, group = segment.header.group, "segment cancelled");
            return;
        }
    }
}

/// Wall-clock production time of a presentation timestamp, derived from
/// the last frame that carried a producer reference time.
#[derive(Clone, Copy, Debug)]
struct Anchor {
    pts: f64,
    unix_ms: f64,
}

struct VideoOutput {
    timeline: Timeline,
    sink: Arc<dyn FrameSink>,
    shared: Arc<Mutex<Shared>>,
    events: Events,
    frame_interval: Duration,
    stall: StallDetector,
    stall_check: Duration,
    last_track: Option<String>,
    anchor: Option<Anchor>,
}

impl VideoOutput {
    async fn run(mut self, cancel: CancellationToken) {
        let mut stall_tick = tokio::time::interval(self.stall_check.max(Duration::from_millis(1)));
        stall_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut next_frame_at = tokio::time::Instant::now();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = stall_tick.tick() => {
                    if let Some(stat) = self.stall.check(Instant::now()) {
                        self.emit(RendererEvent::Stat(stat));
                    }
                }
                pulled = self.timeline.next() => match pulled {
                    None => break,
                    Some(Pulled::Skip(skip)) => self.emit(RendererEvent::Skip(skip)),
                    Some(Pulled::Frame(frame)) => {
                        tokio::time::sleep_until(next_frame_at).await;
                        next_frame_at = tokio::time::Instant::now() + self.frame_interval;
                        self.display(&frame);
                    }
                },
            }
        }
        debug!("video output stopped");
    }

    fn display(&mut self, frame: &Frame) {
        let (track, offset) = {
            let shared = self.shared.lock();
            (shared.video_track.clone(), shared.server_time_offset)
        };
        if let Some(track) = track.filter(|t| self.last_track.as_ref() != Some(t)) {
            debug!(%track, "video track on screen");
            self.last_track = Some(track.clone());
            self.anchor = None;
            self.emit(RendererEvent::TrackId(track));
        }

        if let Some(ntp) = frame.ntp {
            self.anchor = Some(Anchor {
                pts: frame.timestamp,
                unix_ms: mp4::ntp_to_ms(ntp),
            });
        }
        if let Some(anchor) = self.anchor {
            let produced_ms = anchor.unix_ms + (frame.timestamp - anchor.pts) * 1000.0 - offset;
            let seconds = (unix_now_ms() - produced_ms) / 1000.0;
            self.emit(RendererEvent::Stat(Stat::Latency { seconds }));
        }

        self.sink.render_video(frame);
        self.stall.on_display(Instant::now());
    }

    fn emit(&self, event: RendererEvent) {
        let _ = self.events.send(event);
    }
}

async fn run_audio(mut timeline: Timeline, sink: Arc<dyn FrameSink>, events: Events, cancel: CancellationToken) {
    loop {
        let pulled = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            pulled = timeline.next() => pulled,
        };
        match pulled {
            None => break,
            Some(Pulled::Frame(frame)) => sink.play_audio(&frame),
            Some(Pulled::Skip(skip)) => {
                let _ = events.send(RendererEvent::Skip(skip));
            }
        }
    }
    debug!("audio output stopped");
}

fn unix_now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64() * 1000.0)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use moqtail_events::SkipKind;
    use moqtail_media::{TrackKind, VideoParams};
    use moqtail_transport::ObjectHeader;

    use super::*;

    fn track(data: &str) -> Track {
        Track {
            container: "mp4".into(),
            init_track: "init".into(),
            data_track: data.into(),
            codec: "avc1".into(),
            bit_rate: Some(1_000_000),
            kind: TrackKind::Video(VideoParams {
                width: 640,
                height: 360,
                frame_rate: Some(30.0),
            }),
        }
    }

    fn segment(data: &str, group: u64, object: u64, payload: Vec<u8>) -> Segment {
        Segment {
            init: "init".into(),
            data: data.into(),
            kind: MediaKind::Video,
            header: ObjectHeader {
                group,
                object,
                ntp_timestamp: Some(1),
                ..Default::default()
            },
            stream: Box::new(Cursor::new(payload)),
        }
    }

    fn frames(n: u32, ntp: Option<u64>) -> Vec<Frame> {
        (0..n)
            .map(|i| Frame {
                timestamp: f64::from(i) / 30.0,
                duration: 1.0 / 30.0,
                keyframe: i == 0,
                ntp: if i == 0 { ntp } else { None },
                data: Bytes::new(),
            })
            .collect()
    }

    fn video_sink(times: usize) -> MockFrameSink {
        let mut sink = MockFrameSink::new();
        sink.expect_render_video().times(times).return_const(());
        sink.expect_play_audio().never();
        sink
    }

    fn any_sink() -> MockFrameSink {
        let mut sink = MockFrameSink::new();
        sink.expect_render_video().return_const(());
        sink.expect_play_audio().return_const(());
        sink
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<RendererEvent>) -> RendererEvent {
        loop {
            match events.recv().await.unwrap() {
                RendererEvent::Stat(Stat::Stall { .. }) => {}
                event => return event,
            }
        }
    }

    #[tokio::test]
    async fn renders_frames_and_reports_track_and_latency() {
        let mut decoder = MockFrameDecoder::new();
        decoder
            .expect_decode()
            .withf(|kind, init, segment| *kind == MediaKind::Video && init == b"init-bytes" && segment == b"moof")
            .times(1)
            .returning(|_, _, _| Ok(frames(3, Some(mp4::ms_to_ntp(1_700_000_000_000)))));

        let (renderer, mut events) = Renderer::spawn(
            Arc::new(decoder),
            Arc::new(video_sink(3)),
            &RendererOptions::default().with_frame_rate(1000.0),
            CancellationToken::new(),
        );
        renderer.init("init", Bytes::from_static(b"init-bytes"));
        renderer.set_video_track(track("v-360"));
        renderer.segment(segment("v-360", 1, 0, b"moof".to_vec()));

        assert_eq!(next_event(&mut events).await, RendererEvent::TrackId("v-360".into()));
        for _ in 0..3 {
            let RendererEvent::Stat(Stat::Latency { seconds }) = next_event(&mut events).await else {
                panic!("expected latency");
            };
            assert!(seconds > 0.0);
        }
        renderer.close();
    }

    #[tokio::test]
    async fn other_video_tracks_are_ignored() {
        let mut decoder = MockFrameDecoder::new();
        decoder.expect_decode().never();
        let (renderer, mut events) = Renderer::spawn(
            Arc::new(decoder),
            Arc::new(video_sink(0)),
            &RendererOptions::default(),
            CancellationToken::new(),
        );
        renderer.init("init", Bytes::new());
        renderer.set_video_track(track("v-720"));
        renderer.segment(segment("v-360", 1, 0, Vec::new()));

        let waited = tokio::time::timeout(Duration::from_millis(100), next_event(&mut events)).await;
        assert!(waited.is_err());
        renderer.close();
    }

    #[rstest::rstest]
    #[case::multiple_objects(1, Ok(Vec::new()), DecodeError::MultipleObjects(1))]
    #[case::backend(0, Err(DecodeError::Backend("bad sps".into())), DecodeError::Backend("bad sps".into()))]
    #[tokio::test]
    async fn failures_are_reported(
        #[case] object: u64,
        #[case] result: Result<Vec<Frame>, DecodeError>,
        #[case] expected: DecodeError,
    ) {
        let mut decoder = MockFrameDecoder::new();
        decoder.expect_decode().return_once(move |_, _, _| result);
        let (renderer, mut events) = Renderer::spawn(
            Arc::new(decoder),
            Arc::new(video_sink(0)),
            &RendererOptions::default(),
            CancellationToken::new(),
        );
        renderer.init("init", Bytes::new());
        renderer.segment(segment("v", 1, object, Vec::new()));
        assert_eq!(next_event(&mut events).await, RendererEvent::Error(expected));
        renderer.close();
    }

    #[tokio::test]
    async fn stalled_segment_is_skipped_for_newer_one() {
        let mut decoder = MockFrameDecoder::new();
        decoder.expect_decode().returning(|_, _, _| Ok(frames(1, None)));
        let (renderer, mut events) = Renderer::spawn(
            Arc::new(decoder),
            Arc::new(any_sink()),
            &RendererOptions::default(),
            CancellationToken::new(),
        );
        renderer.init("init", Bytes::new());

        // Group 1 never finishes arriving.
        let (_writer, reader) = tokio::io::duplex(64);
        let mut stalled = segment("v", 1, 0, Vec::new());
        stalled.stream = Box::new(reader);
        renderer.segment(stalled);
        renderer.segment(segment("v", 2, 0, b"moof".to_vec()));

        let RendererEvent::Skip(skip) = next_event(&mut events).await else {
            panic!("expected skip");
        };
        assert_eq!(skip.kind, SkipKind::TooSlow);
        assert_eq!((skip.skipped.sequence, skip.current.sequence), (1, 2));
        renderer.close();
    }
}
