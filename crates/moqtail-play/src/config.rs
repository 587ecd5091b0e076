use std::time::Duration;

use derive_setters::Setters;
use moqtail_abr::AbrOptions;
use moqtail_events::{DEFAULT_EVENT_CAPACITY, EventBus};
use moqtail_media::ThroughputOptions;
use moqtail_transport::SessionOptions;
use tokio_util::sync::CancellationToken;

/// Periodic bandwidth probing on `.probe:{size}:{priority}` tracks.
#[derive(Clone, Debug, Setters)]
#[setters(prefix = "with_")]
pub struct ProbeOptions {
    pub interval: Duration,
    /// Bytes requested per probe.
    pub size: u64,
    /// 0 is the lowest priority.
    pub priority: u8,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            size: 40_000,
            priority: 0,
        }
    }
}

impl ProbeOptions {
    pub fn track_name(&self) -> String {
        format!(".probe:{}:{}", self.size, self.priority)
    }
}

/// Decode worker tuning.
#[derive(Clone, Debug, Setters)]
#[setters(prefix = "with_")]
pub struct RendererOptions {
    /// Upper bound on rendered video frames per second.
    pub frame_rate: f64,
    /// Segments queued per timeline before the worker waits.
    pub lookahead: usize,
    /// Decoded frames buffered per segment.
    pub frame_capacity: usize,
    pub stall_check_interval: Duration,
    /// Display intervals averaged for stall detection.
    pub stall_window: usize,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            frame_rate: 30.0,
            lookahead: 100,
            frame_capacity: 256,
            stall_check_interval: Duration::from_millis(50),
            stall_window: 20,
        }
    }
}

/// Player configuration.
///
/// ```
/// use std::time::Duration;
///
/// use moqtail_play::{PlayerConfig, ProbeOptions};
///
/// let config = PlayerConfig::default()
///     .with_namespace("live".to_string())
///     .with_latency_target(Duration::from_secs(2))
///     .with_probe(ProbeOptions::default());
/// assert!(config.probe.is_some());
/// ```
#[derive(Clone, Debug, Setters)]
#[setters(prefix = "with_", strip_option)]
pub struct PlayerConfig {
    /// Namespace every track is requested under.
    pub namespace: String,
    /// Desired end-to-end latency. Rounded up to whole groups; zero plays
    /// at the live edge without buffering.
    pub latency_target: Duration,
    /// Media duration of one group.
    pub group_duration: Duration,
    /// Recheck interval while the current track buffer is empty.
    pub buffer_poll_interval: Duration,
    /// Recheck interval for a pending video track switch.
    pub switch_poll_interval: Duration,
    /// Consecutive failed reads after which a fetch loop gives up.
    pub max_failed_reads: u32,
    /// Send the current subscription id as `switch_track_id` when
    /// subscribing to a new rendition.
    pub switch_track_id: bool,
    /// Probe instead of metering data tracks.
    pub probe: Option<ProbeOptions>,
    /// Event bus capacity when no bus is supplied.
    pub event_capacity: usize,
    pub abr: AbrOptions,
    pub throughput: ThroughputOptions,
    pub session: SessionOptions,
    pub renderer: RendererOptions,
    /// Shared event bus. A fresh one is created when `None`.
    #[setters(rename = "with_events")]
    pub bus: Option<EventBus>,
    /// Cancels the player from outside.
    pub cancel: Option<CancellationToken>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            latency_target: Duration::from_secs(3),
            group_duration: Duration::from_millis(1000),
            buffer_poll_interval: Duration::from_millis(100),
            switch_poll_interval: Duration::from_millis(10),
            max_failed_reads: 10,
            switch_track_id: false,
            probe: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            abr: AbrOptions::default(),
            throughput: ThroughputOptions::default(),
            session: SessionOptions::default(),
            renderer: RendererOptions::default(),
            bus: None,
            cancel: None,
        }
    }
}
