use std::time::Duration;

use web_time::Instant;

/// ABR configuration.
///
/// Defaults reproduce the tuning the MOQ player ships with.
#[derive(Clone)]
pub struct AbrOptions {
    /// Whether automatic switching starts enabled.
    pub enabled: bool,
    /// Delay after the first throughput sample before any automated action.
    pub startup_delay: Duration,
    /// Skip events inside `congestion_window` that declare congestion.
    pub max_skip_count_for_congestion: usize,
    /// Window for counting skip events.
    pub congestion_window: Duration,
    /// Quiet period after a congestion event.
    pub cool_off: Duration,
    /// Quiet period after a bandwidth-driven switch.
    pub cool_off_after_switch: Duration,
    /// Throughput must exceed `bitrate * switch_up_multiplier` to count as high.
    pub switch_up_multiplier: f64,
    /// Throughput below `bitrate * switch_down_multiplier` counts as low.
    pub switch_down_multiplier: f64,
    /// Window for counting bandwidth signals.
    pub bw_signal_window: Duration,
    /// High-bandwidth signals inside the window needed to switch up.
    pub min_bw_high_events: usize,
    /// Low-bandwidth signals inside the window needed to switch down.
    pub min_bw_low_events: usize,
}

impl Default for AbrOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            startup_delay: Duration::from_millis(5000),
            max_skip_count_for_congestion: 5,
            congestion_window: Duration::from_millis(5000),
            cool_off: Duration::from_millis(15_000),
            cool_off_after_switch: Duration::from_millis(15_000),
            switch_up_multiplier: 2.3,
            switch_down_multiplier: 1.5,
            bw_signal_window: Duration::from_millis(5000),
            min_bw_high_events: 3,
            min_bw_low_events: 3,
        }
    }
}

impl std::fmt::Debug for AbrOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbrOptions")
            .field("enabled", &self.enabled)
            .field("startup_delay", &self.startup_delay)
            .field(
                "max_skip_count_for_congestion",
                &self.max_skip_count_for_congestion,
            )
            .field("congestion_window", &self.congestion_window)
            .field("cool_off", &self.cool_off)
            .field("cool_off_after_switch", &self.cool_off_after_switch)
            .field("switch_up_multiplier", &self.switch_up_multiplier)
            .field("switch_down_multiplier", &self.switch_down_multiplier)
            .field("bw_signal_window", &self.bw_signal_window)
            .field("min_bw_high_events", &self.min_bw_high_events)
            .field("min_bw_low_events", &self.min_bw_low_events)
            .finish()
    }
}

impl AbrOptions {
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    #[must_use]
    pub fn with_cool_off(mut self, after_congestion: Duration, after_switch: Duration) -> Self {
        self.cool_off = after_congestion;
        self.cool_off_after_switch = after_switch;
        self
    }

    /// Age beyond which recorded signals can no longer affect a decision.
    ///
    /// Twice the larger detection window.
    pub fn history_horizon(&self) -> Duration {
        self.bw_signal_window.max(self.congestion_window) * 2
    }
}

/// One selectable rendition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Variant {
    /// Data track name on the wire.
    pub track: String,
    /// Advertised bitrate in bits per second.
    pub bandwidth_bps: u64,
}

impl Variant {
    pub fn new(track: impl Into<String>, bandwidth_bps: u64) -> Self {
        Self {
            track: track.into(),
            bandwidth_bps,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignalKind {
    Skip,
    BandwidthHigh,
    BandwidthLow,
}

/// Entry of the ABR event history.
#[derive(Clone, Copy, Debug)]
pub struct AbrSignal {
    pub at: Instant,
    pub kind: SignalKind,
}
