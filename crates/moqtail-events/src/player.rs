use std::time::Duration;

use web_time::Instant;

/// Playback statistic reported by the player or its decode worker.
#[derive(Clone, Debug, PartialEq)]
pub enum Stat {
    /// End-to-end latency of the last rendered frame.
    Latency { seconds: f64 },
    /// Filtered throughput sample.
    MeasuredBandwidth { kbps: f64 },
    /// Render stall in progress. `since` is the last frame display time.
    Stall { since: Instant, duration: Duration },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SkipKind {
    /// An arriving segment was older than the one playing and was dropped.
    TooOld,
    /// The playing segment was abandoned for a newer one.
    TooSlow,
}

impl SkipKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TooOld => "too_old",
            Self::TooSlow => "too_slow",
        }
    }
}

/// A group on a given track.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct GroupRef {
    pub track: String,
    pub sequence: u64,
}

/// Segment dropped by the timeline arbitrator.
#[derive(Clone, Debug, PartialEq)]
pub struct SkipEvent {
    pub kind: SkipKind,
    pub skipped: GroupRef,
    pub current: GroupRef,
    /// Seconds of decoded media the playing segment trails the furthest one.
    pub duration: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PlayerEvent {
    Stat(Stat),
    Skip(SkipEvent),
    /// The rendered video track changed.
    TrackChange { track: String },
    /// Terminal. Published once when the session ends.
    Closed { error: Option<String> },
}

impl From<Stat> for PlayerEvent {
    fn from(s: Stat) -> Self {
        Self::Stat(s)
    }
}

impl From<SkipEvent> for PlayerEvent {
    fn from(s: SkipEvent) -> Self {
        Self::Skip(s)
    }
}
