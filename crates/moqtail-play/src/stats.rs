use std::time::Duration;

use moqtail_events::{SkipEvent, Stat};
use web_time::Instant;

/// Running playback statistics.
///
/// Stall reports repeat while a stall lasts, each carrying the full
/// duration so far. Only the latest report per stall counts; it is folded
/// into the total once a stall with a different start arrives.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlaybackStats {
    /// Seconds of media dropped by the timeline.
    pub total_skip_duration: f64,
    pub skips: u32,
    /// Last end-to-end latency, in seconds.
    pub latency: Option<f64>,
    /// Last throughput measurement, in kbit/s.
    pub measured_bandwidth: Option<f64>,
    /// Rendition switches requested by ABR.
    pub switches: u32,
    settled_stall: Duration,
    provisional_stall: Duration,
    stall_since: Option<Instant>,
}

impl PlaybackStats {
    /// Total stall time, including a stall still in progress.
    pub fn stall_duration(&self) -> Duration {
        self.settled_stall + self.provisional_stall
    }

    pub(crate) fn on_stat(&mut self, stat: &Stat) {
        match stat {
            Stat::Latency { seconds } => self.latency = Some(*seconds),
            Stat::MeasuredBandwidth { kbps } => self.measured_bandwidth = Some(*kbps),
            Stat::Stall { since, duration } => {
                if self.stall_since != Some(*since) {
                    self.stall_since = Some(*since);
                    self.settled_stall += self.provisional_stall;
                }
                self.provisional_stall = *duration;
            }
        }
    }

    pub(crate) fn on_skip(&mut self, skip: &SkipEvent) {
        self.skips += 1;
        self.total_skip_duration += skip.duration;
    }

    pub(crate) fn on_switch(&mut self) {
        self.switches += 1;
    }
}

#[cfg(test)]
mod tests {
    use moqtail_events::{GroupRef, SkipKind};

    use super::*;

    fn stall(since: Instant, ms: u64) -> Stat {
        Stat::Stall {
            since,
            duration: Duration::from_millis(ms),
        }
    }

    #[test]
    fn repeated_reports_of_one_stall_count_once() {
        let mut stats = PlaybackStats::default();
        let t0 = Instant::now();
        stats.on_stat(&stall(t0, 100));
        stats.on_stat(&stall(t0, 250));
        assert_eq!(stats.stall_duration(), Duration::from_millis(250));

        let t1 = t0 + Duration::from_secs(3);
        stats.on_stat(&stall(t1, 80));
        assert_eq!(stats.stall_duration(), Duration::from_millis(330));
    }

    #[test]
    fn skips_accumulate() {
        let mut stats = PlaybackStats::default();
        let group = |sequence| GroupRef {
            track: "v".into(),
            sequence,
        };
        for (seq, duration) in [(1, 0.25), (2, 0.5)] {
            stats.on_skip(&SkipEvent {
                kind: SkipKind::TooSlow,
                skipped: group(seq),
                current: group(seq + 1),
                duration,
            });
        }
        assert_eq!(stats.skips, 2);
        assert!((stats.total_skip_duration - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn keeps_last_latency_and_bandwidth() {
        let mut stats = PlaybackStats::default();
        stats.on_stat(&Stat::Latency { seconds: 1.5 });
        stats.on_stat(&Stat::MeasuredBandwidth { kbps: 900.0 });
        assert_eq!(stats.latency, Some(1.5));
        assert_eq!(stats.measured_bandwidth, Some(900.0));
    }
}
