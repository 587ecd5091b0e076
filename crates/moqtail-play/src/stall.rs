use moqtail_abr::Swma;
use moqtail_events::Stat;
use web_time::Instant;

/// Flags render stalls from the spacing of displayed frames.
///
/// A stall is reported while the time since the last display exceeds twice
/// the recent average display interval.
pub struct StallDetector {
    intervals: Swma,
    last_display: Option<Instant>,
}

impl StallDetector {
    pub fn new(window: usize) -> Self {
        Self {
            intervals: Swma::new(window, "stall-diff"),
            last_display: None,
        }
    }

    pub fn on_display(&mut self, now: Instant) {
        if let Some(last) = self.last_display {
            let ms = now.saturating_duration_since(last).as_secs_f64() * 1000.0;
            self.intervals.next(Some(ms));
        }
        self.last_display = Some(now);
    }

    pub fn check(&mut self, now: Instant) -> Option<Stat> {
        let since = self.last_display?;
        let average = self.intervals.next(None);
        if average <= 0.0 {
            return None;
        }
        let duration = now.saturating_duration_since(since);
        (duration.as_secs_f64() * 1000.0 > average * 2.0).then_some(Stat::Stall { since, duration })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn quiet_before_first_interval() {
        let mut detector = StallDetector::new(20);
        let t0 = Instant::now();
        assert_eq!(detector.check(t0), None);
        detector.on_display(t0);
        assert_eq!(detector.check(t0 + ms(500)), None);
    }

    #[test]
    fn steady_display_is_not_a_stall() {
        let mut detector = StallDetector::new(20);
        let t0 = Instant::now();
        for i in 0..10 {
            detector.on_display(t0 + ms(33 * i));
        }
        assert_eq!(detector.check(t0 + ms(33 * 9 + 40)), None);
    }

    #[test]
    fn gap_beyond_twice_average_is_reported() {
        let mut detector = StallDetector::new(20);
        let t0 = Instant::now();
        for i in 0..10 {
            detector.on_display(t0 + ms(33 * i));
        }
        let last = t0 + ms(33 * 9);
        assert_eq!(
            detector.check(last + ms(100)),
            Some(Stat::Stall {
                since: last,
                duration: ms(100),
            })
        );
    }
}
