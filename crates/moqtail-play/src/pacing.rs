use std::time::Duration;

use tracing::trace;

use crate::error::{PlayResult, PlayerError};

/// Drain interval, in tenths of a group, while playback is more than one
/// group behind the target.
const CATCH_UP_TENTHS: u32 = 7;

/// Round `seconds` up to a whole number of groups.
pub fn quantize_latency_target(seconds: f64, group: Duration) -> PlayResult<Duration> {
    if seconds.is_nan() || seconds < 0.0 {
        return Err(PlayerError::InvalidLatencyTarget(seconds));
    }
    if group.is_zero() {
        return Ok(Duration::from_secs_f64(seconds));
    }
    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // non-negative, checked above
    let groups = (seconds / group.as_secs_f64()).ceil().min(f64::from(u32::MAX)) as u32;
    Ok(group * groups)
}

/// Drain timing for a track buffer.
///
/// Decides how long the playout loop sleeps before handing the next
/// buffered segment to the decoder.
#[derive(Clone, Debug)]
pub struct Pacer {
    target: Duration,
    group: Duration,
    initialized: bool,
}

impl Pacer {
    pub fn new(target: Duration, group: Duration) -> Self {
        Self {
            target,
            group,
            initialized: false,
        }
    }

    pub fn target(&self) -> Duration {
        self.target
    }

    pub fn group(&self) -> Duration {
        self.group
    }

    /// Zero target: segments go to the decoder as they arrive.
    pub fn is_live_edge(&self) -> bool {
        self.target.is_zero()
    }

    /// Whole groups a newly selected track must buffer before it takes over.
    pub fn target_groups(&self) -> usize {
        if self.group.is_zero() {
            return 0;
        }
        usize::try_from(self.target.as_nanos().div_ceil(self.group.as_nanos())).unwrap_or(usize::MAX)
    }

    /// Raising the target rebuilds the buffer before draining resumes.
    pub fn set_target(&mut self, target: Duration) {
        if target > self.target {
            self.initialized = false;
        }
        self.target = target;
    }

    /// Forget the initial fill, e.g. after a track switch.
    pub fn reset(&mut self) {
        self.initialized = false;
    }

    /// Sleep before the next drain. `buffered` is the current buffer length,
    /// `latency` the last measured end-to-end latency.
    pub fn next_wait(&mut self, buffered: usize, latency: Option<Duration>) -> Duration {
        if self.is_live_edge() {
            return Duration::ZERO;
        }
        let latency = latency.unwrap_or_default();

        let wait = if self.target >= latency {
            if self.initialized {
                self.group
            } else {
                self.initialized = true;
                let buffered = u32::try_from(buffered).unwrap_or(u32::MAX);
                self.target
                    .saturating_sub(self.group.saturating_mul(buffered))
                    .max(self.group)
            }
        } else if latency >= self.target + self.group {
            self.group * CATCH_UP_TENTHS / 10
        } else {
            self.group
        };

        trace!(buffered, ?latency, target = ?self.target, ?wait, "pacing");
        wait
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const GROUP: Duration = Duration::from_millis(1000);

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[rstest]
    #[case::zero(0.0, 0)]
    #[case::exact(3.0, 3000)]
    #[case::rounds_up(2.1, 3000)]
    #[case::sub_group(0.2, 1000)]
    fn quantizes_up_to_group(#[case] seconds: f64, #[case] expected_ms: u64) {
        assert_eq!(quantize_latency_target(seconds, GROUP).unwrap(), ms(expected_ms));
    }

    #[rstest]
    #[case::negative(-1.0)]
    #[case::nan(f64::NAN)]
    fn rejects_invalid_target(#[case] seconds: f64) {
        assert!(matches!(
            quantize_latency_target(seconds, GROUP),
            Err(PlayerError::InvalidLatencyTarget(_))
        ));
    }

    #[rstest]
    #[case::live(0, 0)]
    #[case::whole(3000, 3)]
    #[case::partial(2500, 3)]
    fn switch_needs_whole_groups(#[case] target_ms: u64, #[case] groups: usize) {
        assert_eq!(Pacer::new(ms(target_ms), GROUP).target_groups(), groups);
    }

    #[test]
    fn live_edge_never_waits() {
        let mut pacer = Pacer::new(Duration::ZERO, GROUP);
        assert_eq!(pacer.next_wait(0, Some(ms(9000))), Duration::ZERO);
    }

    #[rstest]
    #[case::one_buffered(1, 2000)]
    #[case::two_buffered(2, 1000)]
    #[case::overfull(5, 1000)]
    fn first_fill_tops_up_to_target(#[case] buffered: usize, #[case] expected_ms: u64) {
        let mut pacer = Pacer::new(ms(3000), GROUP);
        assert_eq!(pacer.next_wait(buffered, None), ms(expected_ms));
        assert_eq!(pacer.next_wait(buffered, None), GROUP);
    }

    #[test]
    fn falling_behind_speeds_up() {
        let mut pacer = Pacer::new(ms(3000), GROUP);
        pacer.next_wait(3, None);
        assert_eq!(pacer.next_wait(3, Some(ms(4000))), ms(700));
        assert_eq!(pacer.next_wait(3, Some(ms(3500))), GROUP);
    }

    #[test]
    fn raising_target_refills() {
        let mut pacer = Pacer::new(ms(2000), GROUP);
        pacer.next_wait(2, None);
        pacer.set_target(ms(1000));
        assert_eq!(pacer.next_wait(1, None), GROUP);
        pacer.set_target(ms(5000));
        assert_eq!(pacer.next_wait(1, None), ms(4000));
    }

    /// One group arrives per second; the first drain happens once three are
    /// buffered and drains are then spaced one group apart.
    #[test]
    fn three_second_target_drains_after_three_groups() {
        let mut pacer = Pacer::new(ms(3000), GROUP);
        let mut now = ms(0);
        let mut buffered: usize = 1;
        let mut drains = Vec::new();
        for _ in 0..4 {
            let wait = pacer.next_wait(buffered, Some(ms(2500)));
            now += wait;
            buffered = 1 + usize::try_from(now.as_secs()).unwrap() - drains.len();
            drains.push((now, buffered));
        }
        assert_eq!(drains[0], (ms(2000), 3));
        assert!(drains.windows(2).all(|w| w[1].0 - w[0].0 == GROUP));
    }
}
