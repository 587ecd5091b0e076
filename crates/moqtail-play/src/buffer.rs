use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::types::BufferedSegment;

/// Width of an `ntp_timestamp` dedup bucket, in the timestamp's unit (ms).
const BUCKET_MS: u64 = 10;

#[derive(Default)]
struct Inner {
    segments: VecDeque<BufferedSegment>,
    /// Highest group seen per ntp bucket.
    buckets: HashMap<u64, u64>,
}

/// Group-ordered segment queue for one data track.
///
/// Objects produced at the same instant (same 10 ms ntp bucket) are
/// duplicates across groups; only the highest group is kept. Every
/// operation takes the internal lock, so the fetch and pacing loops may
/// share one buffer.
#[derive(Default)]
pub struct TrackBuffer {
    inner: Mutex<Inner>,
}

impl TrackBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a segment in group order. Returns `false` if it was dropped.
    pub fn push(&self, segment: BufferedSegment) -> bool {
        let group = segment.header.group;
        let Some(ntp) = segment.header.ntp_timestamp else {
            warn!(track = %segment.data, group, "segment without ntp timestamp dropped");
            return false;
        };
        let bucket = ntp / BUCKET_MS;

        let mut inner = self.inner.lock();
        let previous = inner.buckets.get(&bucket).copied();
        if let Some(max) = previous {
            if group < max {
                debug!(track = %segment.data, group, max, "stale segment for ntp bucket dropped");
                return false;
            }
            inner.segments.retain(|s| s.header.group != max);
        }
        inner.buckets.insert(bucket, group);

        let at = inner.segments.partition_point(|s| s.header.group <= group);
        inner.segments.insert(at, segment);
        true
    }

    /// Remove the lowest-group segment.
    ///
    /// Buckets whose highest group is below the popped one are forgotten.
    pub fn pop(&self) -> Option<BufferedSegment> {
        let mut inner = self.inner.lock();
        let segment = inner.segments.pop_front()?;
        let group = segment.header.group;
        inner.buckets.retain(|_, max| *max >= group);
        Some(segment)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.segments.clear();
        inner.buckets.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().segments.is_empty()
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.inner.lock().buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use moqtail_transport::ObjectHeader;
    use rstest::rstest;

    use super::*;
    use crate::types::MediaKind;

    fn seg(group: u64, ntp: Option<u64>) -> BufferedSegment {
        BufferedSegment {
            init: "init".into(),
            data: "video".into(),
            kind: MediaKind::Video,
            header: ObjectHeader {
                group,
                ntp_timestamp: ntp,
                ..Default::default()
            },
            payload: Bytes::from(group.to_be_bytes().to_vec()),
        }
    }

    fn drain(buffer: &TrackBuffer) -> Vec<u64> {
        std::iter::from_fn(|| buffer.pop())
            .map(|s| s.header.group)
            .collect()
    }

    #[rstest]
    #[case::in_order(&[1, 2, 3, 4])]
    #[case::reversed(&[4, 3, 2, 1])]
    #[case::shuffled(&[3, 1, 4, 2, 6, 5])]
    fn pops_in_group_order(#[case] groups: &[u64]) {
        let buffer = TrackBuffer::new();
        for &g in groups {
            assert!(buffer.push(seg(g, Some(1_000 * g))));
        }
        let popped = drain(&buffer);
        assert_eq!(popped.len(), groups.len());
        assert!(popped.windows(2).all(|w| w[0] <= w[1]), "{popped:?}");
    }

    #[test]
    fn higher_group_replaces_same_bucket() {
        let buffer = TrackBuffer::new();
        assert!(buffer.push(seg(10, Some(5_000))));
        assert!(buffer.push(seg(12, Some(5_004))));
        assert_eq!(buffer.len(), 1);
        assert_eq!(drain(&buffer), [12]);
    }

    #[test]
    fn late_lower_group_is_dropped() {
        let buffer = TrackBuffer::new();
        assert!(buffer.push(seg(12, Some(5_000))));
        assert!(!buffer.push(seg(10, Some(5_009))));
        let kept = buffer.pop().unwrap();
        assert_eq!(kept.header.group, 12);
        assert_eq!(kept.payload, Bytes::from(12u64.to_be_bytes().to_vec()));
    }

    #[test]
    fn neighbouring_buckets_are_independent() {
        let buffer = TrackBuffer::new();
        assert!(buffer.push(seg(3, Some(5_010))));
        assert!(buffer.push(seg(2, Some(5_000))));
        assert_eq!(drain(&buffer), [2, 3]);
    }

    #[test]
    fn missing_ntp_is_dropped() {
        let buffer = TrackBuffer::new();
        assert!(!buffer.push(seg(1, None)));
        assert!(buffer.is_empty());
    }

    #[test]
    fn popping_bounds_bucket_memory() {
        let buffer = TrackBuffer::new();
        for group in 0..1_000 {
            assert!(buffer.push(seg(group, Some(group * 40))));
            if group >= 3 {
                assert_eq!(buffer.pop().unwrap().header.group, group - 3);
            }
        }
        assert_eq!(buffer.len(), 3);
        assert!(buffer.bucket_count() <= 4, "{}", buffer.bucket_count());
    }

    #[test]
    fn popping_keeps_buckets_of_buffered_groups() {
        let buffer = TrackBuffer::new();
        buffer.push(seg(1, Some(1_000)));
        buffer.push(seg(5, Some(2_000)));
        assert_eq!(buffer.pop().unwrap().header.group, 1);
        assert!(!buffer.push(seg(4, Some(2_005))));
        assert_eq!(drain(&buffer), [5]);
    }

    #[test]
    fn clear_forgets_buckets() {
        let buffer = TrackBuffer::new();
        buffer.push(seg(8, Some(100)));
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.push(seg(1, Some(100))));
    }
}
