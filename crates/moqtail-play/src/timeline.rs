use std::collections::VecDeque;

use moqtail_events::{GroupRef, SkipEvent, SkipKind};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::types::Frame;

/// Played-duration entries kept for skip accounting.
const DURATION_HISTORY: usize = 64;
/// Slack when deciding a segment has played a full second.
const COMPLETE_EPSILON: f64 = 0.0001;

/// A segment entering the timeline. Frames arrive as the decoder produces
/// them; dropping the receiver cancels the rest of the segment.
#[derive(Debug)]
pub struct TimelineSegment {
    pub track: String,
    pub sequence: u64,
    pub frames: mpsc::Receiver<Frame>,
}

impl TimelineSegment {
    fn group(&self) -> GroupRef {
        GroupRef {
            track: self.track.clone(),
            sequence: self.sequence,
        }
    }
}

#[derive(Debug)]
pub enum Pulled {
    Frame(Frame),
    /// A segment was abandoned. The timeline keeps going.
    Skip(SkipEvent),
}

enum Input {
    Frame(Option<Frame>),
    Segment(Option<TimelineSegment>),
}

/// Picks which segment's frames play next for one media kind.
///
/// A new segment arriving while the current one still owes frames means
/// the current one is late: an older arrival is discarded (`too_old`), a
/// newer one replaces the current segment (`too_slow`). Once the current
/// segment has played a full second it is treated as caught up and no skip
/// is reported for it.
pub struct Timeline {
    segments: mpsc::Receiver<TimelineSegment>,
    segments_closed: bool,
    current: Option<TimelineSegment>,
    played: VecDeque<(GroupRef, f64)>,
    completed: bool,
}

impl Timeline {
    /// Timeline plus the sender feeding it, with room for `lookahead`
    /// queued segments.
    pub fn channel(lookahead: usize) -> (mpsc::Sender<TimelineSegment>, Self) {
        let (tx, rx) = mpsc::channel(lookahead.max(1));
        let timeline = Self {
            segments: rx,
            segments_closed: false,
            current: None,
            played: VecDeque::new(),
            completed: false,
        };
        (tx, timeline)
    }

    /// Next frame or skip. `None` once the segment sender is gone and the
    /// current segment is exhausted.
    ///
    /// Cancel safe.
    pub async fn next(&mut self) -> Option<Pulled> {
        loop {
            let input = match self.current.as_mut() {
                Some(current) if !self.segments_closed => tokio::select! {
                    biased;
                    frame = current.frames.recv() => Input::Frame(frame),
                    segment = self.segments.recv() => Input::Segment(segment),
                },
                Some(current) => Input::Frame(current.frames.recv().await),
                None if self.segments_closed => return None,
                None => Input::Segment(self.segments.recv().await),
            };

            match input {
                Input::Frame(Some(frame)) => {
                    self.on_frame(&frame);
                    return Some(Pulled::Frame(frame));
                }
                Input::Frame(None) => {
                    trace!(sequence = self.current.as_ref().map(|c| c.sequence), "segment finished");
                    self.current = None;
                }
                Input::Segment(None) => self.segments_closed = true,
                Input::Segment(Some(segment)) => {
                    if let Some(skip) = self.on_segment(segment) {
                        return Some(Pulled::Skip(skip));
                    }
                }
            }
        }
    }

    fn on_frame(&mut self, frame: &Frame) {
        let Some(current) = &self.current else {
            return;
        };
        let key = current.group();
        let total = match self.played.iter_mut().find(|(g, _)| *g == key) {
            Some((_, played)) => {
                *played += frame.duration;
                *played
            }
            None => {
                self.remember(key, frame.duration);
                frame.duration
            }
        };
        // One group is one second of media.
        if (1.0..2.0).contains(&(total + COMPLETE_EPSILON)) {
            self.completed = true;
        }
    }

    fn on_segment(&mut self, segment: TimelineSegment) -> Option<SkipEvent> {
        let skip = match &self.current {
            Some(current) if !self.completed => {
                let duration = self.skip_duration(&current.group());
                if segment.sequence < current.sequence {
                    debug!(
                        incoming = segment.sequence,
                        current = current.sequence,
                        track = %current.track,
                        "skipping incoming segment: too old"
                    );
                    // Dropping `segment` cancels its decode.
                    return Some(SkipEvent {
                        kind: SkipKind::TooOld,
                        skipped: segment.group(),
                        current: current.group(),
                        duration,
                    });
                }
                debug!(
                    incoming = segment.sequence,
                    current = current.sequence,
                    track = %current.track,
                    "skipping current segment: too slow"
                );
                Some(SkipEvent {
                    kind: SkipKind::TooSlow,
                    skipped: current.group(),
                    current: segment.group(),
                    duration,
                })
            }
            _ => None,
        };

        self.completed = false;
        self.remember(segment.group(), 0.0);
        self.current = Some(segment);
        skip
    }

    /// How far `group` trails the furthest-played segment, in seconds.
    fn skip_duration(&self, group: &GroupRef) -> f64 {
        let max = self.played.iter().map(|(_, d)| *d).fold(0.0, f64::max);
        self.played
            .iter()
            .find(|(g, _)| g == group)
            .map_or(0.0, |(_, d)| max - d)
    }

    fn remember(&mut self, group: GroupRef, played: f64) {
        if let Some(entry) = self.played.iter_mut().find(|(g, _)| *g == group) {
            entry.1 = played;
            return;
        }
        if self.played.len() == DURATION_HISTORY {
            self.played.pop_front();
        }
        self.played.push_back((group, played));
    }
}
