//! Throughput estimation from object arrival timing.
//!
//! Every object on a data track is a `prft` + `moof` + `mdat` triple. When
//! the first object of a stream arrives over more than one read, the bytes
//! that arrived after the first read divided by the time until the object
//! completed approximate the link rate. Objects that arrive in a single read
//! carry no timing information and are not measured.

use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
    time::Duration,
};

use moqtail_abr::Swma;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, ReadBuf},
    sync::broadcast,
};
use tracing::{debug, trace, warn};
use web_time::Instant;

use crate::mp4::{FourCc, MDAT, MOOF, PRFT, read_box_header};

/// Upper bound on objects parsed from one buffer.
const MAX_OBJECTS_PER_SCAN: usize = 100;
/// Shorter downloads are below timer resolution and not measured.
const MIN_DOWNLOAD_SECS: f64 = 0.001;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TputError {
    #[error("more than {MAX_OBJECTS_PER_SCAN} objects in one buffer")]
    IterationCap,
    #[error("malformed box header at offset {0}")]
    InvalidBox(usize),
    #[error("expected {expected} box, found {found}")]
    UnexpectedBox { expected: String, found: String },
}

#[derive(Clone, Debug)]
pub struct ThroughputOptions {
    /// SWMA window of raw samples.
    pub window: usize,
    /// Minimum spacing between announced measurements.
    pub announce_interval: Duration,
}

impl Default for ThroughputOptions {
    fn default() -> Self {
        Self {
            window: 2,
            announce_interval: Duration::from_millis(1000),
        }
    }
}

impl ThroughputOptions {
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn with_announce_interval(mut self, interval: Duration) -> Self {
        self.announce_interval = interval;
        self
    }
}

/// Complete objects found at the front of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scan {
    Incomplete,
    Complete {
        objects: usize,
        /// Trailing bytes of the next, still incomplete object.
        partial: usize,
    },
}

fn fourcc(kind: FourCc) -> String {
    String::from_utf8_lossy(&kind).into_owned()
}

/// Length of the `prft`/`moof`/`mdat` triple at the front of `data`, or
/// `None` while bytes are still missing.
fn object_len(data: &[u8], base: usize) -> Result<Option<usize>, TputError> {
    let mut len = 0;
    for expected in [PRFT, MOOF, MDAT] {
        let Some(rest) = data.get(len..) else {
            return Ok(None);
        };
        let header = match read_box_header(rest) {
            Some(h) => h,
            None if rest.len() < 16 => return Ok(None),
            None => return Err(TputError::InvalidBox(base + len)),
        };
        if header.kind != expected {
            return Err(TputError::UnexpectedBox {
                expected: fourcc(expected),
                found: fourcc(header.kind),
            });
        }
        len += usize::try_from(header.size).map_err(|_| TputError::InvalidBox(base + len))?;
    }
    Ok((len <= data.len()).then_some(len))
}

/// Count the complete objects buffered in `data`.
pub fn scan_objects(data: &[u8]) -> Result<Scan, TputError> {
    let mut offset = 0;
    let mut objects = 0;
    loop {
        if objects > MAX_OBJECTS_PER_SCAN {
            return Err(TputError::IterationCap);
        }
        match object_len(&data[offset..], offset)? {
            Some(len) => {
                objects += 1;
                offset += len;
                if offset == data.len() {
                    return Ok(Scan::Complete {
                        objects,
                        partial: 0,
                    });
                }
            }
            None if objects == 0 => return Ok(Scan::Incomplete),
            None => {
                return Ok(Scan::Complete {
                    objects,
                    partial: data.len() - offset,
                });
            }
        }
    }
}

/// Per-stream object timing. One estimator per object stream.
#[derive(Debug, Default)]
pub struct TpEstimator {
    carry: Vec<u8>,
    waiting_since: Option<Instant>,
    received_offset: usize,
    completed: u32,
}

impl TpEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read. Returns a raw sample in kbit/s when the first object
    /// of the stream completes after spanning several reads, and is the only
    /// object completed by this read.
    pub fn observe(&mut self, chunk: &[u8], now: Instant) -> Option<f64> {
        self.carry.extend_from_slice(chunk);

        let scan = match scan_objects(&self.carry) {
            Ok(scan) => scan,
            Err(e) => {
                warn!(error = %e, buffered = self.carry.len(), "throughput scan failed, resetting");
                self.carry.clear();
                self.waiting_since = None;
                self.received_offset = 0;
                return None;
            }
        };

        match scan {
            Scan::Incomplete => {
                if self.waiting_since.is_none() {
                    self.waiting_since = Some(now);
                    self.received_offset = self.carry.len();
                }
                None
            }
            Scan::Complete { objects, partial } => {
                self.completed += 1;
                let end = self.carry.len() - partial;
                let sample = self.waiting_since.take().and_then(|start| {
                    let secs = now.duration_since(start).as_secs_f64();
                    (secs > MIN_DOWNLOAD_SECS && self.completed == 1 && objects == 1)
                        .then(|| kbps(end.saturating_sub(self.received_offset), secs))
                });
                trace!(objects, partial, ?sample, "object complete");

                if partial > 0 {
                    self.carry.drain(..end);
                    self.waiting_since = Some(now);
                    self.received_offset = partial;
                } else {
                    self.carry.clear();
                    self.received_offset = 0;
                }
                sample
            }
        }
    }
}

#[expect(clippy::cast_precision_loss)] // object sizes are far below 2^52
fn kbps(bytes: usize, secs: f64) -> f64 {
    bytes as f64 * 8.0 / 1000.0 / secs
}

/// A filtered throughput value released by the meter.
#[derive(Clone, Debug, PartialEq)]
pub struct Measurement {
    pub kbps: f64,
    /// Segment being received when the value was announced.
    pub segment: String,
}

struct MeterState {
    swma: Swma,
    last_announce: Option<Instant>,
}

/// Shared filter and announce throttle for every metered stream of a
/// session.
#[derive(Clone)]
pub struct ThroughputMeter {
    state: Arc<Mutex<MeterState>>,
    interval: Duration,
    tx: broadcast::Sender<Measurement>,
}

impl ThroughputMeter {
    pub fn new(options: &ThroughputOptions) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            state: Arc::new(Mutex::new(MeterState {
                swma: Swma::new(options.window, "throughput"),
                last_announce: None,
            })),
            interval: options.announce_interval,
            tx,
        }
    }

    /// Announced measurements.
    pub fn subscribe(&self) -> broadcast::Receiver<Measurement> {
        self.tx.subscribe()
    }

    /// Filter a raw sample. The filtered value is announced at most once
    /// per interval and only while a segment is known.
    pub fn record(&self, kbps: f64, segment: Option<&str>, now: Instant) -> Option<f64> {
        let filtered = {
            let mut st = self.state.lock();
            let filtered = st.swma.next(Some(kbps));
            let due = st
                .last_announce
                .is_none_or(|t| now.duration_since(t) > self.interval);
            if !due || segment.is_none() {
                return None;
            }
            st.last_announce = Some(now);
            filtered
        };

        let segment = segment.unwrap_or_default().to_string();
        debug!(kbps = filtered, raw = kbps, %segment, "throughput measured");
        // No receivers is fine.
        let _ = self.tx.send(Measurement {
            kbps: filtered,
            segment,
        });
        Some(filtered)
    }

    pub fn last(&self) -> f64 {
        self.state.lock().swma.last()
    }

    /// Drop buffered samples. The next sample starts a fresh window.
    pub fn reset(&self) {
        debug!("throughput measurement reset");
        self.state.lock().swma.reset();
    }
}

/// Pass-through reader that meters the first object of a stream.
pub struct MeteredReader<R> {
    inner: R,
    estimator: TpEstimator,
    meter: ThroughputMeter,
    segment: Option<String>,
}

impl<R> MeteredReader<R> {
    pub fn new(inner: R, meter: ThroughputMeter) -> Self {
        Self {
            inner,
            estimator: TpEstimator::new(),
            meter,
            segment: None,
        }
    }

    pub fn with_segment<S: Into<String>>(mut self, segment: S) -> Self {
        self.segment = Some(segment.into());
        self
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for MeteredReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;

        let chunk = &buf.filled()[before..];
        if !chunk.is_empty() {
            let now = Instant::now();
            if let Some(sample) = this.estimator.observe(chunk, now) {
                this.meter.record(sample, this.segment.as_deref(), now);
            }
        }
        Poll::Ready(Ok(()))
    }
}
