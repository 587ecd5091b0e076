//! Low-latency MOQ playback.
//!
//! The [`Player`] subscribes to the catalog, init and data tracks of one
//! namespace and feeds complete CMAF groups to a decode worker
//! ([`Renderer`]) at a pace that holds a configured end-to-end latency.
//! Decoding and presentation are pluggable through [`FrameDecoder`] and
//! [`FrameSink`].
//!
//! ## Pipeline
//!
//! ```text
//! relay ─► fetch loop ─► TrackBuffer ─► Pacer ─► Renderer ─► Timeline ─► FrameSink
//!              │                                     │
//!              └─ ThroughputMeter ──► ABR ◄── skips ─┘
//! ```
//!
//! With a zero latency target the buffer and pacer are bypassed and every
//! object goes to the decode worker as it arrives.

#![forbid(unsafe_code)]

mod buffer;
mod config;
mod error;
mod pacing;
mod player;
mod probe;
mod renderer;
mod stall;
mod stats;
mod timeline;
mod types;

#[cfg(any(test, feature = "test-utils"))]
pub use crate::renderer::{MockFrameDecoder, MockFrameSink};
pub use crate::{
    buffer::TrackBuffer,
    config::{PlayerConfig, ProbeOptions, RendererOptions},
    error::{DecodeError, PlayResult, PlayerError},
    pacing::{Pacer, quantize_latency_target},
    player::Player,
    renderer::{FrameDecoder, FrameSink, Renderer, RendererEvent},
    stall::StallDetector,
    stats::PlaybackStats,
    timeline::{Pulled, Timeline, TimelineSegment},
    types::{BufferedSegment, Frame, MediaKind, Segment},
};
