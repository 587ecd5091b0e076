//! Adaptive bitrate (ABR) decisions for MOQ video playback.
//!
//! The controller reacts to two signal streams:
//!
//! - **Congestion**: skip events reported by the decode pipeline for the track
//!   currently playing. Enough of them inside `congestion_window` force a
//!   switch to the cheapest other rendition.
//! - **Bandwidth**: filtered throughput samples. Repeated samples far above
//!   (or below) the current bitrate move the subscription up (or down).
//!
//! Both paths are gated by a startup delay, the enabled toggle and a cool-off
//! period after every switch or congestion event.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use moqtail_abr::{AbrController, AbrOptions, AbrReason, Variant};
//! use web_time::Instant;
//!
//! let variants = vec![
//!     Variant::new("360p", 500_000),
//!     Variant::new("720p", 1_500_000),
//! ];
//! let mut abr = AbrController::new(AbrOptions::default());
//!
//! let start = Instant::now();
//! // The first sample only starts the startup clock.
//! let d = abr.on_throughput(10_000.0, "360p", &variants, start);
//! assert_eq!(d.reason, AbrReason::Startup);
//!
//! let later = start + Duration::from_secs(6);
//! for i in 0..3 {
//!     let d = abr.on_throughput(10_000.0, "360p", &variants, later + Duration::from_millis(i));
//!     if d.changed {
//!         assert_eq!(d.target, "720p");
//!     }
//! }
//! ```

#![forbid(unsafe_code)]

mod controller;
mod estimator;
mod types;

pub use controller::{AbrController, AbrDecision, AbrReason};
pub use estimator::Swma;
pub use types::{AbrOptions, AbrSignal, SignalKind, Variant};
