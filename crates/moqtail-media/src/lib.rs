//! Media-side helpers for MOQ playback: the session catalog, fragmented MP4
//! box scanning and throughput estimation from object arrival.

#![forbid(unsafe_code)]

mod catalog;
pub mod mp4;
mod throughput;

pub use crate::{
    catalog::{
        AudioParams, CATALOG_TRACK, Catalog, CatalogError, CatalogResult, Track, TrackKind,
        VideoParams,
    },
    throughput::{
        Measurement, MeteredReader, Scan, ThroughputMeter, ThroughputOptions, TpEstimator,
        TputError, scan_objects,
    },
};
