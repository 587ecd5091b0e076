use moqtail_media::CatalogError;
use moqtail_transport::{SessionError, SubscribeError};
use thiserror::Error;

/// Failure inside the decode worker.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown init track: {0}")]
    UnknownInit(String),
    #[error("multiple objects per group not supported (object {0})")]
    MultipleObjects(u64),
    /// Opaque error from the codec backend.
    #[error("decode failed: {0}")]
    Backend(String),
}

#[derive(Clone, Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum PlayerError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Subscribe(#[from] SubscribeError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("latency target must be greater than or equal to 0, got {0}")]
    InvalidLatencyTarget(f64),

    #[error("no init data on {0}")]
    NoInitData(String),

    #[error("unknown track: {0}")]
    UnknownTrack(String),

    #[error("expected a video track, got {0}")]
    NotVideo(String),

    #[error("catalog has no playable tracks")]
    NoTracks,

    #[error("player closed")]
    Closed,
}

pub type PlayResult<T> = Result<T, PlayerError>;
