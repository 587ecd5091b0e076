use thiserror::Error;

/// Malformed bytes on the wire.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("invalid OBJECT type, got {0}")]
    InvalidObjectType(u8),
    #[error("value {0} exceeds field bounds")]
    BoundsExceeded(u64),
    #[error("unknown control message id: {0:#x}")]
    UnknownMessage(u64),
    #[error("invalid location mode: {0}")]
    InvalidLocation(u64),
    #[error("invalid utf-8 string")]
    InvalidString,
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
    #[error("io: {0}")]
    Io(String),
}

impl From<std::io::Error> for DecodeError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::UnexpectedEnd
        } else {
            Self::Io(e.to_string())
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("value {0} exceeds field bounds")]
    BoundsExceeded(u64),
    #[error("io: {0}")]
    Io(String),
}

impl From<std::io::Error> for EncodeError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Session-level failure. Any of these closes the whole session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("protocol error: {0}")]
    Decode(#[from] DecodeError),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("{0} not implemented")]
    Unsupported(&'static str),
    #[error("duplicate {0}")]
    Duplicate(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("session closed")]
    Closed,
}

impl SessionError {
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }

    /// Malformed or unexpected peer input.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::Protocol(_) | Self::Unsupported(_) | Self::Duplicate(_)
        )
    }
}

/// Subscription terminated by the peer or by the session.
///
/// Only the affected track's data queue sees this error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("SUBSCRIBE_ERROR ({code}){}", fmt_reason(.reason))]
    Remote { code: u64, reason: String },
    #[error("session closed: {0}")]
    Session(SessionError),
}

fn fmt_reason(reason: &str) -> String {
    if reason.is_empty() {
        String::new()
    } else {
        format!(": {reason}")
    }
}

/// Announcement rejected or abandoned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnnounceError {
    #[error("ANNOUNCE_ERROR ({code}){}", fmt_reason(.reason))]
    Remote { code: u64, reason: String },
    #[error("announce dropped before acknowledgement")]
    Dropped,
}

pub type SessionResult<T> = Result<T, SessionError>;
