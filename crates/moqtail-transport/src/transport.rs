use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::SessionResult;

pub type SendStream = Box<dyn AsyncWrite + Send + Unpin>;
pub type RecvStream = Box<dyn AsyncRead + Send + Unpin>;

/// The connection capabilities a session needs.
///
/// Connection establishment (QUIC/WebTransport, TLS fingerprint pinning)
/// happens before a `Transport` exists.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a new outgoing unidirectional stream.
    async fn open_uni(&self) -> SessionResult<SendStream>;

    /// Wait for the next incoming unidirectional stream.
    ///
    /// Returns `Ok(None)` once the connection is closed. Must be cancel
    /// safe: the session polls it inside `select!`.
    async fn accept_uni(&self) -> SessionResult<Option<RecvStream>>;

    /// The reliable bidirectional control stream. Called once per session.
    async fn control(&self) -> SessionResult<(SendStream, RecvStream)>;

    /// Close the connection with an application error code.
    fn close(&self, code: u32, reason: &str);
}
