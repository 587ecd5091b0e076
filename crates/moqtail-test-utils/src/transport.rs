//! In-process connection for session tests.

use std::sync::Arc;

use async_trait::async_trait;
use moqtail_transport::{RecvStream, SendStream, SessionError, SessionResult, Transport};
use parking_lot::Mutex;
use tokio::{
    io::DuplexStream,
    sync::{Mutex as AsyncMutex, mpsc},
};
use tokio_util::sync::CancellationToken;

const CONTROL_BUFFER: usize = 16 * 1024;
const STREAM_BUFFER: usize = 64 * 1024;

/// One end of an in-memory connection.
///
/// Streams opened on one end are accepted on the other. Closing either end
/// closes the connection for both.
pub struct MemoryTransport {
    control: Mutex<Option<(DuplexStream, DuplexStream)>>,
    incoming: AsyncMutex<mpsc::UnboundedReceiver<RecvStream>>,
    outgoing: mpsc::UnboundedSender<RecvStream>,
    connection: CancellationToken,
    closed: Mutex<Option<(u32, String)>>,
}

impl MemoryTransport {
    /// Two connected ends.
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let (a_send, b_recv) = tokio::io::duplex(CONTROL_BUFFER);
        let (b_send, a_recv) = tokio::io::duplex(CONTROL_BUFFER);
        let (to_a, a_incoming) = mpsc::unbounded_channel();
        let (to_b, b_incoming) = mpsc::unbounded_channel();
        let connection = CancellationToken::new();

        let a = Self {
            control: Mutex::new(Some((a_send, a_recv))),
            incoming: AsyncMutex::new(a_incoming),
            outgoing: to_b,
            connection: connection.clone(),
            closed: Mutex::new(None),
        };
        let b = Self {
            control: Mutex::new(Some((b_send, b_recv))),
            incoming: AsyncMutex::new(b_incoming),
            outgoing: to_a,
            connection,
            closed: Mutex::new(None),
        };
        (Arc::new(a), Arc::new(b))
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_cancelled()
    }

    /// Resolves once either end closed the connection.
    pub async fn closed(&self) {
        self.connection.cancelled().await;
    }

    /// Code and reason passed to [`Transport::close`] on this end.
    pub fn close_reason(&self) -> Option<(u32, String)> {
        self.closed.lock().clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open_uni(&self) -> SessionResult<SendStream> {
        if self.connection.is_cancelled() {
            return Err(SessionError::Closed);
        }
        let (send, recv) = tokio::io::duplex(STREAM_BUFFER);
        self.outgoing
            .send(Box::new(recv))
            .map_err(|_| SessionError::Closed)?;
        Ok(Box::new(send))
    }

    async fn accept_uni(&self) -> SessionResult<Option<RecvStream>> {
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            biased;
            () = self.connection.cancelled() => Ok(None),
            stream = incoming.recv() => Ok(stream),
        }
    }

    async fn control(&self) -> SessionResult<(SendStream, RecvStream)> {
        let (send, recv) = self.control.lock().take().ok_or(SessionError::Closed)?;
        Ok((Box::new(send), Box::new(recv)))
    }

    fn close(&self, code: u32, reason: &str) {
        self.closed
            .lock()
            .get_or_insert_with(|| (code, reason.to_string()));
        self.connection.cancel();
    }
}
