use std::sync::Arc;

use bytes::{Buf, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::trace;

use crate::{
    coding::{Decode, Encode},
    error::{DecodeError, SessionError, SessionResult},
    message::Message,
    transport::{RecvStream, SendStream},
};

/// Maximum control frame size. Control messages are tiny; anything larger is
/// a broken peer.
const MAX_FRAME: usize = 64 * 1024;

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME)
        .new_codec()
}

/// Write half of the control stream, shared by the publisher and subscriber.
#[derive(Clone)]
pub struct ControlSender {
    inner: Arc<Mutex<FramedWrite<SendStream, LengthDelimitedCodec>>>,
}

impl ControlSender {
    pub fn new(stream: SendStream) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FramedWrite::new(stream, codec()))),
        }
    }

    pub async fn send<M: Into<Message>>(&self, msg: M) -> SessionResult<()> {
        let msg = msg.into();
        trace!(kind = msg.name(), ?msg, "control send");
        let mut buf = BytesMut::new();
        msg.encode(&mut buf)?;
        self.inner
            .lock()
            .await
            .send(buf.freeze())
            .await
            .map_err(SessionError::transport)
    }
}

/// Read half of the control stream. Owned by the session run loop.
pub struct ControlReceiver {
    inner: FramedRead<RecvStream, LengthDelimitedCodec>,
}

impl ControlReceiver {
    pub fn new(stream: RecvStream) -> Self {
        Self {
            inner: FramedRead::new(stream, codec()),
        }
    }

    /// Next message, or `Ok(None)` when the peer finished the stream.
    pub async fn recv(&mut self) -> SessionResult<Option<Message>> {
        let Some(frame) = self.inner.next().await else {
            return Ok(None);
        };
        let mut frame = frame.map_err(SessionError::transport)?.freeze();
        let msg = Message::decode(&mut frame)?;
        if frame.has_remaining() {
            return Err(DecodeError::TrailingBytes(frame.remaining()).into());
        }
        trace!(kind = msg.name(), ?msg, "control recv");
        Ok(Some(msg))
    }
}
