use std::sync::Arc;

use tokio::{sync::watch, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    control::{ControlReceiver, ControlSender},
    error::{SessionError, SessionResult},
    message::Routed,
    object::{ObjectHeader, Objects},
    publisher::Publisher,
    subscriber::Subscriber,
    transport::{RecvStream, Transport},
};

/// Queue sizes for a session.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Pending objects per subscription before the oldest is dropped.
    pub object_queue_capacity: usize,
    pub announce_queue_capacity: usize,
    pub subscribe_queue_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            object_queue_capacity: 256,
            announce_queue_capacity: 16,
            subscribe_queue_capacity: 16,
        }
    }
}

impl SessionOptions {
    pub fn with_object_queue_capacity(mut self, capacity: usize) -> Self {
        self.object_queue_capacity = capacity;
        self
    }

    pub fn with_announce_queue_capacity(mut self, capacity: usize) -> Self {
        self.announce_queue_capacity = capacity;
        self
    }

    pub fn with_subscribe_queue_capacity(mut self, capacity: usize) -> Self {
        self.subscribe_queue_capacity = capacity;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum SessionState {
    Open,
    Closed(Option<SessionError>),
}

struct Inner {
    transport: Arc<dyn Transport>,
    publisher: Publisher,
    subscriber: Subscriber,
    cancel: CancellationToken,
    state: watch::Sender<SessionState>,
}

impl Inner {
    /// First close wins. Wakes every queue and closes the transport.
    fn close(&self, err: Option<SessionError>) {
        let changed = self.state.send_if_modified(|state| {
            if *state != SessionState::Open {
                return false;
            }
            *state = SessionState::Closed(err.clone());
            true
        });
        if !changed {
            return;
        }

        match &err {
            Some(e) => warn!(error = %e, "session closed with error"),
            None => info!("session closed"),
        }
        self.cancel.cancel();
        self.subscriber.close_all(err.as_ref());
        self.publisher.close_all(err.as_ref());
        let (code, reason) = match &err {
            Some(e) => (1, e.to_string()),
            None => (0, String::new()),
        };
        self.transport.close(code, &reason);
    }
}

/// A MOQ session over one transport connection.
///
/// Cloning yields another handle to the same session. Both roles share one
/// control stream; a background task routes incoming control messages and
/// object streams until the session closes.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Open the control stream and start routing.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn connect(transport: Arc<dyn Transport>, options: SessionOptions) -> SessionResult<Self> {
        let (send, recv) = transport.control().await?;
        let control = ControlSender::new(send);
        let objects = Objects::new(Arc::clone(&transport));

        let publisher = Publisher::new(
            control.clone(),
            objects,
            options.subscribe_queue_capacity,
        );
        let subscriber = Subscriber::new(
            control,
            options.announce_queue_capacity,
            options.object_queue_capacity,
        );

        let (state, _) = watch::channel(SessionState::Open);
        let inner = Arc::new(Inner {
            transport,
            publisher,
            subscriber,
            cancel: CancellationToken::new(),
            state,
        });

        tokio::spawn({
            let inner = Arc::clone(&inner);
            async move {
                let result = run(&inner, ControlReceiver::new(recv)).await;
                inner.close(result.err());
            }
        });

        debug!(?options, "session started");
        Ok(Self { inner })
    }

    pub fn publisher(&self) -> &Publisher {
        &self.inner.publisher
    }

    pub fn subscriber(&self) -> &Subscriber {
        &self.inner.subscriber
    }

    /// Close the session. `None` is a graceful close.
    pub fn close(&self, err: Option<SessionError>) {
        self.inner.close(err);
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.state.borrow() != SessionState::Open
    }

    /// Wait for the session to end. Returns the error that closed it, if any.
    pub async fn closed(&self) -> Option<SessionError> {
        let mut rx = self.inner.state.subscribe();
        match rx.wait_for(|s| *s != SessionState::Open).await {
            Ok(state) => match &*state {
                SessionState::Closed(err) => err.clone(),
                SessionState::Open => None,
            },
            Err(_) => Some(SessionError::Closed),
        }
    }
}

async fn run(inner: &Inner, mut control: ControlReceiver) -> SessionResult<()> {
    let mut streams: JoinSet<SessionResult<()>> = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            () = inner.cancel.cancelled() => return Ok(()),

            Some(joined) = streams.join_next() => match joined {
                Ok(result) => result?,
                Err(e) => warn!(error = %e, "object stream task failed"),
            },

            msg = control.recv() => {
                let Some(msg) = msg? else {
                    debug!("control stream finished");
                    return Ok(());
                };
                match msg.route() {
                    Routed::ToSubscriber(m) => inner.subscriber.recv_message(m).await?,
                    Routed::ToPublisher(m) => inner.publisher.recv_message(m)?,
                }
            }

            stream = inner.transport.accept_uni() => {
                let Some(stream) = stream? else {
                    debug!("transport stopped accepting streams");
                    return Ok(());
                };
                streams.spawn(recv_object(inner.subscriber.clone(), stream));
            }
        }
    }
}

/// Header decode runs per stream so one slow sender does not stall others.
async fn recv_object(subscriber: Subscriber, mut stream: RecvStream) -> SessionResult<()> {
    let header = ObjectHeader::read(&mut stream).await?;
    subscriber.recv_object(header, stream);
    Ok(())
}
