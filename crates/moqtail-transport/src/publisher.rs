use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    control::ControlSender,
    error::{AnnounceError, SessionError, SessionResult},
    message,
    object::{ObjectHeader, Objects},
    queue::Queue,
    transport::SendStream,
};

#[derive(Clone, Debug, PartialEq, Eq)]
enum AnnounceState {
    Init,
    Ack,
    Error(AnnounceError),
}

/// Handle for a namespace this side announced.
pub struct AnnounceSend {
    namespace: String,
    state: watch::Receiver<AnnounceState>,
}

impl fmt::Debug for AnnounceSend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnounceSend")
            .field("namespace", &self.namespace)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl AnnounceSend {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Wait for ANNOUNCE_OK.
    pub async fn ok(&self) -> Result<(), AnnounceError> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|s| *s != AnnounceState::Init)
            .await
            .map_err(|_| AnnounceError::Dropped)?;
        match &*state {
            AnnounceState::Error(e) => Err(e.clone()),
            _ => Ok(()),
        }
    }

    /// Wait until the announcement ends. Fails if the peer rejected it.
    pub async fn active(&self) -> Result<(), AnnounceError> {
        let mut rx = self.state.clone();
        loop {
            if let AnnounceState::Error(e) = &*rx.borrow_and_update() {
                return Err(e.clone());
            }
            if rx.changed().await.is_err() {
                return Ok(());
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SubscribeRecvState {
    Init,
    Ack,
    Closed,
}

/// A subscription requested by the peer.
#[derive(Clone)]
pub struct SubscribeRecv {
    id: u64,
    namespace: String,
    track: String,
    state: Arc<Mutex<SubscribeRecvState>>,
    control: ControlSender,
    objects: Objects,
}

impl fmt::Debug for SubscribeRecv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeRecv")
            .field("id", &self.id)
            .field("namespace", &self.namespace)
            .field("track", &self.track)
            .finish_non_exhaustive()
    }
}

impl SubscribeRecv {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn track(&self) -> &str {
        &self.track
    }

    /// Accept the subscription with SUBSCRIBE_OK. Only the first call sends.
    pub async fn ack(&self) -> SessionResult<()> {
        {
            let mut state = self.state.lock();
            if *state != SubscribeRecvState::Init {
                return Ok(());
            }
            *state = SubscribeRecvState::Ack;
        }
        self.control.send(message::SubscribeOk { id: self.id }).await
    }

    /// End the subscription with SUBSCRIBE_RESET. No-op once closed.
    pub async fn close(&self, code: u64, reason: &str) -> SessionResult<()> {
        {
            let mut state = self.state.lock();
            if *state == SubscribeRecvState::Closed {
                return Ok(());
            }
            *state = SubscribeRecvState::Closed;
        }
        self.control
            .send(message::SubscribeReset {
                id: self.id,
                code,
                reason: reason.to_string(),
                final_group: 0,
                final_object: 0,
            })
            .await
    }

    /// Open an object stream for this subscription. `header.track` is
    /// replaced with the subscription id.
    pub async fn data(&self, header: ObjectHeader) -> SessionResult<SendStream> {
        let header = ObjectHeader {
            track: self.id,
            ..header
        };
        self.objects.send(&header).await
    }
}

#[derive(Default)]
struct PublisherState {
    announces: HashMap<String, watch::Sender<AnnounceState>>,
    subscribes: HashMap<u64, SubscribeRecv>,
}

/// Publisher role: announces namespaces and serves subscriptions.
#[derive(Clone)]
pub struct Publisher {
    control: ControlSender,
    objects: Objects,
    state: Arc<Mutex<PublisherState>>,
    subscribed: Arc<Queue<SubscribeRecv, SessionError>>,
}

impl Publisher {
    pub(crate) fn new(control: ControlSender, objects: Objects, queue_capacity: usize) -> Self {
        Self {
            control,
            objects,
            state: Arc::default(),
            subscribed: Arc::new(Queue::new("subscribed", queue_capacity)),
        }
    }

    pub async fn announce(&self, namespace: &str) -> SessionResult<AnnounceSend> {
        let rx = {
            let mut st = self.state.lock();
            if st.announces.contains_key(namespace) {
                return Err(SessionError::Duplicate(format!("announce: {namespace}")));
            }
            let (tx, rx) = watch::channel(AnnounceState::Init);
            st.announces.insert(namespace.to_string(), tx);
            rx
        };

        debug!(namespace, "announcing");
        self.control
            .send(message::Announce {
                namespace: namespace.to_string(),
            })
            .await?;

        Ok(AnnounceSend {
            namespace: namespace.to_string(),
            state: rx,
        })
    }

    /// Next subscription requested by the peer. `Ok(None)` once closed.
    pub async fn subscribed(&self) -> SessionResult<Option<SubscribeRecv>> {
        self.subscribed.next().await
    }

    pub(crate) fn recv_message(&self, msg: message::Subscriber) -> SessionResult<()> {
        match msg {
            message::Subscriber::Subscribe(m) => self.recv_subscribe(m),
            message::Subscriber::Unsubscribe(_) => Err(SessionError::Unsupported("UNSUBSCRIBE")),
            message::Subscriber::AnnounceOk(m) => {
                let st = self.state.lock();
                let tx = st.announces.get(&m.namespace).ok_or_else(|| {
                    SessionError::protocol(format!(
                        "ANNOUNCE_OK for unknown announce: {}",
                        m.namespace
                    ))
                })?;
                tx.send_if_modified(|s| transition(s, AnnounceState::Ack));
                info!(namespace = %m.namespace, "announce acknowledged");
                Ok(())
            }
            message::Subscriber::AnnounceError(m) => {
                let st = self.state.lock();
                let Some(tx) = st.announces.get(&m.namespace) else {
                    warn!(namespace = %m.namespace, "ANNOUNCE_ERROR for unknown announce");
                    return Ok(());
                };
                let err = AnnounceError::Remote {
                    code: m.code,
                    reason: m.reason,
                };
                warn!(namespace = %m.namespace, %err, "announce rejected");
                tx.send_if_modified(|s| transition(s, AnnounceState::Error(err)));
                Ok(())
            }
        }
    }

    fn recv_subscribe(&self, msg: message::Subscribe) -> SessionResult<()> {
        let sub = {
            let mut st = self.state.lock();
            if st.subscribes.contains_key(&msg.id) {
                return Err(SessionError::Duplicate(format!("subscribe for id: {}", msg.id)));
            }
            let sub = SubscribeRecv {
                id: msg.id,
                namespace: msg.namespace,
                track: msg.name,
                state: Arc::new(Mutex::new(SubscribeRecvState::Init)),
                control: self.control.clone(),
                objects: self.objects.clone(),
            };
            st.subscribes.insert(msg.id, sub.clone());
            sub
        };
        debug!(id = sub.id, track = %sub.track, switch_track_id = msg.switch_track_id, "subscribe received");
        self.subscribed.push(sub);
        Ok(())
    }

    pub(crate) fn close_all(&self, err: Option<&SessionError>) {
        {
            let mut st = self.state.lock();
            st.announces.clear();
            st.subscribes.clear();
        }
        match err {
            Some(e) => self.subscribed.abort(e.clone()),
            None => self.subscribed.close(),
        }
    }
}

/// Announce state only leaves `Init` once.
fn transition(state: &mut AnnounceState, next: AnnounceState) -> bool {
    if *state != AnnounceState::Init {
        return false;
    }
    *state = next;
    true
}
