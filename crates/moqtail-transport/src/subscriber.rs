use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    control::ControlSender,
    error::{SessionError, SessionResult, SubscribeError},
    message::{self, Location},
    object::ObjectHeader,
    queue::Queue,
    transport::RecvStream,
};

/// Lifecycle of an outgoing subscription.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubscribeStatus {
    None,
    Subscribing,
    Subscribed,
    Unsubscribing,
    Unsubscribed,
}

/// One received object: its header and the unread payload stream.
pub struct ObjectStream {
    pub header: ObjectHeader,
    pub stream: RecvStream,
}

impl fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStream")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

struct SubscribeShared {
    status: Mutex<SubscribeStatus>,
    data: Queue<ObjectStream, SubscribeError>,
}

/// Handle for a subscription this side requested.
#[derive(Clone)]
pub struct SubscribeSend {
    id: u64,
    namespace: String,
    track: String,
    shared: Arc<SubscribeShared>,
    control: ControlSender,
}

impl fmt::Debug for SubscribeSend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeSend")
            .field("id", &self.id)
            .field("namespace", &self.namespace)
            .field("track", &self.track)
            .field("status", &self.status())
            .finish()
    }
}

impl SubscribeSend {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn track(&self) -> &str {
        &self.track
    }

    pub fn status(&self) -> SubscribeStatus {
        *self.shared.status.lock()
    }

    /// Next received object.
    ///
    /// `Ok(None)` after a graceful end (FIN, error code 0, RESET, local close
    /// or session close). Fails with the peer's code for any other error.
    pub async fn data(&self) -> Result<Option<ObjectStream>, SubscribeError> {
        self.shared.data.next().await
    }

    /// Send UNSUBSCRIBE. No-op once unsubscribing or unsubscribed.
    pub async fn close(&self) -> SessionResult<()> {
        {
            let mut status = self.shared.status.lock();
            if matches!(
                *status,
                SubscribeStatus::Unsubscribing | SubscribeStatus::Unsubscribed
            ) {
                return Ok(());
            }
            *status = SubscribeStatus::Unsubscribing;
        }
        debug!(id = self.id, track = %self.track, "unsubscribing");
        self.shared.data.close();
        self.control.send(message::Unsubscribe { id: self.id }).await
    }

    fn set_status(&self, status: SubscribeStatus) {
        *self.shared.status.lock() = status;
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum AnnounceRecvState {
    Ack,
    Closed,
}

/// An announcement received from the peer. Already acknowledged on arrival.
#[derive(Clone)]
pub struct AnnounceRecv {
    namespace: String,
    state: Arc<Mutex<AnnounceRecvState>>,
    control: ControlSender,
}

impl fmt::Debug for AnnounceRecv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnounceRecv")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl AnnounceRecv {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_closed(&self) -> bool {
        *self.state.lock() == AnnounceRecvState::Closed
    }

    /// Reject the announcement with ANNOUNCE_ERROR. No-op once closed.
    pub async fn close(&self, code: u64, reason: &str) -> SessionResult<()> {
        {
            let mut state = self.state.lock();
            if *state == AnnounceRecvState::Closed {
                return Ok(());
            }
            *state = AnnounceRecvState::Closed;
        }
        self.control
            .send(message::AnnounceError {
                namespace: self.namespace.clone(),
                code,
                reason: reason.to_string(),
            })
            .await
    }
}

#[derive(Default)]
struct SubscriberState {
    announces: HashMap<String, AnnounceRecv>,
    subscribes: HashMap<u64, SubscribeSend>,
    next_id: u64,
}

/// Subscriber role: consumes announcements and requests tracks.
#[derive(Clone)]
pub struct Subscriber {
    control: ControlSender,
    state: Arc<Mutex<SubscriberState>>,
    announced: Arc<Queue<AnnounceRecv, SessionError>>,
    data_capacity: usize,
}

impl Subscriber {
    pub(crate) fn new(control: ControlSender, announce_capacity: usize, data_capacity: usize) -> Self {
        Self {
            control,
            state: Arc::default(),
            announced: Arc::new(Queue::new("announced", announce_capacity)),
            data_capacity,
        }
    }

    /// Next announcement from the peer. `Ok(None)` once the session closed.
    pub async fn announced(&self) -> SessionResult<Option<AnnounceRecv>> {
        self.announced.next().await
    }

    /// Subscribe to `namespace/track` from the latest group onwards.
    ///
    /// `switch_track_id` is passed through to the peer untouched; `None`
    /// sends zero.
    pub async fn subscribe(
        &self,
        namespace: &str,
        track: &str,
        switch_track_id: Option<u64>,
    ) -> SessionResult<SubscribeSend> {
        let sub = {
            let mut st = self.state.lock();
            let id = st.next_id;
            st.next_id += 1;
            let sub = SubscribeSend {
                id,
                namespace: namespace.to_string(),
                track: track.to_string(),
                shared: Arc::new(SubscribeShared {
                    status: Mutex::new(SubscribeStatus::Subscribing),
                    data: Queue::new("subscribe", self.data_capacity),
                }),
                control: self.control.clone(),
            };
            st.subscribes.insert(id, sub.clone());
            sub
        };

        debug!(id = sub.id, namespace, track, ?switch_track_id, "subscribing");
        self.control
            .send(message::Subscribe {
                id: sub.id,
                namespace: namespace.to_string(),
                name: track.to_string(),
                start_group: Location::Latest(0),
                start_object: Location::Absolute(0),
                end_group: Location::None,
                end_object: Location::None,
                switch_track_id: switch_track_id.unwrap_or(0),
            })
            .await?;
        Ok(sub)
    }

    pub(crate) async fn recv_message(&self, msg: message::Publisher) -> SessionResult<()> {
        match msg {
            message::Publisher::Announce(m) => self.recv_announce(m).await,
            message::Publisher::Unannounce(m) => {
                self.recv_unannounce(&m);
                Ok(())
            }
            message::Publisher::SubscribeOk(m) => {
                let sub = self.get(m.id, "SUBSCRIBE_OK")?;
                sub.set_status(SubscribeStatus::Subscribed);
                debug!(id = m.id, track = %sub.track, "subscribed");
                Ok(())
            }
            message::Publisher::SubscribeReset(m) => {
                let sub = self.get(m.id, "SUBSCRIBE_RESET")?;
                info!(
                    id = m.id,
                    code = m.code,
                    reason = %m.reason,
                    final_group = m.final_group,
                    "subscription reset"
                );
                self.finish(&sub, None);
                Ok(())
            }
            message::Publisher::SubscribeError(m) => {
                let sub = self.get(m.id, "SUBSCRIBE_ERROR")?;
                let err = (m.code != 0).then_some(SubscribeError::Remote {
                    code: m.code,
                    reason: m.reason,
                });
                self.finish(&sub, err);
                Ok(())
            }
            message::Publisher::SubscribeFin(m) => {
                let sub = self.get(m.id, "SUBSCRIBE_FIN")?;
                self.finish(&sub, None);
                Ok(())
            }
        }
    }

    fn get(&self, id: u64, kind: &str) -> SessionResult<SubscribeSend> {
        self.state
            .lock()
            .subscribes
            .get(&id)
            .cloned()
            .ok_or_else(|| SessionError::protocol(format!("{kind} for unknown id: {id}")))
    }

    /// Terminal transition: close or abort the data queue and retire the id.
    fn finish(&self, sub: &SubscribeSend, err: Option<SubscribeError>) {
        sub.set_status(SubscribeStatus::Unsubscribed);
        match err {
            Some(err) => {
                warn!(id = sub.id, track = %sub.track, %err, "subscription failed");
                sub.shared.data.abort(err);
            }
            None => {
                debug!(id = sub.id, track = %sub.track, "subscription finished");
                sub.shared.data.close();
            }
        }
        self.state.lock().subscribes.remove(&sub.id);
    }

    async fn recv_announce(&self, msg: message::Announce) -> SessionResult<()> {
        if self.state.lock().announces.contains_key(&msg.namespace) {
            return Err(SessionError::Duplicate(format!(
                "announce for namespace: {}",
                msg.namespace
            )));
        }

        self.control
            .send(message::AnnounceOk {
                namespace: msg.namespace.clone(),
            })
            .await?;

        let announce = AnnounceRecv {
            namespace: msg.namespace.clone(),
            state: Arc::new(Mutex::new(AnnounceRecvState::Ack)),
            control: self.control.clone(),
        };
        info!(namespace = %msg.namespace, "announced");
        self.state
            .lock()
            .announces
            .insert(msg.namespace, announce.clone());
        self.announced.push(announce);
        Ok(())
    }

    fn recv_unannounce(&self, msg: &message::Unannounce) {
        match self.state.lock().announces.remove(&msg.namespace) {
            Some(announce) => {
                *announce.state.lock() = AnnounceRecvState::Closed;
                info!(namespace = %msg.namespace, "unannounced");
            }
            None => warn!(namespace = %msg.namespace, "UNANNOUNCE for unknown namespace"),
        }
    }

    /// Route an incoming object stream to its subscription.
    pub(crate) fn recv_object(&self, header: ObjectHeader, stream: RecvStream) {
        let Some(sub) = self.state.lock().subscribes.get(&header.track).cloned() else {
            warn!(track = header.track, group = header.group, "object for unknown subscription, dropping");
            return;
        };
        if !sub.shared.data.push(ObjectStream { header, stream }) {
            debug!(id = sub.id, "object after close, dropping");
        }
    }

    /// Session ended: wake every pending reader.
    pub(crate) fn close_all(&self, err: Option<&SessionError>) {
        let subs: Vec<_> = {
            let mut st = self.state.lock();
            st.subscribes.drain().map(|(_, s)| s).collect()
        };
        for sub in subs {
            sub.set_status(SubscribeStatus::Unsubscribed);
            match err {
                Some(e) => sub.shared.data.abort(SubscribeError::Session(e.clone())),
                None => sub.shared.data.close(),
            }
        }
        match err {
            Some(e) => self.announced.abort(e.clone()),
            None => self.announced.close(),
        }
    }
}
