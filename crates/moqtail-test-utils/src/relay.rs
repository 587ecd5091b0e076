//! Scripted relay for player and session tests.
//!
//! Speaks the control protocol directly instead of going through
//! [`moqtail_transport::Publisher`], so it can answer UNSUBSCRIBE the way a
//! real relay does.

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use moqtail_media::{CATALOG_TRACK, Catalog, Track};
use moqtail_transport::{
    ControlReceiver, ControlSender, ObjectHeader, Objects, SessionError, SessionResult, Transport,
    message::{self, Message},
};
use parking_lot::Mutex;
use tokio::{io::AsyncWriteExt, sync::Notify, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    fixtures::{init_segment, media_segment, unix_now_ms},
    transport::MemoryTransport,
};

/// Delay between the last group of a finite live track and its
/// SUBSCRIBE_FIN, so trailing object streams are routed first.
const FIN_DELAY: Duration = Duration::from_millis(200);

/// What the relay serves for one track name.
#[derive(Clone, Debug)]
pub enum TrackContent {
    /// One object per group, sent right after SUBSCRIBE_OK. The
    /// subscription then stays open until the client leaves.
    Static(Vec<Bytes>),
    Live(LiveTrack),
}

/// A new CMAF group every `interval`.
#[derive(Clone, Debug)]
pub struct LiveTrack {
    pub interval: Duration,
    /// `mdat` size per group.
    pub payload_len: usize,
    pub first_group: u64,
    /// Groups before SUBSCRIBE_FIN. `None` runs until unsubscribed.
    pub groups: Option<u64>,
}

impl LiveTrack {
    pub fn new(interval: Duration, payload_len: usize) -> Self {
        Self {
            interval,
            payload_len,
            first_group: 1,
            groups: None,
        }
    }

    pub fn with_first_group(mut self, group: u64) -> Self {
        self.first_group = group;
        self
    }

    pub fn with_groups(mut self, groups: u64) -> Self {
        self.groups = Some(groups);
        self
    }
}

#[derive(Default)]
struct RelayLog {
    subscribes: Mutex<Vec<message::Subscribe>>,
    unsubscribes: Mutex<Vec<u64>>,
    changed: Notify,
}

impl RelayLog {
    fn subscribed(&self, req: message::Subscribe) {
        self.subscribes.lock().push(req);
        self.changed.notify_waiters();
    }

    fn unsubscribed(&self, id: u64) {
        self.unsubscribes.lock().push(id);
        self.changed.notify_waiters();
    }
}

pub struct FakeRelayBuilder {
    namespace: String,
    tracks: HashMap<String, TrackContent>,
}

impl FakeRelayBuilder {
    /// Serve `catalog` on the catalog track.
    pub fn catalog(self, catalog: &Catalog) -> Self {
        let raw = catalog.encode().expect("catalog encodes");
        self.track(CATALOG_TRACK, TrackContent::Static(vec![Bytes::from(raw)]))
    }

    /// Serve the init segment and live groups of a catalog track.
    pub fn media(self, track: &Track, live: LiveTrack) -> Self {
        self.track(
            &track.init_track,
            TrackContent::Static(vec![init_segment(&track.codec)]),
        )
        .track(&track.data_track, TrackContent::Live(live))
    }

    pub fn track(mut self, name: &str, content: TrackContent) -> Self {
        self.tracks.insert(name.to_string(), content);
        self
    }

    /// Start serving. Must be called inside a tokio runtime.
    pub fn spawn(self) -> FakeRelay {
        let (client, relay) = MemoryTransport::pair();
        let log = Arc::new(RelayLog::default());
        let task = tokio::spawn({
            let relay = Arc::clone(&relay);
            let log = Arc::clone(&log);
            async move {
                if let Err(e) = run(Arc::clone(&relay), self.namespace, self.tracks, log).await {
                    warn!(error = %e, "relay failed");
                    relay.close(1, &e.to_string());
                }
            }
        });
        FakeRelay {
            client,
            relay,
            log,
            task,
        }
    }
}

/// In-process relay for one namespace.
///
/// Subscriptions to other namespaces are held without an answer, as if the
/// namespace was never announced. Unknown tracks get SUBSCRIBE_ERROR 404.
/// `.probe:{size}:{priority}` tracks return one object of `size` bytes.
pub struct FakeRelay {
    client: Arc<MemoryTransport>,
    relay: Arc<MemoryTransport>,
    log: Arc<RelayLog>,
    task: tokio::task::JoinHandle<()>,
}

impl FakeRelay {
    pub fn builder(namespace: &str) -> FakeRelayBuilder {
        FakeRelayBuilder {
            namespace: namespace.to_string(),
            tracks: HashMap::new(),
        }
    }

    /// The client end of the connection.
    pub fn transport(&self) -> Arc<MemoryTransport> {
        Arc::clone(&self.client)
    }

    pub fn subscribes(&self) -> Vec<message::Subscribe> {
        self.log.subscribes.lock().clone()
    }

    /// Subscription ids the client unsubscribed from.
    pub fn unsubscribes(&self) -> Vec<u64> {
        self.log.unsubscribes.lock().clone()
    }

    /// Wait for a SUBSCRIBE to `track`.
    pub async fn wait_for_subscribe(&self, track: &str) -> message::Subscribe {
        loop {
            let notified = self.log.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(req) = self.log.subscribes.lock().iter().find(|s| s.name == track) {
                return req.clone();
            }
            notified.await;
        }
    }

    /// Wait for an UNSUBSCRIBE of subscription `id`.
    pub async fn wait_for_unsubscribe(&self, id: u64) {
        loop {
            let notified = self.log.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.log.unsubscribes.lock().contains(&id) {
                return;
            }
            notified.await;
        }
    }

    /// Hang up the connection.
    pub fn close(&self) {
        self.relay.close(0, "relay closed");
    }
}

impl Drop for FakeRelay {
    fn drop(&mut self) {
        self.task.abort();
        self.relay.close(0, "relay dropped");
    }
}

type Active = Arc<Mutex<HashMap<u64, CancellationToken>>>;

async fn run(
    transport: Arc<MemoryTransport>,
    namespace: String,
    tracks: HashMap<String, TrackContent>,
    log: Arc<RelayLog>,
) -> SessionResult<()> {
    let (send, recv) = transport.control().await?;
    let control = ControlSender::new(send);
    let mut inbox = ControlReceiver::new(recv);
    let objects = Objects::new(Arc::clone(&transport) as Arc<dyn Transport>);
    let active: Active = Arc::default();
    let mut serving = JoinSet::new();

    loop {
        let msg = tokio::select! {
            () = transport.closed() => break,
            msg = inbox.recv() => msg?,
        };
        let Some(msg) = msg else { break };

        match msg {
            Message::Subscribe(req) => {
                debug!(id = req.id, namespace = %req.namespace, track = %req.name, "relay: subscribe");
                log.subscribed(req.clone());
                if req.namespace != namespace {
                    continue;
                }
                let Some(content) = tracks
                    .get(&req.name)
                    .cloned()
                    .or_else(|| probe_content(&req.name))
                else {
                    control
                        .send(message::SubscribeError {
                            id: req.id,
                            code: 404,
                            reason: format!("unknown track {}", req.name),
                        })
                        .await?;
                    continue;
                };
                control.send(message::SubscribeOk { id: req.id }).await?;

                let cancel = CancellationToken::new();
                active.lock().insert(req.id, cancel.clone());
                serving.spawn(serve(
                    req.id,
                    content,
                    objects.clone(),
                    control.clone(),
                    Arc::clone(&active),
                    cancel,
                ));
            }
            Message::Unsubscribe(m) => {
                debug!(id = m.id, "relay: unsubscribe");
                log.unsubscribed(m.id);
                let stopped = active.lock().remove(&m.id);
                if let Some(cancel) = stopped {
                    cancel.cancel();
                    control.send(message::SubscribeFin { id: m.id }).await?;
                }
            }
            other => debug!(kind = other.name(), "relay: ignoring message"),
        }
    }
    Ok(())
}

fn probe_content(track: &str) -> Option<TrackContent> {
    let size: usize = track.strip_prefix(".probe:")?.split(':').next()?.parse().ok()?;
    Some(TrackContent::Static(vec![Bytes::from(vec![0; size])]))
}

async fn serve(
    id: u64,
    content: TrackContent,
    objects: Objects,
    control: ControlSender,
    active: Active,
    cancel: CancellationToken,
) {
    let finished = match content {
        TrackContent::Static(payloads) => {
            for (group, payload) in (0..).zip(payloads) {
                send_object(&objects, header(id, group), payload);
            }
            false
        }
        TrackContent::Live(live) => serve_live(id, &live, &objects, &cancel).await,
    };
    if !finished {
        return;
    }

    tokio::select! {
        () = cancel.cancelled() => return,
        () = tokio::time::sleep(FIN_DELAY) => {}
    }
    if active.lock().remove(&id).is_none() {
        return;
    }
    if let Err(e) = control.send(message::SubscribeFin { id }).await {
        debug!(id, error = %e, "relay: fin failed");
    }
}

/// Returns `true` once every configured group went out.
async fn serve_live(id: u64, live: &LiveTrack, objects: &Objects, cancel: &CancellationToken) -> bool {
    let mut tick = tokio::time::interval(live.interval.max(Duration::from_millis(1)));
    let mut sent = 0;
    loop {
        if live.groups.is_some_and(|n| sent >= n) {
            return true;
        }
        tokio::select! {
            () = cancel.cancelled() => return false,
            _ = tick.tick() => {}
        }
        let group = live.first_group + sent;
        let now = unix_now_ms();
        let header = ObjectHeader {
            ntp_timestamp: Some(now),
            ..header(id, group)
        };
        send_object(objects, header, media_segment(now, group, live.payload_len));
        sent += 1;
    }
}

fn header(id: u64, group: u64) -> ObjectHeader {
    ObjectHeader {
        track: id,
        group,
        object: 0,
        ntp_timestamp: Some(unix_now_ms()),
        ..Default::default()
    }
}

/// Each object goes out on its own task so a slow reader only holds up its
/// own stream.
fn send_object(objects: &Objects, header: ObjectHeader, payload: Bytes) {
    let objects = objects.clone();
    tokio::spawn(async move {
        let group = header.group;
        if let Err(e) = write_object(&objects, &header, &payload).await {
            debug!(track = header.track, group, error = %e, "relay: object write failed");
        }
    });
}

async fn write_object(objects: &Objects, header: &ObjectHeader, payload: &[u8]) -> SessionResult<()> {
    let mut stream = objects.send(header).await?;
    stream
        .write_all(payload)
        .await
        .map_err(SessionError::transport)?;
    stream.shutdown().await.map_err(SessionError::transport)
}
