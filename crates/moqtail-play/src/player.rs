//! Playback orchestration.
//!
//! A [`Player`] owns one session. After [`Player::start`] it runs, per
//! selected track, an init loop and a fetch loop, plus a single playout loop
//! that drains the current track buffers into the decode worker. Skip and
//! throughput reports feed the ABR controller, whose decisions come back in
//! as video track switches.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use moqtail_abr::{AbrController, AbrDecision, AbrReason, Variant};
use moqtail_events::{AbrEvent, EventBus, EventStream, PlayerEvent, SkipEvent, Stat};
use moqtail_media::{Catalog, MeteredReader, ThroughputMeter, Track};
use moqtail_transport::{ObjectStream, RecvStream, Session, SubscribeSend, Transport};
use parking_lot::Mutex;
use tokio::{
    io::AsyncReadExt,
    sync::{broadcast, mpsc, watch},
    time::MissedTickBehavior,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, trace, warn};
use web_time::Instant;

use crate::{
    buffer::TrackBuffer,
    config::{PlayerConfig, ProbeOptions},
    error::{PlayResult, PlayerError},
    pacing::{Pacer, quantize_latency_target},
    probe::probe,
    renderer::{FrameDecoder, FrameSink, Renderer, RendererEvent},
    stats::PlaybackStats,
    types::{BufferedSegment, MediaKind, Segment, segment_id},
};

struct PlayState {
    video: Option<Track>,
    audio: Option<Track>,
    /// Video track being fetched until it has buffered enough to take over.
    next_video: Option<Track>,
    /// Keyed by data track.
    buffers: HashMap<String, Arc<TrackBuffer>>,
    /// Subscription id per data track.
    subscriptions: HashMap<String, u64>,
    /// Init tracks already requested.
    inits: HashSet<String>,
    pacer: Pacer,
    latency: Option<Duration>,
}

struct Inner {
    config: PlayerConfig,
    session: Session,
    catalog: Catalog,
    variants: Vec<Variant>,
    renderer: Renderer,
    renderer_events: Mutex<Option<mpsc::UnboundedReceiver<RendererEvent>>>,
    bus: EventBus,
    meter: ThroughputMeter,
    abr: Mutex<AbrController>,
    state: Mutex<PlayState>,
    stats: Mutex<PlaybackStats>,
    cancel: CancellationToken,
    /// Init, fetch and payload read tasks.
    tracks: TaskTracker,
    /// `Some` once closed, holding the closing error.
    closed: watch::Sender<Option<Option<PlayerError>>>,
}

/// Low-latency MOQ player.
///
/// Cloning yields another handle to the same player.
#[derive(Clone)]
pub struct Player {
    inner: Arc<Inner>,
}

impl Player {
    /// Open a session over `transport` and fetch the catalog.
    pub async fn create(
        config: PlayerConfig,
        transport: Arc<dyn Transport>,
        decoder: Arc<dyn FrameDecoder>,
        sink: Arc<dyn FrameSink>,
    ) -> PlayResult<Self> {
        let session = Session::connect(transport, config.session.clone()).await?;
        Self::with_session(config, session, decoder, sink).await
    }

    /// Fetch the catalog over an existing session.
    ///
    /// On failure the session is closed.
    pub async fn with_session(
        config: PlayerConfig,
        session: Session,
        decoder: Arc<dyn FrameDecoder>,
        sink: Arc<dyn FrameSink>,
    ) -> PlayResult<Self> {
        match Self::prepare(config, &session, decoder, sink).await {
            Ok(player) => Ok(player),
            Err(e) => {
                warn!(error = %e, "player setup failed");
                session.close(None);
                Err(e)
            }
        }
    }

    async fn prepare(
        config: PlayerConfig,
        session: &Session,
        decoder: Arc<dyn FrameDecoder>,
        sink: Arc<dyn FrameSink>,
    ) -> PlayResult<Self> {
        let target = quantize_latency_target(config.latency_target.as_secs_f64(), config.group_duration)?;
        let catalog = Catalog::fetch(session.subscriber(), &config.namespace).await?;
        if catalog.tracks().is_empty() {
            return Err(PlayerError::NoTracks);
        }

        let variants = catalog
            .video_tracks()
            .filter_map(|t| t.bit_rate.map(|bps| Variant::new(t.data_track.clone(), bps)))
            .collect();
        let cancel = config
            .cancel
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token);
        let (renderer, renderer_events) =
            Renderer::spawn(decoder, sink, &config.renderer, cancel.child_token());
        let bus = config
            .bus
            .clone()
            .unwrap_or_else(|| EventBus::new(config.event_capacity));

        info!(
            namespace = %config.namespace,
            tracks = catalog.tracks().len(),
            latency_target = ?target,
            "player ready"
        );

        let inner = Inner {
            session: session.clone(),
            variants,
            renderer,
            renderer_events: Mutex::new(Some(renderer_events)),
            bus,
            meter: ThroughputMeter::new(&config.throughput),
            abr: Mutex::new(AbrController::new(config.abr.clone())),
            state: Mutex::new(PlayState {
                video: None,
                audio: None,
                next_video: None,
                buffers: HashMap::new(),
                subscriptions: HashMap::new(),
                inits: HashSet::new(),
                pacer: Pacer::new(target, config.group_duration),
                latency: None,
            }),
            stats: Mutex::new(PlaybackStats::default()),
            cancel,
            tracks: TaskTracker::new(),
            closed: watch::channel(None).0,
            catalog,
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Begin playback with the first video and first audio track of the
    /// catalog. Calling it again has no effect.
    ///
    /// The player closes by itself once every track loop has ended.
    pub fn start(&self) {
        let inner = &self.inner;
        let Some(renderer_events) = inner.renderer_events.lock().take() else {
            warn!("player already started");
            return;
        };

        let video = inner.catalog.video_tracks().next().cloned();
        let audio = inner.catalog.audio_tracks().next().cloned();
        {
            let mut st = inner.state.lock();
            st.video.clone_from(&video);
            st.audio.clone_from(&audio);
        }
        if let Some(track) = &video {
            inner.renderer.set_video_track(track.clone());
        }
        info!(
            video = video.as_ref().map(|t| t.data_track.as_str()),
            audio = audio.as_ref().map(|t| t.data_track.as_str()),
            "starting playback"
        );
        for track in video.into_iter().chain(audio) {
            inner.spawn_track(track);
        }

        tokio::spawn(Arc::clone(inner).run_playout());
        tokio::spawn(Arc::clone(inner).run_renderer_events(renderer_events));
        match inner.config.probe.clone() {
            Some(options) => tokio::spawn(Arc::clone(inner).run_probe(options)),
            None => tokio::spawn(Arc::clone(inner).run_throughput()),
        };
        tokio::spawn(Arc::clone(inner).run_abr_prune());
        tokio::spawn(Arc::clone(inner).watch_session());

        let this = Arc::clone(inner);
        tokio::spawn(async move {
            this.tracks.close();
            this.tracks.wait().await;
            debug!("all track loops ended");
            this.close(None);
        });
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn current_video_track(&self) -> Option<Track> {
        self.inner.state.lock().video.clone()
    }

    pub fn current_audio_track(&self) -> Option<Track> {
        self.inner.state.lock().audio.clone()
    }

    /// Video track waiting to take over, if any.
    pub fn pending_video_track(&self) -> Option<Track> {
        self.inner.state.lock().next_video.clone()
    }

    /// Start fetching `track` and switch to it once it has buffered enough.
    ///
    /// Returns `false` when the track already plays or another switch is
    /// pending.
    pub fn select_video_track(&self, track: &Track) -> PlayResult<bool> {
        self.inner.select_video_track(track)
    }

    /// Change the end-to-end latency target. The value is rounded up to
    /// whole groups; the rounded target is returned.
    pub fn set_latency_target(&self, seconds: f64) -> PlayResult<Duration> {
        let target = quantize_latency_target(seconds, self.inner.config.group_duration)?;
        self.inner.state.lock().pacer.set_target(target);
        info!(?target, "latency target set");
        Ok(target)
    }

    pub fn latency_target(&self) -> Duration {
        self.inner.state.lock().pacer.target()
    }

    /// Enable, disable (`Some`) or flip (`None`) ABR. Returns the new state.
    pub fn toggle_abr(&self, enabled: Option<bool>) -> bool {
        let enabled = self.inner.abr.lock().toggle(enabled);
        self.inner.bus.publish(AbrEvent::Toggled { enabled });
        enabled
    }

    pub fn is_abr_enabled(&self) -> bool {
        self.inner.abr.lock().is_enabled()
    }

    /// Drop throughput samples gathered so far.
    pub fn reset_bandwidth_measurement(&self) {
        self.inner.meter.reset();
    }

    /// Milliseconds the server clock runs ahead of the local one.
    pub fn set_server_time_offset(&self, offset_ms: f64) {
        self.inner.renderer.set_server_time_offset(offset_ms);
    }

    pub fn stats(&self) -> PlaybackStats {
        self.inner.stats.lock().clone()
    }

    /// Events from now on, ending with [`PlayerEvent::Closed`].
    pub fn events(&self) -> EventStream {
        self.inner.bus.events()
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Stop playback and close the session. First close wins.
    pub fn close(&self, err: Option<PlayerError>) {
        self.inner.close(err);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.borrow().is_some()
    }

    /// Wait for the player to close. Returns the error that closed it, if
    /// any.
    pub async fn closed(&self) -> Option<PlayerError> {
        let mut rx = self.inner.closed.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(state) => state.clone().flatten(),
            Err(_) => Some(PlayerError::Closed),
        }
    }
}

impl Inner {
    fn close(&self, err: Option<PlayerError>) {
        let first = self.closed.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(err.clone());
            true
        });
        if !first {
            return;
        }

        match &err {
            Some(e) => warn!(error = %e, "player closed with error"),
            None => info!("player closed"),
        }
        self.cancel.cancel();
        self.renderer.close();
        self.session.close(None);
        let delivered = self.bus.publish(PlayerEvent::Closed {
            error: err.map(|e| e.to_string()),
        });
        debug!(delivered, "close announced");
    }

    fn select_video_track(self: &Arc<Self>, track: &Track) -> PlayResult<bool> {
        let Some(track) = self.catalog.by_data_track(&track.data_track).cloned() else {
            return Err(PlayerError::UnknownTrack(track.data_track.clone()));
        };
        if !track.is_video() {
            return Err(PlayerError::NotVideo(track.data_track));
        }
        if self.cancel.is_cancelled() {
            return Err(PlayerError::Closed);
        }
        {
            let mut st = self.state.lock();
            if let Some(next) = &st.next_video {
                debug!(pending = %next.data_track, requested = %track.data_track, "switch already pending");
                return Ok(false);
            }
            if st.video.as_ref().is_some_and(|v| v.data_track == track.data_track) {
                debug!(track = %track.data_track, "track already playing");
                return Ok(false);
            }
            st.next_video = Some(track.clone());
        }
        info!(track = %track.data_track, "fetching next video track");
        self.spawn_track(track);
        Ok(true)
    }

    fn spawn_track(self: &Arc<Self>, track: Track) {
        let needs_init = self.state.lock().inits.insert(track.init_track.clone());
        if needs_init {
            let this = Arc::clone(self);
            let init = track.clone();
            self.tracks.spawn(async move {
                if let Err(e) = this.run_init(&init).await {
                    warn!(track = %init.init_track, error = %e, "init track failed");
                    this.state.lock().inits.remove(&init.init_track);
                }
            });
        }
        let this = Arc::clone(self);
        self.tracks.spawn(this.run_track(track));
    }

    async fn run_init(&self, track: &Track) -> PlayResult<()> {
        let sub = self
            .session
            .subscriber()
            .subscribe(&self.config.namespace, &track.init_track, None)
            .await?;
        let data = tokio::select! {
            () = self.cancel.cancelled() => Ok(None),
            data = read_init(&sub, &track.init_track) => data.map(Some),
        };
        if let Err(e) = sub.close().await {
            debug!(track = %track.init_track, error = %e, "init unsubscribe failed");
        }
        if let Some(data) = data? {
            debug!(track = %track.init_track, bytes = data.len(), "init segment received");
            self.renderer.init(&track.init_track, data);
        }
        Ok(())
    }

    async fn run_track(self: Arc<Self>, track: Track) {
        let kind = MediaKind::of(&track);
        let switch_from = self.switch_from(&track, kind);
        let subscribed = self
            .session
            .subscriber()
            .subscribe(&self.config.namespace, &track.data_track, switch_from)
            .await;
        let sub = match subscribed {
            Ok(sub) => sub,
            Err(e) => {
                warn!(track = %track.data_track, error = %e, "subscribe failed");
                self.finish_track(&track);
                return;
            }
        };

        let buffer = {
            let mut st = self.state.lock();
            st.subscriptions.insert(track.data_track.clone(), sub.id());
            Arc::clone(st.buffers.entry(track.data_track.clone()).or_default())
        };
        info!(track = %track.data_track, %kind, id = sub.id(), ?switch_from, "track started");

        if let Err(e) = self.fetch(&track, kind, &sub, &buffer).await {
            warn!(track = %track.data_track, error = %e, "track failed");
        }
        if let Err(e) = sub.close().await {
            debug!(track = %track.data_track, error = %e, "unsubscribe failed");
        }
        self.finish_track(&track);
    }

    /// Subscription id of the video track being replaced, when configured.
    fn switch_from(&self, track: &Track, kind: MediaKind) -> Option<u64> {
        if kind != MediaKind::Video || !self.config.switch_track_id {
            return None;
        }
        let st = self.state.lock();
        st.video
            .as_ref()
            .filter(|v| v.data_track != track.data_track)
            .and_then(|v| st.subscriptions.get(&v.data_track).copied())
    }

    async fn fetch(
        &self,
        track: &Track,
        kind: MediaKind,
        sub: &SubscribeSend,
        buffer: &Arc<TrackBuffer>,
    ) -> PlayResult<()> {
        let mut switch_check = tokio::time::interval(self.config.switch_poll_interval.max(Duration::from_millis(1)));
        switch_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failed = 0;
        // Consecutive payload reads that failed after the object arrived.
        let failed_payloads = Arc::new(AtomicU32::new(0));

        loop {
            let object = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(()),
                object = sub.data() => object?,
                _ = switch_check.tick(), if kind == MediaKind::Video => {
                    if self.try_switch(track) {
                        return Ok(());
                    }
                    continue;
                }
            };

            let Some(object) = object else {
                failed += 1;
                if reads_exhausted(failed, &failed_payloads, self.config.max_failed_reads) {
                    info!(track = %track.data_track, failed, "track ended");
                    return Ok(());
                }
                continue;
            };
            failed = 0;
            if reads_exhausted(0, &failed_payloads, self.config.max_failed_reads) {
                warn!(
                    track = %track.data_track,
                    failed_payloads = failed_payloads.load(Ordering::Relaxed),
                    "too many failed object reads, track ended"
                );
                return Ok(());
            }
            self.on_object(track, kind, object, buffer, &failed_payloads);

            if kind == MediaKind::Video && self.try_switch(track) {
                return Ok(());
            }
        }
    }

    fn on_object(
        &self,
        track: &Track,
        kind: MediaKind,
        object: ObjectStream,
        buffer: &Arc<TrackBuffer>,
        failed_payloads: &Arc<AtomicU32>,
    ) {
        let ObjectStream { header, stream } = object;
        let id = segment_id(&header);
        trace!(track = %track.data_track, segment = %id, "object received");

        let mut stream: RecvStream = if self.config.probe.is_none() {
            Box::new(MeteredReader::new(stream, self.meter.clone()).with_segment(id))
        } else {
            stream
        };

        if self.state.lock().pacer.is_live_edge() {
            self.renderer.segment(Segment {
                init: track.init_track.clone(),
                data: track.data_track.clone(),
                kind,
                header,
                stream,
            });
            return;
        }

        let buffer = Arc::clone(buffer);
        let init = track.init_track.clone();
        let data = track.data_track.clone();
        let cancel = self.cancel.clone();
        let failed_payloads = Arc::clone(failed_payloads);
        self.tracks.spawn(async move {
            let mut payload = Vec::new();
            let read = tokio::select! {
                () = cancel.cancelled() => return,
                read = stream.read_to_end(&mut payload) => read,
            };
            if let Err(e) = read {
                let failed = failed_payloads.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(track = %data, group = header.group, failed, error = %e, "object read failed");
                return;
            }
            failed_payloads.store(0, Ordering::Relaxed);
            buffer.push(BufferedSegment {
                init,
                data,
                kind,
                header,
                payload: Bytes::from(payload),
            });
        });
    }

    /// Commit a pending switch once the next track has buffered a full
    /// latency target. Returns `true` when the fetch loop of `track` should
    /// stop.
    fn try_switch(&self, track: &Track) -> bool {
        let next = {
            let mut st = self.state.lock();
            let Some(next) = st.next_video.clone() else {
                return false;
            };
            let is_next = next.data_track == track.data_track;
            let is_current = st.video.as_ref().is_some_and(|v| v.data_track == track.data_track);
            if is_next {
                // The previous track is gone; take over right away.
                if st.video.is_some() {
                    return false;
                }
            } else if !is_current {
                return true;
            } else {
                let needed = st.pacer.target_groups();
                let ready = st.pacer.is_live_edge()
                    || st
                        .buffers
                        .get(&next.data_track)
                        .is_some_and(|b| b.len() >= needed);
                if !ready {
                    return false;
                }
            }
            st.video = Some(next.clone());
            st.next_video = None;
            st.pacer.reset();
            next
        };

        info!(from = %track.data_track, to = %next.data_track, "video track switched");
        let stop = next.data_track != track.data_track;
        self.renderer.set_video_track(next);
        stop
    }

    fn finish_track(&self, track: &Track) {
        let mut st = self.state.lock();
        st.subscriptions.remove(&track.data_track);
        if let Some(buffer) = st.buffers.remove(&track.data_track) {
            buffer.clear();
        }
        let owns = |t: &Option<Track>| t.as_ref().is_some_and(|t| t.data_track == track.data_track);
        if owns(&st.video) {
            st.video = None;
        }
        if owns(&st.audio) {
            st.audio = None;
        }
        if owns(&st.next_video) {
            st.next_video = None;
        }
        debug!(track = %track.data_track, "track finished");
    }

    /// Drains the current buffers into the decode worker, paced by the
    /// current video buffer (audio when there is no video).
    async fn run_playout(self: Arc<Self>) {
        loop {
            let wait = {
                let mut st = self.state.lock();
                let buffered = st
                    .video
                    .as_ref()
                    .or(st.audio.as_ref())
                    .and_then(|t| st.buffers.get(&t.data_track))
                    .map_or(0, |b| b.len());
                let latency = st.latency;
                (buffered > 0).then(|| st.pacer.next_wait(buffered, latency))
            };

            let Some(wait) = wait else {
                if !self.pause(self.config.buffer_poll_interval).await {
                    break;
                }
                continue;
            };
            if !wait.is_zero() && !self.pause(wait).await {
                break;
            }
            self.release_segments();
        }
        debug!("playout loop stopped");
    }

    fn release_segments(&self) {
        let buffers: Vec<_> = {
            let st = self.state.lock();
            [&st.video, &st.audio]
                .into_iter()
                .flatten()
                .filter_map(|t| st.buffers.get(&t.data_track).cloned())
                .collect()
        };
        for buffer in buffers {
            if let Some(segment) = buffer.pop() {
                trace!(track = %segment.data, group = segment.header.group, "segment released");
                self.renderer.segment(segment.into_segment());
            }
        }
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }

    async fn run_renderer_events(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<RendererEvent>) {
        loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else { break };
            match event {
                RendererEvent::Stat(stat) => self.on_stat(stat),
                RendererEvent::Skip(skip) => self.on_skip(skip),
                RendererEvent::TrackId(track) => {
                    info!(%track, "video track on screen");
                    self.bus.publish(PlayerEvent::TrackChange { track });
                }
                RendererEvent::Error(e) => {
                    self.close(Some(e.into()));
                    break;
                }
            }
        }
    }

    fn on_stat(&self, stat: Stat) {
        if let Stat::Latency { seconds } = stat {
            self.state.lock().latency = Duration::try_from_secs_f64(seconds.max(0.0)).ok();
        }
        self.stats.lock().on_stat(&stat);
        self.bus.publish(stat);
    }

    fn on_skip(self: &Arc<Self>, skip: SkipEvent) {
        debug!(
            kind = skip.kind.as_str(),
            track = %skip.skipped.track,
            group = skip.skipped.sequence,
            duration = skip.duration,
            "group skipped"
        );
        self.stats.lock().on_skip(&skip);
        self.bus.publish(skip.clone());

        let Some(current) = self.current_video() else {
            return;
        };
        let decision = self.abr.lock().on_skip(
            &skip.skipped.track,
            &skip.current.track,
            &current,
            &self.variants,
            Instant::now(),
        );
        if decision.reason == AbrReason::Congestion {
            self.meter.reset();
            self.bus.publish(AbrEvent::Congestion {
                track: current.clone(),
            });
        }
        self.apply(&current, decision);
    }

    fn on_bandwidth(self: &Arc<Self>, kbps: f64) {
        let stat = Stat::MeasuredBandwidth { kbps };
        self.stats.lock().on_stat(&stat);
        self.bus.publish(stat);

        let Some(current) = self.current_video() else {
            return;
        };
        let decision = self
            .abr
            .lock()
            .on_throughput(kbps, &current, &self.variants, Instant::now());
        self.apply(&current, decision);
    }

    fn current_video(&self) -> Option<String> {
        self.state.lock().video.as_ref().map(|t| t.data_track.clone())
    }

    fn apply(self: &Arc<Self>, current: &str, decision: AbrDecision) {
        if !decision.changed {
            return;
        }
        let Some(track) = self.catalog.by_data_track(&decision.target).cloned() else {
            warn!(target = %decision.target, "ABR picked a track missing from the catalog");
            return;
        };
        match self.select_video_track(&track) {
            Ok(true) => {
                self.stats.lock().on_switch();
                self.bus.publish(AbrEvent::Switched {
                    from: current.to_string(),
                    to: decision.target,
                    reason: decision.reason,
                });
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "ABR switch rejected"),
        }
    }

    async fn run_throughput(self: Arc<Self>) {
        let mut measurements = self.meter.subscribe();
        loop {
            let measured = tokio::select! {
                () = self.cancel.cancelled() => break,
                measured = measurements.recv() => measured,
            };
            match measured {
                Ok(m) => {
                    trace!(kbps = m.kbps, segment = %m.segment, "throughput");
                    self.on_bandwidth(m.kbps);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => debug!(n, "throughput measurements lagged"),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn run_probe(self: Arc<Self>, options: ProbeOptions) {
        let mut tick = tokio::time::interval(options.interval.max(Duration::from_millis(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let probed = tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = tick.tick() => {
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        probed = probe(self.session.subscriber(), &self.config.namespace, &options) => probed,
                    }
                }
            };
            match probed {
                Ok(Some(kbps)) => {
                    debug!(kbps, "probe measured");
                    self.on_bandwidth(kbps);
                }
                Ok(None) => debug!("probe returned no data"),
                Err(e) => warn!(error = %e, "probe failed"),
            }
        }
    }

    async fn run_abr_prune(self: Arc<Self>) {
        let period = self.config.abr.history_horizon().max(Duration::from_millis(100));
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = tick.tick() => self.abr.lock().prune(Instant::now()),
            }
        }
    }

    async fn watch_session(self: Arc<Self>) {
        let err = tokio::select! {
            () = self.cancel.cancelled() => None,
            err = self.session.closed() => err,
        };
        self.close(err.map(PlayerError::from));
    }
}

/// Empty data reads and failed payload reads share the retry bound.
fn reads_exhausted(empty: u32, failed_payloads: &AtomicU32, max: u32) -> bool {
    empty.saturating_add(failed_payloads.load(Ordering::Relaxed)) > max
}

async fn read_init(sub: &SubscribeSend, name: &str) -> PlayResult<Bytes> {
    let Some(mut object) = sub.data().await? else {
        return Err(PlayerError::NoInitData(name.to_string()));
    };
    let mut data = Vec::new();
    if let Err(e) = object.stream.read_to_end(&mut data).await {
        warn!(track = name, error = %e, "init read failed");
        return Err(PlayerError::NoInitData(name.to_string()));
    }
    Ok(Bytes::from(data))
}
