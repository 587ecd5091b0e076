use std::collections::VecDeque;

use tracing::{debug, info};
use web_time::Instant;

use super::{AbrOptions, AbrSignal, SignalKind, Variant};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AbrReason {
    /// ABR toggled off.
    Disabled,
    /// Still inside the startup delay.
    Startup,
    /// Cool-off after a previous switch or congestion event.
    CoolOff,
    /// Skip did not concern the playing track.
    OtherTrack,
    /// Current bitrate unknown.
    NoBitrate,
    /// Signal recorded, threshold not reached yet.
    Debouncing,
    /// Sample inside the hysteresis band.
    WithinBand,
    /// Threshold reached but no rendition qualifies.
    NoCandidate,
    /// Skip threshold reached. Bandwidth measurement must be reset.
    Congestion,
    UpSwitch,
    DownSwitch,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AbrDecision {
    pub target: String,
    pub reason: AbrReason,
    pub changed: bool,
}

impl AbrDecision {
    fn keep(current: &str, reason: AbrReason) -> Self {
        Self {
            target: current.to_string(),
            reason,
            changed: false,
        }
    }

    fn switch(current: &str, target: &Variant, reason: AbrReason) -> Self {
        Self {
            target: target.track.clone(),
            reason,
            changed: target.track != current,
        }
    }
}

/// Skip- and throughput-driven rendition selection.
///
/// Time is always passed in by the caller so the controller stays
/// deterministic under test.
pub struct AbrController {
    cfg: AbrOptions,
    enabled: bool,
    initialized_at: Option<Instant>,
    last_congestion_at: Option<Instant>,
    last_switch_at: Option<Instant>,
    history: VecDeque<AbrSignal>,
}

impl AbrController {
    #[must_use]
    pub fn new(cfg: AbrOptions) -> Self {
        Self {
            enabled: cfg.enabled,
            cfg,
            initialized_at: None,
            last_congestion_at: None,
            last_switch_at: None,
            history: VecDeque::new(),
        }
    }

    pub fn options(&self) -> &AbrOptions {
        &self.cfg
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Flip or set the enabled toggle. Returns the new state.
    pub fn toggle(&mut self, enabled: Option<bool>) -> bool {
        self.enabled = enabled.unwrap_or(!self.enabled);
        info!(enabled = self.enabled, "ABR toggled");
        self.enabled
    }

    /// Enabled and past the startup delay.
    pub fn is_active(&self, now: Instant) -> bool {
        self.enabled
            && self
                .initialized_at
                .is_some_and(|t| now.saturating_duration_since(t) > self.cfg.startup_delay)
    }

    /// `now` is past both the congestion and the switch cool-off deadlines.
    pub fn is_cool_off_finished(&self, now: Instant) -> bool {
        let congestion_done = self
            .last_congestion_at
            .is_none_or(|t| now.saturating_duration_since(t) > self.cfg.cool_off);
        let switch_done = self
            .last_switch_at
            .is_none_or(|t| now.saturating_duration_since(t) > self.cfg.cool_off_after_switch);
        congestion_done && switch_done
    }

    fn gate(&self, current: &str, now: Instant) -> Option<AbrDecision> {
        if !self.enabled {
            return Some(AbrDecision::keep(current, AbrReason::Disabled));
        }
        if !self.is_active(now) {
            return Some(AbrDecision::keep(current, AbrReason::Startup));
        }
        if !self.is_cool_off_finished(now) {
            return Some(AbrDecision::keep(current, AbrReason::CoolOff));
        }
        None
    }

    fn record(&mut self, kind: SignalKind, now: Instant) -> usize {
        self.history.push_back(AbrSignal { at: now, kind });
        let window = match kind {
            SignalKind::Skip => self.cfg.congestion_window,
            SignalKind::BandwidthHigh | SignalKind::BandwidthLow => self.cfg.bw_signal_window,
        };
        self.history
            .iter()
            .filter(|s| s.kind == kind && now.saturating_duration_since(s.at) < window)
            .count()
    }

    /// Congestion path. Called for every skip reported by the decode pipeline.
    ///
    /// `skipped_track` is the track of the dropped group and `current_group_track`
    /// the track of the group that kept playing. Only skips entirely inside the
    /// playing track count.
    pub fn on_skip(
        &mut self,
        skipped_track: &str,
        current_group_track: &str,
        current: &str,
        variants: &[Variant],
        now: Instant,
    ) -> AbrDecision {
        if let Some(gated) = self.gate(current, now) {
            return gated;
        }
        if skipped_track != current || skipped_track != current_group_track {
            return AbrDecision::keep(current, AbrReason::OtherTrack);
        }

        let count = self.record(SignalKind::Skip, now);
        if count < self.cfg.max_skip_count_for_congestion {
            debug!(count, current, "ABR skip recorded");
            return AbrDecision::keep(current, AbrReason::Debouncing);
        }

        self.last_congestion_at = Some(now);
        let current_bw = variants
            .iter()
            .find(|v| v.track == current)
            .map_or(0, |v| v.bandwidth_bps);
        // only lower renditions qualify; the lowest one keeps playing
        let lowest = variants
            .iter()
            .filter(|v| v.bandwidth_bps < current_bw)
            .min_by_key(|v| v.bandwidth_bps);

        match lowest {
            Some(target) => {
                info!(
                    count,
                    from = current,
                    to = %target.track,
                    bandwidth_bps = target.bandwidth_bps,
                    "ABR switch down: congestion detected"
                );
                AbrDecision::switch(current, target, AbrReason::Congestion)
            }
            None => {
                info!(count, current, "ABR congestion detected, no track to switch down to");
                AbrDecision::keep(current, AbrReason::Congestion)
            }
        }
    }

    /// Bandwidth path. `sample_kbps` is a filtered throughput sample.
    ///
    /// The first sample ever seen starts the startup clock.
    #[expect(clippy::cast_precision_loss)] // bitrate precision loss is negligible for ABR
    pub fn on_throughput(
        &mut self,
        sample_kbps: f64,
        current: &str,
        variants: &[Variant],
        now: Instant,
    ) -> AbrDecision {
        if self.initialized_at.is_none() {
            self.initialized_at = Some(now);
        }
        if let Some(gated) = self.gate(current, now) {
            return gated;
        }

        let current_bw = variants
            .iter()
            .find(|v| v.track == current)
            .map_or(0, |v| v.bandwidth_bps);
        if current_bw == 0 {
            return AbrDecision::keep(current, AbrReason::NoBitrate);
        }

        let sample_bps = sample_kbps * 1000.0;
        let current_bw_f = current_bw as f64;

        debug!(
            current,
            current_bw,
            sample_kbps,
            up = self.cfg.switch_up_multiplier,
            down = self.cfg.switch_down_multiplier,
            "ABR decide: evaluating"
        );

        if sample_bps > current_bw_f * self.cfg.switch_up_multiplier {
            let count = self.record(SignalKind::BandwidthHigh, now);
            if count < self.cfg.min_bw_high_events {
                return AbrDecision::keep(current, AbrReason::Debouncing);
            }
            let candidate = variants
                .iter()
                .filter(|v| {
                    v.bandwidth_bps > current_bw
                        && (v.bandwidth_bps as f64) * self.cfg.switch_up_multiplier <= sample_bps
                })
                .max_by_key(|v| v.bandwidth_bps);
            return self.commit(current, candidate, AbrReason::UpSwitch, sample_kbps, now);
        }

        if sample_bps < current_bw_f * self.cfg.switch_down_multiplier {
            let count = self.record(SignalKind::BandwidthLow, now);
            if count < self.cfg.min_bw_low_events {
                return AbrDecision::keep(current, AbrReason::Debouncing);
            }
            let candidate = variants
                .iter()
                .filter(|v| {
                    v.bandwidth_bps < current_bw
                        && (v.bandwidth_bps as f64) * self.cfg.switch_down_multiplier <= sample_bps
                })
                .max_by_key(|v| v.bandwidth_bps);
            return self.commit(current, candidate, AbrReason::DownSwitch, sample_kbps, now);
        }

        AbrDecision::keep(current, AbrReason::WithinBand)
    }

    fn commit(
        &mut self,
        current: &str,
        candidate: Option<&Variant>,
        reason: AbrReason,
        sample_kbps: f64,
        now: Instant,
    ) -> AbrDecision {
        let Some(target) = candidate else {
            debug!(current, sample_kbps, ?reason, "ABR decide: no candidate");
            return AbrDecision::keep(current, AbrReason::NoCandidate);
        };
        info!(
            from = current,
            to = %target.track,
            bandwidth_bps = target.bandwidth_bps,
            sample_kbps,
            ?reason,
            "ABR switch"
        );
        self.last_switch_at = Some(now);
        AbrDecision::switch(current, target, reason)
    }

    /// Drop signals older than [`AbrOptions::history_horizon`].
    pub fn prune(&mut self, now: Instant) {
        let horizon = self.cfg.history_horizon();
        let before = self.history.len();
        self.history
            .retain(|s| now.saturating_duration_since(s.at) < horizon);
        debug!(before, after = self.history.len(), "ABR history pruned");
    }

    pub fn history(&self) -> impl Iterator<Item = &AbrSignal> {
        self.history.iter()
    }
}
