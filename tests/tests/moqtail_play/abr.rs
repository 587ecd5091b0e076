use std::{sync::Arc, time::Duration};

use moqtail_abr::{AbrOptions, AbrReason};
use moqtail_events::{AbrEvent, Event, PlayerEvent, Stat};
use moqtail_play::{Player, PlayerConfig, ProbeOptions};
use moqtail_test_utils::{FakeRelay, init_tracing};

use crate::common::{
    GROUP, GroupDecoder, NAMESPACE, RecordingSink, ladder, live_relay, wait_for_event,
};

/// Probes of 100 kB over an in-memory link measure far above every
/// rendition, so the controller steps up as soon as it has three samples.
fn probing_config(abr: AbrOptions) -> PlayerConfig {
    PlayerConfig::default()
        .with_namespace(NAMESPACE.to_string())
        .with_group_duration(GROUP)
        .with_latency_target(GROUP * 2)
        .with_switch_track_id(true)
        .with_probe(
            ProbeOptions::default()
                .with_interval(Duration::from_millis(50))
                .with_size(100_000),
        )
        .with_abr(abr)
}

async fn start(config: PlayerConfig) -> (FakeRelay, Player) {
    let relay = live_relay(&ladder());
    let player = Player::create(
        config,
        relay.transport(),
        Arc::new(GroupDecoder),
        Arc::new(RecordingSink::default()),
    )
    .await
    .unwrap();
    (relay, player)
}

#[tokio::test]
async fn probed_bandwidth_switches_up() {
    init_tracing();
    let (relay, player) = start(probing_config(
        AbrOptions::default().with_startup_delay(Duration::ZERO),
    ))
    .await;
    let mut events = player.events();
    player.start();

    let switched = wait_for_event(&mut events, |e| matches!(e, Event::Abr(AbrEvent::Switched { .. }))).await;
    assert_eq!(
        switched,
        Event::Abr(AbrEvent::Switched {
            from: "v-low".into(),
            to: "v-high".into(),
            reason: AbrReason::UpSwitch,
        })
    );
    wait_for_event(&mut events, |e| {
        matches!(e, Event::Player(PlayerEvent::TrackChange { track }) if track == "v-high")
    })
    .await;

    let low = relay.wait_for_subscribe("v-low").await;
    let high = relay.wait_for_subscribe("v-high").await;
    assert_eq!(high.switch_track_id, low.id);
    assert_eq!(player.stats().switches, 1);
    assert!(player.stats().measured_bandwidth.is_some_and(|kbps| kbps > 6900.0));
    player.close(None);
}

#[tokio::test]
async fn disabled_abr_stays_on_first_rendition() {
    let (relay, player) = start(probing_config(
        AbrOptions::default()
            .with_startup_delay(Duration::ZERO)
            .with_enabled(false),
    ))
    .await;
    let mut events = player.events();
    player.start();

    for _ in 0..6 {
        wait_for_event(&mut events, |e| {
            matches!(e, Event::Player(PlayerEvent::Stat(Stat::MeasuredBandwidth { .. })))
        })
        .await;
    }
    assert_eq!(player.current_video_track().unwrap().data_track, "v-low");
    assert!(player.pending_video_track().is_none());
    assert_eq!(player.stats().switches, 0);
    assert!(!relay.subscribes().iter().any(|s| s.name == "v-high"));
    player.close(None);
}
