use std::sync::Arc;

use moqtail_abr::AbrOptions;
use moqtail_events::{Event, EventBus, PlayerEvent, Stat};
use moqtail_play::{Player, PlayerConfig};
use moqtail_test_utils::{LiveTrack, init_tracing};
use tokio_util::sync::CancellationToken;

use crate::common::{
    GROUP, GroupDecoder, NAMESPACE, RecordingSink, ladder, live_relay, relay_with, wait_for_event,
    within,
};

fn config() -> PlayerConfig {
    PlayerConfig::default()
        .with_namespace(NAMESPACE.to_string())
        .with_group_duration(GROUP)
        .with_latency_target(GROUP * 2)
        .with_abr(AbrOptions::default().with_enabled(false))
}

fn is_latency(event: &Event) -> bool {
    matches!(event, Event::Player(PlayerEvent::Stat(Stat::Latency { .. })))
}

#[tokio::test]
async fn presents_both_tracks_in_order() {
    init_tracing();
    let relay = live_relay(&ladder());
    let sink = Arc::new(RecordingSink::default());
    let player = Player::create(config(), relay.transport(), Arc::new(GroupDecoder), sink.clone())
        .await
        .unwrap();
    let mut events = player.events();
    player.start();

    for _ in 0..3 {
        wait_for_event(&mut events, is_latency).await;
    }
    within(async {
        while sink.audio.lock().is_empty() {
            tokio::time::sleep(GROUP).await;
        }
    })
    .await;
    player.close(None);

    let video = sink.video.lock().clone();
    assert!(video.len() >= 3, "{video:?}");
    assert!(video.windows(2).all(|w| w[0] < w[1]), "{video:?}");
    let latency = player.stats().latency.unwrap();
    assert!(latency >= 0.0 && latency < 5.0, "{latency}");
}

#[tokio::test]
async fn finite_stream_closes_player() {
    let relay = relay_with(&ladder(), LiveTrack::new(GROUP, 512).with_groups(4));
    let player = Player::create(
        config(),
        relay.transport(),
        Arc::new(GroupDecoder),
        Arc::new(RecordingSink::default()),
    )
    .await
    .unwrap();
    player.start();

    assert_eq!(within(player.closed()).await, None);
    assert!(player.current_video_track().is_none());
    assert!(player.current_audio_track().is_none());
}

#[tokio::test]
async fn external_cancel_closes_player() {
    let relay = live_relay(&ladder());
    let cancel = CancellationToken::new();
    let player = Player::create(
        config().with_cancel(cancel.clone()),
        relay.transport(),
        Arc::new(GroupDecoder),
        Arc::new(RecordingSink::default()),
    )
    .await
    .unwrap();
    player.start();

    tokio::time::sleep(GROUP * 3).await;
    cancel.cancel();
    assert_eq!(within(player.closed()).await, None);
    within(relay.transport().closed()).await;
}

#[tokio::test]
async fn events_go_to_shared_bus() {
    let relay = live_relay(&ladder());
    let bus = EventBus::new(64);
    let mut events = bus.events();
    let player = Player::create(
        config().with_events(bus),
        relay.transport(),
        Arc::new(GroupDecoder),
        Arc::new(RecordingSink::default()),
    )
    .await
    .unwrap();
    player.start();

    wait_for_event(&mut events, |e| {
        matches!(e, Event::Player(PlayerEvent::TrackChange { track }) if track == "v-low")
    })
    .await;
    player.close(None);
    wait_for_event(&mut events, |e| matches!(e, Event::Player(PlayerEvent::Closed { error: None }))).await;
}

#[tokio::test]
async fn slow_subscriber_skips_ahead_and_still_sees_close() {
    let relay = live_relay(&ladder());
    let bus = EventBus::new(2);
    let mut slow = bus.events();
    let mut fast = bus.events();
    let player = Player::create(
        config().with_events(bus),
        relay.transport(),
        Arc::new(GroupDecoder),
        Arc::new(RecordingSink::default()),
    )
    .await
    .unwrap();
    player.start();

    for _ in 0..5 {
        wait_for_event(&mut fast, is_latency).await;
    }
    assert!(within(slow.next()).await.is_some());
    assert!(slow.missed() > 0);

    player.close(None);
    wait_for_event(&mut slow, |e| matches!(e, Event::Player(PlayerEvent::Closed { error: None }))).await;
    assert!(slow.is_finished());
    assert_eq!(slow.next().await, None);
}

#[tokio::test]
async fn server_time_offset_shifts_latency() {
    let relay = live_relay(&ladder());
    let player = Player::create(
        config(),
        relay.transport(),
        Arc::new(GroupDecoder),
        Arc::new(RecordingSink::default()),
    )
    .await
    .unwrap();
    let mut events = player.events();
    // Producer clock ten seconds ahead of ours.
    player.set_server_time_offset(10_000.0);
    player.start();

    let Event::Player(PlayerEvent::Stat(Stat::Latency { seconds })) =
        wait_for_event(&mut events, is_latency).await
    else {
        unreachable!()
    };
    assert!(seconds > 5.0, "{seconds}");
    player.close(None);
}
