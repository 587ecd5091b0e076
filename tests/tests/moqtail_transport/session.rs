use std::time::Duration;

use moqtail_test_utils::{FakeRelay, LiveTrack, MemoryTransport, TrackContent, init_tracing};
use moqtail_transport::{
    ObjectHeader, Session, SessionError, SessionOptions, SubscribeError, SubscribeStatus,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::common::within;

async fn connected() -> (Session, Session) {
    let (a, b) = MemoryTransport::pair();
    let client = Session::connect(a, SessionOptions::default()).await.unwrap();
    let server = Session::connect(b, SessionOptions::default()).await.unwrap();
    (client, server)
}

#[tokio::test]
async fn object_reaches_subscriber() {
    init_tracing();
    let (client, server) = connected().await;

    let sub = client.subscriber().subscribe("live", "video", None).await.unwrap();
    let req = within(server.publisher().subscribed()).await.unwrap().unwrap();
    assert_eq!((req.namespace(), req.track()), ("live", "video"));
    req.ack().await.unwrap();

    let mut stream = req
        .data(ObjectHeader {
            group: 7,
            ntp_timestamp: Some(1_700_000_000_000),
            ..Default::default()
        })
        .await
        .unwrap();
    stream.write_all(b"moof+mdat").await.unwrap();
    stream.shutdown().await.unwrap();

    let mut object = within(sub.data()).await.unwrap().unwrap();
    assert_eq!(object.header.track, sub.id());
    assert_eq!(object.header.group, 7);
    assert_eq!(object.header.ntp_timestamp, Some(1_700_000_000_000));
    let mut payload = Vec::new();
    object.stream.read_to_end(&mut payload).await.unwrap();
    assert_eq!(payload, b"moof+mdat");
    assert_eq!(sub.status(), SubscribeStatus::Subscribed);

    req.close(0, "done").await.unwrap();
    assert!(within(sub.data()).await.unwrap().is_none());
    assert_eq!(sub.status(), SubscribeStatus::Unsubscribed);
}

#[tokio::test]
async fn announce_is_acknowledged() {
    let (client, server) = connected().await;

    let announce = server.publisher().announce("live").await.unwrap();
    let received = within(client.subscriber().announced()).await.unwrap().unwrap();
    assert_eq!(received.namespace(), "live");
    within(announce.ok()).await.unwrap();

    let duplicate = server.publisher().announce("live").await.unwrap_err();
    assert!(matches!(duplicate, SessionError::Duplicate(_)));
}

#[tokio::test]
async fn unsubscribe_to_publisher_is_fatal() {
    let (client, server) = connected().await;

    let sub = client.subscriber().subscribe("live", "video", None).await.unwrap();
    within(server.publisher().subscribed()).await.unwrap().unwrap();
    sub.close().await.unwrap();

    assert_eq!(
        within(server.closed()).await,
        Some(SessionError::Unsupported("UNSUBSCRIBE"))
    );
    within(client.closed()).await;
}

#[tokio::test]
async fn unknown_track_is_rejected() {
    let relay = FakeRelay::builder("live").spawn();
    let session = Session::connect(relay.transport(), SessionOptions::default()).await.unwrap();

    let sub = session.subscriber().subscribe("live", "nope", None).await.unwrap();
    let err = within(sub.data()).await.unwrap_err();
    assert!(matches!(err, SubscribeError::Remote { code: 404, .. }), "{err}");
    assert!(!session.is_closed());
}

#[tokio::test]
async fn unannounced_namespace_waits_for_close() {
    let relay = FakeRelay::builder("live").spawn();
    let session = Session::connect(relay.transport(), SessionOptions::default()).await.unwrap();

    let sub = session.subscriber().subscribe("elsewhere", "video", None).await.unwrap();
    let pending = tokio::spawn({
        let sub = sub.clone();
        async move { sub.data().await }
    });
    relay.wait_for_subscribe("video").await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!pending.is_finished());
    assert_eq!(sub.status(), SubscribeStatus::Subscribing);

    relay.close();
    assert!(within(pending).await.unwrap().unwrap().is_none());
    assert_eq!(within(session.closed()).await, None);
}

#[tokio::test]
async fn unsubscribe_is_finished_by_relay() {
    let relay = FakeRelay::builder("live")
        .track("clock", TrackContent::Live(LiveTrack::new(Duration::from_millis(20), 64)))
        .spawn();
    let session = Session::connect(relay.transport(), SessionOptions::default()).await.unwrap();

    let sub = session.subscriber().subscribe("live", "clock", None).await.unwrap();
    let first = within(sub.data()).await.unwrap().unwrap();
    let second = within(sub.data()).await.unwrap().unwrap();
    assert!(second.header.group > first.header.group);

    sub.close().await.unwrap();
    within(relay.wait_for_unsubscribe(sub.id())).await;
    within(async {
        while sub.status() != SubscribeStatus::Unsubscribed {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(!session.is_closed());
}
