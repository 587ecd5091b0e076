use bytes::Bytes;
use moqtail_media::{CATALOG_TRACK, Catalog, CatalogError, TrackKind};
use moqtail_test_utils::{FakeRelay, TrackContent};
use moqtail_transport::{Session, SessionOptions, SubscribeError};
use rstest::rstest;

use crate::common::{NAMESPACE, ladder, within};

async fn fetch(relay: &FakeRelay) -> Result<Catalog, CatalogError> {
    let session = Session::connect(relay.transport(), SessionOptions::default()).await.unwrap();
    within(Catalog::fetch(session.subscriber(), NAMESPACE)).await
}

#[tokio::test]
async fn fetches_published_catalog() {
    let relay = FakeRelay::builder(NAMESPACE).catalog(&ladder()).spawn();
    let catalog = fetch(&relay).await.unwrap();

    assert_eq!(catalog, ladder());
    let heights: Vec<_> = catalog
        .video_tracks()
        .map(|t| match &t.kind {
            TrackKind::Video(v) => v.height,
            TrackKind::Audio(_) => unreachable!(),
        })
        .collect();
    assert_eq!(heights, [360, 720]);
    assert_eq!(catalog.audio_tracks().count(), 1);

    // The catalog subscription is dropped once read.
    let sub = relay.wait_for_subscribe(CATALOG_TRACK).await;
    within(relay.wait_for_unsubscribe(sub.id)).await;
}

#[tokio::test]
async fn missing_catalog_is_a_subscribe_error() {
    let relay = FakeRelay::builder(NAMESPACE).spawn();
    let err = fetch(&relay).await.unwrap_err();
    assert!(
        matches!(err, CatalogError::Subscribe(SubscribeError::Remote { code: 404, .. })),
        "{err}"
    );
}

#[rstest]
#[case::not_json(b"<catalog/>".as_slice())]
#[case::no_tracks_field(br#"{"version":1}"#.as_slice())]
#[tokio::test]
async fn malformed_catalog_is_invalid(#[case] raw: &'static [u8]) {
    let relay = FakeRelay::builder(NAMESPACE)
        .track(CATALOG_TRACK, TrackContent::Static(vec![Bytes::from_static(raw)]))
        .spawn();
    assert!(matches!(fetch(&relay).await, Err(CatalogError::Invalid)));
}
