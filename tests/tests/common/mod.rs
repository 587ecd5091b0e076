// Common fixtures and utilities for integration tests

pub mod media;

use std::{future::Future, time::Duration};

pub use media::*;
use moqtail_events::{Event, EventStream};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(WAIT, fut).await.expect("timed out")
}

/// Next event matching `pred`.
pub async fn wait_for_event(events: &mut EventStream, pred: impl Fn(&Event) -> bool) -> Event {
    within(async {
        loop {
            match events.next().await {
                Some(event) if pred(&event) => return event,
                Some(_) => {}
                None => panic!("event stream ended"),
            }
        }
    })
    .await
}
