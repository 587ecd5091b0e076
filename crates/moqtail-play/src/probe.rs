use moqtail_transport::{SubscribeSend, Subscriber};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};
use web_time::Instant;

use crate::{config::ProbeOptions, error::PlayResult};

/// Fetch one probe object and measure how fast it arrived.
///
/// Returns kbit/s, or `None` when the relay sent nothing usable.
pub(crate) async fn probe(
    subscriber: &Subscriber,
    namespace: &str,
    options: &ProbeOptions,
) -> PlayResult<Option<f64>> {
    let track = options.track_name();
    let sub = subscriber.subscribe(namespace, &track, None).await?;
    let started = Instant::now();

    let measured = read_probe(&sub, &track, started).await;

    if let Err(e) = sub.close().await {
        debug!(%track, error = %e, "probe unsubscribe failed");
    }
    measured
}

async fn read_probe(sub: &SubscribeSend, track: &str, started: Instant) -> PlayResult<Option<f64>> {
    let Some(mut object) = sub.data().await? else {
        return Ok(None);
    };
    let mut payload = Vec::new();
    if let Err(e) = object.stream.read_to_end(&mut payload).await {
        warn!(track, error = %e, "probe read failed");
        return Ok(None);
    }
    Ok(kbps(payload.len(), started.elapsed().as_secs_f64()))
}

#[expect(clippy::cast_precision_loss)] // probe sizes are far below 2^52
fn kbps(bytes: usize, secs: f64) -> Option<f64> {
    (bytes > 0 && secs > 0.0).then(|| bytes as f64 * 8.0 / secs / 1000.0)
}
