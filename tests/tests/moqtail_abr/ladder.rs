use std::time::Duration;

use moqtail_abr::{AbrController, AbrOptions, AbrReason, Variant};
use moqtail_media::{ThroughputMeter, ThroughputOptions};
use web_time::Instant;

use crate::common::ladder;

fn variants() -> Vec<Variant> {
    ladder()
        .video_tracks()
        .filter_map(|t| t.bit_rate.map(|bps| Variant::new(t.data_track.clone(), bps)))
        .collect()
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

#[test]
fn filtered_throughput_then_congestion() {
    let variants = variants();
    let meter = ThroughputMeter::new(&ThroughputOptions::default().with_announce_interval(Duration::ZERO));
    let mut abr = AbrController::new(AbrOptions::default());
    let t0 = Instant::now();
    let mut current = "v-low".to_string();

    let sample = |abr: &mut AbrController, current: &str, at: Duration| {
        let kbps = meter.record(8000.0, Some("1 0 0"), t0 + at).unwrap();
        abr.on_throughput(kbps, current, &variants, t0 + at)
    };

    assert_eq!(sample(&mut abr, &current, secs(0)).reason, AbrReason::Startup);
    assert_eq!(sample(&mut abr, &current, secs(6)).reason, AbrReason::Debouncing);
    assert_eq!(sample(&mut abr, &current, secs(7)).reason, AbrReason::Debouncing);
    let up = sample(&mut abr, &current, secs(8));
    assert_eq!((up.target.as_str(), up.reason, up.changed), ("v-high", AbrReason::UpSwitch, true));
    current = up.target;

    let during_cool_off = abr.on_skip(&current, &current, &current, &variants, t0 + secs(10));
    assert_eq!(during_cool_off.reason, AbrReason::CoolOff);

    let mut decisions = Vec::new();
    for at in [24_000, 25_000, 26_000, 27_000, 28_000, 28_500] {
        let d = abr.on_skip(&current, &current, &current, &variants, t0 + Duration::from_millis(at));
        decisions.push(d.reason);
        if d.changed {
            assert_eq!(d.target, "v-low");
            meter.reset();
            current = d.target;
        }
    }
    assert_eq!(
        decisions,
        [
            AbrReason::Debouncing,
            AbrReason::Debouncing,
            AbrReason::Debouncing,
            AbrReason::Debouncing,
            AbrReason::Congestion,
            AbrReason::CoolOff,
        ]
    );
    assert_eq!(current, "v-low");
    assert!(meter.record(100.0, None, t0 + secs(29)).is_none());
}

#[test]
fn skips_on_other_tracks_are_ignored() {
    let variants = variants();
    let mut abr = AbrController::new(AbrOptions::default().with_startup_delay(Duration::ZERO));
    let t0 = Instant::now();
    let _ = abr.on_throughput(1000.0, "v-high", &variants, t0);

    for i in 0..10 {
        let at = t0 + Duration::from_millis(100 * (i + 1));
        let d = abr.on_skip("v-low", "v-high", "v-high", &variants, at);
        assert_eq!(d.reason, AbrReason::OtherTrack);
    }
}
