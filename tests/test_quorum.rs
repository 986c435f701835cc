use std::time::Duration;

use quorum_lock::{
    manager::{drift_for, quorum_for, validity_for, DEFAULT_RETRY_COUNT},
    LockManagerOptions,
};

#[test]
fn quorum_is_a_strict_majority() {
    assert_eq!(quorum_for(1), 1);
    assert_eq!(quorum_for(2), 2);
    assert_eq!(quorum_for(3), 2);
    assert_eq!(quorum_for(4), 3);
    assert_eq!(quorum_for(5), 3);
    for n in 2..64 {
        assert!(quorum_for(n) * 2 > n);
        assert!(quorum_for(n) <= n);
    }
}

#[test]
fn drift_is_proportional_plus_margin() {
    assert_eq!(
        drift_for(Duration::from_millis(1000), 0.01),
        Duration::from_millis(12)
    );
    assert_eq!(
        drift_for(Duration::from_millis(99), 0.01),
        Duration::from_millis(2)
    );
    assert_eq!(
        drift_for(Duration::from_millis(1000), 0.0),
        Duration::from_millis(2)
    );
}

#[test]
fn validity_must_be_strictly_positive() {
    let ttl = Duration::from_millis(100);
    let drift = Duration::from_millis(3);
    assert_eq!(
        validity_for(ttl, Duration::from_millis(10), drift),
        Some(Duration::from_millis(87))
    );
    assert_eq!(validity_for(ttl, Duration::from_millis(97), drift), None);
    assert_eq!(validity_for(ttl, Duration::from_millis(500), drift), None);
}

#[test]
fn options_deserialize_retry_delay_as_millis() {
    let opts: LockManagerOptions =
        serde_json::from_str(r#"{ "retry_delay": 50, "clock_drift_factor": 0.05 }"#)
            .expect("valid options");
    assert_eq!(opts.retry_count, DEFAULT_RETRY_COUNT);
    assert_eq!(opts.retry_delay, Duration::from_millis(50));
    assert_eq!(opts.clock_drift_factor, 0.05);

    let round_trip = serde_json::to_value(LockManagerOptions::default()).unwrap();
    assert_eq!(round_trip["retry_delay"], 200);
}
