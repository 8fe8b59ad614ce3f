use std::time::Duration;

use rollwatch::rollwatch::stability::StabilityDetector;
use rollwatch::rollwatch::wait::WaitError;

use crate::support::{init_logging, round, ScriptedBackend};

const POLL: Duration = Duration::from_millis(2);

fn expected() -> Vec<String> {
    vec!["zk-0".to_string(), "zk-1".to_string()]
}

/// Rolling-update shape: two identical snapshots, then a version bump, then
/// the new shape holding steady. With a threshold of 2 the run of equal
/// snapshots inside the first five polls never exceeds the bar; the sixth
/// identical capture converges.
#[tokio::test]
async fn rolling_update_converges_on_sixth_identical_capture() {
    init_logging();
    let backend = ScriptedBackend::new(
        2,
        vec![
            round(&[("zk-0", "v1"), ("zk-1", "v1")]),
            round(&[("zk-0", "v1"), ("zk-1", "v1")]),
            round(&[("zk-0", "v2"), ("zk-1", "v1")]),
            round(&[("zk-0", "v2"), ("zk-1", "v1")]),
            round(&[("zk-0", "v2"), ("zk-1", "v1")]),
            // Script exhausted: the final round keeps being served.
        ],
    );

    let detector = StabilityDetector::new(POLL, Duration::from_secs(5)).with_threshold(2);
    detector
        .await_stable(&backend, "my-cluster", &expected())
        .await
        .expect("cluster should converge");

    // Initial capture + 5 polls, 2 pods each: convergence happened exactly on
    // the sixth capture, not earlier.
    assert_eq!(backend.pod_fetches(), 12);
}

#[tokio::test]
async fn differing_snapshot_resets_the_counter() {
    init_logging();
    // One flapping poll in the middle: the counter must start over, so the
    // threshold of 1 is only exceeded after two fresh matches at the end.
    let backend = ScriptedBackend::new(
        1,
        vec![
            round(&[("zk-0", "v1")]), // initial capture
            round(&[("zk-0", "v1")]), // match 1
            round(&[("zk-0", "v2")]), // reset
            round(&[("zk-0", "v2")]), // match 1
            round(&[("zk-0", "v2")]), // match 2 -> converged
        ],
    );

    let detector = StabilityDetector::new(POLL, Duration::from_secs(5)).with_threshold(1);
    detector
        .await_stable(&backend, "my-cluster", &["zk-0".to_string()])
        .await
        .expect("cluster should converge after the reset");
    assert_eq!(backend.pod_fetches(), 5);
}

#[tokio::test]
async fn permanently_flapping_cluster_times_out() {
    init_logging();
    let backend = ScriptedBackend::new(
        1,
        vec![
            round(&[("zk-0", "v1")]),
            round(&[("zk-0", "v2")]),
            round(&[("zk-0", "v1")]),
            round(&[("zk-0", "v2")]),
        ],
    );

    // Script ends on v2 and would settle there, so keep the timeout short
    // enough that only the flapping prefix plus a sub-threshold tail runs.
    let detector = StabilityDetector::new(POLL, Duration::from_millis(30)).with_threshold(1_000);
    let err = detector
        .await_stable(&backend, "my-cluster", &["zk-0".to_string()])
        .await
        .expect_err("flapping cluster must not converge");
    match err {
        WaitError::Timeout { description, .. } => {
            assert_eq!(description, "cluster my-cluster stable and ready")
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn pod_disappearing_mid_roll_breaks_equality() {
    init_logging();
    let backend = ScriptedBackend::new(
        2,
        vec![
            round(&[("zk-0", "v1"), ("zk-1", "v1")]),
            // zk-1 gone from the control plane for one poll.
            round(&[("zk-0", "v1")]),
            round(&[("zk-0", "v1"), ("zk-1", "v1")]),
            round(&[("zk-0", "v1"), ("zk-1", "v1")]),
        ],
    );

    let detector = StabilityDetector::new(POLL, Duration::from_secs(5)).with_threshold(1);
    detector
        .await_stable(&backend, "my-cluster", &expected())
        .await
        .expect("cluster settles after the pod returns");
    // Captures: initial, absent (reset), returned (reset again since it
    // differs from the absent snapshot), match 1, match 2.
    assert_eq!(backend.pod_fetches(), 10);
}
