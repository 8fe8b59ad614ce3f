use rollwatch::rollwatch::events::{has_all_of_reasons, has_none_of_reasons, EventObserver};
use rollwatch::rollwatch::k8s::event::{Event, ObjectReference};

use crate::support::{init_logging, ScriptedBackend};

fn pod_event(reason: &str, name: &str, last_timestamp: &str) -> Event {
    Event {
        api_version: "v1".to_string(),
        kind: "Event".to_string(),
        involved_object: ObjectReference {
            kind: Some("Pod".to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        reason: Some(reason.to_string()),
        last_timestamp: Some(last_timestamp.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn observer_preserves_control_plane_report_order() {
    init_logging();
    let backend = ScriptedBackend::with_events(vec![
        pod_event("Scheduled", "zk-1", "2026-08-29T10:00:00Z"),
        pod_event("Pulled", "zk-1", "2026-08-29T10:00:05Z"),
        pod_event("Created", "zk-1", "2026-08-29T10:00:06Z"),
        pod_event("Started", "zk-1", "2026-08-29T10:00:07Z"),
    ]);
    let observer = EventObserver::new(&backend);

    let events = observer
        .events_for("Pod", "zk-1")
        .await
        .expect("events fetch succeeds");
    let reasons: Vec<_> = events
        .iter()
        .filter_map(|event| event.reason.as_deref())
        .collect();
    assert_eq!(reasons, ["Scheduled", "Pulled", "Created", "Started"]);
}

#[tokio::test]
async fn startup_event_log_passes_both_assertions() {
    init_logging();
    let backend = ScriptedBackend::with_events(vec![
        pod_event("Scheduled", "zk-1", "2026-08-29T10:00:00Z"),
        pod_event("Pulled", "zk-1", "2026-08-29T10:00:05Z"),
        pod_event("Started", "zk-1", "2026-08-29T10:00:07Z"),
    ]);
    let observer = EventObserver::new(&backend);
    let events = observer.events_for("Pod", "zk-1").await.unwrap();

    assert!(has_all_of_reasons(&events, &["Scheduled", "Started"]));
    assert!(has_none_of_reasons(&events, &["Failed"]));
}

#[tokio::test]
async fn a_failed_event_flips_the_forbidden_check() {
    init_logging();
    let backend = ScriptedBackend::with_events(vec![
        pod_event("Scheduled", "zk-1", "2026-08-29T10:00:00Z"),
        pod_event("Failed", "zk-1", "2026-08-29T10:00:09Z"),
    ]);
    let observer = EventObserver::new(&backend);
    let events = observer.events_for("Pod", "zk-1").await.unwrap();

    assert!(!has_none_of_reasons(&events, &["Failed"]));
    // The positive check is unaffected by extra reasons.
    assert!(has_all_of_reasons(&events, &["Scheduled"]));
}
