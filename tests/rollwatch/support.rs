use std::collections::HashMap;
use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

use serde_json::Value;

use rollwatch::rollwatch::client::{ClientFuture, ControlPlaneClient, ResourceIdentity};
use rollwatch::rollwatch::k8s::event::Event;
use rollwatch::rollwatch::k8s::pod::{ContainerStatus, ObjectMeta, Pod, PodStatus};
use rollwatch::rollwatch::util::new_error;

static LOGGER: Once = Once::new();

pub fn init_logging() {
    LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Builds a running, ready pod carrying the given resource version.
pub fn scripted_pod(name: &str, resource_version: &str) -> Pod {
    Pod {
        api_version: "v1".to_string(),
        kind: "Pod".to_string(),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            resource_version: Some(resource_version.to_string()),
            ..Default::default()
        },
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            container_statuses: vec![ContainerStatus {
                name: "node".to_string(),
                ready: true,
                restart_count: 0,
            }],
            ..Default::default()
        }),
    }
}

/// In-memory control-plane backend driven by a script of per-poll pod states.
///
/// Each detector poll fetches every expected pod once; the backend advances
/// one script round per `pods_per_round` fetches and keeps serving the final
/// round once the script is exhausted.
pub struct ScriptedBackend {
    pods_per_round: usize,
    rounds: Vec<HashMap<String, String>>,
    pod_calls: AtomicUsize,
    events: Vec<Event>,
}

impl ScriptedBackend {
    pub fn new(pods_per_round: usize, rounds: Vec<HashMap<String, String>>) -> Self {
        assert!(!rounds.is_empty(), "script needs at least one round");
        Self {
            pods_per_round,
            rounds,
            pod_calls: AtomicUsize::new(0),
            events: Vec::new(),
        }
    }

    pub fn with_events(events: Vec<Event>) -> Self {
        Self {
            pods_per_round: 1,
            rounds: vec![HashMap::new()],
            pod_calls: AtomicUsize::new(0),
            events,
        }
    }

    pub fn pod_fetches(&self) -> usize {
        self.pod_calls.load(Ordering::SeqCst)
    }

    fn next_pod(&self, name: &str) -> Option<Pod> {
        let call = self.pod_calls.fetch_add(1, Ordering::SeqCst);
        let round = (call / self.pods_per_round).min(self.rounds.len() - 1);
        self.rounds[round]
            .get(name)
            .map(|version| scripted_pod(name, version))
    }
}

impl ControlPlaneClient for ScriptedBackend {
    fn namespace(&self) -> &str {
        "default"
    }

    fn create<'a>(&'a self, _manifest: &'a Value) -> ClientFuture<'a, ()> {
        Box::pin(async { Err(new_error("create is not scripted")) })
    }

    fn delete_by_identity<'a>(&'a self, _identity: &'a ResourceIdentity) -> ClientFuture<'a, ()> {
        Box::pin(async { Err(new_error("delete is not scripted")) })
    }

    fn wait_for_pod<'a>(&'a self, _name: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async { Err(new_error("wait_for_pod is not scripted")) })
    }

    fn wait_for_resource_deletion<'a>(
        &'a self,
        _kind: &'a str,
        _name: &'a str,
    ) -> ClientFuture<'a, ()> {
        Box::pin(async { Err(new_error("wait_for_resource_deletion is not scripted")) })
    }

    fn get_pod<'a>(&'a self, name: &'a str) -> ClientFuture<'a, Option<Pod>> {
        Box::pin(async move { Ok(self.next_pod(name)) })
    }

    fn get_pods_by_label<'a>(
        &'a self,
        _labels: &'a HashMap<String, String>,
    ) -> ClientFuture<'a, Pod> {
        Box::pin(async { Err(new_error("label queries are not scripted")) })
    }

    fn fetch_logs<'a>(
        &'a self,
        _pod: &'a str,
        _container: Option<&'a str>,
    ) -> ClientFuture<'a, String> {
        Box::pin(async { Ok(String::new()) })
    }

    fn fetch_events<'a>(&'a self, _kind: &'a str, _name: &'a str) -> ClientFuture<'a, Vec<Event>> {
        Box::pin(async move { Ok(self.events.clone()) })
    }

    fn exec_in_container<'a>(
        &'a self,
        _pod: &'a str,
        _container: &'a str,
        _args: &'a [String],
    ) -> ClientFuture<'a, String> {
        Box::pin(async { Err(new_error("exec is not scripted")) })
    }

    fn apply_template<'a>(
        &'a self,
        _template: &'a str,
        _params: &'a [(String, String)],
    ) -> ClientFuture<'a, ()> {
        Box::pin(async { Err(new_error("templates are not scripted")) })
    }
}

/// Writes an executable shell script standing in for the control-plane CLI
/// tool and returns its path. The caller owns cleanup via `TempTool`.
pub struct TempTool {
    pub path: PathBuf,
}

impl TempTool {
    pub fn new(tag: &str, body: &str) -> Self {
        static SEQ: AtomicUsize = AtomicUsize::new(0);
        let unique = SEQ.fetch_add(1, Ordering::SeqCst);
        let path = env::temp_dir().join(format!(
            "rollwatch-{tag}-{}-{unique}",
            std::process::id()
        ));
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write tool script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod tool script");
        Self { path }
    }

    pub fn as_str(&self) -> &str {
        self.path.to_str().expect("tool path is utf-8")
    }
}

impl Drop for TempTool {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Marker map helper for stability scripts.
pub fn round(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(name, version)| (name.to_string(), version.to_string()))
        .collect()
}
