/*
 * Copyright (C) 2026 The Rollwatch Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::Mutex;

use crate::rollwatch::client::ControlPlaneClient;
use crate::rollwatch::util::DynResult;
use crate::rollwatch::wait::{wait_for, WaitError};

/// Consecutive identical snapshots required before a node-set is declared
/// stable. Rolling restarts can produce short windows where nothing changes
/// between two polls; a long run rejects those. Tuned, not derived.
pub const DEFAULT_STABILITY_THRESHOLD: u32 = 60;

/// Marker recorded for an expected pod the control plane does not know.
/// Keeps the snapshot's key set equal to the expected pod-name set, so a pod
/// vanishing and reappearing is never mistaken for quiescence.
const ABSENT_MARKER: &str = "absent";

/// Point-in-time structural fingerprint of a node-set: pod name mapped to a
/// version marker. Never mutated in place; every poll captures a fresh one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeSetSnapshot {
    markers: HashMap<String, String>,
}

impl NodeSetSnapshot {
    pub fn from_markers(markers: HashMap<String, String>) -> Self {
        Self { markers }
    }

    pub fn marker(&self, pod: &str) -> Option<&str> {
        self.markers.get(pod).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Captures the current fingerprint of `expected_pods`. The marker folds
    /// the aggregate restart count into the resource version so an in-place
    /// container restart between polls still changes the snapshot.
    pub async fn capture<C>(client: &C, expected_pods: &[String]) -> DynResult<Self>
    where
        C: ControlPlaneClient + ?Sized,
    {
        let mut markers = HashMap::with_capacity(expected_pods.len());
        for name in expected_pods {
            let marker = match client.get_pod(name).await? {
                Some(pod) => format!(
                    "{}/restarts={}",
                    pod.metadata
                        .resource_version
                        .as_deref()
                        .unwrap_or("unversioned"),
                    pod.total_restarts()
                ),
                None => ABSENT_MARKER.to_string(),
            };
            markers.insert(name.clone(), marker);
        }
        Ok(Self { markers })
    }
}

#[derive(Debug)]
struct StabilityCounter {
    last: NodeSetSnapshot,
    consecutive_matches: u32,
}

/// Declares convergence of a node-set once its structural snapshot has stayed
/// identical across a sustained run of polls.
///
/// The cluster's own control loop exposes no externally visible "done"
/// signal, so sustained quiescence is the proxy. Only one topology mutation
/// at a time per cluster: a concurrent scale by another actor shifts the
/// expected pod set under the detector and cannot be noticed here.
pub struct StabilityDetector {
    threshold: u32,
    poll_interval: Duration,
    timeout: Duration,
}

impl StabilityDetector {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            threshold: DEFAULT_STABILITY_THRESHOLD,
            poll_interval,
            timeout,
        }
    }

    /// Overrides the consecutive-match threshold.
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Blocks until `expected_pods` have produced strictly more than
    /// `threshold` consecutive identical snapshots, or the overall timeout
    /// passes.
    pub async fn await_stable<C>(
        &self,
        client: &C,
        cluster: &str,
        expected_pods: &[String],
    ) -> Result<(), WaitError>
    where
        C: ControlPlaneClient + ?Sized,
    {
        info!("Waiting for cluster {cluster} stability");
        let initial = NodeSetSnapshot::capture(client, expected_pods)
            .await
            .map_err(WaitError::Predicate)?;
        let counter = Mutex::new(StabilityCounter {
            last: initial,
            consecutive_matches: 0,
        });

        let description = format!("cluster {cluster} stable and ready");
        let counter = &counter;
        let threshold = self.threshold;
        wait_for(&description, self.poll_interval, self.timeout, move || {
            async move {
                let snapshot = NodeSetSnapshot::capture(client, expected_pods).await?;
                let mut state = counter.lock().await;
                if snapshot == state.last {
                    state.consecutive_matches += 1;
                    debug!(
                        "Cluster {cluster} stable for {} polls",
                        state.consecutive_matches
                    );
                    Ok(state.consecutive_matches > threshold)
                } else {
                    debug!("Cluster {cluster} not stable, counter reset");
                    state.last = snapshot;
                    state.consecutive_matches = 0;
                    Ok(false)
                }
            }
        })
        .await
    }
}
