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

use log::debug;

use crate::rollwatch::client::ControlPlaneClient;
use crate::rollwatch::k8s::event::Event;
use crate::rollwatch::util::DynResult;

/// Reads the event log of named objects through the control plane.
///
/// Events arrive in control-plane report order and are never reordered here;
/// the assertion helpers below are evaluated once over the fetched sequence,
/// after the relevant wait has completed, never polled.
pub struct EventObserver<'a> {
    client: &'a dyn ControlPlaneClient,
}

impl<'a> EventObserver<'a> {
    pub fn new(client: &'a dyn ControlPlaneClient) -> Self {
        Self { client }
    }

    /// Events involving `kind`/`name`, chronological as reported.
    pub async fn events_for(&self, kind: &str, name: &str) -> DynResult<Vec<Event>> {
        let events = self.client.fetch_events(kind, name).await?;
        debug!("Fetched {} events for {kind} {name}", events.len());
        Ok(events)
    }
}

/// True iff every required reason appears at least once in `events`.
pub fn has_all_of_reasons(events: &[Event], required: &[&str]) -> bool {
    required.iter().all(|reason| {
        events
            .iter()
            .any(|event| event.reason.as_deref() == Some(*reason))
    })
}

/// True iff no forbidden reason appears in `events`.
pub fn has_none_of_reasons(events: &[Event], forbidden: &[&str]) -> bool {
    events.iter().all(|event| {
        event
            .reason
            .as_deref()
            .map(|reason| !forbidden.contains(&reason))
            .unwrap_or(true)
    })
}
