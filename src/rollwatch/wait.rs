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

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use log::{debug, trace};
use tokio::time::{sleep, Instant};

use crate::rollwatch::util::DynError;

/// Why a wait ended without the condition holding.
#[derive(Debug)]
pub enum WaitError {
    /// The deadline passed before the condition held. Carries the caller's
    /// description of what was being waited for and the time actually spent.
    Timeout {
        description: String,
        elapsed: Duration,
    },
    /// The condition itself failed. Propagated as-is, never retried: a
    /// crashing predicate is a caller bug, not a transient condition.
    Predicate(DynError),
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::Timeout {
                description,
                elapsed,
            } => write!(
                f,
                "timed out after {:.1}s waiting for {}",
                elapsed.as_secs_f64(),
                description
            ),
            WaitError::Predicate(source) => write!(f, "wait condition failed: {source}"),
        }
    }
}

impl Error for WaitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WaitError::Timeout { .. } => None,
            WaitError::Predicate(source) => Some(source.as_ref()),
        }
    }
}

/// Repeatedly evaluates `condition` at `poll_interval` cadence until it holds
/// or `timeout` has elapsed since the call began.
///
/// A condition that already holds on the first evaluation returns without
/// sleeping at all. The caller's task is suspended between polls; nothing runs
/// on its behalf in the background, and the only way out is success, a
/// condition error, or the deadline.
pub async fn wait_for<F, Fut>(
    description: &str,
    poll_interval: Duration,
    timeout: Duration,
    mut condition: F,
) -> Result<(), WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, DynError>>,
{
    let started = Instant::now();
    debug!("Waiting up to {timeout:?} for {description}");
    loop {
        match condition().await {
            Ok(true) => {
                trace!("Condition held after {:?}: {description}", started.elapsed());
                return Ok(());
            }
            Ok(false) => {}
            Err(source) => return Err(WaitError::Predicate(source)),
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Err(WaitError::Timeout {
                description: description.to_string(),
                elapsed,
            });
        }
        sleep(poll_interval).await;
    }
}
