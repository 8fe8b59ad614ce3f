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
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use log::{trace, warn};
use serde_json::Value;

use crate::rollwatch::k8s::event::Event;
use crate::rollwatch::k8s::pod::Pod;
use crate::rollwatch::util::{DynError, DynResult};

pub mod api;
pub mod cli;

pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = DynResult<T>> + Send + 'a>>;

/// Cadence of the client-level readiness and deletion waits.
pub const GLOBAL_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Budget for the client-level readiness and deletion waits.
pub const GLOBAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Addresses exactly one control-plane object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceIdentity {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl ResourceIdentity {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            namespace: None,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} in {}", self.kind, self.name, ns),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// A label-selector query matched other than exactly one pod. Callers use
/// label selectors expecting object identity, not a collection.
#[derive(Debug)]
pub struct AmbiguousSelectionError {
    pub actual: usize,
    pub labels: HashMap<String, String>,
}

impl fmt::Display for AmbiguousSelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pairs: Vec<String> = self
            .labels
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        pairs.sort();
        write!(
            f,
            "expected exactly 1 pod with labels {{{}}}, found {}",
            pairs.join(","),
            self.actual
        )
    }
}

impl Error for AmbiguousSelectionError {}

/// An external control-plane command returned non-zero.
#[derive(Debug)]
pub struct CommandExecutionError {
    pub command: String,
    pub exit_code: Option<i32>,
    pub stderr: String,
}

impl fmt::Display for CommandExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "command `{}` failed with exit code {}: {}",
            self.command,
            self.exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "<signal>".to_string()),
            self.stderr.trim()
        )
    }
}

impl Error for CommandExecutionError {}

/// Uniform control-plane operations over interchangeable backends.
///
/// Callers program against this trait only; a concrete variant is chosen once
/// per run. All operations act in the namespace the backend was constructed
/// with, each backend carrying its own platform default.
pub trait ControlPlaneClient: Send + Sync {
    /// The namespace this client operates in.
    fn namespace(&self) -> &str;

    /// Creates the object described by `manifest` on the control plane.
    fn create<'a>(&'a self, manifest: &'a Value) -> ClientFuture<'a, ()>;

    /// Deletes one object by identity.
    fn delete_by_identity<'a>(&'a self, identity: &'a ResourceIdentity) -> ClientFuture<'a, ()>;

    /// Blocks until the named pod exists and every container reports ready.
    fn wait_for_pod<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()>;

    /// Blocks until the named object is gone from the control plane.
    fn wait_for_resource_deletion<'a>(
        &'a self,
        kind: &'a str,
        name: &'a str,
    ) -> ClientFuture<'a, ()>;

    /// Fetches one pod, or `None` if the control plane does not know it.
    fn get_pod<'a>(&'a self, name: &'a str) -> ClientFuture<'a, Option<Pod>>;

    /// Fetches the single pod matching `labels`; anything other than exactly
    /// one match fails with [`AmbiguousSelectionError`].
    fn get_pods_by_label<'a>(
        &'a self,
        labels: &'a HashMap<String, String>,
    ) -> ClientFuture<'a, Pod>;

    /// Fetches the log of one container, or of the pod's only container.
    fn fetch_logs<'a>(
        &'a self,
        pod: &'a str,
        container: Option<&'a str>,
    ) -> ClientFuture<'a, String>;

    /// Events involving the named object, in control-plane report order.
    fn fetch_events<'a>(&'a self, kind: &'a str, name: &'a str) -> ClientFuture<'a, Vec<Event>>;

    /// Runs `args` inside a container and returns captured stdout.
    fn exec_in_container<'a>(
        &'a self,
        pod: &'a str,
        container: &'a str,
        args: &'a [String],
    ) -> ClientFuture<'a, String>;

    /// Instantiates a named template with key=value parameter pairs.
    fn apply_template<'a>(
        &'a self,
        template: &'a str,
        params: &'a [(String, String)],
    ) -> ClientFuture<'a, ()>;
}

/// Seam for acting-identity switching on backends that support it.
///
/// Identity is session-wide state on the underlying control-plane login, not
/// scoped to one client handle; only one privileged scope may be in flight at
/// a time, by caller convention.
pub trait IdentityGateway: Send + Sync {
    /// Name of the currently acting identity.
    fn current_identity(&self) -> ClientFuture<'_, String>;

    /// Switches the acting identity to `user`.
    fn login<'a>(&'a self, user: &'a str) -> ClientFuture<'a, ()>;
}

/// Records the identity that was active before an elevation, so it can be
/// restored exactly once when the scope ends.
#[derive(Debug)]
pub struct PrivilegedContext {
    previous: String,
    restored: bool,
}

impl PrivilegedContext {
    /// Elevates to `user`, remembering the identity active beforehand.
    pub async fn acquire<G>(gateway: &G, user: &str) -> DynResult<Self>
    where
        G: IdentityGateway + ?Sized,
    {
        let previous = gateway.current_identity().await?;
        trace!("Switching from login {previous} to {user}");
        gateway.login(user).await?;
        Ok(Self {
            previous,
            restored: false,
        })
    }

    /// The identity that will be restored when the scope ends.
    pub fn previous_identity(&self) -> &str {
        &self.previous
    }

    /// Restores the pre-elevation identity.
    pub async fn restore<G>(mut self, gateway: &G) -> DynResult<()>
    where
        G: IdentityGateway + ?Sized,
    {
        self.restored = true;
        trace!("Switching back to login {}", self.previous);
        gateway.login(&self.previous).await
    }
}

impl Drop for PrivilegedContext {
    fn drop(&mut self) {
        if !self.restored {
            warn!(
                "Privileged context dropped without restoring login {}",
                self.previous
            );
        }
    }
}

/// Runs `operation` under an elevated identity and restores the previous one
/// when the scope ends, on success and on failure alike.
pub async fn with_privileges<G, F, Fut, T>(gateway: &G, user: &str, operation: F) -> DynResult<T>
where
    G: IdentityGateway + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = DynResult<T>>,
{
    let context = PrivilegedContext::acquire(gateway, user).await?;
    let outcome = operation().await;
    let restore = context.restore(gateway).await;
    match outcome {
        Err(err) => {
            if let Err(restore_err) = restore {
                warn!("Failed to restore previous login: {restore_err}");
            }
            Err(err)
        }
        Ok(value) => {
            restore?;
            Ok(value)
        }
    }
}

pub(crate) fn ambiguous_selection(actual: usize, labels: &HashMap<String, String>) -> DynError {
    Box::new(AmbiguousSelectionError {
        actual,
        labels: labels.clone(),
    })
}

/// Renders labels as a `k=v,k2=v2` selector string with stable ordering.
pub fn label_selector(labels: &HashMap<String, String>) -> String {
    let mut pairs: Vec<String> = labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    pairs.sort();
    pairs.join(",")
}
