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
use std::time::Duration;

use log::info;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::cli::CliClient;
use super::{
    ambiguous_selection, label_selector, with_privileges, ClientFuture, ControlPlaneClient,
    ResourceIdentity, GLOBAL_POLL_INTERVAL, GLOBAL_TIMEOUT,
};
use crate::rollwatch::config::Config;
use crate::rollwatch::k8s::event::{Event, EventList};
use crate::rollwatch::k8s::pod::{Pod, PodList};
use crate::rollwatch::util::{new_error, with_context, DynResult};
use crate::rollwatch::wait::wait_for;

/// Namespace the native API backend acts in unless told otherwise. The API
/// platform provisions per-user projects rather than a shared default.
pub const DEFAULT_NAMESPACE: &str = "myproject";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Non-success response from the control-plane API.
#[derive(Debug)]
pub struct HttpError {
    pub status: StatusCode,
    pub message: String,
}

impl HttpError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl Error for HttpError {}

/// Control-plane backend speaking the typed HTTPS API directly, shelling out
/// to the CLI tool only for operations without a direct API equivalent
/// (template instantiation, in-container exec, identity switching).
pub struct ApiClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
    namespace: String,
    cli: CliClient,
}

impl ApiClient {
    pub fn new() -> DynResult<Self> {
        Self::in_namespace(DEFAULT_NAMESPACE)
    }

    pub fn in_namespace(namespace: impl Into<String>) -> DynResult<Self> {
        let namespace = namespace.into();
        let endpoint = Config::ApiServer
            .get()
            .ok_or_else(|| new_error("no API server endpoint configured"))?;
        let base_url = Url::parse(&endpoint)
            .map_err(|err| with_context(err, format!("Invalid API endpoint '{endpoint}'")))?;

        // Test clusters present self-signed certificates.
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .http1_only()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| with_context(err, "Failed to construct control-plane HTTP client"))?;

        Ok(Self {
            client,
            base_url,
            token: Config::ApiToken.get(),
            cli: CliClient::in_namespace(namespace.clone()),
            namespace,
        })
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub fn url_from_segments(&self, segments: &[String]) -> DynResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut parts = url
                .path_segments_mut()
                .map_err(|_| "base URL cannot be base for segments")?;
            parts.clear();
            for segment in segments {
                if !segment.is_empty() {
                    parts.push(segment);
                }
            }
        }
        Ok(url)
    }

    async fn handle_json<T>(&self, response: reqwest::Response) -> DynResult<T>
    where
        T: DeserializeOwned,
    {
        let status = response.status();
        if status.is_success() {
            let body = response.json::<T>().await?;
            return Ok(body);
        }

        let text = response.text().await.unwrap_or_default();
        let message = if text.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            text
        };
        Err(Box::new(HttpError::new(status, message)))
    }

    async fn expect_success(&self, response: reqwest::Response) -> DynResult<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(Box::new(HttpError::new(status, text)))
    }

    async fn get_pod_inner(&self, name: &str) -> DynResult<Option<Pod>> {
        let url = self.url_from_segments(&resource_segments(&self.namespace, "pod", Some(name)))?;
        let response = self.apply_auth(self.client.get(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let pod = self.handle_json(response).await?;
        Ok(Some(pod))
    }

    async fn resource_exists(&self, kind: &str, name: &str) -> DynResult<bool> {
        let url = self.url_from_segments(&resource_segments(&self.namespace, kind, Some(name)))?;
        let response = self.apply_auth(self.client.get(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        self.expect_success(response).await?;
        Ok(true)
    }

    /// Runs `operation` as `user` and restores the previous login when the
    /// scope ends, whichever way it ends. Identity is session-wide on the
    /// underlying CLI login; callers keep at most one privileged scope in
    /// flight.
    pub async fn with_privileges<F, Fut, T>(&self, user: &str, operation: F) -> DynResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DynResult<T>>,
    {
        with_privileges(&self.cli, user, operation).await
    }
}

impl ControlPlaneClient for ApiClient {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn create<'a>(&'a self, manifest: &'a Value) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let kind = manifest
                .get("kind")
                .and_then(Value::as_str)
                .ok_or_else(|| new_error("manifest has no kind"))?;
            let url = self.url_from_segments(&resource_segments(&self.namespace, kind, None))?;
            let response = self
                .apply_auth(self.client.post(url).json(manifest))
                .send()
                .await?;
            self.expect_success(response).await
        })
    }

    fn delete_by_identity<'a>(&'a self, identity: &'a ResourceIdentity) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let namespace = identity.namespace.as_deref().unwrap_or(&self.namespace);
            let url = self.url_from_segments(&resource_segments(
                namespace,
                &identity.kind,
                Some(&identity.name),
            ))?;
            info!("Deleting {identity}");
            let response = self.apply_auth(self.client.delete(url)).send().await?;
            // Deleting an already-absent object is not a failure.
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(());
            }
            self.expect_success(response).await
        })
    }

    fn wait_for_pod<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let description = format!("pod {name} to be ready");
            wait_for(&description, GLOBAL_POLL_INTERVAL, GLOBAL_TIMEOUT, move || {
                async move {
                    Ok(self
                        .get_pod_inner(name)
                        .await?
                        .map(|pod| pod.is_ready())
                        .unwrap_or(false))
                }
            })
            .await?;
            Ok(())
        })
    }

    fn wait_for_resource_deletion<'a>(
        &'a self,
        kind: &'a str,
        name: &'a str,
    ) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let description = format!("{kind} {name} to be deleted");
            info!("Waiting for {description}");
            wait_for(&description, GLOBAL_POLL_INTERVAL, GLOBAL_TIMEOUT, move || {
                async move { Ok(!self.resource_exists(kind, name).await?) }
            })
            .await?;
            Ok(())
        })
    }

    fn get_pod<'a>(&'a self, name: &'a str) -> ClientFuture<'a, Option<Pod>> {
        Box::pin(self.get_pod_inner(name))
    }

    fn get_pods_by_label<'a>(
        &'a self,
        labels: &'a HashMap<String, String>,
    ) -> ClientFuture<'a, Pod> {
        Box::pin(async move {
            let url = self.url_from_segments(&resource_segments(&self.namespace, "pod", None))?;
            let selector = label_selector(labels);
            let response = self
                .apply_auth(self.client.get(url).query(&[("labelSelector", selector.as_str())]))
                .send()
                .await?;
            let list: PodList = self.handle_json(response).await?;
            let mut items = list.items;
            if items.len() != 1 {
                return Err(ambiguous_selection(items.len(), labels));
            }
            Ok(items.remove(0))
        })
    }

    fn fetch_logs<'a>(
        &'a self,
        pod: &'a str,
        container: Option<&'a str>,
    ) -> ClientFuture<'a, String> {
        Box::pin(async move {
            let url = self.url_from_segments(&logs_segments(&self.namespace, pod))?;
            let mut request = self.client.get(url);
            if let Some(container) = container {
                request = request.query(&[("container", container)]);
            }
            let response = self.apply_auth(request).send().await?;
            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(Box::new(HttpError::new(status, text)) as _);
            }
            Ok(response.text().await?)
        })
    }

    fn fetch_events<'a>(&'a self, kind: &'a str, name: &'a str) -> ClientFuture<'a, Vec<Event>> {
        Box::pin(async move {
            let url = self.url_from_segments(&resource_segments(&self.namespace, "event", None))?;
            let selector = format!("involvedObject.kind={kind},involvedObject.name={name}");
            let response = self
                .apply_auth(self.client.get(url).query(&[("fieldSelector", selector.as_str())]))
                .send()
                .await?;
            let list: EventList = self.handle_json(response).await?;
            Ok(list.items)
        })
    }

    fn exec_in_container<'a>(
        &'a self,
        pod: &'a str,
        container: &'a str,
        args: &'a [String],
    ) -> ClientFuture<'a, String> {
        self.cli.exec_in_container(pod, container, args)
    }

    fn apply_template<'a>(
        &'a self,
        template: &'a str,
        params: &'a [(String, String)],
    ) -> ClientFuture<'a, ()> {
        self.cli.apply_template(template, params)
    }
}

/// Path segments for a namespaced object or its collection. Core kinds live
/// under `/api/v1`, workload kinds under `/apis/apps/v1`.
pub fn resource_segments(namespace: &str, kind: &str, name: Option<&str>) -> Vec<String> {
    let lowered = kind.to_ascii_lowercase();
    let plural = if lowered.ends_with('s') {
        format!("{lowered}es")
    } else {
        format!("{lowered}s")
    };

    let mut segments: Vec<String> = match lowered.as_str() {
        "statefulset" | "deployment" | "replicaset" | "daemonset" => {
            vec!["apis".into(), "apps".into(), "v1".into()]
        }
        _ => vec!["api".into(), "v1".into()],
    };
    segments.push("namespaces".into());
    segments.push(namespace.to_string());
    segments.push(plural);
    if let Some(name) = name {
        segments.push(name.to_string());
    }
    segments
}

pub fn logs_segments(namespace: &str, pod: &str) -> Vec<String> {
    let mut segments = resource_segments(namespace, "pod", Some(pod));
    segments.push("log".to_string());
    segments
}
