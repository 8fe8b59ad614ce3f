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
use std::process::Stdio;

use log::{info, trace};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{
    ambiguous_selection, label_selector, ClientFuture, CommandExecutionError, ControlPlaneClient,
    IdentityGateway, ResourceIdentity, GLOBAL_POLL_INTERVAL, GLOBAL_TIMEOUT,
};
use crate::rollwatch::config::Config;
use crate::rollwatch::k8s::event::{Event, EventList};
use crate::rollwatch::k8s::pod::{Pod, PodList};
use crate::rollwatch::util::{new_error, with_context, DynError, DynResult};
use crate::rollwatch::wait::wait_for;

/// Namespace the generic CLI backend acts in unless told otherwise.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Control-plane backend that shells out to a kubectl-style CLI tool for
/// every operation and parses its textual or JSON output.
#[derive(Debug, Clone)]
pub struct CliClient {
    tool: String,
    namespace: String,
}

impl CliClient {
    /// Client over the configured CLI tool, acting in the backend default
    /// namespace.
    pub fn new() -> Self {
        Self::in_namespace(DEFAULT_NAMESPACE)
    }

    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        let tool = Config::CliTool
            .get()
            .unwrap_or_else(|| "kubectl".to_string());
        Self {
            tool,
            namespace: namespace.into(),
        }
    }

    /// Overrides the tool binary; used by backends that wrap a different CLI.
    pub fn with_tool(tool: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            namespace: namespace.into(),
        }
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Runs one CLI invocation and returns captured stdout. Non-zero exit
    /// status becomes a [`CommandExecutionError`].
    pub(crate) async fn run(&self, args: &[String], stdin: Option<&[u8]>) -> DynResult<String> {
        let rendered = format!("{} {}", self.tool, args.join(" "));
        trace!("Invoking {rendered}");

        let mut command = Command::new(&self.tool);
        command
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|err| with_context(err, format!("Failed to spawn {}", self.tool)))?;

        if let Some(payload) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(payload)
                    .await
                    .map_err(|err| with_context(err, format!("Failed to feed {}", self.tool)))?;
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|err| with_context(err, format!("Failed to wait for {}", self.tool)))?;

        if !output.status.success() {
            return Err(Box::new(CommandExecutionError {
                command: rendered,
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn get_pod_inner(&self, name: &str) -> DynResult<Option<Pod>> {
        match self.run(&get_args("pod", name, &self.namespace), None).await {
            Ok(stdout) => Ok(Some(serde_json::from_str(&stdout)?)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn resource_exists(&self, kind: &str, name: &str) -> DynResult<bool> {
        match self.run(&exists_args(kind, name, &self.namespace), None).await {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

impl Default for CliClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlPlaneClient for CliClient {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn create<'a>(&'a self, manifest: &'a Value) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let payload = serde_json::to_vec(manifest)?;
            self.run(&create_args(&self.namespace), Some(&payload))
                .await?;
            Ok(())
        })
    }

    fn delete_by_identity<'a>(&'a self, identity: &'a ResourceIdentity) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let namespace = identity.namespace.as_deref().unwrap_or(&self.namespace);
            info!("Deleting {identity}");
            self.run(&delete_args(&identity.kind, &identity.name, namespace), None)
                .await?;
            Ok(())
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
            let stdout = self
                .run(&pods_by_label_args(labels, &self.namespace), None)
                .await?;
            let list: PodList = serde_json::from_str(&stdout)?;
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
        Box::pin(self.run_owned(logs_args(pod, container, &self.namespace)))
    }

    fn fetch_events<'a>(&'a self, kind: &'a str, name: &'a str) -> ClientFuture<'a, Vec<Event>> {
        Box::pin(async move {
            let stdout = self
                .run(&events_args(kind, name, &self.namespace), None)
                .await?;
            let list: EventList = serde_json::from_str(&stdout)?;
            Ok(list.items)
        })
    }

    fn exec_in_container<'a>(
        &'a self,
        pod: &'a str,
        container: &'a str,
        args: &'a [String],
    ) -> ClientFuture<'a, String> {
        Box::pin(self.run_owned(exec_args(pod, container, args, &self.namespace)))
    }

    fn apply_template<'a>(
        &'a self,
        template: &'a str,
        params: &'a [(String, String)],
    ) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.run(&template_args(template, params, &self.namespace), None)
                .await?;
            Ok(())
        })
    }
}

impl CliClient {
    async fn run_owned(&self, args: Vec<String>) -> DynResult<String> {
        self.run(&args, None).await
    }
}

impl IdentityGateway for CliClient {
    fn current_identity(&self) -> ClientFuture<'_, String> {
        Box::pin(async move {
            let stdout = self.run(&[String::from("whoami")], None).await?;
            let identity = stdout.trim().to_string();
            if identity.is_empty() {
                return Err(new_error(format!(
                    "{} whoami reported no active identity",
                    self.tool
                )));
            }
            Ok(identity)
        })
    }

    fn login<'a>(&'a self, user: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.run(
                &[
                    String::from("login"),
                    String::from("-u"),
                    user.to_string(),
                ],
                None,
            )
            .await?;
            Ok(())
        })
    }
}

fn is_not_found(err: &DynError) -> bool {
    err.downcast_ref::<CommandExecutionError>()
        .map(|failure| {
            failure.stderr.contains("NotFound") || failure.stderr.contains("not found")
        })
        .unwrap_or(false)
}

fn namespaced(mut args: Vec<String>, namespace: &str) -> Vec<String> {
    args.push("--namespace".to_string());
    args.push(namespace.to_string());
    args
}

pub fn create_args(namespace: &str) -> Vec<String> {
    namespaced(
        vec!["create".to_string(), "-f".to_string(), "-".to_string()],
        namespace,
    )
}

pub fn get_args(kind: &str, name: &str, namespace: &str) -> Vec<String> {
    let mut args = namespaced(
        vec!["get".to_string(), kind.to_string(), name.to_string()],
        namespace,
    );
    args.push("-o".to_string());
    args.push("json".to_string());
    args
}

pub fn exists_args(kind: &str, name: &str, namespace: &str) -> Vec<String> {
    let mut args = namespaced(
        vec!["get".to_string(), kind.to_string(), name.to_string()],
        namespace,
    );
    args.push("-o".to_string());
    args.push("name".to_string());
    args
}

pub fn delete_args(kind: &str, name: &str, namespace: &str) -> Vec<String> {
    namespaced(
        vec!["delete".to_string(), kind.to_string(), name.to_string()],
        namespace,
    )
}

pub fn pods_by_label_args(labels: &HashMap<String, String>, namespace: &str) -> Vec<String> {
    let mut args = namespaced(vec!["get".to_string(), "pods".to_string()], namespace);
    args.push("-l".to_string());
    args.push(label_selector(labels));
    args.push("-o".to_string());
    args.push("json".to_string());
    args
}

pub fn logs_args(pod: &str, container: Option<&str>, namespace: &str) -> Vec<String> {
    let mut args = namespaced(vec!["logs".to_string(), pod.to_string()], namespace);
    if let Some(container) = container {
        args.push("-c".to_string());
        args.push(container.to_string());
    }
    args
}

pub fn events_args(kind: &str, name: &str, namespace: &str) -> Vec<String> {
    let mut args = namespaced(vec!["get".to_string(), "events".to_string()], namespace);
    args.push("--field-selector".to_string());
    args.push(format!(
        "involvedObject.kind={kind},involvedObject.name={name}"
    ));
    args.push("-o".to_string());
    args.push("json".to_string());
    args
}

pub fn exec_args(pod: &str, container: &str, command: &[String], namespace: &str) -> Vec<String> {
    let mut args = namespaced(vec!["exec".to_string(), pod.to_string()], namespace);
    args.push("-c".to_string());
    args.push(container.to_string());
    args.push("--".to_string());
    args.extend(command.iter().cloned());
    args
}

pub fn template_args(template: &str, params: &[(String, String)], namespace: &str) -> Vec<String> {
    let mut args = namespaced(
        vec!["new-app".to_string(), template.to_string()],
        namespace,
    );
    for (key, value) in params {
        args.push("-p".to_string());
        args.push(format!("{key}={value}"));
    }
    args
}
