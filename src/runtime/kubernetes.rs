//! Kubernetes runtime backend.
//!
//! Renders resolutions into kagent/kmcp custom resources and converges the
//! cluster with server-side apply under a fixed field manager. Resources
//! carry a managed-by label; labelled resources absent from the desired
//! state are deleted on the next reconcile.

use std::collections::BTreeMap;
use std::collections::HashSet;

use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams};
use kube::Client;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};

use super::translator::{
    DesiredState, ResolvedAgent, ResolvedServer, ServerBinding, TransportKind,
};

const FIELD_MANAGER: &str = "amphora-registry";
const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Env key that overrides the target namespace per deployment.
const NAMESPACE_ENV: &str = "KAGENT_NAMESPACE";

fn agent_gvk() -> (GroupVersionKind, &'static str) {
    (GroupVersionKind::gvk("kagent.dev", "v1alpha2", "Agent"), "agents")
}

fn remote_mcp_gvk() -> (GroupVersionKind, &'static str) {
    (
        GroupVersionKind::gvk("kagent.dev", "v1alpha2", "RemoteMCPServer"),
        "remotemcpservers",
    )
}

fn mcp_server_gvk() -> (GroupVersionKind, &'static str) {
    (
        GroupVersionKind::gvk("kagent.dev", "v1alpha1", "MCPServer"),
        "mcpservers",
    )
}

fn config_map_gvk() -> (GroupVersionKind, &'static str) {
    (GroupVersionKind::gvk("", "v1", "ConfigMap"), "configmaps")
}

fn secret_gvk() -> (GroupVersionKind, &'static str) {
    (GroupVersionKind::gvk("", "v1", "Secret"), "secrets")
}

pub struct KubernetesReconciler {
    default_namespace: String,
}

/// A rendered manifest plus where it goes.
#[derive(Debug, Clone)]
struct RenderedObject {
    gvk: GroupVersionKind,
    plural: &'static str,
    namespace: String,
    name: String,
    manifest: Value,
}

impl KubernetesReconciler {
    pub fn new(default_namespace: impl Into<String>) -> Self {
        Self {
            default_namespace: default_namespace.into(),
        }
    }

    /// Converge the cluster to `desired`: server-side apply every rendered
    /// object (force ownership), then delete managed leftovers. Partial
    /// failures are returned without undoing earlier applies.
    pub async fn apply(&self, desired: &DesiredState) -> Result<()> {
        let objects = self.render(desired)?;

        let client = Client::try_default()
            .await
            .map_err(|e| AppError::RuntimeApplyFailed(format!("kubernetes client: {e}")))?;

        let params = PatchParams::apply(FIELD_MANAGER).force();
        for obj in &objects {
            let api = self.dynamic_api(&client, &obj.gvk, obj.plural, &obj.namespace);
            let dynamic: DynamicObject = serde_json::from_value(obj.manifest.clone())?;
            api.patch(&obj.name, &params, &Patch::Apply(&dynamic))
                .await
                .map_err(|e| {
                    AppError::RuntimeApplyFailed(format!(
                        "{} {}/{}: {e}",
                        obj.gvk.kind, obj.namespace, obj.name
                    ))
                })?;
            debug!(kind = %obj.gvk.kind, namespace = %obj.namespace, name = %obj.name, "applied");
        }

        self.prune(&client, &objects).await?;

        info!(
            objects = objects.len(),
            "kubernetes runtime converged"
        );
        Ok(())
    }

    fn dynamic_api(
        &self,
        client: &Client,
        gvk: &GroupVersionKind,
        plural: &'static str,
        namespace: &str,
    ) -> Api<DynamicObject> {
        let resource = ApiResource::from_gvk_with_plural(gvk, plural);
        Api::namespaced_with(client.clone(), namespace, &resource)
    }

    /// Delete managed resources that are no longer part of the desired
    /// state. Scoped to namespaces the desired state touches (plus the
    /// default namespace, so teardown to empty still prunes).
    async fn prune(&self, client: &Client, desired: &[RenderedObject]) -> Result<()> {
        let mut namespaces: HashSet<String> = desired.iter().map(|o| o.namespace.clone()).collect();
        namespaces.insert(self.default_namespace.clone());

        let keep: HashSet<(String, String, String)> = desired
            .iter()
            .map(|o| (o.gvk.kind.clone(), o.namespace.clone(), o.name.clone()))
            .collect();

        let selector = format!("{MANAGED_BY_LABEL}={FIELD_MANAGER}");
        let list_params = ListParams::default().labels(&selector);

        for (gvk, plural) in [
            agent_gvk(),
            remote_mcp_gvk(),
            mcp_server_gvk(),
            config_map_gvk(),
            secret_gvk(),
        ] {
            for namespace in &namespaces {
                let api = self.dynamic_api(client, &gvk, plural, namespace);
                let existing = match api.list(&list_params).await {
                    Ok(list) => list,
                    Err(e) => {
                        // A missing CRD is not an apply failure; nothing of
                        // that kind can exist to prune.
                        warn!(kind = %gvk.kind, %namespace, "prune list failed: {e}");
                        continue;
                    }
                };
                for item in existing.items {
                    let Some(name) = item.metadata.name.clone() else {
                        continue;
                    };
                    let key = (gvk.kind.clone(), namespace.clone(), name.clone());
                    if keep.contains(&key) {
                        continue;
                    }
                    match api.delete(&name, &DeleteParams::default()).await {
                        Ok(_) => {
                            info!(kind = %gvk.kind, %namespace, %name, "pruned");
                        }
                        Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                        Err(e) => {
                            return Err(AppError::RuntimeApplyFailed(format!(
                                "prune {} {namespace}/{name}: {e}",
                                gvk.kind
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Render the full object set for a desired state.
    fn render(&self, desired: &DesiredState) -> Result<Vec<RenderedObject>> {
        let mut out = Vec::new();

        for server in &desired.mcp_servers {
            out.extend(self.render_server(server)?);
        }
        for agent in &desired.agents {
            out.extend(self.render_agent(agent)?);
        }
        Ok(out)
    }

    fn namespace_for(&self, env: &BTreeMap<String, String>) -> String {
        match env.get(NAMESPACE_ENV) {
            Some(ns) if !ns.is_empty() => ns.clone(),
            _ => self.default_namespace.clone(),
        }
    }

    fn render_server(&self, server: &ResolvedServer) -> Result<Vec<RenderedObject>> {
        match &server.binding {
            ServerBinding::Remote(remote) => {
                let namespace = self.default_namespace.clone();
                let mut objects = Vec::new();

                let secret_name = format!("{}-headers", server.runtime_name);
                let secret_headers: BTreeMap<String, String> = remote
                    .headers
                    .iter()
                    .filter(|h| h.is_secret)
                    .map(|h| (h.name.clone(), h.value.clone()))
                    .collect();

                let headers_from: Vec<Value> = remote
                    .headers
                    .iter()
                    .map(|h| {
                        if h.is_secret {
                            json!({
                                "name": h.name,
                                "valueFrom": {
                                    "secretKeyRef": {"name": secret_name, "key": h.name}
                                }
                            })
                        } else {
                            json!({"name": h.name, "value": h.value})
                        }
                    })
                    .collect();

                // Secret credentials live in a Secret object the CR references.
                if !secret_headers.is_empty() {
                    let (gvk, plural) = secret_gvk();
                    objects.push(RenderedObject {
                        gvk,
                        plural,
                        namespace: namespace.clone(),
                        name: secret_name.clone(),
                        manifest: json!({
                            "apiVersion": "v1",
                            "kind": "Secret",
                            "metadata": {
                                "name": secret_name,
                                "namespace": namespace,
                                "labels": {MANAGED_BY_LABEL: FIELD_MANAGER},
                            },
                            "stringData": secret_headers,
                        }),
                    });
                }

                // Streamable HTTP is the only protocol value verified
                // against kagent; SSE remotes are applied with it too.
                let mut spec = json!({
                    "description": server.name,
                    "protocol": "STREAMABLE_HTTP",
                    "url": remote.url,
                });
                if !headers_from.is_empty() {
                    spec["headersFrom"] = Value::Array(headers_from);
                }

                let (gvk, plural) = remote_mcp_gvk();
                objects.push(RenderedObject {
                    gvk,
                    plural,
                    namespace: namespace.clone(),
                    name: server.runtime_name.clone(),
                    manifest: json!({
                        "apiVersion": "kagent.dev/v1alpha2",
                        "kind": "RemoteMCPServer",
                        "metadata": {
                            "name": server.runtime_name,
                            "namespace": namespace,
                            "labels": {MANAGED_BY_LABEL: FIELD_MANAGER},
                        },
                        "spec": spec,
                    }),
                });
                Ok(objects)
            }
            ServerBinding::Local(local) => {
                let namespace = self.namespace_for(&local.container.env);

                let mut deployment = json!({
                    "image": local.container.image,
                });
                if let Some(cmd) = &local.container.cmd {
                    deployment["cmd"] = json!(cmd);
                }
                if !local.container.args.is_empty() {
                    deployment["args"] = json!(local.container.args);
                }
                if !local.container.env.is_empty() {
                    deployment["env"] = json!(local.container.env);
                }

                let mut spec = json!({"deployment": deployment});
                match (&local.transport, &local.http) {
                    (TransportKind::Stdio, _) | (_, None) => {
                        spec["transportType"] = json!("stdio");
                        spec["stdioTransport"] = json!({});
                    }
                    (_, Some(http)) => {
                        spec["transportType"] = json!("http");
                        spec["httpTransport"] = json!({
                            "targetPort": http.port,
                            "targetPath": http.path,
                        });
                        spec["deployment"]["port"] = json!(http.port);
                    }
                }

                let (gvk, plural) = mcp_server_gvk();
                Ok(vec![RenderedObject {
                    gvk,
                    plural,
                    namespace: namespace.clone(),
                    name: server.runtime_name.clone(),
                    manifest: json!({
                        "apiVersion": "kagent.dev/v1alpha1",
                        "kind": "MCPServer",
                        "metadata": {
                            "name": server.runtime_name,
                            "namespace": namespace,
                            "labels": {MANAGED_BY_LABEL: FIELD_MANAGER},
                        },
                        "spec": spec,
                    }),
                }])
            }
        }
    }

    fn render_agent(&self, agent: &ResolvedAgent) -> Result<Vec<RenderedObject>> {
        if agent.container.image.is_empty() {
            return Err(AppError::ValidationFailed(format!(
                "image must be specified for agent {}",
                agent.name
            )));
        }

        let namespace = self.namespace_for(&agent.container.env);
        let mut objects = Vec::new();

        let env: Vec<Value> = agent
            .container
            .env
            .iter()
            .map(|(name, value)| json!({"name": name, "value": value}))
            .collect();

        let mut deployment = json!({
            "image": agent.container.image,
            "env": env,
        });

        // Agents with resolved MCP dependencies read their connection list
        // from a ConfigMap mounted at /config.
        if !agent.servers.is_empty() {
            let config_map_name = format!("{}-mcp-config", agent.runtime_name);
            let servers_json = serde_json::to_string_pretty(&agent.servers)?;

            let (gvk, plural) = config_map_gvk();
            objects.push(RenderedObject {
                gvk,
                plural,
                namespace: namespace.clone(),
                name: config_map_name.clone(),
                manifest: json!({
                    "apiVersion": "v1",
                    "kind": "ConfigMap",
                    "metadata": {
                        "name": config_map_name,
                        "namespace": namespace,
                        "labels": {MANAGED_BY_LABEL: FIELD_MANAGER},
                        "ownerReferences": [{
                            "apiVersion": "kagent.dev/v1alpha2",
                            "kind": "Agent",
                            "name": agent.runtime_name,
                        }],
                    },
                    "data": {"mcp-servers.json": servers_json},
                }),
            });

            deployment["volumes"] = json!([{
                "name": "mcp-config",
                "configMap": {
                    "name": config_map_name,
                    "items": [{"key": "mcp-servers.json", "path": "mcp-servers.json"}],
                }
            }]);
            deployment["volumeMounts"] = json!([{
                "name": "mcp-config",
                "mountPath": "/config",
                "readOnly": true,
            }]);
        }

        let (gvk, plural) = agent_gvk();
        objects.push(RenderedObject {
            gvk,
            plural,
            namespace: namespace.clone(),
            name: agent.runtime_name.clone(),
            manifest: json!({
                "apiVersion": "kagent.dev/v1alpha2",
                "kind": "Agent",
                "metadata": {
                    "name": agent.runtime_name,
                    "namespace": namespace,
                    "labels": {MANAGED_BY_LABEL: FIELD_MANAGER},
                },
                "spec": {
                    "description": agent.name,
                    "type": "BYO",
                    "byo": {"deployment": deployment},
                },
            }),
        });

        Ok(objects)
    }
}
