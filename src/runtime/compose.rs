//! Local runtime backend: renders a docker-compose project plus an
//! agent-gateway config into the runtime directory, then lets
//! `docker compose` converge it.
//!
//! Apply semantics: every reconcile rewrites both files and recreates all
//! services (`--force-recreate`) so config changes always take effect;
//! services that left the desired state disappear via `--remove-orphans`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{AppError, Result};

use super::translator::{DesiredState, ResolvedServer, ServerBinding, DEFAULT_MCP_PORT};

const COMPOSE_FILE: &str = "docker-compose.yaml";
const GATEWAY_CONFIG_FILE: &str = "agent-gateway.yaml";
const GATEWAY_DOCKERFILE: &str = "gateway.Dockerfile";
const GATEWAY_SERVICE: &str = "agent-gateway";
const GATEWAY_IMAGE: &str = "amphora-agent-gateway:local";
const GATEWAY_PORT: u16 = 8811;

/// Dockerfile the gateway image is built from on first use.
const GATEWAY_DOCKERFILE_TEMPLATE: &str = include_str!("gateway.dockerfile");

#[derive(Debug, Serialize)]
struct ComposeFile {
    services: BTreeMap<String, ComposeService>,
}

#[derive(Debug, Default, Serialize)]
struct ComposeService {
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    entrypoint: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    command: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    volumes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    depends_on: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    stdin_open: bool,
    restart: &'static str,
    labels: BTreeMap<String, String>,
}

/// Gateway config: one entry per child MCP server.
#[derive(Debug, Serialize)]
struct GatewayConfig {
    listen: String,
    servers: Vec<GatewayServer>,
}

/// Also the shape of each agent's mounted `mcp-servers.json` entry.
#[derive(Debug, Clone, Serialize)]
struct GatewayServer {
    name: String,
    #[serde(rename = "type")]
    server_type: &'static str,
    url: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
}

pub struct LocalReconciler {
    runtime_dir: PathBuf,
}

impl LocalReconciler {
    pub fn new(runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime_dir: runtime_dir.into(),
        }
    }

    /// Converge the local docker runtime to `desired`. Idempotent; a failed
    /// apply leaves previously started services running and the next
    /// reconcile retries from the same input.
    pub async fn apply(&self, desired: &DesiredState) -> Result<()> {
        if desired.is_empty() {
            return self.teardown().await;
        }

        tokio::fs::create_dir_all(&self.runtime_dir).await?;
        self.ensure_gateway_image().await?;

        let compose = render_compose(desired);
        let compose_yaml = serde_yaml::to_string(&compose)
            .map_err(|e| AppError::Internal(format!("compose serialization: {e}")))?;
        tokio::fs::write(self.runtime_dir.join(COMPOSE_FILE), compose_yaml).await?;

        let gateway_yaml = serde_yaml::to_string(&render_gateway_config(desired))
            .map_err(|e| AppError::Internal(format!("gateway config serialization: {e}")))?;
        tokio::fs::write(self.runtime_dir.join(GATEWAY_CONFIG_FILE), gateway_yaml).await?;

        // Per-agent MCP server config, mounted at /config/mcp-servers.json.
        for agent in &desired.agents {
            let entries: Vec<GatewayServer> =
                agent.servers.iter().map(gateway_entry).collect();
            let path = self
                .runtime_dir
                .join(format!("{}-mcp-servers.json", agent.runtime_name));
            tokio::fs::write(path, serde_json::to_vec_pretty(&entries)?).await?;
        }

        // All services are recreated on every reconcile so config uptake is
        // guaranteed; orphans of removed deployments are pruned.
        self.compose(&[
            "up",
            "-d",
            "--remove-orphans",
            "--force-recreate",
        ])
        .await?;

        info!(
            servers = desired.mcp_servers.len(),
            agents = desired.agents.len(),
            dir = %self.runtime_dir.display(),
            "local runtime converged"
        );
        Ok(())
    }

    /// Tear the project down when the desired state is empty.
    async fn teardown(&self) -> Result<()> {
        if !self.runtime_dir.join(COMPOSE_FILE).exists() {
            return Ok(());
        }
        self.compose(&["down", "--remove-orphans"]).await?;
        info!(dir = %self.runtime_dir.display(), "local runtime torn down");
        Ok(())
    }

    /// Build the agent-gateway image from the embedded Dockerfile on first
    /// use; subsequent reconciles reuse the local tag.
    async fn ensure_gateway_image(&self) -> Result<()> {
        let inspect = Command::new("docker")
            .args(["image", "inspect", GATEWAY_IMAGE])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        if inspect.success() {
            return Ok(());
        }

        debug!(image = GATEWAY_IMAGE, "building agent-gateway image");
        let dockerfile = self.runtime_dir.join(GATEWAY_DOCKERFILE);
        tokio::fs::write(&dockerfile, GATEWAY_DOCKERFILE_TEMPLATE).await?;

        run_docker(
            &self.runtime_dir,
            &[
                "build",
                "-t",
                GATEWAY_IMAGE,
                "-f",
                GATEWAY_DOCKERFILE,
                ".",
            ],
        )
        .await
    }

    async fn compose(&self, args: &[&str]) -> Result<()> {
        let mut full = vec!["compose"];
        full.extend_from_slice(args);
        run_docker(&self.runtime_dir, &full).await
    }
}

async fn run_docker(dir: &Path, args: &[&str]) -> Result<()> {
    let output = Command::new("docker")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| AppError::RuntimeApplyFailed(format!("failed to run docker: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::RuntimeApplyFailed(format!(
            "docker {} exited with {}: {}",
            args.join(" "),
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(
        "dev.amphora.managed-by".to_string(),
        "amphora-registry".to_string(),
    )])
}

/// The service endpoint a child server is reachable at inside the compose
/// network. Stdio servers are fronted on the default MCP port.
fn server_endpoint(server: &ResolvedServer) -> (u16, String) {
    match &server.binding {
        ServerBinding::Local(local) => match &local.http {
            Some(http) => (http.port, http.path.clone()),
            None => (DEFAULT_MCP_PORT, "/mcp".to_string()),
        },
        ServerBinding::Remote(_) => (0, String::new()),
    }
}

fn gateway_entry(server: &ResolvedServer) -> GatewayServer {
    match &server.binding {
        ServerBinding::Remote(remote) => GatewayServer {
            name: server.name.clone(),
            server_type: "remote",
            url: remote.url.clone(),
            headers: remote
                .headers
                .iter()
                .map(|h| (h.name.clone(), h.value.clone()))
                .collect(),
        },
        ServerBinding::Local(_) => {
            let (port, path) = server_endpoint(server);
            GatewayServer {
                name: server.name.clone(),
                server_type: "command",
                url: format!("http://{}:{port}{path}", server.runtime_name),
                headers: BTreeMap::new(),
            }
        }
    }
}

fn render_gateway_config(desired: &DesiredState) -> GatewayConfig {
    GatewayConfig {
        listen: format!("0.0.0.0:{GATEWAY_PORT}"),
        servers: desired.mcp_servers.iter().map(gateway_entry).collect(),
    }
}

fn render_compose(desired: &DesiredState) -> ComposeFile {
    let mut services = BTreeMap::new();
    let mut local_service_names = Vec::new();

    for server in &desired.mcp_servers {
        let ServerBinding::Local(local) = &server.binding else {
            continue;
        };
        local_service_names.push(server.runtime_name.clone());
        services.insert(
            server.runtime_name.clone(),
            ComposeService {
                image: local.container.image.clone(),
                entrypoint: local.container.cmd.clone().map(|c| vec![c]),
                command: local.container.args.clone(),
                environment: local.container.env.clone(),
                stdin_open: local.http.is_none(),
                restart: "unless-stopped",
                labels: managed_labels(),
                ..Default::default()
            },
        );
    }

    // One gateway service aggregating every child server endpoint.
    services.insert(
        GATEWAY_SERVICE.to_string(),
        ComposeService {
            image: GATEWAY_IMAGE.to_string(),
            ports: vec![format!("{GATEWAY_PORT}:{GATEWAY_PORT}")],
            volumes: vec![format!(
                "./{GATEWAY_CONFIG_FILE}:/etc/agent-gateway/{GATEWAY_CONFIG_FILE}:ro"
            )],
            depends_on: local_service_names.clone(),
            restart: "unless-stopped",
            labels: managed_labels(),
            ..Default::default()
        },
    );

    for agent in &desired.agents {
        services.insert(
            agent.runtime_name.clone(),
            ComposeService {
                image: agent.container.image.clone(),
                entrypoint: agent.container.cmd.clone().map(|c| vec![c]),
                command: agent.container.args.clone(),
                environment: agent.container.env.clone(),
                volumes: vec![format!(
                    "./{}-mcp-servers.json:/config/mcp-servers.json:ro",
                    agent.runtime_name
                )],
                depends_on: vec![GATEWAY_SERVICE.to_string()],
                restart: "unless-stopped",
                labels: managed_labels(),
                ..Default::default()
            },
        );
    }

    ComposeFile { services }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::translator::{
        ContainerSpec, HttpEndpoint, LocalBinding, RemoteBinding, ResolvedAgent, ResolvedHeader,
        TransportKind,
    };

    fn local_server(name: &str, port: Option<u16>) -> ResolvedServer {
        ResolvedServer {
            name: format!("io.example/{name}"),
            version: "1.0.0".into(),
            runtime_name: format!("io-example-{name}-1-0-0"),
            binding: ServerBinding::Local(LocalBinding {
                transport: if port.is_some() {
                    TransportKind::Http
                } else {
                    TransportKind::Stdio
                },
                http: port.map(|p| HttpEndpoint {
                    port: p,
                    path: "/mcp".into(),
                }),
                container: ContainerSpec {
                    image: "node:22-alpine".into(),
                    cmd: Some("npx".into()),
                    args: vec!["-y".into(), "pkg".into()],
                    env: BTreeMap::from([("API_KEY".into(), "k".into())]),
                },
            }),
        }
    }

    fn remote_server(name: &str) -> ResolvedServer {
        ResolvedServer {
            name: format!("io.example/{name}"),
            version: "1.0.0".into(),
            runtime_name: format!("io-example-{name}-1-0-0"),
            binding: ServerBinding::Remote(RemoteBinding {
                url: "https://mcp.example/x".into(),
                transport: TransportKind::Http,
                headers: vec![ResolvedHeader {
                    name: "X-Trace".into(),
                    value: "t".into(),
                    is_secret: false,
                }],
            }),
        }
    }

    #[test]
    fn test_render_compose_one_service_per_local_server_plus_gateway() {
        let desired = DesiredState {
            mcp_servers: vec![local_server("echo", None), remote_server("hosted")],
            agents: vec![],
        };
        let compose = render_compose(&desired);

        // Remote servers get no compose service; the gateway proxies them.
        assert_eq!(compose.services.len(), 2);
        assert!(compose.services.contains_key("io-example-echo-1-0-0"));
        assert!(compose.services.contains_key(GATEWAY_SERVICE));

        let echo = &compose.services["io-example-echo-1-0-0"];
        assert_eq!(echo.image, "node:22-alpine");
        assert_eq!(echo.entrypoint.as_deref(), Some(&["npx".to_string()][..]));
        assert_eq!(echo.command, vec!["-y", "pkg"]);
        assert!(echo.stdin_open);

        let gateway = &compose.services[GATEWAY_SERVICE];
        assert_eq!(gateway.depends_on, vec!["io-example-echo-1-0-0"]);
        assert_eq!(gateway.ports, vec!["8811:8811"]);
    }

    #[test]
    fn test_render_compose_agent_mounts_server_config() {
        let desired = DesiredState {
            mcp_servers: vec![],
            agents: vec![ResolvedAgent {
                name: "io.example/assistant".into(),
                version: "1.0.0".into(),
                runtime_name: "io-example-assistant-1-0-0".into(),
                container: ContainerSpec {
                    image: "ghcr.io/example/agent:1.0.0".into(),
                    ..Default::default()
                },
                servers: vec![local_server("echo", Some(3000))],
            }],
        };
        let compose = render_compose(&desired);
        let agent = &compose.services["io-example-assistant-1-0-0"];
        assert_eq!(
            agent.volumes,
            vec!["./io-example-assistant-1-0-0-mcp-servers.json:/config/mcp-servers.json:ro"]
        );
        assert_eq!(agent.depends_on, vec![GATEWAY_SERVICE]);
    }

    #[test]
    fn test_gateway_config_mixes_command_and_remote_entries() {
        let desired = DesiredState {
            mcp_servers: vec![local_server("echo", Some(8931)), remote_server("hosted")],
            agents: vec![],
        };
        let config = render_gateway_config(&desired);
        assert_eq!(config.listen, "0.0.0.0:8811");
        assert_eq!(config.servers.len(), 2);

        let local = &config.servers[0];
        assert_eq!(local.server_type, "command");
        assert_eq!(local.url, "http://io-example-echo-1-0-0:8931/mcp");

        let remote = &config.servers[1];
        assert_eq!(remote.server_type, "remote");
        assert_eq!(remote.url, "https://mcp.example/x");
        assert_eq!(remote.headers.get("X-Trace").map(String::as_str), Some("t"));
    }

    #[test]
    fn test_stdio_server_defaults_to_mcp_port_in_gateway() {
        let desired = DesiredState {
            mcp_servers: vec![local_server("echo", None)],
            agents: vec![],
        };
        let config = render_gateway_config(&desired);
        assert_eq!(config.servers[0].url, "http://io-example-echo-1-0-0:3000/mcp");
    }

    #[test]
    fn test_compose_rendering_is_deterministic() {
        let desired = DesiredState {
            mcp_servers: vec![local_server("b", None), local_server("a", None)],
            agents: vec![],
        };
        let a = serde_yaml::to_string(&render_compose(&desired)).unwrap();
        let b = serde_yaml::to_string(&render_compose(&desired)).unwrap();
        assert_eq!(a, b);
    }
}
