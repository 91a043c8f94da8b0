//! MCP tool binding.
//!
//! Surfaces the deployment operations as discoverable MCP tools over a
//! streamable-HTTP transport, so agents can drive deploys through the same
//! state machine the REST API uses. When a token verifier is configured,
//! requests must carry a bearer token mapping onto the same permission
//! model.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::{self, Next},
    response::Response,
    Router,
};
use rmcp::model::*;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpService,
};
use rmcp::{ErrorData as McpError, ServerHandler};
use serde::Deserialize;
use serde_json::json;

use crate::api::SharedState;
use crate::config::RuntimeTarget;
use crate::error::AppError;
use crate::models::DeployableKind;
use crate::services::deployment::Deployments;

/// MCP server exposing the deployment tool set.
#[derive(Clone)]
pub struct DeploymentTools {
    deployments: Arc<dyn Deployments>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListArgs {
    #[serde(default)]
    resource_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyArgs {
    server_name: String,
    version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeployArgs {
    server_name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    config: BTreeMap<String, String>,
    #[serde(default)]
    prefer_remote: bool,
    #[serde(default)]
    runtime: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateConfigArgs {
    server_name: String,
    version: String,
    config: BTreeMap<String, String>,
}

impl DeploymentTools {
    pub fn new(deployments: Arc<dyn Deployments>) -> Self {
        Self { deployments }
    }

    fn tool(name: &'static str, description: &'static str, schema: serde_json::Value) -> Tool {
        let input_schema = match schema {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::new()),
        };
        Tool {
            name: Cow::Borrowed(name),
            title: None,
            description: Some(Cow::Borrowed(description)),
            input_schema,
            output_schema: None,
            annotations: None,
            icons: None,
        }
    }

    fn tools() -> Vec<Tool> {
        vec![
            Self::tool(
                "list_deployments",
                "List deployed resources (MCP servers, agents) with their configurations",
                json!({
                    "type": "object",
                    "properties": {
                        "resourceType": {
                            "type": "string",
                            "enum": ["mcp", "agent"],
                            "description": "Filter by resource type"
                        }
                    }
                }),
            ),
            Self::tool(
                "get_deployment",
                "Get details for one deployed resource",
                json!({
                    "type": "object",
                    "properties": {
                        "serverName": {"type": "string"},
                        "version": {"type": "string"}
                    },
                    "required": ["serverName", "version"]
                }),
            ),
            Self::tool(
                "deploy_server",
                "Deploy an MCP server with optional configuration",
                deploy_schema(),
            ),
            Self::tool(
                "deploy_agent",
                "Deploy an agent with optional configuration",
                deploy_schema(),
            ),
            Self::tool(
                "update_deployment_config",
                "Replace the configuration of a deployed resource",
                json!({
                    "type": "object",
                    "properties": {
                        "serverName": {"type": "string"},
                        "version": {"type": "string"},
                        "config": {"type": "object", "additionalProperties": {"type": "string"}}
                    },
                    "required": ["serverName", "version", "config"]
                }),
            ),
            Self::tool(
                "remove_deployment",
                "Remove a deployed resource; the next reconcile tears it down",
                json!({
                    "type": "object",
                    "properties": {
                        "serverName": {"type": "string"},
                        "version": {"type": "string"}
                    },
                    "required": ["serverName", "version"]
                }),
            ),
        ]
    }

    async fn dispatch(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, AppError> {
        match name {
            "list_deployments" => {
                let args: ListArgs = parse_args(args)?;
                let resource_type = args
                    .resource_type
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .map(DeployableKind::parse)
                    .transpose()?;
                let deployments = self.deployments.list(resource_type).await?;
                let count = deployments.len();
                Ok(json!({
                    "deployments": deployments,
                    "count": count,
                }))
            }
            "get_deployment" => {
                let args: KeyArgs = parse_args(args)?;
                let deployment = self
                    .deployments
                    .get(&args.server_name, &args.version)
                    .await?;
                Ok(serde_json::to_value(deployment)?)
            }
            "deploy_server" | "deploy_agent" => {
                let resource_type = if name == "deploy_server" {
                    DeployableKind::Mcp
                } else {
                    DeployableKind::Agent
                };
                let args: DeployArgs = parse_args(args)?;
                let runtime = if args.runtime.is_empty() {
                    None
                } else {
                    Some(RuntimeTarget::parse(&args.runtime)?)
                };
                let deployment = self
                    .deployments
                    .deploy(
                        resource_type,
                        &args.server_name,
                        &args.version,
                        args.config,
                        args.prefer_remote,
                        runtime,
                    )
                    .await?;
                Ok(serde_json::to_value(deployment)?)
            }
            "update_deployment_config" => {
                let args: UpdateConfigArgs = parse_args(args)?;
                let deployment = self
                    .deployments
                    .update_config(&args.server_name, &args.version, args.config)
                    .await?;
                Ok(serde_json::to_value(deployment)?)
            }
            "remove_deployment" => {
                let args: KeyArgs = parse_args(args)?;
                self.deployments
                    .remove(&args.server_name, &args.version)
                    .await?;
                Ok(json!({"status": "deleted"}))
            }
            other => Err(AppError::NotFound(format!("unknown tool {other}"))),
        }
    }
}

fn deploy_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "serverName": {"type": "string", "description": "Artifact name, e.g. io.example/echo"},
            "version": {"type": "string", "description": "Version to deploy; defaults to latest"},
            "config": {"type": "object", "additionalProperties": {"type": "string"}},
            "preferRemote": {"type": "boolean"},
            "runtime": {"type": "string", "enum": ["local", "kubernetes"]}
        },
        "required": ["serverName"]
    })
}

fn parse_args<T: serde::de::DeserializeOwned>(args: serde_json::Value) -> Result<T, AppError> {
    serde_json::from_value(args)
        .map_err(|e| AppError::ValidationFailed(format!("invalid tool arguments: {e}")))
}

impl DeploymentTools {
    fn get_tool(&self, name: &str) -> Option<Tool> {
        Self::tools().into_iter().find(|t| t.name == name)
    }
}

impl ServerHandler for DeploymentTools {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "amphora-registry".to_string(),
                title: Some("Amphora Registry".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Deploy and manage agentic artifacts from the registry. Use \
                 list_deployments to see what is running, deploy_server or \
                 deploy_agent to start something, and remove_deployment to \
                 tear it down."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(Self::tools())))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        if Self::tools().iter().all(|t| t.name != request.name) {
            return Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", request.name),
                None,
            ));
        }

        let args = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        match self.dispatch(&request.name, args).await {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }
}

/// Bearer enforcement for the MCP endpoint: with a verifier configured,
/// every request needs a valid token.
async fn mcp_auth_middleware(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(verifier) = &state.verifier {
        let token = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::Unauthenticated("missing bearer token".into()))?;
        verifier.verify(token)?;
    }
    Ok(next.run(request).await)
}

/// Router serving the MCP endpoint at `/mcp`.
pub fn mcp_router(tools: DeploymentTools, state: SharedState) -> Router {
    let service = StreamableHttpService::new(
        move || Ok(tools.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    Router::new()
        .nest_service("/mcp", service)
        .layer(middleware::from_fn_with_state(state, mcp_auth_middleware))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as AppResult;
    use crate::models::Deployment;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Deployments fake recording calls and serving canned rows.
    #[derive(Default)]
    struct FakeDeployments {
        rows: Mutex<Vec<Deployment>>,
        removed: Mutex<Vec<(String, String)>>,
    }

    fn sample_deployment(name: &str, resource_type: DeployableKind) -> Deployment {
        Deployment {
            resource_type,
            server_name: name.to_string(),
            version: "1.0.0".into(),
            config: BTreeMap::from([("ENV".to_string(), "prod".to_string())]),
            prefer_remote: false,
            runtime: "local".into(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[async_trait]
    impl Deployments for FakeDeployments {
        async fn list(
            &self,
            resource_type: Option<DeployableKind>,
        ) -> AppResult<Vec<Deployment>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|d| resource_type.is_none() || resource_type == Some(d.resource_type))
                .cloned()
                .collect())
        }

        async fn get(&self, name: &str, version: &str) -> AppResult<Deployment> {
            self.rows
                .lock()
                .unwrap()
                .iter()
                .find(|d| d.server_name == name && d.version == version)
                .cloned()
                .ok_or_else(|| AppError::NotFound("deployment not found".into()))
        }

        async fn deploy(
            &self,
            resource_type: DeployableKind,
            name: &str,
            _version: &str,
            config: BTreeMap<String, String>,
            prefer_remote: bool,
            _runtime: Option<RuntimeTarget>,
        ) -> AppResult<Deployment> {
            let mut deployment = sample_deployment(name, resource_type);
            deployment.config = config;
            deployment.prefer_remote = prefer_remote;
            self.rows.lock().unwrap().push(deployment.clone());
            Ok(deployment)
        }

        async fn update_config(
            &self,
            name: &str,
            version: &str,
            config: BTreeMap<String, String>,
        ) -> AppResult<Deployment> {
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .iter_mut()
                .find(|d| d.server_name == name && d.version == version)
                .ok_or_else(|| AppError::NotFound("deployment not found".into()))?;
            row.config = config;
            Ok(row.clone())
        }

        async fn remove(&self, name: &str, version: &str) -> AppResult<()> {
            self.removed
                .lock()
                .unwrap()
                .push((name.to_string(), version.to_string()));
            Ok(())
        }

        async fn reconcile_all(&self) -> AppResult<()> {
            Ok(())
        }
    }

    fn tools_with_fake() -> (DeploymentTools, Arc<FakeDeployments>) {
        let fake = Arc::new(FakeDeployments::default());
        (DeploymentTools::new(fake.clone()), fake)
    }

    #[tokio::test]
    async fn test_deploy_update_remove_dispatch() {
        let (tools, fake) = tools_with_fake();

        let deployed = tools
            .dispatch(
                "deploy_server",
                json!({
                    "serverName": "com.example/echo",
                    "version": "1.0.0",
                    "config": {"ENV": "prod"}
                }),
            )
            .await
            .unwrap();
        assert_eq!(deployed["serverName"], "com.example/echo");
        assert_eq!(deployed["resourceType"], "mcp");
        assert_eq!(deployed["config"]["ENV"], "prod");

        let agent = tools
            .dispatch("deploy_agent", json!({"serverName": "com.example/agent"}))
            .await
            .unwrap();
        assert_eq!(agent["resourceType"], "agent");

        let updated = tools
            .dispatch(
                "update_deployment_config",
                json!({
                    "serverName": "com.example/echo",
                    "version": "1.0.0",
                    "config": {"ENV": "staging"}
                }),
            )
            .await
            .unwrap();
        assert_eq!(updated["config"]["ENV"], "staging");

        let removed = tools
            .dispatch(
                "remove_deployment",
                json!({"serverName": "com.example/echo", "version": "1.0.0"}),
            )
            .await
            .unwrap();
        assert_eq!(removed["status"], "deleted");
        assert_eq!(
            fake.removed.lock().unwrap().as_slice(),
            &[("com.example/echo".to_string(), "1.0.0".to_string())]
        );
    }

    #[tokio::test]
    async fn test_list_deployments_filters_resource_type() {
        let (tools, fake) = tools_with_fake();
        fake.rows.lock().unwrap().extend([
            sample_deployment("com.example/echo", DeployableKind::Mcp),
            sample_deployment("com.example/echo-agent", DeployableKind::Agent),
        ]);

        let all = tools
            .dispatch("list_deployments", json!({}))
            .await
            .unwrap();
        assert_eq!(all["count"], 2);

        let agents = tools
            .dispatch("list_deployments", json!({"resourceType": "agent"}))
            .await
            .unwrap();
        assert_eq!(agents["count"], 1);
        assert_eq!(agents["deployments"][0]["resourceType"], "agent");
    }

    #[tokio::test]
    async fn test_get_deployment_not_found_maps_to_error() {
        let (tools, _) = tools_with_fake();
        let err = tools
            .dispatch(
                "get_deployment",
                json!({"serverName": "missing/one", "version": "1.0.0"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_tool_catalogue_is_complete() {
        let tools = DeploymentTools::tools();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_ref()).collect();
        assert_eq!(
            names,
            vec![
                "list_deployments",
                "get_deployment",
                "deploy_server",
                "deploy_agent",
                "update_deployment_config",
                "remove_deployment",
            ]
        );
        for tool in &tools {
            assert_eq!(tool.input_schema["type"], "object");
        }
    }

    #[test]
    fn test_deploy_args_parse_with_defaults() {
        let args: DeployArgs = parse_args(json!({"serverName": "io.example/echo"})).unwrap();
        assert_eq!(args.server_name, "io.example/echo");
        assert_eq!(args.version, "");
        assert!(args.config.is_empty());
        assert!(!args.prefer_remote);

        let err: Result<DeployArgs, _> = parse_args(json!({"version": "1.0.0"}));
        assert!(err.is_err());
    }
}
