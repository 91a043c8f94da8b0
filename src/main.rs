//! Amphora Registry - Main Entry Point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use amphora_registry::api::{self, AppState};
use amphora_registry::config::Config;
use amphora_registry::error::Result;
use amphora_registry::mcp::{mcp_router, DeploymentTools};
use amphora_registry::runtime::ReconcileManager;
use amphora_registry::services::auth::{JwtVerifier, TokenVerifier};
use amphora_registry::services::catalog::{Catalog, CatalogService};
use amphora_registry::services::deployment::{DeploymentService, Deployments};
use amphora_registry::services::embeddings::EmbeddingService;
use amphora_registry::services::importer::ImportService;
use amphora_registry::store::Store;
use amphora_registry::{db, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    telemetry::init_tracing(&config.log_level);
    let metrics_handle = telemetry::init_metrics();

    info!("Starting Amphora Registry {}", env!("CARGO_PKG_VERSION"));

    let db_pool = db::create_pool(&config).await?;
    info!("Connected to database");

    db::run_migrations(&db_pool).await?;
    info!("Database migrations complete");

    let store = Store::new(db_pool.clone());
    let embeddings = EmbeddingService::from_config(&config.embeddings, store.clone());
    let catalog: Arc<dyn Catalog> = Arc::new(
        CatalogService::new(store.clone(), config.enable_registry_validation)
            .with_embeddings(embeddings.clone()),
    );

    let reconciler = ReconcileManager::new(store.clone(), &config);
    let deployments: Arc<dyn Deployments> = Arc::new(DeploymentService::new(
        store.clone(),
        Arc::clone(&reconciler),
        config.runtime_target,
    ));

    let verifier: Option<Arc<dyn TokenVerifier>> = config
        .jwt_private_key
        .as_deref()
        .map(|key| Arc::new(JwtVerifier::new(key)) as Arc<dyn TokenVerifier>);

    let state = Arc::new(
        AppState::new(
            config.clone(),
            db_pool,
            store,
            Arc::clone(&catalog),
            Arc::clone(&deployments),
        )
        .with_verifier(verifier)
        .with_embeddings(embeddings)
        .with_metrics_handle(metrics_handle),
    );

    spawn_background_imports(&config, &catalog);

    if config.reconcile_on_startup {
        info!("Reconciling existing deployments at startup...");
        match tokio::time::timeout(Duration::from_secs(120), deployments.reconcile_all()).await {
            Ok(Ok(())) => info!("Startup reconciliation completed"),
            Ok(Err(e)) => {
                warn!("Startup reconciliation failed: {e}");
                warn!("Server will continue starting, but deployments may not be in sync");
            }
            Err(_) => warn!("Startup reconciliation timed out after 2 minutes"),
        }
    }

    // Optional MCP endpoint on its own port.
    let mut mcp_task = None;
    if state.config.mcp_port > 0 {
        let tools = DeploymentTools::new(Arc::clone(&deployments));
        let router = mcp_router(tools, state.clone());
        let addr = SocketAddr::from(([0, 0, 0, 0], state.config.mcp_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("MCP endpoint listening on {addr}");
        mcp_task = Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await
            {
                warn!("MCP server error: {e}");
            }
        }));
    }

    let app = Router::new()
        .merge(api::routes::create_router(state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = state.config.server_address.parse().map_err(|e| {
        amphora_registry::AppError::Config(format!(
            "invalid SERVER_ADDRESS {}: {e}",
            state.config.server_address
        ))
    })?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = mcp_task {
        let _ = tokio::time::timeout(Duration::from_secs(10), task).await;
    }

    info!("Server exiting");
    Ok(())
}

/// Builtin seed and SEED_FROM imports run detached with their own
/// deadlines; import failures never block startup.
fn spawn_background_imports(config: &Config, catalog: &Arc<dyn Catalog>) {
    const IMPORT_TIMEOUT: Duration = Duration::from_secs(300);

    if !config.disable_builtin_seed {
        let importer = ImportService::new(Arc::clone(catalog));
        tokio::spawn(async move {
            info!("Importing builtin seed data in the background...");
            match tokio::time::timeout(IMPORT_TIMEOUT, importer.import_builtin_seed()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("Builtin seed import failed: {e}"),
                Err(_) => warn!("Builtin seed import timed out"),
            }
        });
    }

    if let Some(source) = config.seed_from.clone() {
        let mut importer = ImportService::new(Arc::clone(catalog));
        if let Some(readme_path) = &config.readme_seed_from {
            match importer.with_readme_seed_path(readme_path) {
                Ok(with_seed) => importer = with_seed,
                Err(e) => {
                    warn!("README seed file {readme_path} unusable: {e}");
                    importer = ImportService::new(Arc::clone(catalog));
                }
            }
        }
        if config.enrich_server_data {
            importer = importer.with_enrichment(config.github_token.clone());
        }
        tokio::spawn(async move {
            info!("Importing data from {source} in the background...");
            match tokio::time::timeout(IMPORT_TIMEOUT, importer.import_from_path(&source)).await {
                Ok(Ok(summary)) => info!(
                    imported = summary.imported,
                    updated = summary.updated,
                    failed = summary.failed,
                    "Seed import finished"
                ),
                Ok(Err(e)) => warn!("Seed import failed: {e}"),
                Err(_) => warn!("Seed import timed out"),
            }
        });
    }
}

/// Resolve on SIGINT or SIGTERM; axum then drains in-flight requests.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutting down server...");
}
