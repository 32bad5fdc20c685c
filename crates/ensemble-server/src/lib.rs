//! Ensemble server
//!
//! HTTP surface over the agent runtime: a blocking run endpoint, an SSE
//! streaming variant, and session inspection. This is a library crate — the
//! server is started via `start_server()`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{http::Method, routing::get, Json, Router};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use ensemble_core::agent::{register_spawn_tool, Agent};
use ensemble_core::ai::{LlmClient, LlmClientConfig, ModelBackend};
use ensemble_core::config::RuntimeConfig;
use ensemble_core::mcp::{register_mcp_tools, McpManager};
use ensemble_core::paths;
use ensemble_core::sandbox::SandboxManager;
use ensemble_core::session::{FileSessionStore, SessionStore};
use ensemble_core::skills::SkillCatalog;
use ensemble_core::tools::implementations::register_native_tools;
use ensemble_core::tools::registry::ToolRegistry;

pub mod error;
pub mod routes;
pub mod types;

/// Configuration for starting the server.
pub struct ServerConfig {
    /// Port to listen on (default: 3000).
    pub port: u16,
    /// Workspace directory agents operate in.
    pub workspace_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            workspace_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RuntimeConfig>,
    pub workspace_dir: Arc<PathBuf>,
    pub backend: Arc<dyn ModelBackend>,
    pub registry: Arc<ToolRegistry>,
    pub skills: SkillCatalog,
    pub store: Arc<dyn SessionStore>,
    pub sandbox: Option<Arc<SandboxManager>>,
    pub mcp: Option<Arc<McpManager>>,
    /// Suspended runs waiting for user input, keyed by session id.
    pub paused_runs: Arc<RwLock<HashMap<String, Arc<Agent>>>>,
    /// Per-session locks preventing concurrent runs on one session.
    pub session_locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

impl AppState {
    /// One lock per session, created on first use.
    pub async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.write().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Build the shared state: config from env, provider client, tool registry
/// in load order (native, MCP, spawn), skill catalog, session store.
pub async fn build_state(server_config: &ServerConfig) -> anyhow::Result<AppState> {
    let config = Arc::new(RuntimeConfig::from_env()?);

    let backend: Arc<dyn ModelBackend> =
        Arc::new(LlmClient::new(LlmClientConfig::from_runtime(&config)));

    let skills = SkillCatalog::load(&paths::skills_dir());

    let registry = Arc::new(ToolRegistry::new());
    register_native_tools(&registry, skills.clone()).await;

    let mcp = if config.enable_mcp {
        let manager = Arc::new(McpManager::new(server_config.workspace_dir.clone()));
        let mcp_path = config
            .mcp_config_path
            .clone()
            .unwrap_or_else(|| server_config.workspace_dir.join(".mcp.json"));
        manager.load_config(&mcp_path).await?;
        manager.connect_all().await;
        register_mcp_tools(&registry, &manager).await;
        Some(manager)
    } else {
        None
    };

    register_spawn_tool(&registry, backend.clone(), config.spawn_max_depth).await;

    let sandbox = config.enable_sandbox.then(|| {
        Arc::new(SandboxManager::new(
            &config.sandbox_base_url,
            config.sandbox_ttl_seconds,
        ))
    });

    let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(&config.sessions_dir)?);

    Ok(AppState {
        config,
        workspace_dir: Arc::new(server_config.workspace_dir.clone()),
        backend,
        registry,
        skills,
        store,
        sandbox,
        mcp,
        paused_runs: Arc::new(RwLock::new(HashMap::new())),
        session_locks: Arc::new(RwLock::new(HashMap::new())),
    })
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/api", routes::api_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(server_config: ServerConfig) -> anyhow::Result<()> {
    let state = build_state(&server_config).await?;
    let app = build_router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", server_config.port).parse()?;
    tracing::info!("starting ensemble-server on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn root() -> &'static str {
    "Ensemble Server"
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}
