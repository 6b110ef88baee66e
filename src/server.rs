//! HTTP server.
//!
//! Startup opens the SQLite pool, runs migrations, builds the agent once and
//! wires everything into [`AppState`], which every handler receives through
//! Axum's `State` extractor. Routes live in [`crate::routes`].
//!
//! # Error Contract
//!
//! All error responses follow one schema:
//!
//! ```json
//! { "error": { "code": "not_found", "message": "User not found" } }
//! ```
//!
//! See [`crate::error::ApiError`] for the codes.
//!
//! # CORS
//!
//! Origins come from `[server].cors_origins`; an empty list allows any
//! origin. Methods and headers are unrestricted.

use anyhow::{Context, Result};
use axum::{extract::DefaultBodyLimit, http::HeaderValue, Router};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::agent::{create_agent, Agent};
use crate::auth::TokenService;
use crate::config::{Config, DEFAULT_SECRET_KEY};
use crate::error::{ApiError, ApiResult};
use crate::index::build_globset;
use crate::jobs::JobRegistry;
use crate::knowledge::IngestionCoordinator;
use crate::migrate::run_migrations;
use crate::{db, routes};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub tokens: Arc<TokenService>,
    /// `None` when no agent is configured or it failed to build.
    pub agent: Option<Arc<dyn Agent>>,
    pub ingestion: Option<IngestionCoordinator>,
    pub jobs: Arc<JobRegistry>,
}

impl AppState {
    pub fn new(config: Config, pool: SqlitePool, agent: Option<Arc<dyn Agent>>) -> Result<Self> {
        let tokens = Arc::new(TokenService::new(
            &config.auth.secret_key,
            config.auth.token_ttl_minutes,
        ));
        let jobs = Arc::new(JobRegistry::new(config.knowledge.job_history));
        let include = build_globset(&config.knowledge.include_globs)?;
        let ingestion = agent.as_ref().map(|agent| {
            IngestionCoordinator::new(
                pool.clone(),
                config.knowledge.staging_dir.clone(),
                include,
                agent.knowledge(),
                jobs.clone(),
            )
        });

        Ok(Self {
            config: Arc::new(config),
            pool,
            tokens,
            agent,
            ingestion,
            jobs,
        })
    }

    pub fn agent(&self) -> ApiResult<&Arc<dyn Agent>> {
        self.agent.as_ref().ok_or_else(ApiError::agent_unavailable)
    }

    pub fn ingestion(&self) -> ApiResult<&IngestionCoordinator> {
        self.ingestion.as_ref().ok_or_else(ApiError::agent_unavailable)
    }
}

/// The router with CORS, tracing and the upload size limit applied.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);
    let body_limit = DefaultBodyLimit::max(state.config.server.max_upload_bytes);

    routes::create_router(state)
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Migrate, build the agent and serve until Ctrl-C.
pub async fn run_server(config: &Config) -> Result<()> {
    if config.auth.secret_key == DEFAULT_SECRET_KEY {
        warn!("auth.secret_key is the built-in default; set SECRET_KEY before deploying");
    }

    let pool = db::connect(config).await?;
    run_migrations(&pool).await?;

    let agent = match create_agent(config, &pool) {
        Ok(Some(agent)) => {
            info!(agent = agent.name(), "agent ready");
            Some(agent)
        }
        Ok(None) => {
            warn!("no agent configured; /api/ask and knowledge uploads will return 503");
            None
        }
        Err(e) => {
            error!(error = ?e, "failed to build agent");
            None
        }
    };

    let bind_addr = config.server.bind.clone();
    let app = build_router(AppState::new(config.clone(), pool.clone(), agent)?);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    info!(addr = %bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
