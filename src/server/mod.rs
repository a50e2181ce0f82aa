use crate::config::Config;
use crate::conversion::{ConversionExecutor, ConversionManager, JobLedger};
use crate::streaming::{start_cleanup_task, SessionManager};
use anyhow::{Context, Result};
use axum::{
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use streamforged_db::pool::DbPool;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod error;
pub mod routes_conversions;
pub mod routes_sessions;
pub mod routes_stream;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    /// Cached full-file conversions
    pub conversions: ConversionManager,
    /// Live adaptive sessions and progressive streams
    pub sessions: SessionManager,
}

impl AppContext {
    /// Wire the managers together around one HTTP client and one pool.
    pub fn new(config: Config, pool: DbPool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("streamforged/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        let ledger = JobLedger::new(pool);
        let executor = ConversionExecutor::new(&config, ledger.clone(), http.clone());
        let conversions = ConversionManager::new(ledger, executor);
        let sessions = SessionManager::new(&config, http);

        Ok(Self {
            config: Arc::new(config),
            conversions,
            sessions,
        })
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

fn api_routes() -> Router<AppContext> {
    Router::new()
        .route(
            "/conversions",
            post(routes_conversions::create_conversion),
        )
        .route(
            "/conversions/{job_id}",
            get(routes_conversions::get_conversion),
        )
        .route(
            "/conversions/{job_id}/artifact",
            get(routes_conversions::download_artifact),
        )
        .route(
            "/sessions",
            get(routes_sessions::list_sessions).post(routes_sessions::start_session),
        )
        .route(
            "/sessions/{session_id}",
            get(routes_sessions::get_session).delete(routes_sessions::stop_session),
        )
        .route(
            "/sessions/{session_id}/{file}",
            get(routes_sessions::get_artifact),
        )
        .route("/stream/mp4", get(routes_stream::progressive_mp4))
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Start the HTTP server and run until a shutdown signal arrives.
///
/// On shutdown, running conversions are cancelled and recorded as failed and
/// every streaming session is stopped.
pub async fn start_server(config: Config, pool: DbPool) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    serve(listener, config, pool).await
}

/// Serve on an already-bound listener.
pub async fn serve(listener: TcpListener, config: Config, pool: DbPool) -> Result<()> {
    let cleanup_interval = config.streaming.cleanup_interval_secs;
    let ctx = AppContext::new(config, pool)?;
    let cleanup = start_cleanup_task(ctx.sessions.clone(), cleanup_interval);

    let app = create_router(ctx.clone());

    tracing::info!("Starting server on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cleanup.abort();
    ctx.conversions.shutdown().await;
    ctx.sessions.stop_all().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
