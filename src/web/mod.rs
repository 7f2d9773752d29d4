//! HTTP API for prefetchd.
//!
//! ## Endpoints
//!
//! - `GET /api/model-files?repo_id=&revision=` - list files of a remote repository
//! - `POST /api/prefetch` - start a prefetch job, returns its id
//! - `GET /api/status/{job_id}` - current status of one job
//! - `GET /api/jobs` - status of every known job
//! - `GET /api/health` - daemon version, uptime and active job count

mod api;

use axum::Router;
use axum::routing::{get, post};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::core::Orchestrator;

pub use api::{HealthResponse, JobsResponse, ModelFilesResponse, PrefetchResponse};

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct WebState {
    pub ctx: AppContext,
    pub orchestrator: Arc<Orchestrator>,
    pub started_at: Instant,
}

/// Build the API router over `ctx`.
pub fn router(ctx: AppContext) -> Router {
    let state = WebState {
        orchestrator: Arc::new(Orchestrator::new(ctx.clone())),
        ctx,
        started_at: Instant::now(),
    };

    Router::new()
        .route("/api/model-files", get(api::list_model_files))
        .route("/api/prefetch", post(api::start_prefetch))
        .route("/api/status/{job_id}", get(api::job_status))
        .route("/api/jobs", get(api::list_jobs))
        .route("/api/health", get(api::health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// HTTP server for the prefetch API.
pub struct WebServer {
    bind_addr: SocketAddr,
    ctx: AppContext,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebServer {
    pub fn new(ctx: AppContext, bind_addr: SocketAddr) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            bind_addr,
            ctx,
            shutdown_tx,
        }
    }

    /// Bind and serve until shutdown() is called.
    pub async fn start(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown() is called.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let app = router(self.ctx.clone());
        tracing::info!(addr = %listener.local_addr()?, "Prefetch API listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Signal the server to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
