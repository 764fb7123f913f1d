//! PageLens web server
//!
//! REST API over persisted batches plus a WebSocket that pushes
//! [`JobEvent`](pagelens_core::JobEvent)s while the scheduler works.

mod error;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use pagelens_core::{AppState, BatchStore, ChannelSink, Scheduler, SystemInfo};

pub use error::ApiError;

/// State shared by every handler
#[derive(Clone)]
pub struct ServerState {
    inner: Arc<ServerStateInner>,
}

struct ServerStateInner {
    app: AppState,
    store: BatchStore,
    scheduler: Arc<Scheduler>,
    events: ChannelSink,
    system: SystemInfo,
}

impl ServerState {
    /// Open the batch store under the output directory and create the
    /// scheduler. Batches interrupted by a previous shutdown are reset.
    pub async fn new(app: AppState) -> anyhow::Result<Self> {
        let store = BatchStore::open(&app.config.output_dir)
            .with_context(|| format!("Failed to open {}", app.config.output_dir.display()))?;
        store.reset_interrupted().await?;

        let events = ChannelSink::default();
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            app.engine.clone(),
            Arc::new(events.clone()),
            app.settings.pdf_dpi,
        ));

        Ok(Self {
            inner: Arc::new(ServerStateInner {
                system: SystemInfo::probe(),
                app,
                store,
                scheduler,
                events,
            }),
        })
    }

    pub fn app(&self) -> &AppState {
        &self.inner.app
    }

    pub fn store(&self) -> &BatchStore {
        &self.inner.store
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.inner.scheduler
    }

    pub fn events(&self) -> &ChannelSink {
        &self.inner.events
    }

    pub fn system(&self) -> &SystemInfo {
        &self.inner.system
    }

    /// Start the background worker
    pub fn start_worker(&self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        self.inner.scheduler.clone().spawn(shutdown)
    }
}

/// Build the application router.
///
/// The static UI is mounted last so API routes always win.
pub fn router(state: ServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let ui_dir = state.app().config.ui_dir.clone();
    let mut app = Router::new()
        .nest("/api", routes::api_router())
        .merge(routes::ws::router());

    if ui_dir.is_dir() {
        tracing::info!("Serving UI from {}", ui_dir.display());
        app = app.fallback_service(ServeDir::new(ui_dir).append_index_html_on_directories(true));
    } else {
        tracing::debug!("No UI directory at {}", ui_dir.display());
    }

    app.layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Run the server until Ctrl+C / SIGTERM
pub async fn serve(app: AppState, port: u16) -> anyhow::Result<()> {
    let state = ServerState::new(app).await?;
    let shutdown = CancellationToken::new();
    let worker = state.start_worker(shutdown.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("PageLens server listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = worker.await {
        tracing::warn!("Scheduler task ended abnormally: {}", e);
    }
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
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
