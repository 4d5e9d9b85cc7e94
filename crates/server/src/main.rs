use std::{net::SocketAddr, sync::Arc};

use review_engine::{
    notify::{spawn_notifier_worker, LogNotifier, NotificationOutbox},
    ApiContext,
};
use storage::Storage;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, normalize_database_url};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let (outbox, notifications) = NotificationOutbox::channel(settings.notify_queue_capacity);
    let notifier = Arc::new(LogNotifier::new(settings.server_public_url.clone()));
    let worker = spawn_notifier_worker(notifications, notifier);

    let api = ApiContext::bootstrap(storage, outbox).await?;
    info!("review engine ready");

    let app = api::build_router(Arc::new(AppState { api }))
        .layer(RequestBodyLimitLayer::new(settings.max_body_bytes))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router owned the last outbox handle; let the worker drain.
    if let Err(error) = worker.await {
        error!(%error, "notification worker stopped abnormally");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to listen for shutdown signal");
    }
    info!("shutdown requested");
}
