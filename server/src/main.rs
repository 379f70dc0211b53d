//! Simbay bay-booking HTTP server.

use anyhow::Context;
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use simbay_core::environment::SystemClock;
use simbay_postgres::PostgresStore;
use simbay_runtime::metrics::MetricsServer;
use simbay_server::bootstrap::{self, Adapters};
use simbay_server::config::Config;
use simbay_server::smtp::SmtpEmailProvider;
use simbay_server::stripe::StripeGateway;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "simbay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Simbay server");

    let config = Config::from_env();
    for key in config.missing_secrets() {
        warn!(key, "Secret not configured");
    }

    // Metrics
    let mut metrics = MetricsServer::new(config.server.metrics_addr()?);
    metrics.start().context("installing metrics recorder")?;

    // Store
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout))
        .connect(&config.database.url)
        .await
        .context("connecting to PostgreSQL")?;
    let store = PostgresStore::new(pool);
    store.migrate().await.context("applying migrations")?;
    info!("Store ready");

    // Providers
    let gateway = StripeGateway::new(config.payment.secret_key.clone(), config.payment.api_base.clone())
        .context("building payment gateway")?;
    let email = SmtpEmailProvider::new(
        &config.email.smtp_host,
        config.email.smtp_port,
        config.email.smtp_username.clone(),
        config.email.smtp_password.clone(),
        &config.email.from_email,
        &config.email.from_name,
    )
    .context("building email provider")?;

    let app = bootstrap::build(
        &config,
        Adapters {
            store: Arc::new(store),
            gateway: Arc::new(gateway),
            email: Arc::new(email),
            clock: Arc::new(SystemClock),
        },
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut handles = app
        .scheduler
        .map(|scheduler| scheduler.start(&shutdown_tx))
        .unwrap_or_default();
    if handles.is_empty() {
        info!("Jobs disabled for this process");
    }

    if let Some(handle) = metrics.handle() {
        let addr = metrics.addr();
        let mut metrics_shutdown = shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            if let Err(e) = serve_metrics(addr, handle, async move {
                metrics_shutdown.recv().await.ok();
            })
            .await
            {
                error!(error = %e, "Metrics server failed");
            }
        }));
    }

    let addr = config.server.http_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(address = %addr, "HTTP server listening");

    axum::serve(listener, simbay_web::router(app.state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, stopping background tasks");
    shutdown_tx.send(()).ok();
    let drain = drain_tasks(handles);
    if tokio::time::timeout(Duration::from_secs(config.server.shutdown_timeout), drain)
        .await
        .is_err()
    {
        warn!(timeout_secs = config.server.shutdown_timeout, "Background tasks did not stop in time");
    }

    info!("Server stopped");
    Ok(())
}

async fn drain_tasks(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
}

async fn serve_metrics(
    addr: std::net::SocketAddr,
    handle: PrometheusHandle,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = Router::new().route("/metrics", get(move || async move { handle.render() }));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "Metrics server listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
