use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

use agendad::audit::{AuditSink, JsonlAuditSink, MemoryAuditSink};
use agendad::auth::{HttpTokenValidator, StaticTokenValidator, TokenValidator};
use agendad::config::{AuthMode, Settings};
use agendad::engine::Engine;
use agendad::http::{self, AppState};
use agendad::notify::NotifyHub;
use agendad::reaper::{self, LogReminderSender};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env is normal outside development.
    let _ = dotenvy::dotenv();
    let settings = Settings::new()?;
    agendad::observability::init_tracing(&settings.log_filter);
    agendad::observability::init(settings.metrics_port)?;

    std::fs::create_dir_all(&settings.storage.data_dir)?;
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(settings.wal_path(), notify)?);

    let validator: Arc<dyn TokenValidator> = match settings.auth.mode {
        AuthMode::Http => Arc::new(HttpTokenValidator::new(
            settings.auth.validation_url.clone(),
            Duration::from_secs(settings.auth.request_timeout_secs),
            Duration::from_secs(settings.auth.cache_ttl_secs),
        )?),
        AuthMode::Static => Arc::new(StaticTokenValidator::from_settings(
            &settings.auth.static_tokens,
        )?),
    };
    let audit: Arc<dyn AuditSink> = if settings.audit.enabled {
        Arc::new(JsonlAuditSink::open(&settings.audit.path).await?)
    } else {
        Arc::new(MemoryAuditSink::discard())
    };

    let compactor_engine = engine.clone();
    let threshold = settings.storage.compact_threshold;
    let compact_every = Duration::from_secs(settings.storage.compact_interval_secs.max(1));
    tokio::spawn(async move {
        reaper::run_compactor(compactor_engine, threshold, compact_every).await;
    });
    if settings.reminders.enabled {
        let reminder_engine = engine.clone();
        let every = Duration::from_secs(settings.reminders.interval_secs.max(1));
        let lead = Duration::from_secs(settings.reminders.lead_minutes * 60);
        tokio::spawn(async move {
            reaper::run_reminder_sweeper(reminder_engine, Arc::new(LogReminderSender), every, lead)
                .await;
        });
    }

    let app = http::router(AppState {
        engine,
        validator,
        audit,
    });

    let addr = settings.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("agendad listening on {addr}");
    info!("  wal: {}", settings.wal_path().display());
    info!("  auth: {:?}", settings.auth.mode);
    info!(
        "  audit: {}",
        if settings.audit.enabled {
            settings.audit.path.display().to_string()
        } else {
            "disabled".to_string()
        }
    );
    info!(
        "  metrics: {}",
        settings
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("agendad stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to register SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining requests");
}
