use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total HTTP requests. Labels: route, method, status.
pub const HTTP_REQUESTS_TOTAL: &str = "agendad_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route, method.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "agendad_http_request_duration_seconds";

/// Counter: appointments created. Labels: path (repository | public).
pub const APPOINTMENTS_CREATED_TOTAL: &str = "agendad_appointments_created_total";

/// Counter: writes rejected because the interval was taken.
pub const CONFLICTS_TOTAL: &str = "agendad_conflicts_total";

/// Counter: bearer tokens rejected. Labels: reason.
pub const AUTH_FAILURES_TOTAL: &str = "agendad_auth_failures_total";

/// Counter: reminders handed to the sender. Labels: status.
pub const REMINDERS_SENT_TOTAL: &str = "agendad_reminders_sent_total";

/// Counter: request-log rows that could not be written.
pub const AUDIT_FAILURES_TOTAL: &str = "agendad_audit_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "agendad_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "agendad_wal_flush_batch_size";

/// Install the fmt subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
