use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: admission attempts. Labels: status (approved, pending, rejected).
pub const ADMISSIONS_TOTAL: &str = "campus_admissions_total";

/// Counter: refused admissions. Labels: reason.
pub const ADMISSION_REJECTIONS_TOTAL: &str = "campus_admission_rejections_total";

/// Histogram: admission latency in seconds, lock wait included.
pub const ADMISSION_DURATION_SECONDS: &str = "campus_admission_duration_seconds";

/// Counter: review state transitions. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "campus_transitions_total";

/// Counter: notification or audit hand-offs that failed. Labels: sink.
pub const SIDE_EFFECT_FAILURES_TOTAL: &str = "campus_side_effect_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: resources held in memory, soft-deleted ones included.
pub const RESOURCES_LOADED: &str = "campus_resources_loaded";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "campus_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "campus_journal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), String> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install Prometheus metrics exporter: {e}"))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Install the fmt subscriber, honouring `RUST_LOG` (default `info`).
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_without_port_is_noop() {
        assert!(init(None).is_ok());
    }

    #[test]
    fn tracing_init_is_idempotent() {
        init_tracing();
        init_tracing();
        tracing::info!("subscriber installed");
    }
}
