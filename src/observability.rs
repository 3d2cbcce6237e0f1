use std::net::SocketAddr;

// ── Commit path ─────────────────────────────────────────────────

/// Counter: commit attempts. Labels: outcome (committed, conflict, rejected).
pub const COMMITS_TOTAL: &str = "hirestock_commits_total";

/// Histogram: commit latency in seconds, lock wait included.
pub const COMMIT_DURATION_SECONDS: &str = "hirestock_commit_duration_seconds";

/// Counter: reference candidates that were already taken.
pub const REFERENCE_COLLISIONS_TOTAL: &str = "hirestock_reference_collisions_total";

// ── Stages ──────────────────────────────────────────────────────

/// Counter: stage mutations. Labels: op, status.
pub const STAGE_MUTATIONS_TOTAL: &str = "hirestock_stage_mutations_total";

/// Gauge: stages currently held in memory.
pub const STAGES_ACTIVE: &str = "hirestock_stages_active";

/// Counter: stages dropped for being idle.
pub const STAGES_EVICTED_TOTAL: &str = "hirestock_stages_evicted_total";

// ── WAL ─────────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "hirestock_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "hirestock_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
/// A failed install is logged and the process carries on without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter on {addr}: {e}"),
    }
}
