use std::sync::Arc;

use tracing::info;

use hirestock::clock::SystemClock;
use hirestock::config::Config;
use hirestock::engine::{Engine, EngineSettings};
use hirestock::reaper;
use hirestock::stage_store::StageStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    hirestock::observability::init(config.metrics_port);

    std::fs::create_dir_all(&config.data_dir)?;

    let clock = Arc::new(SystemClock);
    let settings = EngineSettings {
        clock: clock.clone(),
        lock_timeout: config.lock_timeout,
        ..EngineSettings::default()
    };
    let engine = Arc::new(Engine::new(config.wal_path(), settings)?);
    let store = Arc::new(StageStore::new(engine.clone(), clock, config.commit_retries));

    let reaper_store = store.clone();
    let ttl = config.stage_ttl;
    tokio::spawn(async move {
        reaper::run_reaper(reaper_store, ttl).await;
    });
    let compactor_engine = engine.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        reaper::run_compactor(compactor_engine, threshold).await;
    });

    info!("hirestock ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  stage_ttl: {}s", config.stage_ttl.as_secs());
    info!("  lock_timeout: {}ms", config.lock_timeout.as_millis());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    shutdown_signal().await;
    info!("shutdown signal received");

    // Leave a short log behind for the next start.
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction skipped: {e}");
    }
    info!(
        "hirestock stopped with {} bookings, {} open stages",
        engine.booking_count(),
        store.active_count()
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
