//! apiwatch - API health monitoring daemon.

use apiwatch::config::MonitorConfig;
use apiwatch::db::{self, Store};
use apiwatch::monitor::{HealthMonitor, LogNotifier};
use apiwatch::probe::{HttpProber, PayloadRegistry};

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("apiwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = MonitorConfig::load();
    cfg.validate()?;
    tracing::info!(
        "Starting apiwatch, checking every {}s (notify after {} errors)",
        cfg.check_interval_secs,
        cfg.error_threshold
    );
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Add sample target if none exist
    let targets = store.get_targets()?;
    if targets.is_empty() {
        tracing::info!("Adding sample target: httpbin");
        let mut target = db::Target {
            name: "httpbin".to_string(),
            url: "https://httpbin.org/get".to_string(),
            timeout: cfg.request_timeout_secs,
            ..Default::default()
        };
        store.add_target(&mut target)?;
    }

    let payloads = Arc::new(PayloadRegistry::with_builtin_rules());
    let prober = Arc::new(HttpProber::new(payloads)?);
    let monitor = Arc::new(HealthMonitor::new(
        &cfg,
        store.clone(),
        prober,
        Arc::new(LogNotifier),
    )?);

    monitor.start().await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    monitor.stop().await;

    Ok(())
}
