mod common;

use apiwatch::config::MonitorConfig;
use apiwatch::db::{HealthStatus, Store, Target, TargetRepository};
use apiwatch::monitor::{HealthMonitor, Notifier, NotifyPolicy};
use apiwatch::probe::{HttpProber, PayloadRegistry};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

#[derive(Default)]
struct Alerts(Mutex<Vec<(String, u32)>>);

#[async_trait]
impl Notifier for Alerts {
    async fn notify(&self, target: &Target) {
        self.0
            .lock()
            .unwrap()
            .push((target.name.clone(), target.error_count));
    }
}

fn add(store: &Store, name: &str, url: String, method: &str) -> i64 {
    let mut target = Target {
        name: name.to_string(),
        url,
        method: method.to_string(),
        timeout: 2.0,
        ..Default::default()
    };
    store.add_target(&mut target).unwrap()
}

#[tokio::test]
async fn sweep_updates_store_and_notifies_after_threshold() {
    let base = common::spawn_server().await;
    let file = NamedTempFile::new().unwrap();
    let store = Store::new(file.path()).unwrap();

    let ok = add(&store, "ok", format!("{}/ok", base), "GET");
    let bad_method = add(&store, "bad-method", format!("{}/ok", base), "TRACE");
    let down = add(&store, "down", format!("{}/fail", base), "GET");

    let config = MonitorConfig {
        error_threshold: 2,
        probe_jitter_ms: 0,
        notify_policy: NotifyPolicy::RepeatEverySweep,
        ..Default::default()
    };
    let alerts = Arc::new(Alerts::default());
    let prober = HttpProber::new(Arc::new(PayloadRegistry::with_builtin_rules())).unwrap();
    let monitor = HealthMonitor::new(
        &config,
        Arc::new(store.clone()) as Arc<dyn TargetRepository>,
        Arc::new(prober),
        alerts.clone(),
    )
    .unwrap();

    let first = monitor.sweep().await;
    assert_eq!(first.len(), 3);
    assert!(first.iter().all(|r| !r.notified));

    let healthy = store.get_target(ok).unwrap();
    assert_eq!(healthy.status, HealthStatus::Healthy);
    assert_eq!(healthy.error_count, 0);
    assert!(healthy.last_response.unwrap().contains("\"status\": \"ok\""));
    assert!(healthy.last_checked.is_some());

    let rejected = store.get_target(bad_method).unwrap();
    assert_eq!(rejected.status, HealthStatus::Unhealthy);
    assert_eq!(
        rejected.last_error.as_deref(),
        Some("unsupported HTTP method: TRACE")
    );

    let failing = store.get_target(down).unwrap();
    assert_eq!(failing.error_count, 1);
    assert_eq!(failing.last_error.as_deref(), Some("HTTP 503"));

    monitor.sweep().await;

    let mut sent = alerts.0.lock().unwrap().clone();
    sent.sort();
    assert_eq!(
        sent,
        vec![("bad-method".to_string(), 2), ("down".to_string(), 2)]
    );
    assert_eq!(store.get_target(ok).unwrap().error_count, 0);
    assert_eq!(store.get_target(down).unwrap().error_count, 2);
}

#[tokio::test]
async fn start_and_stop_background_loop() {
    let file = NamedTempFile::new().unwrap();
    let store = Store::new(file.path()).unwrap();
    let prober = HttpProber::new(Arc::new(PayloadRegistry::empty())).unwrap();
    let monitor = Arc::new(HealthMonitor::new(
        &MonitorConfig::default(),
        Arc::new(store),
        Arc::new(prober),
        Arc::new(Alerts::default()),
    )
    .unwrap());

    assert!(!monitor.is_running().await);
    monitor.start().await;
    assert!(monitor.is_running().await);
    // A second start is a no-op
    monitor.start().await;
    monitor.stop().await;
    assert!(!monitor.is_running().await);
}
