//! Health monitor that periodically probes every registered target.

mod notify;

pub use notify::*;

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

use crate::config::{ConfigError, MonitorConfig};
use crate::db::{HealthStatus, HealthUpdate, Outcome, Target, TargetRepository};
use crate::probe::Prober;

/// Result of probing one target during a sweep.
#[derive(Debug, Clone)]
pub struct SweepResult {
    pub target_id: i64,
    pub outcome: Outcome,
    pub update: HealthUpdate,
    pub notified: bool,
}

/// Compute the next health state of `target` after `outcome`.
///
/// A healthy outcome resets the error streak; an unhealthy one extends it by one.
pub fn next_health(target: &Target, outcome: &Outcome) -> HealthUpdate {
    if outcome.is_healthy() {
        HealthUpdate {
            status: HealthStatus::Healthy,
            error_count: 0,
            last_error: None,
            last_response: outcome.body.clone(),
            last_latency_ms: outcome.latency_ms,
            last_checked: outcome.time,
        }
    } else {
        HealthUpdate {
            status: HealthStatus::Unhealthy,
            error_count: target.error_count.saturating_add(1),
            last_error: outcome.error.clone(),
            last_response: outcome.body.clone(),
            last_latency_ms: outcome.latency_ms,
            last_checked: outcome.time,
        }
    }
}

/// Periodically sweeps all targets and keeps their health state current.
pub struct HealthMonitor {
    repo: Arc<dyn TargetRepository>,
    prober: Arc<dyn Prober>,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
    jitter: Duration,
    threshold: u32,
    policy: NotifyPolicy,
    /// Targets already notified under the edge-triggered policy.
    notified: std::sync::Mutex<HashSet<i64>>,
    /// Held for a whole sweep so overlapping sweeps never read stale error counts.
    sweeping: Mutex<()>,
    stop: Mutex<Option<broadcast::Sender<()>>>,
}

impl HealthMonitor {
    /// Create a monitor; the configuration is validated first.
    pub fn new(
        config: &MonitorConfig,
        repo: Arc<dyn TargetRepository>,
        prober: Arc<dyn Prober>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            repo,
            prober,
            notifier,
            interval: config.check_interval(),
            jitter: config.probe_jitter(),
            threshold: config.error_threshold,
            policy: config.notify_policy,
            notified: std::sync::Mutex::new(HashSet::new()),
            sweeping: Mutex::new(()),
            stop: Mutex::new(None),
        })
    }

    /// Start sweeping in a background task. Does nothing if already running.
    pub async fn start(self: &Arc<Self>) {
        let mut stop = self.stop.lock().await;
        if stop.is_some() {
            return;
        }

        let (tx, rx) = broadcast::channel(1);
        *stop = Some(tx);
        drop(stop);

        tracing::info!(
            "HealthMonitor: Starting, sweeping every {:?} (threshold {}, policy {:?})",
            self.interval,
            self.threshold,
            self.policy
        );

        let monitor = self.clone();
        tokio::spawn(async move {
            monitor.run(rx).await;
        });
    }

    /// Stop the background task. An in-progress sweep is allowed to finish.
    pub async fn stop(&self) {
        if let Some(tx) = self.stop.lock().await.take() {
            let _ = tx.send(());
            tracing::info!("HealthMonitor: Stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.stop.lock().await.is_some()
    }

    /// Sweep on every interval tick until a stop signal arrives.
    pub async fn run(&self, mut stop_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = interval.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    /// Probe every target once and record the results.
    ///
    /// Probes run concurrently, each in its own task, so a failing or
    /// panicking probe only affects its own target. A sweep started while
    /// another is in progress waits for it and then loads fresh targets.
    pub async fn sweep(&self) -> Vec<SweepResult> {
        let _sweeping = self.sweeping.lock().await;

        let targets = match self.repo.load_targets() {
            Ok(t) => t,
            Err(e) => {
                tracing::error!("HealthMonitor: Failed to load targets: {}", e);
                return Vec::new();
            }
        };

        tracing::debug!("HealthMonitor: Sweeping {} targets", targets.len());

        let tasks: Vec<_> = targets
            .into_iter()
            .map(|target| {
                let prober = self.prober.clone();
                let probe_target = target.clone();
                let jitter = self.jitter;
                let handle = tokio::spawn(async move {
                    // Spread probes out to avoid a burst at every tick
                    if !jitter.is_zero() {
                        let ms = rand::random::<u64>() % jitter.as_millis().max(1) as u64;
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                    }
                    prober.probe(&probe_target).await
                });
                (target, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(tasks.len());
        for (target, handle) in tasks {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!("HealthMonitor: Probe task failed for {}: {}", target.name, e);
                    Outcome::failed(e.to_string(), 0.0, Utc::now())
                }
            };
            results.push(self.record(target, outcome).await);
        }

        results
    }

    /// Apply one outcome to a target, persist it and notify if warranted.
    pub async fn record(&self, mut target: Target, outcome: Outcome) -> SweepResult {
        let update = next_health(&target, &outcome);

        if let Err(e) = self.repo.update_health(target.id, &update) {
            tracing::error!(
                "HealthMonitor: Failed to save health for {}: {}",
                target.name,
                e
            );
        }
        target.apply(&update);

        let mut notified = false;
        if update.status == HealthStatus::Unhealthy {
            tracing::warn!(
                "HealthMonitor: {} unhealthy ({} in a row): {}",
                target.name,
                update.error_count,
                update.last_error.as_deref().unwrap_or("unknown error")
            );

            if self.should_notify(target.id, update.error_count) {
                self.notifier.notify(&target).await;
                notified = true;
            }
        } else {
            tracing::debug!(
                "HealthMonitor: {} healthy in {:.1}ms",
                target.name,
                update.last_latency_ms
            );
        }

        SweepResult {
            target_id: target.id,
            outcome,
            update,
            notified,
        }
    }

    fn should_notify(&self, target_id: i64, error_count: u32) -> bool {
        if error_count < self.threshold {
            return false;
        }
        match self.policy {
            NotifyPolicy::RepeatEverySweep => true,
            NotifyPolicy::RearmAfterRecovery => error_count == self.threshold,
            NotifyPolicy::EdgeTriggered => {
                let mut notified = self.notified.lock().unwrap();
                notified.insert(target_id)
            }
        }
    }
}
