//! Tracks which targets have a load campaign in flight.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use super::StressError;

/// State of an active campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    /// A stop was requested; the current round is finishing.
    Stopping,
}

/// Snapshot of one active campaign.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveRun {
    pub target_id: i64,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
}

struct RunEntry {
    started_at: DateTime<Utc>,
    status: RunStatus,
    stop_tx: watch::Sender<bool>,
}

/// Registry of in-flight campaigns, at most one per target.
#[derive(Clone, Default)]
pub struct ActiveRunRegistry {
    runs: Arc<Mutex<HashMap<i64, RunEntry>>>,
}

impl ActiveRunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<i64, RunEntry>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a campaign for `target_id` unless one is already active.
    ///
    /// The check and the insert happen under one lock. The returned guard
    /// releases the registration when dropped.
    pub fn try_register(&self, target_id: i64) -> Result<RunGuard, StressError> {
        let mut runs = self.runs();
        if runs.contains_key(&target_id) {
            return Err(StressError::AlreadyRunning(target_id));
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        runs.insert(
            target_id,
            RunEntry {
                started_at: Utc::now(),
                status: RunStatus::Running,
                stop_tx,
            },
        );

        Ok(RunGuard {
            registry: self.clone(),
            target_id,
            stop: StopSignal(stop_rx),
        })
    }

    pub fn is_running(&self, target_id: i64) -> bool {
        self.runs().contains_key(&target_id)
    }

    pub fn status(&self, target_id: i64) -> Option<RunStatus> {
        self.runs().get(&target_id).map(|r| r.status)
    }

    /// All active campaigns, ordered by target id.
    pub fn active(&self) -> Vec<ActiveRun> {
        let mut active: Vec<ActiveRun> = self
            .runs()
            .iter()
            .map(|(id, r)| ActiveRun {
                target_id: *id,
                started_at: r.started_at,
                status: r.status,
            })
            .collect();
        active.sort_by_key(|r| r.target_id);
        active
    }

    pub fn len(&self) -> usize {
        self.runs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs().is_empty()
    }

    /// Ask the campaign for `target_id` to stop after its current round.
    ///
    /// Returns false if no campaign is active for the target.
    pub fn stop(&self, target_id: i64) -> bool {
        let mut runs = self.runs();
        match runs.get_mut(&target_id) {
            Some(entry) => {
                entry.status = RunStatus::Stopping;
                let _ = entry.stop_tx.send(true);
                tracing::info!("Stress: Stop requested for target {}", target_id);
                true
            }
            None => false,
        }
    }

    fn release(&self, target_id: i64) {
        self.runs().remove(&target_id);
    }
}

/// Registration of one active campaign; dropping it frees the target.
pub struct RunGuard {
    registry: ActiveRunRegistry,
    target_id: i64,
    stop: StopSignal,
}

impl RunGuard {
    pub fn target_id(&self) -> i64 {
        self.target_id
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.release(self.target_id);
    }
}

/// Receiving side of a campaign stop request.
#[derive(Clone)]
pub struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        StopSignal(rx)
    }

    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }

    /// Wait until a stop is requested.
    pub async fn wait(&mut self) {
        while !*self.0.borrow_and_update() {
            if self.0.changed().await.is_err() {
                // Sender gone without a stop request
                std::future::pending::<()>().await;
            }
        }
    }
}
