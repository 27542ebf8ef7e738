//! Load campaigns: bounded-duration, concurrent request rounds against one target.

mod registry;

pub use registry::*;

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::db::{Campaign, Outcome, StressConfig, Target, TargetRepository};
use crate::probe::{validate_target, HttpProber, PayloadRegistry, ProbeError, Prober};
use crate::stats::summarize;

/// Largest accepted number of concurrent requests per round.
pub const MAX_CONCURRENCY: u32 = 1000;

/// Longest accepted campaign duration in seconds.
pub const MAX_DURATION_SECS: f64 = 3600.0;

/// Overall bound on any single campaign request, on top of the target timeout.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Stress error types.
#[derive(Error, Debug)]
pub enum StressError {
    #[error("invalid stress config: {0}")]
    InvalidConfig(String),
    #[error("a campaign is already running for target {0}")]
    AlreadyRunning(i64),
    #[error("target {0} has no stress configuration")]
    MissingConfig(i64),
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Check campaign parameters before anything is started.
pub fn validate_stress_config(config: &StressConfig) -> Result<(), StressError> {
    if config.concurrency == 0 {
        return Err(StressError::InvalidConfig(
            "concurrency must be positive".to_string(),
        ));
    }
    if config.concurrency > MAX_CONCURRENCY {
        return Err(StressError::InvalidConfig(format!(
            "concurrency {} exceeds limit of {}",
            config.concurrency, MAX_CONCURRENCY
        )));
    }
    if !(config.duration_secs.is_finite() && config.duration_secs > 0.0) {
        return Err(StressError::InvalidConfig(
            "duration must be positive".to_string(),
        ));
    }
    if config.duration_secs > MAX_DURATION_SECS {
        return Err(StressError::InvalidConfig(format!(
            "duration {}s exceeds limit of {}s",
            config.duration_secs, MAX_DURATION_SECS
        )));
    }
    if !(config.pause_secs.is_finite() && config.pause_secs >= 0.0) {
        return Err(StressError::InvalidConfig(
            "pause must not be negative".to_string(),
        ));
    }
    Ok(())
}

/// Runs load campaigns, one at a time per target.
#[derive(Clone)]
pub struct LoadGenerator {
    registry: ActiveRunRegistry,
    payloads: Arc<PayloadRegistry>,
    session_timeout: Duration,
}

impl LoadGenerator {
    pub fn new(registry: ActiveRunRegistry, payloads: Arc<PayloadRegistry>) -> Self {
        Self {
            registry,
            payloads,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ActiveRunRegistry {
        &self.registry
    }

    /// Whether a campaign is currently active for `target_id`.
    pub fn is_running(&self, target_id: i64) -> bool {
        self.registry.is_running(target_id)
    }

    /// Run a campaign to completion using an HTTP client sized for it.
    pub async fn run(&self, target: &Target, config: &StressConfig) -> Result<Campaign, StressError> {
        let prober = self.campaign_prober(config)?;
        self.run_with(prober, target, config).await
    }

    /// Run a campaign to completion with the given prober.
    pub async fn run_with(
        &self,
        prober: Arc<dyn Prober>,
        target: &Target,
        config: &StressConfig,
    ) -> Result<Campaign, StressError> {
        let guard = self.prepare(target, config)?;
        Ok(run_campaign(prober, target, config, guard.stop_signal()).await)
    }

    /// Start a campaign for a target's own stress configuration in the
    /// background, saving the result to `repo` when it finishes.
    ///
    /// Validation and the already-running check happen before this returns.
    /// The target stays registered until the result has been saved.
    pub fn spawn(
        &self,
        target: Target,
        repo: Arc<dyn TargetRepository>,
    ) -> Result<JoinHandle<Campaign>, StressError> {
        let config = target
            .stress
            .clone()
            .ok_or(StressError::MissingConfig(target.id))?;
        let prober = self.campaign_prober(&config)?;
        self.spawn_with(prober, target, config, repo)
    }

    /// Like [`spawn`](Self::spawn) with an explicit prober and configuration.
    pub fn spawn_with(
        &self,
        prober: Arc<dyn Prober>,
        target: Target,
        config: StressConfig,
        repo: Arc<dyn TargetRepository>,
    ) -> Result<JoinHandle<Campaign>, StressError> {
        let guard = self.prepare(&target, &config)?;

        Ok(tokio::spawn(async move {
            let mut campaign = run_campaign(prober, &target, &config, guard.stop_signal()).await;

            match repo.save_campaign(&campaign) {
                Ok(id) => campaign.id = id,
                Err(e) => {
                    tracing::error!("Stress: Failed to save campaign for {}: {}", target.name, e);
                    campaign.error = Some(format!("failed to save campaign: {}", e));
                }
            }

            drop(guard);
            campaign
        }))
    }

    fn campaign_prober(&self, config: &StressConfig) -> Result<Arc<dyn Prober>, StressError> {
        let prober =
            HttpProber::for_campaign(self.payloads.clone(), config.concurrency, self.session_timeout)?;
        Ok(Arc::new(prober))
    }

    fn prepare(&self, target: &Target, config: &StressConfig) -> Result<RunGuard, StressError> {
        validate_stress_config(config)?;
        validate_target(target)?;
        self.registry.try_register(target.id)
    }
}

/// Run rounds of `concurrency` requests until `duration` has elapsed.
///
/// A round always completes before the loop checks the clock or the stop
/// signal again, so every request that was started is accounted for.
pub async fn run_campaign(
    prober: Arc<dyn Prober>,
    target: &Target,
    config: &StressConfig,
    mut stop: StopSignal,
) -> Campaign {
    let duration = Duration::try_from_secs_f64(config.duration_secs).unwrap_or(Duration::ZERO);
    let pause = Duration::try_from_secs_f64(config.pause_secs).unwrap_or(Duration::ZERO);
    let shared_target = Arc::new(target.clone());

    tracing::info!(
        "Stress: Starting campaign for {}: concurrency {}, duration {:?}, pause {:?}",
        target.name,
        config.concurrency,
        duration,
        pause
    );

    let started_at = Utc::now();
    let start = Instant::now();
    let mut outcomes: Vec<Outcome> = Vec::new();
    let mut stopped = false;
    let mut rounds = 0usize;

    while start.elapsed() < duration {
        if stop.is_stopped() {
            stopped = true;
            break;
        }

        let round = run_round(&prober, &shared_target, config.concurrency).await;
        outcomes.extend(round);
        rounds += 1;

        if start.elapsed() + pause >= duration {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = stop.wait() => {
                stopped = true;
                break;
            }
        }
    }

    let elapsed = start.elapsed();
    let summary = summarize(&outcomes, elapsed);

    tracing::info!(
        "Stress: Finished campaign for {}: {} requests in {} rounds, {:.1}% success, {:.1} req/s{}",
        target.name,
        summary.total_count,
        rounds,
        summary.success_rate,
        summary.requests_per_second,
        if stopped { " (stopped)" } else { "" }
    );

    Campaign {
        id: 0,
        target_id: target.id,
        config: config.clone(),
        started_at,
        ended_at: Utc::now(),
        elapsed_secs: elapsed.as_secs_f64(),
        stopped,
        outcomes,
        summary,
        error: None,
    }
}

/// Issue `concurrency` requests at once and wait for all of them.
///
/// Each request runs in its own task; a task that fails is recorded as an
/// unhealthy outcome instead of failing the round.
async fn run_round(prober: &Arc<dyn Prober>, target: &Arc<Target>, concurrency: u32) -> Vec<Outcome> {
    let handles: Vec<JoinHandle<Outcome>> = (0..concurrency)
        .map(|_| {
            let prober = prober.clone();
            let target = target.clone();
            tokio::spawn(async move { prober.probe(&target).await })
        })
        .collect();

    join_all(handles)
        .await
        .into_iter()
        .map(|joined| match joined {
            Ok(outcome) => outcome,
            Err(e) => Outcome::failed(e.to_string(), 0.0, Utc::now()),
        })
        .collect()
}
