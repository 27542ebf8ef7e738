//! Database module for apiwatch.
//!
//! Holds the data model shared by the probe, monitor and stress modules, and
//! a SQLite store that persists targets and campaigns.

mod models;
mod store;

pub use models::*;
pub use store::*;

/// Persistence operations the monitor and load campaigns rely on.
pub trait TargetRepository: Send + Sync {
    fn load_targets(&self) -> Result<Vec<Target>, DbError>;

    fn get_target(&self, id: i64) -> Result<Target, DbError>;

    /// Store the health fields produced by a probe.
    fn update_health(&self, id: i64, update: &HealthUpdate) -> Result<(), DbError>;

    /// Store a completed campaign and return its id.
    fn save_campaign(&self, campaign: &Campaign) -> Result<i64, DbError>;
}
