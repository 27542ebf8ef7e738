//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::*;
use super::TargetRepository;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const TARGET_COLUMNS: &str = "id, name, url, method, headers, body_template, timeout, expected_status, \
     stress_config, status, error_count, last_error, last_response, last_latency_ms, last_checked";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Not found")]
    NotFound,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;

        Ok(())
    }

    // --- Target CRUD ---

    /// Add a new target and return its ID.
    pub fn add_target(&self, target: &mut Target) -> Result<i64, DbError> {
        if target.timeout <= 0.0 {
            target.timeout = 10.0;
        }

        let headers = serde_json::to_string(&target.headers)?;
        let expected = serde_json::to_string(&target.expected_status)?;
        let stress = target.stress.as_ref().map(serde_json::to_string).transpose()?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO targets (name, url, method, headers, body_template, timeout, expected_status, stress_config, status, error_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                target.name,
                target.url,
                target.method,
                headers,
                target.body_template,
                target.timeout,
                expected,
                stress,
                target.status.as_str(),
                target.error_count,
            ],
        )?;
        let id = conn.last_insert_rowid();
        target.id = id;
        Ok(id)
    }

    /// Update an existing target's configuration. Health fields are left alone.
    pub fn update_target(&self, target: &Target) -> Result<(), DbError> {
        let timeout = if target.timeout <= 0.0 { 10.0 } else { target.timeout };
        let headers = serde_json::to_string(&target.headers)?;
        let expected = serde_json::to_string(&target.expected_status)?;
        let stress = target.stress.as_ref().map(serde_json::to_string).transpose()?;

        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE targets SET name=?1, url=?2, method=?3, headers=?4, body_template=?5, timeout=?6,
             expected_status=?7, stress_config=?8 WHERE id=?9",
            params![
                target.name,
                target.url,
                target.method,
                headers,
                target.body_template,
                timeout,
                expected,
                stress,
                target.id,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Get all targets.
    pub fn get_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("SELECT {} FROM targets ORDER BY id", TARGET_COLUMNS))?;

        let targets = stmt
            .query_map([], row_to_target)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(targets)
    }

    /// Get a target by ID.
    pub fn get_target(&self, id: i64) -> Result<Target, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {} FROM targets WHERE id = ?1", TARGET_COLUMNS),
            params![id],
            row_to_target,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Delete a target and its campaigns.
    pub fn delete_target(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM campaigns WHERE target_id = ?1", params![id])?;
        conn.execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        Ok(())
    }

    // --- Health ---

    /// Persist the health fields produced by a probe.
    pub fn update_health(&self, id: i64, update: &HealthUpdate) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE targets SET status=?1, error_count=?2, last_error=?3, last_response=?4,
             last_latency_ms=?5, last_checked=?6 WHERE id=?7",
            params![
                update.status.as_str(),
                update.error_count,
                update.last_error,
                update.last_response,
                update.last_latency_ms,
                update.last_checked.format(TIME_FORMAT).to_string(),
                id,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    // --- Campaigns ---

    /// Save a completed campaign and return its ID.
    pub fn save_campaign(&self, campaign: &Campaign) -> Result<i64, DbError> {
        let config = serde_json::to_string(&campaign.config)?;
        let summary = serde_json::to_string(&campaign.summary)?;
        let outcomes = serde_json::to_string(&campaign.outcomes)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO campaigns (target_id, started_at, ended_at, elapsed_secs, stopped, config, summary, outcomes, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                campaign.target_id,
                campaign.started_at.format(TIME_FORMAT).to_string(),
                campaign.ended_at.format(TIME_FORMAT).to_string(),
                campaign.elapsed_secs,
                campaign.stopped,
                config,
                summary,
                outcomes,
                campaign.error,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get the most recent campaigns for a target, newest first.
    pub fn get_campaigns(&self, target_id: i64, limit: i32) -> Result<Vec<Campaign>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, target_id, started_at, ended_at, elapsed_secs, stopped, config, summary, outcomes, error
             FROM campaigns WHERE target_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;

        let campaigns = stmt
            .query_map(params![target_id, limit], |row| {
                Ok(Campaign {
                    id: row.get(0)?,
                    target_id: row.get(1)?,
                    started_at: time_column(row, 2)?,
                    ended_at: time_column(row, 3)?,
                    elapsed_secs: row.get(4)?,
                    stopped: row.get(5)?,
                    config: json_column(row, 6)?,
                    summary: json_column(row, 7)?,
                    outcomes: json_column(row, 8)?,
                    error: row.get(9)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(campaigns)
    }
}

impl TargetRepository for Store {
    fn load_targets(&self) -> Result<Vec<Target>, DbError> {
        self.get_targets()
    }

    fn get_target(&self, id: i64) -> Result<Target, DbError> {
        Store::get_target(self, id)
    }

    fn update_health(&self, id: i64, update: &HealthUpdate) -> Result<(), DbError> {
        Store::update_health(self, id, update)
    }

    fn save_campaign(&self, campaign: &Campaign) -> Result<i64, DbError> {
        Store::save_campaign(self, campaign)
    }
}

fn row_to_target(row: &Row<'_>) -> SqlResult<Target> {
    let status: String = row.get(9)?;
    let stress: Option<String> = row.get(8)?;
    let last_checked: Option<String> = row.get(14)?;

    Ok(Target {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        method: row.get(3)?,
        headers: json_column(row, 4)?,
        body_template: row.get(5)?,
        timeout: row.get(6)?,
        expected_status: json_column(row, 7)?,
        stress: stress
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| conversion_error(8, e))?,
        status: status.parse().unwrap_or_default(),
        error_count: row.get(10)?,
        last_error: row.get(11)?,
        last_response: row.get(12)?,
        last_latency_ms: row.get(13)?,
        last_checked: last_checked.and_then(|s| parse_db_time(&s)),
    })
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> SqlResult<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, e))
}

fn time_column(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    Ok(parse_db_time(&text).unwrap_or_else(Utc::now))
}

fn conversion_error(idx: usize, err: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.9fZ",
        "%Y-%m-%dT%H:%M:%SZ",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
