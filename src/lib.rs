//! apiwatch - API health monitoring and load testing.
//!
//! Periodically probes registered HTTP endpoints, tracks their health with a
//! per-target failure streak, and runs time-boxed concurrent load campaigns
//! with latency and throughput statistics.

pub mod config;
pub mod db;
pub mod monitor;
pub mod probe;
pub mod stats;
pub mod stress;
