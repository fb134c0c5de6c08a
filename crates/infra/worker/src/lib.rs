//! # Marketplace Worker
//!
//! Hosts message handlers behind the reliability layer:
//! - TOML configuration (`DeadLetter` and `Worker` sections)
//! - Bounded concurrent dispatch, one task per message
//! - Graceful shutdown through a shared cancellation token
//! - Periodic dead-letter retention sweep

pub mod config;
mod host;
mod maintenance;
mod telemetry;

pub use config::{AppConfig, ConfigError, WorkerConfig, load_config};
pub use host::{ConsumerHost, HostStats, HostStatsSnapshot};
pub use maintenance::run_retention_sweep;
pub use telemetry::init_tracing;
