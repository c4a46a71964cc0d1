//! Brand-mention ingestion worker: polls external sources for keyword
//! mentions, persists novel mentions/matches, and delivers webhook alerts
//! with exponential backoff. Runs as a singleton batch job — one invocation,
//! one pass, guarded by a cluster-wide Postgres advisory lock.

pub mod config;
pub mod error;
pub mod ids;
pub mod models;
pub mod notifier;
pub mod pipeline;
pub mod registry;
pub mod sources;
pub mod store;

pub use config::Settings;
pub use pipeline::Pipeline;
