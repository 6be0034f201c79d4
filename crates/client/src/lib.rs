//! Client code for rewind.
//!
//! This crate provides the history middleware that sits between a crawler and
//! the network, the live HTTP fetcher it falls back to, and the default
//! backend registry.

pub mod fetch;
pub mod history;
pub mod middleware;
pub mod registry;
pub mod stats;

pub use fetch::{FetchConfig, LiveFetcher};
pub use history::HistoryClient;
pub use middleware::{Decision, HistoryMiddleware};
pub use registry::default_backends;
pub use stats::{HistoryStats, StatsSnapshot};
