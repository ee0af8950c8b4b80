//! Canopy: Hierarchical Aggregation Cache
//!
//! In-memory aggregates over a shallow category tree. Every category keeps a
//! direct and a recursive value for three metrics (post counts, day-bucketed
//! activity, attachment totals), maintained incrementally by ancestor walks as
//! categories, posts and files are created, moved and deleted.

pub mod cache;
pub mod concurrency;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod hierarchy;
pub mod logging;
pub mod service;
pub mod source;
pub mod tooling;
pub mod types;

pub use coordinator::{CacheCoordinator, CacheStats};
pub use error::{CacheError, SourceError};
pub use events::CacheEvent;
pub use hierarchy::{CategoryNode, HierarchyIndex};
pub use service::StatsService;
pub use types::{Metric, NodeId};
