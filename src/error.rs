//! Error types for the cache core and its persistence boundary.

use crate::types::{Metric, NodeId};
use thiserror::Error;

/// Errors raised by a [`CategorySource`](crate::source::CategorySource)
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Persistence layer unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid source data: {0}")]
    InvalidData(String),

    #[error("Write rejected: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors raised by the hierarchy index, the aggregate caches and the coordinator
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Category not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Parent category not found: {0}")]
    ParentNotFound(NodeId),

    #[error("Category {node} would sit at depth {depth}, maximum is {max}")]
    DepthExceeded { node: NodeId, depth: u32, max: u32 },

    #[error("Invalid move: {0}")]
    InvalidMove(String),

    #[error("Invalid timestamp: {0}ms")]
    InvalidTimestamp(i64),

    #[error("Invalid activity period: {0}")]
    InvalidPeriod(String),

    #[error("Hierarchy index has not been attached")]
    HierarchyNotSet,

    #[error("Cache disabled: {0}")]
    CacheDisabled(Metric),

    #[error("Cache initialization failed: {0}")]
    Initialization(String),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Whether the caller should fall back to the persistence layer
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::NodeNotFound(_) | CacheError::CacheDisabled(_))
    }
}

impl From<config::ConfigError> for CacheError {
    fn from(err: config::ConfigError) -> Self {
        CacheError::Config(err.to_string())
    }
}
