//! Cache events
//!
//! Transient records describing a state change that has already been made
//! durable. They drive incremental cache maintenance and are never persisted.

use crate::hierarchy::CategoryNode;
use crate::types::NodeId;
use serde::{Deserialize, Serialize};

/// A domain change to fan out to the caches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    CategoryCreated {
        node: CategoryNode,
    },
    CategoryUpdated {
        node_id: NodeId,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
    CategoryMoved {
        node_id: NodeId,
        old_parent_id: Option<NodeId>,
        new_parent_id: Option<NodeId>,
    },
    CategoryDeleted {
        node_id: NodeId,
    },
    PostCreated {
        node_id: NodeId,
        /// Post creation time, milliseconds since the epoch (UTC)
        created_at_ms: i64,
    },
    PostMoved {
        old_node_id: NodeId,
        new_node_id: NodeId,
        created_at_ms: i64,
    },
    PostDeleted {
        node_id: NodeId,
        created_at_ms: i64,
    },
    FileAdded {
        node_id: NodeId,
        file_size: u64,
    },
    FileRemoved {
        node_id: NodeId,
        file_size: u64,
    },
}

impl CacheEvent {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            CacheEvent::CategoryCreated { .. } => "category_created",
            CacheEvent::CategoryUpdated { .. } => "category_updated",
            CacheEvent::CategoryMoved { .. } => "category_moved",
            CacheEvent::CategoryDeleted { .. } => "category_deleted",
            CacheEvent::PostCreated { .. } => "post_created",
            CacheEvent::PostMoved { .. } => "post_moved",
            CacheEvent::PostDeleted { .. } => "post_deleted",
            CacheEvent::FileAdded { .. } => "file_added",
            CacheEvent::FileRemoved { .. } => "file_removed",
        }
    }

    /// Primary node the event concerns (the destination for post moves)
    pub fn node_id(&self) -> NodeId {
        match self {
            CacheEvent::CategoryCreated { node } => node.id,
            CacheEvent::CategoryUpdated { node_id, .. }
            | CacheEvent::CategoryMoved { node_id, .. }
            | CacheEvent::CategoryDeleted { node_id }
            | CacheEvent::PostCreated { node_id, .. }
            | CacheEvent::PostDeleted { node_id, .. }
            | CacheEvent::FileAdded { node_id, .. }
            | CacheEvent::FileRemoved { node_id, .. } => *node_id,
            CacheEvent::PostMoved { new_node_id, .. } => *new_node_id,
        }
    }

    /// Whether the event changes the tree shape or node set
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            CacheEvent::CategoryCreated { .. }
                | CacheEvent::CategoryUpdated { .. }
                | CacheEvent::CategoryMoved { .. }
                | CacheEvent::CategoryDeleted { .. }
        )
    }
}
