//! Persistence Boundary
//!
//! Flat views of the authoritative store the caches are built from at
//! warm-up, refreshed from on demand, and fallen back to when a cache misses.

pub mod memory;

pub use memory::{MemorySource, Snapshot};

use crate::error::SourceError;
use crate::hierarchy::CategoryNode;
use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Raw post as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRow {
    pub id: i64,
    pub category_id: NodeId,
    /// Creation time, milliseconds since the epoch (UTC)
    pub created_at_ms: i64,
}

/// Raw attachment as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRow {
    pub id: i64,
    pub post_id: i64,
    pub category_id: NodeId,
    pub size: u64,
}

/// Raw per-category post count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostCountRow {
    pub category_id: NodeId,
    pub count: u64,
}

/// Read interface onto the persistence layer
pub trait CategorySource: Send + Sync {
    fn load_categories(&self) -> Result<Vec<CategoryNode>, SourceError>;
    fn load_post_counts(&self) -> Result<Vec<PostCountRow>, SourceError>;
    fn load_posts(&self) -> Result<Vec<PostRow>, SourceError>;
    fn load_attachments(&self) -> Result<Vec<AttachmentRow>, SourceError>;

    fn posts_for_category(&self, category_id: NodeId) -> Result<Vec<PostRow>, SourceError> {
        Ok(self
            .load_posts()?
            .into_iter()
            .filter(|post| post.category_id == category_id)
            .collect())
    }

    fn attachments_for_category(
        &self,
        category_id: NodeId,
    ) -> Result<Vec<AttachmentRow>, SourceError> {
        Ok(self
            .load_attachments()?
            .into_iter()
            .filter(|attachment| attachment.category_id == category_id)
            .collect())
    }
}

/// Index raw post counts by category
pub fn post_count_map(rows: &[PostCountRow]) -> HashMap<NodeId, u64> {
    let mut counts = HashMap::with_capacity(rows.len());
    for row in rows {
        *counts.entry(row.category_id).or_insert(0) += row.count;
    }
    counts
}

/// `root` plus every category below it, computed from raw rows
pub fn subtree_from_rows(categories: &[CategoryNode], root: NodeId) -> Vec<NodeId> {
    let mut children: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for category in categories {
        if let Some(parent_id) = category.parent_id {
            children.entry(parent_id).or_default().push(category.id);
        }
    }

    let mut members = Vec::new();
    let mut stack = vec![root];
    while let Some(current) = stack.pop() {
        if members.contains(&current) {
            continue;
        }
        members.push(current);
        if let Some(kids) = children.get(&current) {
            stack.extend(kids.iter().copied());
        }
    }
    members
}
