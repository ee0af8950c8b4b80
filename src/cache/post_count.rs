//! Post-Count Cache
//!
//! Direct and recursive post counts per category. The counts live on the
//! hierarchy nodes; this cache owns the event semantics and the toggle.

use super::{CacheSection, CacheState, HierarchySlot};
use crate::error::CacheError;
use crate::hierarchy::{HierarchyIndex, RemovedSubtree};
use crate::types::{Metric, NodeId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct PostCountCache {
    hierarchy: HierarchySlot,
    state: CacheState,
}

impl PostCountCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            hierarchy: HierarchySlot::default(),
            state: CacheState::new(Metric::PostCounts, enabled),
        }
    }

    pub fn set_hierarchy(&self, index: Arc<HierarchyIndex>) {
        self.hierarchy.set(index);
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.set_enabled(enabled);
        info!(enabled, "Post count cache toggled");
    }

    pub fn get_post_count(&self, node_id: NodeId) -> Result<u64, CacheError> {
        self.state.ensure_enabled()?;
        self.hierarchy
            .get()?
            .get(node_id)
            .map(|node| node.direct_post_count)
            .ok_or(CacheError::NodeNotFound(node_id))
    }

    pub fn get_post_count_recursive(&self, node_id: NodeId) -> Result<u64, CacheError> {
        self.state.ensure_enabled()?;
        self.hierarchy
            .get()?
            .get(node_id)
            .map(|node| node.recursive_post_count)
            .ok_or(CacheError::NodeNotFound(node_id))
    }

    /// Force a node's direct count, propagating the difference to its ancestors
    pub fn set_post_count(&self, node_id: NodeId, count: u64) -> Result<(), CacheError> {
        let hierarchy = self.hierarchy.get()?;
        let current = hierarchy
            .get(node_id)
            .map(|node| node.direct_post_count)
            .ok_or(CacheError::NodeNotFound(node_id))?;
        let delta = count as i64 - current as i64;
        hierarchy.adjust_direct_post_count(node_id, delta)?;
        self.state.touch();
        Ok(())
    }

    /// Apply `delta` to the node's direct count and every recursive count on
    /// its ancestor chain. No-op while disabled.
    pub fn update_post_count(&self, node_id: NodeId, delta: i64) -> Result<(), CacheError> {
        if !self.state.is_enabled() {
            return Ok(());
        }
        self.hierarchy.get()?.adjust_direct_post_count(node_id, delta)?;
        self.state.touch();
        Ok(())
    }

    /// A post changed category: -1 on the old chain, +1 on the new one
    pub fn on_post_moved(&self, old_node: NodeId, new_node: NodeId) -> Result<(), CacheError> {
        if old_node == new_node {
            return Ok(());
        }
        self.update_post_count(old_node, -1)?;
        self.update_post_count(new_node, 1)
    }

    /// Subtract a removed subtree's pre-delete total from its surviving ancestors
    pub fn on_category_deleted(&self, removed: &RemovedSubtree) -> Result<(), CacheError> {
        if !self.state.is_enabled() {
            return Ok(());
        }
        let total = i64::try_from(removed.recursive_post_count).unwrap_or(i64::MAX);
        self.hierarchy
            .get()?
            .adjust_recursive_post_counts(&removed.ancestors, -total);
        self.state.touch();
        debug!(
            node_id = removed.root,
            removed_posts = removed.recursive_post_count,
            "Post counts detached from ancestors"
        );
        Ok(())
    }

    /// Recompute every count from raw per-node counts
    pub fn rebuild(&self, post_counts: &HashMap<NodeId, u64>) -> Result<(), CacheError> {
        self.hierarchy.get()?.rebuild_post_counts(post_counts);
        self.state.touch();
        Ok(())
    }

    /// Sum of the recursive counts of every root
    pub fn global_total(&self) -> Result<u64, CacheError> {
        self.state.ensure_enabled()?;
        let hierarchy = self.hierarchy.get()?;
        Ok(hierarchy
            .roots()
            .into_iter()
            .filter_map(|root| hierarchy.get(root))
            .map(|node| node.recursive_post_count)
            .sum())
    }

    pub fn section(&self) -> CacheSection {
        let records = self.hierarchy.get().map(|h| h.len()).unwrap_or(0);
        self.state.section(records)
    }
}
