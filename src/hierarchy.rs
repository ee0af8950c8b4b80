//! Hierarchy Index
//!
//! Holds every category node and the derived adjacency (parent → children,
//! child → parent) of the bounded-depth tree. Answers ancestor, descendant and
//! children queries for the aggregate caches, and owns the post-count aggregate
//! stored on each node.
//!
//! Lock order is always adjacency first, then at most one node record.

use crate::concurrency::RecordMap;
use crate::error::CacheError;
use crate::types::{apply_delta, NodeId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// A category/space in the tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryNode {
    pub id: NodeId,
    /// None for a root category
    pub parent_id: Option<NodeId>,
    /// 0 for roots; derived from the parent chain by the index
    #[serde(default)]
    pub depth: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub direct_post_count: u64,
    #[serde(default)]
    pub recursive_post_count: u64,
}

impl CategoryNode {
    pub fn new(id: NodeId, parent_id: Option<NodeId>, name: impl Into<String>) -> Self {
        Self {
            id,
            parent_id,
            depth: 0,
            name: name.into(),
            description: String::new(),
            direct_post_count: 0,
            recursive_post_count: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Shape of a move, as seen by the index when it applied it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    pub node_id: NodeId,
    pub old_parent: Option<NodeId>,
    pub new_parent: Option<NodeId>,
    /// Old parent followed by its ancestors (empty when the node was a root)
    pub old_chain: Vec<NodeId>,
    /// New parent followed by its ancestors (empty when the node became a root)
    pub new_chain: Vec<NodeId>,
    /// Moved node followed by its descendants
    pub subtree: Vec<NodeId>,
}

impl MoveOutcome {
    /// True when the move left the tree shape unchanged
    pub fn is_noop(&self) -> bool {
        self.old_parent == self.new_parent
    }
}

/// Pre-delete shape of a removed subtree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedSubtree {
    pub root: NodeId,
    pub parent_id: Option<NodeId>,
    /// Surviving ancestors of the removed root, nearest first
    pub ancestors: Vec<NodeId>,
    /// Removed root followed by every removed descendant
    pub members: Vec<NodeId>,
    /// Recursive post count of the root just before removal
    pub recursive_post_count: u64,
}

#[derive(Debug, Default)]
struct Adjacency {
    parents: HashMap<NodeId, Option<NodeId>>,
    children: HashMap<NodeId, Vec<NodeId>>,
}

impl Adjacency {
    fn contains(&self, node_id: NodeId) -> bool {
        self.parents.contains_key(&node_id)
    }

    fn parent_of(&self, node_id: NodeId) -> Option<NodeId> {
        self.parents.get(&node_id).copied().flatten()
    }

    fn attach(&mut self, node_id: NodeId, parent_id: Option<NodeId>) {
        self.parents.insert(node_id, parent_id);
        self.children.entry(node_id).or_default();
        if let Some(parent_id) = parent_id {
            let siblings = self.children.entry(parent_id).or_default();
            if !siblings.contains(&node_id) {
                siblings.push(node_id);
            }
        }
    }

    fn detach(&mut self, node_id: NodeId) {
        if let Some(parent_id) = self.parent_of(node_id) {
            if let Some(siblings) = self.children.get_mut(&parent_id) {
                siblings.retain(|child| *child != node_id);
            }
        }
    }

    /// Root-ward chain, nearest ancestor first
    fn ancestors(&self, node_id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = self.parent_of(node_id);
        while let Some(parent_id) = current {
            if chain.contains(&parent_id) {
                // cycle in source data
                break;
            }
            chain.push(parent_id);
            current = self.parent_of(parent_id);
        }
        chain
    }

    /// `node_id` followed by its ancestors
    fn chain_from(&self, node_id: Option<NodeId>) -> Vec<NodeId> {
        match node_id {
            Some(id) => {
                let mut chain = vec![id];
                chain.extend(self.ancestors(id));
                chain
            }
            None => Vec::new(),
        }
    }

    /// DFS pre-order over the subtree, excluding `node_id` itself
    fn descendants(&self, node_id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self
            .children
            .get(&node_id)
            .map(|kids| kids.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(current) = stack.pop() {
            out.push(current);
            if let Some(kids) = self.children.get(&current) {
                stack.extend(kids.iter().rev().copied());
            }
        }
        out
    }

    fn subtree(&self, node_id: NodeId) -> Vec<NodeId> {
        let mut members = vec![node_id];
        members.extend(self.descendants(node_id));
        members
    }

    fn roots(&self) -> Vec<NodeId> {
        let mut roots: Vec<NodeId> = self
            .parents
            .iter()
            .filter(|(_, parent)| parent.is_none())
            .map(|(id, _)| *id)
            .collect();
        roots.sort_unstable();
        roots
    }
}

/// In-memory index of the category tree
pub struct HierarchyIndex {
    max_depth: u32,
    nodes: RecordMap<CategoryNode>,
    adjacency: RwLock<Adjacency>,
    last_update: RwLock<Option<DateTime<Utc>>>,
}

impl HierarchyIndex {
    pub fn new(max_depth: u32) -> Self {
        Self {
            max_depth,
            nodes: RecordMap::new(),
            adjacency: RwLock::new(Adjacency::default()),
            last_update: RwLock::new(None),
        }
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.adjacency.read().contains(node_id)
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.last_update.read()
    }

    fn touch(&self) {
        *self.last_update.write() = Some(Utc::now());
    }

    /// Bulk build from the flat node list and raw per-node post counts.
    ///
    /// Depths are derived from parent links. Nodes are processed deepest
    /// first so every descendant's direct count is final before an ancestor
    /// sums it.
    pub fn initialize(
        &self,
        rows: Vec<CategoryNode>,
        post_counts: &HashMap<NodeId, u64>,
    ) -> Result<(), CacheError> {
        let mut adjacency = Adjacency::default();
        let mut by_id: HashMap<NodeId, CategoryNode> = HashMap::with_capacity(rows.len());
        for row in rows {
            if by_id.contains_key(&row.id) {
                return Err(CacheError::Initialization(format!(
                    "duplicate category id {}",
                    row.id
                )));
            }
            by_id.insert(row.id, row);
        }

        let mut sorted_ids: Vec<NodeId> = by_id.keys().copied().collect();
        sorted_ids.sort_unstable();
        for node_id in &sorted_ids {
            let node = &by_id[node_id];
            if let Some(parent_id) = node.parent_id {
                if !by_id.contains_key(&parent_id) {
                    return Err(CacheError::Initialization(format!(
                        "category {} references unknown parent {}",
                        node.id, parent_id
                    )));
                }
            }
            adjacency.attach(node.id, node.parent_id);
        }

        for node in by_id.values_mut() {
            let chain = adjacency.ancestors(node.id);
            if chain.contains(&node.id) {
                return Err(CacheError::Initialization(format!(
                    "category {} is part of a parent cycle",
                    node.id
                )));
            }
            let depth = chain.len() as u32;
            if depth > self.max_depth {
                return Err(CacheError::Initialization(format!(
                    "category {} sits at depth {}, maximum is {}",
                    node.id, depth, self.max_depth
                )));
            }
            if node.depth != depth {
                debug!(node_id = node.id, stored = node.depth, derived = depth, "Correcting stored depth");
            }
            node.depth = depth;
            node.direct_post_count = post_counts.get(&node.id).copied().unwrap_or(0);
        }

        let mut order = sorted_ids;
        order.sort_by_key(|id| Reverse(by_id[id].depth));

        for node_id in order {
            let below: u64 = adjacency
                .descendants(node_id)
                .iter()
                .map(|d| by_id[d].direct_post_count)
                .sum();
            if let Some(node) = by_id.get_mut(&node_id) {
                node.recursive_post_count = node.direct_post_count + below;
            }
        }

        let count = by_id.len();
        // Swap in under the adjacency lock so readers never see a half-built index
        let mut current = self.adjacency.write();
        self.nodes.replace_all(by_id);
        *current = adjacency;
        drop(current);
        self.touch();

        info!(nodes = count, max_depth = self.max_depth, "Hierarchy index initialized");
        Ok(())
    }

    /// Recompute every node's post counts from raw per-node counts,
    /// keeping the tree shape.
    pub fn rebuild_post_counts(&self, post_counts: &HashMap<NodeId, u64>) {
        let adjacency = self.adjacency.read();
        let mut ids: Vec<NodeId> = adjacency.parents.keys().copied().collect();
        ids.sort_unstable();
        for node_id in &ids {
            let direct = post_counts.get(node_id).copied().unwrap_or(0);
            self.nodes.write(*node_id, |node| node.direct_post_count = direct);
        }
        ids.sort_by_key(|id| Reverse(adjacency.ancestors(*id).len()));
        for node_id in ids {
            let below: u64 = adjacency
                .descendants(node_id)
                .iter()
                .map(|d| self.nodes.read(*d, |n| n.direct_post_count).unwrap_or(0))
                .sum();
            self.nodes.write(node_id, |node| {
                node.recursive_post_count = node.direct_post_count + below;
            });
        }
        drop(adjacency);
        self.touch();
    }

    /// Insert a new node, or refresh the name/description of an existing one.
    ///
    /// A new node's direct post count is added to every ancestor. Changing
    /// the parent of an existing node must go through
    /// [`handle_hierarchy_change`](Self::handle_hierarchy_change).
    pub fn set(&self, mut node: CategoryNode) -> Result<(), CacheError> {
        let mut adjacency = self.adjacency.write();

        if adjacency.contains(node.id) {
            if adjacency.parent_of(node.id) != node.parent_id {
                return Err(CacheError::InvalidMove(format!(
                    "category {} already exists under a different parent",
                    node.id
                )));
            }
            self.nodes.write(node.id, |existing| {
                existing.name = node.name;
                existing.description = node.description;
            });
            drop(adjacency);
            self.touch();
            return Ok(());
        }

        node.depth = match node.parent_id {
            Some(parent_id) if parent_id == node.id => {
                return Err(CacheError::InvalidMove(format!(
                    "category {} cannot be its own parent",
                    node.id
                )));
            }
            Some(parent_id) => {
                let parent_depth = self
                    .nodes
                    .read(parent_id, |parent| parent.depth)
                    .ok_or(CacheError::ParentNotFound(parent_id))?;
                parent_depth + 1
            }
            None => 0,
        };
        if node.depth > self.max_depth {
            return Err(CacheError::DepthExceeded {
                node: node.id,
                depth: node.depth,
                max: self.max_depth,
            });
        }

        node.recursive_post_count = node.direct_post_count;
        let seeded = node.direct_post_count;
        let node_id = node.id;
        let parent_id = node.parent_id;
        adjacency.attach(node_id, parent_id);
        self.nodes.insert(node_id, node);

        if seeded > 0 {
            for ancestor in adjacency.ancestors(node_id) {
                self.nodes.write(ancestor, |a| {
                    a.recursive_post_count = a.recursive_post_count.saturating_add(seeded);
                });
            }
        }
        drop(adjacency);
        self.touch();

        debug!(node_id, parent_id = ?parent_id, "Category added to hierarchy");
        Ok(())
    }

    pub fn get(&self, node_id: NodeId) -> Option<CategoryNode> {
        self.nodes.snapshot(node_id)
    }

    /// Update the descriptive fields of a node
    pub fn update_details(
        &self,
        node_id: NodeId,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<(), CacheError> {
        self.nodes
            .write(node_id, |node| {
                if let Some(name) = name {
                    node.name = name;
                }
                if let Some(description) = description {
                    node.description = description;
                }
            })
            .ok_or(CacheError::NodeNotFound(node_id))?;
        self.touch();
        Ok(())
    }

    /// Remove a node and its whole subtree.
    ///
    /// Ancestor aggregates are left untouched; the returned shape lets each
    /// aggregate cache subtract the removed totals from the survivors.
    pub fn delete(&self, node_id: NodeId) -> Result<RemovedSubtree, CacheError> {
        let mut adjacency = self.adjacency.write();
        if !adjacency.contains(node_id) {
            return Err(CacheError::NodeNotFound(node_id));
        }

        let parent_id = adjacency.parent_of(node_id);
        let ancestors = adjacency.ancestors(node_id);
        let members = adjacency.subtree(node_id);
        let recursive_post_count = self
            .nodes
            .read(node_id, |node| node.recursive_post_count)
            .unwrap_or(0);

        adjacency.detach(node_id);
        for member in &members {
            adjacency.parents.remove(member);
            adjacency.children.remove(member);
        }
        self.nodes.remove_all(&members);
        drop(adjacency);
        self.touch();

        debug!(node_id, removed = members.len(), "Category subtree removed from hierarchy");
        Ok(RemovedSubtree {
            root: node_id,
            parent_id,
            ancestors,
            members,
            recursive_post_count,
        })
    }

    /// Direct children, in insertion order
    pub fn children(&self, node_id: NodeId) -> Vec<NodeId> {
        self.adjacency
            .read()
            .children
            .get(&node_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every node below `node_id`, DFS pre-order
    pub fn descendants(&self, node_id: NodeId) -> Vec<NodeId> {
        self.adjacency.read().descendants(node_id)
    }

    /// Root-ward chain, nearest ancestor first
    pub fn ancestors(&self, node_id: NodeId) -> Vec<NodeId> {
        self.adjacency.read().ancestors(node_id)
    }

    pub fn parent_of(&self, node_id: NodeId) -> Option<NodeId> {
        self.adjacency.read().parent_of(node_id)
    }

    pub fn roots(&self) -> Vec<NodeId> {
        self.adjacency.read().roots()
    }

    /// Every node id, ascending
    pub fn ids(&self) -> Vec<NodeId> {
        let mut ids = self.nodes.ids();
        ids.sort_unstable();
        ids
    }

    /// Every node id ordered deepest first (ties by id)
    pub fn ids_deepest_first(&self) -> Vec<NodeId> {
        let adjacency = self.adjacency.read();
        let mut ids: Vec<NodeId> = adjacency.parents.keys().copied().collect();
        ids.sort_unstable();
        ids.sort_by_key(|id| Reverse(adjacency.ancestors(*id).len()));
        ids
    }

    /// Clone of every node, ordered by depth then id
    pub fn snapshot_all(&self) -> Vec<CategoryNode> {
        let mut nodes: Vec<CategoryNode> = self
            .nodes
            .handles()
            .into_iter()
            .map(|(_, node)| node.read().clone())
            .collect();
        nodes.sort_by_key(|node| (node.depth, node.id));
        nodes
    }

    /// Move a node (and its subtree) under a new parent.
    ///
    /// The moved node's recursive post count is subtracted from the old
    /// parent chain and added to the new one; descendant depths are patched.
    /// Nothing outside the two chains and the moved subtree is touched.
    pub fn handle_hierarchy_change(
        &self,
        node_id: NodeId,
        old_parent: Option<NodeId>,
        new_parent: Option<NodeId>,
    ) -> Result<MoveOutcome, CacheError> {
        let mut adjacency = self.adjacency.write();
        if !adjacency.contains(node_id) {
            return Err(CacheError::NodeNotFound(node_id));
        }

        let current_parent = adjacency.parent_of(node_id);
        if current_parent != old_parent {
            warn!(
                node_id,
                reported = ?old_parent,
                indexed = ?current_parent,
                "Move event disagrees with indexed parent, using indexed parent"
            );
        }

        let subtree = adjacency.subtree(node_id);
        if current_parent == new_parent {
            return Ok(MoveOutcome {
                node_id,
                old_parent: current_parent,
                new_parent,
                old_chain: Vec::new(),
                new_chain: Vec::new(),
                subtree,
            });
        }

        let new_depth = match new_parent {
            Some(parent_id) => {
                if !adjacency.contains(parent_id) {
                    return Err(CacheError::ParentNotFound(parent_id));
                }
                if subtree.contains(&parent_id) {
                    return Err(CacheError::InvalidMove(format!(
                        "category {} cannot move beneath its own subtree ({})",
                        node_id, parent_id
                    )));
                }
                adjacency.ancestors(parent_id).len() as u32 + 1
            }
            None => 0,
        };

        let old_depth = self
            .nodes
            .read(node_id, |node| node.depth)
            .ok_or(CacheError::NodeNotFound(node_id))?;
        // subtree depths are never shallower than the moved node
        let shifted = |depth: u32| depth.saturating_sub(old_depth) + new_depth;
        let deepest = subtree
            .iter()
            .filter_map(|id| self.nodes.read(*id, |n| n.depth))
            .max()
            .unwrap_or(old_depth);
        let deepest_after = shifted(deepest);
        if deepest_after > self.max_depth {
            return Err(CacheError::DepthExceeded {
                node: node_id,
                depth: deepest_after,
                max: self.max_depth,
            });
        }

        let old_chain = adjacency.chain_from(current_parent);
        let new_chain = adjacency.chain_from(new_parent);
        let aggregate = self
            .nodes
            .read(node_id, |node| node.recursive_post_count)
            .unwrap_or(0);
        let delta = i64::try_from(aggregate).unwrap_or(i64::MAX);

        for ancestor in &old_chain {
            self.nodes.write(*ancestor, |a| {
                a.recursive_post_count = apply_delta(a.recursive_post_count, -delta);
            });
        }
        for ancestor in &new_chain {
            self.nodes.write(*ancestor, |a| {
                a.recursive_post_count = apply_delta(a.recursive_post_count, delta);
            });
        }

        adjacency.detach(node_id);
        adjacency.attach(node_id, new_parent);
        self.nodes.write(node_id, |node| {
            node.parent_id = new_parent;
        });
        if new_depth != old_depth {
            for member in &subtree {
                self.nodes.write(*member, |node| node.depth = shifted(node.depth));
            }
        }
        drop(adjacency);
        self.touch();

        debug!(
            node_id,
            old_parent = ?current_parent,
            new_parent = ?new_parent,
            moved_posts = aggregate,
            subtree = subtree.len(),
            "Category moved"
        );

        Ok(MoveOutcome {
            node_id,
            old_parent: current_parent,
            new_parent,
            old_chain,
            new_chain,
            subtree,
        })
    }

    /// Apply a post-count delta to a node's direct count, then walk its
    /// ancestors. Returns the delta actually applied after clamping.
    pub fn adjust_direct_post_count(&self, node_id: NodeId, delta: i64) -> Result<i64, CacheError> {
        let applied = self
            .nodes
            .write(node_id, |node| {
                let before = node.direct_post_count;
                node.direct_post_count = apply_delta(before, delta);
                let applied = node.direct_post_count as i64 - before as i64;
                node.recursive_post_count = apply_delta(node.recursive_post_count, applied);
                applied
            })
            .ok_or(CacheError::NodeNotFound(node_id))?;

        if applied != 0 {
            let chain = self.ancestors(node_id);
            self.adjust_recursive_post_counts(&chain, applied);
        }
        if applied != delta {
            debug!(node_id, delta, applied, "Post count delta clamped at zero");
        }
        Ok(applied)
    }

    /// Apply a delta to the recursive post count of each listed node
    pub fn adjust_recursive_post_counts(&self, chain: &[NodeId], delta: i64) {
        for ancestor in chain {
            self.nodes.write(*ancestor, |a| {
                a.recursive_post_count = apply_delta(a.recursive_post_count, delta);
            });
        }
    }
}
