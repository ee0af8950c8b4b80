//! Cache Coordinator
//!
//! Single entry point for cache maintenance. Owns the hierarchy index and the
//! three aggregate caches, and fans each [`CacheEvent`] out to them: the index
//! first for structural events, then every dependent cache.
//!
//! Structural events hold the dispatch gate exclusively so no post or file
//! event can walk a half-moved tree. Post and file events share the gate and
//! run concurrently under per-record locks.
//!
//! Rebuilds that read the persistence layer also hold the commit lock
//! exclusively, from the first load until the rebuilt cache is live. Writers
//! that go through [`CacheCoordinator::commit`] hold it shared across their
//! durable write and the dispatch of the events it produced, so a write lands
//! either wholly before a rebuild's load or wholly after its rebuild.

use crate::cache::activity::DayHistogram;
use crate::cache::{ActivityCache, CacheSection, FileStats, FileStatsCache, PostCountCache};
use crate::config::CacheConfig;
use crate::error::{CacheError, SourceError};
use crate::events::CacheEvent;
use crate::hierarchy::{CategoryNode, HierarchyIndex};
use crate::source::{AttachmentRow, PostRow};
use crate::types::{day_from_millis, Metric, NodeId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Hierarchy section of [`CacheStats`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchySection {
    pub nodes: usize,
    pub max_depth: u32,
    pub last_update: Option<DateTime<Utc>>,
}

/// Introspection over every cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hierarchy: HierarchySection,
    pub post_counts: CacheSection,
    pub activity: CacheSection,
    pub file_stats: CacheSection,
}

/// One aggregate that disagrees with the sum over its subtree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantViolation {
    pub metric: Metric,
    pub node_id: NodeId,
    pub detail: String,
}

pub struct CacheCoordinator {
    hierarchy: Arc<HierarchyIndex>,
    post_counts: Arc<PostCountCache>,
    activity: Arc<ActivityCache>,
    file_stats: Arc<FileStatsCache>,
    commits: RwLock<()>,
    gate: RwLock<()>,
}

impl CacheCoordinator {
    /// Build the index and every cache, wiring the index into each
    pub fn new(config: &CacheConfig) -> Self {
        let hierarchy = Arc::new(HierarchyIndex::new(config.max_depth));

        let post_counts = Arc::new(PostCountCache::new(config.post_counts_enabled));
        let activity = Arc::new(ActivityCache::new(
            config.activity_enabled,
            config.activity_period_months,
        ));
        let file_stats = Arc::new(FileStatsCache::new(config.file_stats_enabled));

        post_counts.set_hierarchy(hierarchy.clone());
        activity.set_hierarchy(hierarchy.clone());
        file_stats.set_hierarchy(hierarchy.clone());

        Self {
            hierarchy,
            post_counts,
            activity,
            file_stats,
            commits: RwLock::new(()),
            gate: RwLock::new(()),
        }
    }

    pub fn hierarchy(&self) -> &Arc<HierarchyIndex> {
        &self.hierarchy
    }

    pub fn post_counts(&self) -> &Arc<PostCountCache> {
        &self.post_counts
    }

    pub fn activity(&self) -> &Arc<ActivityCache> {
        &self.activity
    }

    pub fn file_stats(&self) -> &Arc<FileStatsCache> {
        &self.file_stats
    }

    /// Bulk build the index (and with it every post count)
    pub fn initialize_hierarchy(
        &self,
        nodes: Vec<CategoryNode>,
        post_counts: &HashMap<NodeId, u64>,
    ) -> Result<(), CacheError> {
        self.exclusive(|| self.build_hierarchy(nodes, post_counts))
    }

    /// Bulk build the activity and file caches; the index must already be built
    pub fn prime(&self, posts: &[PostRow], attachments: &[AttachmentRow]) -> Result<(), CacheError> {
        self.prime_activity(posts)?;
        self.prime_file_stats(attachments)?;
        info!(posts = posts.len(), attachments = attachments.len(), "Caches primed");
        Ok(())
    }

    pub fn prime_activity(&self, posts: &[PostRow]) -> Result<(), CacheError> {
        self.exclusive(|| self.activity.initialize(posts))
    }

    pub fn prime_file_stats(&self, attachments: &[AttachmentRow]) -> Result<(), CacheError> {
        self.exclusive(|| self.file_stats.initialize(attachments))
    }

    /// Recompute every post count from raw per-node counts, keeping the tree
    pub fn rebuild_post_counts(&self, post_counts: &HashMap<NodeId, u64>) -> Result<(), CacheError> {
        self.exclusive(|| self.post_counts.rebuild(post_counts))
    }

    /// Reconcile one category's direct values with the persistence layer
    pub fn refresh_category(
        &self,
        category_id: NodeId,
        direct_posts: u64,
        posts: &[PostRow],
        attachments: &[AttachmentRow],
    ) -> Result<(), CacheError> {
        self.exclusive(|| self.apply_refresh(category_id, direct_posts, posts, attachments))
    }

    /// Run `f` with no write committing and no event dispatching.
    ///
    /// Loads inside `f` see the source exactly as the caches will once `f`
    /// returns. `f` must not call back into `process_event` or `commit`.
    pub(crate) fn exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let _commits = self.commits.write();
        let _gate = self.gate.write();
        f()
    }

    pub(crate) fn build_hierarchy(
        &self,
        nodes: Vec<CategoryNode>,
        post_counts: &HashMap<NodeId, u64>,
    ) -> Result<(), CacheError> {
        self.hierarchy.initialize(nodes, post_counts)?;
        self.post_counts.rebuild(post_counts)
    }

    pub(crate) fn apply_refresh(
        &self,
        category_id: NodeId,
        direct_posts: u64,
        posts: &[PostRow],
        attachments: &[AttachmentRow],
    ) -> Result<(), CacheError> {
        self.ensure_known(category_id)?;
        if self.post_counts.is_enabled() {
            self.post_counts.set_post_count(category_id, direct_posts)?;
        }
        self.activity.refresh_category(category_id, posts)?;
        self.file_stats.refresh_category(category_id, attachments)?;
        debug!(category_id, "Category refreshed from source");
        Ok(())
    }

    /// Perform a durable write and dispatch the events it returns as one
    /// unit with respect to rebuilds.
    ///
    /// A failed write dispatches nothing. Dispatch stops at the first
    /// rejected event.
    pub fn commit<F>(&self, write: F) -> Result<Vec<CacheEvent>, CacheError>
    where
        F: FnOnce() -> Result<Vec<CacheEvent>, SourceError>,
    {
        let _commits = self.commits.read();
        let events = write()?;
        for event in &events {
            self.dispatch_gated(event)?;
        }
        Ok(events)
    }

    /// Fan one event out to the index and the caches
    pub fn process_event(&self, event: &CacheEvent) -> Result<(), CacheError> {
        let _commits = self.commits.read();
        self.dispatch_gated(event)
    }

    fn dispatch_gated(&self, event: &CacheEvent) -> Result<(), CacheError> {
        debug!(kind = event.kind(), node_id = event.node_id(), "Dispatching cache event");
        if event.is_structural() {
            let _gate = self.gate.write();
            self.dispatch(event)
        } else {
            let _gate = self.gate.read();
            self.dispatch(event)
        }
    }

    fn dispatch(&self, event: &CacheEvent) -> Result<(), CacheError> {
        match event {
            CacheEvent::CategoryCreated { node } => {
                self.hierarchy.set(node.clone())?;
                self.activity.on_category_created(node.id);
                self.file_stats.on_category_created(node.id);
            }
            CacheEvent::CategoryUpdated {
                node_id,
                name,
                description,
            } => {
                self.hierarchy
                    .update_details(*node_id, name.clone(), description.clone())?;
            }
            CacheEvent::CategoryMoved {
                node_id,
                old_parent_id,
                new_parent_id,
            } => {
                let outcome =
                    self.hierarchy
                        .handle_hierarchy_change(*node_id, *old_parent_id, *new_parent_id)?;
                self.activity.handle_hierarchy_change(&outcome)?;
                self.file_stats.handle_hierarchy_change(&outcome)?;
            }
            CacheEvent::CategoryDeleted { node_id } => {
                let removed = self.hierarchy.delete(*node_id)?;
                self.post_counts.on_category_deleted(&removed)?;
                self.activity.on_category_deleted(&removed)?;
                self.file_stats.on_category_deleted(&removed)?;
            }
            CacheEvent::PostCreated {
                node_id,
                created_at_ms,
            } => {
                self.ensure_known(*node_id)?;
                ensure_timestamp(*created_at_ms)?;
                self.post_counts.update_post_count(*node_id, 1)?;
                self.activity.update_post_activity(*node_id, *created_at_ms, 1)?;
            }
            CacheEvent::PostDeleted {
                node_id,
                created_at_ms,
            } => {
                self.ensure_known(*node_id)?;
                ensure_timestamp(*created_at_ms)?;
                self.post_counts.update_post_count(*node_id, -1)?;
                self.activity.update_post_activity(*node_id, *created_at_ms, -1)?;
            }
            CacheEvent::PostMoved {
                old_node_id,
                new_node_id,
                created_at_ms,
            } => {
                self.ensure_known(*old_node_id)?;
                self.ensure_known(*new_node_id)?;
                ensure_timestamp(*created_at_ms)?;
                if old_node_id != new_node_id {
                    self.post_counts.on_post_moved(*old_node_id, *new_node_id)?;
                    self.activity
                        .update_post_activity(*old_node_id, *created_at_ms, -1)?;
                    self.activity
                        .update_post_activity(*new_node_id, *created_at_ms, 1)?;
                }
            }
            CacheEvent::FileAdded { node_id, file_size } => {
                self.ensure_known(*node_id)?;
                self.file_stats
                    .update_file_stats(*node_id, size_as_delta(*file_size), 1)?;
            }
            CacheEvent::FileRemoved { node_id, file_size } => {
                self.ensure_known(*node_id)?;
                self.file_stats
                    .update_file_stats(*node_id, -size_as_delta(*file_size), -1)?;
            }
        }
        Ok(())
    }

    fn ensure_known(&self, node_id: NodeId) -> Result<(), CacheError> {
        if self.hierarchy.contains(node_id) {
            Ok(())
        } else {
            Err(CacheError::NodeNotFound(node_id))
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hierarchy: HierarchySection {
                nodes: self.hierarchy.len(),
                max_depth: self.hierarchy.max_depth(),
                last_update: self.hierarchy.last_update(),
            },
            post_counts: self.post_counts.section(),
            activity: self.activity.section(),
            file_stats: self.file_stats.section(),
        }
    }

    /// Check every enabled metric's recursive value against the sum of
    /// direct values over the node's subtree
    pub fn verify(&self) -> Vec<InvariantViolation> {
        let _gate = self.gate.write();
        let mut violations = Vec::new();

        for node_id in self.hierarchy.ids() {
            let subtree: Vec<NodeId> = std::iter::once(node_id)
                .chain(self.hierarchy.descendants(node_id))
                .collect();

            if self.post_counts.is_enabled() {
                if let Some(node) = self.hierarchy.get(node_id) {
                    let expected: u64 = subtree
                        .iter()
                        .filter_map(|id| self.hierarchy.get(*id))
                        .map(|n| n.direct_post_count)
                        .sum();
                    if node.recursive_post_count != expected {
                        violations.push(InvariantViolation {
                            metric: Metric::PostCounts,
                            node_id,
                            detail: format!(
                                "recursive {} != subtree sum {}",
                                node.recursive_post_count, expected
                            ),
                        });
                    }
                }
            }

            if self.activity.is_enabled() {
                if let Ok(record) = self.activity.get_category_activity(node_id) {
                    let mut expected = DayHistogram::new();
                    for id in &subtree {
                        if let Ok(below) = self.activity.get_category_activity(*id) {
                            for (day, count) in below.days {
                                *expected.entry(day).or_insert(0) += count;
                            }
                        }
                    }
                    if record.recursive != expected
                        || record.stats.active_days != record.days.len()
                        || record.stats.recursive_active_days != record.recursive.len()
                    {
                        violations.push(InvariantViolation {
                            metric: Metric::Activity,
                            node_id,
                            detail: format!(
                                "recursive histogram has {} days, subtree merge has {}",
                                record.recursive.len(),
                                expected.len()
                            ),
                        });
                    }
                }
            }

            if self.file_stats.is_enabled() {
                if let Ok(record) = self.file_stats.get_category_file_stats(node_id) {
                    let mut expected = FileStats::default();
                    for id in &subtree {
                        if let Ok(below) = self.file_stats.get_category_file_stats(*id) {
                            expected.add(&below.direct);
                        }
                    }
                    if record.recursive != expected {
                        violations.push(InvariantViolation {
                            metric: Metric::FileStats,
                            node_id,
                            detail: format!(
                                "recursive {:?} != subtree sum {:?}",
                                record.recursive, expected
                            ),
                        });
                    }
                }
            }
        }
        violations
    }
}

fn ensure_timestamp(timestamp_ms: i64) -> Result<(), CacheError> {
    day_from_millis(timestamp_ms)
        .map(|_| ())
        .ok_or(CacheError::InvalidTimestamp(timestamp_ms))
}

fn size_as_delta(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}
