//! File-Statistics Cache
//!
//! Attachment count and total byte size per category, direct and recursive.

use super::{CacheSection, CacheState, HierarchySlot};
use crate::concurrency::RecordMap;
use crate::error::CacheError;
use crate::hierarchy::{HierarchyIndex, MoveOutcome, RemovedSubtree};
use crate::source::AttachmentRow;
use crate::types::{apply_delta, Metric, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Attachment totals; never negative
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStats {
    pub file_count: u64,
    pub total_size: u64,
}

impl FileStats {
    pub fn new(file_count: u64, total_size: u64) -> Self {
        Self {
            file_count,
            total_size,
        }
    }

    /// Apply signed deltas, clamping each field at zero.
    /// Returns the deltas actually applied as `(size, count)`.
    pub fn apply(&mut self, size_delta: i64, count_delta: i64) -> (i64, i64) {
        let size_before = self.total_size;
        let count_before = self.file_count;
        self.total_size = apply_delta(size_before, size_delta);
        self.file_count = apply_delta(count_before, count_delta);
        (
            self.total_size as i64 - size_before as i64,
            self.file_count as i64 - count_before as i64,
        )
    }

    pub fn add(&mut self, other: &FileStats) {
        self.file_count = self.file_count.saturating_add(other.file_count);
        self.total_size = self.total_size.saturating_add(other.total_size);
    }

    pub fn is_empty(&self) -> bool {
        self.file_count == 0 && self.total_size == 0
    }

    fn signed(&self, sign: i64) -> (i64, i64) {
        let size = i64::try_from(self.total_size).unwrap_or(i64::MAX);
        let count = i64::try_from(self.file_count).unwrap_or(i64::MAX);
        (sign * size, sign * count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatsRecord {
    pub category_id: NodeId,
    pub direct: FileStats,
    pub recursive: FileStats,
    pub last_update: DateTime<Utc>,
}

impl FileStatsRecord {
    pub fn new(category_id: NodeId) -> Self {
        Self {
            category_id,
            direct: FileStats::default(),
            recursive: FileStats::default(),
            last_update: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatsRequest {
    pub category_id: NodeId,
    #[serde(default)]
    pub recursive: bool,
}

impl FileStatsRequest {
    pub fn new(category_id: NodeId, recursive: bool) -> Self {
        Self {
            category_id,
            recursive,
        }
    }
}

/// Answer to a [`FileStatsRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatsView {
    pub category_id: NodeId,
    pub recursive: bool,
    pub file_count: u64,
    pub total_size: u64,
}

pub struct FileStatsCache {
    hierarchy: HierarchySlot,
    records: RecordMap<FileStatsRecord>,
    state: CacheState,
}

impl FileStatsCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            hierarchy: HierarchySlot::default(),
            records: RecordMap::new(),
            state: CacheState::new(Metric::FileStats, enabled),
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
        info!(enabled, "File stats cache toggled");
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.state.last_update()
    }

    pub fn section(&self) -> CacheSection {
        self.state.section(self.records.len())
    }

    /// Bulk rebuild from every raw attachment
    pub fn initialize(&self, attachments: &[AttachmentRow]) -> Result<(), CacheError> {
        let hierarchy = self.hierarchy.get()?;
        let mut records: HashMap<NodeId, FileStatsRecord> = hierarchy
            .ids()
            .into_iter()
            .map(|id| (id, FileStatsRecord::new(id)))
            .collect();

        for attachment in attachments {
            match records.get_mut(&attachment.category_id) {
                Some(record) => {
                    record.direct.file_count += 1;
                    record.direct.total_size =
                        record.direct.total_size.saturating_add(attachment.size);
                }
                None => warn!(
                    attachment_id = attachment.id,
                    category_id = attachment.category_id,
                    "Attachment references an unknown category"
                ),
            }
        }

        for node_id in hierarchy.ids_deepest_first() {
            let mut total = records.get(&node_id).map(|r| r.direct).unwrap_or_default();
            for descendant in hierarchy.descendants(node_id) {
                if let Some(below) = records.get(&descendant) {
                    total.add(&below.direct);
                }
            }
            if let Some(record) = records.get_mut(&node_id) {
                record.recursive = total;
            }
        }

        let count = records.len();
        self.records.replace_all(records);
        self.state.touch();
        info!(categories = count, attachments = attachments.len(), "File stats cache initialized");
        Ok(())
    }

    /// Recompute one category's direct totals from its raw attachments and
    /// push the difference up its ancestor chain
    pub fn refresh_category(
        &self,
        category_id: NodeId,
        attachments: &[AttachmentRow],
    ) -> Result<(), CacheError> {
        if !self.state.is_enabled() {
            return Ok(());
        }
        let mut fresh = FileStats::default();
        for attachment in attachments.iter().filter(|a| a.category_id == category_id) {
            fresh.file_count += 1;
            fresh.total_size = fresh.total_size.saturating_add(attachment.size);
        }
        let current = self
            .records
            .read(category_id, |record| record.direct)
            .unwrap_or_default();
        let size_delta = fresh.total_size as i64 - current.total_size as i64;
        let count_delta = fresh.file_count as i64 - current.file_count as i64;
        self.update_file_stats(category_id, size_delta, count_delta)
    }

    /// Apply signed size and count deltas to a category and its ancestors.
    /// No-op while disabled.
    pub fn update_file_stats(
        &self,
        category_id: NodeId,
        size_delta: i64,
        count_delta: i64,
    ) -> Result<(), CacheError> {
        if !self.state.is_enabled() || (size_delta == 0 && count_delta == 0) {
            return Ok(());
        }
        let hierarchy = self.hierarchy.get()?;
        if !hierarchy.contains(category_id) {
            return Err(CacheError::NodeNotFound(category_id));
        }

        let record = self
            .records
            .get_or_insert_with(category_id, || FileStatsRecord::new(category_id));
        let applied = {
            let mut guard = record.write();
            let applied = guard.direct.apply(size_delta, count_delta);
            guard.recursive.apply(applied.0, applied.1);
            guard.last_update = Utc::now();
            applied
        };

        if applied != (0, 0) {
            for ancestor in hierarchy.ancestors(category_id) {
                self.apply_recursive(ancestor, applied);
            }
        }
        if applied != (size_delta, count_delta) {
            debug!(category_id, size_delta, count_delta, "File stats delta clamped at zero");
        }
        self.state.touch();
        Ok(())
    }

    fn apply_recursive(&self, category_id: NodeId, (size_delta, count_delta): (i64, i64)) {
        let record = self
            .records
            .get_or_insert_with(category_id, || FileStatsRecord::new(category_id));
        let mut guard = record.write();
        guard.recursive.apply(size_delta, count_delta);
        guard.last_update = Utc::now();
    }

    /// Move the subtree's totals from the old chain to the new one
    pub fn handle_hierarchy_change(&self, outcome: &MoveOutcome) -> Result<(), CacheError> {
        if !self.state.is_enabled() || outcome.is_noop() {
            return Ok(());
        }
        let moved = self
            .records
            .read(outcome.node_id, |record| record.recursive)
            .unwrap_or_default();
        if moved.is_empty() {
            return Ok(());
        }
        for ancestor in &outcome.old_chain {
            self.apply_recursive(*ancestor, moved.signed(-1));
        }
        for ancestor in &outcome.new_chain {
            self.apply_recursive(*ancestor, moved.signed(1));
        }
        self.state.touch();
        Ok(())
    }

    pub fn on_category_created(&self, category_id: NodeId) {
        if self.state.is_enabled() {
            self.records
                .get_or_insert_with(category_id, || FileStatsRecord::new(category_id));
        }
    }

    pub fn on_category_deleted(&self, removed: &RemovedSubtree) -> Result<(), CacheError> {
        if self.state.is_enabled() {
            let lost = self
                .records
                .read(removed.root, |record| record.recursive)
                .unwrap_or_default();
            if !lost.is_empty() {
                for ancestor in &removed.ancestors {
                    self.apply_recursive(*ancestor, lost.signed(-1));
                }
            }
        }
        self.records.remove_all(&removed.members);
        self.state.touch();
        Ok(())
    }

    pub fn get_category_file_stats(&self, category_id: NodeId) -> Result<FileStatsRecord, CacheError> {
        self.state.ensure_enabled()?;
        self.records
            .snapshot(category_id)
            .ok_or(CacheError::NodeNotFound(category_id))
    }

    pub fn get_file_stats(&self, request: &FileStatsRequest) -> Result<FileStatsView, CacheError> {
        let record = self.get_category_file_stats(request.category_id)?;
        let stats = if request.recursive {
            record.recursive
        } else {
            record.direct
        };
        Ok(FileStatsView {
            category_id: request.category_id,
            recursive: request.recursive,
            file_count: stats.file_count,
            total_size: stats.total_size,
        })
    }

    /// Sum of every category's direct totals
    pub fn global_totals(&self) -> Result<FileStats, CacheError> {
        self.state.ensure_enabled()?;
        let mut total = FileStats::default();
        for (_, record) in self.records.handles() {
            total.add(&record.read().direct);
        }
        Ok(total)
    }
}
