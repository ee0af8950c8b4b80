//! Aggregate caches
//!
//! Each cache keeps a direct and a recursive value per category for one
//! metric, maintained incrementally by ancestor walks over the
//! [`HierarchyIndex`](crate::hierarchy::HierarchyIndex).

pub mod activity;
pub mod file_stats;
pub mod post_count;

pub use activity::{
    ActivityCache, ActivityPeriod, ActivityRecord, ActivityRequest, ActivityStats, ActivityTarget,
    DayActivity, PeriodStats,
};
pub use file_stats::{FileStats, FileStatsCache, FileStatsRecord, FileStatsRequest, FileStatsView};
pub use post_count::PostCountCache;

use crate::error::CacheError;
use crate::hierarchy::HierarchyIndex;
use crate::types::Metric;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Introspection for one cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSection {
    pub metric: Metric,
    pub enabled: bool,
    pub records: usize,
    pub last_update: Option<DateTime<Utc>>,
}

/// Hierarchy index attached to a cache after construction
#[derive(Default)]
pub(crate) struct HierarchySlot {
    index: RwLock<Option<Arc<HierarchyIndex>>>,
}

impl HierarchySlot {
    pub(crate) fn set(&self, index: Arc<HierarchyIndex>) {
        *self.index.write() = Some(index);
    }

    pub(crate) fn get(&self) -> Result<Arc<HierarchyIndex>, CacheError> {
        self.index.read().clone().ok_or(CacheError::HierarchyNotSet)
    }
}

/// Enablement flag and last-update stamp shared by every cache
pub(crate) struct CacheState {
    metric: Metric,
    enabled: AtomicBool,
    last_update: RwLock<Option<DateTime<Utc>>>,
}

impl CacheState {
    pub(crate) fn new(metric: Metric, enabled: bool) -> Self {
        Self {
            metric,
            enabled: AtomicBool::new(enabled),
            last_update: RwLock::new(None),
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Reads against a disabled cache are misses
    pub(crate) fn ensure_enabled(&self) -> Result<(), CacheError> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(CacheError::CacheDisabled(self.metric))
        }
    }

    pub(crate) fn touch(&self) {
        *self.last_update.write() = Some(Utc::now());
    }

    pub(crate) fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.last_update.read()
    }

    pub(crate) fn section(&self, records: usize) -> CacheSection {
        CacheSection {
            metric: self.metric,
            enabled: self.is_enabled(),
            records,
            last_update: self.last_update(),
        }
    }
}
