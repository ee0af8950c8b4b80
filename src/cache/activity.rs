//! Activity Cache
//!
//! Day-bucketed post histograms per category: a direct histogram of the
//! category's own posts and a recursive histogram over its subtree. Feeds the
//! activity heatmap through rolling-window period queries.
//!
//! Buckets are deleted, never stored at zero, so `active_days` always equals
//! the number of keys. Summary counters change only on 0 → positive and
//! positive → 0 bucket transitions.

use super::{CacheSection, CacheState, HierarchySlot};
use crate::concurrency::RecordMap;
use crate::error::CacheError;
use crate::hierarchy::{HierarchyIndex, MoveOutcome, RemovedSubtree};
use crate::source::PostRow;
use crate::types::{apply_delta, day_from_millis, Metric, NodeId};
use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Posts per calendar day (UTC)
pub type DayHistogram = BTreeMap<NaiveDate, u64>;

/// Summary counters kept alongside the histograms
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityStats {
    pub total_posts: u64,
    pub recursive_posts: u64,
    pub active_days: usize,
    pub recursive_active_days: usize,
}

/// Activity for one category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub category_id: NodeId,
    /// Direct histogram
    pub days: DayHistogram,
    /// Subtree histogram (own days included)
    pub recursive: DayHistogram,
    pub stats: ActivityStats,
    pub last_update: DateTime<Utc>,
}

/// Effect of one bucket adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BucketChange {
    applied: i64,
    activated: bool,
    deactivated: bool,
}

fn bump(histogram: &mut DayHistogram, day: NaiveDate, delta: i64) -> BucketChange {
    let before = histogram.get(&day).copied().unwrap_or(0);
    let after = apply_delta(before, delta);
    if after == 0 {
        histogram.remove(&day);
    } else {
        histogram.insert(day, after);
    }
    BucketChange {
        applied: after as i64 - before as i64,
        activated: before == 0 && after > 0,
        deactivated: before > 0 && after == 0,
    }
}

fn adjust_active(count: &mut usize, change: BucketChange) {
    if change.activated {
        *count += 1;
    } else if change.deactivated {
        *count = count.saturating_sub(1);
    }
}

impl ActivityRecord {
    pub fn new(category_id: NodeId) -> Self {
        Self {
            category_id,
            days: DayHistogram::new(),
            recursive: DayHistogram::new(),
            stats: ActivityStats::default(),
            last_update: Utc::now(),
        }
    }

    fn bump_direct(&mut self, day: NaiveDate, delta: i64) -> i64 {
        let change = bump(&mut self.days, day, delta);
        self.stats.total_posts = apply_delta(self.stats.total_posts, change.applied);
        adjust_active(&mut self.stats.active_days, change);
        change.applied
    }

    fn bump_recursive(&mut self, day: NaiveDate, delta: i64) {
        let change = bump(&mut self.recursive, day, delta);
        self.stats.recursive_posts = apply_delta(self.stats.recursive_posts, change.applied);
        adjust_active(&mut self.stats.recursive_active_days, change);
    }

    /// Full recount; bulk paths only
    fn recount(&mut self) {
        self.stats = ActivityStats {
            total_posts: self.days.values().sum(),
            recursive_posts: self.recursive.values().sum(),
            active_days: self.days.len(),
            recursive_active_days: self.recursive.len(),
        };
    }
}

/// What a period query aggregates over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ActivityTarget {
    Category(NodeId),
    /// Every category's direct histogram merged at query time
    AllCategories,
}

/// Heatmap query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRequest {
    pub target: ActivityTarget,
    #[serde(default)]
    pub recursive: bool,
    /// 0 = current window, p > 0 = p windows back
    #[serde(default)]
    pub period: u32,
    /// Window length; the cache default applies when absent
    #[serde(default)]
    pub period_months: Option<u32>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl ActivityRequest {
    pub fn category(category_id: NodeId) -> Self {
        Self {
            target: ActivityTarget::Category(category_id),
            recursive: false,
            period: 0,
            period_months: None,
            start_date: None,
            end_date: None,
        }
    }

    pub fn all_categories() -> Self {
        Self {
            target: ActivityTarget::AllCategories,
            ..Self::category(0)
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn period(mut self, period: u32) -> Self {
        self.period = period;
        self
    }

    pub fn months(mut self, months: u32) -> Self {
        self.period_months = Some(months);
        self
    }

    pub fn between(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayActivity {
    pub date: NaiveDate,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodStats {
    /// Posts inside the window
    pub total_posts: u64,
    /// Days with at least one post inside the window
    pub active_days: usize,
    pub max_day_activity: u64,
}

/// Heatmap answer: non-empty days inside the window, ascending
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityPeriod {
    pub target: ActivityTarget,
    pub recursive: bool,
    pub days: Vec<DayActivity>,
    pub stats: PeriodStats,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

impl ActivityPeriod {
    /// Build a period answer from any histogram
    pub fn from_histogram(
        target: ActivityTarget,
        recursive: bool,
        histogram: &DayHistogram,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Self {
        let days: Vec<DayActivity> = histogram
            .range(period_start..=period_end)
            .filter(|(_, count)| **count > 0)
            .map(|(date, count)| DayActivity {
                date: *date,
                count: *count,
            })
            .collect();
        let stats = PeriodStats {
            total_posts: days.iter().map(|d| d.count).sum(),
            active_days: days.len(),
            max_day_activity: days.iter().map(|d| d.count).max().unwrap_or(0),
        };
        Self {
            target,
            recursive,
            days,
            stats,
            period_start,
            period_end,
        }
    }
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Window bounds for a period query.
///
/// Period 0 runs from the first of the month `months` months before `today`
/// through `today`; period `p` shifts both bounds back by `p * months`
/// months. Explicit dates override either bound.
pub fn period_bounds(
    today: NaiveDate,
    period: u32,
    months: u32,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> Result<(NaiveDate, NaiveDate), CacheError> {
    if months == 0 {
        return Err(CacheError::InvalidPeriod("period length must be at least one month".into()));
    }
    let out_of_range = || CacheError::InvalidPeriod(format!("period {} is out of range", period));

    let current_start = today
        .checked_sub_months(Months::new(months))
        .map(first_of_month)
        .ok_or_else(out_of_range)?;
    let shift = Months::new(period.checked_mul(months).ok_or_else(out_of_range)?);
    let computed_start = current_start.checked_sub_months(shift).ok_or_else(out_of_range)?;
    let computed_end = today.checked_sub_months(shift).ok_or_else(out_of_range)?;

    let start = start_date.unwrap_or(computed_start);
    let end = end_date.unwrap_or(computed_end);
    if start > end {
        return Err(CacheError::InvalidPeriod(format!(
            "start {} is after end {}",
            start, end
        )));
    }
    Ok((start, end))
}

/// Build a direct histogram from raw posts
pub fn histogram_from_posts<'a>(posts: impl IntoIterator<Item = &'a PostRow>) -> DayHistogram {
    let mut days = DayHistogram::new();
    for post in posts {
        match day_from_millis(post.created_at_ms) {
            Some(day) => *days.entry(day).or_insert(0) += 1,
            None => warn!(post_id = post.id, ts = post.created_at_ms, "Skipping post with invalid timestamp"),
        }
    }
    days
}

pub struct ActivityCache {
    hierarchy: HierarchySlot,
    records: RecordMap<ActivityRecord>,
    state: CacheState,
    period_months: u32,
}

impl ActivityCache {
    pub fn new(enabled: bool, period_months: u32) -> Self {
        Self {
            hierarchy: HierarchySlot::default(),
            records: RecordMap::new(),
            state: CacheState::new(Metric::Activity, enabled),
            period_months,
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
        info!(enabled, "Activity cache toggled");
    }

    pub fn period_months(&self) -> u32 {
        self.period_months
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

    /// Bulk rebuild from every raw post.
    ///
    /// Each recursive histogram is the node's own days merged with every
    /// descendant's direct days, processed deepest first.
    pub fn initialize(&self, posts: &[PostRow]) -> Result<(), CacheError> {
        let hierarchy = self.hierarchy.get()?;
        let mut by_category: HashMap<NodeId, Vec<&PostRow>> = HashMap::new();
        for post in posts {
            by_category.entry(post.category_id).or_default().push(post);
        }

        let mut records: HashMap<NodeId, ActivityRecord> = HashMap::new();
        for node_id in hierarchy.ids() {
            let mut record = ActivityRecord::new(node_id);
            if let Some(own) = by_category.remove(&node_id) {
                record.days = histogram_from_posts(own);
            }
            records.insert(node_id, record);
        }
        for (category_id, orphaned) in &by_category {
            warn!(category_id, posts = orphaned.len(), "Posts reference an unknown category");
        }

        for node_id in hierarchy.ids_deepest_first() {
            let mut merged = records
                .get(&node_id)
                .map(|r| r.days.clone())
                .unwrap_or_default();
            for descendant in hierarchy.descendants(node_id) {
                if let Some(below) = records.get(&descendant) {
                    for (day, count) in &below.days {
                        *merged.entry(*day).or_insert(0) += count;
                    }
                }
            }
            if let Some(record) = records.get_mut(&node_id) {
                record.recursive = merged;
                record.recount();
            }
        }

        let count = records.len();
        self.records.replace_all(records);
        self.state.touch();
        info!(categories = count, posts = posts.len(), "Activity cache initialized");
        Ok(())
    }

    /// Rebuild one category's direct histogram from its raw posts and push
    /// the per-day difference up its ancestor chain
    pub fn refresh_category(&self, category_id: NodeId, posts: &[PostRow]) -> Result<(), CacheError> {
        if !self.state.is_enabled() {
            return Ok(());
        }
        let hierarchy = self.hierarchy.get()?;
        if !hierarchy.contains(category_id) {
            return Err(CacheError::NodeNotFound(category_id));
        }

        let fresh = histogram_from_posts(posts.iter().filter(|p| p.category_id == category_id));
        let record = self
            .records
            .get_or_insert_with(category_id, || ActivityRecord::new(category_id));

        let diff: Vec<(NaiveDate, i64)> = {
            let mut guard = record.write();
            let mut diff = Vec::new();
            for (day, count) in &fresh {
                let before = guard.days.get(day).copied().unwrap_or(0);
                if *count != before {
                    diff.push((*day, *count as i64 - before as i64));
                }
            }
            for (day, before) in &guard.days {
                if !fresh.contains_key(day) {
                    diff.push((*day, -(*before as i64)));
                }
            }
            guard.days = fresh;
            guard.stats.total_posts = guard.days.values().sum();
            guard.stats.active_days = guard.days.len();
            for (day, delta) in &diff {
                guard.bump_recursive(*day, *delta);
            }
            guard.last_update = Utc::now();
            diff
        };

        if !diff.is_empty() {
            for ancestor in hierarchy.ancestors(category_id) {
                self.apply_recursive(ancestor, &diff);
            }
        }
        self.state.touch();
        debug!(category_id, changed_days = diff.len(), "Activity refreshed for category");
        Ok(())
    }

    /// Record `delta` posts on the day of `timestamp_ms` for a category and
    /// its ancestors. No-op while disabled.
    pub fn update_post_activity(
        &self,
        category_id: NodeId,
        timestamp_ms: i64,
        delta: i64,
    ) -> Result<(), CacheError> {
        if !self.state.is_enabled() || delta == 0 {
            return Ok(());
        }
        let hierarchy = self.hierarchy.get()?;
        if !hierarchy.contains(category_id) {
            return Err(CacheError::NodeNotFound(category_id));
        }
        let day = day_from_millis(timestamp_ms).ok_or(CacheError::InvalidTimestamp(timestamp_ms))?;

        let record = self
            .records
            .get_or_insert_with(category_id, || ActivityRecord::new(category_id));
        let applied = {
            let mut guard = record.write();
            let applied = guard.bump_direct(day, delta);
            guard.bump_recursive(day, applied);
            guard.last_update = Utc::now();
            applied
        };

        if applied != 0 {
            let diff = [(day, applied)];
            for ancestor in hierarchy.ancestors(category_id) {
                self.apply_recursive(ancestor, &diff);
            }
        }
        if applied != delta {
            debug!(category_id, %day, delta, applied, "Activity delta clamped at zero");
        }
        self.state.touch();
        Ok(())
    }

    /// Apply per-day deltas to one record's recursive histogram
    fn apply_recursive(&self, category_id: NodeId, diff: &[(NaiveDate, i64)]) {
        let record = self
            .records
            .get_or_insert_with(category_id, || ActivityRecord::new(category_id));
        let mut guard = record.write();
        for (day, delta) in diff {
            guard.bump_recursive(*day, *delta);
        }
        guard.last_update = Utc::now();
    }

    fn recursive_as_diff(&self, category_id: NodeId, sign: i64) -> Vec<(NaiveDate, i64)> {
        self.records
            .read(category_id, |record| {
                record
                    .recursive
                    .iter()
                    .map(|(day, count)| (*day, sign * *count as i64))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Move the moved subtree's histogram from the old chain to the new one
    pub fn handle_hierarchy_change(&self, outcome: &MoveOutcome) -> Result<(), CacheError> {
        if !self.state.is_enabled() || outcome.is_noop() {
            return Ok(());
        }
        let removal = self.recursive_as_diff(outcome.node_id, -1);
        if removal.is_empty() {
            return Ok(());
        }
        let addition: Vec<(NaiveDate, i64)> =
            removal.iter().map(|(day, delta)| (*day, -delta)).collect();
        for ancestor in &outcome.old_chain {
            self.apply_recursive(*ancestor, &removal);
        }
        for ancestor in &outcome.new_chain {
            self.apply_recursive(*ancestor, &addition);
        }
        self.state.touch();
        Ok(())
    }

    pub fn on_category_created(&self, category_id: NodeId) {
        if self.state.is_enabled() {
            self.records
                .get_or_insert_with(category_id, || ActivityRecord::new(category_id));
        }
    }

    /// Detach a removed subtree from its surviving ancestors and drop its records
    pub fn on_category_deleted(&self, removed: &RemovedSubtree) -> Result<(), CacheError> {
        if self.state.is_enabled() {
            let removal = self.recursive_as_diff(removed.root, -1);
            if !removal.is_empty() {
                for ancestor in &removed.ancestors {
                    self.apply_recursive(*ancestor, &removal);
                }
            }
        }
        self.records.remove_all(&removed.members);
        self.state.touch();
        Ok(())
    }

    pub fn get_category_activity(&self, category_id: NodeId) -> Result<ActivityRecord, CacheError> {
        self.state.ensure_enabled()?;
        self.records
            .snapshot(category_id)
            .ok_or(CacheError::NodeNotFound(category_id))
    }

    /// Sum of every category's direct histogram
    pub fn merged_direct_histogram(&self) -> DayHistogram {
        let mut merged = DayHistogram::new();
        for (_, record) in self.records.handles() {
            let guard = record.read();
            for (day, count) in &guard.days {
                *merged.entry(*day).or_insert(0) += count;
            }
        }
        merged
    }

    pub fn get_activity_period(&self, request: &ActivityRequest) -> Result<ActivityPeriod, CacheError> {
        self.get_activity_period_at(request, Utc::now().date_naive())
    }

    /// Period query evaluated as if `today` were the current date
    pub fn get_activity_period_at(
        &self,
        request: &ActivityRequest,
        today: NaiveDate,
    ) -> Result<ActivityPeriod, CacheError> {
        self.state.ensure_enabled()?;
        let months = request.period_months.unwrap_or(self.period_months);
        let (start, end) =
            period_bounds(today, request.period, months, request.start_date, request.end_date)?;

        match request.target {
            ActivityTarget::AllCategories => {
                let merged = self.merged_direct_histogram();
                Ok(ActivityPeriod::from_histogram(
                    request.target,
                    request.recursive,
                    &merged,
                    start,
                    end,
                ))
            }
            ActivityTarget::Category(category_id) => self
                .records
                .read(category_id, |record| {
                    let histogram = if request.recursive {
                        &record.recursive
                    } else {
                        &record.days
                    };
                    ActivityPeriod::from_histogram(
                        request.target,
                        request.recursive,
                        histogram,
                        start,
                        end,
                    )
                })
                .ok_or(CacheError::NodeNotFound(category_id)),
        }
    }
}
