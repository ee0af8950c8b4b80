//! Stats Service
//!
//! Cache-aside front for the coordinator. Warms every cache from a
//! [`CategorySource`], keeps toggles and refreshes consistent with it, and
//! answers reads from the caches, falling back to the source on a miss.
//!
//! Every load that feeds a rebuild runs inside the coordinator's exclusive
//! section, so no committed write can slip between the load and the rebuilt
//! cache going live.

use crate::cache::activity::{histogram_from_posts, period_bounds};
use crate::cache::{ActivityPeriod, ActivityRequest, ActivityTarget, FileStatsRequest, FileStatsView};
use crate::config::CacheConfig;
use crate::coordinator::{CacheCoordinator, CacheStats};
use crate::error::{CacheError, SourceError};
use crate::events::CacheEvent;
use crate::source::{post_count_map, subtree_from_rows, CategorySource};
use crate::types::{Metric, NodeId};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of [`StatsService::warm_up`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupReport {
    pub nodes: usize,
    pub posts: usize,
    pub attachments: usize,
    /// Caches disabled because their warm-up failed
    pub failures: Vec<WarmupFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupFailure {
    pub metric: Metric,
    pub reason: String,
}

impl WarmupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, metric: Metric, err: &CacheError) {
        error!(%metric, error = %err, "Cache warm-up failed, disabling cache");
        self.failures.push(WarmupFailure {
            metric,
            reason: err.to_string(),
        });
    }
}

pub struct StatsService {
    coordinator: Arc<CacheCoordinator>,
    source: Arc<dyn CategorySource>,
    period_months: u32,
}

impl StatsService {
    pub fn new(config: &CacheConfig, source: Arc<dyn CategorySource>) -> Self {
        Self {
            coordinator: Arc::new(CacheCoordinator::new(config)),
            source,
            period_months: config.activity_period_months,
        }
    }

    pub fn coordinator(&self) -> &Arc<CacheCoordinator> {
        &self.coordinator
    }

    pub fn source(&self) -> &Arc<dyn CategorySource> {
        &self.source
    }

    /// Build every cache from the source.
    ///
    /// A cache whose build fails is disabled and reported; reads against it
    /// fall back to the source. A failed hierarchy build disables all three.
    pub fn warm_up(&self) -> WarmupReport {
        let report = self.coordinator.exclusive(|| self.warm_up_exclusive());
        info!(
            nodes = report.nodes,
            posts = report.posts,
            attachments = report.attachments,
            failures = report.failures.len(),
            "Warm-up complete"
        );
        report
    }

    fn warm_up_exclusive(&self) -> WarmupReport {
        let mut report = WarmupReport::default();

        if let Err(err) = self.warm_hierarchy(&mut report) {
            for metric in [Metric::PostCounts, Metric::Activity, Metric::FileStats] {
                self.disable(metric);
                report.fail(metric, &err);
            }
            return report;
        }

        if self.coordinator.activity().is_enabled() {
            match self.rebuild_activity() {
                Ok(posts) => report.posts = posts,
                Err(err) => {
                    self.disable(Metric::Activity);
                    report.fail(Metric::Activity, &err);
                }
            }
        }

        if self.coordinator.file_stats().is_enabled() {
            match self.rebuild_file_stats() {
                Ok(attachments) => report.attachments = attachments,
                Err(err) => {
                    self.disable(Metric::FileStats);
                    report.fail(Metric::FileStats, &err);
                }
            }
        }
        report
    }

    fn warm_hierarchy(&self, report: &mut WarmupReport) -> Result<(), CacheError> {
        let categories = self.source.load_categories()?;
        let counts = post_count_map(&self.source.load_post_counts()?);
        report.nodes = categories.len();
        self.coordinator.build_hierarchy(categories, &counts)
    }

    fn rebuild_post_counts(&self) -> Result<(), CacheError> {
        let counts = post_count_map(&self.source.load_post_counts()?);
        self.coordinator.post_counts().rebuild(&counts)
    }

    fn rebuild_activity(&self) -> Result<usize, CacheError> {
        let posts = self.source.load_posts()?;
        self.coordinator.activity().initialize(&posts)?;
        Ok(posts.len())
    }

    fn rebuild_file_stats(&self) -> Result<usize, CacheError> {
        let attachments = self.source.load_attachments()?;
        self.coordinator.file_stats().initialize(&attachments)?;
        Ok(attachments.len())
    }

    fn disable(&self, metric: Metric) {
        match metric {
            Metric::PostCounts => self.coordinator.post_counts().set_enabled(false),
            Metric::Activity => self.coordinator.activity().set_enabled(false),
            Metric::FileStats => self.coordinator.file_stats().set_enabled(false),
        }
    }

    /// Toggle one cache at runtime.
    ///
    /// Enabling rebuilds it from the source so anything missed while disabled
    /// is recovered. The cache only starts serving once the rebuild is live;
    /// a failed rebuild leaves it disabled.
    pub fn set_cache_enabled(&self, metric: Metric, enabled: bool) -> Result<(), CacheError> {
        if !enabled {
            self.disable(metric);
            info!(%metric, "Cache disabled");
            return Ok(());
        }
        self.coordinator.exclusive(|| -> Result<(), CacheError> {
            match metric {
                Metric::PostCounts => {
                    self.rebuild_post_counts()?;
                    self.coordinator.post_counts().set_enabled(true);
                }
                Metric::Activity => {
                    self.rebuild_activity()?;
                    self.coordinator.activity().set_enabled(true);
                }
                Metric::FileStats => {
                    self.rebuild_file_stats()?;
                    self.coordinator.file_stats().set_enabled(true);
                }
            }
            info!(%metric, "Cache enabled and rebuilt");
            Ok(())
        })
    }

    /// Apply an event whose durable write already happened.
    ///
    /// Prefer [`StatsService::commit`]: an event dispatched here may race a
    /// concurrent rebuild that already saw its write.
    pub fn process_event(&self, event: &CacheEvent) -> Result<(), CacheError> {
        self.coordinator.process_event(event).map_err(|err| {
            warn!(kind = event.kind(), node_id = event.node_id(), error = %err, "Cache event rejected");
            err
        })
    }

    /// Run a durable write and apply the events it returns, ordered against
    /// warm-up, re-enables and refreshes
    pub fn commit<F>(&self, write: F) -> Result<Vec<CacheEvent>, CacheError>
    where
        F: FnOnce() -> Result<Vec<CacheEvent>, SourceError>,
    {
        self.coordinator.commit(write).map_err(|err| {
            warn!(error = %err, "Commit failed");
            err
        })
    }

    /// Manual refresh of one category's direct values from the source
    pub fn refresh_category(&self, category_id: NodeId) -> Result<(), CacheError> {
        self.coordinator.exclusive(|| -> Result<(), CacheError> {
            let direct_posts = post_count_map(&self.source.load_post_counts()?)
                .get(&category_id)
                .copied()
                .unwrap_or(0);
            let posts = self.source.posts_for_category(category_id)?;
            let attachments = self.source.attachments_for_category(category_id)?;
            self.coordinator
                .apply_refresh(category_id, direct_posts, &posts, &attachments)
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.coordinator.cache_stats()
    }

    /// Direct or recursive post count, cache first
    pub fn post_count(&self, category_id: NodeId, recursive: bool) -> Result<u64, CacheError> {
        let cache = self.coordinator.post_counts();
        let cached = if recursive {
            cache.get_post_count_recursive(category_id)
        } else {
            cache.get_post_count(category_id)
        };
        match cached {
            Err(err) if err.is_miss() => {
                warn!(category_id, reason = %err, "Post count cache miss, reading source");
                self.post_count_from_source(category_id, recursive)
            }
            other => other,
        }
    }

    fn post_count_from_source(&self, category_id: NodeId, recursive: bool) -> Result<u64, CacheError> {
        let categories = self.source.load_categories()?;
        if !categories.iter().any(|c| c.id == category_id) {
            return Err(CacheError::NodeNotFound(category_id));
        }
        let counts = post_count_map(&self.source.load_post_counts()?);
        let members = if recursive {
            subtree_from_rows(&categories, category_id)
        } else {
            vec![category_id]
        };
        Ok(members
            .iter()
            .map(|id| counts.get(id).copied().unwrap_or(0))
            .sum())
    }

    pub fn activity_period(&self, request: &ActivityRequest) -> Result<ActivityPeriod, CacheError> {
        self.activity_period_at(request, Utc::now().date_naive())
    }

    /// Heatmap query evaluated as if `today` were the current date
    pub fn activity_period_at(
        &self,
        request: &ActivityRequest,
        today: NaiveDate,
    ) -> Result<ActivityPeriod, CacheError> {
        match self.coordinator.activity().get_activity_period_at(request, today) {
            Err(err) if err.is_miss() => {
                warn!(target_node = ?request.target, reason = %err, "Activity cache miss, reading source");
                self.activity_from_source(request, today)
            }
            other => other,
        }
    }

    fn activity_from_source(
        &self,
        request: &ActivityRequest,
        today: NaiveDate,
    ) -> Result<ActivityPeriod, CacheError> {
        let months = request.period_months.unwrap_or(self.period_months);
        let (start, end) =
            period_bounds(today, request.period, months, request.start_date, request.end_date)?;
        let posts = self.source.load_posts()?;

        let histogram = match request.target {
            ActivityTarget::AllCategories => histogram_from_posts(&posts),
            ActivityTarget::Category(category_id) => {
                let categories = self.source.load_categories()?;
                if !categories.iter().any(|c| c.id == category_id) {
                    return Err(CacheError::NodeNotFound(category_id));
                }
                let members = if request.recursive {
                    subtree_from_rows(&categories, category_id)
                } else {
                    vec![category_id]
                };
                histogram_from_posts(posts.iter().filter(|p| members.contains(&p.category_id)))
            }
        };
        Ok(ActivityPeriod::from_histogram(
            request.target,
            request.recursive,
            &histogram,
            start,
            end,
        ))
    }

    pub fn file_stats(&self, request: &FileStatsRequest) -> Result<FileStatsView, CacheError> {
        match self.coordinator.file_stats().get_file_stats(request) {
            Err(err) if err.is_miss() => {
                warn!(category_id = request.category_id, reason = %err, "File stats cache miss, reading source");
                self.file_stats_from_source(request)
            }
            other => other,
        }
    }

    fn file_stats_from_source(&self, request: &FileStatsRequest) -> Result<FileStatsView, CacheError> {
        let categories = self.source.load_categories()?;
        if !categories.iter().any(|c| c.id == request.category_id) {
            return Err(CacheError::NodeNotFound(request.category_id));
        }
        let members = if request.recursive {
            subtree_from_rows(&categories, request.category_id)
        } else {
            vec![request.category_id]
        };
        let mut view = FileStatsView {
            category_id: request.category_id,
            recursive: request.recursive,
            file_count: 0,
            total_size: 0,
        };
        for attachment in self.source.load_attachments()? {
            if members.contains(&attachment.category_id) {
                view.file_count += 1;
                view.total_size = view.total_size.saturating_add(attachment.size);
            }
        }
        Ok(view)
    }
}
