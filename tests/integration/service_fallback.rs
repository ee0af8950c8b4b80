use canopy::cache::{ActivityRequest, FileStatsRequest};
use canopy::config::CacheConfig;
use canopy::source::{AttachmentRow, CategorySource, PostCountRow, PostRow};
use canopy::source::MemorySource;
use canopy::{CategoryNode, Metric, SourceError, StatsService};
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::support::{sample_source, HARDWARE, MAY_FIRST_2024, PROGRAMMING, SOFTWARE, TECHNOLOGY};

/// Source whose post listing is broken while everything else works
struct BrokenPosts {
    inner: canopy::source::MemorySource,
}

impl CategorySource for BrokenPosts {
    fn load_categories(&self) -> Result<Vec<CategoryNode>, SourceError> {
        self.inner.load_categories()
    }

    fn load_post_counts(&self) -> Result<Vec<PostCountRow>, SourceError> {
        self.inner.load_post_counts()
    }

    fn load_posts(&self) -> Result<Vec<PostRow>, SourceError> {
        Err(SourceError::Unavailable("posts table locked".to_string()))
    }

    fn load_attachments(&self) -> Result<Vec<AttachmentRow>, SourceError> {
        self.inner.load_attachments()
    }
}

#[test]
fn test_one_failed_cache_does_not_fail_warm_up() {
    let inner = sample_source();
    inner.create_post(PROGRAMMING, MAY_FIRST_2024).unwrap();
    let service = StatsService::new(&CacheConfig::default(), Arc::new(BrokenPosts { inner }));

    let report = service.warm_up();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].metric, Metric::Activity);

    let stats = service.cache_stats();
    assert!(!stats.activity.enabled);
    assert!(stats.post_counts.enabled);
    assert!(stats.file_stats.enabled);
    assert_eq!(service.post_count(TECHNOLOGY, true).unwrap(), 1);

    // Fallback reaches the same broken table
    let today = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
    assert!(service
        .activity_period_at(&ActivityRequest::category(TECHNOLOGY), today)
        .is_err());
}

#[test]
fn test_cache_and_fallback_agree() {
    let source = Arc::new(sample_source());
    let (post, _) = source.create_post(PROGRAMMING, MAY_FIRST_2024).unwrap();
    source.create_post(HARDWARE, MAY_FIRST_2024).unwrap();
    source.add_attachment(post, 2_048_000).unwrap();

    let service = StatsService::new(&CacheConfig::default(), source);
    assert!(service.warm_up().is_clean());

    let today = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
    let request = ActivityRequest::category(TECHNOLOGY).recursive(true);
    let files = FileStatsRequest::new(TECHNOLOGY, true);

    let cached_posts = service.post_count(TECHNOLOGY, true).unwrap();
    let cached_activity = service.activity_period_at(&request, today).unwrap();
    let cached_files = service.file_stats(&files).unwrap();
    let cached_all = service
        .activity_period_at(&ActivityRequest::all_categories(), today)
        .unwrap();

    for metric in [Metric::PostCounts, Metric::Activity, Metric::FileStats] {
        service.set_cache_enabled(metric, false).unwrap();
    }

    assert_eq!(service.post_count(TECHNOLOGY, true).unwrap(), cached_posts);
    assert_eq!(service.activity_period_at(&request, today).unwrap(), cached_activity);
    assert_eq!(service.file_stats(&files).unwrap(), cached_files);
    assert_eq!(
        service
            .activity_period_at(&ActivityRequest::all_categories(), today)
            .unwrap(),
        cached_all
    );
    assert_eq!(cached_files.total_size, 2_048_000);
    assert_eq!(cached_all.stats.total_posts, 2);
}

#[test]
fn test_refresh_category_through_service() {
    let source = Arc::new(sample_source());
    let service = StatsService::new(&CacheConfig::default(), source.clone());
    service.warm_up();

    // Written behind the cache's back
    source.create_post(PROGRAMMING, MAY_FIRST_2024).unwrap();
    assert_eq!(service.post_count(PROGRAMMING, false).unwrap(), 0);

    service.refresh_category(PROGRAMMING).unwrap();
    assert_eq!(service.post_count(TECHNOLOGY, true).unwrap(), 1);
    assert!(service.coordinator().verify().is_empty());
}

type LoadHook = Box<dyn FnOnce() + Send>;
type WriterSlot = Arc<Mutex<Option<JoinHandle<()>>>>;

/// Source that runs a hook after reading its post rows, before returning them
struct WriteDuringLoad {
    inner: Arc<MemorySource>,
    hook: Mutex<Option<LoadHook>>,
}

impl CategorySource for WriteDuringLoad {
    fn load_categories(&self) -> Result<Vec<CategoryNode>, SourceError> {
        self.inner.load_categories()
    }

    fn load_post_counts(&self) -> Result<Vec<PostCountRow>, SourceError> {
        self.inner.load_post_counts()
    }

    fn load_posts(&self) -> Result<Vec<PostRow>, SourceError> {
        let rows = self.inner.load_posts()?;
        let hook = self.hook.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(rows)
    }

    fn load_attachments(&self) -> Result<Vec<AttachmentRow>, SourceError> {
        self.inner.load_attachments()
    }
}

/// Service over a source that starts a concurrent post write in the middle
/// of its next post load
fn racing_service(category_id: i64) -> (Arc<StatsService>, Arc<MemorySource>, WriterSlot) {
    let inner = Arc::new(sample_source());
    inner.create_post(PROGRAMMING, MAY_FIRST_2024).unwrap();
    let source = Arc::new(WriteDuringLoad {
        inner: inner.clone(),
        hook: Mutex::new(None),
    });
    let service = Arc::new(StatsService::new(&CacheConfig::default(), source.clone()));
    assert!(service.warm_up().is_clean());

    let writer: WriterSlot = Arc::new(Mutex::new(None));
    let hook: LoadHook = {
        let service = service.clone();
        let inner = inner.clone();
        let writer = writer.clone();
        Box::new(move || {
            let handle = thread::spawn(move || {
                service
                    .commit(|| {
                        inner
                            .create_post(category_id, MAY_FIRST_2024)
                            .map(|(_, event)| vec![event])
                    })
                    .unwrap();
            });
            *writer.lock() = Some(handle);
            // Give the writer every chance to land before the rebuild
            thread::sleep(Duration::from_millis(50));
        })
    };
    *source.hook.lock() = Some(hook);
    (service, inner, writer)
}

fn join_writer(writer: &WriterSlot) {
    let handle = writer.lock().take().expect("writer started during load");
    handle.join().unwrap();
}

#[test]
fn test_write_during_enable_rebuild_is_not_lost() {
    let (service, inner, writer) = racing_service(TECHNOLOGY);
    service.set_cache_enabled(Metric::Activity, false).unwrap();
    service.set_cache_enabled(Metric::Activity, true).unwrap();
    join_writer(&writer);

    assert_eq!(inner.load_posts().unwrap().len(), 2);
    let tech = service
        .coordinator()
        .activity()
        .get_category_activity(TECHNOLOGY)
        .unwrap();
    assert_eq!(tech.stats.recursive_posts, 2);
    assert_eq!(tech.stats.total_posts, 1);
    assert_eq!(service.post_count(TECHNOLOGY, true).unwrap(), 2);
    assert!(service.coordinator().verify().is_empty());
}

#[test]
fn test_write_during_refresh_is_not_lost_or_doubled() {
    let (service, inner, writer) = racing_service(PROGRAMMING);
    service.refresh_category(PROGRAMMING).unwrap();
    join_writer(&writer);

    assert_eq!(inner.posts_for_category(PROGRAMMING).unwrap().len(), 2);
    assert_eq!(service.post_count(PROGRAMMING, false).unwrap(), 2);
    let programming = service
        .coordinator()
        .activity()
        .get_category_activity(PROGRAMMING)
        .unwrap();
    assert_eq!(programming.stats.total_posts, 2);
    assert_eq!(programming.stats.recursive_posts, 2);
    assert!(service.coordinator().verify().is_empty());
}

#[test]
fn test_commit_rejects_failed_writes_without_dispatch() {
    let source = Arc::new(sample_source());
    let service = StatsService::new(&CacheConfig::default(), source.clone());
    service.warm_up();

    // Cycle: rejected by the write, nothing dispatched
    assert!(service
        .commit(|| source.move_category(TECHNOLOGY, Some(PROGRAMMING)).map(|e| vec![e]))
        .is_err());
    assert_eq!(service.coordinator().hierarchy().parent_of(TECHNOLOGY), None);
    assert_eq!(service.coordinator().hierarchy().parent_of(PROGRAMMING), Some(SOFTWARE));

    let events = service
        .commit(|| source.create_post(HARDWARE, MAY_FIRST_2024).map(|(_, e)| vec![e]))
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(service.post_count(TECHNOLOGY, true).unwrap(), 1);
}
