use canopy::cache::{ActivityRequest, FileStatsRequest};
use canopy::config::CacheConfig;
use canopy::{CacheCoordinator, CacheEvent, CategoryNode};
use chrono::NaiveDate;
use std::collections::HashMap;

use crate::support::{HARDWARE, MAY_FIRST_2024, PROGRAMMING, SOFTWARE, TECHNOLOGY};

fn seeded() -> CacheCoordinator {
    let coordinator = CacheCoordinator::new(&CacheConfig::default());
    let nodes = vec![
        CategoryNode::new(TECHNOLOGY, None, "Technology"),
        CategoryNode::new(SOFTWARE, Some(TECHNOLOGY), "Software"),
        CategoryNode::new(PROGRAMMING, Some(SOFTWARE), "Programming"),
        CategoryNode::new(HARDWARE, Some(TECHNOLOGY), "Hardware"),
    ];
    let counts = HashMap::from([(TECHNOLOGY, 20), (SOFTWARE, 15), (PROGRAMMING, 8), (HARDWARE, 10)]);
    coordinator.initialize_hierarchy(nodes, &counts).unwrap();
    coordinator.prime(&[], &[]).unwrap();
    coordinator
}

#[test]
fn test_moving_a_leaf_rebalances_both_chains() {
    let coordinator = seeded();
    let posts = coordinator.post_counts();
    assert_eq!(posts.get_post_count_recursive(TECHNOLOGY).unwrap(), 53);
    assert_eq!(posts.get_post_count_recursive(SOFTWARE).unwrap(), 23);

    coordinator
        .process_event(&CacheEvent::CategoryMoved {
            node_id: PROGRAMMING,
            old_parent_id: Some(SOFTWARE),
            new_parent_id: Some(HARDWARE),
        })
        .unwrap();

    assert_eq!(posts.get_post_count_recursive(TECHNOLOGY).unwrap(), 53);
    assert_eq!(posts.get_post_count_recursive(SOFTWARE).unwrap(), 15);
    assert_eq!(posts.get_post_count_recursive(HARDWARE).unwrap(), 18);
    assert_eq!(
        coordinator.hierarchy().get(PROGRAMMING).unwrap().parent_id,
        Some(HARDWARE)
    );
    assert_eq!(coordinator.hierarchy().children(SOFTWARE), Vec::<i64>::new());
}

#[test]
fn test_large_upload_reaches_every_ancestor() {
    let coordinator = seeded();
    coordinator
        .process_event(&CacheEvent::FileAdded {
            node_id: PROGRAMMING,
            file_size: 2_048_000,
        })
        .unwrap();

    let files = coordinator.file_stats();
    let leaf = files
        .get_file_stats(&FileStatsRequest::new(PROGRAMMING, false))
        .unwrap();
    assert_eq!((leaf.file_count, leaf.total_size), (1, 2_048_000));
    for ancestor in [SOFTWARE, TECHNOLOGY] {
        let view = files
            .get_file_stats(&FileStatsRequest::new(ancestor, true))
            .unwrap();
        assert_eq!((view.file_count, view.total_size), (1, 2_048_000));
    }
    let sibling = files
        .get_file_stats(&FileStatsRequest::new(HARDWARE, true))
        .unwrap();
    assert_eq!(sibling.total_size, 0);
}

#[test]
fn test_heatmap_follows_post_lifecycle() {
    let coordinator = seeded();
    for offset in 0..3 {
        coordinator
            .process_event(&CacheEvent::PostCreated {
                node_id: PROGRAMMING,
                created_at_ms: MAY_FIRST_2024 + offset * 86_400_000,
            })
            .unwrap();
    }
    coordinator
        .process_event(&CacheEvent::PostDeleted {
            node_id: PROGRAMMING,
            created_at_ms: MAY_FIRST_2024,
        })
        .unwrap();

    let today = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
    let period = coordinator
        .activity()
        .get_activity_period_at(&ActivityRequest::category(TECHNOLOGY).recursive(true), today)
        .unwrap();
    assert_eq!(period.stats.total_posts, 2);
    assert_eq!(period.stats.active_days, 2);
    assert_eq!(
        period.days[0].date,
        NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()
    );

    // Direct view of the ancestor holds none of the descendant's posts
    let direct = coordinator
        .activity()
        .get_activity_period_at(&ActivityRequest::category(TECHNOLOGY), today)
        .unwrap();
    assert!(direct.days.is_empty());

    // The previous window is empty
    let previous = coordinator
        .activity()
        .get_activity_period_at(
            &ActivityRequest::category(TECHNOLOGY).recursive(true).period(1),
            today,
        )
        .unwrap();
    assert_eq!(previous.stats.total_posts, 0);
}

#[test]
fn test_delete_cascades_and_detaches() {
    let coordinator = seeded();
    coordinator
        .process_event(&CacheEvent::PostCreated {
            node_id: PROGRAMMING,
            created_at_ms: MAY_FIRST_2024,
        })
        .unwrap();
    coordinator
        .process_event(&CacheEvent::FileAdded {
            node_id: PROGRAMMING,
            file_size: 512,
        })
        .unwrap();

    coordinator
        .process_event(&CacheEvent::CategoryDeleted { node_id: SOFTWARE })
        .unwrap();

    assert!(!coordinator.hierarchy().contains(PROGRAMMING));
    assert_eq!(
        coordinator
            .post_counts()
            .get_post_count_recursive(TECHNOLOGY)
            .unwrap(),
        30
    );
    let tech_files = coordinator
        .file_stats()
        .get_category_file_stats(TECHNOLOGY)
        .unwrap();
    assert_eq!(tech_files.recursive.total_size, 0);
    let tech_activity = coordinator
        .activity()
        .get_category_activity(TECHNOLOGY)
        .unwrap();
    assert_eq!(tech_activity.stats.recursive_posts, 0);
    assert!(coordinator.verify().is_empty());
}
