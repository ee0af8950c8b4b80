use canopy::source::CategorySource;
use canopy::{CacheCoordinator, CacheEvent, CategoryNode, NodeId};

use crate::support::{
    bulk_coordinator, sample_source, DAY_MS, HARDWARE, MAY_FIRST_2024, PROGRAMMING, SOFTWARE,
    TECHNOLOGY,
};

fn assert_same_aggregates(incremental: &CacheCoordinator, bulk: &CacheCoordinator) {
    let ids = bulk.hierarchy().ids();
    assert_eq!(incremental.hierarchy().ids(), ids);
    for id in ids {
        let a = incremental.hierarchy().get(id).unwrap();
        let b = bulk.hierarchy().get(id).unwrap();
        assert_eq!(a.parent_id, b.parent_id, "parent of {}", id);
        assert_eq!(a.depth, b.depth, "depth of {}", id);
        assert_eq!(a.direct_post_count, b.direct_post_count, "direct posts of {}", id);
        assert_eq!(a.recursive_post_count, b.recursive_post_count, "recursive posts of {}", id);

        let a = incremental.activity().get_category_activity(id).unwrap();
        let b = bulk.activity().get_category_activity(id).unwrap();
        assert_eq!(a.days, b.days, "direct histogram of {}", id);
        assert_eq!(a.recursive, b.recursive, "recursive histogram of {}", id);
        assert_eq!(a.stats, b.stats, "activity counters of {}", id);

        let a = incremental.file_stats().get_category_file_stats(id).unwrap();
        let b = bulk.file_stats().get_category_file_stats(id).unwrap();
        assert_eq!(a.direct, b.direct, "direct files of {}", id);
        assert_eq!(a.recursive, b.recursive, "recursive files of {}", id);
    }
}

fn apply(coordinator: &CacheCoordinator, events: impl IntoIterator<Item = CacheEvent>) {
    for event in events {
        coordinator.process_event(&event).unwrap();
    }
}

#[test]
fn test_event_stream_matches_rebuild() {
    let source = sample_source();
    let incremental = bulk_coordinator(&source);

    let mut posts: Vec<i64> = Vec::new();
    for (i, category) in [PROGRAMMING, PROGRAMMING, SOFTWARE, HARDWARE, TECHNOLOGY]
        .into_iter()
        .enumerate()
    {
        let (id, event) = source
            .create_post(category, MAY_FIRST_2024 + (i as i64 % 2) * DAY_MS)
            .unwrap();
        posts.push(id);
        apply(&incremental, [event]);
    }

    let (_, event) = source.add_attachment(posts[0], 2_048_000).unwrap();
    apply(&incremental, [event]);
    let (attachment, event) = source.add_attachment(posts[3], 100).unwrap();
    apply(&incremental, [event]);

    apply(&incremental, source.move_post(posts[0], HARDWARE).unwrap());
    apply(&incremental, [source.remove_attachment(attachment).unwrap()]);
    apply(&incremental, source.delete_post(posts[1]).unwrap());

    let bulk = bulk_coordinator(&source);
    assert_same_aggregates(&incremental, &bulk);
}

#[test]
fn test_structural_changes_match_rebuild() {
    let source = sample_source();
    let incremental = bulk_coordinator(&source);

    for (i, category) in [PROGRAMMING, SOFTWARE, HARDWARE].into_iter().enumerate() {
        let (post, event) = source
            .create_post(category, MAY_FIRST_2024 + i as i64 * DAY_MS)
            .unwrap();
        apply(&incremental, [event]);
        let (_, event) = source.add_attachment(post, 1_000 * (i as u64 + 1)).unwrap();
        apply(&incremental, [event]);
    }

    let gadgets: NodeId = 5;
    apply(
        &incremental,
        [source
            .create_category(CategoryNode::new(gadgets, Some(TECHNOLOGY), "Gadgets"))
            .unwrap()],
    );
    let (_, event) = source.create_post(gadgets, MAY_FIRST_2024).unwrap();
    apply(&incremental, [event]);

    apply(
        &incremental,
        [source.move_category(PROGRAMMING, Some(HARDWARE)).unwrap()],
    );
    apply(&incremental, [source.rename_category(HARDWARE, "Devices").unwrap()]);
    apply(&incremental, [source.delete_category(SOFTWARE).unwrap()]);

    let bulk = bulk_coordinator(&source);
    assert_same_aggregates(&incremental, &bulk);
    assert_eq!(incremental.hierarchy().get(HARDWARE).unwrap().name, "Devices");
    assert!(incremental.verify().is_empty());
}

#[test]
fn test_refresh_repairs_drift() {
    let source = sample_source();
    let coordinator = bulk_coordinator(&source);

    // Persisted but never announced
    let (post, _) = source.create_post(PROGRAMMING, MAY_FIRST_2024).unwrap();
    source.add_attachment(post, 4_096).unwrap();

    let posts = source.posts_for_category(PROGRAMMING).unwrap();
    let attachments = source.attachments_for_category(PROGRAMMING).unwrap();
    coordinator
        .refresh_category(PROGRAMMING, posts.len() as u64, &posts, &attachments)
        .unwrap();

    let bulk = bulk_coordinator(&source);
    assert_same_aggregates(&coordinator, &bulk);
}
