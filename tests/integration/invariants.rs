use canopy::source::{CategorySource, MemorySource};
use canopy::{CacheEvent, CategoryNode, NodeId};
use proptest::prelude::*;
use proptest::sample::Index;

use crate::support::{bulk_coordinator, sample_source, DAY_MS, MAY_FIRST_2024, TECHNOLOGY};

#[derive(Debug, Clone)]
enum Op {
    CreatePost { category: Index, day: i64 },
    DeletePost { post: Index },
    MovePost { post: Index, category: Index },
    AddFile { post: Index, size: u64 },
    RemoveFile { attachment: Index },
    CreateCategory { parent: Option<Index> },
    MoveCategory { category: Index, parent: Option<Index> },
    DeleteCategory { category: Index },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (any::<Index>(), 0i64..60).prop_map(|(category, day)| Op::CreatePost { category, day }),
        1 => any::<Index>().prop_map(|post| Op::DeletePost { post }),
        1 => (any::<Index>(), any::<Index>()).prop_map(|(post, category)| Op::MovePost { post, category }),
        2 => (any::<Index>(), 1u64..5_000_000).prop_map(|(post, size)| Op::AddFile { post, size }),
        1 => any::<Index>().prop_map(|attachment| Op::RemoveFile { attachment }),
        1 => proptest::option::of(any::<Index>()).prop_map(|parent| Op::CreateCategory { parent }),
        1 => (any::<Index>(), proptest::option::of(any::<Index>()))
            .prop_map(|(category, parent)| Op::MoveCategory { category, parent }),
        1 => any::<Index>().prop_map(|category| Op::DeleteCategory { category }),
    ]
}

/// Technology tree plus a second root: Life(5) → Travel(6)
fn source_with_two_roots() -> MemorySource {
    let source = sample_source();
    source
        .create_category(CategoryNode::new(5, None, "Life"))
        .unwrap();
    source
        .create_category(CategoryNode::new(6, Some(5), "Travel"))
        .unwrap();
    source
}

fn pick<T: Copy>(items: &[T], index: &Index) -> Option<T> {
    if items.is_empty() {
        None
    } else {
        Some(items[index.index(items.len())])
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_random_event_sequences_keep_aggregates_consistent(
        ops in proptest::collection::vec(op_strategy(), 1..40)
    ) {
        let source = source_with_two_roots();
        let coordinator = bulk_coordinator(&source);
        let mut next_category: NodeId = 100;

        for op in ops {
            let categories: Vec<NodeId> =
                source.load_categories().unwrap().iter().map(|c| c.id).collect();
            let posts: Vec<i64> = source.load_posts().unwrap().iter().map(|p| p.id).collect();
            let attachments: Vec<i64> =
                source.load_attachments().unwrap().iter().map(|a| a.id).collect();

            // Durable write first; rejected writes emit nothing
            let events: Vec<CacheEvent> = match op {
                Op::CreatePost { category, day } => match pick(&categories, &category) {
                    Some(category) => vec![
                        source.create_post(category, MAY_FIRST_2024 + day * DAY_MS).unwrap().1,
                    ],
                    None => vec![],
                },
                Op::DeletePost { post } => match pick(&posts, &post) {
                    Some(post) => source.delete_post(post).unwrap(),
                    None => vec![],
                },
                Op::MovePost { post, category } => {
                    match (pick(&posts, &post), pick(&categories, &category)) {
                        (Some(post), Some(category)) => source.move_post(post, category).unwrap(),
                        _ => vec![],
                    }
                }
                Op::AddFile { post, size } => match pick(&posts, &post) {
                    Some(post) => vec![source.add_attachment(post, size).unwrap().1],
                    None => vec![],
                },
                Op::RemoveFile { attachment } => match pick(&attachments, &attachment) {
                    Some(attachment) => vec![source.remove_attachment(attachment).unwrap()],
                    None => vec![],
                },
                Op::CreateCategory { parent } => {
                    let parent_id = parent.and_then(|p| pick(&categories, &p));
                    let node_id = next_category;
                    next_category += 1;
                    source
                        .create_category(CategoryNode::new(node_id, parent_id, format!("c{}", node_id)))
                        .into_iter()
                        .collect()
                }
                Op::MoveCategory { category, parent } => match pick(&categories, &category) {
                    Some(node_id) => {
                        let new_parent = parent.and_then(|p| pick(&categories, &p));
                        source.move_category(node_id, new_parent).into_iter().collect()
                    }
                    None => vec![],
                },
                Op::DeleteCategory { category } => match pick(&categories, &category) {
                    Some(node_id) => vec![source.delete_category(node_id).unwrap()],
                    None => vec![],
                },
            };
            for event in events {
                coordinator.process_event(&event).unwrap();
            }
        }

        prop_assert!(coordinator.verify().is_empty());

        let total_after = coordinator.post_counts().global_total().unwrap();
        prop_assert_eq!(total_after, source.load_posts().unwrap().len() as u64);

        let bulk = bulk_coordinator(&source);
        prop_assert_eq!(coordinator.hierarchy().ids(), bulk.hierarchy().ids());

        for id in bulk.hierarchy().ids() {
            let a = coordinator.hierarchy().get(id).unwrap();
            let b = bulk.hierarchy().get(id).unwrap();
            prop_assert_eq!(a.recursive_post_count, b.recursive_post_count);
            prop_assert_eq!(a.depth, b.depth);
            prop_assert_eq!(a.parent_id, b.parent_id);
            prop_assert_eq!(
                coordinator.activity().get_category_activity(id).unwrap().recursive,
                bulk.activity().get_category_activity(id).unwrap().recursive
            );
            prop_assert_eq!(
                coordinator.file_stats().get_category_file_stats(id).unwrap().recursive,
                bulk.file_stats().get_category_file_stats(id).unwrap().recursive
            );
        }
    }

    #[test]
    fn test_file_stats_never_negative(
        deltas in proptest::collection::vec((-3_000i64..3_000, -2i64..3), 1..50)
    ) {
        let source = sample_source();
        let coordinator = bulk_coordinator(&source);
        for (size, count) in deltas {
            coordinator
                .file_stats()
                .update_file_stats(3, size, count)
                .unwrap();
            for id in [1, 2, 3, 4] {
                let record = coordinator.file_stats().get_category_file_stats(id).unwrap();
                prop_assert!(record.recursive.total_size >= record.direct.total_size);
                prop_assert!(record.recursive.file_count >= record.direct.file_count);
            }
        }
        prop_assert!(coordinator.verify().is_empty());
    }
}

#[test]
fn test_remove_before_add_clamps_at_zero() {
    let source = sample_source();
    let coordinator = bulk_coordinator(&source);
    coordinator
        .process_event(&CacheEvent::FileRemoved {
            node_id: 3,
            file_size: 1_000,
        })
        .unwrap();
    let tech = coordinator
        .file_stats()
        .get_category_file_stats(TECHNOLOGY)
        .unwrap();
    assert_eq!((tech.recursive.file_count, tech.recursive.total_size), (0, 0));

    coordinator
        .process_event(&CacheEvent::FileAdded {
            node_id: 3,
            file_size: 1_000,
        })
        .unwrap();
    let tech = coordinator
        .file_stats()
        .get_category_file_stats(TECHNOLOGY)
        .unwrap();
    assert_eq!((tech.recursive.file_count, tech.recursive.total_size), (1, 1_000));
}
