use canopy::config::CacheConfig;
use canopy::source::{post_count_map, CategorySource, MemorySource};
use canopy::{CacheCoordinator, CategoryNode, NodeId};

pub const TECHNOLOGY: NodeId = 1;
pub const SOFTWARE: NodeId = 2;
pub const PROGRAMMING: NodeId = 3;
pub const HARDWARE: NodeId = 4;

/// 2024-05-01T12:00:00Z
pub const MAY_FIRST_2024: i64 = 1_714_564_800_000;
pub const DAY_MS: i64 = 86_400_000;

/// Technology → {Software → Programming, Hardware}
pub fn sample_source() -> MemorySource {
    let source = MemorySource::new();
    source
        .create_category(CategoryNode::new(TECHNOLOGY, None, "Technology"))
        .unwrap();
    source
        .create_category(CategoryNode::new(SOFTWARE, Some(TECHNOLOGY), "Software"))
        .unwrap();
    source
        .create_category(CategoryNode::new(PROGRAMMING, Some(SOFTWARE), "Programming"))
        .unwrap();
    source
        .create_category(CategoryNode::new(HARDWARE, Some(TECHNOLOGY), "Hardware"))
        .unwrap();
    source
}

/// Coordinator built from scratch out of the source's current contents
pub fn bulk_coordinator(source: &MemorySource) -> CacheCoordinator {
    let coordinator = CacheCoordinator::new(&CacheConfig::default());
    let counts = post_count_map(&source.load_post_counts().unwrap());
    coordinator
        .initialize_hierarchy(source.load_categories().unwrap(), &counts)
        .unwrap();
    coordinator
        .prime(
            &source.load_posts().unwrap(),
            &source.load_attachments().unwrap(),
        )
        .unwrap();
    coordinator
}
