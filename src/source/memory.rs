//! In-memory persistence stand-in
//!
//! Holds categories, posts and attachments in a [`Snapshot`] that can be
//! loaded from a JSON or TOML dump. Mutations mirror the durable write path:
//! they change the stored rows first, then return the events to emit.

use super::{AttachmentRow, CategorySource, PostCountRow, PostRow};
use crate::config::CacheConfig;
use crate::error::SourceError;
use crate::events::CacheEvent;
use crate::hierarchy::CategoryNode;
use crate::source::subtree_from_rows;
use crate::types::NodeId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// Flat dump of the persistence layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub categories: Vec<CategoryNode>,
    #[serde(default)]
    pub posts: Vec<PostRow>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRow>,
}

impl Snapshot {
    /// Load a snapshot file; `.toml` files are parsed as TOML, anything else as JSON
    pub fn load_from_file(path: &Path) -> Result<Self, SourceError> {
        let content = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);

        if is_toml {
            toml::from_str(&content).map_err(|e| {
                SourceError::InvalidData(format!("{}: {}", path.display(), e))
            })
        } else {
            serde_json::from_str(&content).map_err(|e| {
                SourceError::InvalidData(format!("{}: {}", path.display(), e))
            })
        }
    }

    fn next_post_id(&self) -> i64 {
        self.posts.iter().map(|p| p.id).max().unwrap_or(0) + 1
    }

    fn next_attachment_id(&self) -> i64 {
        self.attachments.iter().map(|a| a.id).max().unwrap_or(0) + 1
    }

    fn category_exists(&self, category_id: NodeId) -> bool {
        self.categories.iter().any(|c| c.id == category_id)
    }

    /// Depth derived from parent links; `None` for unknown or cyclic chains
    fn depth_of(&self, category_id: NodeId) -> Option<u32> {
        let mut depth = 0u32;
        let mut current = self.categories.iter().find(|c| c.id == category_id)?;
        while let Some(parent_id) = current.parent_id {
            depth += 1;
            if depth as usize > self.categories.len() {
                return None;
            }
            current = self.categories.iter().find(|c| c.id == parent_id)?;
        }
        Some(depth)
    }

    /// Levels below `root` in its deepest branch
    fn subtree_height(&self, root: NodeId) -> u32 {
        let root_depth = self.depth_of(root).unwrap_or(0);
        subtree_from_rows(&self.categories, root)
            .into_iter()
            .filter_map(|id| self.depth_of(id))
            .map(|depth| depth.saturating_sub(root_depth))
            .max()
            .unwrap_or(0)
    }
}

/// Thread-safe in-memory [`CategorySource`]
pub struct MemorySource {
    snapshot: RwLock<Snapshot>,
    available: AtomicBool,
    max_depth: u32,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::from_snapshot(Snapshot::default())
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
            available: AtomicBool::new(true),
            max_depth: CacheConfig::default().max_depth,
        }
    }

    /// Deepest depth a write may place a category at (root = 0)
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn load_from_file(path: &Path) -> Result<Self, SourceError> {
        Ok(Self::from_snapshot(Snapshot::load_from_file(path)?))
    }

    /// Clone of the stored rows
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.read().clone()
    }

    /// Simulate an outage: every read fails while unavailable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    fn check_available(&self) -> Result<(), SourceError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(SourceError::Unavailable("memory source marked offline".to_string()))
        }
    }

    pub fn create_category(&self, node: CategoryNode) -> Result<CacheEvent, SourceError> {
        let mut snapshot = self.snapshot.write();
        if snapshot.category_exists(node.id) {
            return Err(SourceError::InvalidData(format!(
                "category {} already exists",
                node.id
            )));
        }
        if let Some(parent_id) = node.parent_id {
            let parent_depth = snapshot.depth_of(parent_id).ok_or_else(|| {
                SourceError::InvalidData(format!("parent category {} does not exist", parent_id))
            })?;
            if parent_depth + 1 > self.max_depth {
                return Err(SourceError::Rejected(format!(
                    "category {} would sit at depth {}, maximum is {}",
                    node.id,
                    parent_depth + 1,
                    self.max_depth
                )));
            }
        }
        snapshot.categories.push(node.clone());
        Ok(CacheEvent::CategoryCreated { node })
    }

    pub fn rename_category(&self, category_id: NodeId, name: &str) -> Result<CacheEvent, SourceError> {
        let mut snapshot = self.snapshot.write();
        let category = snapshot
            .categories
            .iter_mut()
            .find(|c| c.id == category_id)
            .ok_or_else(|| SourceError::InvalidData(format!("unknown category {}", category_id)))?;
        category.name = name.to_string();
        Ok(CacheEvent::CategoryUpdated {
            node_id: category_id,
            name: Some(name.to_string()),
            description: None,
        })
    }

    /// Re-parent a category. Cycles and moves that would push any part of
    /// the subtree past the depth bound are rejected before anything is stored.
    pub fn move_category(
        &self,
        category_id: NodeId,
        new_parent_id: Option<NodeId>,
    ) -> Result<CacheEvent, SourceError> {
        let mut snapshot = self.snapshot.write();
        let old_parent_id = snapshot
            .categories
            .iter()
            .find(|c| c.id == category_id)
            .map(|c| c.parent_id)
            .ok_or_else(|| SourceError::InvalidData(format!("unknown category {}", category_id)))?;

        let new_depth = match new_parent_id {
            Some(parent_id) => {
                if subtree_from_rows(&snapshot.categories, category_id).contains(&parent_id) {
                    return Err(SourceError::Rejected(format!(
                        "moving category {} under {} would create a cycle",
                        category_id, parent_id
                    )));
                }
                snapshot.depth_of(parent_id).ok_or_else(|| {
                    SourceError::InvalidData(format!(
                        "parent category {} does not exist",
                        parent_id
                    ))
                })? + 1
            }
            None => 0,
        };
        let deepest = new_depth + snapshot.subtree_height(category_id);
        if deepest > self.max_depth {
            return Err(SourceError::Rejected(format!(
                "moving category {} would reach depth {}, maximum is {}",
                category_id, deepest, self.max_depth
            )));
        }

        if let Some(category) = snapshot.categories.iter_mut().find(|c| c.id == category_id) {
            category.parent_id = new_parent_id;
        }
        Ok(CacheEvent::CategoryMoved {
            node_id: category_id,
            old_parent_id,
            new_parent_id,
        })
    }

    /// Delete a category together with its subtree, posts and attachments
    pub fn delete_category(&self, category_id: NodeId) -> Result<CacheEvent, SourceError> {
        let mut snapshot = self.snapshot.write();
        if !snapshot.category_exists(category_id) {
            return Err(SourceError::InvalidData(format!("unknown category {}", category_id)));
        }
        let members = subtree_from_rows(&snapshot.categories, category_id);
        snapshot.categories.retain(|c| !members.contains(&c.id));
        snapshot.posts.retain(|p| !members.contains(&p.category_id));
        snapshot.attachments.retain(|a| !members.contains(&a.category_id));
        Ok(CacheEvent::CategoryDeleted { node_id: category_id })
    }

    pub fn create_post(
        &self,
        category_id: NodeId,
        created_at_ms: i64,
    ) -> Result<(i64, CacheEvent), SourceError> {
        let mut snapshot = self.snapshot.write();
        if !snapshot.category_exists(category_id) {
            return Err(SourceError::InvalidData(format!("unknown category {}", category_id)));
        }
        let id = snapshot.next_post_id();
        snapshot.posts.push(PostRow {
            id,
            category_id,
            created_at_ms,
        });
        Ok((
            id,
            CacheEvent::PostCreated {
                node_id: category_id,
                created_at_ms,
            },
        ))
    }

    /// Move a post; its attachments follow it
    pub fn move_post(
        &self,
        post_id: i64,
        new_category_id: NodeId,
    ) -> Result<Vec<CacheEvent>, SourceError> {
        let mut snapshot = self.snapshot.write();
        if !snapshot.category_exists(new_category_id) {
            return Err(SourceError::InvalidData(format!(
                "unknown category {}",
                new_category_id
            )));
        }
        let post = snapshot
            .posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or_else(|| SourceError::InvalidData(format!("unknown post {}", post_id)))?;
        let old_category_id = post.category_id;
        post.category_id = new_category_id;
        let created_at_ms = post.created_at_ms;

        let mut events = vec![CacheEvent::PostMoved {
            old_node_id: old_category_id,
            new_node_id: new_category_id,
            created_at_ms,
        }];
        for attachment in snapshot.attachments.iter_mut().filter(|a| a.post_id == post_id) {
            attachment.category_id = new_category_id;
            events.push(CacheEvent::FileRemoved {
                node_id: old_category_id,
                file_size: attachment.size,
            });
            events.push(CacheEvent::FileAdded {
                node_id: new_category_id,
                file_size: attachment.size,
            });
        }
        Ok(events)
    }

    /// Delete a post and its attachments
    pub fn delete_post(&self, post_id: i64) -> Result<Vec<CacheEvent>, SourceError> {
        let mut snapshot = self.snapshot.write();
        let index = snapshot
            .posts
            .iter()
            .position(|p| p.id == post_id)
            .ok_or_else(|| SourceError::InvalidData(format!("unknown post {}", post_id)))?;
        let post = snapshot.posts.remove(index);

        let mut events = Vec::new();
        snapshot.attachments.retain(|attachment| {
            if attachment.post_id == post_id {
                events.push(CacheEvent::FileRemoved {
                    node_id: attachment.category_id,
                    file_size: attachment.size,
                });
                false
            } else {
                true
            }
        });
        events.push(CacheEvent::PostDeleted {
            node_id: post.category_id,
            created_at_ms: post.created_at_ms,
        });
        Ok(events)
    }

    pub fn add_attachment(&self, post_id: i64, size: u64) -> Result<(i64, CacheEvent), SourceError> {
        let mut snapshot = self.snapshot.write();
        let category_id = snapshot
            .posts
            .iter()
            .find(|p| p.id == post_id)
            .map(|p| p.category_id)
            .ok_or_else(|| SourceError::InvalidData(format!("unknown post {}", post_id)))?;
        let id = snapshot.next_attachment_id();
        snapshot.attachments.push(AttachmentRow {
            id,
            post_id,
            category_id,
            size,
        });
        Ok((
            id,
            CacheEvent::FileAdded {
                node_id: category_id,
                file_size: size,
            },
        ))
    }

    pub fn remove_attachment(&self, attachment_id: i64) -> Result<CacheEvent, SourceError> {
        let mut snapshot = self.snapshot.write();
        let index = snapshot
            .attachments
            .iter()
            .position(|a| a.id == attachment_id)
            .ok_or_else(|| {
                SourceError::InvalidData(format!("unknown attachment {}", attachment_id))
            })?;
        let attachment = snapshot.attachments.remove(index);
        Ok(CacheEvent::FileRemoved {
            node_id: attachment.category_id,
            file_size: attachment.size,
        })
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl CategorySource for MemorySource {
    fn load_categories(&self) -> Result<Vec<CategoryNode>, SourceError> {
        self.check_available()?;
        Ok(self.snapshot.read().categories.clone())
    }

    fn load_post_counts(&self) -> Result<Vec<PostCountRow>, SourceError> {
        self.check_available()?;
        let snapshot = self.snapshot.read();
        let mut counts: HashMap<NodeId, u64> = HashMap::new();
        for post in &snapshot.posts {
            *counts.entry(post.category_id).or_insert(0) += 1;
        }
        let mut rows: Vec<PostCountRow> = counts
            .into_iter()
            .map(|(category_id, count)| PostCountRow { category_id, count })
            .collect();
        rows.sort_by_key(|row| row.category_id);
        Ok(rows)
    }

    fn load_posts(&self) -> Result<Vec<PostRow>, SourceError> {
        self.check_available()?;
        Ok(self.snapshot.read().posts.clone())
    }

    fn load_attachments(&self) -> Result<Vec<AttachmentRow>, SourceError> {
        self.check_available()?;
        Ok(self.snapshot.read().attachments.clone())
    }
}
