//! # Core Data Model
//!
//! Entities shared by every layer of the collaboration engine:
//! - Todo lists, items, and list membership
//! - The per-list cache entry mirrored across L1 and L2
//! - Tombstones for soft-deleted items
//!
//! Everything here is plain data: no I/O, no locking. The wire protocol,
//! the shared store, and the durable store all serialize these types with
//! serde, so field names are the canonical lower_snake_case wire names.

mod rev;

pub use rev::Rev;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Opaque list identifier.
pub type ListId = Uuid;

/// Opaque item identifier.
pub type ItemId = Uuid;

/// User identifier as issued by the auth service (JWT `sub`).
pub type UserId = String;

/// Per-connection session identifier, unique within a process.
pub type SessionId = Uuid;

/// Progress state of a single todo item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Not yet started
    NotStarted,
    /// Currently being worked on
    InProgress,
    /// Finished
    Completed,
}

impl Default for ItemStatus {
    fn default() -> Self {
        Self::NotStarted
    }
}

impl ItemStatus {
    /// The wire and database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::NotStarted => "not_started",
            ItemStatus::InProgress => "in_progress",
            ItemStatus::Completed => "completed",
        }
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(ItemStatus::NotStarted),
            "in_progress" => Ok(ItemStatus::InProgress),
            "completed" => Ok(ItemStatus::Completed),
            other => Err(format!("unknown item status: {other:?}")),
        }
    }
}

/// A single todo item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    /// Globally unique item id
    pub item_id: ItemId,
    /// Back-reference to the owning list
    pub list_id: ListId,
    /// User-facing name
    pub name: String,
    /// Optional free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional due instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    /// Progress state
    pub status: ItemStatus,
    /// Completion flag, kept consistent with `status == completed`
    pub done: bool,
    /// Optional media attachment URL (storage itself is out of scope)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// Soft-delete flag
    #[serde(default)]
    pub is_deleted: bool,
    /// Creation instant
    pub created_at: DateTime<Utc>,
    /// Last mutation instant
    pub updated_at: DateTime<Utc>,
}

impl TodoItem {
    /// Create a fresh item in its initial state.
    pub fn new(list_id: ListId, name: String, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            item_id: Uuid::new_v4(),
            list_id,
            name,
            description,
            due_date: None,
            status: ItemStatus::NotStarted,
            done: false,
            media_url: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A todo list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoList {
    /// Globally unique list id
    pub list_id: ListId,
    /// User-facing name
    pub list_name: String,
    /// The user who created the list
    pub owner_id: UserId,
    /// Soft-delete flag
    #[serde(default)]
    pub is_deleted: bool,
    /// Creation instant
    pub created_at: DateTime<Utc>,
    /// Last mutation instant
    pub updated_at: DateTime<Utc>,
}

/// Membership role on a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Creator; may read, write, and share
    Owner,
    /// May read and write
    Editor,
    /// May only read
    Viewer,
}

impl Role {
    /// The wire and database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "editor" => Ok(Role::Editor),
            "viewer" => Ok(Role::Viewer),
            other => Err(format!("unknown role: {other:?}")),
        }
    }
}

/// A `(list, user)` membership row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub list_id: ListId,
    pub user_id: UserId,
    pub role: Role,
}

/// Marker value left in the cached items map when an item is soft-deleted.
///
/// Tombstones are retained so stale replicas converge; they are filtered
/// out of snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    pub tombstone: bool,
}

impl Tombstone {
    pub fn new() -> Self {
        Self { tombstone: true }
    }
}

impl Default for Tombstone {
    fn default() -> Self {
        Self::new()
    }
}

/// One slot in a cached items map: a live item snapshot or a tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheItem {
    /// Live item snapshot
    Item(TodoItem),
    /// Soft-deleted marker
    Tombstone(Tombstone),
}

impl CacheItem {
    /// True when this slot is a tombstone.
    pub fn is_tombstone(&self) -> bool {
        matches!(self, CacheItem::Tombstone(_))
    }

    /// The live item, if any.
    pub fn as_item(&self) -> Option<&TodoItem> {
        match self {
            CacheItem::Item(item) => Some(item),
            CacheItem::Tombstone(_) => None,
        }
    }
}

/// The cached state of one list, held in L1 and mirrored in L2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListCacheEntry {
    pub list_id: ListId,
    pub list_name: String,
    /// Item id to snapshot-or-tombstone
    pub items: HashMap<ItemId, CacheItem>,
    /// Monotonically non-decreasing revision, drawn from the store clock
    pub rev: Rev,
    /// Seconds since epoch of the last mutation
    pub updated_at: i64,
}

impl ListCacheEntry {
    /// Create an empty entry at the given revision.
    pub fn new(list_id: ListId, list_name: String, rev: Rev) -> Self {
        Self {
            list_id,
            list_name,
            items: HashMap::new(),
            rev,
            updated_at: rev.secs() as i64,
        }
    }

    /// Live (non-tombstone) items, keyed by id.
    pub fn live_items(&self) -> HashMap<ItemId, TodoItem> {
        self.items
            .iter()
            .filter_map(|(id, slot)| slot.as_item().map(|item| (*id, item.clone())))
            .collect()
    }

    /// Number of live items.
    pub fn live_count(&self) -> usize {
        self.items.values().filter(|slot| !slot.is_tombstone()).count()
    }

    /// Apply a single-item mutation carrying revision `rev`.
    ///
    /// Revision equality wins: when the incoming revision is not newer than
    /// the entry's, the mutation was already applied by the racing path and
    /// the call is a no-op. Returns whether the entry changed.
    pub fn apply_item(&mut self, item_id: ItemId, slot: CacheItem, rev: Rev) -> bool {
        if rev <= self.rev {
            return false;
        }
        self.items.insert(item_id, slot);
        self.rev = rev;
        self.updated_at = rev.secs() as i64;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item(list_id: ListId) -> TodoItem {
        TodoItem::new(list_id, "Milk".to_string(), Some("2%".to_string()))
    }

    #[test]
    fn test_new_item_initial_state() {
        let list_id = Uuid::new_v4();
        let item = sample_item(list_id);

        assert_eq!(item.list_id, list_id);
        assert_eq!(item.status, ItemStatus::NotStarted);
        assert!(!item.done);
        assert!(!item.is_deleted);
    }

    #[test]
    fn test_cache_item_untagged_roundtrip() {
        let item = sample_item(Uuid::new_v4());
        let json = serde_json::to_string(&CacheItem::Item(item.clone())).unwrap();
        let back: CacheItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_item(), Some(&item));

        let tomb: CacheItem = serde_json::from_str(r#"{"tombstone":true}"#).unwrap();
        assert!(tomb.is_tombstone());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ItemStatus::NotStarted).unwrap();
        assert_eq!(json, "\"not_started\"");
        let json = serde_json::to_string(&ItemStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn test_apply_item_rev_gating() {
        let list_id = Uuid::new_v4();
        let mut entry = ListCacheEntry::new(list_id, "Groceries".to_string(), Rev::new(100, 0));
        let item = sample_item(list_id);
        let id = item.item_id;

        // Older and equal revisions are no-ops.
        assert!(!entry.apply_item(id, CacheItem::Item(item.clone()), Rev::new(99, 999_999)));
        assert!(!entry.apply_item(id, CacheItem::Item(item.clone()), Rev::new(100, 0)));
        assert!(entry.items.is_empty());

        // A newer revision applies and advances the entry.
        assert!(entry.apply_item(id, CacheItem::Item(item), Rev::new(100, 1)));
        assert_eq!(entry.rev, Rev::new(100, 1));
        assert_eq!(entry.live_count(), 1);
    }

    #[test]
    fn test_live_items_excludes_tombstones() {
        let list_id = Uuid::new_v4();
        let mut entry = ListCacheEntry::new(list_id, "Groceries".to_string(), Rev::ZERO);
        let item = sample_item(list_id);
        let kept = item.item_id;
        entry.apply_item(kept, CacheItem::Item(item), Rev::new(1, 0));

        let gone = Uuid::new_v4();
        entry.apply_item(gone, CacheItem::Tombstone(Tombstone::new()), Rev::new(2, 0));

        let live = entry.live_items();
        assert_eq!(live.len(), 1);
        assert!(live.contains_key(&kept));
        assert_eq!(entry.items.len(), 2);
    }
}
