//! The coordinator: central façade over the three storage tiers.

use super::StateManager;
use crate::error::{EngineError, Result};
use crate::model::{
    CacheItem, ItemId, ItemStatus, ListCacheEntry, ListId, Rev, Role, TodoItem, TodoList,
    Tombstone, UserId,
};
use crate::protocol::{AddItemPayload, ItemPatch};
use crate::pubsub::BusMessage;
use crate::repository::DurableStore;
use crate::store::SharedStore;
use crate::writer::{WriteOp, WriterHandle};
use chrono::Utc;
use std::sync::Arc;

/// True when a client-supplied revision must be rejected against the
/// current one. Absent and equal revisions are accepted; only a client
/// strictly behind the authoritative state conflicts.
pub fn is_revision_conflict(client_rev: Option<Rev>, current: Rev) -> bool {
    matches!(client_rev, Some(rev) if rev < current)
}

/// Owns L1 ↔ L2 ↔ L3 read-through and write-through.
pub struct Coordinator {
    state: Arc<StateManager>,
    store: SharedStore,
    repo: Arc<dyn DurableStore>,
    writer: WriterHandle,
}

impl Coordinator {
    pub fn new(
        state: Arc<StateManager>,
        store: SharedStore,
        repo: Arc<dyn DurableStore>,
        writer: WriterHandle,
    ) -> Self {
        Self {
            state,
            store,
            repo,
            writer,
        }
    }

    /// Load a list's cache entry, healing cold tiers on the way.
    ///
    /// L1 hit returns immediately. On an L1 miss the L2 entry is used when
    /// it is at least as new as what the client claims to have seen; an
    /// absent L2 entry, or a client revision from a store life before a
    /// flush, forces a rebuild from the durable store under a fresh
    /// revision drawn from the store clock.
    pub async fn check_and_load_list_cache(
        &self,
        list_id: ListId,
        client_rev: Option<Rev>,
    ) -> Result<ListCacheEntry> {
        if let Some(entry) = self.state.get_cache(list_id) {
            return Ok(entry);
        }

        match self.store.load_entry(list_id).await? {
            Some(entry) if client_rev.map_or(true, |rev| rev <= entry.rev) => {
                self.state.put_cache(entry.clone());
                Ok(entry)
            }
            stale => {
                if stale.is_some() {
                    log::warn!(
                        "client saw a newer revision than L2 holds for list {}, rebuilding",
                        list_id
                    );
                }
                self.rebuild_from_durable(list_id).await
            }
        }
    }

    /// Current entry for a list, loading it when necessary.
    pub async fn snapshot_list(&self, list_id: ListId) -> Result<ListCacheEntry> {
        self.check_and_load_list_cache(list_id, None).await
    }

    /// Add a new item. Returns the stored item and its committed revision.
    pub async fn add_item(&self, payload: AddItemPayload) -> Result<(TodoItem, Rev)> {
        let list_id = payload.list_id;
        // Ensures the list exists and L2 is warm before the script runs.
        self.check_and_load_list_cache(list_id, None).await?;

        let mut item = TodoItem::new(list_id, payload.name, payload.description);
        item.due_date = payload.due_date;
        item.media_url = payload.media_url;

        let item_json = serde_json::to_string(&item)?;
        let rev = self
            .store
            .script_add_item(list_id, &item_json, item.item_id)
            .await?;

        self.state.with_cache(list_id, |entry| {
            entry.apply_item(item.item_id, CacheItem::Item(item.clone()), rev)
        });
        self.writer.enqueue(WriteOp::AddItem(item.clone()));

        Ok((item, rev))
    }

    /// Merge a patch over the current item snapshot and commit the whole
    /// item. The revision conflict check happens in the handler, against
    /// the entry this call's `check_and_load_list_cache` produced.
    pub async fn update_item(
        &self,
        list_id: ListId,
        item_id: ItemId,
        patch: &ItemPatch,
    ) -> Result<(TodoItem, Rev)> {
        let entry = self.check_and_load_list_cache(list_id, None).await?;
        let current = entry
            .items
            .get(&item_id)
            .and_then(CacheItem::as_item)
            .ok_or_else(|| EngineError::NotFound(format!("item {} not in list", item_id)))?;

        let merged = merge_patch(current, patch);
        let item_json = serde_json::to_string(&merged)?;
        let rev = self
            .store
            .script_update_item(list_id, &item_json, item_id)
            .await?;

        self.state.with_cache(list_id, |entry| {
            entry.apply_item(item_id, CacheItem::Item(merged.clone()), rev)
        });
        self.writer.enqueue(WriteOp::UpdateItem(merged.clone()));

        Ok((merged, rev))
    }

    /// Soft-delete an item, leaving a tombstone in the cache tiers.
    pub async fn delete_item(&self, list_id: ListId, item_id: ItemId) -> Result<Rev> {
        self.check_and_load_list_cache(list_id, None).await?;

        let rev = self.store.script_delete_item(list_id, item_id).await?;

        self.state.with_cache(list_id, |entry| {
            entry.apply_item(item_id, CacheItem::Tombstone(Tombstone::new()), rev)
        });
        self.writer.enqueue(WriteOp::DeleteItem { list_id, item_id });

        Ok(rev)
    }

    /// Create a list. The durable write is synchronous because the new
    /// list id is the return value; the cache tiers are seeded afterwards.
    pub async fn create_list(&self, owner_id: UserId, list_name: String) -> Result<ListCacheEntry> {
        let now = Utc::now();
        let list = TodoList {
            list_id: uuid::Uuid::new_v4(),
            list_name: list_name.clone(),
            owner_id,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        self.repo.create_list(&list).await?;

        let rev = self.store.now().await?;
        let entry = ListCacheEntry::new(list.list_id, list_name, rev);
        self.store.write_entry(&entry).await?;
        self.state.put_cache(entry.clone());

        Ok(entry)
    }

    /// Share a list: synchronous membership upsert, then a bus message
    /// carrying the member and a full snapshot so the recipient's node can
    /// seed both tiers.
    pub async fn share_list(
        &self,
        list_id: ListId,
        user_id: UserId,
        role: Role,
    ) -> Result<ListCacheEntry> {
        let entry = self.check_and_load_list_cache(list_id, None).await?;
        self.repo.add_member(list_id, &user_id, role).await?;

        self.store
            .publish(&BusMessage::ListShared {
                list_id,
                user_id,
                role,
                snapshot: entry.clone(),
            })
            .await?;

        Ok(entry)
    }

    /// Soft-delete a list. Synchronous in the durable store; the L2 key is
    /// dropped and every node (this one included) learns via the bus.
    pub async fn delete_list(&self, list_id: ListId) -> Result<()> {
        self.repo.soft_delete_list(list_id).await?;
        self.store.delete_entry(list_id).await?;
        self.store.publish(&BusMessage::ListDeleted { list_id }).await?;
        Ok(())
    }

    /// Drop this node's cache tiers for manual recovery: L1 wholesale and
    /// the L2 entries this node was holding.
    pub async fn flush_caches(&self) -> Result<Vec<ListId>> {
        let flushed = self.state.clear_cache();
        for list_id in &flushed {
            self.store.delete_entry(*list_id).await?;
        }
        Ok(flushed)
    }

    async fn rebuild_from_durable(&self, list_id: ListId) -> Result<ListCacheEntry> {
        let list = self
            .repo
            .get_list(list_id)
            .await?
            .filter(|list| !list.is_deleted)
            .ok_or_else(|| EngineError::NotFound(format!("list {} not found", list_id)))?;
        let items = self.repo.get_items(list_id).await?;

        let rev = self.store.now().await?;
        let mut entry = ListCacheEntry::new(list_id, list.list_name, rev);
        for item in items {
            let slot = if item.is_deleted {
                CacheItem::Tombstone(Tombstone::new())
            } else {
                CacheItem::Item(item.clone())
            };
            entry.items.insert(item.item_id, slot);
        }

        self.store.write_entry(&entry).await?;
        self.state.put_cache(entry.clone());
        log::info!(
            "rebuilt cache for list {} from durable store at rev {}",
            list_id,
            entry.rev
        );
        Ok(entry)
    }
}

/// Merge an explicit patch over the current snapshot, preserving absent
/// fields and keeping `done` consistent with `status`.
///
/// When the patch names `status`, `done` is derived from it; otherwise an
/// explicit `done` drives `status` (true promotes to completed, false
/// demotes a completed item to in-progress).
fn merge_patch(current: &TodoItem, patch: &ItemPatch) -> TodoItem {
    let mut item = current.clone();

    if let Some(name) = &patch.name {
        item.name = name.clone();
    }
    if let Some(description) = &patch.description {
        item.description = Some(description.clone());
    }
    if let Some(due_date) = patch.due_date {
        item.due_date = Some(due_date);
    }
    if let Some(media_url) = &patch.media_url {
        item.media_url = Some(media_url.clone());
    }

    if let Some(status) = patch.status {
        item.status = status;
        item.done = status == ItemStatus::Completed;
    } else if let Some(done) = patch.done {
        item.done = done;
        if done {
            item.status = ItemStatus::Completed;
        } else if item.status == ItemStatus::Completed {
            item.status = ItemStatus::InProgress;
        }
    }

    item.updated_at = Utc::now();
    item
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn base_item(status: ItemStatus, done: bool) -> TodoItem {
        let mut item = TodoItem::new(Uuid::new_v4(), "Milk".to_string(), None);
        item.status = status;
        item.done = done;
        item
    }

    #[test]
    fn test_patch_preserves_absent_fields() {
        let mut current = base_item(ItemStatus::InProgress, false);
        current.description = Some("2%".to_string());
        current.media_url = Some("https://example.com/milk.jpg".to_string());

        let patch = ItemPatch {
            name: Some("Oat milk".to_string()),
            ..Default::default()
        };
        let merged = merge_patch(&current, &patch);

        assert_eq!(merged.name, "Oat milk");
        assert_eq!(merged.description, current.description);
        assert_eq!(merged.media_url, current.media_url);
        assert_eq!(merged.status, ItemStatus::InProgress);
    }

    #[test]
    fn test_status_completed_forces_done() {
        let current = base_item(ItemStatus::InProgress, false);
        let patch = ItemPatch {
            status: Some(ItemStatus::Completed),
            ..Default::default()
        };
        let merged = merge_patch(&current, &patch);
        assert!(merged.done);
        assert_eq!(merged.status, ItemStatus::Completed);
    }

    #[test]
    fn test_done_true_forces_completed() {
        let current = base_item(ItemStatus::NotStarted, false);
        let patch = ItemPatch {
            done: Some(true),
            ..Default::default()
        };
        let merged = merge_patch(&current, &patch);
        assert_eq!(merged.status, ItemStatus::Completed);
        assert!(merged.done);
    }

    #[test]
    fn test_done_false_demotes_completed() {
        let current = base_item(ItemStatus::Completed, true);
        let patch = ItemPatch {
            done: Some(false),
            ..Default::default()
        };
        let merged = merge_patch(&current, &patch);
        assert_eq!(merged.status, ItemStatus::InProgress);
        assert!(!merged.done);
    }

    #[test]
    fn test_done_false_leaves_unstarted_alone() {
        let current = base_item(ItemStatus::NotStarted, false);
        let patch = ItemPatch {
            done: Some(false),
            ..Default::default()
        };
        let merged = merge_patch(&current, &patch);
        assert_eq!(merged.status, ItemStatus::NotStarted);
    }

    #[test]
    fn test_conflict_decision() {
        let current = Rev::new(100, 0);
        assert!(is_revision_conflict(Some(Rev::new(80, 0)), current));
        assert!(!is_revision_conflict(Some(Rev::new(100, 0)), current));
        assert!(!is_revision_conflict(Some(Rev::new(120, 0)), current));
        assert!(!is_revision_conflict(None, current));
    }

    fn arb_status() -> impl Strategy<Value = ItemStatus> {
        prop_oneof![
            Just(ItemStatus::NotStarted),
            Just(ItemStatus::InProgress),
            Just(ItemStatus::Completed),
        ]
    }

    proptest! {
        /// After any accepted update, `done == (status == completed)`.
        #[test]
        fn prop_status_done_coupling(
            initial_status in arb_status(),
            patch_status in proptest::option::of(arb_status()),
            patch_done in proptest::option::of(any::<bool>()),
            name in proptest::option::of("[a-z]{1,12}"),
        ) {
            let current = base_item(initial_status, initial_status == ItemStatus::Completed);
            let patch = ItemPatch {
                name,
                status: patch_status,
                done: patch_done,
                ..Default::default()
            };
            let merged = merge_patch(&current, &patch);
            prop_assert_eq!(merged.done, merged.status == ItemStatus::Completed);
        }

        /// `client_rev < current` always rejects; equal or absent always
        /// accepts.
        #[test]
        fn prop_conflict_rejection_symmetry(
            client in proptest::option::of((0u64..2_000_000_000, 0u32..1_000_000)),
            current in (0u64..2_000_000_000, 0u32..1_000_000),
        ) {
            let current = Rev::new(current.0, current.1);
            let client_rev = client.map(|(s, m)| Rev::new(s, m));
            let conflict = is_revision_conflict(client_rev, current);
            match client_rev {
                Some(rev) if rev < current => prop_assert!(conflict),
                _ => prop_assert!(!conflict),
            }
        }
    }
}
