//! In-memory durable-store double for tests.
//!
//! Mirrors the upsert semantics of the Postgres implementation so that
//! queue-replay and worker behavior can be exercised without a database.

use super::DurableStore;
use crate::error::{EngineError, Result};
use crate::model::{ItemId, ListId, Membership, Role, TodoItem, TodoList, UserId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Hash-map backed [`DurableStore`].
#[derive(Default)]
pub struct MemoryStore {
    pub lists: Mutex<HashMap<ListId, TodoList>>,
    pub items: Mutex<HashMap<ItemId, TodoItem>>,
    pub members: Mutex<HashMap<(ListId, UserId), Role>>,
    /// When set, every write fails; used to drive worker failure paths.
    pub fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_failure(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            Err(EngineError::Internal("injected write failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get_list(&self, list_id: ListId) -> Result<Option<TodoList>> {
        Ok(self.lists.lock().get(&list_id).cloned())
    }

    async fn get_items(&self, list_id: ListId) -> Result<Vec<TodoItem>> {
        Ok(self
            .items
            .lock()
            .values()
            .filter(|item| item.list_id == list_id)
            .cloned()
            .collect())
    }

    async fn get_lists_for_user(&self, user_id: &UserId) -> Result<Vec<TodoList>> {
        let members = self.members.lock();
        let lists = self.lists.lock();
        let mut out: Vec<TodoList> = members
            .iter()
            .filter(|((_, member), _)| member == user_id)
            .filter_map(|((list_id, _), _)| lists.get(list_id))
            .filter(|list| !list.is_deleted)
            .cloned()
            .collect();
        out.sort_by_key(|list| list.created_at);
        Ok(out)
    }

    async fn create_list(&self, list: &TodoList) -> Result<()> {
        self.check_failure()?;
        self.lists.lock().insert(list.list_id, list.clone());
        self.members
            .lock()
            .insert((list.list_id, list.owner_id.clone()), Role::Owner);
        Ok(())
    }

    async fn soft_delete_list(&self, list_id: ListId) -> Result<()> {
        self.check_failure()?;
        if let Some(list) = self.lists.lock().get_mut(&list_id) {
            list.is_deleted = true;
        }
        Ok(())
    }

    async fn add_item(&self, item: &TodoItem) -> Result<()> {
        self.check_failure()?;
        self.items.lock().insert(item.item_id, item.clone());
        Ok(())
    }

    async fn update_item(&self, item: &TodoItem) -> Result<()> {
        self.add_item(item).await
    }

    async fn soft_delete_item(&self, list_id: ListId, item_id: ItemId) -> Result<()> {
        self.check_failure()?;
        if let Some(item) = self.items.lock().get_mut(&item_id) {
            if item.list_id == list_id {
                item.is_deleted = true;
            }
        }
        Ok(())
    }

    async fn list_members(&self, list_id: ListId) -> Result<Vec<Membership>> {
        Ok(self
            .members
            .lock()
            .iter()
            .filter(|((id, _), _)| *id == list_id)
            .map(|((list_id, user_id), role)| Membership {
                list_id: *list_id,
                user_id: user_id.clone(),
                role: *role,
            })
            .collect())
    }

    async fn add_member(&self, list_id: ListId, user_id: &UserId, role: Role) -> Result<()> {
        self.check_failure()?;
        self.members.lock().insert((list_id, user_id.clone()), role);
        Ok(())
    }
}
