//! # Repository Layer
//!
//! Typed CRUD against the durable database (L3) for lists, items, and
//! membership. Every write is an upsert keyed by its primary identifier so
//! that replays from the write-behind queue are harmless.
//!
//! The [`DurableStore`] trait is the seam between the engine and Postgres:
//! the write-behind worker, the permission service, and the coordinator all
//! hold a `dyn DurableStore`, which keeps them testable without a database.

mod schema;
mod sql;

#[cfg(test)]
pub mod memory;

pub use schema::bootstrap_schema;
pub use sql::SqlRepository;

use crate::error::Result;
use crate::model::{ItemId, ListId, Membership, Role, TodoItem, TodoList, UserId};
use async_trait::async_trait;

/// Durable storage for lists, items, and membership.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Fetch one list, `None` when absent.
    async fn get_list(&self, list_id: ListId) -> Result<Option<TodoList>>;

    /// Fetch every item of a list, tombstoned ones included.
    async fn get_items(&self, list_id: ListId) -> Result<Vec<TodoItem>>;

    /// Fetch every non-deleted list the user is a member of.
    async fn get_lists_for_user(&self, user_id: &UserId) -> Result<Vec<TodoList>>;

    /// Persist a new list and its owner membership.
    async fn create_list(&self, list: &TodoList) -> Result<()>;

    /// Soft-delete a list.
    async fn soft_delete_list(&self, list_id: ListId) -> Result<()>;

    /// Persist a new item (upsert).
    async fn add_item(&self, item: &TodoItem) -> Result<()>;

    /// Persist the full snapshot of a mutated item (upsert).
    async fn update_item(&self, item: &TodoItem) -> Result<()>;

    /// Soft-delete an item.
    async fn soft_delete_item(&self, list_id: ListId, item_id: ItemId) -> Result<()>;

    /// Fetch the membership rows of a list.
    async fn list_members(&self, list_id: ListId) -> Result<Vec<Membership>>;

    /// Upsert one membership row.
    async fn add_member(&self, list_id: ListId, user_id: &UserId, role: Role) -> Result<()>;
}
