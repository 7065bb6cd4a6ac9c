//! Messages carried on the fan-out bus.
//!
//! Item mutations are published from inside the atomic scripts; the share
//! and list-delete flows publish from the coordinator. Every node's
//! listener consumes the same global channel, its own writes included.

use crate::model::{ItemId, ListCacheEntry, ListId, Rev, Role, TodoItem, UserId};
use serde::{Deserialize, Serialize};

/// One message on the fan-out channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMessage {
    /// An item was added to a list
    ItemAdded {
        list_id: ListId,
        item: TodoItem,
        rev: Rev,
    },
    /// An item was updated
    ItemUpdated {
        list_id: ListId,
        item: TodoItem,
        rev: Rev,
    },
    /// An item was soft-deleted (tombstoned)
    ItemDeleted {
        list_id: ListId,
        item_id: ItemId,
        rev: Rev,
    },
    /// A list was shared with a user; carries a full snapshot so the
    /// recipient's node can seed both cache tiers
    ListShared {
        list_id: ListId,
        user_id: UserId,
        role: Role,
        snapshot: ListCacheEntry,
    },
    /// A list was soft-deleted by its owner
    ListDeleted { list_id: ListId },
}

impl BusMessage {
    /// The list this message concerns.
    pub fn list_id(&self) -> ListId {
        match self {
            BusMessage::ItemAdded { list_id, .. }
            | BusMessage::ItemUpdated { list_id, .. }
            | BusMessage::ItemDeleted { list_id, .. }
            | BusMessage::ListShared { list_id, .. }
            | BusMessage::ListDeleted { list_id } => *list_id,
        }
    }
}
