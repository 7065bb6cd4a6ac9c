//! Inbound and outbound event types.

use crate::error::{EngineError, FieldError};
use crate::model::{ItemId, ItemStatus, ListCacheEntry, ListId, Rev, Role, TodoItem, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Every inbound event kind a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Join,
    JoinList,
    CreateList,
    ShareList,
    AddItem,
    UpdateItem,
    DeleteItem,
    DeleteList,
}

impl EventKind {
    /// Parse a wire event name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "join" => Some(Self::Join),
            "join_list" => Some(Self::JoinList),
            "create_list" => Some(Self::CreateList),
            "share_list" => Some(Self::ShareList),
            "add_item" => Some(Self::AddItem),
            "update_item" => Some(Self::UpdateItem),
            "delete_item" => Some(Self::DeleteItem),
            "delete_list" => Some(Self::DeleteList),
            _ => None,
        }
    }

    /// The wire event name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::JoinList => "join_list",
            Self::CreateList => "create_list",
            Self::ShareList => "share_list",
            Self::AddItem => "add_item",
            Self::UpdateItem => "update_item",
            Self::DeleteItem => "delete_item",
            Self::DeleteList => "delete_list",
        }
    }
}

/// A parsed inbound frame: event kind plus its raw payload, validated but
/// not yet deserialized.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub kind: EventKind,
    pub data: Value,
}

impl InboundFrame {
    /// Parse the outer frame shape. Unknown event names and malformed JSON
    /// are validation errors; the payload defaults to an empty object.
    pub fn parse(text: &str) -> Result<Self, EngineError> {
        let value: Value = serde_json::from_str(text).map_err(|e| {
            EngineError::Validation(vec![FieldError::new("frame", format!("invalid JSON: {}", e))])
        })?;

        let name = value
            .get("event")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                EngineError::Validation(vec![FieldError::new("event", "required field missing")])
            })?;

        let kind = EventKind::parse(name).ok_or_else(|| {
            EngineError::Validation(vec![FieldError::new(
                "event",
                format!("unknown event {name:?}"),
            )])
        })?;

        let data = value.get("data").cloned().unwrap_or_else(|| Value::Object(Default::default()));

        Ok(Self { kind, data })
    }
}

/// `join_list` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinListPayload {
    pub list_id: ListId,
}

/// `create_list` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateListPayload {
    pub list_name: String,
}

/// `share_list` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ShareListPayload {
    pub list_id: ListId,
    pub user_id: UserId,
    pub role: Role,
}

/// `add_item` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct AddItemPayload {
    pub list_id: ListId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub media_url: Option<String>,
}

/// Field-level patch carried by `update_item`. Absent fields are
/// preserved on the item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

impl ItemPatch {
    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self == &ItemPatch::default()
    }
}

/// `update_item` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateItemPayload {
    pub list_id: ListId,
    pub item_id: ItemId,
    #[serde(flatten)]
    pub patch: ItemPatch,
    /// The revision the client last observed; absent means "don't check".
    #[serde(default)]
    pub rev: Option<Rev>,
}

/// `delete_item` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteItemPayload {
    pub list_id: ListId,
    pub item_id: ItemId,
}

/// `delete_list` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteListPayload {
    pub list_id: ListId,
}

/// Every server-originated event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake accepted
    Connected {
        user_id: UserId,
        session_id: String,
    },
    /// Full state of one list
    ListSnapshot {
        list_id: ListId,
        list_name: String,
        items: HashMap<ItemId, TodoItem>,
        rev: Rev,
    },
    /// A list the requester created
    ListCreated {
        list_id: ListId,
        list_name: String,
        items: HashMap<ItemId, TodoItem>,
        rev: Rev,
    },
    ItemAdded {
        list_id: ListId,
        item: TodoItem,
        rev: Rev,
    },
    ItemUpdated {
        list_id: ListId,
        item: TodoItem,
        rev: Rev,
    },
    ItemDeleted {
        list_id: ListId,
        item_id: ItemId,
        rev: Rev,
    },
    ListShareSuccess {
        list_id: ListId,
        shared_with: UserId,
        message: String,
    },
    ListSharedWithYou {
        list_id: ListId,
        message: String,
    },
    ListDeleted {
        list_id: ListId,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
    },
    AuthError {
        message: String,
    },
    PermissionError {
        message: String,
    },
    ValidationError {
        message: String,
        errors: Vec<FieldError>,
    },
}

impl ServerEvent {
    /// A snapshot event for one cached list, tombstones excluded.
    pub fn snapshot(entry: &ListCacheEntry) -> Self {
        Self::ListSnapshot {
            list_id: entry.list_id,
            list_name: entry.list_name.clone(),
            items: entry.live_items(),
            rev: entry.rev,
        }
    }

    /// The creation reply for a fresh list.
    pub fn created(entry: &ListCacheEntry) -> Self {
        Self::ListCreated {
            list_id: entry.list_id,
            list_name: entry.list_name.clone(),
            items: entry.live_items(),
            rev: entry.rev,
        }
    }

    /// Map an engine error onto its outbound event.
    pub fn from_error(err: &EngineError) -> Self {
        match err {
            EngineError::Auth(_) => Self::AuthError {
                message: err.client_message(),
            },
            EngineError::PermissionDenied(_) => Self::PermissionError {
                message: err.client_message(),
            },
            EngineError::Validation(fields) => Self::ValidationError {
                message: err.client_message(),
                errors: fields.clone(),
            },
            other => Self::Error {
                message: other.client_message(),
                kind: Some(other.kind().to_string()),
            },
        }
    }

    /// Serialize to a wire frame.
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"event":"error","data":{"message":"internal error","kind":"internal_error"}}"#
                .to_string()
        })
    }
}
