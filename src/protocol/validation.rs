//! Declarative payload validation.
//!
//! Each inbound event kind has a named schema describing required and
//! optional fields with their expected shapes. Schemas are checked against
//! the raw JSON payload before the handler deserializes it, so a client
//! always gets field-level messages instead of an opaque parse failure.
//! Unknown fields are ignored.

use super::events::EventKind;
use crate::error::{EngineError, FieldError};
use crate::model::{ItemStatus, Rev, Role};
use chrono::DateTime;
use serde_json::Value;
use uuid::Uuid;

/// Expected shape of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Any string
    Str,
    /// A non-blank string
    NonEmptyStr,
    /// A UUID in string form
    Uuid,
    /// A JSON boolean
    Bool,
    /// A membership role name
    Role,
    /// An item status name
    Status,
    /// A revision string
    Rev,
    /// An ISO-8601 timestamp
    DateTime,
}

impl FieldKind {
    fn describe(&self) -> &'static str {
        match self {
            FieldKind::Str => "expected a string",
            FieldKind::NonEmptyStr => "expected a non-empty string",
            FieldKind::Uuid => "expected a UUID string",
            FieldKind::Bool => "expected a boolean",
            FieldKind::Role => "expected one of owner, editor, viewer",
            FieldKind::Status => "expected one of not_started, in_progress, completed",
            FieldKind::Rev => "expected a revision string",
            FieldKind::DateTime => "expected an ISO-8601 timestamp",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::Str => value.is_string(),
            FieldKind::NonEmptyStr => value
                .as_str()
                .map(|s| !s.trim().is_empty())
                .unwrap_or(false),
            FieldKind::Uuid => value
                .as_str()
                .map(|s| Uuid::parse_str(s).is_ok())
                .unwrap_or(false),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Role => value
                .as_str()
                .map(|s| s.parse::<Role>().is_ok())
                .unwrap_or(false),
            FieldKind::Status => value
                .as_str()
                .map(|s| s.parse::<ItemStatus>().is_ok())
                .unwrap_or(false),
            FieldKind::Rev => value
                .as_str()
                .map(|s| s.parse::<Rev>().is_ok())
                .unwrap_or(false),
            FieldKind::DateTime => value
                .as_str()
                .map(|s| DateTime::parse_from_rfc3339(s).is_ok())
                .unwrap_or(false),
        }
    }
}

/// One field of a schema.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

const fn req(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: true,
    }
}

const fn opt(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: false,
    }
}

/// A named payload schema.
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
}

impl Schema {
    /// Check `data` against this schema, collecting every field failure.
    pub fn validate(&self, data: &Value) -> Result<(), EngineError> {
        let object = match data.as_object() {
            Some(object) => object,
            None => {
                return Err(EngineError::Validation(vec![FieldError::new(
                    "data",
                    "expected an object",
                )]))
            }
        };

        let mut errors = Vec::new();
        for field in self.fields {
            match object.get(field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        errors.push(FieldError::new(field.name, "required field missing"));
                    }
                }
                Some(value) => {
                    if !field.kind.matches(value) {
                        errors.push(FieldError::new(field.name, field.kind.describe()));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Validation(errors))
        }
    }
}

const JOIN_LIST: Schema = Schema {
    name: "join_list",
    fields: &[req("list_id", FieldKind::Uuid)],
};

const CREATE_LIST: Schema = Schema {
    name: "create_list",
    fields: &[req("list_name", FieldKind::NonEmptyStr)],
};

const SHARE_LIST: Schema = Schema {
    name: "share_list",
    fields: &[
        req("list_id", FieldKind::Uuid),
        req("user_id", FieldKind::NonEmptyStr),
        req("role", FieldKind::Role),
    ],
};

const ADD_ITEM: Schema = Schema {
    name: "add_item",
    fields: &[
        req("list_id", FieldKind::Uuid),
        req("name", FieldKind::NonEmptyStr),
        opt("description", FieldKind::Str),
        opt("due_date", FieldKind::DateTime),
        opt("media_url", FieldKind::Str),
    ],
};

const UPDATE_ITEM: Schema = Schema {
    name: "update_item",
    fields: &[
        req("list_id", FieldKind::Uuid),
        req("item_id", FieldKind::Uuid),
        opt("name", FieldKind::NonEmptyStr),
        opt("description", FieldKind::Str),
        opt("due_date", FieldKind::DateTime),
        opt("status", FieldKind::Status),
        opt("done", FieldKind::Bool),
        opt("media_url", FieldKind::Str),
        opt("rev", FieldKind::Rev),
    ],
};

const DELETE_ITEM: Schema = Schema {
    name: "delete_item",
    fields: &[req("list_id", FieldKind::Uuid), req("item_id", FieldKind::Uuid)],
};

const DELETE_LIST: Schema = Schema {
    name: "delete_list",
    fields: &[req("list_id", FieldKind::Uuid)],
};

impl EventKind {
    /// The schema for this event's payload; `join` carries none.
    pub fn schema(&self) -> Option<&'static Schema> {
        match self {
            EventKind::Join => None,
            EventKind::JoinList => Some(&JOIN_LIST),
            EventKind::CreateList => Some(&CREATE_LIST),
            EventKind::ShareList => Some(&SHARE_LIST),
            EventKind::AddItem => Some(&ADD_ITEM),
            EventKind::UpdateItem => Some(&UPDATE_ITEM),
            EventKind::DeleteItem => Some(&DELETE_ITEM),
            EventKind::DeleteList => Some(&DELETE_LIST),
        }
    }
}
