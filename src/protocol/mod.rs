//! # Wire Protocol
//!
//! The event-oriented message protocol spoken over the WebSocket: inbound
//! event kinds with their payloads, outbound server events, and the
//! declarative payload validation that runs before any handler.
//!
//! Frames are JSON text messages of the shape
//! `{"event": "<name>", "data": { ... }}`. Client- and server-originated
//! events share one namespace; timestamps are ISO-8601 UTC and revisions
//! travel as strings.

pub mod events;
pub mod validation;

pub use events::{
    AddItemPayload, CreateListPayload, DeleteItemPayload, DeleteListPayload, EventKind,
    InboundFrame, ItemPatch, JoinListPayload, ServerEvent, ShareListPayload, UpdateItemPayload,
};
pub use validation::{FieldKind, FieldSpec, Schema};
