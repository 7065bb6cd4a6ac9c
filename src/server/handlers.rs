//! Event handlers: one dispatch arm per inbound event kind.
//!
//! Every event runs the same gauntlet: the session's bound identity is
//! re-checked, the payload is validated against its schema, the
//! permission service rules on the action, the coordinator does the work,
//! and the reply goes back through the session's outbound channel. Any
//! error anywhere becomes a single outbound error event; the socket stays
//! open.

use super::Server;
use crate::cache::is_revision_conflict;
use crate::error::{EngineError, FieldError, Result};
use crate::model::{Role, SessionId, UserId};
use crate::permissions::Action;
use crate::protocol::{
    AddItemPayload, CreateListPayload, DeleteItemPayload, DeleteListPayload, EventKind,
    InboundFrame, JoinListPayload, ServerEvent, ShareListPayload, UpdateItemPayload,
};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Entry point from the socket loop. Maps every failure onto the error
/// taxonomy and delivers it to the session.
pub async fn dispatch(server: &Server, session_id: SessionId, text: &str) {
    if let Err(err) = handle_frame(server, session_id, text).await {
        if let EngineError::Internal(detail) = &err {
            log::error!("internal error in session {}: {}", session_id, detail);
        }
        server
            .state
            .deliver_to_session(session_id, ServerEvent::from_error(&err));
    }
}

async fn handle_frame(server: &Server, session_id: SessionId, text: &str) -> Result<()> {
    // Per-event auth guard: the session must still carry a bound user.
    let user_id = server
        .state
        .user_of(session_id)
        .ok_or_else(|| EngineError::Auth("session has no bound user".to_string()))?;

    let frame = InboundFrame::parse(text)?;
    if let Some(schema) = frame.kind.schema() {
        schema.validate(&frame.data)?;
    }

    match frame.kind {
        EventKind::Join => join(server, session_id, &user_id).await,
        EventKind::JoinList => join_list(server, session_id, &user_id, parse(frame.data)?).await,
        EventKind::CreateList => {
            create_list(server, session_id, &user_id, parse(frame.data)?).await
        }
        EventKind::ShareList => share_list(server, session_id, &user_id, parse(frame.data)?).await,
        EventKind::AddItem => add_item(server, &user_id, parse(frame.data)?).await,
        EventKind::UpdateItem => {
            update_item(server, session_id, &user_id, parse(frame.data)?).await
        }
        EventKind::DeleteItem => delete_item(server, &user_id, parse(frame.data)?).await,
        EventKind::DeleteList => delete_list(server, &user_id, parse(frame.data)?).await,
    }
}

/// Deserialize a schema-validated payload; a residual mismatch is still a
/// validation error, never a panic.
fn parse<T: DeserializeOwned>(data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(|err| {
        EngineError::Validation(vec![FieldError::new("data", err.to_string())])
    })
}

/// `join`: snapshot and subscribe every list the user belongs to. The
/// snapshot is delivered before the subscription is registered so a
/// session never sees an incremental event ahead of its baseline.
async fn join(server: &Server, session_id: SessionId, user_id: &UserId) -> Result<()> {
    let lists = server.repo.get_lists_for_user(user_id).await?;
    log::debug!("user {} joining {} lists", user_id, lists.len());

    for list in lists {
        match server.coordinator.snapshot_list(list.list_id).await {
            Ok(entry) => {
                server
                    .state
                    .deliver_to_session(session_id, ServerEvent::snapshot(&entry));
                server.state.subscribe(session_id, list.list_id);
            }
            Err(err) => {
                // One broken list must not block the rest of the join.
                log::warn!("join skipped list {}: {}", list.list_id, err);
            }
        }
    }
    Ok(())
}

async fn join_list(
    server: &Server,
    session_id: SessionId,
    user_id: &UserId,
    payload: JoinListPayload,
) -> Result<()> {
    server
        .permissions
        .check(user_id, payload.list_id, Action::Read)
        .await?;

    let entry = server.coordinator.snapshot_list(payload.list_id).await?;
    server
        .state
        .deliver_to_session(session_id, ServerEvent::snapshot(&entry));
    server.state.subscribe(session_id, payload.list_id);
    Ok(())
}

async fn create_list(
    server: &Server,
    session_id: SessionId,
    user_id: &UserId,
    payload: CreateListPayload,
) -> Result<()> {
    let entry = server
        .coordinator
        .create_list(user_id.clone(), payload.list_name)
        .await?;
    server
        .state
        .deliver_to_session(session_id, ServerEvent::created(&entry));
    Ok(())
}

async fn share_list(
    server: &Server,
    session_id: SessionId,
    user_id: &UserId,
    payload: ShareListPayload,
) -> Result<()> {
    server
        .permissions
        .check(user_id, payload.list_id, Action::Share)
        .await?;

    let entry = server
        .coordinator
        .share_list(payload.list_id, payload.user_id.clone(), payload.role)
        .await?;

    server.state.deliver_to_session(
        session_id,
        ServerEvent::ListShareSuccess {
            list_id: payload.list_id,
            shared_with: payload.user_id,
            message: format!("{} shared", entry.list_name),
        },
    );
    Ok(())
}

async fn add_item(server: &Server, user_id: &UserId, payload: AddItemPayload) -> Result<()> {
    server
        .permissions
        .check(user_id, payload.list_id, Action::Write)
        .await?;

    // The reply is the `item_added` fan-out from the bus; accepted adds
    // have no direct response.
    server.coordinator.add_item(payload).await?;
    Ok(())
}

async fn update_item(
    server: &Server,
    session_id: SessionId,
    user_id: &UserId,
    payload: UpdateItemPayload,
) -> Result<()> {
    server
        .permissions
        .check(user_id, payload.list_id, Action::Write)
        .await?;

    let entry = server
        .coordinator
        .check_and_load_list_cache(payload.list_id, payload.rev)
        .await?;

    if is_revision_conflict(payload.rev, entry.rev) {
        // The client reconciles from the authoritative snapshot; the
        // conflict error follows it out of dispatch.
        server
            .state
            .deliver_to_session(session_id, ServerEvent::snapshot(&entry));
        return Err(EngineError::RevisionConflict { current: entry.rev });
    }

    server
        .coordinator
        .update_item(payload.list_id, payload.item_id, &payload.patch)
        .await?;
    Ok(())
}

async fn delete_item(server: &Server, user_id: &UserId, payload: DeleteItemPayload) -> Result<()> {
    server
        .permissions
        .check(user_id, payload.list_id, Action::Write)
        .await?;

    server
        .coordinator
        .delete_item(payload.list_id, payload.item_id)
        .await?;
    Ok(())
}

async fn delete_list(server: &Server, user_id: &UserId, payload: DeleteListPayload) -> Result<()> {
    let role = server
        .permissions
        .check(user_id, payload.list_id, Action::Read)
        .await?;
    if role != Role::Owner {
        return Err(EngineError::PermissionDenied(
            "only the owner may delete a list".to_string(),
        ));
    }

    server.coordinator.delete_list(payload.list_id).await?;
    Ok(())
}
