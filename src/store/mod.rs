//! # Shared Store
//!
//! The Redis tier (L2) and everything that talks to it: cached list state
//! under `todo:state:{list_id}`, the atomic mutation scripts, the fan-out
//! bus channel, and the store clock that revisions are drawn from.
//!
//! All operations carry a short timeout; a slow store surfaces as
//! `transient_error` rather than a stalled session.

mod scripts;

pub use scripts::Scripts;

use crate::error::{EngineError, Result};
use crate::model::{CacheItem, ItemId, ListCacheEntry, ListId, Rev};
use crate::pubsub::BusMessage;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;

/// Timeout applied to every shared-store operation.
pub const OP_TIMEOUT: Duration = Duration::from_secs(2);

/// Key of one list's cached state.
pub fn state_key(list_id: ListId) -> String {
    format!("todo:state:{}", list_id)
}

/// Handle to the shared store.
///
/// Cheap to clone; the connection manager multiplexes one connection and
/// reconnects on failure.
#[derive(Clone)]
pub struct SharedStore {
    client: redis::Client,
    manager: ConnectionManager,
    scripts: Scripts,
    channel: String,
}

impl SharedStore {
    /// Connect and load the mutation scripts.
    ///
    /// Script sources are loaded once here and invoked by SHA afterwards.
    pub async fn connect(url: &str, channel: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| EngineError::Internal(format!("invalid SHARED_STORE_URL: {}", e)))?;
        let mut manager = ConnectionManager::new(client.clone()).await?;
        let scripts = Scripts::load(&mut manager).await?;

        Ok(Self {
            client,
            manager,
            scripts,
            channel: channel.to_string(),
        })
    }

    /// A dedicated pub/sub connection for the listener task.
    pub async fn pubsub(&self) -> Result<redis::aio::PubSub> {
        let conn = timeout(OP_TIMEOUT, self.client.get_async_connection()).await??;
        Ok(conn.into_pubsub())
    }

    /// The fan-out channel name.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Liveness probe.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        timeout(OP_TIMEOUT, redis::cmd("PING").query_async::<_, String>(&mut conn)).await??;
        Ok(())
    }

    /// The store's clock as a revision. Used when rebuilding an entry from
    /// the durable store so that freshly assigned revisions still come from
    /// the single shared clock.
    pub async fn now(&self) -> Result<Rev> {
        let mut conn = self.manager.clone();
        let (secs, micros): (u64, u64) =
            timeout(OP_TIMEOUT, redis::cmd("TIME").query_async(&mut conn)).await??;
        Ok(Rev::new(secs, micros as u32))
    }

    /// Load one list's cached entry, `None` when the key is absent.
    pub async fn load_entry(&self, list_id: ListId) -> Result<Option<ListCacheEntry>> {
        let mut conn = self.manager.clone();
        let fields: HashMap<String, String> = timeout(
            OP_TIMEOUT,
            redis::cmd("HGETALL")
                .arg(state_key(list_id))
                .query_async(&mut conn),
        )
        .await??;

        if fields.is_empty() {
            return Ok(None);
        }

        let list_name = fields.get("list_name").cloned().unwrap_or_default();
        let items: HashMap<ItemId, CacheItem> = match fields.get("items") {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw)
                .map_err(|e| EngineError::Internal(format!("corrupt items map: {}", e)))?,
            _ => HashMap::new(),
        };
        let rev = fields
            .get("rev")
            .map(|raw| raw.parse::<Rev>())
            .transpose()
            .map_err(|e| EngineError::Internal(format!("corrupt rev: {}", e)))?
            .unwrap_or(Rev::ZERO);
        let updated_at = fields
            .get("updated_at")
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(rev.secs() as i64);

        Ok(Some(ListCacheEntry {
            list_id,
            list_name,
            items,
            rev,
            updated_at,
        }))
    }

    /// Write one list's entry wholesale (used when seeding or rebuilding).
    pub async fn write_entry(&self, entry: &ListCacheEntry) -> Result<()> {
        let items = serde_json::to_string(&entry.items)?;
        let mut conn = self.manager.clone();
        timeout(
            OP_TIMEOUT,
            redis::cmd("HSET")
                .arg(state_key(entry.list_id))
                .arg("list_name")
                .arg(&entry.list_name)
                .arg("items")
                .arg(items)
                .arg("rev")
                .arg(entry.rev.to_string())
                .arg("updated_at")
                .arg(entry.updated_at)
                .query_async::<_, ()>(&mut conn),
        )
        .await??;
        Ok(())
    }

    /// Drop one list's entry.
    pub async fn delete_entry(&self, list_id: ListId) -> Result<()> {
        let mut conn = self.manager.clone();
        timeout(
            OP_TIMEOUT,
            redis::cmd("DEL")
                .arg(state_key(list_id))
                .query_async::<_, ()>(&mut conn),
        )
        .await??;
        Ok(())
    }

    /// Publish a bus message outside the scripts (share and list-delete
    /// flows; item mutations publish from inside the script).
    pub async fn publish(&self, message: &BusMessage) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.manager.clone();
        timeout(
            OP_TIMEOUT,
            redis::cmd("PUBLISH")
                .arg(&self.channel)
                .arg(payload)
                .query_async::<_, ()>(&mut conn),
        )
        .await??;
        Ok(())
    }

    /// Run the atomic add-item script. Returns the committed revision.
    pub async fn script_add_item(&self, list_id: ListId, item_json: &str, item_id: ItemId) -> Result<Rev> {
        self.invoke(self.scripts.add_sha(), list_id, item_id, Some(item_json))
            .await
    }

    /// Run the atomic update-item script. Fails with `not_found` when the
    /// list key or the item is absent.
    pub async fn script_update_item(
        &self,
        list_id: ListId,
        item_json: &str,
        item_id: ItemId,
    ) -> Result<Rev> {
        self.invoke(self.scripts.update_sha(), list_id, item_id, Some(item_json))
            .await
    }

    /// Run the atomic delete-item script, leaving a tombstone.
    pub async fn script_delete_item(&self, list_id: ListId, item_id: ItemId) -> Result<Rev> {
        self.invoke(self.scripts.delete_sha(), list_id, item_id, None)
            .await
    }

    async fn invoke(
        &self,
        sha: &str,
        list_id: ListId,
        item_id: ItemId,
        item_json: Option<&str>,
    ) -> Result<Rev> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(sha)
            .arg(2)
            .arg(state_key(list_id))
            .arg(&self.channel)
            .arg(list_id.to_string())
            .arg(item_id.to_string());
        if let Some(json) = item_json {
            cmd.arg(json);
        }

        let raw: String = timeout(OP_TIMEOUT, cmd.query_async(&mut conn))
            .await?
            .map_err(map_script_error)?;
        raw.parse()
            .map_err(|e| EngineError::Internal(format!("script returned bad rev: {}", e)))
    }
}

fn map_script_error(err: redis::RedisError) -> EngineError {
    let message = err.to_string();
    if message.contains("list not found") {
        EngineError::NotFound("list not found".to_string())
    } else if message.contains("item not found") {
        EngineError::NotFound("item not found".to_string())
    } else {
        EngineError::from(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_state_key_format() {
        let id = Uuid::nil();
        assert_eq!(
            state_key(id),
            "todo:state:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_script_error_mapping() {
        let err = redis::RedisError::from((redis::ErrorKind::ResponseError, "", "list not found".to_string()));
        assert!(matches!(map_script_error(err), EngineError::NotFound(_)));

        let err = redis::RedisError::from((redis::ErrorKind::ResponseError, "", "item not found".to_string()));
        assert!(matches!(map_script_error(err), EngineError::NotFound(_)));

        let err = redis::RedisError::from((redis::ErrorKind::ResponseError, "", "boom".to_string()));
        assert!(matches!(map_script_error(err), EngineError::Transient(_)));
    }
}
