//! Atomic mutation scripts.
//!
//! Each script runs as one atomic step on the shared store: read the store
//! clock, apply the mutation to the cached items map, write the new
//! revision, and publish the corresponding bus message. A message is
//! published iff the mutation committed.
//!
//! `redis.replicate_commands()` precedes the `TIME` call so the scripts
//! stay legal under effect replication.

use crate::error::Result;
use redis::aio::ConnectionManager;

/// Shared prelude: clock read and items-map decode.
const PRELUDE: &str = r#"
redis.replicate_commands()
local key = KEYS[1]
local channel = KEYS[2]
local list_id = ARGV[1]
local item_id = ARGV[2]
local t = redis.call('TIME')
local rev = string.format('%d.%06d', tonumber(t[1]), tonumber(t[2]))
"#;

const ADD_ITEM: &str = r#"
local item = cjson.decode(ARGV[3])
local items = {}
local items_raw = redis.call('HGET', key, 'items')
if items_raw then items = cjson.decode(items_raw) end
items[item_id] = item
redis.call('HSET', key, 'items', cjson.encode(items), 'rev', rev, 'updated_at', t[1])
redis.call('PUBLISH', channel, cjson.encode({
    ['type'] = 'item_added', list_id = list_id, item = item, rev = rev
}))
return rev
"#;

const UPDATE_ITEM: &str = r#"
if redis.call('EXISTS', key) == 0 then
    return redis.error_reply('list not found')
end
local item = cjson.decode(ARGV[3])
local items = {}
local items_raw = redis.call('HGET', key, 'items')
if items_raw then items = cjson.decode(items_raw) end
if items[item_id] == nil then
    return redis.error_reply('item not found')
end
items[item_id] = item
redis.call('HSET', key, 'items', cjson.encode(items), 'rev', rev, 'updated_at', t[1])
redis.call('PUBLISH', channel, cjson.encode({
    ['type'] = 'item_updated', list_id = list_id, item = item, rev = rev
}))
return rev
"#;

const DELETE_ITEM: &str = r#"
if redis.call('EXISTS', key) == 0 then
    return redis.error_reply('list not found')
end
local items = {}
local items_raw = redis.call('HGET', key, 'items')
if items_raw then items = cjson.decode(items_raw) end
if items[item_id] == nil then
    return redis.error_reply('item not found')
end
items[item_id] = { tombstone = true }
redis.call('HSET', key, 'items', cjson.encode(items), 'rev', rev, 'updated_at', t[1])
redis.call('PUBLISH', channel, cjson.encode({
    ['type'] = 'item_deleted', list_id = list_id, item_id = item_id, rev = rev
}))
return rev
"#;

/// SHAs of the three loaded scripts.
#[derive(Debug, Clone)]
pub struct Scripts {
    add_sha: String,
    update_sha: String,
    delete_sha: String,
}

impl Scripts {
    /// Load all scripts on the store and record their SHAs.
    pub async fn load(conn: &mut ConnectionManager) -> Result<Self> {
        Ok(Self {
            add_sha: load_one(conn, &source(ADD_ITEM)).await?,
            update_sha: load_one(conn, &source(UPDATE_ITEM)).await?,
            delete_sha: load_one(conn, &source(DELETE_ITEM)).await?,
        })
    }

    pub fn add_sha(&self) -> &str {
        &self.add_sha
    }

    pub fn update_sha(&self) -> &str {
        &self.update_sha
    }

    pub fn delete_sha(&self) -> &str {
        &self.delete_sha
    }
}

fn source(body: &str) -> String {
    format!("{}{}", PRELUDE, body)
}

async fn load_one(conn: &mut ConnectionManager, script: &str) -> Result<String> {
    let sha: String = redis::cmd("SCRIPT")
        .arg("LOAD")
        .arg(script)
        .query_async(conn)
        .await?;
    Ok(sha)
}
