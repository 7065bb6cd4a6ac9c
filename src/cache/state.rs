//! Per-process state: the L1 cache and the connection registry.
//!
//! Both structures are guarded by coarse mutexes; critical sections only
//! touch one list entry or one session at a time, so contention stays in
//! the noise next to store round-trips.

use crate::model::{ListCacheEntry, ListId, SessionId, UserId};
use crate::protocol::ServerEvent;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;

/// Outbound channel of one session; the socket task drains it.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

struct SessionEntry {
    user_id: UserId,
    sender: EventSender,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, SessionEntry>,
    user_sessions: HashMap<UserId, HashSet<SessionId>>,
    list_sessions: HashMap<ListId, HashSet<SessionId>>,
    session_lists: HashMap<SessionId, HashSet<ListId>>,
}

/// L1 cache and connection registry for one collab node.
#[derive(Default)]
pub struct StateManager {
    cache: Mutex<HashMap<ListId, ListCacheEntry>>,
    registry: Mutex<Registry>,
}

/// One row of the `/cache` summary.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheSummary {
    pub list_id: ListId,
    pub list_name: String,
    pub live_items: usize,
    pub total_items: usize,
    pub rev: crate::model::Rev,
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    // --- connection registry ---

    /// Register a freshly authenticated session.
    pub fn add_connection(&self, session_id: SessionId, user_id: UserId, sender: EventSender) {
        let mut registry = self.registry.lock();
        registry
            .user_sessions
            .entry(user_id.clone())
            .or_default()
            .insert(session_id);
        registry
            .sessions
            .insert(session_id, SessionEntry { user_id, sender });
    }

    /// Drop a session and all of its subscriptions.
    pub fn remove_connection(&self, session_id: SessionId) {
        self.unsubscribe_all(session_id);
        let mut registry = self.registry.lock();
        if let Some(entry) = registry.sessions.remove(&session_id) {
            if let Some(sessions) = registry.user_sessions.get_mut(&entry.user_id) {
                sessions.remove(&session_id);
                if sessions.is_empty() {
                    registry.user_sessions.remove(&entry.user_id);
                }
            }
        }
    }

    /// The user bound to a session, if the session is still registered.
    pub fn user_of(&self, session_id: SessionId) -> Option<UserId> {
        self.registry
            .lock()
            .sessions
            .get(&session_id)
            .map(|entry| entry.user_id.clone())
    }

    /// Subscribe a session to a list's updates.
    pub fn subscribe(&self, session_id: SessionId, list_id: ListId) {
        let mut registry = self.registry.lock();
        if !registry.sessions.contains_key(&session_id) {
            return;
        }
        registry
            .list_sessions
            .entry(list_id)
            .or_default()
            .insert(session_id);
        registry
            .session_lists
            .entry(session_id)
            .or_default()
            .insert(list_id);
    }

    /// Remove every subscription of a session.
    pub fn unsubscribe_all(&self, session_id: SessionId) {
        let mut registry = self.registry.lock();
        if let Some(lists) = registry.session_lists.remove(&session_id) {
            for list_id in lists {
                if let Some(sessions) = registry.list_sessions.get_mut(&list_id) {
                    sessions.remove(&session_id);
                    if sessions.is_empty() {
                        registry.list_sessions.remove(&list_id);
                    }
                }
            }
        }
    }

    /// Session ids currently subscribed to a list on this node.
    pub fn sessions_for_list(&self, list_id: ListId) -> Vec<SessionId> {
        self.registry
            .lock()
            .list_sessions
            .get(&list_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Session ids of one user on this node.
    pub fn sessions_for_user(&self, user_id: &UserId) -> Vec<SessionId> {
        self.registry
            .lock()
            .user_sessions
            .get(user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// True when at least one local session is subscribed to the list.
    pub fn has_subscribers(&self, list_id: ListId) -> bool {
        self.registry
            .lock()
            .list_sessions
            .get(&list_id)
            .map(|set| !set.is_empty())
            .unwrap_or(false)
    }

    /// Push an event to every subscriber of a list. Returns how many
    /// sessions it reached; closed sessions are skipped, their teardown
    /// removes them from the registry.
    pub fn deliver_to_list(&self, list_id: ListId, event: &ServerEvent) -> usize {
        let registry = self.registry.lock();
        let mut delivered = 0;
        if let Some(sessions) = registry.list_sessions.get(&list_id) {
            for session_id in sessions {
                if let Some(entry) = registry.sessions.get(session_id) {
                    if entry.sender.send(event.clone()).is_ok() {
                        delivered += 1;
                    }
                }
            }
        }
        delivered
    }

    /// Push an event to every session of one user on this node.
    pub fn deliver_to_user(&self, user_id: &UserId, event: &ServerEvent) -> usize {
        let registry = self.registry.lock();
        let mut delivered = 0;
        if let Some(sessions) = registry.user_sessions.get(user_id) {
            for session_id in sessions {
                if let Some(entry) = registry.sessions.get(session_id) {
                    if entry.sender.send(event.clone()).is_ok() {
                        delivered += 1;
                    }
                }
            }
        }
        delivered
    }

    /// Push an event to one session.
    pub fn deliver_to_session(&self, session_id: SessionId, event: ServerEvent) -> bool {
        let registry = self.registry.lock();
        registry
            .sessions
            .get(&session_id)
            .map(|entry| entry.sender.send(event).is_ok())
            .unwrap_or(false)
    }

    /// Open sessions on this node.
    pub fn connection_count(&self) -> usize {
        self.registry.lock().sessions.len()
    }

    /// Subscriber counts per list, for `/rooms`.
    pub fn room_counts(&self) -> HashMap<ListId, usize> {
        self.registry
            .lock()
            .list_sessions
            .iter()
            .map(|(list_id, sessions)| (*list_id, sessions.len()))
            .collect()
    }

    // --- L1 cache ---

    /// A clone of one cached entry.
    pub fn get_cache(&self, list_id: ListId) -> Option<ListCacheEntry> {
        self.cache.lock().get(&list_id).cloned()
    }

    /// Insert or replace one cached entry.
    pub fn put_cache(&self, entry: ListCacheEntry) {
        self.cache.lock().insert(entry.list_id, entry);
    }

    /// Run a closure against one cached entry under the lock. Returns
    /// `None` when the entry is absent.
    pub fn with_cache<T>(
        &self,
        list_id: ListId,
        f: impl FnOnce(&mut ListCacheEntry) -> T,
    ) -> Option<T> {
        self.cache.lock().get_mut(&list_id).map(f)
    }

    /// Drop one cached entry. Eviction never deletes data.
    pub fn drop_cache(&self, list_id: ListId) {
        self.cache.lock().remove(&list_id);
    }

    /// Drop every cached entry, returning the ids that were held.
    pub fn clear_cache(&self) -> Vec<ListId> {
        let mut cache = self.cache.lock();
        let ids = cache.keys().copied().collect();
        cache.clear();
        ids
    }

    /// Summaries for `/cache`.
    pub fn cache_summaries(&self) -> Vec<CacheSummary> {
        self.cache
            .lock()
            .values()
            .map(|entry| CacheSummary {
                list_id: entry.list_id,
                list_name: entry.list_name.clone(),
                live_items: entry.live_count(),
                total_items: entry.items.len(),
                rev: entry.rev,
            })
            .collect()
    }
}
