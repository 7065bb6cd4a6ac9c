//! # Fan-Out Bus Listener
//!
//! One long-running subscriber per process consumes the global update
//! channel and is the only path by which local sessions learn of writes,
//! this node's own included: local writes never emit directly to clients,
//! which keeps the origin and remote paths identical.
//!
//! Per message the listener mirrors the mutation into L1 (revision-gated,
//! greater wins), then pushes the corresponding outbound event to every
//! locally subscribed session. A failure inside one message handler is
//! logged and never reaches the loop.

mod message;

pub use message::BusMessage;

use crate::cache::StateManager;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::protocol::ServerEvent;
use crate::store::SharedStore;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to the running listener task.
#[derive(Clone)]
pub struct ListenerHandle {
    running: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
}

impl ListenerHandle {
    /// True while the subscription is established.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop the listener.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Spawn the listener task. It reconnects with a short backoff whenever
/// the subscription drops, until shutdown.
pub fn spawn(
    state: Arc<StateManager>,
    store: SharedStore,
    metrics: Arc<Metrics>,
) -> (ListenerHandle, JoinHandle<()>) {
    let running = Arc::new(AtomicBool::new(false));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = Listener {
        state,
        store,
        metrics,
        running: running.clone(),
        shutdown: shutdown_rx,
    };
    let join = tokio::spawn(listener.run());

    (
        ListenerHandle {
            running,
            shutdown: shutdown_tx,
        },
        join,
    )
}

struct Listener {
    state: Arc<StateManager>,
    store: SharedStore,
    metrics: Arc<Metrics>,
    running: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
}

impl Listener {
    async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            match self.consume().await {
                Ok(()) => break,
                Err(err) => {
                    self.running.store(false, Ordering::Relaxed);
                    log::error!("pub/sub subscription lost: {}, reconnecting", err);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        self.running.store(false, Ordering::Relaxed);
        log::info!("pub/sub listener stopped");
    }

    /// Subscribe and consume until shutdown or a connection failure.
    async fn consume(&mut self) -> Result<()> {
        let mut pubsub = self.store.pubsub().await?;
        pubsub.subscribe(self.store.channel()).await?;
        self.running.store(true, Ordering::Relaxed);
        log::info!("pub/sub listener subscribed to {}", self.store.channel());

        let mut stream = pubsub.on_message();
        loop {
            let message = tokio::select! {
                message = stream.next() => message,
                _ = self.shutdown.changed() => return Ok(()),
            };
            let Some(message) = message else {
                return Err(crate::error::EngineError::Transient(
                    "pub/sub stream ended".to_string(),
                ));
            };

            let payload: String = match message.get_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    Metrics::incr(&self.metrics.message_failures);
                    log::error!("undecodable pub/sub payload: {}", err);
                    continue;
                }
            };

            if let Err(err) = self.handle(&payload).await {
                Metrics::incr(&self.metrics.message_failures);
                log::error!("pub/sub handler failed: {} (payload: {})", err, payload);
            }
        }
    }

    async fn handle(&self, payload: &str) -> Result<()> {
        let message: BusMessage = serde_json::from_str(payload)?;
        Metrics::incr(&self.metrics.messages_received);

        let list_id = message.list_id();
        if self.state.get_cache(list_id).is_some() {
            let delivered = apply_message(&self.state, &message);
            Metrics::add(&self.metrics.events_delivered, delivered as u64);
            return Ok(());
        }

        // L1 does not hold the list: no delivery, but seed the entry when
        // this process has subscribers (or a local session of the share
        // target), so the next event finds warm state.
        match &message {
            BusMessage::ListShared { user_id, snapshot, .. } => {
                if !self.state.sessions_for_user(user_id).is_empty() {
                    self.state.put_cache(snapshot.clone());
                    let delivered = apply_message(&self.state, &message);
                    Metrics::add(&self.metrics.events_delivered, delivered as u64);
                }
            }
            BusMessage::ListDeleted { .. } => {
                let delivered = apply_message(&self.state, &message);
                Metrics::add(&self.metrics.events_delivered, delivered as u64);
            }
            _ if self.state.has_subscribers(list_id) => {
                if let Some(entry) = self.store.load_entry(list_id).await? {
                    self.state.put_cache(entry);
                    self.state.with_cache(list_id, |entry| {
                        apply_mutation_to_entry(entry, &message);
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn apply_mutation_to_entry(entry: &mut crate::model::ListCacheEntry, message: &BusMessage) {
    use crate::model::{CacheItem, Tombstone};
    match message {
        BusMessage::ItemAdded { item, rev, .. } | BusMessage::ItemUpdated { item, rev, .. } => {
            entry.apply_item(item.item_id, CacheItem::Item(item.clone()), *rev);
        }
        BusMessage::ItemDeleted { item_id, rev, .. } => {
            entry.apply_item(*item_id, CacheItem::Tombstone(Tombstone::new()), *rev);
        }
        BusMessage::ListShared { .. } | BusMessage::ListDeleted { .. } => {}
    }
}

/// Mirror one bus message into the L1 entry (when held) and deliver the
/// outbound event to the sessions it concerns. Returns how many sessions
/// received it.
pub fn apply_message(state: &StateManager, message: &BusMessage) -> usize {
    match message {
        BusMessage::ItemAdded { list_id, item, rev } => {
            state.with_cache(*list_id, |entry| {
                apply_mutation_to_entry(entry, message);
            });
            state.deliver_to_list(
                *list_id,
                &ServerEvent::ItemAdded {
                    list_id: *list_id,
                    item: item.clone(),
                    rev: *rev,
                },
            )
        }
        BusMessage::ItemUpdated { list_id, item, rev } => {
            state.with_cache(*list_id, |entry| {
                apply_mutation_to_entry(entry, message);
            });
            state.deliver_to_list(
                *list_id,
                &ServerEvent::ItemUpdated {
                    list_id: *list_id,
                    item: item.clone(),
                    rev: *rev,
                },
            )
        }
        BusMessage::ItemDeleted {
            list_id,
            item_id,
            rev,
        } => {
            state.with_cache(*list_id, |entry| {
                apply_mutation_to_entry(entry, message);
            });
            state.deliver_to_list(
                *list_id,
                &ServerEvent::ItemDeleted {
                    list_id: *list_id,
                    item_id: *item_id,
                    rev: *rev,
                },
            )
        }
        BusMessage::ListShared {
            list_id,
            user_id,
            snapshot,
            ..
        } => {
            // Keep the newer of the held entry and the shared snapshot.
            let stale = state
                .get_cache(*list_id)
                .map(|held| held.rev < snapshot.rev)
                .unwrap_or(false);
            if stale {
                state.put_cache(snapshot.clone());
            }
            state.deliver_to_user(
                user_id,
                &ServerEvent::ListSharedWithYou {
                    list_id: *list_id,
                    message: format!("{} was shared with you", snapshot.list_name),
                },
            )
        }
        BusMessage::ListDeleted { list_id } => {
            let delivered =
                state.deliver_to_list(*list_id, &ServerEvent::ListDeleted { list_id: *list_id });
            state.drop_cache(*list_id);
            delivered
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ListCacheEntry, Rev, Role, TodoItem};
    use proptest::prelude::*;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn connect(
        state: &StateManager,
        user: &str,
    ) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        state.add_connection(session_id, user.to_string(), tx);
        (session_id, rx)
    }

    #[test]
    fn test_item_added_applies_and_fans_out() {
        let state = StateManager::new();
        let list_id = Uuid::new_v4();
        state.put_cache(ListCacheEntry::new(list_id, "Groceries".to_string(), Rev::ZERO));

        let (s1, mut rx1) = connect(&state, "u1");
        let (s2, mut rx2) = connect(&state, "u2");
        state.subscribe(s1, list_id);
        state.subscribe(s2, list_id);

        let item = TodoItem::new(list_id, "Bread".to_string(), None);
        let rev = Rev::new(10, 0);
        let delivered = apply_message(
            &state,
            &BusMessage::ItemAdded {
                list_id,
                item: item.clone(),
                rev,
            },
        );

        assert_eq!(delivered, 2);
        for rx in [&mut rx1, &mut rx2] {
            match rx.try_recv().unwrap() {
                ServerEvent::ItemAdded { rev: got, .. } => assert_eq!(got, rev),
                other => panic!("wrong event: {other:?}"),
            }
        }
        let entry = state.get_cache(list_id).unwrap();
        assert_eq!(entry.rev, rev);
        assert_eq!(entry.live_count(), 1);
    }

    #[test]
    fn test_replayed_message_delivers_but_applies_once() {
        let state = StateManager::new();
        let list_id = Uuid::new_v4();
        state.put_cache(ListCacheEntry::new(list_id, "Groceries".to_string(), Rev::ZERO));
        let (s1, mut rx1) = connect(&state, "u1");
        state.subscribe(s1, list_id);

        let item = TodoItem::new(list_id, "Bread".to_string(), None);
        let message = BusMessage::ItemAdded {
            list_id,
            item,
            rev: Rev::new(10, 0),
        };
        apply_message(&state, &message);
        apply_message(&state, &message);

        // Both deliveries happened, but the entry advanced only once.
        assert!(rx1.try_recv().is_ok());
        assert!(rx1.try_recv().is_ok());
        assert_eq!(state.get_cache(list_id).unwrap().rev, Rev::new(10, 0));
        assert_eq!(state.get_cache(list_id).unwrap().live_count(), 1);
    }

    #[test]
    fn test_delete_leaves_tombstone() {
        let state = StateManager::new();
        let list_id = Uuid::new_v4();
        let mut entry = ListCacheEntry::new(list_id, "Groceries".to_string(), Rev::ZERO);
        let item = TodoItem::new(list_id, "Bread".to_string(), None);
        let item_id = item.item_id;
        entry.apply_item(item_id, crate::model::CacheItem::Item(item), Rev::new(1, 0));
        state.put_cache(entry);

        apply_message(
            &state,
            &BusMessage::ItemDeleted {
                list_id,
                item_id,
                rev: Rev::new(2, 0),
            },
        );

        let entry = state.get_cache(list_id).unwrap();
        assert_eq!(entry.live_count(), 0);
        assert!(entry.items.get(&item_id).unwrap().is_tombstone());
    }

    #[test]
    fn test_share_reaches_target_user_only() {
        let state = StateManager::new();
        let list_id = Uuid::new_v4();
        let (_a, mut rx_target) = connect(&state, "u2");
        let (_b, mut rx_other) = connect(&state, "u3");

        let snapshot = ListCacheEntry::new(list_id, "Groceries".to_string(), Rev::new(5, 0));
        let delivered = apply_message(
            &state,
            &BusMessage::ListShared {
                list_id,
                user_id: "u2".to_string(),
                role: Role::Editor,
                snapshot,
            },
        );

        assert_eq!(delivered, 1);
        match rx_target.try_recv().unwrap() {
            ServerEvent::ListSharedWithYou { message, .. } => {
                assert!(message.contains("Groceries"));
            }
            other => panic!("wrong event: {other:?}"),
        }
        assert!(rx_other.try_recv().is_err());
    }

    #[test]
    fn test_list_deleted_notifies_then_drops_cache() {
        let state = StateManager::new();
        let list_id = Uuid::new_v4();
        state.put_cache(ListCacheEntry::new(list_id, "Groceries".to_string(), Rev::ZERO));
        let (s1, mut rx1) = connect(&state, "u1");
        state.subscribe(s1, list_id);

        apply_message(&state, &BusMessage::ListDeleted { list_id });

        assert!(matches!(
            rx1.try_recv().unwrap(),
            ServerEvent::ListDeleted { .. }
        ));
        assert!(state.get_cache(list_id).is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Every session subscribed before a write receives exactly one
        /// event carrying the committed revision.
        #[test]
        fn prop_fanout_completeness(subscribers in 0usize..12, bystanders in 0usize..4) {
            let state = StateManager::new();
            let list_id = Uuid::new_v4();
            state.put_cache(ListCacheEntry::new(list_id, "L".to_string(), Rev::ZERO));

            let mut subscribed = Vec::new();
            for i in 0..subscribers {
                let (sid, rx) = connect(&state, &format!("u{i}"));
                state.subscribe(sid, list_id);
                subscribed.push(rx);
            }
            let mut others = Vec::new();
            for i in 0..bystanders {
                let (_sid, rx) = connect(&state, &format!("b{i}"));
                others.push(rx);
            }

            let rev = Rev::new(42, 7);
            let item = TodoItem::new(list_id, "x".to_string(), None);
            let delivered = apply_message(&state, &BusMessage::ItemAdded { list_id, item, rev });
            prop_assert_eq!(delivered, subscribers);

            for rx in subscribed.iter_mut() {
                match rx.try_recv() {
                    Ok(ServerEvent::ItemAdded { rev: got, .. }) => prop_assert_eq!(got, rev),
                    other => panic!("expected item_added, got {other:?}"),
                }
                prop_assert!(rx.try_recv().is_err(), "second event delivered");
            }
            for rx in others.iter_mut() {
                prop_assert!(rx.try_recv().is_err(), "bystander received an event");
            }
        }
    }
}
