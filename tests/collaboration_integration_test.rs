// Integration tests for the collaboration fan-out path

#[cfg(test)]
mod collaboration_integration_tests {
    use std::str::FromStr;

    use tasksync::cache::StateManager;
    use tasksync::model::{CacheItem, ItemStatus, ListCacheEntry, Rev, Role, SessionId, TodoItem};
    use tasksync::protocol::ServerEvent;
    use tasksync::pubsub::{apply_message, BusMessage};
    use tokio::sync::mpsc::UnboundedReceiver;
    use uuid::Uuid;

    fn connect(state: &StateManager, user: &str) -> (SessionId, UnboundedReceiver<ServerEvent>) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        state.add_connection(session_id, user.to_string(), tx);
        (session_id, rx)
    }

    #[test]
    fn test_two_node_fanout_workflow() {
        // Two collab nodes, one list, a subscriber on each node.
        let list_id = Uuid::new_v4();
        let node_a = StateManager::new();
        let node_b = StateManager::new();
        for node in [&node_a, &node_b] {
            node.put_cache(ListCacheEntry::new(list_id, "Groceries".to_string(), Rev::ZERO));
        }

        let (session_a, mut rx_a) = connect(&node_a, "u1");
        let (session_b, mut rx_b) = connect(&node_b, "u2");
        node_a.subscribe(session_a, list_id);
        node_b.subscribe(session_b, list_id);

        // U1 adds "Bread" on node A; the commit reaches both nodes
        // through the bus, node A's own subscriber included.
        let item = TodoItem::new(list_id, "Bread".to_string(), None);
        let rev1 = Rev::from_str("1700000000.000100").unwrap();
        let message = BusMessage::ItemAdded {
            list_id,
            item: item.clone(),
            rev: rev1,
        };
        assert_eq!(apply_message(&node_a, &message), 1);
        assert_eq!(apply_message(&node_b, &message), 1);

        // Both sessions receive identical events with the same rev.
        for rx in [&mut rx_a, &mut rx_b] {
            match rx.try_recv().unwrap() {
                ServerEvent::ItemAdded {
                    list_id: got_list,
                    item: got_item,
                    rev,
                } => {
                    assert_eq!(got_list, list_id);
                    assert_eq!(got_item.name, "Bread");
                    assert_eq!(rev, rev1);
                }
                other => panic!("expected item_added, got {other:?}"),
            }
        }

        // Both L1 caches converge.
        assert_eq!(node_a.get_cache(list_id).unwrap().rev, rev1);
        assert_eq!(node_b.get_cache(list_id).unwrap().rev, rev1);
        assert_eq!(node_b.get_cache(list_id).unwrap().live_count(), 1);

        // An update follows; the observed rev sequence is increasing.
        let mut updated = item.clone();
        updated.status = ItemStatus::Completed;
        updated.done = true;
        let rev2 = Rev::from_str("1700000000.000350").unwrap();
        let message = BusMessage::ItemUpdated {
            list_id,
            item: updated,
            rev: rev2,
        };
        apply_message(&node_a, &message);
        apply_message(&node_b, &message);
        assert!(rev2 > rev1);

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.try_recv().unwrap() {
                ServerEvent::ItemUpdated { item, rev, .. } => {
                    assert_eq!(rev, rev2);
                    assert!(item.done);
                    assert_eq!(item.status, ItemStatus::Completed);
                }
                other => panic!("expected item_updated, got {other:?}"),
            }
        }

        // Delete tombstones the item everywhere but keeps the slot so
        // stale replicas can converge.
        let rev3 = Rev::from_str("1700000001.000000").unwrap();
        let message = BusMessage::ItemDeleted {
            list_id,
            item_id: item.item_id,
            rev: rev3,
        };
        apply_message(&node_a, &message);
        apply_message(&node_b, &message);

        for node in [&node_a, &node_b] {
            let entry = node.get_cache(list_id).unwrap();
            assert_eq!(entry.live_count(), 0);
            assert_eq!(entry.items.len(), 1);
            assert!(entry.items.get(&item.item_id).unwrap().is_tombstone());
            assert_eq!(entry.rev, rev3);
        }
    }

    #[test]
    fn test_out_of_order_replay_converges() {
        // A node that already applied rev N ignores an older replay but
        // still delivers it, so clients are never starved of events.
        let list_id = Uuid::new_v4();
        let node = StateManager::new();
        node.put_cache(ListCacheEntry::new(list_id, "Groceries".to_string(), Rev::ZERO));
        let (session, mut rx) = connect(&node, "u1");
        node.subscribe(session, list_id);

        let newer = TodoItem::new(list_id, "Butter".to_string(), None);
        let older = TodoItem::new(list_id, "Bread".to_string(), None);

        apply_message(
            &node,
            &BusMessage::ItemAdded {
                list_id,
                item: newer.clone(),
                rev: Rev::from_str("200.000000").unwrap(),
            },
        );
        apply_message(
            &node,
            &BusMessage::ItemAdded {
                list_id,
                item: older,
                rev: Rev::from_str("100.000000").unwrap(),
            },
        );

        // Two deliveries, but the cache kept the last-writer state.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        let entry = node.get_cache(list_id).unwrap();
        assert_eq!(entry.rev, Rev::from_str("200.000000").unwrap());
        assert_eq!(entry.live_count(), 1);
        assert!(entry.items.contains_key(&newer.item_id));
    }

    #[test]
    fn test_share_flow_reaches_target_on_remote_node() {
        // U1 shares a list on node A; U2 is connected to node B and not
        // yet subscribed. Node B seeds its cache from the carried
        // snapshot and notifies U2's sessions.
        let list_id = Uuid::new_v4();
        let node_b = StateManager::new();
        let (_session, mut rx) = connect(&node_b, "u2");

        let mut snapshot = ListCacheEntry::new(
            list_id,
            "Groceries".to_string(),
            Rev::from_str("500.000000").unwrap(),
        );
        let item = TodoItem::new(list_id, "Milk".to_string(), None);
        snapshot
            .items
            .insert(item.item_id, CacheItem::Item(item));

        let message = BusMessage::ListShared {
            list_id,
            user_id: "u2".to_string(),
            role: Role::Editor,
            snapshot: snapshot.clone(),
        };

        // The listener seeds L1 for the share target before delivery.
        node_b.put_cache(snapshot);
        let delivered = apply_message(&node_b, &message);
        assert_eq!(delivered, 1);

        match rx.try_recv().unwrap() {
            ServerEvent::ListSharedWithYou { list_id: got, message } => {
                assert_eq!(got, list_id);
                assert!(message.contains("Groceries"));
            }
            other => panic!("expected list_shared_with_you, got {other:?}"),
        }

        // U2 can immediately take a snapshot from the seeded entry.
        let entry = node_b.get_cache(list_id).unwrap();
        assert_eq!(entry.live_count(), 1);
    }

    #[test]
    fn test_list_delete_clears_every_node() {
        let list_id = Uuid::new_v4();
        let node_a = StateManager::new();
        let node_b = StateManager::new();
        for node in [&node_a, &node_b] {
            node.put_cache(ListCacheEntry::new(list_id, "Old".to_string(), Rev::ZERO));
        }
        let (session_a, mut rx_a) = connect(&node_a, "u1");
        node_a.subscribe(session_a, list_id);

        let message = BusMessage::ListDeleted { list_id };
        apply_message(&node_a, &message);
        apply_message(&node_b, &message);

        assert!(matches!(
            rx_a.try_recv().unwrap(),
            ServerEvent::ListDeleted { .. }
        ));
        assert!(node_a.get_cache(list_id).is_none());
        assert!(node_b.get_cache(list_id).is_none());
    }
}
