//! Live sync adapter: change-feed subscriptions merged into a shared view.
//!
//! Each subscription is a spawned delivery task holding its own broadcast
//! receiver.  [`LiveSync`] keeps the tasks in an arena keyed by (room,
//! table): subscribing on an occupied key releases the old task first, so a
//! view can never receive the same event twice through leaked handles.
//!
//! The adapter never retries on its own.  A lagged feed surfaces
//! [`SyncUpdate::Degraded`] and a closed feed [`SyncUpdate::Disconnected`];
//! the caller falls back to coordinator reads plus `RoomView::reset_*`.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use studyhall_backend::BackendHandle;
use studyhall_shared::protocol::{ChangeEvent, Table};
use studyhall_shared::types::RoomId;

use crate::error::{SyncError, SyncResult};
use crate::events::SyncUpdate;
use crate::state::{Applied, SharedRoomView};

/// Key of one live subscription: one room, one table.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub room_id: RoomId,
    pub table: Table,
}

impl SubscriptionKey {
    pub fn new(room_id: RoomId, table: Table) -> Self {
        Self { room_id, table }
    }
}

/// Arena of live change-feed subscriptions.
#[derive(Debug)]
pub struct LiveSync {
    backend: BackendHandle,
    handles: HashMap<SubscriptionKey, JoinHandle<()>>,
}

impl LiveSync {
    pub fn new(backend: BackendHandle) -> Self {
        Self {
            backend,
            handles: HashMap::new(),
        }
    }

    /// Register a delivery task for `key`, merging matching events into
    /// `view` and notifying `updates`.
    ///
    /// One live handle per key: an existing subscription on the same key is
    /// released first.
    pub async fn subscribe(
        &mut self,
        key: SubscriptionKey,
        view: SharedRoomView,
        updates: mpsc::Sender<SyncUpdate>,
    ) -> SyncResult<()> {
        if self.unsubscribe(key) {
            debug!(room = %key.room_id, table = ?key.table, "released previous subscription");
        }

        let feed = self
            .backend
            .subscribe_feed()
            .await
            .map_err(|e| SyncError::FeedUnavailable(e.to_string()))?;

        let task = tokio::spawn(deliver_events(key, feed, view, updates));
        self.handles.insert(key, task);
        debug!(room = %key.room_id, table = ?key.table, "subscription registered");
        Ok(())
    }

    /// Stop delivery for `key`.  Returns whether a subscription existed.
    pub fn unsubscribe(&mut self, key: SubscriptionKey) -> bool {
        match self.handles.remove(&key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Stop delivery for every key.
    pub fn release_all(&mut self) {
        for (key, handle) in self.handles.drain() {
            debug!(room = %key.room_id, table = ?key.table, "releasing subscription");
            handle.abort();
        }
    }

    /// Number of delivery tasks still running.
    pub fn active_handles(&self) -> usize {
        self.handles.values().filter(|h| !h.is_finished()).count()
    }
}

impl Drop for LiveSync {
    fn drop(&mut self) {
        // Drop cannot await a graceful stop; aborting the delivery tasks is
        // the only way to guarantee nothing outlives the adapter.
        self.release_all();
    }
}

/// Delivery loop of one subscription.  Ends when the feed closes, the
/// update receiver goes away, or the task is aborted.
async fn deliver_events(
    key: SubscriptionKey,
    mut feed: broadcast::Receiver<ChangeEvent>,
    view: SharedRoomView,
    updates: mpsc::Sender<SyncUpdate>,
) {
    loop {
        match feed.recv().await {
            Ok(event) => {
                if event.row.room_id() != key.room_id || event.row.table() != key.table {
                    continue;
                }

                let op = event.op;
                let applied = {
                    let mut guard = match view.lock() {
                        Ok(guard) => guard,
                        Err(_) => {
                            warn!(room = %key.room_id, "room view lock poisoned, ending delivery");
                            return;
                        }
                    };
                    guard.apply(event)
                };

                // Replays and optimistic echoes change nothing; stay quiet.
                if applied == Applied::Ignored {
                    continue;
                }

                if updates
                    .send(SyncUpdate::Changed { key, op, applied })
                    .await
                    .is_err()
                {
                    debug!(room = %key.room_id, "update receiver dropped, ending delivery");
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(
                    room = %key.room_id,
                    table = ?key.table,
                    missed,
                    "change feed lagged, local view may be stale"
                );
                if updates
                    .send(SyncUpdate::Degraded { key, missed })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Closed) => {
                info!(room = %key.room_id, table = ?key.table, "change feed closed");
                let _ = updates.send(SyncUpdate::Disconnected { key }).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RoomView;
    use std::time::Duration;
    use studyhall_backend::{spawn_backend, BackendConfig, DatabaseLocation};
    use studyhall_shared::model::RoomSpec;
    use studyhall_shared::protocol::{ChangeOp, SendReply};
    use studyhall_shared::types::UserId;
    use tokio::time::timeout;
    use uuid::Uuid;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    async fn test_backend(feed_capacity: Option<usize>) -> BackendHandle {
        let mut config = BackendConfig {
            location: DatabaseLocation::InMemory,
            ..BackendConfig::default()
        };
        if let Some(capacity) = feed_capacity {
            config.feed_capacity = capacity;
        }
        spawn_backend(config).await.unwrap()
    }

    fn spec(name: &str, max_members: u32) -> RoomSpec {
        RoomSpec {
            name: name.to_string(),
            description: None,
            subject: None,
            is_public: true,
            max_members,
        }
    }

    async fn recv_update(rx: &mut mpsc::Receiver<SyncUpdate>) -> SyncUpdate {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for sync update")
            .expect("update channel closed")
    }

    #[tokio::test]
    async fn test_feed_events_update_shared_view() {
        init_tracing();
        let backend = test_backend(None).await;
        let created = backend
            .create_room_and_join(UserId::new(), spec("sync room", 4))
            .await
            .unwrap();
        let room_id = created.room.id;

        let mut sync = LiveSync::new(backend.clone());
        let view = RoomView::shared(room_id);
        let (tx, mut rx) = mpsc::channel(16);
        sync.subscribe(SubscriptionKey::new(room_id, Table::Members), view.clone(), tx)
            .await
            .unwrap();

        let joiner = UserId::new();
        backend.join_room(joiner, room_id).await.unwrap();

        match recv_update(&mut rx).await {
            SyncUpdate::Changed { op, applied, .. } => {
                assert_eq!(op, ChangeOp::Insert);
                assert_eq!(applied, Applied::Inserted);
            }
            other => panic!("unexpected update {other:?}"),
        }
        assert!(view.lock().unwrap().is_member(joiner));
    }

    #[tokio::test]
    async fn test_resubscribe_releases_previous_handle() {
        let backend = test_backend(None).await;
        let created = backend
            .create_room_and_join(UserId::new(), spec("arena", 4))
            .await
            .unwrap();
        let key = SubscriptionKey::new(created.room.id, Table::Members);

        let mut sync = LiveSync::new(backend.clone());
        let view = RoomView::shared(created.room.id);
        let (tx, _rx) = mpsc::channel(16);

        sync.subscribe(key, view.clone(), tx.clone()).await.unwrap();
        sync.subscribe(key, view, tx).await.unwrap();
        assert_eq!(sync.active_handles(), 1);

        assert!(sync.unsubscribe(key));
        assert!(!sync.unsubscribe(key));
        assert_eq!(sync.active_handles(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let backend = test_backend(None).await;
        let created = backend
            .create_room_and_join(UserId::new(), spec("quiet", 4))
            .await
            .unwrap();
        let room_id = created.room.id;
        let key = SubscriptionKey::new(room_id, Table::Members);

        let mut sync = LiveSync::new(backend.clone());
        let view = RoomView::shared(room_id);
        let (tx, mut rx) = mpsc::channel(16);
        sync.subscribe(key, view.clone(), tx).await.unwrap();

        assert!(sync.unsubscribe(key));
        // The aborted task drops its sender, so the channel drains to None.
        let ended = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(ended, None);

        backend.join_room(UserId::new(), room_id).await.unwrap();
        assert_eq!(view.lock().unwrap().member_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_releases_all_handles() {
        let backend = test_backend(None).await;
        let created = backend
            .create_room_and_join(UserId::new(), spec("scoped", 4))
            .await
            .unwrap();
        let room_id = created.room.id;

        let view = RoomView::shared(room_id);
        let (tx, mut rx) = mpsc::channel(16);
        {
            let mut sync = LiveSync::new(backend.clone());
            sync.subscribe(
                SubscriptionKey::new(room_id, Table::Members),
                view.clone(),
                tx.clone(),
            )
            .await
            .unwrap();
            sync.subscribe(SubscriptionKey::new(room_id, Table::Messages), view, tx)
                .await
                .unwrap();
            assert_eq!(sync.active_handles(), 2);
        }

        let ended = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(ended, None);
    }

    #[tokio::test]
    async fn test_lagged_feed_surfaces_degraded_then_recovers_by_reset() {
        init_tracing();
        let backend = test_backend(Some(2)).await;
        let created = backend
            .create_room_and_join(UserId::new(), spec("busy", 16))
            .await
            .unwrap();
        let room_id = created.room.id;

        let mut sync = LiveSync::new(backend.clone());
        let view = RoomView::shared(room_id);
        // Capacity 1 stalls the delivery task mid-send while the tiny feed
        // buffer overflows behind it.
        let (tx, mut rx) = mpsc::channel(1);
        sync.subscribe(SubscriptionKey::new(room_id, Table::Members), view.clone(), tx)
            .await
            .unwrap();

        for _ in 0..6 {
            backend.join_room(UserId::new(), room_id).await.unwrap();
        }

        let mut missed = None;
        for _ in 0..8 {
            if let SyncUpdate::Degraded { missed: n, .. } = recv_update(&mut rx).await {
                missed = Some(n);
                break;
            }
        }
        assert!(missed.unwrap_or(0) > 0, "feed should have lagged");

        // Documented fallback: re-fetch authoritative rows and reset.
        let members = backend.members(room_id).await.unwrap();
        view.lock().unwrap().reset_members(members);
        assert_eq!(view.lock().unwrap().member_count(), 7);
    }

    #[tokio::test]
    async fn test_backend_shutdown_surfaces_disconnected() {
        let backend = test_backend(None).await;
        let created = backend
            .create_room_and_join(UserId::new(), spec("closing", 4))
            .await
            .unwrap();
        let key = SubscriptionKey::new(created.room.id, Table::Members);

        let mut sync = LiveSync::new(backend.clone());
        let view = RoomView::shared(created.room.id);
        let (tx, mut rx) = mpsc::channel(16);
        sync.subscribe(key, view, tx).await.unwrap();

        backend.shutdown().await;

        match recv_update(&mut rx).await {
            SyncUpdate::Disconnected { key: ended } => assert_eq!(ended, key),
            other => panic!("unexpected update {other:?}"),
        }
        let ended = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(ended, None);
    }

    #[tokio::test]
    async fn test_subscribe_after_shutdown_fails() {
        let backend = test_backend(None).await;
        backend.shutdown().await;

        let mut sync = LiveSync::new(backend);
        let room_id = studyhall_shared::types::RoomId::new();
        let (tx, _rx) = mpsc::channel(1);
        let err = sync
            .subscribe(
                SubscriptionKey::new(room_id, Table::Members),
                RoomView::shared(room_id),
                tx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::FeedUnavailable(_)));
    }

    #[tokio::test]
    async fn test_optimistic_message_echo_is_not_duplicated() {
        let backend = test_backend(None).await;
        let creator = UserId::new();
        let created = backend
            .create_room_and_join(creator, spec("chat", 4))
            .await
            .unwrap();
        let room_id = created.room.id;

        let mut sync = LiveSync::new(backend.clone());
        let view = RoomView::shared(room_id);
        let (tx, mut rx) = mpsc::channel(16);
        sync.subscribe(SubscriptionKey::new(room_id, Table::Messages), view.clone(), tx)
            .await
            .unwrap();

        let reply = backend
            .send_message(creator, room_id, Uuid::new_v4(), "first".to_string())
            .await
            .unwrap();
        let message = match reply {
            SendReply::Sent(message) => message,
            other => panic!("unexpected reply {other:?}"),
        };
        // Optimistic path: show the canonical row before the feed echoes it.
        view.lock().unwrap().insert_local_message(message.clone());

        backend
            .send_message(creator, room_id, Uuid::new_v4(), "second".to_string())
            .await
            .unwrap();

        // By the time the second message lands in the view, the first one's
        // echo has been merged too (delivery is serial per subscription).
        for _ in 0..4 {
            recv_update(&mut rx).await;
            if view.lock().unwrap().messages().len() == 2 {
                break;
            }
        }

        let guard = view.lock().unwrap();
        assert_eq!(guard.messages().len(), 2);
        assert_eq!(
            guard
                .messages()
                .iter()
                .filter(|m| m.id == message.id)
                .count(),
            1
        );
    }
}
