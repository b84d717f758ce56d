//! Deltas the sync delivery tasks forward to the presentation layer.

use serde::Serialize;

use studyhall_shared::protocol::ChangeOp;

use crate::state::Applied;
use crate::sync::SubscriptionKey;

/// One notification on a subscription's update channel.
///
/// `Changed` is sent only when a feed event actually altered the shared
/// view; replays and echoes of optimistic rows merge as ignored and stay
/// silent.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncUpdate {
    /// A feed event was merged into the shared view.
    Changed {
        key: SubscriptionKey,
        op: ChangeOp,
        applied: Applied,
    },
    /// The feed fell behind and `missed` events were dropped.  The view may
    /// be stale until the caller re-fetches and resets it.
    Degraded { key: SubscriptionKey, missed: u64 },
    /// The feed closed; delivery for this key has ended.
    Disconnected { key: SubscriptionKey },
}

#[cfg(test)]
mod tests {
    use super::*;
    use studyhall_shared::protocol::Table;
    use studyhall_shared::types::RoomId;

    #[test]
    fn test_updates_serialize_for_the_ui_layer() {
        let key = SubscriptionKey::new(RoomId::new(), Table::Messages);
        let update = SyncUpdate::Changed {
            key,
            op: ChangeOp::Insert,
            applied: Applied::Inserted,
        };

        let value = serde_json::to_value(update).unwrap();
        assert_eq!(value["kind"], "changed");
        assert_eq!(value["op"], "insert");
        assert_eq!(value["applied"], "inserted");
        assert_eq!(value["key"]["table"], "messages");
    }
}
