//! Wire contract between the backend service and its clients: the row-level
//! change-feed events and the typed replies of every stored procedure.
//!
//! Every reply is a closed enum, so no loosely-shaped value crosses the
//! service boundary.  Business outcomes (full room, private room, duplicate
//! join) are reply variants, not errors; only mechanical failures travel as
//! errors.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{JoinRequest, Membership, Message, Room};
use crate::types::{RequestStatus, RoomId};

// ---------------------------------------------------------------------------
// Change feed
// ---------------------------------------------------------------------------

/// Tables covered by the change feed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Rooms,
    Members,
    Messages,
    Requests,
}

/// Row-level operation carried by a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// The affected row, carried whole so a subscriber can merge it into local
/// state without a follow-up read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RowChange {
    Room(Room),
    Member(Membership),
    Message(Message),
    Request(JoinRequest),
}

impl RowChange {
    pub fn table(&self) -> Table {
        match self {
            Self::Room(_) => Table::Rooms,
            Self::Member(_) => Table::Members,
            Self::Message(_) => Table::Messages,
            Self::Request(_) => Table::Requests,
        }
    }

    /// Primary key of the affected row; local merges reconcile by this id.
    pub fn id(&self) -> Uuid {
        match self {
            Self::Room(room) => room.id.0,
            Self::Member(membership) => membership.id,
            Self::Message(message) => message.id,
            Self::Request(request) => request.id,
        }
    }

    /// Room the row belongs to; subscriptions filter by this.
    pub fn room_id(&self) -> RoomId {
        match self {
            Self::Room(room) => room.id,
            Self::Member(membership) => membership.room_id,
            Self::Message(message) => message.room_id,
            Self::Request(request) => request.room_id,
        }
    }
}

/// One row-level change published on the backend change feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEvent {
    pub op: ChangeOp,
    pub row: RowChange,
}

impl ChangeEvent {
    pub fn insert(row: RowChange) -> Self {
        Self {
            op: ChangeOp::Insert,
            row,
        }
    }

    pub fn update(row: RowChange) -> Self {
        Self {
            op: ChangeOp::Update,
            row,
        }
    }

    pub fn delete(row: RowChange) -> Self {
        Self {
            op: ChangeOp::Delete,
            row,
        }
    }
}

// ---------------------------------------------------------------------------
// Procedure replies
// ---------------------------------------------------------------------------

/// Result of the atomic create-and-join procedure.  Both rows were committed
/// in the same transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateReply {
    pub room: Room,
    pub membership: Membership,
}

/// Result of the atomic join procedure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JoinReply {
    /// A fresh membership row was inserted.
    Joined { room: Room, membership: Membership },
    /// The caller already held a row; nothing changed.
    AlreadyMember { room: Room, membership: Membership },
    /// No active room with this id.
    NotFound,
    /// The room is private and the caller is not a member.
    Private,
    /// The room is at its member limit.
    Full,
}

/// Result of the join-code validation procedure.  Codes of inactive rooms
/// validate as `Invalid`, indistinguishable from codes that never existed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CodeValidation {
    Valid(RoomId),
    Invalid,
}

/// Result of the leave procedure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum LeaveReply {
    /// The removed row.
    Left(Membership),
    /// The caller held no row; nothing changed.
    NotMember,
}

/// Result of the message-send procedure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SendReply {
    /// The canonical persisted row.
    Sent(Message),
    /// The sender holds no membership in this room.
    NotMember,
    /// No active room with this id.
    NotFound,
}

/// Result of the creator-only room mutations (edit, code regeneration,
/// soft delete).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MutateReply {
    /// The room row after the mutation.
    Updated(Room),
    /// The caller is not the room's creator.
    NotCreator,
    /// No active room with this id.
    NotFound,
}

/// Result of the request-to-join procedure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RequestReply {
    /// A pending request now exists (fresh, or reopened after the requester
    /// was admitted and later left).
    Requested(JoinRequest),
    /// A pending request already existed; nothing changed.
    AlreadyPending(JoinRequest),
    /// The caller is already a member; no request is needed.
    AlreadyMember(Membership),
    /// An earlier request for this pair was declined, which is terminal.
    Declined,
    /// No active room with this id.
    NotFound,
}

/// Result of an admin resolving a join request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ResolveReply {
    /// The requester was admitted and the request marked accepted, in one
    /// transaction.
    Approved {
        request: JoinRequest,
        membership: Membership,
    },
    /// The request was marked declined (terminal).
    Declined(JoinRequest),
    /// An earlier resolution already settled this request; nothing changed.
    AlreadyResolved(RequestStatus),
    /// The room is at capacity; the request stays pending.
    Full,
    /// The caller holds no admin membership in the request's room.
    NotAdmin,
    /// No such request, or its room is gone.
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::JoinCode;
    use crate::types::{RoomRole, UserId};
    use chrono::Utc;

    fn sample_room() -> Room {
        Room {
            id: RoomId::new(),
            short_code: JoinCode::parse("AB3K9Q").unwrap(),
            name: "Thermodynamics".to_string(),
            description: None,
            subject: Some("physics".to_string()),
            max_members: 6,
            is_public: true,
            creator_id: UserId::new(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_row_change_accessors() {
        let room = sample_room();
        let membership = Membership {
            id: Uuid::new_v4(),
            room_id: room.id,
            user_id: UserId::new(),
            role: RoomRole::Member,
            joined_at: Utc::now(),
        };

        let row = RowChange::Room(room.clone());
        assert_eq!(row.table(), Table::Rooms);
        assert_eq!(row.id(), room.id.0);
        assert_eq!(row.room_id(), room.id);

        let row = RowChange::Member(membership.clone());
        assert_eq!(row.table(), Table::Members);
        assert_eq!(row.id(), membership.id);
        assert_eq!(row.room_id(), room.id);
    }

    #[test]
    fn test_change_event_constructors() {
        let room = sample_room();
        let event = ChangeEvent::update(RowChange::Room(room));
        assert_eq!(event.op, ChangeOp::Update);
        assert_eq!(event.row.table(), Table::Rooms);
    }

    #[test]
    fn test_events_serialize_for_the_ui_layer() {
        let event = ChangeEvent::insert(RowChange::Room(sample_room()));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["op"], "insert");
        assert_eq!(value["row"]["Room"]["name"], "Thermodynamics");
    }
}
