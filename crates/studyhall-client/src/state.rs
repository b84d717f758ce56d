//! Local, eventually-consistent projection of one room.
//!
//! [`RoomView`] merges change-feed events by primary key: inserts
//! de-duplicate, updates replace, deletes remove, and anything referring to
//! an unknown id is a silent no-op.  That makes the merge idempotent and
//! order-tolerant, which is what lets optimistic local inserts coexist with
//! the server's confirming echo.
//!
//! The view is wrapped in `Arc<Mutex<>>` ([`SharedRoomView`]) so the sync
//! delivery task and the presentation layer can share it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use uuid::Uuid;

use studyhall_shared::constants::DEFAULT_MESSAGE_WINDOW;
use studyhall_shared::model::{JoinRequest, Membership, Message, Room};
use studyhall_shared::protocol::{ChangeEvent, ChangeOp, RowChange};
use studyhall_shared::types::{RoomId, UserId};

/// What a merge did to local state.  `Ignored` covers replayed inserts,
/// echoes of optimistic rows, and updates/deletes for rows outside the
/// local window.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Applied {
    Inserted,
    Updated,
    Removed,
    Ignored,
}

/// A room view shared between the sync task and the presentation layer.
pub type SharedRoomView = Arc<Mutex<RoomView>>;

/// One room's local state: the room row, its members, a bounded window of
/// messages, and any join requests visible to the caller.
#[derive(Debug)]
pub struct RoomView {
    room_id: RoomId,
    room: Option<Room>,
    members: Vec<Membership>,
    messages: VecDeque<Message>,
    requests: Vec<JoinRequest>,
    message_window: usize,
}

impl RoomView {
    pub fn new(room_id: RoomId) -> Self {
        Self::with_message_window(room_id, DEFAULT_MESSAGE_WINDOW)
    }

    /// A view keeping at most `window` messages (oldest evicted first).
    /// Clamped to at least 1.
    pub fn with_message_window(room_id: RoomId, window: usize) -> Self {
        Self {
            room_id,
            room: None,
            members: Vec::new(),
            messages: VecDeque::new(),
            requests: Vec::new(),
            message_window: window.max(1),
        }
    }

    pub fn shared(room_id: RoomId) -> SharedRoomView {
        Arc::new(Mutex::new(Self::new(room_id)))
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn room(&self) -> Option<&Room> {
        self.room.as_ref()
    }

    pub fn members(&self) -> &[Membership] {
        &self.members
    }

    /// Messages in arrival order, oldest first.
    pub fn messages(&self) -> &VecDeque<Message> {
        &self.messages
    }

    pub fn requests(&self) -> &[JoinRequest] {
        &self.requests
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_member(&self, user_id: UserId) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }

    // -----------------------------------------------------------------------
    // Merging
    // -----------------------------------------------------------------------

    /// Merge one change-feed event into the view.
    ///
    /// Events for other rooms are ignored; the subscription filter normally
    /// keeps them out, but the view stays correct without it.
    pub fn apply(&mut self, event: ChangeEvent) -> Applied {
        if event.row.room_id() != self.room_id {
            return Applied::Ignored;
        }

        let ChangeEvent { op, row } = event;
        match row {
            RowChange::Room(room) => self.merge_room(op, room),
            RowChange::Member(membership) => merge_row(&mut self.members, op, membership, |m| m.id),
            RowChange::Message(message) => self.merge_message(op, message),
            RowChange::Request(request) => merge_row(&mut self.requests, op, request, |r| r.id),
        }
    }

    /// Optimistically insert a locally-sent message before the feed confirms
    /// it.  The server's echo carries the same id and merges as `Ignored`.
    pub fn insert_local_message(&mut self, message: Message) -> Applied {
        if message.room_id != self.room_id {
            return Applied::Ignored;
        }
        self.merge_message(ChangeOp::Insert, message)
    }

    fn merge_room(&mut self, op: ChangeOp, room: Room) -> Applied {
        match op {
            ChangeOp::Insert | ChangeOp::Update => match &self.room {
                Some(current) if *current == room => Applied::Ignored,
                Some(_) => {
                    self.room = Some(room);
                    Applied::Updated
                }
                None => {
                    self.room = Some(room);
                    Applied::Inserted
                }
            },
            ChangeOp::Delete => {
                if self.room.take().is_some() {
                    Applied::Removed
                } else {
                    Applied::Ignored
                }
            }
        }
    }

    fn merge_message(&mut self, op: ChangeOp, message: Message) -> Applied {
        let existing = self.messages.iter().position(|m| m.id == message.id);
        match (op, existing) {
            (ChangeOp::Insert | ChangeOp::Update, Some(idx)) => {
                if self.messages[idx] == message {
                    Applied::Ignored
                } else {
                    self.messages[idx] = message;
                    Applied::Updated
                }
            }
            (ChangeOp::Insert, None) => {
                self.messages.push_back(message);
                if self.messages.len() > self.message_window {
                    self.messages.pop_front();
                }
                Applied::Inserted
            }
            (ChangeOp::Update, None) | (ChangeOp::Delete, None) => Applied::Ignored,
            (ChangeOp::Delete, Some(idx)) => {
                self.messages.remove(idx);
                Applied::Removed
            }
        }
    }

    // -----------------------------------------------------------------------
    // Bulk loads
    // -----------------------------------------------------------------------

    /// Replace the room row, typically from the initial fetch.
    pub fn set_room(&mut self, room: Room) {
        self.room = Some(room);
    }

    pub fn reset_members(&mut self, rows: Vec<Membership>) {
        self.members = rows;
    }

    /// Replace the message window with rows ordered oldest first, keeping
    /// only the newest `message_window` of them.
    pub fn reset_messages(&mut self, rows: Vec<Message>) {
        let skip = rows.len().saturating_sub(self.message_window);
        self.messages = rows.into_iter().skip(skip).collect();
    }

    pub fn reset_requests(&mut self, rows: Vec<JoinRequest>) {
        self.requests = rows;
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Merge one row into a keyed collection under the view's policy: inserts
/// upsert by id, updates replace existing rows only, deletes remove, and
/// unknown ids are ignored.
fn merge_row<T: PartialEq>(rows: &mut Vec<T>, op: ChangeOp, row: T, key: fn(&T) -> Uuid) -> Applied {
    let existing = rows.iter().position(|r| key(r) == key(&row));
    match (op, existing) {
        (ChangeOp::Insert | ChangeOp::Update, Some(idx)) => {
            if rows[idx] == row {
                Applied::Ignored
            } else {
                rows[idx] = row;
                Applied::Updated
            }
        }
        (ChangeOp::Insert, None) => {
            rows.push(row);
            Applied::Inserted
        }
        (ChangeOp::Update, None) | (ChangeOp::Delete, None) => Applied::Ignored,
        (ChangeOp::Delete, Some(idx)) => {
            rows.remove(idx);
            Applied::Removed
        }
    }
}
