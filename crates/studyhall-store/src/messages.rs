//! Message procedures.
//!
//! Message ids are supplied by the caller, so an optimistic local copy and
//! the confirming feed event share one identity and reconcile by merge.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use studyhall_shared::model::Message;
use studyhall_shared::protocol::SendReply;
use studyhall_shared::types::{RoomId, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::members::membership_row;
use crate::rooms::room_row;

impl Database {
    /// Persist a message.  Only members of an active room may post; the
    /// membership check and the insert commit together.
    pub fn insert_message(
        &mut self,
        sender: UserId,
        room_id: RoomId,
        message_id: Uuid,
        content: &str,
    ) -> Result<SendReply> {
        let tx = self.conn_mut().transaction()?;

        match room_row(&tx, room_id)? {
            Some(room) if room.is_active => {}
            _ => return Ok(SendReply::NotFound),
        }
        if membership_row(&tx, room_id, sender)?.is_none() {
            return Ok(SendReply::NotMember);
        }

        let message = Message {
            id: message_id,
            room_id,
            sender_id: sender,
            content: content.to_string(),
            sent_at: Utc::now(),
        };

        tx.execute(
            "INSERT INTO messages (id, room_id, sender_id, content, sent_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id.to_string(),
                message.room_id.to_string(),
                message.sender_id.to_string(),
                message.content,
                message.sent_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        Ok(SendReply::Sent(message))
    }

    /// The latest `limit` messages of a room, returned oldest first so they
    /// can be appended straight into a display window.
    pub fn messages_for_room(&self, room_id: RoomId, limit: u32) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, room_id, sender_id, content, sent_at
             FROM messages
             WHERE room_id = ?1
             ORDER BY sent_at DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![room_id.to_string(), limit], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        messages.reverse();
        Ok(messages)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Message`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let room_str: String = row.get(1)?;
    let sender_str: String = row.get(2)?;
    let content: String = row.get(3)?;
    let sent_str: String = row.get(4)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let room_id = RoomId::parse(&room_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let sender_id = UserId::parse(&sender_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let sent_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&sent_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id,
        room_id,
        sender_id,
        content,
        sent_at,
    })
}
