//! Membership procedures: the capacity-checked join, the idempotent leave,
//! and membership reads.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use studyhall_shared::model::Membership;
use studyhall_shared::protocol::{JoinReply, LeaveReply};
use studyhall_shared::types::{RoomId, RoomRole, UserId};

use crate::database::{optional, Database};
use crate::error::Result;
use crate::rooms::room_row;

impl Database {
    // ------------------------------------------------------------------
    // Procedures
    // ------------------------------------------------------------------

    /// Join a room as a regular member.
    ///
    /// Every check (room active, existing membership, visibility, capacity)
    /// and the insert run inside one transaction, so two concurrent joins
    /// can never both take the last slot.  A caller who already holds a row
    /// gets `AlreadyMember` back unchanged, whatever the room's visibility
    /// or occupancy.
    pub fn join_room(&mut self, caller: UserId, room_id: RoomId) -> Result<JoinReply> {
        let tx = self.conn_mut().transaction()?;

        let room = match room_row(&tx, room_id)? {
            Some(room) if room.is_active => room,
            _ => return Ok(JoinReply::NotFound),
        };

        if let Some(membership) = membership_row(&tx, room_id, caller)? {
            return Ok(JoinReply::AlreadyMember { room, membership });
        }

        if !room.is_public {
            return Ok(JoinReply::Private);
        }

        if member_count_in(&tx, room_id)? >= room.max_members {
            return Ok(JoinReply::Full);
        }

        let membership = insert_member(&tx, room_id, caller, RoomRole::Member)?;
        tx.commit()?;

        Ok(JoinReply::Joined { room, membership })
    }

    /// Remove the caller's own membership row.  Leaving a room the caller
    /// never joined reports `NotMember` rather than failing, so the call is
    /// safe to repeat.
    pub fn leave_room(&mut self, caller: UserId, room_id: RoomId) -> Result<LeaveReply> {
        let tx = self.conn_mut().transaction()?;

        let membership = match membership_row(&tx, room_id, caller)? {
            Some(membership) => membership,
            None => return Ok(LeaveReply::NotMember),
        };

        tx.execute(
            "DELETE FROM room_members WHERE id = ?1",
            params![membership.id.to_string()],
        )?;
        tx.commit()?;

        Ok(LeaveReply::Left(membership))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Current number of members in a room.
    pub fn member_count(&self, room_id: RoomId) -> Result<u32> {
        member_count_in(self.conn(), room_id)
    }

    /// List a room's members, earliest joiner first.
    pub fn members_for_room(&self, room_id: RoomId) -> Result<Vec<Membership>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, room_id, user_id, role, joined_at
             FROM room_members
             WHERE room_id = ?1
             ORDER BY joined_at ASC",
        )?;

        let rows = stmt.query_map(params![room_id.to_string()], row_to_membership)?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    /// Fetch one user's membership in one room, if any.
    pub fn membership(&self, room_id: RoomId, user_id: UserId) -> Result<Option<Membership>> {
        membership_row(self.conn(), room_id, user_id)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn membership_row(
    conn: &Connection,
    room_id: RoomId,
    user_id: UserId,
) -> Result<Option<Membership>> {
    optional(conn.query_row(
        "SELECT id, room_id, user_id, role, joined_at
         FROM room_members
         WHERE room_id = ?1 AND user_id = ?2",
        params![room_id.to_string(), user_id.to_string()],
        row_to_membership,
    ))
}

pub(crate) fn member_count_in(conn: &Connection, room_id: RoomId) -> Result<u32> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM room_members WHERE room_id = ?1",
        params![room_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Insert a membership row inside the caller's transaction.
pub(crate) fn insert_member(
    conn: &Connection,
    room_id: RoomId,
    user_id: UserId,
    role: RoomRole,
) -> Result<Membership> {
    let membership = Membership {
        id: Uuid::new_v4(),
        room_id,
        user_id,
        role,
        joined_at: Utc::now(),
    };

    conn.execute(
        "INSERT INTO room_members (id, room_id, user_id, role, joined_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            membership.id.to_string(),
            membership.room_id.to_string(),
            membership.user_id.to_string(),
            membership.role.as_str(),
            membership.joined_at.to_rfc3339(),
        ],
    )?;

    Ok(membership)
}

/// Map a `rusqlite::Row` to a [`Membership`].
fn row_to_membership(row: &rusqlite::Row<'_>) -> rusqlite::Result<Membership> {
    let id_str: String = row.get(0)?;
    let room_str: String = row.get(1)?;
    let user_str: String = row.get(2)?;
    let role_str: String = row.get(3)?;
    let joined_str: String = row.get(4)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let room_id = RoomId::parse(&room_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let user_id = UserId::parse(&user_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let role = RoomRole::parse(&role_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown role {role_str:?}").into(),
        )
    })?;

    let joined_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&joined_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Membership {
        id,
        room_id,
        user_id,
        role,
        joined_at,
    })
}
