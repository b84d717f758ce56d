//! Room procedures: the atomic create-and-join transaction, active-room
//! lookups, join-code validation, and the creator-only mutations.
//!
//! Soft-deleted rooms (`is_active = 0`) keep their rows so message history
//! survives and their short codes stay reserved, but they are invisible to
//! every lookup here.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::debug;

use studyhall_shared::code::JoinCode;
use studyhall_shared::model::{Room, RoomPatch, RoomSpec};
use studyhall_shared::protocol::{CodeValidation, CreateReply, MutateReply};
use studyhall_shared::types::{RoomId, RoomRole, UserId};

use crate::database::{optional, Database};
use crate::error::{Result, StoreError};
use crate::members::insert_member;

impl Database {
    // ------------------------------------------------------------------
    // Procedures
    // ------------------------------------------------------------------

    /// Create a room and admit its creator as `admin`, atomically.
    ///
    /// Code allocation, the room insert, and the creator's membership insert
    /// run inside one transaction; a failure at any step (including code
    /// space exhaustion) leaves no partial room behind.
    pub fn create_room_and_join(
        &mut self,
        caller: UserId,
        spec: &RoomSpec,
        code_attempts: u32,
    ) -> Result<CreateReply> {
        let tx = self.conn_mut().transaction()?;

        let short_code = allocate_code(&tx, code_attempts)?;
        let room = Room {
            id: RoomId::new(),
            short_code,
            name: spec.name.trim().to_string(),
            description: spec.description.clone(),
            subject: spec.subject.clone(),
            max_members: spec.max_members,
            is_public: spec.is_public,
            creator_id: caller,
            is_active: true,
            created_at: Utc::now(),
        };

        tx.execute(
            "INSERT INTO rooms (id, short_code, name, description, subject,
                                max_members, is_public, creator_id, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                room.id.to_string(),
                room.short_code.as_str(),
                room.name,
                room.description,
                room.subject,
                room.max_members,
                room.is_public,
                room.creator_id.to_string(),
                room.is_active,
                room.created_at.to_rfc3339(),
            ],
        )?;

        let membership = insert_member(&tx, room.id, caller, RoomRole::Admin)?;

        tx.commit()?;
        Ok(CreateReply { room, membership })
    }

    /// Apply a creator-only patch to a room's descriptive fields.
    pub fn update_room(
        &mut self,
        caller: UserId,
        room_id: RoomId,
        patch: &RoomPatch,
    ) -> Result<MutateReply> {
        let tx = self.conn_mut().transaction()?;

        let mut room = match active_room(&tx, room_id)? {
            Some(room) => room,
            None => return Ok(MutateReply::NotFound),
        };
        if room.creator_id != caller {
            return Ok(MutateReply::NotCreator);
        }

        if let Some(name) = &patch.name {
            room.name = name.trim().to_string();
        }
        if let Some(description) = &patch.description {
            room.description = Some(description.clone());
        }
        if let Some(subject) = &patch.subject {
            room.subject = Some(subject.clone());
        }

        tx.execute(
            "UPDATE rooms SET name = ?2, description = ?3, subject = ?4 WHERE id = ?1",
            params![room.id.to_string(), room.name, room.description, room.subject],
        )?;

        tx.commit()?;
        Ok(MutateReply::Updated(room))
    }

    /// Replace a room's short code with a freshly allocated one.  The old
    /// code stops resolving immediately.
    pub fn regenerate_code(
        &mut self,
        caller: UserId,
        room_id: RoomId,
        code_attempts: u32,
    ) -> Result<MutateReply> {
        let tx = self.conn_mut().transaction()?;

        let mut room = match active_room(&tx, room_id)? {
            Some(room) => room,
            None => return Ok(MutateReply::NotFound),
        };
        if room.creator_id != caller {
            return Ok(MutateReply::NotCreator);
        }

        room.short_code = allocate_code(&tx, code_attempts)?;
        tx.execute(
            "UPDATE rooms SET short_code = ?2 WHERE id = ?1",
            params![room.id.to_string(), room.short_code.as_str()],
        )?;

        tx.commit()?;
        Ok(MutateReply::Updated(room))
    }

    /// Soft-delete a room.  The row survives (history stays queryable and
    /// the code stays reserved) but every lookup and join path stops seeing
    /// the room at once.
    pub fn soft_delete_room(&mut self, caller: UserId, room_id: RoomId) -> Result<MutateReply> {
        let tx = self.conn_mut().transaction()?;

        let mut room = match active_room(&tx, room_id)? {
            Some(room) => room,
            None => return Ok(MutateReply::NotFound),
        };
        if room.creator_id != caller {
            return Ok(MutateReply::NotCreator);
        }

        tx.execute(
            "UPDATE rooms SET is_active = 0 WHERE id = ?1",
            params![room.id.to_string()],
        )?;
        room.is_active = false;

        tx.commit()?;
        Ok(MutateReply::Updated(room))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Fetch an active room by id.
    pub fn room_by_id(&self, id: RoomId) -> Result<Option<Room>> {
        Ok(room_row(self.conn(), id)?.filter(|room| room.is_active))
    }

    /// Fetch an active room by its short code.  Codes are stored uppercase;
    /// callers normalise input before reaching the store.
    pub fn room_by_code(&self, code: &JoinCode) -> Result<Option<Room>> {
        optional(self.conn().query_row(
            "SELECT id, short_code, name, description, subject,
                    max_members, is_public, creator_id, is_active, created_at
             FROM rooms
             WHERE short_code = ?1 AND is_active = 1",
            params![code.as_str()],
            row_to_room,
        ))
    }

    /// Check whether a code currently resolves to an active room.
    ///
    /// An inactive room's code validates as `Invalid`, indistinguishable
    /// from a code that was never allocated.
    pub fn validate_code(&self, code: &JoinCode) -> Result<CodeValidation> {
        Ok(match self.room_by_code(code)? {
            Some(room) => CodeValidation::Valid(room.id),
            None => CodeValidation::Invalid,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fetch a room row regardless of `is_active`.  Transactional procedures use
/// this so they can distinguish "soft-deleted" from "never existed" where it
/// matters.
pub(crate) fn room_row(conn: &Connection, id: RoomId) -> Result<Option<Room>> {
    optional(conn.query_row(
        "SELECT id, short_code, name, description, subject,
                max_members, is_public, creator_id, is_active, created_at
         FROM rooms
         WHERE id = ?1",
        params![id.to_string()],
        row_to_room,
    ))
}

/// Fetch an active room row inside a caller-held transaction.
pub(crate) fn active_room(conn: &Connection, id: RoomId) -> Result<Option<Room>> {
    Ok(room_row(conn, id)?.filter(|room| room.is_active))
}

/// Draw candidate codes until one is unused, escalating the code length over
/// the attempt budget.  Uniqueness is checked against all rows, active or
/// not, so codes of soft-deleted rooms stay reserved.
fn allocate_code(conn: &Connection, attempts: u32) -> Result<JoinCode> {
    let mut rng = rand::thread_rng();

    for attempt in 1..=attempts {
        let code = JoinCode::generate(JoinCode::attempt_len(attempt), &mut rng);
        let taken: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM rooms WHERE short_code = ?1)",
            params![code.as_str()],
            |row| row.get(0),
        )?;
        if !taken {
            return Ok(code);
        }
        debug!(attempt, "join code collision, retrying");
    }

    Err(StoreError::CodeSpaceExhausted)
}

/// Map a `rusqlite::Row` to a [`Room`].
pub(crate) fn row_to_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<Room> {
    let id_str: String = row.get(0)?;
    let code_str: String = row.get(1)?;
    let name: String = row.get(2)?;
    let description: Option<String> = row.get(3)?;
    let subject: Option<String> = row.get(4)?;
    let max_members: u32 = row.get(5)?;
    let is_public: bool = row.get(6)?;
    let creator_str: String = row.get(7)?;
    let is_active: bool = row.get(8)?;
    let created_str: String = row.get(9)?;

    let id = RoomId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let short_code = JoinCode::parse(&code_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let creator_id = UserId::parse(&creator_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Room {
        id,
        short_code,
        name,
        description,
        subject,
        max_members,
        is_public,
        creator_id,
        is_active,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use studyhall_shared::constants::CODE_ALLOC_ATTEMPTS;

    fn test_db() -> Database {
        Database::open_in_memory().expect("in-memory db")
    }

    fn spec(name: &str, max_members: u32, is_public: bool) -> RoomSpec {
        RoomSpec {
            name: name.to_string(),
            description: None,
            subject: None,
            max_members,
            is_public,
        }
    }

    #[test]
    fn test_create_room_and_join_commits_both_rows() {
        let mut db = test_db();
        let creator = UserId::new();

        let created = db
            .create_room_and_join(creator, &spec("algebra", 4, true), CODE_ALLOC_ATTEMPTS)
            .unwrap();

        assert_eq!(created.room.creator_id, creator);
        assert!(created.room.is_active);
        assert_eq!(created.membership.room_id, created.room.id);
        assert_eq!(created.membership.user_id, creator);
        assert_eq!(created.membership.role, RoomRole::Admin);
        assert_eq!(db.member_count(created.room.id).unwrap(), 1);
    }

    #[test]
    fn test_code_exhaustion_leaves_no_partial_room() {
        let mut db = test_db();

        let err = db
            .create_room_and_join(UserId::new(), &spec("algebra", 4, true), 0)
            .unwrap_err();
        assert!(matches!(err, StoreError::CodeSpaceExhausted));

        let rooms: u32 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM rooms", [], |r| r.get(0))
            .unwrap();
        let members: u32 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM room_members", [], |r| r.get(0))
            .unwrap();
        assert_eq!((rooms, members), (0, 0));
    }

    #[test]
    fn test_lookup_by_id_and_code() {
        let mut db = test_db();
        let created = db
            .create_room_and_join(UserId::new(), &spec("biology", 6, true), CODE_ALLOC_ATTEMPTS)
            .unwrap();

        let by_id = db.room_by_id(created.room.id).unwrap().unwrap();
        assert_eq!(by_id, created.room);

        let by_code = db.room_by_code(&created.room.short_code).unwrap().unwrap();
        assert_eq!(by_code.id, created.room.id);

        assert!(db.room_by_id(RoomId::new()).unwrap().is_none());
        assert_eq!(
            db.validate_code(&created.room.short_code).unwrap(),
            CodeValidation::Valid(created.room.id)
        );
    }

    #[test]
    fn test_soft_delete_stops_resolution() {
        let mut db = test_db();
        let creator = UserId::new();
        let created = db
            .create_room_and_join(creator, &spec("chemistry", 4, true), CODE_ALLOC_ATTEMPTS)
            .unwrap();

        let reply = db.soft_delete_room(creator, created.room.id).unwrap();
        match reply {
            MutateReply::Updated(room) => assert!(!room.is_active),
            other => panic!("expected Updated, got {other:?}"),
        }

        assert!(db.room_by_id(created.room.id).unwrap().is_none());
        assert_eq!(
            db.validate_code(&created.room.short_code).unwrap(),
            CodeValidation::Invalid
        );
        // The row itself survives the soft delete.
        let rows: u32 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM rooms", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_mutations_are_creator_only() {
        let mut db = test_db();
        let creator = UserId::new();
        let stranger = UserId::new();
        let created = db
            .create_room_and_join(creator, &spec("physics", 4, true), CODE_ALLOC_ATTEMPTS)
            .unwrap();

        let patch = RoomPatch {
            name: Some("renamed".to_string()),
            description: None,
            subject: None,
        };
        assert!(matches!(
            db.update_room(stranger, created.room.id, &patch).unwrap(),
            MutateReply::NotCreator
        ));
        assert!(matches!(
            db.regenerate_code(stranger, created.room.id, CODE_ALLOC_ATTEMPTS)
                .unwrap(),
            MutateReply::NotCreator
        ));
        assert!(matches!(
            db.soft_delete_room(stranger, created.room.id).unwrap(),
            MutateReply::NotCreator
        ));
    }

    #[test]
    fn test_update_room_applies_patch() {
        let mut db = test_db();
        let creator = UserId::new();
        let created = db
            .create_room_and_join(creator, &spec("history", 4, true), CODE_ALLOC_ATTEMPTS)
            .unwrap();

        let patch = RoomPatch {
            name: Some("  modern history  ".to_string()),
            description: Some("19th century onwards".to_string()),
            subject: None,
        };
        let reply = db.update_room(creator, created.room.id, &patch).unwrap();
        let updated = match reply {
            MutateReply::Updated(room) => room,
            other => panic!("expected Updated, got {other:?}"),
        };

        assert_eq!(updated.name, "modern history");
        assert_eq!(updated.description.as_deref(), Some("19th century onwards"));
        assert_eq!(db.room_by_id(created.room.id).unwrap().unwrap(), updated);
    }

    #[test]
    fn test_regenerate_code_invalidates_old() {
        let mut db = test_db();
        let creator = UserId::new();
        let created = db
            .create_room_and_join(creator, &spec("latin", 4, true), CODE_ALLOC_ATTEMPTS)
            .unwrap();
        let old_code = created.room.short_code.clone();

        let reply = db
            .regenerate_code(creator, created.room.id, CODE_ALLOC_ATTEMPTS)
            .unwrap();
        let room = match reply {
            MutateReply::Updated(room) => room,
            other => panic!("expected Updated, got {other:?}"),
        };

        assert_ne!(room.short_code, old_code);
        assert_eq!(db.validate_code(&old_code).unwrap(), CodeValidation::Invalid);
        assert_eq!(
            db.validate_code(&room.short_code).unwrap(),
            CodeValidation::Valid(room.id)
        );
    }

    #[test]
    fn test_codes_are_unique_across_rooms() {
        let mut db = test_db();
        let mut codes = HashSet::new();

        for i in 0..20 {
            let created = db
                .create_room_and_join(
                    UserId::new(),
                    &spec(&format!("room {i}"), 4, true),
                    CODE_ALLOC_ATTEMPTS,
                )
                .unwrap();
            codes.insert(created.room.short_code.to_string());
        }

        assert_eq!(codes.len(), 20);
    }
}
