//! Request-to-join procedures backing the private-room approval flow.
//!
//! One request row exists per (room, user) pair.  The status machine is
//! deliberately small: `pending` resolves to `accepted` or `declined`, a
//! declined pair is terminal, and an accepted pair whose member has since
//! left reopens as `pending` on the next ask.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use studyhall_shared::model::JoinRequest;
use studyhall_shared::protocol::{RequestReply, ResolveReply};
use studyhall_shared::types::{RequestStatus, RoomId, RoomRole, UserId};

use crate::database::{optional, Database};
use crate::error::Result;
use crate::members::{insert_member, member_count_in, membership_row};
use crate::rooms::room_row;

impl Database {
    /// Ask to join a room.
    pub fn request_join(&mut self, caller: UserId, room_id: RoomId) -> Result<RequestReply> {
        let tx = self.conn_mut().transaction()?;

        match room_row(&tx, room_id)? {
            Some(room) if room.is_active => {}
            _ => return Ok(RequestReply::NotFound),
        }
        if let Some(membership) = membership_row(&tx, room_id, caller)? {
            return Ok(RequestReply::AlreadyMember(membership));
        }

        match request_row(&tx, room_id, caller)? {
            Some(request) => match request.status {
                RequestStatus::Pending => Ok(RequestReply::AlreadyPending(request)),
                RequestStatus::Declined => Ok(RequestReply::Declined),
                RequestStatus::Accepted => {
                    // Admitted earlier but no longer a member; reopen the row.
                    let reopened = reopen_request(&tx, request.id)?;
                    tx.commit()?;
                    Ok(RequestReply::Requested(reopened))
                }
            },
            None => {
                let request = JoinRequest {
                    id: Uuid::new_v4(),
                    room_id,
                    user_id: caller,
                    status: RequestStatus::Pending,
                    requested_at: Utc::now(),
                    resolved_at: None,
                };

                tx.execute(
                    "INSERT INTO join_requests (id, room_id, user_id, status, requested_at, resolved_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        request.id.to_string(),
                        request.room_id.to_string(),
                        request.user_id.to_string(),
                        request.status.as_str(),
                        request.requested_at.to_rfc3339(),
                        Option::<String>::None,
                    ],
                )?;
                tx.commit()?;

                Ok(RequestReply::Requested(request))
            }
        }
    }

    /// Resolve a pending request.  Only an admin of the request's room may
    /// resolve it; approval admits the requester through the same
    /// capacity-checked insert as a direct join, and both writes commit
    /// together.
    pub fn resolve_request(
        &mut self,
        caller: UserId,
        request_id: Uuid,
        approve: bool,
    ) -> Result<ResolveReply> {
        let tx = self.conn_mut().transaction()?;

        let request = match request_by_id(&tx, request_id)? {
            Some(request) => request,
            None => return Ok(ResolveReply::NotFound),
        };

        let is_admin = matches!(
            membership_row(&tx, request.room_id, caller)?,
            Some(m) if m.role == RoomRole::Admin
        );
        if !is_admin {
            return Ok(ResolveReply::NotAdmin);
        }

        if request.status != RequestStatus::Pending {
            return Ok(ResolveReply::AlreadyResolved(request.status));
        }

        if !approve {
            let declined = mark_request(&tx, request_id, RequestStatus::Declined)?;
            tx.commit()?;
            return Ok(ResolveReply::Declined(declined));
        }

        let room = match room_row(&tx, request.room_id)? {
            Some(room) if room.is_active => room,
            _ => return Ok(ResolveReply::NotFound),
        };
        if member_count_in(&tx, request.room_id)? >= room.max_members {
            // No commit: the request stays pending so the admin can retry
            // once a slot opens.
            return Ok(ResolveReply::Full);
        }

        let membership = insert_member(&tx, request.room_id, request.user_id, RoomRole::Member)?;
        let accepted = mark_request(&tx, request_id, RequestStatus::Accepted)?;
        tx.commit()?;

        Ok(ResolveReply::Approved {
            request: accepted,
            membership,
        })
    }

    /// Fetch one user's request for one room, if any.
    pub fn request_for(&self, room_id: RoomId, user_id: UserId) -> Result<Option<JoinRequest>> {
        request_row(self.conn(), room_id, user_id)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn request_row(conn: &Connection, room_id: RoomId, user_id: UserId) -> Result<Option<JoinRequest>> {
    optional(conn.query_row(
        "SELECT id, room_id, user_id, status, requested_at, resolved_at
         FROM join_requests
         WHERE room_id = ?1 AND user_id = ?2",
        params![room_id.to_string(), user_id.to_string()],
        row_to_request,
    ))
}

fn request_by_id(conn: &Connection, id: Uuid) -> Result<Option<JoinRequest>> {
    optional(conn.query_row(
        "SELECT id, room_id, user_id, status, requested_at, resolved_at
         FROM join_requests
         WHERE id = ?1",
        params![id.to_string()],
        row_to_request,
    ))
}

/// Stamp a resolution onto a request and return the updated row.
fn mark_request(conn: &Connection, id: Uuid, status: RequestStatus) -> Result<JoinRequest> {
    conn.execute(
        "UPDATE join_requests SET status = ?2, resolved_at = ?3 WHERE id = ?1",
        params![
            id.to_string(),
            status.as_str(),
            Utc::now().to_rfc3339()
        ],
    )?;

    let request = conn.query_row(
        "SELECT id, room_id, user_id, status, requested_at, resolved_at
         FROM join_requests
         WHERE id = ?1",
        params![id.to_string()],
        row_to_request,
    )?;
    Ok(request)
}

/// Flip an accepted request back to pending with a fresh timestamp.
fn reopen_request(conn: &Connection, id: Uuid) -> Result<JoinRequest> {
    conn.execute(
        "UPDATE join_requests
         SET status = ?2, requested_at = ?3, resolved_at = NULL
         WHERE id = ?1",
        params![
            id.to_string(),
            RequestStatus::Pending.as_str(),
            Utc::now().to_rfc3339()
        ],
    )?;

    let request = conn.query_row(
        "SELECT id, room_id, user_id, status, requested_at, resolved_at
         FROM join_requests
         WHERE id = ?1",
        params![id.to_string()],
        row_to_request,
    )?;
    Ok(request)
}

/// Map a `rusqlite::Row` to a [`JoinRequest`].
fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<JoinRequest> {
    let id_str: String = row.get(0)?;
    let room_str: String = row.get(1)?;
    let user_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let requested_str: String = row.get(4)?;
    let resolved_str: Option<String> = row.get(5)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let room_id = RoomId::parse(&room_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let user_id = UserId::parse(&user_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let status = RequestStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown request status {status_str:?}").into(),
        )
    })?;

    let requested_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&requested_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let resolved_at: Option<DateTime<Utc>> = resolved_str
        .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(JoinRequest {
        id,
        room_id,
        user_id,
        status,
        requested_at,
        resolved_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use studyhall_shared::constants::CODE_ALLOC_ATTEMPTS;
    use studyhall_shared::model::RoomSpec;
    use studyhall_shared::protocol::LeaveReply;

    fn test_db() -> Database {
        Database::open_in_memory().expect("in-memory db")
    }

    fn make_private_room(db: &mut Database, creator: UserId, max_members: u32) -> RoomId {
        let spec = RoomSpec {
            name: "thesis group".to_string(),
            description: None,
            subject: None,
            is_public: false,
            max_members,
        };
        db.create_room_and_join(creator, &spec, CODE_ALLOC_ATTEMPTS)
            .unwrap()
            .room
            .id
    }

    #[test]
    fn test_request_then_approve_admits_member() {
        let mut db = test_db();
        let admin = UserId::new();
        let room_id = make_private_room(&mut db, admin, 4);
        let requester = UserId::new();

        let request = match db.request_join(requester, room_id).unwrap() {
            RequestReply::Requested(request) => request,
            other => panic!("expected Requested, got {other:?}"),
        };
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(request.resolved_at.is_none());

        // Asking again while pending changes nothing.
        assert!(matches!(
            db.request_join(requester, room_id).unwrap(),
            RequestReply::AlreadyPending(_)
        ));

        let reply = db.resolve_request(admin, request.id, true).unwrap();
        let (resolved, membership) = match reply {
            ResolveReply::Approved {
                request,
                membership,
            } => (request, membership),
            other => panic!("expected Approved, got {other:?}"),
        };
        assert_eq!(resolved.status, RequestStatus::Accepted);
        assert!(resolved.resolved_at.is_some());
        assert_eq!(membership.user_id, requester);
        assert_eq!(membership.role, RoomRole::Member);

        // Once admitted, asking again short-circuits.
        assert!(matches!(
            db.request_join(requester, room_id).unwrap(),
            RequestReply::AlreadyMember(_)
        ));
    }

    #[test]
    fn test_decline_is_terminal() {
        let mut db = test_db();
        let admin = UserId::new();
        let room_id = make_private_room(&mut db, admin, 4);
        let requester = UserId::new();

        let request = match db.request_join(requester, room_id).unwrap() {
            RequestReply::Requested(request) => request,
            other => panic!("expected Requested, got {other:?}"),
        };

        assert!(matches!(
            db.resolve_request(admin, request.id, false).unwrap(),
            ResolveReply::Declined(_)
        ));

        // The pair stays declined: no new request, no late approval.
        assert!(matches!(
            db.request_join(requester, room_id).unwrap(),
            RequestReply::Declined
        ));
        assert!(matches!(
            db.resolve_request(admin, request.id, true).unwrap(),
            ResolveReply::AlreadyResolved(RequestStatus::Declined)
        ));
        assert!(db.membership(room_id, requester).unwrap().is_none());
    }

    #[test]
    fn test_resolution_requires_admin() {
        let mut db = test_db();
        let admin = UserId::new();
        let room_id = make_private_room(&mut db, admin, 4);
        let requester = UserId::new();

        let request = match db.request_join(requester, room_id).unwrap() {
            RequestReply::Requested(request) => request,
            other => panic!("expected Requested, got {other:?}"),
        };

        // Neither a stranger nor the requester themselves may resolve.
        assert!(matches!(
            db.resolve_request(UserId::new(), request.id, true).unwrap(),
            ResolveReply::NotAdmin
        ));
        assert!(matches!(
            db.resolve_request(requester, request.id, true).unwrap(),
            ResolveReply::NotAdmin
        ));
    }

    #[test]
    fn test_approval_respects_capacity() {
        let mut db = test_db();
        let admin = UserId::new();
        let room_id = make_private_room(&mut db, admin, 1);
        let requester = UserId::new();

        let request = match db.request_join(requester, room_id).unwrap() {
            RequestReply::Requested(request) => request,
            other => panic!("expected Requested, got {other:?}"),
        };

        assert!(matches!(
            db.resolve_request(admin, request.id, true).unwrap(),
            ResolveReply::Full
        ));

        // The request survived the failed approval untouched.
        let pending = db.request_for(room_id, requester).unwrap().unwrap();
        assert_eq!(pending.status, RequestStatus::Pending);
        assert_eq!(db.member_count(room_id).unwrap(), 1);
    }

    #[test]
    fn test_accepted_pair_reopens_after_leave() {
        let mut db = test_db();
        let admin = UserId::new();
        let room_id = make_private_room(&mut db, admin, 4);
        let requester = UserId::new();

        let request = match db.request_join(requester, room_id).unwrap() {
            RequestReply::Requested(request) => request,
            other => panic!("expected Requested, got {other:?}"),
        };
        db.resolve_request(admin, request.id, true).unwrap();
        assert!(matches!(
            db.leave_room(requester, room_id).unwrap(),
            LeaveReply::Left(_)
        ));

        let reopened = match db.request_join(requester, room_id).unwrap() {
            RequestReply::Requested(request) => request,
            other => panic!("expected Requested, got {other:?}"),
        };
        assert_eq!(reopened.id, request.id);
        assert_eq!(reopened.status, RequestStatus::Pending);
        assert!(reopened.resolved_at.is_none());
    }

    #[test]
    fn test_unknown_room_and_request() {
        let mut db = test_db();
        let admin = UserId::new();
        make_private_room(&mut db, admin, 4);

        assert!(matches!(
            db.request_join(UserId::new(), RoomId::new()).unwrap(),
            RequestReply::NotFound
        ));
        assert!(matches!(
            db.resolve_request(admin, Uuid::new_v4(), true).unwrap(),
            ResolveReply::NotFound
        ));
    }
}
