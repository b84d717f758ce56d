//! Membership coordinator: the sole authority for membership changes.
//!
//! Every mutation path (create, join-by-id, join-by-code, request approval)
//! funnels through here so capacity, uniqueness and visibility are enforced
//! the same way regardless of entry point.  The coordinator validates cheap
//! things locally and delegates all real invariants to the backend's atomic
//! procedures; it never does client-side check-then-insert.
//!
//! Every operation takes an explicit `caller: UserId` so the coordinator is
//! testable without ambient session state.

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use studyhall_backend::{BackendHandle, RpcError};
use studyhall_shared::code::JoinCode;
use studyhall_shared::model::{
    validate_message, JoinRequest, Membership, Message, Room, RoomPatch, RoomSpec,
};
use studyhall_shared::protocol::{
    CodeValidation, JoinReply, LeaveReply, MutateReply, RequestReply, ResolveReply, SendReply,
};
use studyhall_shared::types::{RequestStatus, RoomId, UserId};
use studyhall_shared::SpecError;

use crate::directory::RoomDirectory;
use crate::error::MembershipError;

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Result of the atomic create-and-join flow.  Both rows were committed in
/// one backend transaction.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CreatedRoom {
    pub room: Room,
    pub membership: Membership,
}

/// Successful end state of a join path.  `AlreadyMember` is a success, not
/// an error: a duplicate join attempt must look exactly like the first one
/// succeeding.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A fresh membership row now exists.
    Joined { room: Room, membership: Membership },
    /// The caller already held a row; nothing changed.
    AlreadyMember { room: Room, membership: Membership },
}

impl JoinOutcome {
    pub fn room(&self) -> &Room {
        match self {
            Self::Joined { room, .. } | Self::AlreadyMember { room, .. } => room,
        }
    }

    pub fn membership(&self) -> &Membership {
        match self {
            Self::Joined { membership, .. } | Self::AlreadyMember { membership, .. } => membership,
        }
    }

    /// Whether this join inserted a new row.
    pub fn is_new(&self) -> bool {
        matches!(self, Self::Joined { .. })
    }
}

/// Successful end state of the request-to-join path.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A pending request now exists.
    Requested(JoinRequest),
    /// A pending request already existed; nothing changed.
    AlreadyPending(JoinRequest),
    /// The caller is already a member; no request is needed.
    AlreadyMember(Membership),
}

/// Successful end state of an admin resolving a request.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The requester was admitted and the request marked accepted, in one
    /// transaction.
    Approved {
        request: JoinRequest,
        membership: Membership,
    },
    /// The request was marked declined (terminal for the pair).
    Declined(JoinRequest),
    /// An earlier resolution already settled this request; carries the
    /// settled status.
    AlreadyResolved(RequestStatus),
}

/// Point-in-time snapshot of a room for one caller.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RoomDetails {
    pub room: Room,
    pub member_count: u32,
    /// Advisory only: computed from an independent read and possibly stale
    /// by the time it is consumed.
    pub is_member: bool,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// The membership core.  Cheap to clone; clones share one backend.
#[derive(Debug, Clone)]
pub struct MembershipCoordinator {
    backend: BackendHandle,
    directory: RoomDirectory,
}

impl MembershipCoordinator {
    pub fn new(backend: BackendHandle) -> Self {
        let directory = RoomDirectory::new(backend.clone());
        Self { backend, directory }
    }

    /// The identifier resolver this coordinator joins through.
    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    // -----------------------------------------------------------------------
    // Create / join / leave
    // -----------------------------------------------------------------------

    /// Create a room and join it as admin, in one backend transaction.
    ///
    /// Either both the room row and the creator's admin membership exist
    /// afterwards, or neither does.  Short-code collisions are retried
    /// inside the procedure up to its attempt budget; exhaustion surfaces
    /// as `Backend`.
    pub async fn create_and_join(
        &self,
        caller: UserId,
        spec: RoomSpec,
    ) -> Result<CreatedRoom, MembershipError> {
        spec.validate().map_err(validation_error)?;

        let created = self
            .backend
            .create_room_and_join(caller, spec)
            .await
            .map_err(backend_error)?;
        debug!(room = %created.room.id, code = %created.room.short_code, "room created");

        Ok(CreatedRoom {
            room: created.room,
            membership: created.membership,
        })
    }

    /// Join a room by canonical id or short code.
    ///
    /// The capacity check and the row insert run inside one backend
    /// transaction, so concurrent joins onto the last free slot admit
    /// exactly one caller.
    pub async fn join(
        &self,
        caller: UserId,
        identifier: &str,
    ) -> Result<JoinOutcome, MembershipError> {
        let room = self.directory.resolve(identifier).await?;
        let reply = self
            .backend
            .join_room(caller, room.id)
            .await
            .map_err(backend_error)?;
        map_join_reply(reply)
    }

    /// Join through the code-validation channel.
    ///
    /// Codes that fail validation are `InvalidCode` — malformed ones,
    /// never-issued ones, and codes of soft-deleted rooms alike.  The code
    /// channel never reveals room lifecycle.
    pub async fn join_by_code(
        &self,
        caller: UserId,
        raw_code: &str,
    ) -> Result<JoinOutcome, MembershipError> {
        let code = JoinCode::parse(raw_code).map_err(|_| MembershipError::InvalidCode)?;

        let room_id = match self
            .backend
            .validate_join_code(code)
            .await
            .map_err(backend_error)?
        {
            CodeValidation::Valid(room_id) => room_id,
            CodeValidation::Invalid => return Err(MembershipError::InvalidCode),
        };

        match self
            .backend
            .join_room(caller, room_id)
            .await
            .map_err(backend_error)?
        {
            // The room went inactive between validation and join; stay on
            // the code channel's signal.
            JoinReply::NotFound => Err(MembershipError::InvalidCode),
            reply => map_join_reply(reply),
        }
    }

    /// Leave a room.  A non-member leaving is a no-op success.
    pub async fn leave(&self, caller: UserId, room_id: RoomId) -> Result<(), MembershipError> {
        match self
            .backend
            .leave(caller, room_id)
            .await
            .map_err(backend_error)?
        {
            LeaveReply::Left(membership) => {
                debug!(room = %room_id, membership = %membership.id, "left room");
                Ok(())
            }
            LeaveReply::NotMember => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Room, live member count, and the caller's membership flag.
    ///
    /// Three independent reads that may race concurrent mutation; treat the
    /// flag as a hint, never a lock.
    pub async fn details(
        &self,
        caller: UserId,
        room_id: RoomId,
    ) -> Result<RoomDetails, MembershipError> {
        let room = self
            .backend
            .room_by_id(room_id)
            .await
            .map_err(backend_error)?
            .ok_or(MembershipError::RoomNotFound)?;
        let member_count = self
            .backend
            .member_count(room_id)
            .await
            .map_err(backend_error)?;
        let is_member = self
            .backend
            .membership(room_id, caller)
            .await
            .map_err(backend_error)?
            .is_some();

        Ok(RoomDetails {
            room,
            member_count,
            is_member,
        })
    }

    /// Current members, oldest joiner first.
    pub async fn members(&self, room_id: RoomId) -> Result<Vec<Membership>, MembershipError> {
        self.backend.members(room_id).await.map_err(backend_error)
    }

    /// Latest `limit` messages, oldest first.  Used for the initial render
    /// and for re-fetching after degraded sync.
    pub async fn messages(
        &self,
        room_id: RoomId,
        limit: u32,
    ) -> Result<Vec<Message>, MembershipError> {
        self.backend
            .messages(room_id, limit)
            .await
            .map_err(backend_error)
    }

    // -----------------------------------------------------------------------
    // Messaging
    // -----------------------------------------------------------------------

    /// Send a message to a room the caller belongs to.
    ///
    /// The id is generated here, client-side, so the returned canonical row
    /// can be optimistically inserted into a local view and later reconciled
    /// with the feed echo by identity.
    pub async fn send_message(
        &self,
        caller: UserId,
        room_id: RoomId,
        content: &str,
    ) -> Result<Message, MembershipError> {
        validate_message(content).map_err(validation_error)?;

        let reply = self
            .backend
            .send_message(caller, room_id, Uuid::new_v4(), content.to_string())
            .await
            .map_err(backend_error)?;
        match reply {
            SendReply::Sent(message) => Ok(message),
            SendReply::NotMember => Err(MembershipError::NotAuthorized),
            SendReply::NotFound => Err(MembershipError::RoomNotFound),
        }
    }

    // -----------------------------------------------------------------------
    // Request-to-join flow
    // -----------------------------------------------------------------------

    /// Ask to join a room through admin approval.
    ///
    /// Repeat requests are idempotent while pending; a declined pair stays
    /// declined.
    pub async fn request_join(
        &self,
        caller: UserId,
        room_id: RoomId,
    ) -> Result<RequestOutcome, MembershipError> {
        match self
            .backend
            .request_join(caller, room_id)
            .await
            .map_err(backend_error)?
        {
            RequestReply::Requested(request) => Ok(RequestOutcome::Requested(request)),
            RequestReply::AlreadyPending(request) => Ok(RequestOutcome::AlreadyPending(request)),
            RequestReply::AlreadyMember(membership) => Ok(RequestOutcome::AlreadyMember(membership)),
            RequestReply::Declined => Err(MembershipError::RequestDeclined),
            RequestReply::NotFound => Err(MembershipError::RoomNotFound),
        }
    }

    /// Approve a pending request (admins of the room only).
    ///
    /// Runs the same atomic capacity-checked insert as a join; a full room
    /// surfaces `MaxCapacity` and leaves the request pending for a retry.
    pub async fn approve_request(
        &self,
        admin: UserId,
        request_id: Uuid,
    ) -> Result<ResolveOutcome, MembershipError> {
        self.resolve(admin, request_id, true).await
    }

    /// Decline a pending request (admins of the room only).  Terminal.
    pub async fn decline_request(
        &self,
        admin: UserId,
        request_id: Uuid,
    ) -> Result<ResolveOutcome, MembershipError> {
        self.resolve(admin, request_id, false).await
    }

    async fn resolve(
        &self,
        admin: UserId,
        request_id: Uuid,
        approve: bool,
    ) -> Result<ResolveOutcome, MembershipError> {
        match self
            .backend
            .resolve_request(admin, request_id, approve)
            .await
            .map_err(backend_error)?
        {
            ResolveReply::Approved {
                request,
                membership,
            } => Ok(ResolveOutcome::Approved {
                request,
                membership,
            }),
            ResolveReply::Declined(request) => Ok(ResolveOutcome::Declined(request)),
            ResolveReply::AlreadyResolved(status) => Ok(ResolveOutcome::AlreadyResolved(status)),
            ResolveReply::Full => Err(MembershipError::MaxCapacity),
            ResolveReply::NotAdmin => Err(MembershipError::NotAuthorized),
            ResolveReply::NotFound => Err(MembershipError::RoomNotFound),
        }
    }

    // -----------------------------------------------------------------------
    // Creator-side room mutations
    // -----------------------------------------------------------------------

    /// Edit a room's descriptive fields (creator only).
    pub async fn update_room(
        &self,
        caller: UserId,
        room_id: RoomId,
        patch: RoomPatch,
    ) -> Result<Room, MembershipError> {
        patch.validate().map_err(validation_error)?;
        let reply = self
            .backend
            .update_room(caller, room_id, patch)
            .await
            .map_err(backend_error)?;
        map_mutate_reply(reply)
    }

    /// Replace a room's short code (creator only).  The old code stops
    /// resolving immediately.
    pub async fn regenerate_code(
        &self,
        caller: UserId,
        room_id: RoomId,
    ) -> Result<Room, MembershipError> {
        let reply = self
            .backend
            .regenerate_code(caller, room_id)
            .await
            .map_err(backend_error)?;
        map_mutate_reply(reply)
    }

    /// Soft-delete a room (creator only).  It stops resolving, rejects
    /// joins, and its code validates as invalid.
    pub async fn delete_room(
        &self,
        caller: UserId,
        room_id: RoomId,
    ) -> Result<(), MembershipError> {
        let reply = self
            .backend
            .delete_room(caller, room_id)
            .await
            .map_err(backend_error)?;
        map_mutate_reply(reply).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn map_join_reply(reply: JoinReply) -> Result<JoinOutcome, MembershipError> {
    match reply {
        JoinReply::Joined { room, membership } => Ok(JoinOutcome::Joined { room, membership }),
        JoinReply::AlreadyMember { room, membership } => {
            Ok(JoinOutcome::AlreadyMember { room, membership })
        }
        JoinReply::NotFound => Err(MembershipError::RoomNotFound),
        JoinReply::Private => Err(MembershipError::RoomPrivate),
        JoinReply::Full => Err(MembershipError::MaxCapacity),
    }
}

fn map_mutate_reply(reply: MutateReply) -> Result<Room, MembershipError> {
    match reply {
        MutateReply::Updated(room) => Ok(room),
        MutateReply::NotCreator => Err(MembershipError::NotAuthorized),
        MutateReply::NotFound => Err(MembershipError::RoomNotFound),
    }
}

fn validation_error(e: SpecError) -> MembershipError {
    MembershipError::Validation(e.to_string())
}

fn backend_error(e: RpcError) -> MembershipError {
    MembershipError::Backend(e.to_string())
}
