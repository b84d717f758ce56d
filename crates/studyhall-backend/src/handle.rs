//! Clonable async handle to the backend service.
//!
//! Each method builds one [`BackendCommand`], sends it to the service task,
//! and awaits the oneshot reply.  The handle is the public interface; the
//! command enum never needs to be touched by callers.

use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

use studyhall_shared::code::JoinCode;
use studyhall_shared::model::{JoinRequest, Membership, Message, Room, RoomPatch, RoomSpec};
use studyhall_shared::protocol::{
    ChangeEvent, CodeValidation, CreateReply, JoinReply, LeaveReply, MutateReply, RequestReply,
    ResolveReply, SendReply,
};
use studyhall_shared::types::{RoomId, UserId};

use crate::error::RpcError;
use crate::service::{BackendCommand, ReplyTo};

/// Async handle to the backend service task.
///
/// Cheap to clone; every clone talks to the same service and therefore to
/// the same database and change feed.
#[derive(Debug, Clone)]
pub struct BackendHandle {
    cmd_tx: mpsc::Sender<BackendCommand>,
}

impl BackendHandle {
    pub(crate) fn new(cmd_tx: mpsc::Sender<BackendCommand>) -> Self {
        Self { cmd_tx }
    }

    /// One command/reply round trip.  Both a failed send and a dropped reply
    /// sender mean the service task is gone.
    async fn call<T, F>(&self, command: F) -> Result<T, RpcError>
    where
        F: FnOnce(ReplyTo<T>) -> BackendCommand,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| RpcError::Unreachable)?;
        let result = reply_rx.await.map_err(|_| RpcError::Unreachable)?;
        result.map_err(RpcError::Store)
    }

    // -----------------------------------------------------------------------
    // Procedures
    // -----------------------------------------------------------------------

    /// Create a room and admit the caller as its admin, atomically.
    pub async fn create_room_and_join(
        &self,
        caller: UserId,
        spec: RoomSpec,
    ) -> Result<CreateReply, RpcError> {
        self.call(|reply| BackendCommand::CreateRoomAndJoin {
            caller,
            spec,
            reply,
        })
        .await
    }

    /// Join a room through the capacity-checked insert.
    pub async fn join_room(&self, caller: UserId, room_id: RoomId) -> Result<JoinReply, RpcError> {
        self.call(|reply| BackendCommand::JoinRoom {
            caller,
            room_id,
            reply,
        })
        .await
    }

    /// Check whether a short code resolves to an active room.
    pub async fn validate_join_code(&self, code: JoinCode) -> Result<CodeValidation, RpcError> {
        self.call(|reply| BackendCommand::ValidateJoinCode { code, reply })
            .await
    }

    /// Remove the caller's membership row, if any.
    pub async fn leave(&self, caller: UserId, room_id: RoomId) -> Result<LeaveReply, RpcError> {
        self.call(|reply| BackendCommand::Leave {
            caller,
            room_id,
            reply,
        })
        .await
    }

    /// Persist a message under a caller-supplied id.
    pub async fn send_message(
        &self,
        caller: UserId,
        room_id: RoomId,
        message_id: Uuid,
        content: String,
    ) -> Result<SendReply, RpcError> {
        self.call(|reply| BackendCommand::SendMessage {
            caller,
            room_id,
            message_id,
            content,
            reply,
        })
        .await
    }

    /// Creator-only edit of a room's descriptive fields.
    pub async fn update_room(
        &self,
        caller: UserId,
        room_id: RoomId,
        patch: RoomPatch,
    ) -> Result<MutateReply, RpcError> {
        self.call(|reply| BackendCommand::UpdateRoom {
            caller,
            room_id,
            patch,
            reply,
        })
        .await
    }

    /// Creator-only replacement of a room's short code.
    pub async fn regenerate_code(
        &self,
        caller: UserId,
        room_id: RoomId,
    ) -> Result<MutateReply, RpcError> {
        self.call(|reply| BackendCommand::RegenerateCode {
            caller,
            room_id,
            reply,
        })
        .await
    }

    /// Creator-only soft delete.  The room stops resolving but its rows stay.
    pub async fn delete_room(
        &self,
        caller: UserId,
        room_id: RoomId,
    ) -> Result<MutateReply, RpcError> {
        self.call(|reply| BackendCommand::DeleteRoom {
            caller,
            room_id,
            reply,
        })
        .await
    }

    /// Open (or re-open) a request to join a room.
    pub async fn request_join(
        &self,
        caller: UserId,
        room_id: RoomId,
    ) -> Result<RequestReply, RpcError> {
        self.call(|reply| BackendCommand::RequestJoin {
            caller,
            room_id,
            reply,
        })
        .await
    }

    /// Admin resolution of a pending join request.
    pub async fn resolve_request(
        &self,
        caller: UserId,
        request_id: Uuid,
        approve: bool,
    ) -> Result<ResolveReply, RpcError> {
        self.call(|reply| BackendCommand::ResolveRequest {
            caller,
            request_id,
            approve,
            reply,
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Fetch an active room by id.
    pub async fn room_by_id(&self, room_id: RoomId) -> Result<Option<Room>, RpcError> {
        self.call(|reply| BackendCommand::RoomById { room_id, reply })
            .await
    }

    /// Fetch an active room by short code.
    pub async fn room_by_code(&self, code: JoinCode) -> Result<Option<Room>, RpcError> {
        self.call(|reply| BackendCommand::RoomByCode { code, reply })
            .await
    }

    /// Current member count of a room.
    pub async fn member_count(&self, room_id: RoomId) -> Result<u32, RpcError> {
        self.call(|reply| BackendCommand::MemberCount { room_id, reply })
            .await
    }

    /// List a room's members, oldest joiner first.
    pub async fn members(&self, room_id: RoomId) -> Result<Vec<Membership>, RpcError> {
        self.call(|reply| BackendCommand::Members { room_id, reply })
            .await
    }

    /// The latest `limit` messages of a room, oldest first.
    pub async fn messages(&self, room_id: RoomId, limit: u32) -> Result<Vec<Message>, RpcError> {
        self.call(|reply| BackendCommand::Messages {
            room_id,
            limit,
            reply,
        })
        .await
    }

    /// One user's membership in one room, if any.
    pub async fn membership(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<Membership>, RpcError> {
        self.call(|reply| BackendCommand::Membership {
            room_id,
            user_id,
            reply,
        })
        .await
    }

    /// One user's join request for one room, if any.
    pub async fn request_for(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<JoinRequest>, RpcError> {
        self.call(|reply| BackendCommand::RequestFor {
            room_id,
            user_id,
            reply,
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Feed and lifecycle
    // -----------------------------------------------------------------------

    /// Obtain a fresh receiver on the change feed.
    ///
    /// The broadcast sender lives inside the service task, so receivers
    /// observe a closed channel once the service shuts down.
    pub async fn subscribe_feed(&self) -> Result<broadcast::Receiver<ChangeEvent>, RpcError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(BackendCommand::SubscribeFeed { reply: reply_tx })
            .await
            .map_err(|_| RpcError::Unreachable)?;
        reply_rx.await.map_err(|_| RpcError::Unreachable)
    }

    /// Ask the service task to stop.  Safe to call more than once; commands
    /// sent after this resolve to [`RpcError::Unreachable`].
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(BackendCommand::Shutdown).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{spawn_backend, BackendConfig, DatabaseLocation};

    #[tokio::test]
    async fn test_clones_reach_the_same_service() {
        let config = BackendConfig {
            location: DatabaseLocation::InMemory,
            ..BackendConfig::default()
        };
        let handle = spawn_backend(config).await.unwrap();
        let clone = handle.clone();

        let creator = UserId::new();
        let created = handle
            .create_room_and_join(
                creator,
                RoomSpec {
                    name: "shared".to_string(),
                    description: None,
                    subject: None,
                    is_public: true,
                    max_members: 4,
                },
            )
            .await
            .unwrap();
        drop(handle);

        let fetched = clone.room_by_id(created.room.id).await.unwrap().unwrap();
        assert_eq!(fetched, created.room);
    }
}
