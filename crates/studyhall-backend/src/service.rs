//! Backend service task with the tokio mpsc command/reply pattern.
//!
//! The service owns the [`Database`] and runs in a dedicated tokio task.
//! External code communicates with it through typed commands carrying
//! oneshot reply senders; because the task processes commands strictly one
//! at a time, every stored procedure is atomic with respect to all
//! concurrent clients.  Committed mutations are published as row-level
//! [`ChangeEvent`]s on a broadcast feed that any number of subscribers may
//! watch.

use std::path::PathBuf;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info};
use uuid::Uuid;

use studyhall_shared::code::JoinCode;
use studyhall_shared::constants::{CODE_ALLOC_ATTEMPTS, DEFAULT_FEED_CAPACITY};
use studyhall_shared::model::{JoinRequest, Membership, Message, Room, RoomPatch, RoomSpec};
use studyhall_shared::protocol::{
    ChangeEvent, CodeValidation, CreateReply, JoinReply, LeaveReply, MutateReply, RequestReply,
    ResolveReply, RowChange, SendReply,
};
use studyhall_shared::types::{RoomId, UserId};
use studyhall_store::{Database, StoreError};

use crate::handle::BackendHandle;

// ---------------------------------------------------------------------------
// Command types
// ---------------------------------------------------------------------------

/// Reply channel for one procedure call.  Store failures cross the channel
/// as text; the handle re-wraps them as [`RpcError::Store`].
///
/// [`RpcError::Store`]: crate::RpcError::Store
pub type ReplyTo<T> = oneshot::Sender<Result<T, String>>;

/// Commands sent *into* the backend task.  One variant per stored procedure.
#[derive(Debug)]
pub enum BackendCommand {
    /// Create a room and admit the caller as its admin, atomically.
    CreateRoomAndJoin {
        caller: UserId,
        spec: RoomSpec,
        reply: ReplyTo<CreateReply>,
    },
    /// Join a room through the capacity-checked insert.
    JoinRoom {
        caller: UserId,
        room_id: RoomId,
        reply: ReplyTo<JoinReply>,
    },
    /// Check whether a short code resolves to an active room.
    ValidateJoinCode {
        code: JoinCode,
        reply: ReplyTo<CodeValidation>,
    },
    /// Remove the caller's membership row, if any.
    Leave {
        caller: UserId,
        room_id: RoomId,
        reply: ReplyTo<LeaveReply>,
    },
    /// Persist a message under a caller-supplied id.
    SendMessage {
        caller: UserId,
        room_id: RoomId,
        message_id: Uuid,
        content: String,
        reply: ReplyTo<SendReply>,
    },
    /// Creator-only edit of a room's descriptive fields.
    UpdateRoom {
        caller: UserId,
        room_id: RoomId,
        patch: RoomPatch,
        reply: ReplyTo<MutateReply>,
    },
    /// Creator-only replacement of a room's short code.
    RegenerateCode {
        caller: UserId,
        room_id: RoomId,
        reply: ReplyTo<MutateReply>,
    },
    /// Creator-only soft delete.
    DeleteRoom {
        caller: UserId,
        room_id: RoomId,
        reply: ReplyTo<MutateReply>,
    },
    /// Open (or re-open) a request to join a room.
    RequestJoin {
        caller: UserId,
        room_id: RoomId,
        reply: ReplyTo<RequestReply>,
    },
    /// Admin resolution of a pending join request.
    ResolveRequest {
        caller: UserId,
        request_id: Uuid,
        approve: bool,
        reply: ReplyTo<ResolveReply>,
    },
    /// Fetch an active room by id.
    RoomById {
        room_id: RoomId,
        reply: ReplyTo<Option<Room>>,
    },
    /// Fetch an active room by short code.
    RoomByCode {
        code: JoinCode,
        reply: ReplyTo<Option<Room>>,
    },
    /// Current member count of a room.
    MemberCount {
        room_id: RoomId,
        reply: ReplyTo<u32>,
    },
    /// List a room's members.
    Members {
        room_id: RoomId,
        reply: ReplyTo<Vec<Membership>>,
    },
    /// The latest `limit` messages of a room, oldest first.
    Messages {
        room_id: RoomId,
        limit: u32,
        reply: ReplyTo<Vec<Message>>,
    },
    /// One user's membership in one room, if any.
    Membership {
        room_id: RoomId,
        user_id: UserId,
        reply: ReplyTo<Option<Membership>>,
    },
    /// One user's join request for one room, if any.
    RequestFor {
        room_id: RoomId,
        user_id: UserId,
        reply: ReplyTo<Option<JoinRequest>>,
    },
    /// Obtain a fresh receiver on the change feed.
    SubscribeFeed {
        reply: oneshot::Sender<broadcast::Receiver<ChangeEvent>>,
    },
    /// Gracefully shut down the backend task.
    Shutdown,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Where the backing database lives.
#[derive(Debug, Clone)]
pub enum DatabaseLocation {
    /// Platform data directory (the production default).
    PlatformDefault,
    /// Explicit database file path.
    Path(PathBuf),
    /// Private in-memory database; state dies with the service.
    InMemory,
}

/// Configuration for spawning the backend service.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub location: DatabaseLocation,
    /// Capacity of the change-feed broadcast channel.  Subscribers that
    /// fall further behind than this observe a lag notification.
    pub feed_capacity: usize,
    /// Candidate codes drawn per short-code allocation before giving up.
    pub code_attempts: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            location: DatabaseLocation::PlatformDefault,
            feed_capacity: DEFAULT_FEED_CAPACITY,
            code_attempts: CODE_ALLOC_ATTEMPTS,
        }
    }
}

const COMMAND_BUFFER: usize = 256;

// ---------------------------------------------------------------------------
// Service loop
// ---------------------------------------------------------------------------

/// Spawn the backend service in a background tokio task.
///
/// Opens (and migrates) the database up front so configuration problems
/// surface here rather than inside the task, then returns a clonable
/// [`BackendHandle`] for issuing commands.
pub async fn spawn_backend(config: BackendConfig) -> anyhow::Result<BackendHandle> {
    let db = match &config.location {
        DatabaseLocation::PlatformDefault => Database::new()?,
        DatabaseLocation::Path(path) => Database::open_at(path)?,
        DatabaseLocation::InMemory => Database::open_in_memory()?,
    };

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<BackendCommand>(COMMAND_BUFFER);
    let (feed_tx, _) = broadcast::channel::<ChangeEvent>(config.feed_capacity);
    let code_attempts = config.code_attempts;

    info!(
        feed_capacity = config.feed_capacity,
        location = ?config.location,
        "Backend service starting"
    );

    tokio::spawn(async move {
        let mut db = db;

        loop {
            match cmd_rx.recv().await {
                Some(BackendCommand::Shutdown) => {
                    info!("Backend shutdown requested");
                    break;
                }
                Some(cmd) => handle_command(&mut db, &feed_tx, code_attempts, cmd),
                None => {
                    // All handles dropped
                    info!("Command channel closed, shutting down backend");
                    break;
                }
            }
        }

        info!("Backend service loop terminated");
    });

    Ok(BackendHandle::new(cmd_tx))
}

/// Execute one command against the store and publish the resulting change
/// events.  Events go out only after the procedure has committed.
fn handle_command(
    db: &mut Database,
    feed: &broadcast::Sender<ChangeEvent>,
    code_attempts: u32,
    cmd: BackendCommand,
) {
    match cmd {
        BackendCommand::CreateRoomAndJoin {
            caller,
            spec,
            reply,
        } => match db.create_room_and_join(caller, &spec, code_attempts) {
            Ok(created) => {
                debug!(room = %created.room.id, creator = %caller, "room created");
                publish(feed, ChangeEvent::insert(RowChange::Room(created.room.clone())));
                publish(
                    feed,
                    ChangeEvent::insert(RowChange::Member(created.membership.clone())),
                );
                let _ = reply.send(Ok(created));
            }
            Err(e) => {
                let _ = reply.send(Err(store_failure("create_room_and_join", e)));
            }
        },

        BackendCommand::JoinRoom {
            caller,
            room_id,
            reply,
        } => match db.join_room(caller, room_id) {
            Ok(outcome) => {
                if let JoinReply::Joined { membership, .. } = &outcome {
                    debug!(room = %room_id, user = %caller, "member joined");
                    publish(feed, ChangeEvent::insert(RowChange::Member(membership.clone())));
                }
                let _ = reply.send(Ok(outcome));
            }
            Err(e) => {
                let _ = reply.send(Err(store_failure("join_room", e)));
            }
        },

        BackendCommand::ValidateJoinCode { code, reply } => {
            let _ = reply.send(
                db.validate_code(&code)
                    .map_err(|e| store_failure("validate_code", e)),
            );
        }

        BackendCommand::Leave {
            caller,
            room_id,
            reply,
        } => match db.leave_room(caller, room_id) {
            Ok(outcome) => {
                if let LeaveReply::Left(membership) = &outcome {
                    debug!(room = %room_id, user = %caller, "member left");
                    publish(feed, ChangeEvent::delete(RowChange::Member(membership.clone())));
                }
                let _ = reply.send(Ok(outcome));
            }
            Err(e) => {
                let _ = reply.send(Err(store_failure("leave_room", e)));
            }
        },

        BackendCommand::SendMessage {
            caller,
            room_id,
            message_id,
            content,
            reply,
        } => match db.insert_message(caller, room_id, message_id, &content) {
            Ok(outcome) => {
                if let SendReply::Sent(message) = &outcome {
                    publish(feed, ChangeEvent::insert(RowChange::Message(message.clone())));
                }
                let _ = reply.send(Ok(outcome));
            }
            Err(e) => {
                let _ = reply.send(Err(store_failure("insert_message", e)));
            }
        },

        BackendCommand::UpdateRoom {
            caller,
            room_id,
            patch,
            reply,
        } => match db.update_room(caller, room_id, &patch) {
            Ok(outcome) => {
                if let MutateReply::Updated(room) = &outcome {
                    debug!(room = %room_id, "room updated");
                    publish(feed, ChangeEvent::update(RowChange::Room(room.clone())));
                }
                let _ = reply.send(Ok(outcome));
            }
            Err(e) => {
                let _ = reply.send(Err(store_failure("update_room", e)));
            }
        },

        BackendCommand::RegenerateCode {
            caller,
            room_id,
            reply,
        } => match db.regenerate_code(caller, room_id, code_attempts) {
            Ok(outcome) => {
                if let MutateReply::Updated(room) = &outcome {
                    debug!(room = %room_id, "join code regenerated");
                    publish(feed, ChangeEvent::update(RowChange::Room(room.clone())));
                }
                let _ = reply.send(Ok(outcome));
            }
            Err(e) => {
                let _ = reply.send(Err(store_failure("regenerate_code", e)));
            }
        },

        BackendCommand::DeleteRoom {
            caller,
            room_id,
            reply,
        } => match db.soft_delete_room(caller, room_id) {
            Ok(outcome) => {
                if let MutateReply::Updated(room) = &outcome {
                    info!(room = %room_id, "room deactivated");
                    publish(feed, ChangeEvent::update(RowChange::Room(room.clone())));
                }
                let _ = reply.send(Ok(outcome));
            }
            Err(e) => {
                let _ = reply.send(Err(store_failure("soft_delete_room", e)));
            }
        },

        BackendCommand::RequestJoin {
            caller,
            room_id,
            reply,
        } => match db.request_join(caller, room_id) {
            Ok(outcome) => {
                if let RequestReply::Requested(request) = &outcome {
                    debug!(room = %room_id, user = %caller, "join requested");
                    publish(feed, ChangeEvent::insert(RowChange::Request(request.clone())));
                }
                let _ = reply.send(Ok(outcome));
            }
            Err(e) => {
                let _ = reply.send(Err(store_failure("request_join", e)));
            }
        },

        BackendCommand::ResolveRequest {
            caller,
            request_id,
            approve,
            reply,
        } => match db.resolve_request(caller, request_id, approve) {
            Ok(outcome) => {
                match &outcome {
                    ResolveReply::Approved {
                        request,
                        membership,
                    } => {
                        debug!(room = %request.room_id, user = %request.user_id, "request approved");
                        publish(feed, ChangeEvent::insert(RowChange::Member(membership.clone())));
                        publish(feed, ChangeEvent::update(RowChange::Request(request.clone())));
                    }
                    ResolveReply::Declined(request) => {
                        debug!(room = %request.room_id, user = %request.user_id, "request declined");
                        publish(feed, ChangeEvent::update(RowChange::Request(request.clone())));
                    }
                    _ => {}
                }
                let _ = reply.send(Ok(outcome));
            }
            Err(e) => {
                let _ = reply.send(Err(store_failure("resolve_request", e)));
            }
        },

        BackendCommand::RoomById { room_id, reply } => {
            let _ = reply.send(
                db.room_by_id(room_id)
                    .map_err(|e| store_failure("room_by_id", e)),
            );
        }

        BackendCommand::RoomByCode { code, reply } => {
            let _ = reply.send(
                db.room_by_code(&code)
                    .map_err(|e| store_failure("room_by_code", e)),
            );
        }

        BackendCommand::MemberCount { room_id, reply } => {
            let _ = reply.send(
                db.member_count(room_id)
                    .map_err(|e| store_failure("member_count", e)),
            );
        }

        BackendCommand::Members { room_id, reply } => {
            let _ = reply.send(
                db.members_for_room(room_id)
                    .map_err(|e| store_failure("members_for_room", e)),
            );
        }

        BackendCommand::Messages {
            room_id,
            limit,
            reply,
        } => {
            let _ = reply.send(
                db.messages_for_room(room_id, limit)
                    .map_err(|e| store_failure("messages_for_room", e)),
            );
        }

        BackendCommand::Membership {
            room_id,
            user_id,
            reply,
        } => {
            let _ = reply.send(
                db.membership(room_id, user_id)
                    .map_err(|e| store_failure("membership", e)),
            );
        }

        BackendCommand::RequestFor {
            room_id,
            user_id,
            reply,
        } => {
            let _ = reply.send(
                db.request_for(room_id, user_id)
                    .map_err(|e| store_failure("request_for", e)),
            );
        }

        BackendCommand::SubscribeFeed { reply } => {
            let _ = reply.send(feed.subscribe());
        }

        // Handled by the service loop before dispatch.
        BackendCommand::Shutdown => {}
    }
}

/// Publish a committed change on the feed.  A send error only means nobody
/// is subscribed right now, which is normal at startup.
fn publish(feed: &broadcast::Sender<ChangeEvent>, event: ChangeEvent) {
    if feed.send(event).is_err() {
        debug!("no change feed subscribers");
    }
}

fn store_failure(procedure: &'static str, e: StoreError) -> String {
    error!(procedure, error = %e, "Stored procedure failed");
    e.to_string()
}
