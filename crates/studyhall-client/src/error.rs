use thiserror::Error;

/// Failures of the identifier-to-room resolution path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    /// The identifier is empty after trimming.
    #[error("Identifier is empty")]
    EmptyIdentifier,

    /// No active room matches the identifier.  Covers malformed shapes too:
    /// an unparseable identifier cannot match anything.
    #[error("No active room matches the identifier")]
    NotFound,

    #[error("Backend error: {0}")]
    Backend(String),
}

/// The public error taxonomy of the membership core.
///
/// Business outcomes that are not failures (`AlreadyMember`, `AlreadyPending`)
/// never appear here; they are success variants of the coordinator's outcome
/// types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MembershipError {
    /// Malformed input caught locally; the backend was never contacted.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The identifier or id does not resolve to an active room (or, on the
    /// approval path, the request itself is gone).
    #[error("Room not found")]
    RoomNotFound,

    /// The room exists but is private and the caller holds no membership.
    #[error("Room is private")]
    RoomPrivate,

    /// The room is at its member limit.
    #[error("Room is at maximum capacity")]
    MaxCapacity,

    /// The join code does not resolve to an active room.  Deliberately the
    /// same signal for never-issued codes and codes of soft-deleted rooms.
    #[error("Invalid join code")]
    InvalidCode,

    /// An operation reserved for the room's creator, an admin, or a member
    /// was attempted by someone else.
    #[error("Not authorized for this operation")]
    NotAuthorized,

    /// The caller's join request was declined, which is terminal.
    #[error("Join request was declined")]
    RequestDeclined,

    /// Transport or transactional failure not otherwise classified.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl MembershipError {
    /// One distinct user-facing message per error kind, ready for the
    /// presentation layer.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(detail) => format!("Please check your input: {detail}."),
            Self::RoomNotFound => "That room doesn't exist or is no longer active.".to_string(),
            Self::RoomPrivate => {
                "That room is private. Ask to join and an admin will review your request."
                    .to_string()
            }
            Self::MaxCapacity => "That room is full. Try again once a seat frees up.".to_string(),
            Self::InvalidCode => "That join code isn't valid.".to_string(),
            Self::NotAuthorized => "You don't have permission to do that.".to_string(),
            Self::RequestDeclined => "Your request to join this room was declined.".to_string(),
            Self::Backend(_) => "Something went wrong talking to the server.".to_string(),
        }
    }
}

impl From<DirectoryError> for MembershipError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::EmptyIdentifier => Self::Validation(e.to_string()),
            DirectoryError::NotFound => Self::RoomNotFound,
            DirectoryError::Backend(text) => Self::Backend(text),
        }
    }
}

/// Failures of the live-sync subscription path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// The backend's change feed could not be reached.
    #[error("Change feed unavailable: {0}")]
    FeedUnavailable(String),
}

pub type SyncResult<T> = Result<T, SyncError>;
