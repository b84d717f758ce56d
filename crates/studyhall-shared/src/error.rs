use thiserror::Error;

/// Shape violations found while normalizing a join code.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodeError {
    #[error("Join code is empty")]
    Empty,

    #[error("Join code too short ({0} characters)")]
    TooShort(usize),

    #[error("Join code too long ({0} characters)")]
    TooLong(usize),

    #[error("Join code contains invalid character {0:?}")]
    InvalidChar(char),
}

/// Validation failures for a new-room specification or a room patch.
/// These are caught locally and never reach the backend.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("Room name must not be empty")]
    EmptyName,

    #[error("Room name too long ({0} characters)")]
    NameTooLong(usize),

    #[error("Room capacity must be at least 1")]
    ZeroCapacity,

    #[error("Message must not be empty")]
    EmptyMessage,

    #[error("Message too long ({0} characters)")]
    MessageTooLong(usize),
}
