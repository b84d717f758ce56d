use thiserror::Error;

/// Failures crossing the service boundary.
///
/// Business outcomes never appear here; they are carried inside the typed
/// reply enums.  `RpcError` means the call itself could not complete.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    /// The command or reply channel is closed: the backend task is gone.
    #[error("Backend service unreachable")]
    Unreachable,

    /// A stored procedure failed mechanically; carries the store's error
    /// text as surfaced across the reply channel.
    #[error("Store error: {0}")]
    Store(String),
}
