// Backend service: a tokio task owning the SQLite store, driven by typed
// commands and publishing committed changes on a broadcast feed.

pub mod handle;
pub mod service;

mod error;

pub use error::RpcError;
pub use handle::BackendHandle;
pub use service::{spawn_backend, BackendCommand, BackendConfig, DatabaseLocation, ReplyTo};
