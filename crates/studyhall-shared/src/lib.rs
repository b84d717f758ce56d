//! # studyhall-shared
//!
//! Domain types and the wire contract shared by the store, the backend
//! service boundary, and the client core: identifiers, join codes, row
//! records, change-feed events, and the typed replies of every stored
//! procedure.

pub mod code;
pub mod constants;
pub mod model;
pub mod protocol;
pub mod types;

mod error;

pub use code::JoinCode;
pub use error::{CodeError, SpecError};
pub use model::{JoinRequest, Membership, Message, Room, RoomPatch, RoomSpec};
pub use types::{RequestStatus, RoomId, RoomRole, UserId};
