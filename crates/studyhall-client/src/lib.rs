// Client core: resolves room identifiers, drives membership through the
// backend's atomic procedures, and keeps per-room views live off the
// change feed.

pub mod directory;
pub mod error;
pub mod events;
pub mod membership;
pub mod state;
pub mod sync;

pub use directory::{JoinIntent, RoomDirectory};
pub use error::{DirectoryError, MembershipError, SyncError, SyncResult};
pub use events::SyncUpdate;
pub use membership::{
    CreatedRoom, JoinOutcome, MembershipCoordinator, RequestOutcome, ResolveOutcome, RoomDetails,
};
pub use state::{Applied, RoomView, SharedRoomView};
pub use sync::{LiveSync, SubscriptionKey};
