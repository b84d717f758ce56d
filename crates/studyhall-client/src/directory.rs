//! Identifier-to-room resolution.
//!
//! A user can paste either a room's canonical UUID or its short invite code.
//! [`JoinIntent`] classifies the raw input locally; [`RoomDirectory`] then
//! performs the single matching lookup.  Pure read-through, no cache, no
//! fuzzy matching.

use studyhall_backend::BackendHandle;
use studyhall_shared::code::JoinCode;
use studyhall_shared::model::Room;
use studyhall_shared::types::RoomId;

use crate::error::DirectoryError;

/// Identifiers at least this long that contain a `-` separator have the
/// opaque-id shape.  A hyphenated UUID is 36 characters; short codes never
/// come close.
const ID_SHAPE_MIN_LEN: usize = 32;

/// Which resolution path a raw identifier takes.  Ephemeral; lives for one
/// join attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinIntent {
    ById(RoomId),
    ByCode(JoinCode),
}

impl JoinIntent {
    /// Classify raw user input as a canonical id or a short code.
    ///
    /// Id-shaped input that fails UUID parsing is `NotFound` rather than
    /// falling through to the code path: a string with separators can never
    /// be a valid code, and misclassifying it would produce confusing
    /// "invalid code" outcomes for mangled room links.
    pub fn classify(raw: &str) -> Result<Self, DirectoryError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DirectoryError::EmptyIdentifier);
        }

        if trimmed.contains('-') && trimmed.len() >= ID_SHAPE_MIN_LEN {
            return match RoomId::parse(trimmed) {
                Ok(id) => Ok(Self::ById(id)),
                Err(_) => Err(DirectoryError::NotFound),
            };
        }

        JoinCode::parse(trimmed)
            .map(Self::ByCode)
            .map_err(|_| DirectoryError::NotFound)
    }
}

/// Resolves any user-supplied identifier to exactly one active room.
#[derive(Debug, Clone)]
pub struct RoomDirectory {
    backend: BackendHandle,
}

impl RoomDirectory {
    pub fn new(backend: BackendHandle) -> Self {
        Self { backend }
    }

    /// Resolve an identifier to its active room, or report `NotFound`.
    ///
    /// Inactive rooms are not eligible; the store's read queries enforce
    /// that, so a soft-deleted room is indistinguishable from one that
    /// never existed.
    pub async fn resolve(&self, identifier: &str) -> Result<Room, DirectoryError> {
        let found = match JoinIntent::classify(identifier)? {
            JoinIntent::ById(room_id) => self.backend.room_by_id(room_id).await,
            JoinIntent::ByCode(code) => self.backend.room_by_code(code).await,
        }
        .map_err(|e| DirectoryError::Backend(e.to_string()))?;

        found.ok_or(DirectoryError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use studyhall_backend::{spawn_backend, BackendConfig, DatabaseLocation};
    use studyhall_shared::model::RoomSpec;
    use studyhall_shared::types::UserId;

    #[test]
    fn test_classify_uuid_shape_by_exact_parse() {
        let id = RoomId::new();
        assert_eq!(
            JoinIntent::classify(&id.to_string()),
            Ok(JoinIntent::ById(id))
        );
        assert_eq!(
            JoinIntent::classify(&format!("  {id}  ")),
            Ok(JoinIntent::ById(id))
        );
    }

    #[test]
    fn test_classify_code_shape_normalizes() {
        let expected = JoinCode::parse("AB3K9Q").unwrap();
        assert_eq!(
            JoinIntent::classify(" ab3k9q "),
            Ok(JoinIntent::ByCode(expected))
        );
    }

    #[test]
    fn test_classify_rejects_empty_input() {
        assert_eq!(JoinIntent::classify(""), Err(DirectoryError::EmptyIdentifier));
        assert_eq!(
            JoinIntent::classify("   \n"),
            Err(DirectoryError::EmptyIdentifier)
        );
    }

    #[test]
    fn test_classify_id_shaped_garbage_is_not_found() {
        assert_eq!(
            JoinIntent::classify("not-a-uuid-but-shaped-roughly-like-one"),
            Err(DirectoryError::NotFound)
        );
    }

    #[test]
    fn test_classify_malformed_codes_are_not_found() {
        for raw in ["AB3", "WAYTOOLONGFORACODE", "AB-39Q"] {
            assert_eq!(JoinIntent::classify(raw), Err(DirectoryError::NotFound));
        }
    }

    async fn test_backend() -> BackendHandle {
        let config = BackendConfig {
            location: DatabaseLocation::InMemory,
            ..BackendConfig::default()
        };
        spawn_backend(config).await.unwrap()
    }

    fn spec(name: &str) -> RoomSpec {
        RoomSpec {
            name: name.to_string(),
            description: None,
            subject: None,
            is_public: true,
            max_members: 4,
        }
    }

    #[tokio::test]
    async fn test_resolve_finds_rooms_by_either_identifier() {
        let backend = test_backend().await;
        let directory = RoomDirectory::new(backend.clone());
        let created = backend
            .create_room_and_join(UserId::new(), spec("topology"))
            .await
            .unwrap();

        let by_id = directory.resolve(&created.room.id.to_string()).await.unwrap();
        assert_eq!(by_id, created.room);

        let lowered = created.room.short_code.as_str().to_lowercase();
        let by_code = directory.resolve(&lowered).await.unwrap();
        assert_eq!(by_code, created.room);
    }

    #[tokio::test]
    async fn test_resolve_skips_inactive_rooms() {
        let backend = test_backend().await;
        let directory = RoomDirectory::new(backend.clone());
        let creator = UserId::new();
        let created = backend
            .create_room_and_join(creator, spec("ephemeral"))
            .await
            .unwrap();

        backend.delete_room(creator, created.room.id).await.unwrap();

        assert_eq!(
            directory.resolve(&created.room.id.to_string()).await,
            Err(DirectoryError::NotFound)
        );
        assert_eq!(
            directory.resolve(created.room.short_code.as_str()).await,
            Err(DirectoryError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_resolve_unknown_identifier_is_not_found() {
        let backend = test_backend().await;
        let directory = RoomDirectory::new(backend);

        assert_eq!(
            directory.resolve(&RoomId::new().to_string()).await,
            Err(DirectoryError::NotFound)
        );
        assert_eq!(
            directory.resolve("QQQQQQ").await,
            Err(DirectoryError::NotFound)
        );
    }
}
