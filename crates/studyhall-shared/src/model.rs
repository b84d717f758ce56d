//! Domain records shared by the store, the service boundary, and clients.
//!
//! Every struct derives `Serialize`/`Deserialize` so rows can be handed
//! directly to a presentation layer without re-mapping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::code::JoinCode;
use crate::constants::{MAX_MESSAGE_LEN, MAX_ROOM_NAME_LEN};
use crate::error::SpecError;
use crate::types::{RequestStatus, RoomId, RoomRole, UserId};

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// A study room row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Room {
    /// Canonical identifier.
    pub id: RoomId,
    /// Human-shareable invite code (uppercase, 6-8 characters, unique).
    pub short_code: JoinCode,
    pub name: String,
    pub description: Option<String>,
    /// Free-form subject tag ("linear algebra", "organic chem", ...).
    pub subject: Option<String>,
    /// Hard cap on concurrent members, creator included.
    pub max_members: u32,
    /// Public rooms are joinable directly; private rooms go through the
    /// request-to-join flow.
    pub is_public: bool,
    pub creator_id: UserId,
    /// Soft-delete flag. An inactive room resolves nowhere and rejects
    /// every join attempt.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// One user's membership in one room.
///
/// `id` is the surrogate key feed events are reconciled by;
/// (room_id, user_id) is unique, so a user holds at most one row per room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Membership {
    pub id: Uuid,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub role: RoomRole,
    pub joined_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A chat message.
///
/// Ids are generated client-side so the optimistic local copy and the
/// backend's confirming feed event share one identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Join request
// ---------------------------------------------------------------------------

/// A request to join a private room, resolved by a room admin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinRequest {
    pub id: Uuid,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub status: RequestStatus,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Room spec / patch
// ---------------------------------------------------------------------------

/// Attributes for a new room, validated before anything reaches the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomSpec {
    pub name: String,
    pub description: Option<String>,
    pub subject: Option<String>,
    pub is_public: bool,
    pub max_members: u32,
}

impl RoomSpec {
    /// Check the local invariants: non-empty name within bounds, positive
    /// capacity.
    pub fn validate(&self) -> Result<(), SpecError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(SpecError::EmptyName);
        }
        let len = name.chars().count();
        if len > MAX_ROOM_NAME_LEN {
            return Err(SpecError::NameTooLong(len));
        }
        if self.max_members == 0 {
            return Err(SpecError::ZeroCapacity);
        }
        Ok(())
    }
}

/// Creator-side edit of room attributes. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub subject: Option<String>,
}

impl RoomPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.subject.is_none()
    }

    /// A patched name must satisfy the same bounds as a new one.
    pub fn validate(&self) -> Result<(), SpecError> {
        if let Some(name) = &self.name {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(SpecError::EmptyName);
            }
            let len = trimmed.chars().count();
            if len > MAX_ROOM_NAME_LEN {
                return Err(SpecError::NameTooLong(len));
            }
        }
        Ok(())
    }
}

/// Check a message body before it leaves the client.
pub fn validate_message(content: &str) -> Result<(), SpecError> {
    if content.trim().is_empty() {
        return Err(SpecError::EmptyMessage);
    }
    let len = content.chars().count();
    if len > MAX_MESSAGE_LEN {
        return Err(SpecError::MessageTooLong(len));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> RoomSpec {
        RoomSpec {
            name: "Linear Algebra".to_string(),
            description: None,
            subject: Some("math".to_string()),
            is_public: true,
            max_members: 8,
        }
    }

    #[test]
    fn test_spec_accepts_reasonable_rooms() {
        assert_eq!(spec().validate(), Ok(()));
    }

    #[test]
    fn test_spec_rejects_blank_name() {
        let mut s = spec();
        s.name = "   ".to_string();
        assert_eq!(s.validate(), Err(SpecError::EmptyName));
    }

    #[test]
    fn test_spec_rejects_zero_capacity() {
        let mut s = spec();
        s.max_members = 0;
        assert_eq!(s.validate(), Err(SpecError::ZeroCapacity));
    }

    #[test]
    fn test_spec_rejects_oversized_name() {
        let mut s = spec();
        s.name = "x".repeat(MAX_ROOM_NAME_LEN + 1);
        assert_eq!(
            s.validate(),
            Err(SpecError::NameTooLong(MAX_ROOM_NAME_LEN + 1))
        );
    }

    #[test]
    fn test_patch_validates_only_present_fields() {
        assert_eq!(RoomPatch::default().validate(), Ok(()));

        let patch = RoomPatch {
            name: Some("".to_string()),
            ..Default::default()
        };
        assert_eq!(patch.validate(), Err(SpecError::EmptyName));
    }

    #[test]
    fn test_message_bounds() {
        assert_eq!(validate_message("hi"), Ok(()));
        assert_eq!(validate_message(" \n"), Err(SpecError::EmptyMessage));
        assert_eq!(
            validate_message(&"m".repeat(MAX_MESSAGE_LEN + 1)),
            Err(SpecError::MessageTooLong(MAX_MESSAGE_LEN + 1))
        );
    }

    #[test]
    fn test_room_serializes_for_the_ui_layer() {
        let room = Room {
            id: RoomId::new(),
            short_code: crate::JoinCode::parse("AB3K9Q").unwrap(),
            name: "Quiet Hours".to_string(),
            description: Some("evening focus".to_string()),
            subject: None,
            max_members: 4,
            is_public: false,
            creator_id: UserId::new(),
            is_active: true,
            created_at: Utc::now(),
        };

        let value = serde_json::to_value(&room).unwrap();
        assert_eq!(value["name"], "Quiet Hours");
        assert_eq!(value["short_code"], "AB3K9Q");
        assert_eq!(value["is_public"], false);
        assert_eq!(value["max_members"], 4);
    }
}
