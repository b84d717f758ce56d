//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `rooms`, `room_members`, `messages`, and
//! `join_requests`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Rooms
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS rooms (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    short_code  TEXT NOT NULL UNIQUE,         -- uppercase join code, 6-8 chars
    name        TEXT NOT NULL,
    description TEXT,
    subject     TEXT,
    max_members INTEGER NOT NULL,             -- creator included
    is_public   INTEGER NOT NULL DEFAULT 1,   -- boolean 0/1
    creator_id  TEXT NOT NULL,                -- UUID of the creating user
    is_active   INTEGER NOT NULL DEFAULT 1,   -- boolean 0/1, soft-delete flag
    created_at  TEXT NOT NULL                 -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Memberships
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS room_members (
    id        TEXT PRIMARY KEY NOT NULL,      -- UUID v4, the feed merge key
    room_id   TEXT NOT NULL,                  -- FK -> rooms(id)
    user_id   TEXT NOT NULL,                  -- UUID of the member
    role      TEXT NOT NULL,                  -- 'member' | 'admin'
    joined_at TEXT NOT NULL,                  -- ISO-8601

    UNIQUE (room_id, user_id),
    FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_members_room_id ON room_members(room_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id        TEXT PRIMARY KEY NOT NULL,      -- UUID v4, supplied by the sender
    room_id   TEXT NOT NULL,                  -- FK -> rooms(id)
    sender_id TEXT NOT NULL,                  -- UUID of the sender
    content   TEXT NOT NULL,
    sent_at   TEXT NOT NULL,                  -- ISO-8601

    FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_room_ts
    ON messages(room_id, sent_at DESC);

-- ----------------------------------------------------------------
-- Join requests
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS join_requests (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    room_id      TEXT NOT NULL,               -- FK -> rooms(id)
    user_id      TEXT NOT NULL,               -- UUID of the requester
    status       TEXT NOT NULL,               -- 'pending' | 'accepted' | 'declined'
    requested_at TEXT NOT NULL,               -- ISO-8601
    resolved_at  TEXT,                        -- ISO-8601, NULL while pending

    UNIQUE (room_id, user_id),
    FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_requests_room_id ON join_requests(room_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
