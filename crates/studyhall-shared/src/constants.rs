/// Characters a generated join code is drawn from. Ambiguous glyphs
/// (I, L, O, 0, 1) are excluded so codes survive being read aloud.
pub const CODE_CHARSET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Shortest valid join code
pub const CODE_MIN_LEN: usize = 6;

/// Longest valid join code
pub const CODE_MAX_LEN: usize = 8;

/// Candidate codes tried per allocation before the transaction gives up
pub const CODE_ALLOC_ATTEMPTS: u32 = 8;

/// Default capacity of the change-feed broadcast channel
pub const DEFAULT_FEED_CAPACITY: usize = 256;

/// Default bounded window of messages kept in a local room view
pub const DEFAULT_MESSAGE_WINDOW: usize = 200;

/// Longest accepted room name, in characters
pub const MAX_ROOM_NAME_LEN: usize = 100;

/// Longest accepted chat message, in characters
pub const MAX_MESSAGE_LEN: usize = 2_000;
