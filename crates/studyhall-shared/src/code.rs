use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::constants::{CODE_ALLOC_ATTEMPTS, CODE_CHARSET, CODE_MAX_LEN, CODE_MIN_LEN};
use crate::error::CodeError;

/// A normalized, shape-checked join code.
///
/// Codes are uppercase, 6-8 characters. Normalization accepts any ASCII
/// alphanumeric input (trimmed, uppercased); only *generation* restricts
/// itself to the unambiguous [`CODE_CHARSET`]. Whether a code currently
/// resolves to a room is the backend's call, not this type's.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct JoinCode(String);

impl JoinCode {
    /// Normalize raw user input: trim surrounding whitespace, uppercase,
    /// then check the 6-8 character alphanumeric shape.
    pub fn parse(raw: &str) -> Result<Self, CodeError> {
        let normalized = raw.trim().to_uppercase();

        if normalized.is_empty() {
            return Err(CodeError::Empty);
        }
        let len = normalized.chars().count();
        if len < CODE_MIN_LEN {
            return Err(CodeError::TooShort(len));
        }
        if len > CODE_MAX_LEN {
            return Err(CodeError::TooLong(len));
        }
        if let Some(bad) = normalized.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(CodeError::InvalidChar(bad));
        }

        Ok(Self(normalized))
    }

    /// Draw a random code of `len` characters from [`CODE_CHARSET`].
    pub fn generate(len: usize, rng: &mut impl Rng) -> Self {
        debug_assert!((CODE_MIN_LEN..=CODE_MAX_LEN).contains(&len));

        let code: String = (0..len)
            .map(|_| {
                let idx = rng.gen_range(0..CODE_CHARSET.len());
                CODE_CHARSET[idx] as char
            })
            .collect();

        Self(code)
    }

    /// Code length to draw for the given 1-based allocation attempt.
    ///
    /// The first half of the attempt budget draws the short form; the rest
    /// escalates to the long form so a crowded 6-character space cannot
    /// exhaust the budget on its own.
    pub fn attempt_len(attempt: u32) -> usize {
        if attempt <= CODE_ALLOC_ATTEMPTS / 2 {
            CODE_MIN_LEN
        } else {
            CODE_MAX_LEN
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JoinCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for JoinCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
