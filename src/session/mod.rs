//! Per-session plan history and persisted run records.

pub mod history;
pub mod records;

pub use history::*;
pub use records::*;

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session id must not be empty")]
    Empty,
    #[error("session id longer than {max} characters")]
    TooLong { max: usize },
    #[error("session id may only contain ASCII letters, digits, '-' and '_'")]
    InvalidCharacter,
}

/// Logical session identifier. Also used as a directory name for run records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub const MAX_LEN: usize = 64;

    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        if raw.is_empty() {
            return Err(SessionError::Empty);
        }
        if raw.len() > Self::MAX_LEN {
            return Err(SessionError::TooLong { max: Self::MAX_LEN });
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(SessionError::InvalidCharacter);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_path_like_ids() {
        assert_eq!(SessionId::parse("../etc"), Err(SessionError::InvalidCharacter));
        assert_eq!(SessionId::parse(""), Err(SessionError::Empty));
        assert!(SessionId::parse(&"a".repeat(65)).is_err());
        assert_eq!(SessionId::parse("grid-ops_7").unwrap().as_str(), "grid-ops_7");
    }
}
