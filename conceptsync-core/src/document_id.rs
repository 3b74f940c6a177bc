//! Document identifiers.
//!
//! A document id doubles as a storage key (queue entries, sync records and
//! lock resource ids are all keyed by it), so only a conservative character
//! set is accepted: ASCII letters, digits, `-` and `_`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Maximum accepted length of a document id.
pub const MAX_ID_LEN: usize = 128;

/// Errors that can occur with document IDs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentIdError {
    #[error("Document ID is empty")]
    Empty,

    #[error("Document ID too long: {0} characters (max 128)")]
    TooLong(usize),

    #[error("Invalid character {1:?} in document ID '{0}'")]
    InvalidChar(String, char),
}

/// Identifier of a synchronized document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    /// Generate a new random document ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse and validate a document ID.
    pub fn parse(s: &str) -> Result<Self, DocumentIdError> {
        if s.is_empty() {
            return Err(DocumentIdError::Empty);
        }
        if s.len() > MAX_ID_LEN {
            return Err(DocumentIdError::TooLong(s.len()));
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(DocumentIdError::InvalidChar(s.to_string(), c));
        }
        Ok(Self(s.to_string()))
    }

    /// Create from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for DocumentId {
    type Err = DocumentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DocumentId {
    type Error = DocumentIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_generates_unique_ids() {
        let id1 = DocumentId::new();
        let id2 = DocumentId::new();
        assert_ne!(id1, id2);
        assert!(DocumentId::parse(id1.as_str()).is_ok());
    }

    #[test]
    fn test_parse_accepts_safe_chars() {
        let id = DocumentId::parse("concept-map_01").unwrap();
        assert_eq!(id.as_str(), "concept-map_01");
        assert_eq!(id.to_string(), "concept-map_01");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!(DocumentId::parse(""), Err(DocumentIdError::Empty));
    }

    #[test]
    fn test_parse_rejects_path_traversal() {
        assert!(matches!(
            DocumentId::parse("../etc"),
            Err(DocumentIdError::InvalidChar(_, '.'))
        ));
        assert!(matches!(
            DocumentId::parse("a/b"),
            Err(DocumentIdError::InvalidChar(_, '/'))
        ));
    }

    #[test]
    fn test_parse_rejects_too_long() {
        let long = "a".repeat(MAX_ID_LEN + 1);
        assert_eq!(
            DocumentId::parse(&long),
            Err(DocumentIdError::TooLong(MAX_ID_LEN + 1))
        );
    }

    #[test]
    fn test_from_uuid() {
        let uuid = Uuid::new_v4();
        let id = DocumentId::from_uuid(uuid);
        assert_eq!(id.as_str(), uuid.to_string());
    }

    #[test]
    fn test_serde_validates() {
        let id = DocumentId::parse("doc1").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"doc1\"");

        let parsed: DocumentId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);

        let bad: Result<DocumentId, _> = serde_json::from_str("\"not/valid\"");
        assert!(bad.is_err());
    }
}
