//! Client-minted entity identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a task, project, note or collection.
///
/// Ids are minted by clients and stay stable for the entity's lifetime, which
/// is what makes upsert-by-id idempotent. Any UUID spelling is accepted and
/// the client's exact text is kept: `6F1C...` and `6f1c...` are different ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Mint a new time-sortable id (UUID v7)
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// The id exactly as the client sent it
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for EntityId {
    type Error = uuid::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Uuid::parse_str(&value)?;
        Ok(Self(value))
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_unique() {
        assert_ne!(EntityId::new(), EntityId::new());
    }

    #[test]
    fn test_entity_id_parse() {
        let id = EntityId::new();
        let parsed: EntityId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_entity_id_keeps_client_spelling() {
        for raw in [
            "6F1C2A3E-9B4D-4C1E-8A7F-2D3C4B5A6E7F",
            "6f1c2a3e9b4d4c1e8a7f2d3c4b5a6e00",
            "{6f1c2a3e-9b4d-4c1e-8a7f-2d3c4b5a6e11}",
        ] {
            let parsed: EntityId = raw.parse().unwrap();
            assert_eq!(parsed.as_str(), raw);
            assert_eq!(parsed.to_string(), raw);
        }
        assert_ne!(
            "6F1C2A3E-9B4D-4C1E-8A7F-2D3C4B5A6E7F".parse::<EntityId>().unwrap(),
            "6f1c2a3e-9b4d-4c1e-8a7f-2d3c4b5a6e7f".parse::<EntityId>().unwrap()
        );
    }

    #[test]
    fn test_entity_id_rejects_garbage() {
        assert!("n1".parse::<EntityId>().is_err());
        assert!("".parse::<EntityId>().is_err());
        assert!(" 6f1c2a3e-9b4d-4c1e-8a7f-2d3c4b5a6e7f".parse::<EntityId>().is_err());
        assert!(serde_json::from_str::<EntityId>("\"inbox\"").is_err());
    }
}
