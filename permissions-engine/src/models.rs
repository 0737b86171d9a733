use crate::id::PrefixedId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A typed, globally unique handle used on both sides of every relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    pub resource_type: String,
    pub id: PrefixedId,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, id: PrefixedId) -> Self {
        Self {
            resource_type: resource_type.into(),
            id,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.id)
    }
}

/// A directed edge: `subject` fills `relation` on `resource`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub resource: Resource,
    pub relation: String,
    pub subject: Resource,
}

impl Relationship {
    pub fn new(resource: Resource, relation: impl Into<String>, subject: Resource) -> Self {
        Self {
            resource,
            relation: relation.into(),
            subject,
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.resource, self.relation, self.subject)
    }
}

/// A role bundling a set of granted actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: PrefixedId,
    pub actions: Vec<String>,
}

/// Opaque marker returned by every write. Passing it into a later read
/// guarantees that read observes the write. The empty token requests the
/// backend's default read consistency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsistencyToken(String);

impl ConsistencyToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ConsistencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConsistencyToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_equality_is_structural() {
        let id = PrefixedId::parse("tnntten-abc").unwrap();
        let a = Resource::new("tenant", id.clone());
        let b = Resource::new("tenant", id);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "tenant:tnntten-abc");
    }

    #[test]
    fn test_consistency_token_is_transparent() {
        let token = ConsistencyToken::new("GhUKEzE2OTk");
        assert_eq!(serde_json::to_string(&token).unwrap(), "\"GhUKEzE2OTk\"");
        assert!(ConsistencyToken::default().is_empty());
    }
}
