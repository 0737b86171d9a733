//! Prefixed identifiers and the prefix → resource type registry.
//!
//! Every identifier handled by the engine has the shape `<prefix>-<suffix>`,
//! where the 7 character prefix names the resource type the identifier
//! belongs to (e.g. `tnntten-...` for tenants, `permrol-...` for roles).

use crate::error::IdError;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub const PREFIX_LENGTH: usize = 7;
const SUFFIX_LENGTH: usize = 21;

/// An identifier carrying its resource type prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PrefixedId(String);

impl PrefixedId {
    /// Parse and validate an identifier.
    pub fn parse(value: &str) -> Result<Self, IdError> {
        let (prefix, suffix) = value
            .split_once('-')
            .ok_or_else(|| IdError::MissingSeparator(value.to_string()))?;

        if !is_valid_prefix(prefix) {
            return Err(IdError::InvalidPrefix(prefix.to_string()));
        }

        if suffix.is_empty()
            || !suffix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(IdError::InvalidSuffix(value.to_string()));
        }

        Ok(Self(value.to_string()))
    }

    /// Generate a fresh random identifier with the given prefix.
    pub fn generate(prefix: &str) -> Result<Self, IdError> {
        if !is_valid_prefix(prefix) {
            return Err(IdError::InvalidPrefix(prefix.to_string()));
        }

        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SUFFIX_LENGTH)
            .map(char::from)
            .collect();

        Ok(Self(format!("{prefix}-{suffix}")))
    }

    pub fn prefix(&self) -> &str {
        self.0.split_once('-').map_or("", |(prefix, _)| prefix)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub(crate) fn is_valid_prefix(prefix: &str) -> bool {
    prefix.len() == PREFIX_LENGTH
        && prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

impl fmt::Display for PrefixedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PrefixedId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PrefixedId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PrefixedId> for String {
    fn from(id: PrefixedId) -> Self {
        id.0
    }
}

/// Immutable mapping from identifier prefix to resource type name.
///
/// Built once and shared by an engine; independent engines may carry
/// independent registries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixRegistry {
    types: HashMap<String, String>,
}

impl PrefixRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a prefix to its resource type name.
    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        self.types.get(prefix).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl<P, T> FromIterator<(P, T)> for PrefixRegistry
where
    P: Into<String>,
    T: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (P, T)>>(iter: I) -> Self {
        Self {
            types: iter
                .into_iter()
                .map(|(prefix, type_name)| (prefix.into(), type_name.into()))
                .collect(),
        }
    }
}
