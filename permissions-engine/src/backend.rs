//! The permission backend seam.
//!
//! The engine speaks to its backend exclusively through [`PermissionsBackend`].
//! Object types crossing this boundary are already namespaced (`ns/type`).

use crate::{error::BackendError, models::ConsistencyToken, schema::Schema};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod check;
pub mod memory;
pub mod proto;
pub mod spicedb;

pub use memory::InMemoryBackend;
pub use spicedb::SpiceDbBackend;

/// An object in the backend: a namespaced type plus an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Object {
    pub object_type: String,
    pub object_id: String,
}

impl Object {
    pub fn new(object_type: &str, object_id: &str) -> Self {
        Self {
            object_type: object_type.to_string(),
            object_id: object_id.to_string(),
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

/// The subject side of a tuple: an object, or a relation on an object
/// (a userset such as `role:permrol-abc#subject`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub object: Object,
    pub relation: Option<String>,
}

impl Subject {
    pub fn object(object: Object) -> Self {
        Self {
            object,
            relation: None,
        }
    }

    pub fn userset(object: Object, relation: &str) -> Self {
        Self {
            object,
            relation: Some(relation.to_string()),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.relation {
            Some(ref relation) => write!(f, "{}#{}", self.object, relation),
            None => write!(f, "{}", self.object),
        }
    }
}

/// A relationship tuple: `subject` has `relation` to `resource`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tuple {
    pub resource: Object,
    pub relation: String,
    pub subject: Subject,
}

impl Tuple {
    pub fn new(resource: Object, relation: &str, subject: Subject) -> Self {
        Self {
            resource,
            relation: relation.to_string(),
            subject,
        }
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.resource, self.relation, self.subject)
    }
}

/// One element of an atomic write batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TupleUpdate {
    /// Create the tuple, or keep it if it already exists.
    Touch(Tuple),
    /// Remove the tuple if it exists.
    Delete(Tuple),
}

/// Filter over tuples. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleFilter {
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub relation: Option<String>,
    pub subject: Option<SubjectFilter>,
}

/// `relation: None` matches any subject relation. `Some("")` matches only
/// plain object subjects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectFilter {
    pub subject_type: String,
    pub subject_id: Option<String>,
    pub relation: Option<String>,
}

impl TupleFilter {
    /// Every tuple whose resource is `resource`.
    pub fn from_resource(resource: &Object) -> Self {
        Self {
            resource_type: resource.object_type.clone(),
            resource_id: Some(resource.object_id.clone()),
            ..Self::default()
        }
    }

    /// Exactly the given tuple.
    pub fn exact(tuple: &Tuple) -> Self {
        Self {
            resource_type: tuple.resource.object_type.clone(),
            resource_id: Some(tuple.resource.object_id.clone()),
            relation: Some(tuple.relation.clone()),
            subject: Some(SubjectFilter {
                subject_type: tuple.subject.object.object_type.clone(),
                subject_id: Some(tuple.subject.object.object_id.clone()),
                relation: Some(tuple.subject.relation.clone().unwrap_or_default()),
            }),
        }
    }

    pub fn with_relation(mut self, relation: &str) -> Self {
        self.relation = Some(relation.to_string());
        self
    }

    pub fn with_subject(mut self, subject: SubjectFilter) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn matches(&self, tuple: &Tuple) -> bool {
        if tuple.resource.object_type != self.resource_type {
            return false;
        }

        if let Some(ref id) = self.resource_id {
            if &tuple.resource.object_id != id {
                return false;
            }
        }

        if let Some(ref relation) = self.relation {
            if &tuple.relation != relation {
                return false;
            }
        }

        if let Some(ref subject) = self.subject {
            if tuple.subject.object.object_type != subject.subject_type {
                return false;
            }
            if let Some(ref id) = subject.subject_id {
                if &tuple.subject.object.object_id != id {
                    return false;
                }
            }
            if let Some(ref relation) = subject.relation {
                if tuple.subject.relation.as_deref().unwrap_or_default() != relation.as_str() {
                    return false;
                }
            }
        }

        true
    }
}

/// Outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permissionship {
    Granted,
    Denied,
    /// Granted only if caveat context not supplied by the caller is met.
    Conditional,
}

/// A Zanzibar-style permission service.
#[async_trait]
pub trait PermissionsBackend: Send + Sync {
    /// Replace the stored schema.
    async fn write_schema(&self, schema: &Schema) -> Result<ConsistencyToken, BackendError>;

    /// Apply every update as one atomic transaction.
    async fn write_relationships(
        &self,
        updates: Vec<TupleUpdate>,
    ) -> Result<ConsistencyToken, BackendError>;

    /// Delete every tuple matching the filter. Matching nothing is not an error.
    async fn delete_relationships(&self, filter: TupleFilter) -> Result<ConsistencyToken, BackendError>;

    /// Read tuples matching the filter, observing at least `consistency`.
    /// The empty token uses the backend's default consistency.
    async fn read_relationships(
        &self,
        filter: TupleFilter,
        consistency: &ConsistencyToken,
    ) -> Result<Vec<Tuple>, BackendError>;

    /// Check whether `subject` holds `permission` on `resource`.
    async fn check_permission(
        &self,
        resource: Object,
        permission: &str,
        subject: Subject,
    ) -> Result<Permissionship, BackendError>;
}
