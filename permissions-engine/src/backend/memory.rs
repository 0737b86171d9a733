use crate::{
    backend::{
        check::PermissionChecker, Object, Permissionship, PermissionsBackend, Subject, Tuple,
        TupleFilter, TupleUpdate,
    },
    error::BackendError,
    models::ConsistencyToken,
    schema::Schema,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use tracing::debug;

#[derive(Default)]
struct MemoryState {
    schema: Option<Schema>,
    /// Insertion order is the read order.
    tuples: Vec<Tuple>,
    revision: u64,
}

impl MemoryState {
    fn next_token(&mut self) -> ConsistencyToken {
        self.revision += 1;
        ConsistencyToken::new(self.revision.to_string())
    }

    fn check_token(&self, token: &ConsistencyToken) -> Result<(), BackendError> {
        if token.is_empty() {
            return Ok(());
        }

        let revision: u64 = token
            .as_str()
            .parse()
            .map_err(|_| BackendError::InvalidConsistencyToken(token.to_string()))?;

        if revision > self.revision {
            return Err(BackendError::InvalidConsistencyToken(format!(
                "{token} is ahead of the current revision {}",
                self.revision
            )));
        }

        Ok(())
    }

    fn validate_tuple(&self, tuple: &Tuple) -> Result<(), BackendError> {
        let schema = self.schema.as_ref().ok_or(BackendError::SchemaNotLoaded)?;

        let definition = schema.namespace(&tuple.resource.object_type).ok_or_else(|| {
            BackendError::Rejected(format!("unknown definition '{}'", tuple.resource.object_type))
        })?;

        let relation = definition.relation(&tuple.relation).ok_or_else(|| {
            BackendError::Rejected(format!(
                "'{}' is not a relation of '{}'",
                tuple.relation, tuple.resource.object_type
            ))
        })?;

        let allowed = relation.subjects.iter().any(|s| {
            s.type_name == tuple.subject.object.object_type && s.relation == tuple.subject.relation
        });
        if !allowed {
            return Err(BackendError::Rejected(format!(
                "subject '{}' is not allowed on '{}#{}'",
                tuple.subject, tuple.resource.object_type, tuple.relation
            )));
        }

        Ok(())
    }
}

/// In-memory backend for testing and development.
///
/// Reads are always fully consistent; consistency tokens are revision
/// numbers and are only checked for plausibility.
#[derive(Default)]
pub struct InMemoryBackend {
    state: RwLock<MemoryState>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tuples.
    pub fn len(&self) -> usize {
        self.state.read().tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PermissionsBackend for InMemoryBackend {
    async fn write_schema(&self, schema: &Schema) -> Result<ConsistencyToken, BackendError> {
        schema.validate()?;

        let mut state = self.state.write();
        state.schema = Some(schema.clone());
        debug!(definitions = schema.namespaces.len(), "schema written");
        Ok(state.next_token())
    }

    async fn write_relationships(
        &self,
        updates: Vec<TupleUpdate>,
    ) -> Result<ConsistencyToken, BackendError> {
        let mut state = self.state.write();

        // Validate the whole batch before applying any of it.
        let mut seen = HashSet::with_capacity(updates.len());
        for update in &updates {
            let tuple = match update {
                TupleUpdate::Touch(tuple) => {
                    state.validate_tuple(tuple)?;
                    tuple
                }
                TupleUpdate::Delete(tuple) => tuple,
            };
            if !seen.insert(tuple) {
                return Err(BackendError::Rejected(format!("duplicate update for '{tuple}' in one batch")));
            }
        }

        for update in updates {
            match update {
                TupleUpdate::Touch(tuple) => {
                    if !state.tuples.contains(&tuple) {
                        state.tuples.push(tuple);
                    }
                }
                TupleUpdate::Delete(tuple) => state.tuples.retain(|t| t != &tuple),
            }
        }

        Ok(state.next_token())
    }

    async fn delete_relationships(&self, filter: TupleFilter) -> Result<ConsistencyToken, BackendError> {
        let mut state = self.state.write();
        let before = state.tuples.len();
        state.tuples.retain(|t| !filter.matches(t));
        debug!(deleted = before - state.tuples.len(), "relationships deleted");
        Ok(state.next_token())
    }

    async fn read_relationships(
        &self,
        filter: TupleFilter,
        consistency: &ConsistencyToken,
    ) -> Result<Vec<Tuple>, BackendError> {
        let state = self.state.read();
        state.check_token(consistency)?;

        Ok(state
            .tuples
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    async fn check_permission(
        &self,
        resource: Object,
        permission: &str,
        subject: Subject,
    ) -> Result<Permissionship, BackendError> {
        let state = self.state.read();
        let schema = state.schema.as_ref().ok_or(BackendError::SchemaNotLoaded)?;

        let allowed = PermissionChecker::new(schema, &state.tuples).check(&resource, permission, &subject)?;

        Ok(if allowed {
            Permissionship::Granted
        } else {
            Permissionship::Denied
        })
    }
}
