use crate::{
    backend::{Object, Subject, Tuple},
    error::BackendError,
    schema::{PermissionTerm, Schema},
};
use std::collections::HashSet;
use tracing::trace;

const MAX_DEPTH: u32 = 50;

/// Evaluates relations and permissions over a tuple snapshot. Supports:
/// - Direct relationships
/// - Userset subjects (`role:x#subject`), resolved recursively
/// - Permission unions over relations and arrows (`parent->perm`)
pub struct PermissionChecker<'a> {
    schema: &'a Schema,
    tuples: &'a [Tuple],
}

impl<'a> PermissionChecker<'a> {
    pub fn new(schema: &'a Schema, tuples: &'a [Tuple]) -> Self {
        Self { schema, tuples }
    }

    /// Check if `subject` has `name` (a relation or permission) on `object`.
    pub fn check(&self, object: &Object, name: &str, subject: &Subject) -> Result<bool, BackendError> {
        let mut visited = HashSet::new();
        self.check_recursive(object, name, subject, &mut visited, 0)
    }

    fn check_recursive(
        &self,
        object: &Object,
        name: &str,
        subject: &Subject,
        visited: &mut HashSet<String>,
        depth: u32,
    ) -> Result<bool, BackendError> {
        if depth > MAX_DEPTH {
            return Err(BackendError::MaxRecursionDepthExceeded);
        }

        let check_key = format!("{object}#{name}");
        if !visited.insert(check_key) {
            return Ok(false);
        }

        trace!(%object, name, %subject, "checking");

        let definition = self.schema.namespace(&object.object_type).ok_or_else(|| {
            BackendError::Rejected(format!("unknown definition '{}'", object.object_type))
        })?;

        if definition.relation(name).is_some() {
            for tuple in self.related(object, name) {
                if &tuple.subject == subject {
                    return Ok(true);
                }

                // Userset subject: does our subject hold that relation?
                if let Some(ref userset) = tuple.subject.relation {
                    if self.check_recursive(&tuple.subject.object, userset, subject, visited, depth + 1)? {
                        return Ok(true);
                    }
                }
            }
            return Ok(false);
        }

        let permission = definition.permission(name).ok_or_else(|| {
            BackendError::Rejected(format!(
                "'{}' is neither a relation nor a permission of '{}'",
                name, object.object_type
            ))
        })?;

        for term in &permission.terms {
            let granted = match term {
                PermissionTerm::Relation(relation) => {
                    self.check_recursive(object, relation, subject, visited, depth + 1)?
                }
                PermissionTerm::Arrow { relation, permission } => {
                    let mut found = false;
                    for tuple in self.related(object, relation) {
                        let target = &tuple.subject.object;
                        let has_permission = self
                            .schema
                            .namespace(&target.object_type)
                            .is_some_and(|ns| ns.permission(permission).is_some() || ns.relation(permission).is_some());
                        if has_permission
                            && self.check_recursive(target, permission, subject, visited, depth + 1)?
                        {
                            found = true;
                            break;
                        }
                    }
                    found
                }
            };

            if granted {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn related<'b>(&'b self, object: &'b Object, relation: &'b str) -> impl Iterator<Item = &'a Tuple> + 'b
    where
        'a: 'b,
    {
        self.tuples
            .iter()
            .filter(move |t| &t.resource == object && t.relation == relation)
    }
}
