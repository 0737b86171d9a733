//! Backend schema compiled from a [`Policy`].
//!
//! Compilation is deterministic: definitions, relations and permissions are
//! emitted in policy declaration order, so identical policies always render
//! byte-identical schema text.

use crate::{
    error::BackendError,
    policy::{grant_relation, Grant, Policy, ROLE_RESOURCE_TYPE, ROLE_SUBJECT_RELATION},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A complete schema document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub namespaces: Vec<NamespaceDefinition>,
}

/// Definition of one object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceDefinition {
    pub name: String,
    pub relations: Vec<RelationDefinition>,
    pub permissions: Vec<PermissionDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDefinition {
    pub name: String,
    pub subjects: Vec<SubjectType>,
}

/// An allowed subject for a relation: a type, optionally narrowed to a
/// relation on that type (`role#subject`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectType {
    pub type_name: String,
    pub relation: Option<String>,
}

/// A permission computed as the union of its terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDefinition {
    pub name: String,
    pub terms: Vec<PermissionTerm>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionTerm {
    /// Subjects of a relation (or permission) on the same object.
    Relation(String),
    /// `permission` evaluated on every subject of `relation`.
    Arrow { relation: String, permission: String },
}

impl Schema {
    pub fn namespace(&self, name: &str) -> Option<&NamespaceDefinition> {
        self.namespaces.iter().find(|n| n.name == name)
    }

    /// Copy of this schema with every type name prefixed by `namespace/`.
    pub fn namespaced(&self, namespace: &str) -> Schema {
        let prefix = |name: &str| format!("{namespace}/{name}");

        Schema {
            namespaces: self
                .namespaces
                .iter()
                .map(|ns| NamespaceDefinition {
                    name: prefix(&ns.name),
                    relations: ns
                        .relations
                        .iter()
                        .map(|rel| RelationDefinition {
                            name: rel.name.clone(),
                            subjects: rel
                                .subjects
                                .iter()
                                .map(|s| SubjectType {
                                    type_name: prefix(&s.type_name),
                                    relation: s.relation.clone(),
                                })
                                .collect(),
                        })
                        .collect(),
                    permissions: ns.permissions.clone(),
                })
                .collect(),
        }
    }

    /// Check that the schema is internally consistent.
    pub fn validate(&self) -> Result<(), BackendError> {
        let reject = |msg: String| Err(BackendError::Rejected(msg));

        let mut names = HashSet::new();
        for ns in &self.namespaces {
            if !names.insert(ns.name.as_str()) {
                return reject(format!("duplicate definition '{}'", ns.name));
            }
        }

        for ns in &self.namespaces {
            let mut members = HashSet::new();
            for name in ns
                .relations
                .iter()
                .map(|r| &r.name)
                .chain(ns.permissions.iter().map(|p| &p.name))
            {
                if !members.insert(name.as_str()) {
                    return reject(format!("duplicate relation '{}' in '{}'", name, ns.name));
                }
            }

            for rel in &ns.relations {
                for subject in &rel.subjects {
                    let Some(target) = self.namespace(&subject.type_name) else {
                        return reject(format!(
                            "relation '{}#{}' references unknown definition '{}'",
                            ns.name, rel.name, subject.type_name
                        ));
                    };
                    if let Some(ref subject_relation) = subject.relation {
                        if !target.has_member(subject_relation) {
                            return reject(format!(
                                "relation '{}#{}' references unknown relation '{}#{}'",
                                ns.name, rel.name, subject.type_name, subject_relation
                            ));
                        }
                    }
                }
            }

            for permission in &ns.permissions {
                for term in &permission.terms {
                    let valid = match term {
                        PermissionTerm::Relation(name) => ns.has_member(name),
                        PermissionTerm::Arrow { relation, .. } => ns.relation(relation).is_some(),
                    };
                    if !valid {
                        return reject(format!(
                            "permission '{}#{}' references unknown relation in '{}'",
                            ns.name, permission.name, term
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

impl NamespaceDefinition {
    pub fn relation(&self, name: &str) -> Option<&RelationDefinition> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn permission(&self, name: &str) -> Option<&PermissionDefinition> {
        self.permissions.iter().find(|p| p.name == name)
    }

    fn has_member(&self, name: &str) -> bool {
        self.relation(name).is_some() || self.permission(name).is_some()
    }
}

impl From<&Policy> for Schema {
    fn from(policy: &Policy) -> Self {
        let namespaces = policy
            .compiled_types()
            .iter()
            .map(|compiled| {
                let mut relations: Vec<RelationDefinition> = compiled
                    .relations
                    .iter()
                    .map(|rel| RelationDefinition {
                        name: rel.name.clone(),
                        subjects: rel
                            .target_types
                            .iter()
                            .map(|t| SubjectType {
                                type_name: t.clone(),
                                relation: None,
                            })
                            .collect(),
                    })
                    .collect();

                relations.extend(compiled.bindings.iter().filter(|b| b.role_bound()).map(|b| {
                    RelationDefinition {
                        name: grant_relation(&b.action),
                        subjects: vec![SubjectType {
                            type_name: ROLE_RESOURCE_TYPE.to_string(),
                            relation: Some(ROLE_SUBJECT_RELATION.to_string()),
                        }],
                    }
                }));

                let permissions = compiled
                    .bindings
                    .iter()
                    .map(|b| PermissionDefinition {
                        name: b.action.clone(),
                        terms: b
                            .grants
                            .iter()
                            .map(|grant| match grant {
                                Grant::RoleBinding => PermissionTerm::Relation(grant_relation(&b.action)),
                                Grant::Inherited { relation, action } => PermissionTerm::Arrow {
                                    relation: relation.clone(),
                                    permission: action.clone(),
                                },
                            })
                            .collect(),
                    })
                    .collect();

                NamespaceDefinition {
                    name: compiled.name.clone(),
                    relations,
                    permissions,
                }
            })
            .collect();

        Schema { namespaces }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.relation {
            Some(ref relation) => write!(f, "{}#{}", self.type_name, relation),
            None => f.write_str(&self.type_name),
        }
    }
}

impl fmt::Display for PermissionTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionTerm::Relation(name) => f.write_str(name),
            PermissionTerm::Arrow { relation, permission } => write!(f, "{relation}->{permission}"),
        }
    }
}

impl fmt::Display for NamespaceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.relations.is_empty() && self.permissions.is_empty() {
            return writeln!(f, "definition {} {{}}", self.name);
        }

        writeln!(f, "definition {} {{", self.name)?;
        for rel in &self.relations {
            let subjects: Vec<String> = rel.subjects.iter().map(ToString::to_string).collect();
            writeln!(f, "    relation {}: {}", rel.name, subjects.join(" | "))?;
        }
        for permission in &self.permissions {
            let terms: Vec<String> = permission.terms.iter().map(ToString::to_string).collect();
            writeln!(f, "    permission {} = {}", permission.name, terms.join(" + "))?;
        }
        writeln!(f, "}}")
    }
}

/// Renders the backend's schema definition language.
impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, ns) in self.namespaces.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{ns}")?;
        }
        Ok(())
    }
}
