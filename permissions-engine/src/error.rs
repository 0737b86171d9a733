use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating a policy document.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Invalid name '{0}': names must match [a-z][a-z0-9_]*")]
    InvalidName(String),

    #[error("Duplicate resource type or union: {0}")]
    DuplicateResourceType(String),

    #[error("Invalid id prefix '{prefix}' for resource type '{resource_type}'")]
    InvalidIdPrefix { resource_type: String, prefix: String },

    #[error("Id prefix '{0}' is used by more than one resource type")]
    DuplicateIdPrefix(String),

    #[error("Duplicate relation '{relation}' on resource type '{resource_type}'")]
    DuplicateRelation {
        resource_type: String,
        relation: String,
    },

    #[error("Relation '{relation}' on '{resource_type}' references unknown type '{subject_type}'")]
    UnknownSubjectType {
        resource_type: String,
        relation: String,
        subject_type: String,
    },

    #[error("Union '{union}' references unknown resource type '{resource_type}'")]
    UnknownUnionMember {
        union: String,
        resource_type: String,
    },

    #[error("Duplicate action: {0}")]
    DuplicateAction(String),

    #[error("Action binding references unknown action: {0}")]
    UnknownAction(String),

    #[error("Action '{action}' is bound to unknown type '{type_name}'")]
    UnknownBindingType { action: String, type_name: String },

    #[error("Action '{action}' is bound more than once on '{resource_type}'")]
    DuplicateBinding {
        action: String,
        resource_type: String,
    },

    #[error("Condition for action '{action}' on '{resource_type}' must set exactly one of role_binding or relationship_action")]
    InvalidCondition {
        action: String,
        resource_type: String,
    },

    #[error("Action '{action}' is role-bound on '{resource_type}', which roles cannot be owned by")]
    RoleBindingNotOwnable {
        action: String,
        resource_type: String,
    },

    #[error("Action '{action}' on '{resource_type}' inherits through unknown relation '{relation}'")]
    UnknownConditionRelation {
        action: String,
        resource_type: String,
        relation: String,
    },

    #[error("Action '{action}' on '{resource_type}' inherits '{target_action}' through '{relation}', but '{target_type}' has no binding for it")]
    MissingInheritedBinding {
        action: String,
        resource_type: String,
        relation: String,
        target_type: String,
        target_action: String,
    },

    #[error("Action '{action}' on '{resource_type}' can never be granted")]
    UnsatisfiableAction {
        action: String,
        resource_type: String,
    },

    #[error("Policy must declare the '{0}' resource type")]
    MissingRoleType(String),

    #[error("Role resource type must declare the '{0}' relation")]
    MissingRoleRelation(String),

    #[error("Failed to read policy file `{path}`")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse policy document `{path}`")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Errors raised while parsing or generating prefixed identifiers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("Identifier '{0}' is missing a prefix separator")]
    MissingSeparator(String),

    #[error("Invalid identifier prefix '{0}': expected 7 lowercase alphanumeric characters")]
    InvalidPrefix(String),

    #[error("Invalid identifier suffix in '{0}'")]
    InvalidSuffix(String),
}

/// Errors reported by a permissions backend. The engine never retries these.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("RPC failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("Invalid backend configuration: {0}")]
    InvalidConfig(String),

    #[error("Response is missing field '{0}'")]
    MissingField(&'static str),

    #[error("Schema has not been written")]
    SchemaNotLoaded,

    #[error("Write rejected: {0}")]
    Rejected(String),

    #[error("Consistency token invalid: {0}")]
    InvalidConsistencyToken(String),

    #[error("Maximum recursion depth exceeded")]
    MaxRecursionDepthExceeded,
}

/// Errors returned by [`crate::Engine`] operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error("Invalid relationship: {0}")]
    InvalidRelationship(String),

    #[error("Unknown action '{action}' for resource type '{resource_type}'")]
    UnknownAction {
        action: String,
        resource_type: String,
    },

    #[error("Role not found: {0}")]
    RoleNotFound(String),

    #[error("Action not assigned")]
    ActionNotAssigned,

    #[error("Malformed tuple returned by backend: {0}")]
    MalformedTuple(String),

    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
