use crate::{
    error::EngineError,
    models::Relationship,
    policy::Policy,
};

/// Check a relationship against the policy before it is written or used as
/// a deletion filter.
pub fn validate_relationship(policy: &Policy, relationship: &Relationship) -> Result<(), EngineError> {
    let resource_type = &relationship.resource.resource_type;

    if !policy.has_resource_type(resource_type) {
        return Err(EngineError::UnknownResourceType(resource_type.clone()));
    }

    let targets = policy
        .relation_targets(resource_type, &relationship.relation)
        .ok_or_else(|| {
            EngineError::InvalidRelationship(format!(
                "relation '{}' is not declared on '{}'",
                relationship.relation, resource_type
            ))
        })?;

    if !targets.contains(&relationship.subject.resource_type) {
        return Err(EngineError::InvalidRelationship(format!(
            "'{}' may not fill relation '{}' on '{}'",
            relationship.subject.resource_type, relationship.relation, resource_type
        )));
    }

    Ok(())
}
