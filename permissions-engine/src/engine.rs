use crate::{
    backend::{
        Object, Permissionship, PermissionsBackend, Subject, SubjectFilter, Tuple, TupleFilter,
        TupleUpdate,
    },
    error::{BackendError, EngineError, Result},
    id::{PrefixRegistry, PrefixedId},
    models::{ConsistencyToken, Relationship, Resource, Role},
    policy::{grant_relation, Policy, ROLE_OWNER_RELATION, ROLE_RESOURCE_TYPE, ROLE_SUBJECT_RELATION},
    schema::Schema,
    validation::validate_relationship,
};
use std::{collections::HashSet, fmt, future::Future, sync::Arc, time::Duration};
use tracing::{debug, info, instrument};

/// Policy-aware façade over a [`PermissionsBackend`].
///
/// Every type name sent to the backend is prefixed with the engine's
/// namespace. The engine holds no mutable state and is cheap to clone.
#[derive(Clone)]
pub struct Engine {
    namespace: String,
    backend: Arc<dyn PermissionsBackend>,
    policy: Arc<Policy>,
    registry: Arc<PrefixRegistry>,
    /// Set once a registry is supplied with [`Engine::with_prefix_registry`].
    registry_injected: bool,
    timeout: Option<Duration>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("namespace", &self.namespace)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine using the built-in policy.
    pub fn new(namespace: impl Into<String>, backend: Arc<dyn PermissionsBackend>) -> Self {
        let policy = Policy::default();
        Self {
            namespace: namespace.into(),
            backend,
            registry: Arc::new(policy.prefix_registry()),
            policy: Arc::new(policy),
            registry_injected: false,
            timeout: None,
        }
    }

    /// Replace the policy. The prefix registry is rebuilt from it unless one
    /// was injected with [`Engine::with_prefix_registry`].
    pub fn with_policy(mut self, policy: Policy) -> Self {
        if !self.registry_injected {
            self.registry = Arc::new(policy.prefix_registry());
        }
        self.policy = Arc::new(policy);
        self
    }

    /// Resolve identifiers with `registry` only. It survives later calls to
    /// [`Engine::with_policy`].
    pub fn with_prefix_registry(mut self, registry: PrefixRegistry) -> Self {
        self.registry = Arc::new(registry);
        self.registry_injected = true;
        self
    }

    /// Bound every backend call. An expired call yields [`EngineError::Timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The namespaced backend schema for the active policy.
    pub fn schema(&self) -> Schema {
        self.policy.schema().namespaced(&self.namespace)
    }

    /// Write [`Engine::schema`] to the backend.
    #[instrument(skip_all, fields(namespace = %self.namespace))]
    pub async fn apply_schema(&self) -> Result<ConsistencyToken> {
        let schema = self.schema();
        let token = self.call(self.backend.write_schema(&schema)).await?;
        info!(definitions = schema.namespaces.len(), "schema applied");
        Ok(token)
    }

    /// Turn an external identifier into a typed resource. The prefix must map
    /// to a type declared in the policy.
    pub fn new_resource_from_id(&self, id: &PrefixedId) -> Result<Resource> {
        let resource_type = self
            .registry
            .resolve(id.prefix())
            .filter(|t| self.policy.has_resource_type(t))
            .ok_or_else(|| EngineError::UnknownResourceType(id.prefix().to_string()))?;

        Ok(Resource::new(resource_type, id.clone()))
    }

    // =============================================================================
    // Roles
    // =============================================================================

    /// Create a role owned by `owner` granting `actions`.
    ///
    /// Duplicate actions are collapsed. If any action cannot be granted by a
    /// role on the owner's type, nothing is written.
    #[instrument(skip_all, fields(%owner, actions = actions.len()))]
    pub async fn create_role<S>(&self, owner: &Resource, actions: &[S]) -> Result<(Role, ConsistencyToken)>
    where
        S: AsRef<str> + Sync,
    {
        let role_resource = Resource::new(ROLE_RESOURCE_TYPE, self.generate_id(ROLE_RESOURCE_TYPE)?);
        validate_relationship(
            &self.policy,
            &Relationship::new(role_resource.clone(), ROLE_OWNER_RELATION, owner.clone()),
        )?;

        let mut granted: Vec<String> = Vec::with_capacity(actions.len());
        for action in actions {
            let action = action.as_ref();
            if !self.policy.role_grants_action(action, &owner.resource_type) {
                return Err(EngineError::UnknownAction {
                    action: action.to_string(),
                    resource_type: owner.resource_type.clone(),
                });
            }
            if !granted.iter().any(|a| a == action) {
                granted.push(action.to_string());
            }
        }

        let role_object = self.object(&role_resource);
        let owner_object = self.object(owner);

        let mut updates: Vec<TupleUpdate> = granted
            .iter()
            .map(|action| {
                TupleUpdate::Touch(Tuple::new(
                    owner_object.clone(),
                    &grant_relation(action),
                    Subject::userset(role_object.clone(), ROLE_SUBJECT_RELATION),
                ))
            })
            .collect();
        updates.push(TupleUpdate::Touch(Tuple::new(
            role_object,
            ROLE_OWNER_RELATION,
            Subject::object(owner_object),
        )));

        let token = self.call(self.backend.write_relationships(updates)).await?;
        debug!(role = %role_resource, "role created");

        Ok((
            Role {
                id: role_resource.id,
                actions: granted,
            },
            token,
        ))
    }

    /// Read a role back, observing at least `token`.
    #[instrument(skip_all, fields(%role))]
    pub async fn get_role(&self, role: &Resource, token: &ConsistencyToken) -> Result<Role> {
        let role_object = self.object(role);

        let ownership = self
            .call(self.backend.read_relationships(
                TupleFilter::from_resource(&role_object).with_relation(ROLE_OWNER_RELATION),
                token,
            ))
            .await?;

        let owner = ownership
            .into_iter()
            .next()
            .map(|t| t.subject.object)
            .ok_or_else(|| EngineError::RoleNotFound(role.id.to_string()))?;

        let grants = self
            .call(self.backend.read_relationships(
                TupleFilter::from_resource(&owner).with_subject(SubjectFilter {
                    subject_type: role_object.object_type.clone(),
                    subject_id: Some(role_object.object_id.clone()),
                    relation: Some(ROLE_SUBJECT_RELATION.to_string()),
                }),
                token,
            ))
            .await?;

        let owner_type = self.resource_type_of(&owner)?;
        Ok(Role {
            id: role.id.clone(),
            actions: self.granted_actions(owner_type, grants.iter()),
        })
    }

    /// Every role owned by `owner`, in backend order.
    #[instrument(skip_all, fields(%owner))]
    pub async fn list_roles(&self, owner: &Resource, token: &ConsistencyToken) -> Result<Vec<Role>> {
        let owner_object = self.object(owner);
        let role_type = self.namespaced(ROLE_RESOURCE_TYPE);

        let ownership = self
            .call(self.backend.read_relationships(
                TupleFilter {
                    resource_type: role_type.clone(),
                    ..TupleFilter::default()
                }
                .with_relation(ROLE_OWNER_RELATION)
                .with_subject(SubjectFilter {
                    subject_type: owner_object.object_type.clone(),
                    subject_id: Some(owner_object.object_id.clone()),
                    relation: None,
                }),
                token,
            ))
            .await?;

        if ownership.is_empty() {
            return Ok(Vec::new());
        }

        let grants = self
            .call(self.backend.read_relationships(
                TupleFilter::from_resource(&owner_object).with_subject(SubjectFilter {
                    subject_type: role_type,
                    subject_id: None,
                    relation: Some(ROLE_SUBJECT_RELATION.to_string()),
                }),
                token,
            ))
            .await?;

        let roles = ownership
            .iter()
            .map(|edge| {
                let id = PrefixedId::parse(&edge.resource.object_id)
                    .map_err(|e| EngineError::MalformedTuple(format!("{edge}: {e}")))?;
                let actions = self.granted_actions(
                    &owner.resource_type,
                    grants
                        .iter()
                        .filter(|g| g.subject.object.object_id == edge.resource.object_id),
                );
                Ok(Role { id, actions })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(count = roles.len(), "roles listed");
        Ok(roles)
    }

    /// Delete a role and every relationship that names it, as resource or
    /// as subject, in one atomic batch.
    #[instrument(skip_all, fields(%role))]
    pub async fn delete_role(&self, role: &Resource, token: &ConsistencyToken) -> Result<ConsistencyToken> {
        let role_object = self.object(role);

        let own = self
            .call(self.backend.read_relationships(TupleFilter::from_resource(&role_object), token))
            .await?;

        if own.is_empty() {
            return Err(EngineError::RoleNotFound(role.id.to_string()));
        }

        let mut seen: HashSet<Tuple> = HashSet::with_capacity(own.len());
        let mut doomed: Vec<Tuple> = Vec::with_capacity(own.len());
        for tuple in own {
            if seen.insert(tuple.clone()) {
                doomed.push(tuple);
            }
        }

        for resource_type in self.types_referencing(&role_object.object_type) {
            let referencing = self
                .call(self.backend.read_relationships(
                    TupleFilter {
                        resource_type,
                        ..TupleFilter::default()
                    }
                    .with_subject(SubjectFilter {
                        subject_type: role_object.object_type.clone(),
                        subject_id: Some(role_object.object_id.clone()),
                        relation: None,
                    }),
                    token,
                ))
                .await?;

            for tuple in referencing {
                if seen.insert(tuple.clone()) {
                    doomed.push(tuple);
                }
            }
        }

        let count = doomed.len();
        let updates = doomed.into_iter().map(TupleUpdate::Delete).collect();
        let token = self.call(self.backend.write_relationships(updates)).await?;
        debug!(deleted = count, "role deleted");

        Ok(token)
    }

    // =============================================================================
    // Relationships
    // =============================================================================

    /// Write every relationship in one atomic batch. Nothing is written if
    /// any of them fails validation. Repeated relationships are written once.
    #[instrument(skip_all, fields(count = relationships.len()))]
    pub async fn create_relationships(&self, relationships: &[Relationship]) -> Result<ConsistencyToken> {
        for relationship in relationships {
            validate_relationship(&self.policy, relationship)?;
        }

        if relationships.is_empty() {
            return Ok(ConsistencyToken::default());
        }

        let mut seen = HashSet::with_capacity(relationships.len());
        let updates: Vec<TupleUpdate> = relationships
            .iter()
            .map(|r| self.tuple(r))
            .filter(|t| seen.insert(t.clone()))
            .map(TupleUpdate::Touch)
            .collect();

        self.call(self.backend.write_relationships(updates)).await
    }

    /// Delete exactly `relationship`. Deleting a missing relationship is a no-op,
    /// but the relationship must still be valid under the policy.
    #[instrument(skip_all, fields(%relationship))]
    pub async fn delete_relationships(&self, relationship: &Relationship) -> Result<ConsistencyToken> {
        validate_relationship(&self.policy, relationship)?;

        let filter = TupleFilter::exact(&self.tuple(relationship));
        self.call(self.backend.delete_relationships(filter)).await
    }

    /// Relationships whose origin is `resource`, in backend order.
    ///
    /// Role grant edges (whose subject is a role's subject set) are not
    /// relationships between resources and are left out.
    #[instrument(skip_all, fields(%resource))]
    pub async fn list_relationships_from(
        &self,
        resource: &Resource,
        token: &ConsistencyToken,
    ) -> Result<Vec<Relationship>> {
        let tuples = self
            .call(self.backend.read_relationships(TupleFilter::from_resource(&self.object(resource)), token))
            .await?;

        tuples
            .into_iter()
            .filter(|t| t.subject.relation.is_none())
            .map(|t| {
                let subject = self.resource_from_object(&t.subject.object)?;
                Ok(Relationship::new(resource.clone(), t.relation, subject))
            })
            .collect()
    }

    // =============================================================================
    // Assignments
    // =============================================================================

    #[instrument(skip_all, fields(%subject, role = %role.id))]
    pub async fn assign_subject_role(&self, subject: &Resource, role: &Role) -> Result<ConsistencyToken> {
        let tuple = self.assignment(subject, role)?;
        self.call(self.backend.write_relationships(vec![TupleUpdate::Touch(tuple)]))
            .await
    }

    #[instrument(skip_all, fields(%subject, role = %role.id))]
    pub async fn unassign_subject_role(&self, subject: &Resource, role: &Role) -> Result<ConsistencyToken> {
        let tuple = self.assignment(subject, role)?;
        self.call(self.backend.write_relationships(vec![TupleUpdate::Delete(tuple)]))
            .await
    }

    /// Subjects currently assigned to `role`.
    #[instrument(skip_all, fields(role = %role.id))]
    pub async fn list_assignments(&self, role: &Role, token: &ConsistencyToken) -> Result<Vec<Resource>> {
        let role_object = self.object(&Resource::new(ROLE_RESOURCE_TYPE, role.id.clone()));

        let tuples = self
            .call(self.backend.read_relationships(
                TupleFilter::from_resource(&role_object).with_relation(ROLE_SUBJECT_RELATION),
                token,
            ))
            .await?;

        tuples
            .iter()
            .map(|t| self.resource_from_object(&t.subject.object))
            .collect()
    }

    // =============================================================================
    // Permissions
    // =============================================================================

    /// Succeeds if `subject` may perform `action` on `resource`.
    ///
    /// A denial, including a conditional one, is [`EngineError::ActionNotAssigned`].
    /// Backend failures are returned as they are.
    #[instrument(skip_all, fields(%subject, action, %resource))]
    pub async fn subject_has_permission(&self, subject: &Resource, action: &str, resource: &Resource) -> Result<()> {
        let permission = self
            .policy
            .permission_for(action, &resource.resource_type)
            .ok_or_else(|| EngineError::UnknownAction {
                action: action.to_string(),
                resource_type: resource.resource_type.clone(),
            })?;

        let permissionship = self
            .call(self.backend.check_permission(
                self.object(resource),
                permission,
                Subject::object(self.object(subject)),
            ))
            .await?;

        debug!(?permissionship, "permission checked");
        match permissionship {
            Permissionship::Granted => Ok(()),
            Permissionship::Denied | Permissionship::Conditional => Err(EngineError::ActionNotAssigned),
        }
    }

    // =============================================================================
    // Helpers
    // =============================================================================

    async fn call<T, F>(&self, future: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, BackendError>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, future)
                .await
                .map_err(|_| EngineError::Timeout(limit))?
                .map_err(EngineError::from),
            None => future.await.map_err(EngineError::from),
        }
    }

    fn generate_id(&self, resource_type: &str) -> Result<PrefixedId> {
        let prefix = self
            .policy
            .id_prefix(resource_type)
            .ok_or_else(|| EngineError::UnknownResourceType(resource_type.to_string()))?;
        Ok(PrefixedId::generate(prefix)?)
    }

    fn assignment(&self, subject: &Resource, role: &Role) -> Result<Tuple> {
        let relationship = Relationship::new(
            Resource::new(ROLE_RESOURCE_TYPE, role.id.clone()),
            ROLE_SUBJECT_RELATION,
            subject.clone(),
        );
        validate_relationship(&self.policy, &relationship)?;
        Ok(self.tuple(&relationship))
    }

    fn granted_actions<'t>(&self, owner_type: &str, grants: impl Iterator<Item = &'t Tuple>) -> Vec<String> {
        let mut actions: Vec<String> = Vec::new();
        for grant in grants {
            if let Some(action) = self.policy.action_for_grant_relation(owner_type, &grant.relation) {
                if !actions.iter().any(|a| a == action) {
                    actions.push(action.to_string());
                }
            }
        }
        actions
    }

    /// Namespaced types with a relation that accepts `subject_type`, directly
    /// or through one of its relations.
    fn types_referencing(&self, subject_type: &str) -> Vec<String> {
        self.schema()
            .namespaces
            .into_iter()
            .filter(|ns| {
                ns.relations
                    .iter()
                    .any(|rel| rel.subjects.iter().any(|s| s.type_name == subject_type))
            })
            .map(|ns| ns.name)
            .collect()
    }

    fn namespaced(&self, resource_type: &str) -> String {
        format!("{}/{}", self.namespace, resource_type)
    }

    fn object(&self, resource: &Resource) -> Object {
        Object {
            object_type: self.namespaced(&resource.resource_type),
            object_id: resource.id.to_string(),
        }
    }

    fn tuple(&self, relationship: &Relationship) -> Tuple {
        Tuple::new(
            self.object(&relationship.resource),
            &relationship.relation,
            Subject::object(self.object(&relationship.subject)),
        )
    }

    fn resource_type_of<'o>(&self, object: &'o Object) -> Result<&'o str> {
        object
            .object_type
            .strip_prefix(self.namespace.as_str())
            .and_then(|t| t.strip_prefix('/'))
            .ok_or_else(|| {
                EngineError::MalformedTuple(format!(
                    "object type '{}' is outside namespace '{}'",
                    object.object_type, self.namespace
                ))
            })
    }

    fn resource_from_object(&self, object: &Object) -> Result<Resource> {
        let resource_type = self.resource_type_of(object)?;
        let id = PrefixedId::parse(&object.object_id)
            .map_err(|e| EngineError::MalformedTuple(format!("{object}: {e}")))?;
        Ok(Resource::new(resource_type, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;

    fn engine() -> Engine {
        Engine::new("test", Arc::new(InMemoryBackend::new()))
    }

    #[test]
    fn test_objects_are_namespaced() {
        let engine = engine();
        let tenant = Resource::new("tenant", PrefixedId::parse("tnntten-abc").unwrap());

        let object = engine.object(&tenant);
        assert_eq!(object.object_type, "test/tenant");
        assert_eq!(object.object_id, "tnntten-abc");
        assert_eq!(engine.resource_from_object(&object).unwrap(), tenant);
    }

    #[test]
    fn test_foreign_namespace_is_malformed() {
        let engine = engine();
        assert!(matches!(
            engine.resource_from_object(&Object::new("other/tenant", "tnntten-abc")),
            Err(EngineError::MalformedTuple(_))
        ));
        assert!(matches!(
            engine.resource_from_object(&Object::new("testing/tenant", "tnntten-abc")),
            Err(EngineError::MalformedTuple(_))
        ));
    }

    #[test]
    fn test_new_resource_from_id() {
        let engine = engine();

        let lb = engine
            .new_resource_from_id(&PrefixedId::parse("loadbal-abc").unwrap())
            .unwrap();
        assert_eq!(lb.resource_type, "loadbalancer");

        assert!(matches!(
            engine.new_resource_from_id(&PrefixedId::parse("unknown-abc").unwrap()),
            Err(EngineError::UnknownResourceType(p)) if p == "unknown"
        ));
    }

    #[test]
    fn test_registry_entries_must_be_declared() {
        let registry: PrefixRegistry = [("widgets", "widget"), ("tnntten", "tenant")]
            .into_iter()
            .collect();
        let engine = engine().with_prefix_registry(registry);

        assert!(engine
            .new_resource_from_id(&PrefixedId::parse("tnntten-abc").unwrap())
            .is_ok());
        assert!(matches!(
            engine.new_resource_from_id(&PrefixedId::parse("widgets-abc").unwrap()),
            Err(EngineError::UnknownResourceType(_))
        ));
        assert!(matches!(
            engine.new_resource_from_id(&PrefixedId::parse("loadbal-abc").unwrap()),
            Err(EngineError::UnknownResourceType(_))
        ));
    }

    #[test]
    fn test_injected_registry_survives_policy_change() {
        let registry: PrefixRegistry = [("tnntten", "tenant")].into_iter().collect();
        let engine = engine()
            .with_prefix_registry(registry)
            .with_policy(Policy::default());

        assert!(engine
            .new_resource_from_id(&PrefixedId::parse("tnntten-abc").unwrap())
            .is_ok());
        assert!(matches!(
            engine.new_resource_from_id(&PrefixedId::parse("loadbal-abc").unwrap()),
            Err(EngineError::UnknownResourceType(_))
        ));
    }

    #[test]
    fn test_policy_change_rebuilds_default_registry() {
        let mut document = crate::policy::PolicyDocument::builtin();
        document.resource_types.retain(|t| t.name != "loadbalancer");
        document.action_bindings.retain(|b| b.type_name != "loadbalancer");
        let engine = engine().with_policy(Policy::new(document).unwrap());

        assert!(matches!(
            engine.new_resource_from_id(&PrefixedId::parse("loadbal-abc").unwrap()),
            Err(EngineError::UnknownResourceType(_))
        ));
    }

    #[test]
    fn test_types_referencing_roles() {
        let engine = engine();
        let types = engine.types_referencing("test/role");
        assert!(types.contains(&"test/tenant".to_string()));
        assert!(!types.contains(&"test/user".to_string()));
    }

    #[test]
    fn test_schema_is_namespaced() {
        let schema = engine().schema();
        assert!(schema.namespace("test/tenant").is_some());
        assert!(schema.namespace("tenant").is_none());
    }
}
