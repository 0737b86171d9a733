//! Engine behaviour against the in-memory backend:
//! 1. Role lifecycle (create, get, list, delete)
//! 2. Subject-role assignments
//! 3. Relationship create, list and delete
//! 4. Permission evaluation through roles, parents and owners
//! 5. Consistency tokens and namespace isolation
//! 6. Sharing one engine across tasks

use permissions_engine::{
    backend::InMemoryBackend,
    policy::{self, ResourceType},
    ConsistencyToken, Engine, EngineError, Policy, PolicyDocument, PrefixedId, Relationship,
    Resource,
};
use std::sync::Arc;

fn test_policy() -> Policy {
    let mut document = PolicyDocument::builtin();
    if let Some(tenant) = document.resource_types.iter_mut().find(|t| t.name == "tenant") {
        tenant.relationships.push(policy::Relationship {
            relation: "admin_role".to_string(),
            target_type_names: vec!["role".to_string()],
        });
    }
    document.resource_types.push(ResourceType {
        name: "child".to_string(),
        id_prefix: "chldten".to_string(),
        relationships: vec![policy::Relationship {
            relation: "parent".to_string(),
            target_type_names: vec!["tenant".to_string()],
        }],
    });
    Policy::new(document).unwrap()
}

async fn test_engine(namespace: &str) -> Engine {
    test_engine_on(namespace, Arc::new(InMemoryBackend::new())).await
}

async fn test_engine_on(namespace: &str, backend: Arc<InMemoryBackend>) -> Engine {
    let engine = Engine::new(namespace, backend).with_policy(test_policy());
    engine.apply_schema().await.unwrap();
    engine
}

fn new_resource(engine: &Engine, prefix: &str) -> Resource {
    engine
        .new_resource_from_id(&PrefixedId::generate(prefix).unwrap())
        .unwrap()
}

// =============================================================================
// Roles
// =============================================================================

#[tokio::test]
async fn test_create_role_with_invalid_action_creates_nothing() {
    let engine = test_engine("testroles").await;
    let tenant = new_resource(&engine, "tnntten");

    let result = engine
        .create_role(&tenant, &["loadbalancer_get", "bad_action"])
        .await;
    assert!(matches!(
        result,
        Err(EngineError::UnknownAction { ref action, .. }) if action == "bad_action"
    ));

    let roles = engine
        .list_roles(&tenant, &ConsistencyToken::default())
        .await
        .unwrap();
    assert!(roles.is_empty());
}

#[tokio::test]
async fn test_create_role_success() {
    let engine = test_engine("testroles").await;
    let tenant = new_resource(&engine, "tnntten");

    let (role, token) = engine
        .create_role(&tenant, &["loadbalancer_get"])
        .await
        .unwrap();
    assert_eq!(role.actions, vec!["loadbalancer_get".to_string()]);
    assert_eq!(role.id.prefix(), "permrol");
    assert!(!token.is_empty());

    let roles = engine.list_roles(&tenant, &token).await.unwrap();
    assert_eq!(roles.len(), 1);
    assert_eq!(roles[0].id, role.id);
    assert_eq!(roles[0].actions, vec!["loadbalancer_get".to_string()]);
}

#[tokio::test]
async fn test_create_role_collapses_duplicate_actions() {
    let engine = test_engine("testroles").await;
    let tenant = new_resource(&engine, "tnntten");

    let (role, token) = engine
        .create_role(
            &tenant,
            &["loadbalancer_get", "loadbalancer_update", "loadbalancer_get"],
        )
        .await
        .unwrap();
    assert_eq!(role.actions, vec!["loadbalancer_get", "loadbalancer_update"]);

    let role_resource = Resource::new("role", role.id.clone());
    let fetched = engine.get_role(&role_resource, &token).await.unwrap();
    assert_eq!(fetched, role);
}

#[tokio::test]
async fn test_create_role_on_non_owner_fails() {
    let engine = test_engine("testroles").await;
    let user = new_resource(&engine, "idntusr");

    let result = engine.create_role(&user, &["loadbalancer_get"]).await;
    assert!(matches!(result, Err(EngineError::InvalidRelationship(_))));
}

#[tokio::test]
async fn test_get_role_not_found() {
    let engine = test_engine("testgetrole").await;
    let missing = Resource::new("role", PrefixedId::parse("permrol-notfound").unwrap());

    let result = engine
        .get_role(&missing, &ConsistencyToken::default())
        .await;
    assert!(matches!(result, Err(EngineError::RoleNotFound(_))));
}

#[tokio::test]
async fn test_get_role_success() {
    let engine = test_engine("testgetrole").await;
    let tenant = new_resource(&engine, "tnntten");

    let (role, token) = engine
        .create_role(&tenant, &["loadbalancer_get", "loadbalancer_update"])
        .await
        .unwrap();

    let role_resource = engine.new_resource_from_id(&role.id).unwrap();
    assert_eq!(role_resource.resource_type, "role");

    let fetched = engine.get_role(&role_resource, &token).await.unwrap();
    assert_eq!(fetched.id, role.id);
    assert_eq!(
        fetched.actions,
        vec!["loadbalancer_get".to_string(), "loadbalancer_update".to_string()]
    );
}

#[tokio::test]
async fn test_list_roles_only_returns_owned_roles() {
    let engine = test_engine("testlistroles").await;
    let tenant = new_resource(&engine, "tnntten");
    let other = new_resource(&engine, "tnntten");

    let (first, _) = engine.create_role(&tenant, &["role_get"]).await.unwrap();
    let (second, _) = engine
        .create_role(&tenant, &["loadbalancer_list", "role_list"])
        .await
        .unwrap();
    let (_, token) = engine.create_role(&other, &["role_get"]).await.unwrap();

    let roles = engine.list_roles(&tenant, &token).await.unwrap();
    assert_eq!(roles, vec![first, second]);
}

#[tokio::test]
async fn test_delete_missing_role() {
    let engine = test_engine("testroledelete").await;
    let missing = Resource::new("role", PrefixedId::generate("permrol").unwrap());

    let result = engine
        .delete_role(&missing, &ConsistencyToken::default())
        .await;
    assert!(matches!(result, Err(EngineError::RoleNotFound(_))));
}

#[tokio::test]
async fn test_delete_role_removes_grants_and_assignments() {
    let backend = Arc::new(InMemoryBackend::new());
    let engine = test_engine_on("testroledelete", backend.clone()).await;
    let tenant = new_resource(&engine, "tnntten");
    let user = new_resource(&engine, "idntusr");

    let (role, _) = engine
        .create_role(&tenant, &["loadbalancer_get"])
        .await
        .unwrap();
    let token = engine.assign_subject_role(&user, &role).await.unwrap();
    assert_eq!(backend.len(), 3);

    let role_resource = Resource::new("role", role.id.clone());
    let token = engine.delete_role(&role_resource, &token).await.unwrap();

    assert!(backend.is_empty());
    assert!(engine.list_roles(&tenant, &token).await.unwrap().is_empty());
    assert!(matches!(
        engine.get_role(&role_resource, &token).await,
        Err(EngineError::RoleNotFound(_))
    ));
    assert!(matches!(
        engine
            .subject_has_permission(&user, "loadbalancer_get", &tenant)
            .await,
        Err(EngineError::ActionNotAssigned)
    ));
}

#[tokio::test]
async fn test_delete_role_removes_relationships_naming_the_role() {
    let backend = Arc::new(InMemoryBackend::new());
    let engine = test_engine_on("testroledelete", backend.clone()).await;
    let owner = new_resource(&engine, "tnntten");
    let other = new_resource(&engine, "tnntten");

    let (role, _) = engine
        .create_role(&owner, &["loadbalancer_get"])
        .await
        .unwrap();
    let role_resource = Resource::new("role", role.id.clone());
    let token = engine
        .create_relationships(&[Relationship::new(other.clone(), "admin_role", role_resource.clone())])
        .await
        .unwrap();
    assert_eq!(engine.list_relationships_from(&other, &token).await.unwrap().len(), 1);

    let token = engine.delete_role(&role_resource, &token).await.unwrap();

    assert!(engine.list_relationships_from(&other, &token).await.unwrap().is_empty());
    assert!(backend.is_empty());
}

// =============================================================================
// Assignments
// =============================================================================

#[tokio::test]
async fn test_assignments() {
    let engine = test_engine("testassignments").await;
    let tenant = new_resource(&engine, "tnntten");
    let user = new_resource(&engine, "idntusr");
    let client = new_resource(&engine, "idntcli");

    let (role, _) = engine
        .create_role(&tenant, &["loadbalancer_update"])
        .await
        .unwrap();

    engine.assign_subject_role(&user, &role).await.unwrap();
    // Assigning twice is harmless.
    engine.assign_subject_role(&user, &role).await.unwrap();
    let token = engine.assign_subject_role(&client, &role).await.unwrap();

    let assignments = engine.list_assignments(&role, &token).await.unwrap();
    assert_eq!(assignments, vec![user, client]);
}

#[tokio::test]
async fn test_unassignments() {
    let engine = test_engine("testunassignments").await;
    let tenant = new_resource(&engine, "tnntten");
    let user = new_resource(&engine, "idntusr");

    let (role, _) = engine
        .create_role(&tenant, &["loadbalancer_update"])
        .await
        .unwrap();
    engine.assign_subject_role(&user, &role).await.unwrap();

    let token = engine.unassign_subject_role(&user, &role).await.unwrap();
    assert!(engine.list_assignments(&role, &token).await.unwrap().is_empty());

    // Unassigning an absent subject is a no-op.
    let token = engine.unassign_subject_role(&user, &role).await.unwrap();
    assert!(engine.list_assignments(&role, &token).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_assigning_a_non_subject_fails() {
    let engine = test_engine("testassignments").await;
    let tenant = new_resource(&engine, "tnntten");

    let (role, _) = engine
        .create_role(&tenant, &["loadbalancer_update"])
        .await
        .unwrap();

    let result = engine.assign_subject_role(&tenant, &role).await;
    assert!(matches!(result, Err(EngineError::InvalidRelationship(_))));
}

// =============================================================================
// Relationships
// =============================================================================

#[tokio::test]
async fn test_relationships() {
    let engine = test_engine("testrelationships").await;
    let parent = new_resource(&engine, "tnntten");
    let child = new_resource(&engine, "tnntten");
    let child2 = new_resource(&engine, "chldten");
    assert_eq!(child2.resource_type, "child");

    let invalid = Relationship::new(child.clone(), "foo", parent.clone());
    assert!(matches!(
        engine.create_relationships(&[invalid]).await,
        Err(EngineError::InvalidRelationship(_))
    ));

    for resource in [&child, &child2] {
        let relationship = Relationship::new(resource.clone(), "parent", parent.clone());
        let token = engine
            .create_relationships(&[relationship.clone()])
            .await
            .unwrap();

        let listed = engine
            .list_relationships_from(resource, &token)
            .await
            .unwrap();
        assert_eq!(listed, vec![relationship]);
    }
}

#[tokio::test]
async fn test_create_relationships_is_all_or_nothing() {
    let backend = Arc::new(InMemoryBackend::new());
    let engine = test_engine_on("testrelationships", backend.clone()).await;
    let parent = new_resource(&engine, "tnntten");
    let child = new_resource(&engine, "tnntten");
    let user = new_resource(&engine, "idntusr");

    let result = engine
        .create_relationships(&[
            Relationship::new(child.clone(), "parent", parent.clone()),
            Relationship::new(child.clone(), "parent", user),
        ])
        .await;
    assert!(matches!(result, Err(EngineError::InvalidRelationship(_))));
    assert!(backend.is_empty());

    assert!(engine
        .list_relationships_from(&child, &ConsistencyToken::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_create_relationship_twice_lists_once() {
    let engine = test_engine("testrelationships").await;
    let parent = new_resource(&engine, "tnntten");
    let child = new_resource(&engine, "tnntten");
    let relationship = Relationship::new(child.clone(), "parent", parent);

    engine
        .create_relationships(&[relationship.clone()])
        .await
        .unwrap();
    let token = engine
        .create_relationships(&[relationship.clone()])
        .await
        .unwrap();

    let listed = engine.list_relationships_from(&child, &token).await.unwrap();
    assert_eq!(listed, vec![relationship]);
}

#[tokio::test]
async fn test_repeated_relationship_in_one_batch_is_written_once() {
    let backend = Arc::new(InMemoryBackend::new());
    let engine = test_engine_on("testrelationships", backend.clone()).await;
    let parent = new_resource(&engine, "tnntten");
    let child = new_resource(&engine, "tnntten");
    let relationship = Relationship::new(child.clone(), "parent", parent);

    let token = engine
        .create_relationships(&[relationship.clone(), relationship.clone()])
        .await
        .unwrap();

    assert_eq!(backend.len(), 1);
    let listed = engine.list_relationships_from(&child, &token).await.unwrap();
    assert_eq!(listed, vec![relationship]);
}

#[tokio::test]
async fn test_listing_from_owner_skips_role_grants() {
    let engine = test_engine("testrelationships").await;
    let tenant = new_resource(&engine, "tnntten");
    let root = new_resource(&engine, "tnntten");

    engine
        .create_role(&tenant, &["loadbalancer_get"])
        .await
        .unwrap();
    let relationship = Relationship::new(tenant.clone(), "parent", root);
    let token = engine
        .create_relationships(&[relationship.clone()])
        .await
        .unwrap();

    let listed = engine.list_relationships_from(&tenant, &token).await.unwrap();
    assert_eq!(listed, vec![relationship]);
}

#[tokio::test]
async fn test_relationship_delete() {
    let engine = test_engine("testrelationshipdelete").await;
    let parent = new_resource(&engine, "tnntten");
    let child = new_resource(&engine, "tnntten");

    let relationship = Relationship::new(child.clone(), "parent", parent.clone());
    engine
        .create_relationships(&[relationship.clone()])
        .await
        .unwrap();

    let invalid = Relationship::new(child.clone(), "foo", parent.clone());
    assert!(matches!(
        engine.delete_relationships(&invalid).await,
        Err(EngineError::InvalidRelationship(_))
    ));

    let token = engine.delete_relationships(&relationship).await.unwrap();
    assert!(engine
        .list_relationships_from(&child, &token)
        .await
        .unwrap()
        .is_empty());

    // The second delete finds nothing and still succeeds.
    let token = engine.delete_relationships(&relationship).await.unwrap();
    assert!(engine
        .list_relationships_from(&child, &token)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_relationship_with_unknown_type() {
    let engine = test_engine("testrelationships").await;
    let parent = new_resource(&engine, "tnntten");
    let widget = Resource::new("widget", PrefixedId::generate("widgets").unwrap());

    assert!(matches!(
        engine
            .create_relationships(&[Relationship::new(widget, "parent", parent)])
            .await,
        Err(EngineError::UnknownResourceType(t)) if t == "widget"
    ));
}

// =============================================================================
// Permissions
// =============================================================================

#[tokio::test]
async fn test_subject_actions() {
    let engine = test_engine("infratestactions").await;
    let tenant = new_resource(&engine, "tnntten");
    let other = new_resource(&engine, "tnntten");
    let user = new_resource(&engine, "idntusr");

    let (role, _) = engine
        .create_role(&tenant, &["loadbalancer_update"])
        .await
        .unwrap();
    engine.assign_subject_role(&user, &role).await.unwrap();

    // Bad resource
    assert!(matches!(
        engine
            .subject_has_permission(&user, "loadbalancer_update", &other)
            .await,
        Err(EngineError::ActionNotAssigned)
    ));

    // Bad action
    assert!(matches!(
        engine
            .subject_has_permission(&user, "loadbalancer_delete", &tenant)
            .await,
        Err(EngineError::ActionNotAssigned)
    ));

    engine
        .subject_has_permission(&user, "loadbalancer_update", &tenant)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unmapped_action_is_unknown() {
    let engine = test_engine("infratestactions").await;
    let tenant = new_resource(&engine, "tnntten");
    let user = new_resource(&engine, "idntusr");

    assert!(matches!(
        engine
            .subject_has_permission(&user, "loadbalancer_create", &new_resource(&engine, "loadbal"))
            .await,
        Err(EngineError::UnknownAction { .. })
    ));
    assert!(matches!(
        engine.subject_has_permission(&user, "fly", &tenant).await,
        Err(EngineError::UnknownAction { .. })
    ));
}

#[tokio::test]
async fn test_permission_inherited_through_parent_and_owner() {
    let engine = test_engine("infratestinherit").await;
    let root = new_resource(&engine, "tnntten");
    let tenant = new_resource(&engine, "tnntten");
    let lb = new_resource(&engine, "loadbal");
    let user = new_resource(&engine, "idntusr");

    let (role, _) = engine
        .create_role(&root, &["loadbalancer_get"])
        .await
        .unwrap();
    engine.assign_subject_role(&user, &role).await.unwrap();
    engine
        .create_relationships(&[
            Relationship::new(tenant.clone(), "parent", root.clone()),
            Relationship::new(lb.clone(), "owner", tenant.clone()),
        ])
        .await
        .unwrap();

    for resource in [&root, &tenant, &lb] {
        engine
            .subject_has_permission(&user, "loadbalancer_get", resource)
            .await
            .unwrap();
    }
    assert!(matches!(
        engine
            .subject_has_permission(&user, "loadbalancer_delete", &lb)
            .await,
        Err(EngineError::ActionNotAssigned)
    ));
}

// =============================================================================
// Consistency and namespaces
// =============================================================================

#[tokio::test]
async fn test_token_from_the_future_is_rejected() {
    let engine = test_engine("testtokens").await;
    let tenant = new_resource(&engine, "tnntten");

    let result = engine
        .list_roles(&tenant, &ConsistencyToken::new("1000000"))
        .await;
    assert!(matches!(result, Err(EngineError::Backend(_))));
}

#[tokio::test]
async fn test_namespaces_are_isolated() {
    let backend = Arc::new(InMemoryBackend::new());
    let first = test_engine_on("first", backend.clone()).await;
    let tenant = new_resource(&first, "tnntten");

    let (_, token) = first
        .create_role(&tenant, &["loadbalancer_get"])
        .await
        .unwrap();
    assert_eq!(first.list_roles(&tenant, &token).await.unwrap().len(), 1);

    // Same backend, same ids, different namespace.
    let second = test_engine_on("second", backend.clone()).await;
    assert!(second.list_roles(&tenant, &token).await.unwrap().is_empty());
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_engine_is_shared_across_tasks() {
    fn assert_shareable<T: Clone + Send + Sync + 'static>() {}
    assert_shareable::<Engine>();

    let backend = Arc::new(InMemoryBackend::new());
    let engine = test_engine_on("testconcurrency", backend.clone()).await;
    let parent = new_resource(&engine, "tnntten");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            let child = new_resource(&engine, "tnntten");
            let relationship = Relationship::new(child, "parent", parent.clone());
            tokio::spawn(async move {
                engine.create_relationships(&[relationship.clone()]).await.unwrap();
                relationship
            })
        })
        .collect();

    for handle in handles {
        let relationship = handle.await.unwrap();
        let listed = engine
            .list_relationships_from(&relationship.resource, &ConsistencyToken::default())
            .await
            .unwrap();
        assert_eq!(listed, vec![relationship]);
    }
    assert_eq!(backend.len(), 8);
}
