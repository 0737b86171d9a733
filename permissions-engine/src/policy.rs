//! Policy model: resource types, the relations they accept, and the mapping
//! from actions to the relations and permissions that grant them.
//!
//! A [`PolicyDocument`] is the serializable input (YAML on disk). A
//! [`Policy`] is a validated, immutable, indexed view of a document that the
//! engine consults for every validation and action lookup.

use crate::error::PolicyError;
use crate::id::{is_valid_prefix, PrefixRegistry};
use crate::schema::Schema;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

/// Reserved name of the role resource type.
pub const ROLE_RESOURCE_TYPE: &str = "role";
/// Relation on a role binding it to the subjects assigned to it.
pub const ROLE_SUBJECT_RELATION: &str = "subject";
/// Relation on a role binding it to its owning resource.
pub const ROLE_OWNER_RELATION: &str = "owner";

const GRANT_RELATION_SUFFIX: &str = "_rel";

/// Name of the relation through which a role grants `action` on its owner.
pub fn grant_relation(action: &str) -> String {
    format!("{action}{GRANT_RELATION_SUFFIX}")
}

// =============================================================================
// Document
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default)]
    pub resource_types: Vec<ResourceType>,
    #[serde(default)]
    pub unions: Vec<Union>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub action_bindings: Vec<ActionBinding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceType {
    pub name: String,
    pub id_prefix: String,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub relation: String,
    pub target_type_names: Vec<String>,
}

/// A named set of resource types, usable anywhere a type name is expected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Union {
    pub name: String,
    pub resource_type_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionBinding {
    pub action_name: String,
    pub type_name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// One way an action may be granted. Exactly one field must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_binding: Option<RoleBindingCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_action: Option<RelationshipActionCondition>,
}

impl Condition {
    pub fn role_binding() -> Self {
        Self {
            role_binding: Some(RoleBindingCondition {}),
            relationship_action: None,
        }
    }

    pub fn relationship_action(relation: &str, action_name: &str) -> Self {
        Self {
            role_binding: None,
            relationship_action: Some(RelationshipActionCondition {
                relation: relation.to_string(),
                action_name: action_name.to_string(),
            }),
        }
    }
}

/// The action is granted by roles owned by the resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBindingCondition {}

/// The action is inherited from `action_name` on whatever fills `relation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipActionCondition {
    pub relation: String,
    pub action_name: String,
}

impl PolicyDocument {
    /// The built-in document: users and clients acting on tenants and load
    /// balancers through tenant-owned roles.
    pub fn builtin() -> Self {
        let resource_types = vec![
            ResourceType {
                name: ROLE_RESOURCE_TYPE.to_string(),
                id_prefix: "permrol".to_string(),
                relationships: vec![
                    Relationship {
                        relation: ROLE_SUBJECT_RELATION.to_string(),
                        target_type_names: vec!["subject".to_string()],
                    },
                    Relationship {
                        relation: ROLE_OWNER_RELATION.to_string(),
                        target_type_names: vec!["resourceowner".to_string()],
                    },
                ],
            },
            ResourceType {
                name: "user".to_string(),
                id_prefix: "idntusr".to_string(),
                relationships: Vec::new(),
            },
            ResourceType {
                name: "client".to_string(),
                id_prefix: "idntcli".to_string(),
                relationships: Vec::new(),
            },
            ResourceType {
                name: "tenant".to_string(),
                id_prefix: "tnntten".to_string(),
                relationships: vec![Relationship {
                    relation: "parent".to_string(),
                    target_type_names: vec!["tenant".to_string()],
                }],
            },
            ResourceType {
                name: "loadbalancer".to_string(),
                id_prefix: "loadbal".to_string(),
                relationships: vec![Relationship {
                    relation: "owner".to_string(),
                    target_type_names: vec!["resourceowner".to_string()],
                }],
            },
        ];

        let unions = vec![
            Union {
                name: "subject".to_string(),
                resource_type_names: vec!["user".to_string(), "client".to_string()],
            },
            Union {
                name: "resourceowner".to_string(),
                resource_type_names: vec!["tenant".to_string()],
            },
        ];

        let verbs = ["create", "get", "list", "update", "delete"];
        let owner_actions: Vec<String> = ["loadbalancer", "role"]
            .iter()
            .flat_map(|noun| verbs.iter().map(move |verb| format!("{noun}_{verb}")))
            .collect();

        let actions = owner_actions
            .iter()
            .map(|name| Action { name: name.clone() })
            .collect();

        let mut action_bindings: Vec<ActionBinding> = owner_actions
            .iter()
            .map(|name| ActionBinding {
                action_name: name.clone(),
                type_name: "resourceowner".to_string(),
                conditions: vec![
                    Condition::role_binding(),
                    Condition::relationship_action("parent", name),
                ],
            })
            .collect();

        action_bindings.extend(
            ["loadbalancer_get", "loadbalancer_update", "loadbalancer_delete"]
                .iter()
                .map(|name| ActionBinding {
                    action_name: (*name).to_string(),
                    type_name: "loadbalancer".to_string(),
                    conditions: vec![Condition::relationship_action("owner", name)],
                }),
        );

        Self {
            resource_types,
            unions,
            actions,
            action_bindings,
        }
    }

    /// Parse a single YAML document. `source` names the input in errors.
    pub fn from_yaml_str(yaml: &str, source: &str) -> Result<Self, PolicyError> {
        serde_yaml::from_str(yaml).map_err(|e| PolicyError::Parse {
            path: source.to_string(),
            source: e,
        })
    }

    /// Append every declaration of `other` to this document.
    pub fn merge(&mut self, other: PolicyDocument) {
        self.resource_types.extend(other.resource_types);
        self.unions.extend(other.unions);
        self.actions.extend(other.actions);
        self.action_bindings.extend(other.action_bindings);
    }

    /// Load and merge every `.yaml`/`.yml` file in `dir`, in path order.
    pub fn load_dir(dir: &Path) -> Result<Self, PolicyError> {
        let io_error = |source| PolicyError::Io {
            path: dir.display().to_string(),
            source,
        };

        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .map_err(io_error)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext == "yaml" || ext == "yml")
            })
            .collect();
        paths.sort();

        let mut document = Self::default();
        for path in &paths {
            let contents = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
                path: path.display().to_string(),
                source,
            })?;
            document.merge(Self::from_yaml_str(&contents, &path.display().to_string())?);
        }

        info!(
            files = paths.len(),
            resource_types = document.resource_types.len(),
            actions = document.actions.len(),
            "Loaded policy documents"
        );

        Ok(document)
    }
}

// =============================================================================
// Compiled policy
// =============================================================================

/// How a bound action may be granted on a resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    /// Granted by a role owned by the resource.
    RoleBinding,
    /// Inherited from `action` on the subjects of `relation`.
    Inherited { relation: String, action: String },
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledRelation {
    pub(crate) name: String,
    pub(crate) target_types: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledBinding {
    pub(crate) action: String,
    pub(crate) grants: Vec<Grant>,
}

impl CompiledBinding {
    pub(crate) fn role_bound(&self) -> bool {
        self.grants.contains(&Grant::RoleBinding)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledType {
    pub(crate) name: String,
    pub(crate) id_prefix: String,
    pub(crate) relations: Vec<CompiledRelation>,
    /// Sorted by action declaration order.
    pub(crate) bindings: Vec<CompiledBinding>,
}

impl CompiledType {
    fn relation(&self, name: &str) -> Option<&CompiledRelation> {
        self.relations.iter().find(|r| r.name == name)
    }

    fn binding(&self, action: &str) -> Option<&CompiledBinding> {
        self.bindings.iter().find(|b| b.action == action)
    }
}

/// A validated, immutable policy.
#[derive(Debug, Clone)]
pub struct Policy {
    document: PolicyDocument,
    types: Vec<CompiledType>,
    type_index: HashMap<String, usize>,
}

impl Default for Policy {
    fn default() -> Self {
        Self::compile(PolicyDocument::builtin())
    }
}

impl Policy {
    /// Validate `document` and build the lookup tables over it.
    pub fn new(document: PolicyDocument) -> Result<Self, PolicyError> {
        validate_document(&document)?;
        Ok(Self::compile(document))
    }

    /// Re-run document validation.
    pub fn validate(&self) -> Result<(), PolicyError> {
        validate_document(&self.document)
    }

    pub fn document(&self) -> &PolicyDocument {
        &self.document
    }

    fn compile(document: PolicyDocument) -> Self {
        let expander = TypeExpander::new(&document);
        let action_order: HashMap<&str, usize> = document
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| (a.name.as_str(), i))
            .collect();

        let mut types: Vec<CompiledType> = document
            .resource_types
            .iter()
            .map(|rt| CompiledType {
                name: rt.name.clone(),
                id_prefix: rt.id_prefix.clone(),
                relations: rt
                    .relationships
                    .iter()
                    .map(|rel| CompiledRelation {
                        name: rel.relation.clone(),
                        target_types: expander.expand_all(&rel.target_type_names),
                    })
                    .collect(),
                bindings: Vec::new(),
            })
            .collect();

        let type_index: HashMap<String, usize> = types
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();

        for binding in &document.action_bindings {
            let grants: Vec<Grant> = binding
                .conditions
                .iter()
                .filter_map(|condition| {
                    if condition.role_binding.is_some() {
                        Some(Grant::RoleBinding)
                    } else {
                        condition
                            .relationship_action
                            .as_ref()
                            .map(|ra| Grant::Inherited {
                                relation: ra.relation.clone(),
                                action: ra.action_name.clone(),
                            })
                    }
                })
                .collect();

            for type_name in expander.expand(&binding.type_name) {
                if let Some(compiled) = type_index.get(&type_name).and_then(|&i| types.get_mut(i)) {
                    compiled.bindings.push(CompiledBinding {
                        action: binding.action_name.clone(),
                        grants: grants.clone(),
                    });
                }
            }
        }

        for compiled in &mut types {
            compiled
                .bindings
                .sort_by_key(|b| action_order.get(b.action.as_str()).copied().unwrap_or(usize::MAX));
        }

        Self {
            document,
            types,
            type_index,
        }
    }

    pub(crate) fn compiled_types(&self) -> &[CompiledType] {
        &self.types
    }

    fn compiled_type(&self, name: &str) -> Option<&CompiledType> {
        self.type_index.get(name).and_then(|&i| self.types.get(i))
    }

    pub fn has_resource_type(&self, name: &str) -> bool {
        self.type_index.contains_key(name)
    }

    /// Resource type names in declaration order.
    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(|t| t.name.as_str())
    }

    pub fn id_prefix(&self, resource_type: &str) -> Option<&str> {
        self.compiled_type(resource_type).map(|t| t.id_prefix.as_str())
    }

    /// Subject types permitted to fill `relation` on `resource_type`, or
    /// `None` if the relation is not declared there.
    pub fn relation_targets(&self, resource_type: &str, relation: &str) -> Option<&[String]> {
        self.compiled_type(resource_type)?
            .relation(relation)
            .map(|r| r.target_types.as_slice())
    }

    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.document.actions.iter().map(|a| a.name.as_str())
    }

    /// The backend permission that decides `action` on `resource_type`.
    pub fn permission_for(&self, action: &str, resource_type: &str) -> Option<&str> {
        self.compiled_type(resource_type)?
            .binding(action)
            .map(|b| b.action.as_str())
    }

    /// Ways `action` may be granted on `resource_type`.
    pub fn grants(&self, action: &str, resource_type: &str) -> Option<&[Grant]> {
        self.compiled_type(resource_type)?
            .binding(action)
            .map(|b| b.grants.as_slice())
    }

    /// Whether a role owned by a `resource_type` may grant `action`.
    pub fn role_grants_action(&self, action: &str, resource_type: &str) -> bool {
        self.compiled_type(resource_type)
            .and_then(|t| t.binding(action))
            .is_some_and(CompiledBinding::role_bound)
    }

    /// Reverse of [`grant_relation`] for the role-bound actions of a type.
    pub fn action_for_grant_relation(&self, resource_type: &str, relation: &str) -> Option<&str> {
        let action = relation.strip_suffix(GRANT_RELATION_SUFFIX)?;
        self.compiled_type(resource_type)?
            .bindings
            .iter()
            .find(|b| b.action == action && b.role_bound())
            .map(|b| b.action.as_str())
    }

    /// Compile the backend schema for this policy, without a namespace.
    pub fn schema(&self) -> Schema {
        Schema::from(self)
    }

    /// Prefix registry covering every declared resource type.
    pub fn prefix_registry(&self) -> PrefixRegistry {
        self.types
            .iter()
            .map(|t| (t.id_prefix.clone(), t.name.clone()))
            .collect()
    }
}

// =============================================================================
// Validation
// =============================================================================

struct TypeExpander<'a> {
    types: HashSet<&'a str>,
    unions: HashMap<&'a str, &'a [String]>,
}

impl<'a> TypeExpander<'a> {
    fn new(document: &'a PolicyDocument) -> Self {
        Self {
            types: document.resource_types.iter().map(|t| t.name.as_str()).collect(),
            unions: document
                .unions
                .iter()
                .map(|u| (u.name.as_str(), u.resource_type_names.as_slice()))
                .collect(),
        }
    }

    fn is_declared(&self, name: &str) -> bool {
        self.types.contains(name) || self.unions.contains_key(name)
    }

    fn expand(&self, name: &str) -> Vec<String> {
        if self.types.contains(name) {
            vec![name.to_string()]
        } else {
            self.unions
                .get(name)
                .map(|members| members.to_vec())
                .unwrap_or_default()
        }
    }

    fn expand_all(&self, names: &[String]) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for name in names {
            for expanded in self.expand(name) {
                if !out.contains(&expanded) {
                    out.push(expanded);
                }
            }
        }
        out
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn check_name(name: &str) -> Result<(), PolicyError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(PolicyError::InvalidName(name.to_string()))
    }
}

fn validate_document(document: &PolicyDocument) -> Result<(), PolicyError> {
    let expander = TypeExpander::new(document);

    // Type and union names.
    let mut names = HashSet::new();
    let mut prefixes = HashSet::new();
    for rt in &document.resource_types {
        check_name(&rt.name)?;
        if !names.insert(rt.name.as_str()) {
            return Err(PolicyError::DuplicateResourceType(rt.name.clone()));
        }
        if !is_valid_prefix(&rt.id_prefix) {
            return Err(PolicyError::InvalidIdPrefix {
                resource_type: rt.name.clone(),
                prefix: rt.id_prefix.clone(),
            });
        }
        if !prefixes.insert(rt.id_prefix.as_str()) {
            return Err(PolicyError::DuplicateIdPrefix(rt.id_prefix.clone()));
        }
    }
    for union in &document.unions {
        check_name(&union.name)?;
        if !names.insert(union.name.as_str()) {
            return Err(PolicyError::DuplicateResourceType(union.name.clone()));
        }
        for member in &union.resource_type_names {
            if !expander.types.contains(member.as_str()) {
                return Err(PolicyError::UnknownUnionMember {
                    union: union.name.clone(),
                    resource_type: member.clone(),
                });
            }
        }
    }

    // Relations.
    for rt in &document.resource_types {
        let mut relations = HashSet::new();
        for rel in &rt.relationships {
            check_name(&rel.relation)?;
            if !relations.insert(rel.relation.as_str()) {
                return Err(PolicyError::DuplicateRelation {
                    resource_type: rt.name.clone(),
                    relation: rel.relation.clone(),
                });
            }
            for target in &rel.target_type_names {
                if !expander.is_declared(target) {
                    return Err(PolicyError::UnknownSubjectType {
                        resource_type: rt.name.clone(),
                        relation: rel.relation.clone(),
                        subject_type: target.clone(),
                    });
                }
            }
        }
    }

    let role = document
        .resource_types
        .iter()
        .find(|rt| rt.name == ROLE_RESOURCE_TYPE)
        .ok_or_else(|| PolicyError::MissingRoleType(ROLE_RESOURCE_TYPE.to_string()))?;
    for required in [ROLE_SUBJECT_RELATION, ROLE_OWNER_RELATION] {
        if !role.relationships.iter().any(|r| r.relation == required) {
            return Err(PolicyError::MissingRoleRelation(required.to_string()));
        }
    }
    let role_owner_types: HashSet<String> = role
        .relationships
        .iter()
        .filter(|r| r.relation == ROLE_OWNER_RELATION)
        .flat_map(|r| expander.expand_all(&r.target_type_names))
        .collect();

    // Actions.
    let mut actions = HashSet::new();
    for action in &document.actions {
        check_name(&action.name)?;
        if !actions.insert(action.name.as_str()) {
            return Err(PolicyError::DuplicateAction(action.name.clone()));
        }
    }

    // Bindings, expanded per concrete resource type.
    let mut bound: HashMap<(String, String), &ActionBinding> = HashMap::new();
    for binding in &document.action_bindings {
        if !actions.contains(binding.action_name.as_str()) {
            return Err(PolicyError::UnknownAction(binding.action_name.clone()));
        }
        if !expander.is_declared(&binding.type_name) {
            return Err(PolicyError::UnknownBindingType {
                action: binding.action_name.clone(),
                type_name: binding.type_name.clone(),
            });
        }
        for resource_type in expander.expand(&binding.type_name) {
            let key = (resource_type.clone(), binding.action_name.clone());
            if bound.insert(key, binding).is_some() {
                return Err(PolicyError::DuplicateBinding {
                    action: binding.action_name.clone(),
                    resource_type,
                });
            }
        }
    }

    let relation_targets = |resource_type: &str, relation: &str| -> Option<Vec<String>> {
        document
            .resource_types
            .iter()
            .find(|rt| rt.name == resource_type)?
            .relationships
            .iter()
            .find(|r| r.relation == relation)
            .map(|r| expander.expand_all(&r.target_type_names))
    };

    for ((resource_type, action), binding) in &bound {
        let invalid_condition = || PolicyError::InvalidCondition {
            action: action.clone(),
            resource_type: resource_type.clone(),
        };

        for condition in &binding.conditions {
            match (&condition.role_binding, &condition.relationship_action) {
                (Some(_), None) => {
                    if !role_owner_types.contains(resource_type) {
                        return Err(PolicyError::RoleBindingNotOwnable {
                            action: action.clone(),
                            resource_type: resource_type.clone(),
                        });
                    }
                }
                (None, Some(ra)) => {
                    let targets = relation_targets(resource_type, &ra.relation).ok_or_else(|| {
                        PolicyError::UnknownConditionRelation {
                            action: action.clone(),
                            resource_type: resource_type.clone(),
                            relation: ra.relation.clone(),
                        }
                    })?;
                    for target in targets {
                        if !bound.contains_key(&(target.clone(), ra.action_name.clone())) {
                            return Err(PolicyError::MissingInheritedBinding {
                                action: action.clone(),
                                resource_type: resource_type.clone(),
                                relation: ra.relation.clone(),
                                target_type: target,
                                target_action: ra.action_name.clone(),
                            });
                        }
                    }
                }
                _ => return Err(invalid_condition()),
            }
        }
    }

    // Generated relation and permission names must not collide with declared
    // relations.
    for rt in &document.resource_types {
        let mut taken: HashSet<String> =
            rt.relationships.iter().map(|r| r.relation.clone()).collect();
        for ((resource_type, action), binding) in &bound {
            if resource_type != &rt.name {
                continue;
            }
            let mut generated = vec![action.clone()];
            if binding.conditions.iter().any(|c| c.role_binding.is_some()) {
                generated.push(grant_relation(action));
            }
            for name in generated {
                if !taken.insert(name.clone()) {
                    return Err(PolicyError::DuplicateRelation {
                        resource_type: rt.name.clone(),
                        relation: name,
                    });
                }
            }
        }
    }

    // Every binding must be reachable from a role binding.
    let mut grounded: HashSet<(String, String)> = bound
        .iter()
        .filter(|(_, b)| b.conditions.iter().any(|c| c.role_binding.is_some()))
        .map(|(key, _)| key.clone())
        .collect();
    loop {
        let mut changed = false;
        for ((resource_type, action), binding) in &bound {
            let key = (resource_type.clone(), action.clone());
            if grounded.contains(&key) {
                continue;
            }
            let reachable = binding
                .conditions
                .iter()
                .filter_map(|c| c.relationship_action.as_ref())
                .any(|ra| {
                    relation_targets(resource_type, &ra.relation)
                        .unwrap_or_default()
                        .into_iter()
                        .any(|target| grounded.contains(&(target, ra.action_name.clone())))
                });
            if reachable {
                grounded.insert(key);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let mut unsatisfiable: Vec<&(String, String)> =
        bound.keys().filter(|key| !grounded.contains(*key)).collect();
    unsatisfiable.sort();
    if let Some((resource_type, action)) = unsatisfiable.first() {
        return Err(PolicyError::UnsatisfiableAction {
            action: action.clone(),
            resource_type: resource_type.clone(),
        });
    }

    Ok(())
}
