use crate::{
    backend::{
        proto::{
            self, check_permission_response, consistency::Requirement, relationship_update::Operation,
            subject_filter::RelationFilter, PermissionsServiceClient, SchemaServiceClient,
        },
        Object, Permissionship, PermissionsBackend, Subject, Tuple, TupleFilter, TupleUpdate,
    },
    config::SpiceDbConfig,
    error::BackendError,
    models::ConsistencyToken,
    schema::Schema,
};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::time::Duration;
use tonic::{
    metadata::{Ascii, MetadataValue},
    service::{interceptor::InterceptedService, Interceptor},
    transport::{Channel, ClientTlsConfig, Endpoint},
    Request, Status,
};
use tracing::{debug, info, instrument};

/// Attaches the preshared key to every request.
#[derive(Clone)]
pub struct BearerToken {
    header: MetadataValue<Ascii>,
}

impl BearerToken {
    fn new(key: &str) -> Result<Self, BackendError> {
        let header = format!("Bearer {key}")
            .parse()
            .map_err(|_| BackendError::InvalidConfig("preshared key is not valid ASCII".to_string()))?;
        Ok(Self { header })
    }
}

impl Interceptor for BearerToken {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        request
            .metadata_mut()
            .insert("authorization", self.header.clone());
        Ok(request)
    }
}

type AuthenticatedChannel = InterceptedService<Channel, BearerToken>;

/// [`PermissionsBackend`] speaking the SpiceDB gRPC API.
///
/// Cloning is cheap; clones share the underlying channel.
#[derive(Clone)]
pub struct SpiceDbBackend {
    permissions: PermissionsServiceClient<AuthenticatedChannel>,
    schemas: SchemaServiceClient<AuthenticatedChannel>,
}

impl SpiceDbBackend {
    /// Connect eagerly, failing if the endpoint cannot be reached.
    pub async fn connect(config: &SpiceDbConfig) -> Result<Self, BackendError> {
        let endpoint = endpoint(config)?;
        info!(endpoint = %endpoint.uri(), "connecting to spicedb");
        let channel = endpoint.connect().await?;
        Self::from_channel(channel, config.key.expose_secret())
    }

    /// Build a client whose channel connects on first use.
    pub fn connect_lazy(config: &SpiceDbConfig) -> Result<Self, BackendError> {
        let channel = endpoint(config)?.connect_lazy();
        Self::from_channel(channel, config.key.expose_secret())
    }

    pub fn from_channel(channel: Channel, key: &str) -> Result<Self, BackendError> {
        let token = BearerToken::new(key)?;
        Ok(Self {
            permissions: PermissionsServiceClient::new(InterceptedService::new(
                channel.clone(),
                token.clone(),
            )),
            schemas: SchemaServiceClient::new(InterceptedService::new(channel, token)),
        })
    }
}

fn endpoint(config: &SpiceDbConfig) -> Result<Endpoint, BackendError> {
    if config.endpoint.is_empty() {
        return Err(BackendError::InvalidConfig("endpoint is empty".to_string()));
    }

    let uri = if config.endpoint.contains("://") {
        config.endpoint.clone()
    } else if config.insecure {
        format!("http://{}", config.endpoint)
    } else {
        format!("https://{}", config.endpoint)
    };

    let mut endpoint = Endpoint::from_shared(uri)?
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .timeout(Duration::from_secs(config.request_timeout_secs));

    if !config.insecure {
        endpoint = endpoint.tls_config(ClientTlsConfig::new().with_native_roots())?;
    }

    Ok(endpoint)
}

fn object_reference(object: Object) -> proto::ObjectReference {
    proto::ObjectReference {
        object_type: object.object_type,
        object_id: object.object_id,
    }
}

fn subject_reference(subject: Subject) -> proto::SubjectReference {
    proto::SubjectReference {
        object: Some(object_reference(subject.object)),
        optional_relation: subject.relation.unwrap_or_default(),
    }
}

fn relationship(tuple: Tuple) -> proto::Relationship {
    proto::Relationship {
        resource: Some(object_reference(tuple.resource)),
        relation: tuple.relation,
        subject: Some(subject_reference(tuple.subject)),
    }
}

fn tuple(relationship: proto::Relationship) -> Result<Tuple, BackendError> {
    let resource = relationship
        .resource
        .ok_or(BackendError::MissingField("relationship.resource"))?;
    let subject = relationship
        .subject
        .ok_or(BackendError::MissingField("relationship.subject"))?;
    let subject_object = subject
        .object
        .ok_or(BackendError::MissingField("relationship.subject.object"))?;

    Ok(Tuple {
        resource: Object {
            object_type: resource.object_type,
            object_id: resource.object_id,
        },
        relation: relationship.relation,
        subject: Subject {
            object: Object {
                object_type: subject_object.object_type,
                object_id: subject_object.object_id,
            },
            relation: Some(subject.optional_relation).filter(|r| !r.is_empty()),
        },
    })
}

fn relationship_filter(filter: TupleFilter) -> proto::RelationshipFilter {
    proto::RelationshipFilter {
        resource_type: filter.resource_type,
        optional_resource_id: filter.resource_id.unwrap_or_default(),
        optional_relation: filter.relation.unwrap_or_default(),
        optional_subject_filter: filter.subject.map(|subject| proto::SubjectFilter {
            subject_type: subject.subject_type,
            optional_subject_id: subject.subject_id.unwrap_or_default(),
            optional_relation: subject.relation.map(|relation| RelationFilter { relation }),
        }),
    }
}

fn consistency(token: &ConsistencyToken) -> Option<proto::Consistency> {
    if token.is_empty() {
        return None;
    }

    Some(proto::Consistency {
        requirement: Some(Requirement::AtLeastAsFresh(proto::ZedToken {
            token: token.as_str().to_string(),
        })),
    })
}

fn written_token(token: Option<proto::ZedToken>, field: &'static str) -> Result<ConsistencyToken, BackendError> {
    token
        .map(|t| ConsistencyToken::new(t.token))
        .ok_or(BackendError::MissingField(field))
}

#[async_trait]
impl PermissionsBackend for SpiceDbBackend {
    #[instrument(skip_all, fields(definitions = schema.namespaces.len()))]
    async fn write_schema(&self, schema: &Schema) -> Result<ConsistencyToken, BackendError> {
        let request = proto::WriteSchemaRequest {
            schema: schema.to_string(),
        };

        let response = self.schemas.clone().write_schema(request).await?.into_inner();
        debug!("schema written");

        written_token(response.written_at, "written_at")
    }

    #[instrument(skip_all, fields(updates = updates.len()))]
    async fn write_relationships(
        &self,
        updates: Vec<TupleUpdate>,
    ) -> Result<ConsistencyToken, BackendError> {
        let updates = updates
            .into_iter()
            .map(|update| {
                let (operation, tuple) = match update {
                    TupleUpdate::Touch(tuple) => (Operation::Touch, tuple),
                    TupleUpdate::Delete(tuple) => (Operation::Delete, tuple),
                };
                proto::RelationshipUpdate {
                    operation: operation as i32,
                    relationship: Some(relationship(tuple)),
                }
            })
            .collect();

        let response = self
            .permissions
            .clone()
            .write_relationships(proto::WriteRelationshipsRequest { updates })
            .await?
            .into_inner();

        written_token(response.written_at, "written_at")
    }

    #[instrument(skip_all, fields(resource_type = %filter.resource_type))]
    async fn delete_relationships(&self, filter: TupleFilter) -> Result<ConsistencyToken, BackendError> {
        let request = proto::DeleteRelationshipsRequest {
            relationship_filter: Some(relationship_filter(filter)),
        };

        let response = self
            .permissions
            .clone()
            .delete_relationships(request)
            .await?
            .into_inner();

        written_token(response.deleted_at, "deleted_at")
    }

    #[instrument(skip_all, fields(resource_type = %filter.resource_type, consistency = %consistency_token))]
    async fn read_relationships(
        &self,
        filter: TupleFilter,
        consistency_token: &ConsistencyToken,
    ) -> Result<Vec<Tuple>, BackendError> {
        let request = proto::ReadRelationshipsRequest {
            consistency: consistency(consistency_token),
            relationship_filter: Some(relationship_filter(filter)),
        };

        let mut stream = self
            .permissions
            .clone()
            .read_relationships(request)
            .await?
            .into_inner();

        let mut tuples = Vec::new();
        while let Some(response) = stream.message().await? {
            let relationship = response
                .relationship
                .ok_or(BackendError::MissingField("relationship"))?;
            tuples.push(tuple(relationship)?);
        }

        debug!(count = tuples.len(), "relationships read");
        Ok(tuples)
    }

    #[instrument(skip_all, fields(%resource, permission, %subject))]
    async fn check_permission(
        &self,
        resource: Object,
        permission: &str,
        subject: Subject,
    ) -> Result<Permissionship, BackendError> {
        let request = proto::CheckPermissionRequest {
            consistency: None,
            resource: Some(object_reference(resource)),
            permission: permission.to_string(),
            subject: Some(subject_reference(subject)),
        };

        let response = self
            .permissions
            .clone()
            .check_permission(request)
            .await?
            .into_inner();

        use check_permission_response::Permissionship as Wire;
        let permissionship = match Wire::try_from(response.permissionship) {
            Ok(Wire::HasPermission) => Permissionship::Granted,
            Ok(Wire::NoPermission) => Permissionship::Denied,
            Ok(Wire::ConditionalPermission) => Permissionship::Conditional,
            Ok(Wire::Unspecified) | Err(_) => return Err(BackendError::MissingField("permissionship")),
        };

        debug!(?permissionship, "permission checked");
        Ok(permissionship)
    }
}
