//! Wire types and clients for the subset of `authzed.api.v1` used by
//! [`super::SpiceDbBackend`]. Field numbers and service paths follow the
//! published protobuf definitions.

use tonic::codegen::http::uri::PathAndQuery;
use tonic::codegen::{Body, Bytes, StdError};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ObjectReference {
    #[prost(string, tag = "1")]
    pub object_type: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub object_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubjectReference {
    #[prost(message, optional, tag = "1")]
    pub object: ::core::option::Option<ObjectReference>,
    #[prost(string, tag = "2")]
    pub optional_relation: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Relationship {
    #[prost(message, optional, tag = "1")]
    pub resource: ::core::option::Option<ObjectReference>,
    #[prost(string, tag = "2")]
    pub relation: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "3")]
    pub subject: ::core::option::Option<SubjectReference>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ZedToken {
    #[prost(string, tag = "1")]
    pub token: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RelationshipUpdate {
    #[prost(enumeration = "relationship_update::Operation", tag = "1")]
    pub operation: i32,
    #[prost(message, optional, tag = "2")]
    pub relationship: ::core::option::Option<Relationship>,
}

pub mod relationship_update {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Operation {
        Unspecified = 0,
        Create = 1,
        Touch = 2,
        Delete = 3,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Consistency {
    #[prost(oneof = "consistency::Requirement", tags = "1, 2, 3, 4")]
    pub requirement: ::core::option::Option<consistency::Requirement>,
}

pub mod consistency {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Requirement {
        #[prost(bool, tag = "1")]
        MinimizeLatency(bool),
        #[prost(message, tag = "2")]
        AtLeastAsFresh(super::ZedToken),
        #[prost(message, tag = "3")]
        AtExactSnapshot(super::ZedToken),
        #[prost(bool, tag = "4")]
        FullyConsistent(bool),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RelationshipFilter {
    #[prost(string, tag = "1")]
    pub resource_type: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub optional_resource_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub optional_relation: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "4")]
    pub optional_subject_filter: ::core::option::Option<SubjectFilter>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubjectFilter {
    #[prost(string, tag = "1")]
    pub subject_type: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub optional_subject_id: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "3")]
    pub optional_relation: ::core::option::Option<subject_filter::RelationFilter>,
}

pub mod subject_filter {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct RelationFilter {
        #[prost(string, tag = "1")]
        pub relation: ::prost::alloc::string::String,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadRelationshipsRequest {
    #[prost(message, optional, tag = "1")]
    pub consistency: ::core::option::Option<Consistency>,
    #[prost(message, optional, tag = "2")]
    pub relationship_filter: ::core::option::Option<RelationshipFilter>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadRelationshipsResponse {
    #[prost(message, optional, tag = "1")]
    pub read_at: ::core::option::Option<ZedToken>,
    #[prost(message, optional, tag = "2")]
    pub relationship: ::core::option::Option<Relationship>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteRelationshipsRequest {
    #[prost(message, repeated, tag = "1")]
    pub updates: ::prost::alloc::vec::Vec<RelationshipUpdate>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteRelationshipsResponse {
    #[prost(message, optional, tag = "1")]
    pub written_at: ::core::option::Option<ZedToken>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteRelationshipsRequest {
    #[prost(message, optional, tag = "1")]
    pub relationship_filter: ::core::option::Option<RelationshipFilter>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteRelationshipsResponse {
    #[prost(message, optional, tag = "1")]
    pub deleted_at: ::core::option::Option<ZedToken>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CheckPermissionRequest {
    #[prost(message, optional, tag = "1")]
    pub consistency: ::core::option::Option<Consistency>,
    #[prost(message, optional, tag = "2")]
    pub resource: ::core::option::Option<ObjectReference>,
    #[prost(string, tag = "3")]
    pub permission: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "4")]
    pub subject: ::core::option::Option<SubjectReference>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CheckPermissionResponse {
    #[prost(message, optional, tag = "1")]
    pub checked_at: ::core::option::Option<ZedToken>,
    #[prost(enumeration = "check_permission_response::Permissionship", tag = "2")]
    pub permissionship: i32,
}

pub mod check_permission_response {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Permissionship {
        Unspecified = 0,
        NoPermission = 1,
        HasPermission = 2,
        ConditionalPermission = 3,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteSchemaRequest {
    #[prost(string, tag = "1")]
    pub schema: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteSchemaResponse {
    #[prost(message, optional, tag = "1")]
    pub written_at: ::core::option::Option<ZedToken>,
}

fn not_ready<E: Into<StdError>>(e: E) -> tonic::Status {
    tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
}

/// Client for `authzed.api.v1.PermissionsService`.
#[derive(Debug, Clone)]
pub struct PermissionsServiceClient<T> {
    inner: tonic::client::Grpc<T>,
}

impl<T> PermissionsServiceClient<T>
where
    T: tonic::client::GrpcService<tonic::body::BoxBody>,
    T::Error: Into<StdError>,
    T::ResponseBody: Body<Data = Bytes> + Send + 'static,
    <T::ResponseBody as Body>::Error: Into<StdError> + Send,
{
    pub fn new(inner: T) -> Self {
        Self {
            inner: tonic::client::Grpc::new(inner),
        }
    }

    pub async fn read_relationships(
        &mut self,
        request: impl tonic::IntoRequest<ReadRelationshipsRequest>,
    ) -> Result<tonic::Response<tonic::codec::Streaming<ReadRelationshipsResponse>>, tonic::Status> {
        self.inner.ready().await.map_err(not_ready)?;
        let codec = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static("/authzed.api.v1.PermissionsService/ReadRelationships");
        self.inner
            .server_streaming(request.into_request(), path, codec)
            .await
    }

    pub async fn write_relationships(
        &mut self,
        request: impl tonic::IntoRequest<WriteRelationshipsRequest>,
    ) -> Result<tonic::Response<WriteRelationshipsResponse>, tonic::Status> {
        self.inner.ready().await.map_err(not_ready)?;
        let codec = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static("/authzed.api.v1.PermissionsService/WriteRelationships");
        self.inner.unary(request.into_request(), path, codec).await
    }

    pub async fn delete_relationships(
        &mut self,
        request: impl tonic::IntoRequest<DeleteRelationshipsRequest>,
    ) -> Result<tonic::Response<DeleteRelationshipsResponse>, tonic::Status> {
        self.inner.ready().await.map_err(not_ready)?;
        let codec = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static("/authzed.api.v1.PermissionsService/DeleteRelationships");
        self.inner.unary(request.into_request(), path, codec).await
    }

    pub async fn check_permission(
        &mut self,
        request: impl tonic::IntoRequest<CheckPermissionRequest>,
    ) -> Result<tonic::Response<CheckPermissionResponse>, tonic::Status> {
        self.inner.ready().await.map_err(not_ready)?;
        let codec = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static("/authzed.api.v1.PermissionsService/CheckPermission");
        self.inner.unary(request.into_request(), path, codec).await
    }
}

/// Client for `authzed.api.v1.SchemaService`.
#[derive(Debug, Clone)]
pub struct SchemaServiceClient<T> {
    inner: tonic::client::Grpc<T>,
}

impl<T> SchemaServiceClient<T>
where
    T: tonic::client::GrpcService<tonic::body::BoxBody>,
    T::Error: Into<StdError>,
    T::ResponseBody: Body<Data = Bytes> + Send + 'static,
    <T::ResponseBody as Body>::Error: Into<StdError> + Send,
{
    pub fn new(inner: T) -> Self {
        Self {
            inner: tonic::client::Grpc::new(inner),
        }
    }

    pub async fn write_schema(
        &mut self,
        request: impl tonic::IntoRequest<WriteSchemaRequest>,
    ) -> Result<tonic::Response<WriteSchemaResponse>, tonic::Status> {
        self.inner.ready().await.map_err(not_ready)?;
        let codec = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static("/authzed.api.v1.SchemaService/WriteSchema");
        self.inner.unary(request.into_request(), path, codec).await
    }
}
