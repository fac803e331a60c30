//! Wire types and service glue for the `circleci.provider.v1.Provider` gRPC
//! service.
//!
//! Configuration, state and attribute values travel as JSON inside `bytes`
//! fields. Schemas travel as structured messages.
//!
//! Derived from `proto/provider.proto`; message, field and tag changes go
//! there first and are mirrored here.

#![allow(missing_docs)]

use std::collections::HashMap;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Diagnostic {
    #[prost(enumeration = "diagnostic::Severity", tag = "1")]
    pub severity: i32,
    #[prost(string, tag = "2")]
    pub summary: String,
    #[prost(string, tag = "3")]
    pub detail: String,
    #[prost(string, tag = "4")]
    pub attribute: String,
}

pub mod diagnostic {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Severity {
        Invalid = 0,
        Error = 1,
        Warning = 2,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Attribute {
    #[prost(string, tag = "1")]
    pub name: String,
    /// JSON-encoded attribute type.
    #[prost(bytes = "vec", tag = "2")]
    pub r#type: Vec<u8>,
    #[prost(bool, tag = "3")]
    pub required: bool,
    #[prost(bool, tag = "4")]
    pub optional: bool,
    #[prost(bool, tag = "5")]
    pub computed: bool,
    #[prost(bool, tag = "6")]
    pub sensitive: bool,
    #[prost(string, tag = "7")]
    pub description: String,
    #[prost(bool, tag = "8")]
    pub force_new: bool,
    /// JSON-encoded default, empty when unset.
    #[prost(bytes = "vec", tag = "9")]
    pub default_value: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Block {
    #[prost(message, repeated, tag = "1")]
    pub attributes: Vec<Attribute>,
    #[prost(message, repeated, tag = "2")]
    pub block_types: Vec<NestedBlock>,
    #[prost(string, tag = "3")]
    pub description: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NestedBlock {
    #[prost(string, tag = "1")]
    pub type_name: String,
    #[prost(message, optional, tag = "2")]
    pub block: Option<Block>,
    #[prost(enumeration = "nested_block::NestingMode", tag = "3")]
    pub nesting_mode: i32,
    #[prost(int32, tag = "4")]
    pub min_items: i32,
    #[prost(int32, tag = "5")]
    pub max_items: i32,
}

pub mod nested_block {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum NestingMode {
        Invalid = 0,
        Single = 1,
        List = 2,
        Set = 3,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Schema {
    #[prost(int64, tag = "1")]
    pub version: i64,
    #[prost(message, optional, tag = "2")]
    pub block: Option<Block>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ServerCapabilities {
    #[prost(bool, tag = "1")]
    pub plan_destroy: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AttributeChange {
    #[prost(string, tag = "1")]
    pub path: String,
    #[prost(bytes = "vec", tag = "2")]
    pub before: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub after: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ImportedResource {
    #[prost(string, tag = "1")]
    pub resource_type: String,
    #[prost(bytes = "vec", tag = "2")]
    pub state: Vec<u8>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct GetMetadataRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetMetadataResponse {
    #[prost(message, optional, tag = "1")]
    pub server_capabilities: Option<ServerCapabilities>,
    #[prost(string, repeated, tag = "2")]
    pub resources: Vec<String>,
    #[prost(string, repeated, tag = "3")]
    pub data_sources: Vec<String>,
    #[prost(message, repeated, tag = "4")]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct GetSchemaRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSchemaResponse {
    #[prost(message, optional, tag = "1")]
    pub provider: Option<Schema>,
    #[prost(map = "string, message", tag = "2")]
    pub resources: HashMap<String, Schema>,
    #[prost(map = "string, message", tag = "3")]
    pub data_sources: HashMap<String, Schema>,
    #[prost(message, repeated, tag = "4")]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidateProviderConfigRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub config: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidateProviderConfigResponse {
    #[prost(message, repeated, tag = "1")]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConfigureRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub config: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConfigureResponse {
    #[prost(message, repeated, tag = "1")]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct StopRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StopResponse {
    #[prost(string, tag = "1")]
    pub error: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidateResourceConfigRequest {
    #[prost(string, tag = "1")]
    pub resource_type: String,
    #[prost(bytes = "vec", tag = "2")]
    pub config: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidateResourceConfigResponse {
    #[prost(message, repeated, tag = "1")]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpgradeResourceStateRequest {
    #[prost(string, tag = "1")]
    pub resource_type: String,
    #[prost(int64, tag = "2")]
    pub version: i64,
    #[prost(bytes = "vec", tag = "3")]
    pub raw_state: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpgradeResourceStateResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub upgraded_state: Vec<u8>,
    #[prost(message, repeated, tag = "2")]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlanRequest {
    #[prost(string, tag = "1")]
    pub resource_type: String,
    #[prost(bytes = "vec", tag = "2")]
    pub prior_state: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub proposed_state: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub config: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlanResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub planned_state: Vec<u8>,
    #[prost(message, repeated, tag = "2")]
    pub changes: Vec<AttributeChange>,
    #[prost(bool, tag = "3")]
    pub requires_replace: bool,
    #[prost(message, repeated, tag = "4")]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateRequest {
    #[prost(string, tag = "1")]
    pub resource_type: String,
    #[prost(bytes = "vec", tag = "2")]
    pub planned_state: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub state: Vec<u8>,
    #[prost(message, repeated, tag = "2")]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadRequest {
    #[prost(string, tag = "1")]
    pub resource_type: String,
    #[prost(bytes = "vec", tag = "2")]
    pub current_state: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub state: Vec<u8>,
    #[prost(message, repeated, tag = "2")]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateRequest {
    #[prost(string, tag = "1")]
    pub resource_type: String,
    #[prost(bytes = "vec", tag = "2")]
    pub prior_state: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub planned_state: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub state: Vec<u8>,
    #[prost(message, repeated, tag = "2")]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteRequest {
    #[prost(string, tag = "1")]
    pub resource_type: String,
    #[prost(bytes = "vec", tag = "2")]
    pub current_state: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteResponse {
    #[prost(message, repeated, tag = "1")]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ImportResourceStateRequest {
    #[prost(string, tag = "1")]
    pub resource_type: String,
    #[prost(string, tag = "2")]
    pub id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ImportResourceStateResponse {
    #[prost(message, repeated, tag = "1")]
    pub imported: Vec<ImportedResource>,
    #[prost(message, repeated, tag = "2")]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidateDataSourceConfigRequest {
    #[prost(string, tag = "1")]
    pub data_source_type: String,
    #[prost(bytes = "vec", tag = "2")]
    pub config: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidateDataSourceConfigResponse {
    #[prost(message, repeated, tag = "1")]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadDataSourceRequest {
    #[prost(string, tag = "1")]
    pub data_source_type: String,
    #[prost(bytes = "vec", tag = "2")]
    pub config: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadDataSourceResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub state: Vec<u8>,
    #[prost(message, repeated, tag = "2")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Server side of the `Provider` service.
pub mod provider_server {
    #![allow(clippy::let_unit_value)]

    use tonic::codegen::*;

    /// Fully qualified gRPC service name.
    pub const SERVICE_NAME: &str = "circleci.provider.v1.Provider";

    /// The RPCs of the `Provider` service.
    #[async_trait::async_trait]
    pub trait Provider: std::marker::Send + std::marker::Sync + 'static {
        async fn get_metadata(
            &self,
            request: tonic::Request<super::GetMetadataRequest>,
        ) -> std::result::Result<tonic::Response<super::GetMetadataResponse>, tonic::Status>;
        async fn get_schema(
            &self,
            request: tonic::Request<super::GetSchemaRequest>,
        ) -> std::result::Result<tonic::Response<super::GetSchemaResponse>, tonic::Status>;
        async fn validate_provider_config(
            &self,
            request: tonic::Request<super::ValidateProviderConfigRequest>,
        ) -> std::result::Result<tonic::Response<super::ValidateProviderConfigResponse>, tonic::Status>;
        async fn configure(
            &self,
            request: tonic::Request<super::ConfigureRequest>,
        ) -> std::result::Result<tonic::Response<super::ConfigureResponse>, tonic::Status>;
        async fn stop(
            &self,
            request: tonic::Request<super::StopRequest>,
        ) -> std::result::Result<tonic::Response<super::StopResponse>, tonic::Status>;
        async fn validate_resource_config(
            &self,
            request: tonic::Request<super::ValidateResourceConfigRequest>,
        ) -> std::result::Result<tonic::Response<super::ValidateResourceConfigResponse>, tonic::Status>;
        async fn upgrade_resource_state(
            &self,
            request: tonic::Request<super::UpgradeResourceStateRequest>,
        ) -> std::result::Result<tonic::Response<super::UpgradeResourceStateResponse>, tonic::Status>;
        async fn plan(
            &self,
            request: tonic::Request<super::PlanRequest>,
        ) -> std::result::Result<tonic::Response<super::PlanResponse>, tonic::Status>;
        async fn create(
            &self,
            request: tonic::Request<super::CreateRequest>,
        ) -> std::result::Result<tonic::Response<super::CreateResponse>, tonic::Status>;
        async fn read(
            &self,
            request: tonic::Request<super::ReadRequest>,
        ) -> std::result::Result<tonic::Response<super::ReadResponse>, tonic::Status>;
        async fn update(
            &self,
            request: tonic::Request<super::UpdateRequest>,
        ) -> std::result::Result<tonic::Response<super::UpdateResponse>, tonic::Status>;
        async fn delete(
            &self,
            request: tonic::Request<super::DeleteRequest>,
        ) -> std::result::Result<tonic::Response<super::DeleteResponse>, tonic::Status>;
        async fn import_resource_state(
            &self,
            request: tonic::Request<super::ImportResourceStateRequest>,
        ) -> std::result::Result<tonic::Response<super::ImportResourceStateResponse>, tonic::Status>;
        async fn validate_data_source_config(
            &self,
            request: tonic::Request<super::ValidateDataSourceConfigRequest>,
        ) -> std::result::Result<
            tonic::Response<super::ValidateDataSourceConfigResponse>,
            tonic::Status,
        >;
        async fn read_data_source(
            &self,
            request: tonic::Request<super::ReadDataSourceRequest>,
        ) -> std::result::Result<tonic::Response<super::ReadDataSourceResponse>, tonic::Status>;
    }

    /// Routes HTTP/2 requests to a [`Provider`] implementation.
    #[derive(Debug)]
    pub struct ProviderServer<T> {
        inner: Arc<T>,
    }

    impl<T> ProviderServer<T> {
        pub fn new(inner: T) -> Self {
            Self::from_arc(Arc::new(inner))
        }

        pub fn from_arc(inner: Arc<T>) -> Self {
            Self { inner }
        }
    }

    impl<T> Clone for ProviderServer<T> {
        fn clone(&self) -> Self {
            Self {
                inner: Arc::clone(&self.inner),
            }
        }
    }

    /// Expands to the future answering one unary RPC.
    macro_rules! unary {
        ($inner:expr, $req:expr, $method:ident, $request:ty, $response:ty) => {{
            struct Svc<T: Provider>(Arc<T>);

            impl<T: Provider> tonic::server::UnaryService<$request> for Svc<T> {
                type Response = $response;
                type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

                fn call(&mut self, request: tonic::Request<$request>) -> Self::Future {
                    let inner = Arc::clone(&self.0);
                    Box::pin(async move { <T as Provider>::$method(&inner, request).await })
                }
            }

            let inner = $inner;
            let req = $req;
            Box::pin(async move {
                let codec = tonic_prost::ProstCodec::default();
                let mut grpc = tonic::server::Grpc::new(codec);
                Ok(grpc.unary(Svc(inner), req).await)
            })
        }};
    }

    impl<T, B> Service<http::Request<B>> for ProviderServer<T>
    where
        T: Provider,
        B: Body + std::marker::Send + 'static,
        B::Error: Into<StdError> + std::marker::Send + 'static,
    {
        type Response = http::Response<tonic::body::Body>;
        type Error = std::convert::Infallible;
        type Future = BoxFuture<Self::Response, Self::Error>;

        fn poll_ready(
            &mut self,
            _cx: &mut Context<'_>,
        ) -> Poll<std::result::Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            let inner = Arc::clone(&self.inner);
            match req.uri().path() {
                "/circleci.provider.v1.Provider/GetMetadata" => unary!(
                    inner,
                    req,
                    get_metadata,
                    super::GetMetadataRequest,
                    super::GetMetadataResponse
                ),
                "/circleci.provider.v1.Provider/GetSchema" => unary!(
                    inner,
                    req,
                    get_schema,
                    super::GetSchemaRequest,
                    super::GetSchemaResponse
                ),
                "/circleci.provider.v1.Provider/ValidateProviderConfig" => unary!(
                    inner,
                    req,
                    validate_provider_config,
                    super::ValidateProviderConfigRequest,
                    super::ValidateProviderConfigResponse
                ),
                "/circleci.provider.v1.Provider/Configure" => unary!(
                    inner,
                    req,
                    configure,
                    super::ConfigureRequest,
                    super::ConfigureResponse
                ),
                "/circleci.provider.v1.Provider/Stop" => {
                    unary!(inner, req, stop, super::StopRequest, super::StopResponse)
                }
                "/circleci.provider.v1.Provider/ValidateResourceConfig" => unary!(
                    inner,
                    req,
                    validate_resource_config,
                    super::ValidateResourceConfigRequest,
                    super::ValidateResourceConfigResponse
                ),
                "/circleci.provider.v1.Provider/UpgradeResourceState" => unary!(
                    inner,
                    req,
                    upgrade_resource_state,
                    super::UpgradeResourceStateRequest,
                    super::UpgradeResourceStateResponse
                ),
                "/circleci.provider.v1.Provider/Plan" => {
                    unary!(inner, req, plan, super::PlanRequest, super::PlanResponse)
                }
                "/circleci.provider.v1.Provider/Create" => {
                    unary!(inner, req, create, super::CreateRequest, super::CreateResponse)
                }
                "/circleci.provider.v1.Provider/Read" => {
                    unary!(inner, req, read, super::ReadRequest, super::ReadResponse)
                }
                "/circleci.provider.v1.Provider/Update" => {
                    unary!(inner, req, update, super::UpdateRequest, super::UpdateResponse)
                }
                "/circleci.provider.v1.Provider/Delete" => {
                    unary!(inner, req, delete, super::DeleteRequest, super::DeleteResponse)
                }
                "/circleci.provider.v1.Provider/ImportResourceState" => unary!(
                    inner,
                    req,
                    import_resource_state,
                    super::ImportResourceStateRequest,
                    super::ImportResourceStateResponse
                ),
                "/circleci.provider.v1.Provider/ValidateDataSourceConfig" => unary!(
                    inner,
                    req,
                    validate_data_source_config,
                    super::ValidateDataSourceConfigRequest,
                    super::ValidateDataSourceConfigResponse
                ),
                "/circleci.provider.v1.Provider/ReadDataSource" => unary!(
                    inner,
                    req,
                    read_data_source,
                    super::ReadDataSourceRequest,
                    super::ReadDataSourceResponse
                ),
                _ => Box::pin(async move {
                    let mut response = http::Response::new(tonic::body::Body::default());
                    let headers = response.headers_mut();
                    headers.insert(
                        tonic::Status::GRPC_STATUS,
                        (tonic::Code::Unimplemented as i32).into(),
                    );
                    headers.insert(
                        http::header::CONTENT_TYPE,
                        tonic::metadata::GRPC_CONTENT_TYPE,
                    );
                    Ok(response)
                }),
            }
        }
    }

    impl<T> tonic::server::NamedService for ProviderServer<T> {
        const NAME: &'static str = SERVICE_NAME;
    }
}

#[cfg(test)]
mod tests {
    use super::provider_server::SERVICE_NAME;

    const CONTRACT: &str = include_str!("../proto/provider.proto");

    #[test]
    fn test_contract_declares_served_methods() {
        let (package, service) = SERVICE_NAME.rsplit_once('.').unwrap();
        assert!(CONTRACT.contains(&format!("package {package};")));
        assert!(CONTRACT.contains(&format!("service {service} {{")));

        let rpcs: Vec<&str> = CONTRACT
            .lines()
            .filter_map(|line| line.trim().strip_prefix("rpc "))
            .filter_map(|rest| rest.split('(').next())
            .collect();
        assert_eq!(
            rpcs,
            vec![
                "GetMetadata",
                "GetSchema",
                "ValidateProviderConfig",
                "Configure",
                "Stop",
                "ValidateResourceConfig",
                "UpgradeResourceState",
                "Plan",
                "Create",
                "Read",
                "Update",
                "Delete",
                "ImportResourceState",
                "ValidateDataSourceConfig",
                "ReadDataSource",
            ]
        );
    }
}
