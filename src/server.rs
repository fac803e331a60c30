//! The plugin server.
//!
//! [`ProviderService`] is the typed surface a provider implements; [`serve`]
//! exposes it as the `circleci.provider.v1.Provider` gRPC service and writes
//! the handshake line to stdout.
//!
//! # Signal Handling
//!
//! On SIGTERM or SIGINT the server stops accepting connections and calls
//! [`ProviderService::stop`], which cancels outstanding API calls. It then
//! waits up to [`ServeOptions::shutdown_timeout`] for in-flight requests to
//! finish and returns.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProviderError;
use crate::proto;
use crate::schema::{Block, BlockNestingMode, Diagnostic, DiagnosticSeverity, ProviderSchema, Schema};
use crate::types::{
    ImportedResource, PlanResult, ProviderMetadata, HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};

/// Typed provider operations behind the gRPC service.
///
/// Configuration and state cross this trait as JSON values; errors become
/// error diagnostics in the response.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    /// The provider, resource and data source schemas.
    fn schema(&self) -> ProviderSchema;

    /// Resource and data source names, derived from the schema by default.
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        ProviderMetadata {
            resources: schema.resources.keys().cloned().collect(),
            data_sources: schema.data_sources.keys().cloned().collect(),
            capabilities: Default::default(),
        }
    }

    /// Check the provider block without configuring.
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Configure credentials and endpoints. Returns warnings.
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Abort outstanding work.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Check a resource block before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Upgrade state written by an older schema version.
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let _ = (resource_type, version);
        Ok(state)
    }

    /// Plan the transition from `prior_state` to `proposed_state`.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create a resource.
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError>;

    /// Refresh a resource.
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError>;

    /// Update a resource in place.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete a resource.
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError>;

    /// Bring an existing remote object under management.
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let _ = id;
        Err(ProviderError::Unimplemented(format!(
            "import is not supported for {resource_type}"
        )))
    }

    /// Check a data source block.
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (data_source_type, config);
        Ok(vec![])
    }

    /// Read a data source.
    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let _ = config;
        Err(ProviderError::UnknownResource(data_source_type.to_string()))
    }
}

impl From<Diagnostic> for proto::Diagnostic {
    fn from(d: Diagnostic) -> Self {
        let severity = match d.severity {
            DiagnosticSeverity::Error => proto::diagnostic::Severity::Error,
            DiagnosticSeverity::Warning => proto::diagnostic::Severity::Warning,
        };
        Self {
            severity: severity as i32,
            summary: d.summary,
            detail: d.detail.unwrap_or_default(),
            attribute: d.attribute.unwrap_or_default(),
        }
    }
}

impl From<&Block> for proto::Block {
    fn from(block: &Block) -> Self {
        Self {
            attributes: block
                .attributes
                .iter()
                .map(|(name, attr)| proto::Attribute {
                    name: name.clone(),
                    r#type: serde_json::to_vec(&attr.attr_type).unwrap_or_default(),
                    required: attr.flags.required,
                    optional: attr.flags.optional,
                    computed: attr.flags.computed,
                    sensitive: attr.flags.sensitive,
                    description: attr.description.clone().unwrap_or_default(),
                    force_new: attr.force_new,
                    default_value: vec![],
                })
                .collect(),
            block_types: block
                .blocks
                .iter()
                .map(|(name, nested)| {
                    let mode = match nested.nesting_mode {
                        BlockNestingMode::Single => proto::nested_block::NestingMode::Single,
                    };
                    proto::NestedBlock {
                        type_name: name.clone(),
                        block: Some((&nested.block).into()),
                        nesting_mode: mode as i32,
                        min_items: i32::try_from(nested.min_items).unwrap_or(i32::MAX),
                        max_items: i32::try_from(nested.max_items).unwrap_or(i32::MAX),
                    }
                })
                .collect(),
            description: block.description.clone().unwrap_or_default(),
        }
    }
}

impl From<&Schema> for proto::Schema {
    fn from(schema: &Schema) -> Self {
        Self {
            version: i64::try_from(schema.version).unwrap_or(i64::MAX),
            block: Some((&schema.block).into()),
        }
    }
}

/// Decode a JSON payload. Empty bytes mean null.
fn payload(bytes: &[u8]) -> Result<Value, ProviderError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(bytes)?)
}

fn to_bytes(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

fn diagnostics(diagnostics: Vec<Diagnostic>) -> Vec<proto::Diagnostic> {
    diagnostics.into_iter().map(Into::into).collect()
}

fn error_diagnostics(err: ProviderError) -> Vec<proto::Diagnostic> {
    vec![Diagnostic::error(err.to_string()).into()]
}

fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

/// Adapts a [`ProviderService`] to the gRPC service trait.
struct ProviderGrpcService<P: ProviderService> {
    provider: Arc<P>,
}

impl<P: ProviderService> ProviderGrpcService<P> {
    async fn validate_with<F, Fut>(&self, what: &str, check: F) -> Vec<proto::Diagnostic>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<Diagnostic>, ProviderError>>,
    {
        match check().await {
            Ok(found) => {
                if has_errors(&found) {
                    warn!(diagnostics = found.len(), "{what} completed with errors");
                } else {
                    debug!("{what} completed");
                }
                diagnostics(found)
            }
            Err(e) => {
                error!(error = %e, "{what} failed");
                error_diagnostics(e)
            }
        }
    }
}

#[tonic::async_trait]
impl<P: ProviderService> proto::provider_server::Provider for ProviderGrpcService<P> {
    #[instrument(skip_all, name = "grpc.get_metadata")]
    async fn get_metadata(
        &self,
        _request: Request<proto::GetMetadataRequest>,
    ) -> Result<Response<proto::GetMetadataResponse>, Status> {
        let metadata = self.provider.metadata();
        debug!(
            resources = metadata.resources.len(),
            data_sources = metadata.data_sources.len(),
            "GetMetadata completed"
        );
        Ok(Response::new(proto::GetMetadataResponse {
            server_capabilities: Some(proto::ServerCapabilities {
                plan_destroy: metadata.capabilities.plan_destroy,
            }),
            resources: metadata.resources,
            data_sources: metadata.data_sources,
            diagnostics: vec![],
        }))
    }

    #[instrument(skip_all, name = "grpc.get_schema")]
    async fn get_schema(
        &self,
        _request: Request<proto::GetSchemaRequest>,
    ) -> Result<Response<proto::GetSchemaResponse>, Status> {
        let schema = self.provider.schema();
        debug!(
            resources = schema.resources.len(),
            data_sources = schema.data_sources.len(),
            "GetSchema completed"
        );
        Ok(Response::new(proto::GetSchemaResponse {
            provider: Some((&schema.provider).into()),
            resources: schema
                .resources
                .iter()
                .map(|(name, s)| (name.clone(), s.into()))
                .collect(),
            data_sources: schema
                .data_sources
                .iter()
                .map(|(name, s)| (name.clone(), s.into()))
                .collect(),
            diagnostics: vec![],
        }))
    }

    #[instrument(skip_all, name = "grpc.validate_provider_config")]
    async fn validate_provider_config(
        &self,
        request: Request<proto::ValidateProviderConfigRequest>,
    ) -> Result<Response<proto::ValidateProviderConfigResponse>, Status> {
        let req = request.into_inner();
        let diagnostics = self
            .validate_with("ValidateProviderConfig", || async {
                let config = payload(&req.config)?;
                self.provider.validate_provider_config(config).await
            })
            .await;
        Ok(Response::new(proto::ValidateProviderConfigResponse { diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.configure")]
    async fn configure(
        &self,
        request: Request<proto::ConfigureRequest>,
    ) -> Result<Response<proto::ConfigureResponse>, Status> {
        let req = request.into_inner();
        let result = match payload(&req.config) {
            Ok(config) => self.provider.configure(config).await,
            Err(e) => Err(e),
        };
        let diagnostics = match result {
            Ok(found) => {
                if has_errors(&found) {
                    warn!(diagnostics = found.len(), "Configure completed with errors");
                } else {
                    info!(warnings = found.len(), "Configure completed");
                }
                diagnostics(found)
            }
            Err(e) => {
                error!(error = %e, "Configure failed");
                error_diagnostics(e)
            }
        };
        Ok(Response::new(proto::ConfigureResponse { diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.stop")]
    async fn stop(
        &self,
        _request: Request<proto::StopRequest>,
    ) -> Result<Response<proto::StopResponse>, Status> {
        info!("Stop called");
        let error = match self.provider.stop().await {
            Ok(()) => String::new(),
            Err(e) => {
                error!(error = %e, "Stop failed");
                e.to_string()
            }
        };
        Ok(Response::new(proto::StopResponse { error }))
    }

    #[instrument(skip_all, name = "grpc.validate_resource_config", fields(resource_type = %request.get_ref().resource_type))]
    async fn validate_resource_config(
        &self,
        request: Request<proto::ValidateResourceConfigRequest>,
    ) -> Result<Response<proto::ValidateResourceConfigResponse>, Status> {
        let req = request.into_inner();
        let diagnostics = self
            .validate_with("ValidateResourceConfig", || async {
                let config = payload(&req.config)?;
                self.provider
                    .validate_resource_config(&req.resource_type, config)
                    .await
            })
            .await;
        Ok(Response::new(proto::ValidateResourceConfigResponse { diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.upgrade_resource_state", fields(resource_type = %request.get_ref().resource_type))]
    async fn upgrade_resource_state(
        &self,
        request: Request<proto::UpgradeResourceStateRequest>,
    ) -> Result<Response<proto::UpgradeResourceStateResponse>, Status> {
        let req = request.into_inner();
        let result = match payload(&req.raw_state) {
            Ok(state) => {
                self.provider
                    .upgrade_resource_state(&req.resource_type, req.version, state)
                    .await
            }
            Err(e) => Err(e),
        };
        let response = match result {
            Ok(upgraded) => {
                debug!(from_version = req.version, "UpgradeResourceState completed");
                proto::UpgradeResourceStateResponse {
                    upgraded_state: to_bytes(&upgraded),
                    diagnostics: vec![],
                }
            }
            Err(e) => {
                error!(version = req.version, error = %e, "UpgradeResourceState failed");
                proto::UpgradeResourceStateResponse {
                    upgraded_state: vec![],
                    diagnostics: error_diagnostics(e),
                }
            }
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.plan", fields(resource_type = %request.get_ref().resource_type))]
    async fn plan(
        &self,
        request: Request<proto::PlanRequest>,
    ) -> Result<Response<proto::PlanResponse>, Status> {
        let req = request.into_inner();
        let result = async {
            let prior = payload(&req.prior_state)?;
            let prior = (!prior.is_null()).then_some(prior);
            let proposed = payload(&req.proposed_state)?;
            let config = payload(&req.config)?;
            self.provider
                .plan(&req.resource_type, prior, proposed, config)
                .await
        }
        .await;
        let response = match result {
            Ok(plan) => {
                info!(
                    changes = plan.changes.len(),
                    requires_replace = plan.requires_replace,
                    "Plan completed"
                );
                proto::PlanResponse {
                    planned_state: to_bytes(&plan.planned_state),
                    changes: plan.changes.into_iter().map(Into::into).collect(),
                    requires_replace: plan.requires_replace,
                    diagnostics: vec![],
                }
            }
            Err(e) => {
                error!(error = %e, "Plan failed");
                proto::PlanResponse {
                    planned_state: vec![],
                    changes: vec![],
                    requires_replace: false,
                    diagnostics: error_diagnostics(e),
                }
            }
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.create", fields(resource_type = %request.get_ref().resource_type))]
    async fn create(
        &self,
        request: Request<proto::CreateRequest>,
    ) -> Result<Response<proto::CreateResponse>, Status> {
        let req = request.into_inner();
        let result = match payload(&req.planned_state) {
            Ok(planned) => self.provider.create(&req.resource_type, planned).await,
            Err(e) => Err(e),
        };
        let response = match result {
            Ok(state) => {
                info!("Create completed");
                proto::CreateResponse {
                    state: to_bytes(&state),
                    diagnostics: vec![],
                }
            }
            Err(e) => {
                error!(error = %e, "Create failed");
                proto::CreateResponse {
                    state: vec![],
                    diagnostics: error_diagnostics(e),
                }
            }
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.read", fields(resource_type = %request.get_ref().resource_type))]
    async fn read(
        &self,
        request: Request<proto::ReadRequest>,
    ) -> Result<Response<proto::ReadResponse>, Status> {
        let req = request.into_inner();
        let result = match payload(&req.current_state) {
            Ok(current) => self.provider.read(&req.resource_type, current).await,
            Err(e) => Err(e),
        };
        let response = match result {
            Ok(state) => {
                debug!("Read completed");
                proto::ReadResponse {
                    state: to_bytes(&state),
                    diagnostics: vec![],
                }
            }
            Err(e) => {
                error!(error = %e, "Read failed");
                proto::ReadResponse {
                    state: vec![],
                    diagnostics: error_diagnostics(e),
                }
            }
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.update", fields(resource_type = %request.get_ref().resource_type))]
    async fn update(
        &self,
        request: Request<proto::UpdateRequest>,
    ) -> Result<Response<proto::UpdateResponse>, Status> {
        let req = request.into_inner();
        let result = async {
            let prior = payload(&req.prior_state)?;
            let planned = payload(&req.planned_state)?;
            self.provider.update(&req.resource_type, prior, planned).await
        }
        .await;
        let response = match result {
            Ok(state) => {
                info!("Update completed");
                proto::UpdateResponse {
                    state: to_bytes(&state),
                    diagnostics: vec![],
                }
            }
            Err(e) => {
                error!(error = %e, "Update failed");
                proto::UpdateResponse {
                    state: vec![],
                    diagnostics: error_diagnostics(e),
                }
            }
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.delete", fields(resource_type = %request.get_ref().resource_type))]
    async fn delete(
        &self,
        request: Request<proto::DeleteRequest>,
    ) -> Result<Response<proto::DeleteResponse>, Status> {
        let req = request.into_inner();
        let result = match payload(&req.current_state) {
            Ok(current) => self.provider.delete(&req.resource_type, current).await,
            Err(e) => Err(e),
        };
        let diagnostics = match result {
            Ok(()) => {
                info!("Delete completed");
                vec![]
            }
            Err(e) => {
                error!(error = %e, "Delete failed");
                error_diagnostics(e)
            }
        };
        Ok(Response::new(proto::DeleteResponse { diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.import_resource_state", fields(resource_type = %request.get_ref().resource_type, id = %request.get_ref().id))]
    async fn import_resource_state(
        &self,
        request: Request<proto::ImportResourceStateRequest>,
    ) -> Result<Response<proto::ImportResourceStateResponse>, Status> {
        let req = request.into_inner();
        let response = match self.provider.import_resource(&req.resource_type, &req.id).await {
            Ok(imported) => {
                info!(imported = imported.len(), "ImportResourceState completed");
                proto::ImportResourceStateResponse {
                    imported: imported
                        .into_iter()
                        .map(|r| proto::ImportedResource {
                            resource_type: r.resource_type,
                            state: to_bytes(&r.state),
                        })
                        .collect(),
                    diagnostics: vec![],
                }
            }
            Err(e) => {
                error!(error = %e, "ImportResourceState failed");
                proto::ImportResourceStateResponse {
                    imported: vec![],
                    diagnostics: error_diagnostics(e),
                }
            }
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.validate_data_source_config", fields(data_source_type = %request.get_ref().data_source_type))]
    async fn validate_data_source_config(
        &self,
        request: Request<proto::ValidateDataSourceConfigRequest>,
    ) -> Result<Response<proto::ValidateDataSourceConfigResponse>, Status> {
        let req = request.into_inner();
        let diagnostics = self
            .validate_with("ValidateDataSourceConfig", || async {
                let config = payload(&req.config)?;
                self.provider
                    .validate_data_source_config(&req.data_source_type, config)
                    .await
            })
            .await;
        Ok(Response::new(proto::ValidateDataSourceConfigResponse { diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.read_data_source", fields(data_source_type = %request.get_ref().data_source_type))]
    async fn read_data_source(
        &self,
        request: Request<proto::ReadDataSourceRequest>,
    ) -> Result<Response<proto::ReadDataSourceResponse>, Status> {
        let req = request.into_inner();
        let result = match payload(&req.config) {
            Ok(config) => {
                self.provider
                    .read_data_source(&req.data_source_type, config)
                    .await
            }
            Err(e) => Err(e),
        };
        let response = match result {
            Ok(state) => {
                debug!("ReadDataSource completed");
                proto::ReadDataSourceResponse {
                    state: to_bytes(&state),
                    diagnostics: vec![],
                }
            }
            Err(e) => {
                error!(error = %e, "ReadDataSource failed");
                proto::ReadDataSourceResponse {
                    state: vec![],
                    diagnostics: error_diagnostics(e),
                }
            }
        };
        Ok(Response::new(response))
    }
}

/// Options for [`serve_with_options`].
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// How long in-flight requests may run after a shutdown signal.
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Wait for SIGTERM or SIGINT (CTRL+C on Windows).
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received CTRL+C, shutting down");
        Ok(())
    }
}

/// Serve `provider` on an ephemeral loopback port.
///
/// Writes `CIRCLECI_PROVIDER|<protocol>|<address>` to stdout once the
/// listener is bound, then serves until a shutdown signal arrives.
pub async fn serve<P: ProviderService>(provider: P) -> Result<(), ProviderError> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// Like [`serve`], with custom [`ServeOptions`].
pub async fn serve_with_options<P: ProviderService>(
    provider: P,
    options: ServeOptions,
) -> Result<(), ProviderError> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    serve_on_listener(provider, listener, options).await
}

async fn serve_on_listener<P: ProviderService>(
    provider: P,
    listener: TcpListener,
    options: ServeOptions,
) -> Result<(), ProviderError> {
    let addr = listener.local_addr()?;
    println!("{}", handshake_line(addr));
    info!(address = %addr, "Provider server starting");

    let provider = Arc::new(provider);
    let service = proto::provider_server::ProviderServer::from_arc(Arc::new(ProviderGrpcService {
        provider: Arc::clone(&provider),
    }));

    let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
    let shutdown = async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => {
                let _ = signalled_tx.send(());
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handlers");
                // Keep the sender alive so the server runs until killed.
                std::future::pending::<()>().await;
            }
        }
    };

    let server = Server::builder()
        .add_service(service)
        .serve_with_incoming_shutdown(
            tokio_stream::wrappers::TcpListenerStream::new(listener),
            shutdown,
        );
    run_until_shutdown(&*provider, server, signalled_rx, options.shutdown_timeout).await
}

/// Drive `server` to completion. Once a shutdown signal arrives the provider
/// is stopped first, so calls parked in a backoff end promptly, and the drain
/// is bounded by `shutdown_timeout`.
async fn run_until_shutdown<P, F>(
    provider: &P,
    server: F,
    signalled: oneshot::Receiver<()>,
    shutdown_timeout: Duration,
) -> Result<(), ProviderError>
where
    P: ProviderService,
    F: Future<Output = Result<(), tonic::transport::Error>>,
{
    tokio::pin!(server);

    let signalled = tokio::select! {
        result = &mut server => {
            result?;
            false
        }
        Ok(()) = signalled => true,
    };

    if let Err(e) = provider.stop().await {
        warn!(error = %e, "Provider stop returned an error");
    }

    if signalled {
        match tokio::time::timeout(shutdown_timeout, &mut server).await {
            Ok(result) => result?,
            Err(_) => warn!(
                timeout = ?shutdown_timeout,
                "Shutdown timeout exceeded, abandoning in-flight requests"
            ),
        }
    }
    info!("Provider shutdown complete");
    Ok(())
}

fn handshake_line(addr: SocketAddr) -> String {
    format!("{HANDSHAKE_PREFIX}|{PROTOCOL_VERSION}|{addr}")
}
