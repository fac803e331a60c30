//! The CircleCI provider: configuration, dispatch and shutdown.

use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{debug, info};

use crate::api::CircleciClient;
use crate::config::{ProviderConfig, Resolved};
use crate::context::{CallContext, Canceller};
use crate::error::ProviderError;
use crate::plan;
use crate::resources::{self, Registry};
use crate::schema::{Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::transport::{HttpTransport, ReqwestTransport, RetryTransport};
use crate::types::{ImportedResource, PlanResult};

/// Provider plugin for CircleCI.
///
/// Resource and data source operations fail with
/// [`ProviderError::Configuration`] until [`configure`] succeeds. A later
/// `configure` replaces the registry for subsequent calls.
///
/// [`configure`]: ProviderService::configure
pub struct CircleciProvider {
    version: String,
    registry: RwLock<Option<Arc<Registry>>>,
    shutdown: Canceller,
}

impl CircleciProvider {
    /// Create an unconfigured provider.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            registry: RwLock::new(None),
            shutdown: Canceller::new(),
        }
    }

    /// The provider version reported at startup.
    pub fn version(&self) -> &str {
        &self.version
    }

    fn registry(&self) -> Result<Arc<Registry>, ProviderError> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| {
                ProviderError::Configuration("provider has not been configured".to_string())
            })
    }

    fn install(&self, registry: Registry) {
        *self.registry.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(registry));
    }

    pub(crate) fn context(&self) -> CallContext {
        self.shutdown.context()
    }

    fn connect(config: &ProviderConfig) -> Result<Registry, ProviderError> {
        let network = ReqwestTransport::new()
            .map_err(|e| ProviderError::Configuration(format!("building HTTP client: {e}")))?;
        let transport: Arc<dyn HttpTransport> =
            Arc::new(RetryTransport::new(network, Arc::new(config.retry.clone())));
        let client = CircleciClient::new(config, transport)
            .map_err(|e| ProviderError::Configuration(format!("building API endpoints: {e}")))?;
        Ok(Registry::new(Arc::new(client)))
    }
}

#[async_trait::async_trait]
impl ProviderService for CircleciProvider {
    fn schema(&self) -> ProviderSchema {
        resources::provider_schema()
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(match ProviderConfig::from_value(&config) {
            Ok(Resolved { warnings, .. }) => warnings,
            Err(diagnostics) => diagnostics,
        })
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let Resolved { config, warnings } = match ProviderConfig::from_value(&config) {
            Ok(resolved) => resolved,
            Err(diagnostics) => return Ok(diagnostics),
        };
        let registry = Self::connect(&config)?;
        self.install(registry);
        info!(
            version = %self.version,
            hostname = %config.hostname,
            retry_enabled = config.retry.enabled,
            max_retries = config.retry.max_retries,
            "Provider configured"
        );
        Ok(warnings)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        debug!("Cancelling outstanding requests");
        self.shutdown.cancel();
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        resources::validate_resource(resource_type, &config)
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let schema = resources::resource_schema(resource_type)?;
        Ok(plan::plan(&schema.block, prior_state.as_ref(), proposed_state))
    }

    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let registry = self.registry()?;
        registry
            .resource(resource_type)?
            .create(&self.context(), planned_state)
            .await
    }

    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        let registry = self.registry()?;
        registry
            .resource(resource_type)?
            .read(&self.context(), current_state)
            .await
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let registry = self.registry()?;
        registry
            .resource(resource_type)?
            .update(&self.context(), prior_state, planned_state)
            .await
    }

    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let registry = self.registry()?;
        registry
            .resource(resource_type)?
            .delete(&self.context(), current_state)
            .await
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let registry = self.registry()?;
        let state = registry
            .resource(resource_type)?
            .import(&self.context(), id)
            .await?;
        Ok(vec![ImportedResource::new(resource_type, state)])
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        resources::validate_data_source(data_source_type, &config)
    }

    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let registry = self.registry()?;
        registry
            .data_source(data_source_type)?
            .read(&self.context(), config)
            .await
    }
}
