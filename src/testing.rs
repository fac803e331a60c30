//! Test harness for [`ProviderService`] implementations.
//!
//! [`ProviderTester`] drives a provider directly, without a gRPC server, and
//! turns error diagnostics into [`TestError`]s.
//!
//! # Example
//!
//! ```ignore
//! use circleci_provider::testing::ProviderTester;
//! use circleci_provider::CircleciProvider;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_context_lifecycle() {
//!     let tester = ProviderTester::new(CircleciProvider::new("test"));
//!     tester.configure(json!({"api_token": "t", "hostname": mock_uri})).await.unwrap();
//!
//!     let state = tester
//!         .lifecycle_create("circleci_context", json!({"name": "deploy", "owner": [{"id": "o1", "type": "organization"}]}))
//!         .await
//!         .unwrap();
//!     assert_eq!(state["name"], "deploy");
//! }
//! ```

use serde_json::Value;
use thiserror::Error;

use crate::error::ProviderError;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};

/// Drives a [`ProviderService`] through its operations.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Wrap `provider`.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// The wrapped provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The provider's schemas.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Data source type names.
    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    /// Validate provider configuration, failing on any error diagnostic.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider, failing on any error diagnostic.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    /// Validate a resource configuration, failing on any error diagnostic.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a create.
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan an update from `prior_state`.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(
                resource_type,
                Some(prior_state),
                proposed_state.clone(),
                proposed_state,
            )
            .await
    }

    /// Plan a destroy.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    /// Create a resource.
    pub async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Refresh a resource.
    pub async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update a resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import a resource by id.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    /// Validate a data source configuration, failing on any error diagnostic.
    pub async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_data_source_config(data_source_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Read a data source.
    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .read_data_source(data_source_type, config)
            .await
    }

    /// Plan, create, then read back.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.create(resource_type, plan.planned_state).await?;
        self.read(resource_type, created).await
    }

    /// Create, update in place, then delete. Returns the updated state.
    ///
    /// Fails with [`ProviderError::Validation`] if the update would replace
    /// the resource.
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, ProviderError> {
        let created = self.lifecycle_create(resource_type, initial_config).await?;

        let plan = self
            .plan_update(resource_type, created.clone(), updated_config)
            .await?;
        if plan.requires_replace {
            return Err(ProviderError::Validation(format!(
                "updating {resource_type} requires replacement"
            )));
        }
        let updated = self
            .update(resource_type, created, plan.planned_state)
            .await?;
        let updated = self.read(resource_type, updated).await?;

        self.plan_delete(resource_type, updated.clone()).await?;
        self.delete(resource_type, updated.clone()).await?;
        Ok(updated)
    }
}

/// Failure of a tester operation.
#[derive(Debug, Error)]
pub enum TestError {
    /// The operation returned error diagnostics.
    #[error("operation failed with diagnostics: {}", summaries(.0))]
    Diagnostics(Vec<Diagnostic>),
    /// The operation returned an error.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

fn summaries(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| match (&d.attribute, &d.detail) {
            (Some(attr), Some(detail)) => format!("{} ({attr}): {detail}", d.summary),
            (Some(attr), None) => format!("{} ({attr})", d.summary),
            (None, Some(detail)) => format!("{}: {detail}", d.summary),
            (None, None) => d.summary.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

/// Assert that `plan` creates without replacement.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(!plan.requires_replace, "Expected plan to create, not replace");
}

/// Assert that `plan` requires replacement.
///
/// # Panics
///
/// Panics if the plan updates in place.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that `plan` changes `path`.
///
/// # Panics
///
/// Panics if no change has that path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.changes.iter().any(|c| c.path == path),
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that some error diagnostic's summary contains `substring`.
///
/// # Panics
///
/// Panics if none does.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    assert!(
        diagnostics
            .iter()
            .any(|d| d.is_error() && d.summary.contains(substring)),
        "Expected an error containing '{}', got: {:?}",
        substring,
        diagnostics.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::CircleciProvider;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VAR_PATH: &str = "/api/v2/context/c1/environment-variable";

    async fn configured(server: &MockServer) -> ProviderTester<CircleciProvider> {
        let tester = ProviderTester::new(CircleciProvider::new("test"));
        tester
            .configure(json!({
                "api_token": "test-token",
                "hostname": server.uri(),
                "runner_hostname": server.uri()
            }))
            .await
            .unwrap();
        tester
    }

    fn variable() -> Value {
        json!({
            "variable": "TOKEN",
            "context_id": "c1",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    #[tokio::test]
    async fn test_lifecycle_crud_against_mock() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(format!("{VAR_PATH}/TOKEN")))
            .respond_with(ResponseTemplate::new(200).set_body_json(variable()))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(VAR_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [variable()]})))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(format!("{VAR_PATH}/TOKEN")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "ok"})))
            .expect(1)
            .mount(&server)
            .await;

        let tester = configured(&server).await;
        let state = tester
            .lifecycle_crud(
                "circleci_context_env_var",
                json!({"context_id": "c1", "name": "TOKEN", "value": "one"}),
                json!({"context_id": "c1", "name": "TOKEN", "value": "two"}),
            )
            .await
            .unwrap();
        assert_eq!(state["value"], "two");
        assert_eq!(state["id"], "c1/TOKEN");
    }

    #[tokio::test]
    async fn test_lifecycle_crud_rejects_replacement() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(variable()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [variable()]})))
            .mount(&server)
            .await;

        let err = configured(&server)
            .await
            .lifecycle_crud(
                "circleci_context_env_var",
                json!({"context_id": "c1", "name": "TOKEN", "value": "one"}),
                json!({"context_id": "c2", "name": "TOKEN", "value": "one"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
    }

    #[tokio::test]
    async fn test_data_source_through_tester() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/runner/resource"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
            .mount(&server)
            .await;

        let tester = configured(&server).await;
        tester
            .validate_data_source_config("circleci_runner_resource_classes", json!({"namespace": "acme"}))
            .await
            .unwrap();
        let state = tester
            .read_data_source("circleci_runner_resource_classes", json!({"namespace": "acme"}))
            .await
            .unwrap();
        assert_eq!(state["id"], "acme");
        tester.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_plan_helpers() {
        let tester = ProviderTester::new(CircleciProvider::new("test"));
        let plan = tester
            .plan_create("circleci_context", json!({"name": "deploy"}))
            .await
            .unwrap();
        assert_plan_creates(&plan);
        assert_plan_changes_attribute(&plan, "name");

        let plan = tester
            .plan_delete("circleci_context", json!({"id": "c1", "name": "deploy"}))
            .await
            .unwrap();
        assert!(plan.planned_state.is_null());
        assert_plan_changes_attribute(&plan, "id");
    }

    #[tokio::test]
    async fn test_validation_errors_surface() {
        let tester = ProviderTester::new(CircleciProvider::new("test"));
        let err = tester
            .validate_resource_config("circleci_webhook", json!({"url": "http://example.com"}))
            .await
            .unwrap_err();
        match err {
            TestError::Diagnostics(found) => assert_error_contains(&found, "https://"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(tester.provider().version(), "test");

        tester
            .validate_provider_config(json!({"api_token": "t", "hostname": "circleci.com"}))
            .await
            .unwrap();
    }

    #[test]
    fn test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("First error").with_attribute("field1"),
            Diagnostic::error("Second error").with_detail("More info"),
        ]);
        let display = err.to_string();
        assert!(display.contains("First error (field1)"));
        assert!(display.contains("Second error: More info"));
    }
}
