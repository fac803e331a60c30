//! Resource and data source adapters.
//!
//! Each adapter turns JSON state from the host into a typed model, calls
//! [`CircleciClient`], and encodes the refreshed model back. Schemas and
//! validation are static so the host can fetch them before `Configure`; the
//! adapters themselves only exist once a client has been built.

mod checkout_key;
mod context;
mod context_env_var;
mod env_var;
mod project;
mod runner_resource_class;
mod runner_token;
mod schedule;
mod webhook;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::api::CircleciClient;
use crate::context::CallContext;
use crate::error::{ApiError, ProviderError};
use crate::schema::{Diagnostic, ProviderSchema, Schema};

/// A managed remote object with a full lifecycle.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Create the object described by `planned` and return the new state.
    async fn create(&self, ctx: &CallContext, planned: Value) -> Result<Value, ProviderError>;

    /// Refresh `state` from the API.
    async fn read(&self, ctx: &CallContext, state: Value) -> Result<Value, ProviderError>;

    /// Apply an in-place update.
    async fn update(
        &self,
        ctx: &CallContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete the object.
    async fn delete(&self, ctx: &CallContext, state: Value) -> Result<(), ProviderError>;

    /// Build state for an existing object from its id.
    async fn import(&self, ctx: &CallContext, id: &str) -> Result<Value, ProviderError> {
        let _ = (ctx, id);
        Err(ProviderError::Unimplemented(
            "import is not supported for this resource".to_string(),
        ))
    }
}

/// A read-only lookup.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Resolve `config` into the full data source state.
    async fn read(&self, ctx: &CallContext, config: Value) -> Result<Value, ProviderError>;
}

type Validator = fn(&Value) -> Vec<Diagnostic>;

fn no_validation(_: &Value) -> Vec<Diagnostic> {
    Vec::new()
}

struct ResourceKind {
    name: &'static str,
    schema: fn() -> Schema,
    validate: Validator,
    build: fn(Arc<CircleciClient>) -> Box<dyn Resource>,
}

struct DataSourceKind {
    name: &'static str,
    schema: fn() -> Schema,
    build: fn(Arc<CircleciClient>) -> Box<dyn DataSource>,
}

const RESOURCES: &[ResourceKind] = &[
    ResourceKind {
        name: project::TYPE_NAME,
        schema: project::schema,
        validate: no_validation,
        build: |client| Box::new(project::ProjectResource::new(client)),
    },
    ResourceKind {
        name: env_var::TYPE_NAME,
        schema: env_var::schema,
        validate: no_validation,
        build: |client| Box::new(env_var::EnvVarResource::new(client)),
    },
    ResourceKind {
        name: checkout_key::TYPE_NAME,
        schema: checkout_key::schema,
        validate: checkout_key::validate,
        build: |client| Box::new(checkout_key::CheckoutKeyResource::new(client)),
    },
    ResourceKind {
        name: context::TYPE_NAME,
        schema: context::schema,
        validate: context::validate,
        build: |client| Box::new(context::ContextResource::new(client)),
    },
    ResourceKind {
        name: context_env_var::TYPE_NAME,
        schema: context_env_var::schema,
        validate: no_validation,
        build: |client| Box::new(context_env_var::ContextEnvVarResource::new(client)),
    },
    ResourceKind {
        name: schedule::TYPE_NAME,
        schema: schedule::schema,
        validate: schedule::validate,
        build: |client| Box::new(schedule::ScheduleResource::new(client)),
    },
    ResourceKind {
        name: webhook::TYPE_NAME,
        schema: webhook::schema,
        validate: webhook::validate,
        build: |client| Box::new(webhook::WebhookResource::new(client)),
    },
    ResourceKind {
        name: runner_resource_class::TYPE_NAME,
        schema: runner_resource_class::schema,
        validate: runner_resource_class::validate,
        build: |client| Box::new(runner_resource_class::ResourceClassResource::new(client)),
    },
    ResourceKind {
        name: runner_token::TYPE_NAME,
        schema: runner_token::schema,
        validate: no_validation,
        build: |client| Box::new(runner_token::RunnerTokenResource::new(client)),
    },
];

const DATA_SOURCES: &[DataSourceKind] = &[
    DataSourceKind {
        name: project::TYPE_NAME,
        schema: project::data_source_schema,
        build: |client| Box::new(project::ProjectDataSource::new(client)),
    },
    DataSourceKind {
        name: context::TYPE_NAME,
        schema: context::data_source_schema,
        build: |client| Box::new(context::ContextDataSource::new(client)),
    },
    DataSourceKind {
        name: checkout_key::DATA_SOURCE_NAME,
        schema: checkout_key::data_source_schema,
        build: |client| Box::new(checkout_key::CheckoutKeysDataSource::new(client)),
    },
    DataSourceKind {
        name: webhook::DATA_SOURCE_NAME,
        schema: webhook::data_source_schema,
        build: |client| Box::new(webhook::WebhooksDataSource::new(client)),
    },
    DataSourceKind {
        name: runner_resource_class::DATA_SOURCE_NAME,
        schema: runner_resource_class::data_source_schema,
        build: |client| Box::new(runner_resource_class::ResourceClassesDataSource::new(client)),
    },
    DataSourceKind {
        name: runner_token::DATA_SOURCE_NAME,
        schema: runner_token::data_source_schema,
        build: |client| Box::new(runner_token::RunnerTokensDataSource::new(client)),
    },
];

fn resource_kind(name: &str) -> Result<&'static ResourceKind, ProviderError> {
    RESOURCES
        .iter()
        .find(|kind| kind.name == name)
        .ok_or_else(|| ProviderError::UnknownResource(name.to_string()))
}

fn data_source_kind(name: &str) -> Result<&'static DataSourceKind, ProviderError> {
    DATA_SOURCES
        .iter()
        .find(|kind| kind.name == name)
        .ok_or_else(|| ProviderError::UnknownResource(format!("data source {name}")))
}

/// Every schema the provider serves.
pub fn provider_schema() -> ProviderSchema {
    let schema = ProviderSchema::new().with_provider_config(crate::config::schema());
    let schema = RESOURCES
        .iter()
        .fold(schema, |s, kind| s.with_resource(kind.name, (kind.schema)()));
    DATA_SOURCES
        .iter()
        .fold(schema, |s, kind| s.with_data_source(kind.name, (kind.schema)()))
}

/// Schema of one resource type.
pub fn resource_schema(name: &str) -> Result<Schema, ProviderError> {
    resource_kind(name).map(|kind| (kind.schema)())
}

/// Static checks on a resource configuration.
pub fn validate_resource(name: &str, config: &Value) -> Result<Vec<Diagnostic>, ProviderError> {
    resource_kind(name).map(|kind| (kind.validate)(config))
}

/// Static checks on a data source configuration. Only the type is checked.
pub fn validate_data_source(name: &str, config: &Value) -> Result<Vec<Diagnostic>, ProviderError> {
    data_source_kind(name)?;
    if config.is_object() || config.is_null() {
        Ok(Vec::new())
    } else {
        Ok(vec![Diagnostic::error("Data source configuration must be an object")])
    }
}

/// Adapters bound to a configured client.
pub struct Registry {
    resources: BTreeMap<&'static str, Box<dyn Resource>>,
    data_sources: BTreeMap<&'static str, Box<dyn DataSource>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .field("data_sources", &self.data_sources.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    /// Instantiate every adapter over `client`.
    pub fn new(client: Arc<CircleciClient>) -> Self {
        Self {
            resources: RESOURCES
                .iter()
                .map(|kind| (kind.name, (kind.build)(Arc::clone(&client))))
                .collect(),
            data_sources: DATA_SOURCES
                .iter()
                .map(|kind| (kind.name, (kind.build)(Arc::clone(&client))))
                .collect(),
        }
    }

    /// Look up a resource adapter.
    pub fn resource(&self, name: &str) -> Result<&dyn Resource, ProviderError> {
        self.resources
            .get(name)
            .map(|r| r.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(name.to_string()))
    }

    /// Look up a data source adapter.
    pub fn data_source(&self, name: &str) -> Result<&dyn DataSource, ProviderError> {
        self.data_sources
            .get(name)
            .map(|d| d.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(format!("data source {name}")))
    }
}

/// Decode host state into a model.
fn decode<T: DeserializeOwned>(type_name: &str, value: Value) -> Result<T, ProviderError> {
    serde_json::from_value(value)
        .map_err(|err| ProviderError::Validation(format!("invalid {type_name} state: {err}")))
}

fn encode<T: Serialize>(model: &T) -> Result<Value, ProviderError> {
    Ok(serde_json::to_value(model)?)
}

/// Treat a 404 on delete as already gone.
fn tolerate_missing(
    result: Result<(), ApiError>,
    what: &str,
    id: &str,
) -> Result<(), ProviderError> {
    match result {
        Err(err) if err.is_not_found() => {
            warn!(%id, "{what} was already deleted");
            Ok(())
        }
        other => other.map_err(|err| err.into_provider_error(format!("deleting {what} {id}"))),
    }
}

/// Fetch a string attribute from a config object, treating empty as unset.
fn config_str<'a>(config: &'a Value, key: &str) -> Option<&'a str> {
    config.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use wiremock::MockServer;

    pub fn registry_for(server: &MockServer) -> Registry {
        Registry::new(Arc::new(crate::api::test_support::client_for(server)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<_> = RESOURCES.iter().map(|k| k.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), RESOURCES.len());

        let mut names: Vec<_> = DATA_SOURCES.iter().map(|k| k.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), DATA_SOURCES.len());
    }

    #[test]
    fn test_provider_schema_lists_everything() {
        let schema = provider_schema();
        assert_eq!(schema.resources.len(), 9);
        assert_eq!(schema.data_sources.len(), 6);
        assert!(schema.resources.contains_key("circleci_schedule"));
        assert!(schema.data_sources.contains_key("circleci_webhooks"));
        assert!(schema.provider.block.attributes.contains_key("api_token"));
    }

    #[test]
    fn test_unknown_types() {
        assert!(matches!(
            resource_schema("circleci_pipeline"),
            Err(ProviderError::UnknownResource(_))
        ));
        assert!(matches!(
            validate_data_source("circleci_pipeline", &json!({})),
            Err(ProviderError::UnknownResource(_))
        ));
    }

    #[test]
    fn test_config_str() {
        let config = json!({"slug": "gh/acme/api", "empty": ""});
        assert_eq!(config_str(&config, "slug"), Some("gh/acme/api"));
        assert_eq!(config_str(&config, "empty"), None);
        assert_eq!(config_str(&config, "missing"), None);
    }

    #[test]
    fn test_tolerate_missing() {
        let missing = ApiError::Status {
            method: "DELETE".into(),
            path: "/api/v2/context/c1".into(),
            status: 404,
            message: "Context not found".into(),
        };
        assert!(tolerate_missing(Err(missing), "context", "c1").is_ok());

        let denied = ApiError::Status {
            method: "DELETE".into(),
            path: "/api/v2/context/c1".into(),
            status: 403,
            message: "Forbidden".into(),
        };
        assert!(matches!(
            tolerate_missing(Err(denied), "context", "c1"),
            Err(ProviderError::PermissionDenied(_))
        ));
    }
}
