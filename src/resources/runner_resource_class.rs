//! `circleci_runner_resource_class` and the `circleci_runner_resource_classes`
//! lookup.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{config_str, decode, encode, tolerate_missing, DataSource, Resource};
use crate::api::models::ResourceClass;
use crate::api::CircleciClient;
use crate::context::CallContext;
use crate::error::ProviderError;
use crate::schema::{Attribute, AttributeFlags, AttributeType, Diagnostic, Schema};

pub const TYPE_NAME: &str = "circleci_runner_resource_class";
pub const DATA_SOURCE_NAME: &str = "circleci_runner_resource_classes";

pub fn schema() -> Schema {
    Schema::v0()
        .with_description("Manages a self-hosted runner resource class")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "resource_class",
            Attribute::required_string()
                .with_force_new()
                .with_description("`namespace/name`"),
        )
        .with_attribute(
            "description",
            Attribute::required_string().with_force_new(),
        )
}

pub fn data_source_schema() -> Schema {
    let class = AttributeType::object([
        ("id", AttributeType::String),
        ("resource_class", AttributeType::String),
        ("description", AttributeType::String),
    ]);
    Schema::v0()
        .with_description("Lists the runner resource classes of a namespace")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("namespace", Attribute::required_string())
        .with_attribute(
            "resource_classes",
            Attribute::new(AttributeType::list(class), AttributeFlags::computed()),
        )
}

pub fn validate(config: &Value) -> Vec<Diagnostic> {
    match config_str(config, "resource_class") {
        Some(class) if namespace_of(class).is_none() => vec![Diagnostic::error(format!(
            "Invalid resource class `{class}`"
        ))
        .with_detail("Expected the form `namespace/name`")
        .with_attribute("resource_class")],
        _ => Vec::new(),
    }
}

/// `acme/linux` lives in namespace `acme`.
fn namespace_of(resource_class: &str) -> Option<&str> {
    match resource_class.split_once('/') {
        Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => Some(namespace),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct ResourceClassState {
    id: Option<String>,
    resource_class: String,
    description: String,
}

impl From<ResourceClass> for ResourceClassState {
    fn from(rc: ResourceClass) -> Self {
        Self {
            id: Some(rc.id),
            resource_class: rc.resource_class,
            description: rc.description,
        }
    }
}

impl ResourceClassState {
    fn id(&self) -> Result<&str, ProviderError> {
        self.id
            .as_deref()
            .ok_or_else(|| ProviderError::Validation("resource class state has no id".to_string()))
    }
}

pub struct ResourceClassResource {
    client: Arc<CircleciClient>,
}

impl ResourceClassResource {
    pub fn new(client: Arc<CircleciClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Resource for ResourceClassResource {
    async fn create(&self, ctx: &CallContext, planned: Value) -> Result<Value, ProviderError> {
        let state: ResourceClassState = decode(TYPE_NAME, planned)?;
        let created = self
            .client
            .create_resource_class(ctx, &state.resource_class, &state.description)
            .await
            .map_err(|err| {
                err.into_provider_error(format!("creating resource class {}", state.resource_class))
            })?;
        encode(&ResourceClassState::from(created))
    }

    async fn read(&self, ctx: &CallContext, state: Value) -> Result<Value, ProviderError> {
        let state: ResourceClassState = decode(TYPE_NAME, state)?;
        let id = state.id()?;
        let namespace = namespace_of(&state.resource_class).ok_or_else(|| {
            ProviderError::Validation(format!("invalid resource class {}", state.resource_class))
        })?;
        let classes = self
            .client
            .list_resource_classes(ctx, namespace)
            .await
            .map_err(|err| err.into_provider_error(format!("listing resource classes in {namespace}")))?;
        let found = classes
            .into_iter()
            .find(|rc| rc.id == id)
            .ok_or_else(|| ProviderError::NotFound(format!("resource class {id}")))?;
        encode(&ResourceClassState::from(found))
    }

    // Both attributes force replacement.
    async fn update(
        &self,
        _ctx: &CallContext,
        _prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        Ok(planned)
    }

    async fn delete(&self, ctx: &CallContext, state: Value) -> Result<(), ProviderError> {
        let state: ResourceClassState = decode(TYPE_NAME, state)?;
        let id = state.id()?;
        tolerate_missing(
            self.client.delete_resource_class(ctx, id).await,
            "resource class",
            id,
        )
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ResourceClassesState {
    id: Option<String>,
    namespace: String,
    resource_classes: Vec<ResourceClass>,
}

pub struct ResourceClassesDataSource {
    client: Arc<CircleciClient>,
}

impl ResourceClassesDataSource {
    pub fn new(client: Arc<CircleciClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DataSource for ResourceClassesDataSource {
    async fn read(&self, ctx: &CallContext, config: Value) -> Result<Value, ProviderError> {
        let mut state: ResourceClassesState = decode(DATA_SOURCE_NAME, config)?;
        state.resource_classes = self
            .client
            .list_resource_classes(ctx, &state.namespace)
            .await
            .map_err(|err| {
                err.into_provider_error(format!("listing resource classes in {}", state.namespace))
            })?;
        state.id = Some(state.namespace.clone());
        encode(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::test_support::registry_for;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn listing() -> Value {
        json!({"items": [
            {"id": "rc1", "resource_class": "acme/linux", "description": "Linux runners"},
            {"id": "rc2", "resource_class": "acme/macos", "description": "macOS runners"}
        ]})
    }

    #[test]
    fn test_namespace_of() {
        assert_eq!(namespace_of("acme/linux"), Some("acme"));
        assert_eq!(namespace_of("acme"), None);
        assert_eq!(namespace_of("/linux"), None);
        assert_eq!(namespace_of("acme/"), None);
    }

    #[test]
    fn test_validate() {
        assert!(validate(&json!({"resource_class": "acme/linux"})).is_empty());
        assert_eq!(validate(&json!({"resource_class": "linux"})).len(), 1);
    }

    #[tokio::test]
    async fn test_read_finds_by_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/runner/resource"))
            .and(query_param("namespace", "acme"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
            .mount(&server)
            .await;

        let registry = registry_for(&server);
        let resource = registry.resource(TYPE_NAME).unwrap();
        let ctx = CallContext::background();

        let state = resource
            .read(
                &ctx,
                json!({"id": "rc2", "resource_class": "acme/macos", "description": "old"}),
            )
            .await
            .unwrap();
        assert_eq!(state["description"], "macOS runners");

        let err = resource
            .read(&ctx, json!({"id": "rc9", "resource_class": "acme/gone", "description": ""}))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_and_delete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v3/runner/resource"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"id": "rc1", "resource_class": "acme/linux", "description": "Linux runners"}),
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/v3/runner/resource/rc1"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "not found"})))
            .expect(1)
            .mount(&server)
            .await;

        let registry = registry_for(&server);
        let resource = registry.resource(TYPE_NAME).unwrap();
        let ctx = CallContext::background();

        let state = resource
            .create(
                &ctx,
                json!({"resource_class": "acme/linux", "description": "Linux runners"}),
            )
            .await
            .unwrap();
        assert_eq!(state["id"], "rc1");
        resource.delete(&ctx, state).await.unwrap();
    }

    #[tokio::test]
    async fn test_data_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/runner/resource"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
            .mount(&server)
            .await;

        let state = registry_for(&server)
            .data_source(DATA_SOURCE_NAME)
            .unwrap()
            .read(&CallContext::background(), json!({"namespace": "acme"}))
            .await
            .unwrap();
        assert_eq!(state["id"], "acme");
        assert_eq!(state["resource_classes"].as_array().unwrap().len(), 2);
        assert_eq!(state["resource_classes"][0]["resource_class"], "acme/linux");
    }
}
