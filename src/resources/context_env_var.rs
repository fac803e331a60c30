//! `circleci_context_env_var`: a variable stored in a context.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{decode, encode, tolerate_missing, Resource};
use crate::api::models::ContextEnvVar;
use crate::api::CircleciClient;
use crate::context::CallContext;
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};

pub const TYPE_NAME: &str = "circleci_context_env_var";

pub fn schema() -> Schema {
    Schema::v0()
        .with_description("Manages an environment variable in a context")
        .with_attribute(
            "id",
            Attribute::computed_string().with_description("`<context_id>/<name>`"),
        )
        .with_attribute("context_id", Attribute::required_string().with_force_new())
        .with_attribute("name", Attribute::required_string().with_force_new())
        .with_attribute("value", Attribute::required_string().sensitive())
        .with_attribute("created_at", Attribute::computed_string())
        .with_attribute("updated_at", Attribute::computed_string())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct ContextEnvVarState {
    id: Option<String>,
    context_id: String,
    name: String,
    value: String,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl ContextEnvVarState {
    fn id(&self) -> String {
        format!("{}/{}", self.context_id, self.name)
    }

    fn refresh(mut self, remote: ContextEnvVar) -> Result<Value, ProviderError> {
        self.id = Some(self.id());
        self.created_at = Some(remote.created_at);
        self.updated_at = Some(remote.updated_at);
        encode(&self)
    }
}

pub struct ContextEnvVarResource {
    client: Arc<CircleciClient>,
}

impl ContextEnvVarResource {
    pub fn new(client: Arc<CircleciClient>) -> Self {
        Self { client }
    }

    async fn put(&self, ctx: &CallContext, planned: Value) -> Result<Value, ProviderError> {
        let state: ContextEnvVarState = decode(TYPE_NAME, planned)?;
        let remote = self
            .client
            .put_context_env_var(ctx, &state.context_id, &state.name, &state.value)
            .await
            .map_err(|err| err.into_provider_error(format!("writing context variable {}", state.id())))?;
        state.refresh(remote)
    }
}

#[async_trait]
impl Resource for ContextEnvVarResource {
    async fn create(&self, ctx: &CallContext, planned: Value) -> Result<Value, ProviderError> {
        self.put(ctx, planned).await
    }

    async fn read(&self, ctx: &CallContext, state: Value) -> Result<Value, ProviderError> {
        let state: ContextEnvVarState = decode(TYPE_NAME, state)?;
        let remote = self
            .client
            .find_context_env_var(ctx, &state.context_id, &state.name)
            .await
            .map_err(|err| err.into_provider_error(format!("reading context variable {}", state.id())))?
            .ok_or_else(|| ProviderError::NotFound(format!("context variable {}", state.id())))?;
        state.refresh(remote)
    }

    async fn update(
        &self,
        ctx: &CallContext,
        _prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        self.put(ctx, planned).await
    }

    async fn delete(&self, ctx: &CallContext, state: Value) -> Result<(), ProviderError> {
        let state: ContextEnvVarState = decode(TYPE_NAME, state)?;
        let result = self
            .client
            .delete_context_env_var(ctx, &state.context_id, &state.name)
            .await;
        tolerate_missing(result, "context variable", &state.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::test_support::registry_for;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn planned() -> Value {
        json!({"context_id": "c1", "name": "TOKEN", "value": "s3cret"})
    }

    #[tokio::test]
    async fn test_create_puts_value() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v2/context/c1/environment-variable/TOKEN"))
            .and(body_json(json!({"value": "s3cret"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "variable": "TOKEN",
                "context_id": "c1",
                "created_at": "2024-01-01T00:00:00Z",
                "updated_at": "2024-01-02T00:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let state = registry_for(&server)
            .resource(TYPE_NAME)
            .unwrap()
            .create(&CallContext::background(), planned())
            .await
            .unwrap();
        assert_eq!(state["id"], "c1/TOKEN");
        assert_eq!(state["value"], "s3cret");
        assert_eq!(state["updated_at"], "2024-01-02T00:00:00Z");
    }

    #[tokio::test]
    async fn test_read_missing_variable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/context/c1/environment-variable"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"variable": "OTHER", "context_id": "c1"}],
                "next_page_token": null
            })))
            .mount(&server)
            .await;

        let err = registry_for(&server)
            .resource(TYPE_NAME)
            .unwrap()
            .read(&CallContext::background(), planned())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v2/context/c1/environment-variable/TOKEN"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "not found"})))
            .expect(1)
            .mount(&server)
            .await;

        registry_for(&server)
            .resource(TYPE_NAME)
            .unwrap()
            .delete(&CallContext::background(), planned())
            .await
            .unwrap();
    }
}
