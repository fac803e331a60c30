//! `circleci_runner_token` and the `circleci_runner_tokens` lookup.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{decode, encode, tolerate_missing, DataSource, Resource};
use crate::api::models::RunnerToken;
use crate::api::CircleciClient;
use crate::context::CallContext;
use crate::error::ProviderError;
use crate::schema::{Attribute, AttributeFlags, AttributeType, Schema};

pub const TYPE_NAME: &str = "circleci_runner_token";
pub const DATA_SOURCE_NAME: &str = "circleci_runner_tokens";

pub fn schema() -> Schema {
    Schema::v0()
        .with_description("Manages a self-hosted runner token")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "resource_class",
            Attribute::required_string().with_force_new(),
        )
        .with_attribute("nickname", Attribute::required_string().with_force_new())
        .with_attribute(
            "token",
            Attribute::computed_string()
                .sensitive()
                .with_description("Only known right after creation"),
        )
        .with_attribute("created_at", Attribute::computed_string())
}

pub fn data_source_schema() -> Schema {
    let token = AttributeType::object([
        ("id", AttributeType::String),
        ("resource_class", AttributeType::String),
        ("nickname", AttributeType::String),
        ("created_at", AttributeType::String),
    ]);
    Schema::v0()
        .with_description("Lists the tokens of a runner resource class")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("resource_class", Attribute::required_string())
        .with_attribute(
            "tokens",
            Attribute::new(AttributeType::list(token), AttributeFlags::computed()),
        )
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct RunnerTokenState {
    id: Option<String>,
    resource_class: String,
    nickname: String,
    token: Option<String>,
    created_at: Option<String>,
}

impl RunnerTokenState {
    fn id(&self) -> Result<&str, ProviderError> {
        self.id
            .as_deref()
            .ok_or_else(|| ProviderError::Validation("runner token state has no id".to_string()))
    }
}

pub struct RunnerTokenResource {
    client: Arc<CircleciClient>,
}

impl RunnerTokenResource {
    pub fn new(client: Arc<CircleciClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Resource for RunnerTokenResource {
    async fn create(&self, ctx: &CallContext, planned: Value) -> Result<Value, ProviderError> {
        let mut state: RunnerTokenState = decode(TYPE_NAME, planned)?;
        let created = self
            .client
            .create_runner_token(ctx, &state.resource_class, &state.nickname)
            .await
            .map_err(|err| {
                err.into_provider_error(format!("creating token for {}", state.resource_class))
            })?;
        state.id = Some(created.id);
        state.token = Some(created.token);
        state.created_at = Some(created.created_at);
        encode(&state)
    }

    async fn read(&self, ctx: &CallContext, state: Value) -> Result<Value, ProviderError> {
        let mut state: RunnerTokenState = decode(TYPE_NAME, state)?;
        let id = state.id()?.to_string();
        let tokens = self
            .client
            .list_runner_tokens(ctx, &state.resource_class)
            .await
            .map_err(|err| {
                err.into_provider_error(format!("listing tokens of {}", state.resource_class))
            })?;
        let found = tokens
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| ProviderError::NotFound(format!("runner token {id}")))?;
        state.nickname = found.nickname;
        state.created_at = Some(found.created_at);
        encode(&state)
    }

    // Both inputs force replacement.
    async fn update(
        &self,
        _ctx: &CallContext,
        _prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        Ok(planned)
    }

    async fn delete(&self, ctx: &CallContext, state: Value) -> Result<(), ProviderError> {
        let state: RunnerTokenState = decode(TYPE_NAME, state)?;
        let id = state.id()?;
        tolerate_missing(
            self.client.delete_runner_token(ctx, id).await,
            "runner token",
            id,
        )
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct TokenModel {
    id: String,
    resource_class: String,
    nickname: String,
    created_at: String,
}

impl From<RunnerToken> for TokenModel {
    fn from(t: RunnerToken) -> Self {
        Self {
            id: t.id,
            resource_class: t.resource_class,
            nickname: t.nickname,
            created_at: t.created_at,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct RunnerTokensState {
    id: Option<String>,
    resource_class: String,
    tokens: Vec<TokenModel>,
}

pub struct RunnerTokensDataSource {
    client: Arc<CircleciClient>,
}

impl RunnerTokensDataSource {
    pub fn new(client: Arc<CircleciClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DataSource for RunnerTokensDataSource {
    async fn read(&self, ctx: &CallContext, config: Value) -> Result<Value, ProviderError> {
        let mut state: RunnerTokensState = decode(DATA_SOURCE_NAME, config)?;
        let tokens = self
            .client
            .list_runner_tokens(ctx, &state.resource_class)
            .await
            .map_err(|err| {
                err.into_provider_error(format!("listing tokens of {}", state.resource_class))
            })?;
        state.id = Some(state.resource_class.clone());
        state.tokens = tokens.into_iter().map(TokenModel::from).collect();
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
            {"id": "t1", "resource_class": "acme/linux", "nickname": "ci-1", "created_at": "c1"},
            {"id": "t2", "resource_class": "acme/linux", "nickname": "ci-2", "created_at": "c2"}
        ]})
    }

    #[tokio::test]
    async fn test_create_captures_secret_and_read_keeps_it() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v3/runner/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "t1",
                "resource_class": "acme/linux",
                "nickname": "ci-1",
                "created_at": "c1",
                "token": "secret"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v3/runner/token"))
            .and(query_param("resource-class", "acme/linux"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
            .mount(&server)
            .await;

        let registry = registry_for(&server);
        let resource = registry.resource(TYPE_NAME).unwrap();
        let ctx = CallContext::background();

        let state = resource
            .create(&ctx, json!({"resource_class": "acme/linux", "nickname": "ci-1"}))
            .await
            .unwrap();
        assert_eq!(state["token"], "secret");

        let refreshed = resource.read(&ctx, state).await.unwrap();
        assert_eq!(refreshed["token"], "secret");
        assert_eq!(refreshed["created_at"], "c1");
    }

    #[tokio::test]
    async fn test_read_revoked_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/runner/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
            .mount(&server)
            .await;

        let err = registry_for(&server)
            .resource(TYPE_NAME)
            .unwrap()
            .read(
                &CallContext::background(),
                json!({"id": "t9", "resource_class": "acme/linux", "nickname": "old"}),
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_data_source_omits_secrets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/runner/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
            .mount(&server)
            .await;

        let state = registry_for(&server)
            .data_source(DATA_SOURCE_NAME)
            .unwrap()
            .read(&CallContext::background(), json!({"resource_class": "acme/linux"}))
            .await
            .unwrap();
        assert_eq!(state["id"], "acme/linux");
        assert_eq!(state["tokens"][1]["nickname"], "ci-2");
        assert!(state["tokens"][0].get("token").is_none());
    }
}
