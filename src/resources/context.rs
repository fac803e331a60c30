//! `circleci_context`: a named set of shared environment variables.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::{decode, encode, tolerate_missing, DataSource, Resource};
use crate::api::CircleciClient;
use crate::context::CallContext;
use crate::error::ProviderError;
use crate::schema::{Attribute, Block, Diagnostic, NestedBlock, Schema};

pub const TYPE_NAME: &str = "circleci_context";

const OWNER_TYPES: &[&str] = &["organization", "account"];

fn owner_block(force_new: bool) -> NestedBlock {
    let attr = |description: &str| {
        let attr = Attribute::required_string().with_description(description);
        if force_new {
            attr.with_force_new()
        } else {
            attr
        }
    };
    NestedBlock::required(
        Block::new()
            .with_attribute("id", attr("The unique ID of the owner"))
            .with_attribute(
                "type",
                attr("`organization`, or `account` on CircleCI Server"),
            ),
    )
}

pub fn schema() -> Schema {
    Schema::v0()
        .with_description("Manages a context")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("name", Attribute::required_string().with_force_new())
        .with_attribute("created_at", Attribute::computed_string())
        .with_block("owner", owner_block(true))
}

pub fn data_source_schema() -> Schema {
    Schema::v0()
        .with_description("Looks up a context by name")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("name", Attribute::required_string())
        .with_attribute("created_at", Attribute::computed_string())
        .with_block("owner", owner_block(false))
}

pub fn validate(config: &Value) -> Vec<Diagnostic> {
    match config.pointer("/owner/type").and_then(Value::as_str) {
        Some(owner_type) if !OWNER_TYPES.contains(&owner_type) => {
            vec![Diagnostic::error(format!("Invalid owner type `{owner_type}`"))
                .with_detail("Expected `organization` or `account`")
                .with_attribute("owner.type")]
        }
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct Owner {
    id: String,
    #[serde(rename = "type")]
    owner_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct ContextState {
    id: Option<String>,
    name: String,
    owner: Owner,
    created_at: Option<String>,
}

impl ContextState {
    fn id(&self) -> Result<&str, ProviderError> {
        self.id
            .as_deref()
            .ok_or_else(|| ProviderError::Validation("context state has no id".to_string()))
    }
}

pub struct ContextResource {
    client: Arc<CircleciClient>,
}

impl ContextResource {
    pub fn new(client: Arc<CircleciClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Resource for ContextResource {
    async fn create(&self, ctx: &CallContext, planned: Value) -> Result<Value, ProviderError> {
        let mut state: ContextState = decode(TYPE_NAME, planned)?;
        if state.owner.owner_type == "account" {
            warn!(
                name = %state.name,
                "owner type `account` is only valid on a CircleCI Server instance"
            );
        }
        let created = self
            .client
            .create_context(ctx, &state.name, &state.owner.id, &state.owner.owner_type)
            .await
            .map_err(|err| err.into_provider_error(format!("creating context {}", state.name)))?;
        state.id = Some(created.id);
        state.created_at = Some(created.created_at);
        encode(&state)
    }

    async fn read(&self, ctx: &CallContext, state: Value) -> Result<Value, ProviderError> {
        let mut state: ContextState = decode(TYPE_NAME, state)?;
        let id = state.id()?;
        let remote = self
            .client
            .get_context(ctx, id)
            .await
            .map_err(|err| err.into_provider_error(format!("reading context {id}")))?;
        state.name = remote.name;
        state.created_at = Some(remote.created_at);
        encode(&state)
    }

    // Name and owner force replacement; nothing can change in place.
    async fn update(
        &self,
        _ctx: &CallContext,
        _prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        Ok(planned)
    }

    async fn delete(&self, ctx: &CallContext, state: Value) -> Result<(), ProviderError> {
        let state: ContextState = decode(TYPE_NAME, state)?;
        let id = state.id()?;
        tolerate_missing(self.client.delete_context(ctx, id).await, "context", id)
    }
}

pub struct ContextDataSource {
    client: Arc<CircleciClient>,
}

impl ContextDataSource {
    pub fn new(client: Arc<CircleciClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DataSource for ContextDataSource {
    async fn read(&self, ctx: &CallContext, config: Value) -> Result<Value, ProviderError> {
        let mut state: ContextState = decode(TYPE_NAME, config)?;
        let contexts = self
            .client
            .list_contexts(ctx, &state.owner.id, &state.owner.owner_type)
            .await
            .map_err(|err| err.into_provider_error("listing contexts"))?;
        let found = contexts
            .into_iter()
            .find(|c| c.name == state.name)
            .ok_or_else(|| {
                ProviderError::NotFound(format!("no context named {} for owner {}", state.name, state.owner.id))
            })?;
        state.id = Some(found.id);
        state.created_at = Some(found.created_at);
        encode(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::test_support::registry_for;
    use serde_json::json;
    use tracing_test::traced_test;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_validate_owner_type() {
        assert!(validate(&json!({"owner": {"id": "o1", "type": "organization"}})).is_empty());
        assert_eq!(
            validate(&json!({"owner": {"id": "o1", "type": "team"}}))[0]
                .attribute
                .as_deref(),
            Some("owner.type")
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_create_account_owner_warns() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/context"))
            .and(body_json(json!({"name": "deploy", "owner": {"id": "a1", "type": "account"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "c1", "name": "deploy", "created_at": "2024-01-01T00:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let state = registry_for(&server)
            .resource(TYPE_NAME)
            .unwrap()
            .create(
                &CallContext::background(),
                json!({"name": "deploy", "owner": {"id": "a1", "type": "account"}}),
            )
            .await
            .unwrap();

        assert_eq!(state["id"], "c1");
        assert_eq!(state["owner"]["type"], "account");
        assert!(logs_contain("only valid on a CircleCI Server instance"));
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v2/context/c1"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"message": "Context not found"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        registry_for(&server)
            .resource(TYPE_NAME)
            .unwrap()
            .delete(
                &CallContext::background(),
                json!({"id": "c1", "name": "deploy", "owner": {"id": "o1", "type": "organization"}}),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_data_source_finds_by_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/context"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"id": "c1", "name": "deploy", "created_at": "t1"},
                    {"id": "c2", "name": "staging", "created_at": "t2"}
                ]
            })))
            .mount(&server)
            .await;

        let registry = registry_for(&server);
        let source = registry.data_source(TYPE_NAME).unwrap();
        let ctx = CallContext::background();

        let state = source
            .read(&ctx, json!({"name": "staging", "owner": {"id": "o1", "type": "organization"}}))
            .await
            .unwrap();
        assert_eq!(state["id"], "c2");

        let err = source
            .read(&ctx, json!({"name": "prod", "owner": {"id": "o1", "type": "organization"}}))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
