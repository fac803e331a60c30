//! `circleci_checkout_key` and the `circleci_checkout_keys` lookup.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{config_str, decode, encode, DataSource, Resource};
use crate::api::models::CheckoutKey;
use crate::api::CircleciClient;
use crate::context::CallContext;
use crate::error::ProviderError;
use crate::schema::{Attribute, AttributeFlags, AttributeType, Diagnostic, Schema};

pub const TYPE_NAME: &str = "circleci_checkout_key";
pub const DATA_SOURCE_NAME: &str = "circleci_checkout_keys";

const KEY_TYPES: &[&str] = &["deploy-key", "user-key"];

pub fn schema() -> Schema {
    Schema::v0()
        .with_description("Manages a project checkout key")
        .with_attribute(
            "id",
            Attribute::computed_string().with_description("Same as the fingerprint"),
        )
        .with_attribute(
            "project_slug",
            Attribute::required_string().with_force_new(),
        )
        .with_attribute(
            "type",
            Attribute::required_string()
                .with_force_new()
                .with_description("Either `deploy-key` or `user-key`"),
        )
        .with_attribute("public_key", Attribute::computed_string())
        .with_attribute("fingerprint", Attribute::computed_string())
        .with_attribute("preferred", Attribute::computed_bool())
        .with_attribute("created_at", Attribute::computed_string())
}

pub fn data_source_schema() -> Schema {
    let key = AttributeType::object([
        ("public_key", AttributeType::String),
        ("type", AttributeType::String),
        ("fingerprint", AttributeType::String),
        ("preferred", AttributeType::Bool),
        ("created_at", AttributeType::String),
    ]);
    Schema::v0()
        .with_description("Lists the checkout keys of a project")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("project_slug", Attribute::required_string())
        .with_attribute(
            "keys",
            Attribute::new(AttributeType::list(key), AttributeFlags::computed()),
        )
}

pub fn validate(config: &Value) -> Vec<Diagnostic> {
    match config_str(config, "type") {
        Some(key_type) if !KEY_TYPES.contains(&key_type) => vec![Diagnostic::error(format!(
            "Invalid checkout key type `{key_type}`"
        ))
        .with_detail("Expected one of: deploy-key, user-key")
        .with_attribute("type")],
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct KeyModel {
    public_key: Option<String>,
    #[serde(rename = "type")]
    key_type: String,
    fingerprint: Option<String>,
    preferred: Option<bool>,
    created_at: Option<String>,
}

impl From<CheckoutKey> for KeyModel {
    fn from(key: CheckoutKey) -> Self {
        Self {
            key_type: key.normalized_type().to_string(),
            public_key: Some(key.public_key),
            fingerprint: Some(key.fingerprint),
            preferred: Some(key.preferred),
            created_at: Some(key.created_at),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct CheckoutKeyState {
    id: Option<String>,
    project_slug: String,
    #[serde(flatten)]
    key: KeyModel,
}

impl CheckoutKeyState {
    fn refresh(mut self, key: CheckoutKey) -> Result<Value, ProviderError> {
        self.id = Some(key.fingerprint.clone());
        self.key = key.into();
        encode(&self)
    }

    fn fingerprint(&self) -> Result<&str, ProviderError> {
        self.key
            .fingerprint
            .as_deref()
            .or(self.id.as_deref())
            .ok_or_else(|| ProviderError::Validation("checkout key has no fingerprint".to_string()))
    }
}

pub struct CheckoutKeyResource {
    client: Arc<CircleciClient>,
}

impl CheckoutKeyResource {
    pub fn new(client: Arc<CircleciClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Resource for CheckoutKeyResource {
    async fn create(&self, ctx: &CallContext, planned: Value) -> Result<Value, ProviderError> {
        let state: CheckoutKeyState = decode(TYPE_NAME, planned)?;
        let key = self
            .client
            .create_checkout_key(ctx, &state.project_slug, &state.key.key_type)
            .await
            .map_err(|err| {
                err.into_provider_error(format!("creating checkout key for {}", state.project_slug))
            })?;
        state.refresh(key)
    }

    async fn read(&self, ctx: &CallContext, state: Value) -> Result<Value, ProviderError> {
        let state: CheckoutKeyState = decode(TYPE_NAME, state)?;
        let fingerprint = state.fingerprint()?;
        let key = self
            .client
            .get_checkout_key(ctx, &state.project_slug, fingerprint)
            .await
            .map_err(|err| err.into_provider_error(format!("reading checkout key {fingerprint}")))?;
        state.refresh(key)
    }

    // Every configurable attribute forces replacement.
    async fn update(
        &self,
        _ctx: &CallContext,
        _prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        Ok(planned)
    }

    async fn delete(&self, ctx: &CallContext, state: Value) -> Result<(), ProviderError> {
        let state: CheckoutKeyState = decode(TYPE_NAME, state)?;
        let fingerprint = state.fingerprint()?;
        self.client
            .delete_checkout_key(ctx, &state.project_slug, fingerprint)
            .await
            .map_err(|err| err.into_provider_error(format!("deleting checkout key {fingerprint}")))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct CheckoutKeysState {
    id: Option<String>,
    project_slug: String,
    keys: Vec<KeyModel>,
}

pub struct CheckoutKeysDataSource {
    client: Arc<CircleciClient>,
}

impl CheckoutKeysDataSource {
    pub fn new(client: Arc<CircleciClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DataSource for CheckoutKeysDataSource {
    async fn read(&self, ctx: &CallContext, config: Value) -> Result<Value, ProviderError> {
        let mut state: CheckoutKeysState = decode(DATA_SOURCE_NAME, config)?;
        let keys = self
            .client
            .list_checkout_keys(ctx, &state.project_slug)
            .await
            .map_err(|err| {
                err.into_provider_error(format!("listing checkout keys of {}", state.project_slug))
            })?;
        state.id = Some(state.project_slug.clone());
        state.keys = keys.into_iter().map(KeyModel::from).collect();
        encode(&state)
    }
}
