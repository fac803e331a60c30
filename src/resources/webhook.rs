//! `circleci_webhook` and the `circleci_webhooks` lookup.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{config_str, decode, encode, tolerate_missing, DataSource, Resource};
use crate::api::models::{Webhook, WebhookRequest, WebhookScope};
use crate::api::CircleciClient;
use crate::context::CallContext;
use crate::error::ProviderError;
use crate::schema::{Attribute, AttributeFlags, AttributeType, Diagnostic, Schema};

pub const TYPE_NAME: &str = "circleci_webhook";
pub const DATA_SOURCE_NAME: &str = "circleci_webhooks";

const EVENTS: &[&str] = &["job-completed", "workflow-completed"];

pub fn schema() -> Schema {
    Schema::v0()
        .with_description("Manages a project webhook")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("created_at", Attribute::computed_string())
        .with_attribute("updated_at", Attribute::computed_string())
        .with_attribute("name", Attribute::required_string())
        .with_attribute(
            "url",
            Attribute::required_string().with_description("Delivery URL; must use https"),
        )
        .with_attribute(
            "signing_secret",
            Attribute::required_string()
                .sensitive()
                .with_description("Secret used to sign each delivery"),
        )
        .with_attribute("project_id", Attribute::required_string())
        .with_attribute(
            "verify_tls",
            Attribute::new(AttributeType::Bool, AttributeFlags::required()),
        )
        .with_attribute(
            "events",
            Attribute::new(AttributeType::set(AttributeType::String), AttributeFlags::required())
                .with_description("`job-completed` and/or `workflow-completed`"),
        )
}

pub fn data_source_schema() -> Schema {
    let webhook = AttributeType::object([
        ("id", AttributeType::String),
        ("name", AttributeType::String),
        ("url", AttributeType::String),
        ("verify_tls", AttributeType::Bool),
        ("signing_secret", AttributeType::String),
        ("created_at", AttributeType::String),
        ("updated_at", AttributeType::String),
        (
            "scope",
            AttributeType::object([("id", AttributeType::String), ("type", AttributeType::String)]),
        ),
        ("events", AttributeType::list(AttributeType::String)),
    ]);
    Schema::v0()
        .with_description("Lists the webhooks of a project")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("project_id", Attribute::required_string())
        .with_attribute(
            "webhooks",
            Attribute::new(AttributeType::list(webhook), AttributeFlags::computed()),
        )
}

pub fn validate(config: &Value) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    if let Some(url) = config_str(config, "url") {
        if !url.starts_with("https://") {
            diags.push(
                Diagnostic::error("Webhook URL must start with https://").with_attribute("url"),
            );
        }
    }
    let events = config.get("events").and_then(Value::as_array);
    for event in events.into_iter().flatten().filter_map(Value::as_str) {
        if !EVENTS.contains(&event) {
            diags.push(
                Diagnostic::error(format!("Unknown webhook event `{event}`"))
                    .with_detail("Expected `job-completed` or `workflow-completed`")
                    .with_attribute("events"),
            );
        }
    }
    diags
}

/// The API echoes the secret masked; a masked value never replaces state.
fn is_masked(secret: &str) -> bool {
    secret.chars().all(|c| c == '*')
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct WebhookState {
    id: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
    name: String,
    url: String,
    signing_secret: String,
    project_id: String,
    verify_tls: bool,
    events: Vec<String>,
}

impl WebhookState {
    fn id(&self) -> Result<&str, ProviderError> {
        self.id
            .as_deref()
            .ok_or_else(|| ProviderError::Validation("webhook state has no id".to_string()))
    }

    fn request(&self) -> WebhookRequest {
        WebhookRequest {
            name: self.name.clone(),
            url: self.url.clone(),
            events: self.events.clone(),
            verify_tls: self.verify_tls,
            signing_secret: self.signing_secret.clone(),
            scope: WebhookScope::project(self.project_id.clone()),
        }
    }

    fn refresh(&mut self, webhook: Webhook) {
        self.id = Some(webhook.id);
        self.created_at = Some(webhook.created_at);
        self.updated_at = Some(webhook.updated_at);
        self.name = webhook.name;
        self.url = webhook.url;
        if !is_masked(&webhook.signing_secret) {
            self.signing_secret = webhook.signing_secret;
        }
        self.project_id = webhook.scope.id;
        self.verify_tls = webhook.verify_tls;
        self.events = webhook.events;
    }
}

pub struct WebhookResource {
    client: Arc<CircleciClient>,
}

impl WebhookResource {
    pub fn new(client: Arc<CircleciClient>) -> Self {
        Self { client }
    }

    async fn fetch(&self, ctx: &CallContext, mut state: WebhookState) -> Result<Value, ProviderError> {
        let id = state.id()?.to_string();
        let webhook = self
            .client
            .get_webhook(ctx, &id)
            .await
            .map_err(|err| err.into_provider_error(format!("reading webhook {id}")))?;
        state.refresh(webhook);
        encode(&state)
    }
}

#[async_trait]
impl Resource for WebhookResource {
    async fn create(&self, ctx: &CallContext, planned: Value) -> Result<Value, ProviderError> {
        let mut state: WebhookState = decode(TYPE_NAME, planned)?;
        let created = self
            .client
            .create_webhook(ctx, &state.request())
            .await
            .map_err(|err| err.into_provider_error(format!("creating webhook {}", state.name)))?;
        state.id = Some(created.id);
        state.created_at = Some(created.created_at);
        state.updated_at = Some(created.updated_at);
        encode(&state)
    }

    async fn read(&self, ctx: &CallContext, state: Value) -> Result<Value, ProviderError> {
        self.fetch(ctx, decode(TYPE_NAME, state)?).await
    }

    async fn update(
        &self,
        ctx: &CallContext,
        _prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let mut state: WebhookState = decode(TYPE_NAME, planned)?;
        let id = state.id()?.to_string();
        let updated = self
            .client
            .update_webhook(ctx, &id, &state.request())
            .await
            .map_err(|err| err.into_provider_error(format!("updating webhook {id}")))?;
        state.created_at = Some(updated.created_at);
        state.updated_at = Some(updated.updated_at);
        encode(&state)
    }

    async fn delete(&self, ctx: &CallContext, state: Value) -> Result<(), ProviderError> {
        let state: WebhookState = decode(TYPE_NAME, state)?;
        let id = state.id()?;
        tolerate_missing(self.client.delete_webhook(ctx, id).await, "webhook", id)
    }

    async fn import(&self, ctx: &CallContext, id: &str) -> Result<Value, ProviderError> {
        let state = WebhookState {
            id: Some(id.to_string()),
            ..WebhookState::default()
        };
        self.fetch(ctx, state).await
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ScopeModel {
    id: String,
    #[serde(rename = "type")]
    scope_type: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct WebhookModel {
    id: String,
    name: String,
    url: String,
    verify_tls: bool,
    signing_secret: String,
    created_at: String,
    updated_at: String,
    scope: ScopeModel,
    events: Vec<String>,
}

impl From<Webhook> for WebhookModel {
    fn from(w: Webhook) -> Self {
        Self {
            id: w.id,
            name: w.name,
            url: w.url,
            verify_tls: w.verify_tls,
            signing_secret: w.signing_secret,
            created_at: w.created_at,
            updated_at: w.updated_at,
            scope: ScopeModel {
                id: w.scope.id,
                scope_type: w.scope.scope_type,
            },
            events: w.events,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct WebhooksState {
    id: Option<String>,
    project_id: String,
    webhooks: Vec<WebhookModel>,
}

pub struct WebhooksDataSource {
    client: Arc<CircleciClient>,
}

impl WebhooksDataSource {
    pub fn new(client: Arc<CircleciClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DataSource for WebhooksDataSource {
    async fn read(&self, ctx: &CallContext, config: Value) -> Result<Value, ProviderError> {
        let mut state: WebhooksState = decode(DATA_SOURCE_NAME, config)?;
        let webhooks = self
            .client
            .list_webhooks(ctx, &state.project_id)
            .await
            .map_err(|err| {
                err.into_provider_error(format!("listing webhooks of project {}", state.project_id))
            })?;
        state.id = Some(state.project_id.clone());
        state.webhooks = webhooks.into_iter().map(WebhookModel::from).collect();
        encode(&state)
    }
}
