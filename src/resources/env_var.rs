//! `circleci_env_var`: a project-level environment variable.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{decode, encode, Resource};
use crate::api::models::EnvVar;
use crate::api::CircleciClient;
use crate::context::CallContext;
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};

pub const TYPE_NAME: &str = "circleci_env_var";

pub fn schema() -> Schema {
    Schema::v0()
        .with_description("Manages a project environment variable")
        .with_attribute(
            "id",
            Attribute::computed_string().with_description("`<project_slug>/<name>`"),
        )
        .with_attribute(
            "project_slug",
            Attribute::required_string()
                .with_force_new()
                .with_description("Slug of the project the variable belongs to"),
        )
        .with_attribute(
            "name",
            Attribute::required_string()
                .with_force_new()
                .with_description("Name of the variable"),
        )
        .with_attribute(
            "value",
            Attribute::required_string()
                .sensitive()
                .with_description("Value of the variable"),
        )
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct EnvVarState {
    id: Option<String>,
    project_slug: String,
    name: String,
    value: String,
}

impl EnvVarState {
    fn id(&self) -> String {
        format!("{}/{}", self.project_slug, self.name)
    }

    fn payload(&self) -> EnvVar {
        EnvVar {
            name: self.name.clone(),
            value: self.value.clone(),
        }
    }
}

pub struct EnvVarResource {
    client: Arc<CircleciClient>,
}

impl EnvVarResource {
    pub fn new(client: Arc<CircleciClient>) -> Self {
        Self { client }
    }

    async fn add(&self, ctx: &CallContext, mut state: EnvVarState) -> Result<Value, ProviderError> {
        self.client
            .add_env_var(ctx, &state.project_slug, &state.payload())
            .await
            .map_err(|err| err.into_provider_error(format!("adding env var {}", state.id())))?;
        state.id = Some(state.id());
        encode(&state)
    }
}

#[async_trait]
impl Resource for EnvVarResource {
    async fn create(&self, ctx: &CallContext, planned: Value) -> Result<Value, ProviderError> {
        self.add(ctx, decode(TYPE_NAME, planned)?).await
    }

    async fn read(&self, ctx: &CallContext, state: Value) -> Result<Value, ProviderError> {
        let mut state: EnvVarState = decode(TYPE_NAME, state)?;
        // Values come back masked, so only existence is confirmed.
        self.client
            .get_env_var(ctx, &state.project_slug, &state.name)
            .await
            .map_err(|err| err.into_provider_error(format!("reading env var {}", state.id())))?;
        state.id = Some(state.id());
        encode(&state)
    }

    async fn update(
        &self,
        ctx: &CallContext,
        _prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let state: EnvVarState = decode(TYPE_NAME, planned)?;
        debug!(id = %state.id(), "replacing env var value");
        self.client
            .delete_env_var(ctx, &state.project_slug, &state.name)
            .await
            .map_err(|err| err.into_provider_error(format!("deleting env var {}", state.id())))?;
        self.add(ctx, state).await
    }

    async fn delete(&self, ctx: &CallContext, state: Value) -> Result<(), ProviderError> {
        let state: EnvVarState = decode(TYPE_NAME, state)?;
        self.client
            .delete_env_var(ctx, &state.project_slug, &state.name)
            .await
            .map_err(|err| err.into_provider_error(format!("deleting env var {}", state.id())))
    }
}
