//! Self-hosted runner endpoints (runner API host).

use reqwest::Method;

use super::models::{ResourceClass, ResourceClassRequest, RunnerToken, RunnerTokenRequest};
use super::CircleciClient;
use crate::context::CallContext;
use crate::error::ApiError;

impl CircleciClient {
    /// Resource classes in a namespace.
    pub async fn list_resource_classes(
        &self,
        ctx: &CallContext,
        namespace: &str,
    ) -> Result<Vec<ResourceClass>, ApiError> {
        self.runner
            .get_all(ctx, &["runner", "resource"], &[("namespace", namespace)])
            .await
    }

    /// Create a resource class named `namespace/name`.
    pub async fn create_resource_class(
        &self,
        ctx: &CallContext,
        resource_class: &str,
        description: &str,
    ) -> Result<ResourceClass, ApiError> {
        let body = ResourceClassRequest {
            resource_class,
            description,
        };
        self.runner
            .submit(ctx, Method::POST, &["runner", "resource"], &body)
            .await
    }

    /// Delete a resource class.
    pub async fn delete_resource_class(&self, ctx: &CallContext, id: &str) -> Result<(), ApiError> {
        self.runner.delete(ctx, &["runner", "resource", id]).await
    }

    /// Tokens issued for a resource class. Secrets are not included.
    pub async fn list_runner_tokens(
        &self,
        ctx: &CallContext,
        resource_class: &str,
    ) -> Result<Vec<RunnerToken>, ApiError> {
        self.runner
            .get_all(
                ctx,
                &["runner", "token"],
                &[("resource-class", resource_class)],
            )
            .await
    }

    /// Issue a token; the response is the only place the secret appears.
    pub async fn create_runner_token(
        &self,
        ctx: &CallContext,
        resource_class: &str,
        nickname: &str,
    ) -> Result<RunnerToken, ApiError> {
        let body = RunnerTokenRequest {
            resource_class,
            nickname,
        };
        self.runner
            .submit(ctx, Method::POST, &["runner", "token"], &body)
            .await
    }

    /// Revoke a token.
    pub async fn delete_runner_token(&self, ctx: &CallContext, id: &str) -> Result<(), ApiError> {
        self.runner.delete(ctx, &["runner", "token", id]).await
    }
}
