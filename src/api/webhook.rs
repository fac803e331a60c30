//! Outbound webhook endpoints.

use reqwest::Method;

use super::models::{Webhook, WebhookRequest};
use super::CircleciClient;
use crate::context::CallContext;
use crate::error::ApiError;

impl CircleciClient {
    /// Create a webhook.
    pub async fn create_webhook(
        &self,
        ctx: &CallContext,
        body: &WebhookRequest,
    ) -> Result<Webhook, ApiError> {
        self.core.submit(ctx, Method::POST, &["webhook"], body).await
    }

    /// Fetch a webhook by id.
    pub async fn get_webhook(&self, ctx: &CallContext, id: &str) -> Result<Webhook, ApiError> {
        self.core.get(ctx, &["webhook", id], &[]).await
    }

    /// Webhooks scoped to a project.
    pub async fn list_webhooks(
        &self,
        ctx: &CallContext,
        project_id: &str,
    ) -> Result<Vec<Webhook>, ApiError> {
        self.core
            .get_all(
                ctx,
                &["webhook"],
                &[("scope-id", project_id), ("scope-type", "project")],
            )
            .await
    }

    /// Replace a webhook.
    pub async fn update_webhook(
        &self,
        ctx: &CallContext,
        id: &str,
        body: &WebhookRequest,
    ) -> Result<Webhook, ApiError> {
        self.core
            .submit(ctx, Method::PUT, &["webhook", id], body)
            .await
    }

    /// Delete a webhook.
    pub async fn delete_webhook(&self, ctx: &CallContext, id: &str) -> Result<(), ApiError> {
        self.core.delete(ctx, &["webhook", id]).await
    }
}
