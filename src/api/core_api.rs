//! Project, environment, checkout key, context and schedule endpoints.

use reqwest::Method;
use serde_json::{json, Value};

use super::models::{
    CheckoutKey, CheckoutKeyRequest, Context, ContextEnvVar, ContextOwner, CreateContextRequest,
    EnvVar, Page, Project, Schedule, ScheduleRequest,
};
use super::CircleciClient;
use crate::context::CallContext;
use crate::error::ApiError;

impl CircleciClient {
    /// Look up a project by slug.
    pub async fn get_project(&self, ctx: &CallContext, slug: &str) -> Result<Project, ApiError> {
        self.core.get(ctx, &["project", slug], &[]).await
    }

    /// Start building a project on CircleCI.
    pub async fn follow_project(&self, ctx: &CallContext, slug: &str) -> Result<(), ApiError> {
        let _: Value = self
            .legacy
            .submit(ctx, Method::POST, &["project", slug, "follow"], &json!({}))
            .await?;
        Ok(())
    }

    /// Add a project environment variable.
    pub async fn add_env_var(
        &self,
        ctx: &CallContext,
        slug: &str,
        var: &EnvVar,
    ) -> Result<EnvVar, ApiError> {
        self.core
            .submit(ctx, Method::POST, &["project", slug, "envvar"], var)
            .await
    }

    /// Fetch a project environment variable; the value comes back masked.
    pub async fn get_env_var(
        &self,
        ctx: &CallContext,
        slug: &str,
        name: &str,
    ) -> Result<EnvVar, ApiError> {
        self.core.get(ctx, &["project", slug, "envvar", name], &[]).await
    }

    /// Delete a project environment variable.
    pub async fn delete_env_var(
        &self,
        ctx: &CallContext,
        slug: &str,
        name: &str,
    ) -> Result<(), ApiError> {
        self.core.delete(ctx, &["project", slug, "envvar", name]).await
    }

    /// Create a `deploy-key` or `user-key` for a project.
    pub async fn create_checkout_key(
        &self,
        ctx: &CallContext,
        slug: &str,
        key_type: &str,
    ) -> Result<CheckoutKey, ApiError> {
        self.core
            .submit(
                ctx,
                Method::POST,
                &["project", slug, "checkout-key"],
                &CheckoutKeyRequest { key_type },
            )
            .await
    }

    /// Fetch one checkout key by fingerprint.
    pub async fn get_checkout_key(
        &self,
        ctx: &CallContext,
        slug: &str,
        fingerprint: &str,
    ) -> Result<CheckoutKey, ApiError> {
        self.core
            .get(ctx, &["project", slug, "checkout-key", fingerprint], &[])
            .await
    }

    /// Every checkout key of a project.
    pub async fn list_checkout_keys(
        &self,
        ctx: &CallContext,
        slug: &str,
    ) -> Result<Vec<CheckoutKey>, ApiError> {
        self.core
            .get_all(ctx, &["project", slug, "checkout-key"], &[])
            .await
    }

    /// Delete checkout key.
    pub async fn delete_checkout_key(
        &self,
        ctx: &CallContext,
        slug: &str,
        fingerprint: &str,
    ) -> Result<(), ApiError> {
        self.core
            .delete(ctx, &["project", slug, "checkout-key", fingerprint])
            .await
    }

    /// Create a context owned by an organization or account.
    pub async fn create_context(
        &self,
        ctx: &CallContext,
        name: &str,
        owner_id: &str,
        owner_type: &str,
    ) -> Result<Context, ApiError> {
        let body = CreateContextRequest {
            name,
            owner: ContextOwner {
                id: owner_id,
                owner_type,
            },
        };
        self.core.submit(ctx, Method::POST, &["context"], &body).await
    }

    /// Get context.
    pub async fn get_context(&self, ctx: &CallContext, id: &str) -> Result<Context, ApiError> {
        self.core.get(ctx, &["context", id], &[]).await
    }

    /// Every context owned by `owner_id`, following pagination.
    pub async fn list_contexts(
        &self,
        ctx: &CallContext,
        owner_id: &str,
        owner_type: &str,
    ) -> Result<Vec<Context>, ApiError> {
        self.core
            .get_all(
                ctx,
                &["context"],
                &[("owner-id", owner_id), ("owner-type", owner_type)],
            )
            .await
    }

    /// Delete context.
    pub async fn delete_context(&self, ctx: &CallContext, id: &str) -> Result<(), ApiError> {
        self.core.delete(ctx, &["context", id]).await
    }

    /// Create or replace a context variable.
    pub async fn put_context_env_var(
        &self,
        ctx: &CallContext,
        context_id: &str,
        name: &str,
        value: &str,
    ) -> Result<ContextEnvVar, ApiError> {
        self.core
            .submit(
                ctx,
                Method::PUT,
                &["context", context_id, "environment-variable", name],
                &json!({ "value": value }),
            )
            .await
    }

    /// Find a context variable by name, paging through the listing.
    pub async fn find_context_env_var(
        &self,
        ctx: &CallContext,
        context_id: &str,
        name: &str,
    ) -> Result<Option<ContextEnvVar>, ApiError> {
        let mut token = String::new();
        loop {
            let page: Page<ContextEnvVar> = self
                .core
                .get(
                    ctx,
                    &["context", context_id, "environment-variable"],
                    &[("page-token", &token)],
                )
                .await?;
            let next = page.next().map(str::to_string);
            if let Some(found) = page.items.into_iter().find(|v| v.variable == name) {
                return Ok(Some(found));
            }
            match next {
                Some(next) => token = next,
                None => return Ok(None),
            }
        }
    }

    /// Remove a variable from a context.
    pub async fn delete_context_env_var(
        &self,
        ctx: &CallContext,
        context_id: &str,
        name: &str,
    ) -> Result<(), ApiError> {
        self.core
            .delete(ctx, &["context", context_id, "environment-variable", name])
            .await
    }

    /// Create a scheduled pipeline for a project.
    pub async fn create_schedule(
        &self,
        ctx: &CallContext,
        slug: &str,
        body: &ScheduleRequest,
    ) -> Result<Schedule, ApiError> {
        self.core
            .submit(ctx, Method::POST, &["project", slug, "schedule"], body)
            .await
    }

    /// Get schedule.
    pub async fn get_schedule(&self, ctx: &CallContext, id: &str) -> Result<Schedule, ApiError> {
        self.core.get(ctx, &["schedule", id], &[]).await
    }

    /// Replace a schedule's definition.
    pub async fn update_schedule(
        &self,
        ctx: &CallContext,
        id: &str,
        body: &ScheduleRequest,
    ) -> Result<Schedule, ApiError> {
        self.core
            .submit(ctx, Method::PATCH, &["schedule", id], body)
            .await
    }

    /// Delete schedule.
    pub async fn delete_schedule(&self, ctx: &CallContext, id: &str) -> Result<(), ApiError> {
        self.core.delete(ctx, &["schedule", id]).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::client_for;
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_follow_uses_legacy_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1.1/project/gh/acme/api/follow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"following": true})))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .follow_project(&CallContext::background(), "gh/acme/api")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_contexts_follows_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/context"))
            .and(query_param("owner-id", "org-1"))
            .and(query_param_is_missing("page-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"id": "c1", "name": "deploy", "created_at": "t"}],
                "next_page_token": "p2"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/context"))
            .and(query_param("page-token", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"id": "c2", "name": "staging", "created_at": "t"}],
                "next_page_token": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let contexts = client_for(&server)
            .list_contexts(&CallContext::background(), "org-1", "organization")
            .await
            .unwrap();
        let names: Vec<_> = contexts.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["deploy", "staging"]);
    }

    #[tokio::test]
    async fn test_find_context_env_var() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/context/c1/environment-variable"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"variable": "A", "context_id": "c1"},
                    {"variable": "TOKEN", "context_id": "c1", "updated_at": "u"}
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let ctx = CallContext::background();
        let found = client.find_context_env_var(&ctx, "c1", "TOKEN").await.unwrap();
        assert_eq!(found.unwrap().updated_at, "u");
        assert!(client
            .find_context_env_var(&ctx, "c1", "MISSING")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_create_checkout_key_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/project/gh/acme/api/checkout-key"))
            .and(body_json(json!({"type": "deploy-key"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "public-key": "ssh-ed25519 AAAA",
                "type": "deploy-key",
                "fingerprint": "ab:cd",
                "preferred": true,
                "created-at": "t"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let key = client_for(&server)
            .create_checkout_key(&CallContext::background(), "gh/acme/api", "deploy-key")
            .await
            .unwrap();
        assert_eq!(key.fingerprint, "ab:cd");
    }
}
