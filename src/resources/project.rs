//! `circleci_project`: follow a project and expose its metadata.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};

use super::{config_str, decode, encode, DataSource, Resource};
use crate::api::models::Project;
use crate::api::CircleciClient;
use crate::context::CallContext;
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};

pub const TYPE_NAME: &str = "circleci_project";

const COMPUTED: &[(&str, &str)] = &[
    ("id", "The unique ID of the project"),
    ("name", "The name of the project"),
    ("organization_name", "The name of the organization the project belongs to"),
    ("organization_slug", "The slug of the organization the project belongs to"),
    ("organization_id", "The ID of the organization the project belongs to"),
    ("vcs_provider", "The VCS provider, e.g. GitHub or Bitbucket"),
    ("vcs_default_branch", "The default branch of the repository"),
    ("vcs_url", "The URL of the repository"),
];

fn with_computed(schema: Schema) -> Schema {
    COMPUTED.iter().fold(schema, |s, (name, description)| {
        s.with_attribute(*name, Attribute::computed_string().with_description(*description))
    })
}

pub fn schema() -> Schema {
    with_computed(
        Schema::v0()
            .with_description("Follows a project so CircleCI starts building it")
            .with_attribute(
                "slug",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Project slug in the form `vcs/org/repo`"),
            ),
    )
}

pub fn data_source_schema() -> Schema {
    with_computed(
        Schema::v0()
            .with_description("Looks up a project by slug")
            .with_attribute("slug", Attribute::required_string()),
    )
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct ProjectState {
    id: Option<String>,
    slug: String,
    name: Option<String>,
    organization_name: Option<String>,
    organization_slug: Option<String>,
    organization_id: Option<String>,
    vcs_provider: Option<String>,
    vcs_default_branch: Option<String>,
    vcs_url: Option<String>,
}

impl ProjectState {
    fn refresh(&mut self, project: Project) {
        self.id = Some(project.id);
        self.name = Some(project.name);
        self.organization_name = Some(project.organization_name);
        self.organization_slug = Some(project.organization_slug);
        self.organization_id = Some(project.organization_id);
        self.vcs_provider = Some(project.vcs_info.provider);
        self.vcs_default_branch = Some(project.vcs_info.default_branch);
        self.vcs_url = Some(project.vcs_info.vcs_url);
    }
}

async fn fetch(
    client: &CircleciClient,
    ctx: &CallContext,
    mut state: ProjectState,
) -> Result<Value, ProviderError> {
    let project = client
        .get_project(ctx, &state.slug)
        .await
        .map_err(|err| err.into_provider_error(format!("reading project {}", state.slug)))?;
    state.refresh(project);
    encode(&state)
}

pub struct ProjectResource {
    client: Arc<CircleciClient>,
}

impl ProjectResource {
    pub fn new(client: Arc<CircleciClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Resource for ProjectResource {
    #[instrument(skip_all, name = "project.create")]
    async fn create(&self, ctx: &CallContext, planned: Value) -> Result<Value, ProviderError> {
        let state: ProjectState = decode(TYPE_NAME, planned)?;
        self.client
            .follow_project(ctx, &state.slug)
            .await
            .map_err(|err| err.into_provider_error(format!("following project {}", state.slug)))?;
        info!(slug = %state.slug, "followed project");
        fetch(&self.client, ctx, state).await
    }

    async fn read(&self, ctx: &CallContext, state: Value) -> Result<Value, ProviderError> {
        fetch(&self.client, ctx, decode(TYPE_NAME, state)?).await
    }

    async fn update(
        &self,
        _ctx: &CallContext,
        _prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        warn!("a project cannot be updated through the CircleCI API");
        Ok(planned)
    }

    async fn delete(&self, _ctx: &CallContext, state: Value) -> Result<(), ProviderError> {
        let slug = config_str(&state, "slug").unwrap_or_default();
        warn!(%slug, "a project cannot be deleted through the CircleCI API; removing it from state only");
        Ok(())
    }
}

pub struct ProjectDataSource {
    client: Arc<CircleciClient>,
}

impl ProjectDataSource {
    pub fn new(client: Arc<CircleciClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DataSource for ProjectDataSource {
    async fn read(&self, ctx: &CallContext, config: Value) -> Result<Value, ProviderError> {
        fetch(&self.client, ctx, decode(TYPE_NAME, config)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::test_support::registry_for;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn project_body() -> Value {
        json!({
            "slug": "gh/acme/api",
            "name": "api",
            "id": "p-123",
            "organization_name": "acme",
            "organization_slug": "gh/acme",
            "organization_id": "o-1",
            "vcs_info": {
                "vcs_url": "https://github.com/acme/api",
                "provider": "GitHub",
                "default_branch": "main"
            }
        })
    }

    #[tokio::test]
    async fn test_create_follows_then_reads() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1.1/project/gh/acme/api/follow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"following": true})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/project/gh/acme/api"))
            .respond_with(ResponseTemplate::new(200).set_body_json(project_body()))
            .expect(1)
            .mount(&server)
            .await;

        let registry = registry_for(&server);
        let state = registry
            .resource(TYPE_NAME)
            .unwrap()
            .create(&CallContext::background(), json!({"slug": "gh/acme/api", "id": null}))
            .await
            .unwrap();

        assert_eq!(state["id"], "p-123");
        assert_eq!(state["vcs_provider"], "GitHub");
        assert_eq!(state["vcs_default_branch"], "main");
        assert_eq!(state["organization_slug"], "gh/acme");
    }

    #[tokio::test]
    async fn test_read_missing_project() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/project/gh/acme/gone"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"message": "Project not found"})),
            )
            .mount(&server)
            .await;

        let err = registry_for(&server)
            .resource(TYPE_NAME)
            .unwrap()
            .read(&CallContext::background(), json!({"slug": "gh/acme/gone"}))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("Project not found"));
    }

    #[tokio::test]
    async fn test_delete_is_state_only() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        registry_for(&server)
            .resource(TYPE_NAME)
            .unwrap()
            .delete(&CallContext::background(), json!({"slug": "gh/acme/api"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_data_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/project/gh/acme/api"))
            .respond_with(ResponseTemplate::new(200).set_body_json(project_body()))
            .mount(&server)
            .await;

        let state = registry_for(&server)
            .data_source(TYPE_NAME)
            .unwrap()
            .read(&CallContext::background(), json!({"slug": "gh/acme/api"}))
            .await
            .unwrap();
        assert_eq!(state["name"], "api");
        assert_eq!(state["vcs_url"], "https://github.com/acme/api");
    }
}
