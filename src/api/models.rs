//! Wire types for the CircleCI REST APIs.
//!
//! Responses are decoded leniently: every field defaults when absent so a new
//! or missing property never fails a refresh.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Login of the actor CircleCI uses for system-attributed schedules.
pub const SYSTEM_ACTOR_LOGIN: &str = "system-actor";

/// Display name of the system actor.
pub const SYSTEM_ACTOR_NAME: &str = "Scheduled";

/// Well-known id of the system actor.
pub const SYSTEM_ACTOR_ID: &str = "d9b3fcaa-6032-405a-8c75-40079ce33c3e";

/// One page of a list endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next_page_token: None,
        }
    }
}

impl<T> Page<T> {
    /// The token for the following page, if there is one.
    pub fn next(&self) -> Option<&str> {
        self.next_page_token.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VcsInfo {
    pub vcs_url: String,
    pub provider: String,
    pub default_branch: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Project {
    pub slug: String,
    pub name: String,
    pub id: String,
    pub organization_name: String,
    pub organization_slug: String,
    pub organization_id: String,
    pub vcs_info: VcsInfo,
}

/// Project environment variable. The API masks `value` on reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CheckoutKey {
    pub public_key: String,
    #[serde(rename = "type")]
    pub key_type: String,
    pub fingerprint: String,
    pub preferred: bool,
    pub created_at: String,
}

impl CheckoutKey {
    /// Key type as users write it; the API reports user keys as
    /// `github-user-key`.
    pub fn normalized_type(&self) -> &str {
        match self.key_type.as_str() {
            "github-user-key" => "user-key",
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutKeyRequest<'a> {
    #[serde(rename = "type")]
    pub key_type: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Context {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextOwner<'a> {
    pub id: &'a str,
    #[serde(rename = "type")]
    pub owner_type: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateContextRequest<'a> {
    pub name: &'a str,
    pub owner: ContextOwner<'a>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContextEnvVar {
    pub variable: String,
    pub context_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Actor {
    pub id: String,
    pub login: String,
    pub name: String,
}

impl Actor {
    /// Whether this is CircleCI's system actor. Any one marker suffices.
    pub fn is_system(&self) -> bool {
        self.login == SYSTEM_ACTOR_LOGIN || self.name == SYSTEM_ACTOR_NAME || self.id == SYSTEM_ACTOR_ID
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Timetable {
    pub per_hour: i64,
    pub hours_of_day: Vec<i64>,
    pub days_of_week: Vec<String>,
    pub days_of_month: Vec<i64>,
    pub months: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Schedule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub project_slug: String,
    pub actor: Actor,
    pub parameters: Map<String, Value>,
    pub timetable: Timetable,
    pub created_at: String,
    pub updated_at: String,
}

/// Body of schedule create and update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScheduleRequest {
    pub name: String,
    pub description: String,
    pub attribution_actor: String,
    pub parameters: Map<String, Value>,
    pub timetable: Timetable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookScope {
    pub id: String,
    #[serde(rename = "type")]
    pub scope_type: String,
}

impl WebhookScope {
    /// Project scope, the only kind the API accepts.
    pub fn project(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scope_type: "project".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Webhook {
    pub id: String,
    pub name: String,
    pub url: String,
    pub events: Vec<String>,
    pub verify_tls: bool,
    pub signing_secret: String,
    pub scope: WebhookScope,
    pub created_at: String,
    pub updated_at: String,
}

/// Body of webhook create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WebhookRequest {
    pub name: String,
    pub url: String,
    pub events: Vec<String>,
    pub verify_tls: bool,
    pub signing_secret: String,
    pub scope: WebhookScope,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceClass {
    pub id: String,
    pub resource_class: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceClassRequest<'a> {
    pub resource_class: &'a str,
    pub description: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RunnerToken {
    pub id: String,
    pub resource_class: String,
    pub nickname: String,
    pub created_at: String,
    /// Only present in the create response.
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunnerTokenRequest<'a> {
    pub resource_class: &'a str,
    pub nickname: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_actor_any_marker() {
        let by_login = Actor {
            login: "system-actor".into(),
            ..Actor::default()
        };
        let by_name = Actor {
            name: "Scheduled".into(),
            ..Actor::default()
        };
        let by_id = Actor {
            id: SYSTEM_ACTOR_ID.into(),
            ..Actor::default()
        };
        let user = Actor {
            id: "8a3e5f7c".into(),
            login: "octocat".into(),
            name: "Octo Cat".into(),
        };

        assert!(by_login.is_system());
        assert!(by_name.is_system());
        assert!(by_id.is_system());
        assert!(!user.is_system());
    }

    #[test]
    fn test_checkout_key_decoding() {
        let key: CheckoutKey = serde_json::from_value(json!({
            "public-key": "ssh-rsa AAAA",
            "type": "github-user-key",
            "fingerprint": "c9:0b",
            "preferred": true,
            "created-at": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(key.public_key, "ssh-rsa AAAA");
        assert_eq!(key.normalized_type(), "user-key");
        assert!(key.preferred);

        let deploy = CheckoutKey {
            key_type: "deploy-key".into(),
            ..CheckoutKey::default()
        };
        assert_eq!(deploy.normalized_type(), "deploy-key");
    }

    #[test]
    fn test_schedule_request_sends_empty_lists() {
        let body = ScheduleRequest {
            name: "nightly".into(),
            description: "build".into(),
            attribution_actor: "current".into(),
            parameters: Map::new(),
            timetable: Timetable {
                per_hour: 1,
                hours_of_day: vec![3],
                ..Timetable::default()
            },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["attribution-actor"], "current");
        assert_eq!(value["timetable"]["per-hour"], 1);
        assert_eq!(value["timetable"]["months"], json!([]));
        assert_eq!(value["timetable"]["days-of-week"], json!([]));
        assert_eq!(value["timetable"]["days-of-month"], json!([]));
    }

    #[test]
    fn test_page_next_token() {
        let page: Page<Context> =
            serde_json::from_value(json!({"items": [], "next_page_token": ""})).unwrap();
        assert_eq!(page.next(), None);

        let page: Page<Context> =
            serde_json::from_value(json!({"items": [{"id": "c1"}], "next_page_token": "abc"}))
                .unwrap();
        assert_eq!(page.next(), Some("abc"));
        assert_eq!(page.items[0].id, "c1");

        let page: Page<RunnerToken> = serde_json::from_value(json!({"items": []})).unwrap();
        assert!(page.next().is_none());
    }
}
