//! `circleci_schedule`: a scheduled pipeline trigger.
//!
//! Users write pipeline parameters as a JSON object string and pick the ref
//! with `branch` or `tag`. The API wants a single `parameters` object with the
//! ref merged in, and reports it back the same way, so both directions split
//! or merge those two keys.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{config_str, decode, encode, Resource};
use crate::api::models::{Schedule, ScheduleRequest, Timetable};
use crate::api::CircleciClient;
use crate::context::CallContext;
use crate::error::ProviderError;
use crate::schema::{Attribute, AttributeFlags, AttributeType, Block, Diagnostic, NestedBlock, Schema};

pub const TYPE_NAME: &str = "circleci_schedule";

const ACTORS: &[&str] = &["current", "system"];

const DAYS_OF_WEEK: &[&str] = &["MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

const MONTHS: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

fn list(element: AttributeType, flags: AttributeFlags) -> Attribute {
    Attribute::new(AttributeType::list(element), flags)
}

pub fn schema() -> Schema {
    let timetable = Block::new()
        .with_description("When the schedule triggers")
        .with_attribute(
            "per_hour",
            Attribute::new(AttributeType::Int64, AttributeFlags::required())
                .with_description("Triggers per hour, 1 to 60"),
        )
        .with_attribute(
            "hours_of_day",
            list(AttributeType::Int64, AttributeFlags::required())
                .with_description("Hours of the day, 0 to 23"),
        )
        .with_attribute(
            "days_of_week",
            list(AttributeType::String, AttributeFlags::optional())
                .with_description("Days of the week; exclusive with `days_of_month`"),
        )
        .with_attribute(
            "days_of_month",
            list(AttributeType::Int64, AttributeFlags::optional())
                .with_description("Days of the month, 1 to 31"),
        )
        .with_attribute(
            "months",
            list(AttributeType::String, AttributeFlags::optional())
                .with_description("Months; all months when unset"),
        );

    Schema::v0()
        .with_description("Manages a project's schedule")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("created_at", Attribute::computed_string())
        .with_attribute("updated_at", Attribute::computed_string())
        .with_attribute("project_slug", Attribute::required_string().with_force_new())
        .with_attribute("name", Attribute::required_string())
        .with_attribute("description", Attribute::required_string())
        .with_attribute(
            "actor",
            Attribute::required_string()
                .with_description("Author of the scheduled pipelines: `current` or `system`"),
        )
        .with_attribute(
            "branch",
            Attribute::optional_string().with_description("Branch to build; exclusive with `tag`"),
        )
        .with_attribute(
            "tag",
            Attribute::optional_string().with_description("Tag to build; exclusive with `branch`"),
        )
        .with_attribute(
            "parameters",
            Attribute::optional_string().with_description("Pipeline parameters as a JSON object"),
        )
        .with_block("timetable", NestedBlock::required(timetable))
}

pub fn validate(config: &Value) -> Vec<Diagnostic> {
    let mut diags = Vec::new();

    match (config_str(config, "branch"), config_str(config, "tag")) {
        (Some(_), Some(_)) => diags.push(
            Diagnostic::error("Only one of `branch` or `tag` may be set").with_attribute("branch"),
        ),
        (None, None) => diags.push(
            Diagnostic::error("One of `branch` or `tag` must be set").with_attribute("branch"),
        ),
        _ => {}
    }

    if let Some(actor) = config_str(config, "actor") {
        if !ACTORS.contains(&actor) {
            diags.push(
                Diagnostic::error(format!("Invalid actor `{actor}`"))
                    .with_detail("Expected `current` or `system`")
                    .with_attribute("actor"),
            );
        }
    }

    if let Some(raw) = config_str(config, "parameters") {
        if let Err(err) = parse_parameters(Some(raw)) {
            diags.push(
                Diagnostic::error("Invalid pipeline parameters")
                    .with_detail(err.message())
                    .with_attribute("parameters"),
            );
        }
    }

    if let Some(timetable) = config.get("timetable").filter(|t| t.is_object()) {
        validate_timetable(timetable, &mut diags);
    }
    diags
}

fn validate_timetable(timetable: &Value, diags: &mut Vec<Diagnostic>) {
    let ints = |key: &str| -> Vec<i64> {
        timetable
            .get(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default()
    };
    let strings = |key: &str| -> Vec<String> {
        timetable
            .get(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    };
    let mut fail = |attribute: &str, summary: String| {
        diags.push(Diagnostic::error(summary).with_attribute(format!("timetable.{attribute}")));
    };

    if let Some(per_hour) = timetable.get("per_hour").and_then(Value::as_i64) {
        if !(1..=60).contains(&per_hour) {
            fail("per_hour", format!("per_hour must be between 1 and 60, got {per_hour}"));
        }
    }
    for hour in ints("hours_of_day") {
        if !(0..=23).contains(&hour) {
            fail("hours_of_day", format!("hour {hour} is not between 0 and 23"));
        }
    }
    for day in ints("days_of_month") {
        if !(1..=31).contains(&day) {
            fail("days_of_month", format!("day {day} is not between 1 and 31"));
        }
    }
    for day in strings("days_of_week") {
        if !DAYS_OF_WEEK.contains(&day.as_str()) {
            fail("days_of_week", format!("unknown day of week `{day}`"));
        }
    }
    for month in strings("months") {
        if !MONTHS.contains(&month.as_str()) {
            fail("months", format!("unknown month `{month}`"));
        }
    }
    if ints("days_of_month").is_empty() == strings("days_of_week").is_empty() {
        fail(
            "days_of_week",
            "Exactly one of `days_of_week` or `days_of_month` must be set".to_string(),
        );
    }
}

/// Parse the user's parameter string. Absent or blank means no parameters.
fn parse_parameters(raw: Option<&str>) -> Result<Map<String, Value>, ProviderError> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(Map::new()),
        Some(raw) => raw,
    };
    match serde_json::from_str(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ProviderError::Validation(
            "parameters must be a JSON object".to_string(),
        )),
        Err(err) => Err(ProviderError::Validation(format!(
            "parameters are not valid JSON: {err}"
        ))),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct TimetableState {
    per_hour: i64,
    hours_of_day: Vec<i64>,
    days_of_week: Option<Vec<String>>,
    days_of_month: Option<Vec<i64>>,
    months: Option<Vec<String>>,
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

impl From<Timetable> for TimetableState {
    fn from(t: Timetable) -> Self {
        Self {
            per_hour: t.per_hour,
            hours_of_day: t.hours_of_day,
            days_of_week: non_empty(t.days_of_week),
            days_of_month: non_empty(t.days_of_month),
            months: non_empty(t.months),
        }
    }
}

impl From<TimetableState> for Timetable {
    fn from(t: TimetableState) -> Self {
        Self {
            per_hour: t.per_hour,
            hours_of_day: t.hours_of_day,
            days_of_week: t.days_of_week.unwrap_or_default(),
            days_of_month: t.days_of_month.unwrap_or_default(),
            months: t.months.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct ScheduleState {
    id: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
    project_slug: String,
    name: String,
    description: String,
    actor: String,
    branch: Option<String>,
    tag: Option<String>,
    parameters: Option<String>,
    timetable: TimetableState,
}

impl ScheduleState {
    fn id(&self) -> Result<&str, ProviderError> {
        self.id
            .as_deref()
            .ok_or_else(|| ProviderError::Validation("schedule state has no id".to_string()))
    }

    fn request(&self) -> Result<ScheduleRequest, ProviderError> {
        let mut parameters = parse_parameters(self.parameters.as_deref())?;
        if let Some(branch) = self.branch.as_deref().filter(|b| !b.is_empty()) {
            parameters.insert("branch".to_string(), Value::from(branch));
        }
        if let Some(tag) = self.tag.as_deref().filter(|t| !t.is_empty()) {
            parameters.insert("tag".to_string(), Value::from(tag));
        }
        Ok(ScheduleRequest {
            name: self.name.clone(),
            description: self.description.clone(),
            attribution_actor: self.actor.clone(),
            parameters,
            timetable: self.timetable.clone().into(),
        })
    }

    /// Overwrite every attribute from the API copy.
    fn refresh(&mut self, schedule: Schedule) -> Result<(), ProviderError> {
        let mut parameters = schedule.parameters;
        let branch = take_string(&mut parameters, "branch");
        let tag = take_string(&mut parameters, "tag");
        match branch {
            Some(branch) => {
                self.branch = Some(branch);
                self.tag = None;
            }
            None => {
                self.branch = None;
                self.tag = tag;
            }
        }
        self.parameters = self.render_parameters(parameters)?;

        self.id = Some(schedule.id);
        self.created_at = Some(schedule.created_at);
        self.updated_at = Some(schedule.updated_at);
        if !schedule.project_slug.is_empty() {
            self.project_slug = schedule.project_slug;
        }
        self.name = schedule.name;
        self.description = schedule.description;
        self.actor = if schedule.actor.is_system() {
            "system"
        } else {
            "current"
        }
        .to_string();
        self.timetable = schedule.timetable.into();
        Ok(())
    }

    /// Keep the user's own string when it means the same object, so key order
    /// and whitespace never show up as drift.
    fn render_parameters(&self, remote: Map<String, Value>) -> Result<Option<String>, ProviderError> {
        let prior = parse_parameters(self.parameters.as_deref()).ok();
        if prior.as_ref() == Some(&remote) {
            return Ok(self.parameters.clone());
        }
        if remote.is_empty() {
            return Ok(self.parameters.as_ref().map(|_| "{}".to_string()));
        }
        Ok(Some(serde_json::to_string(&remote)?))
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

pub struct ScheduleResource {
    client: Arc<CircleciClient>,
}

impl ScheduleResource {
    pub fn new(client: Arc<CircleciClient>) -> Self {
        Self { client }
    }

    async fn fetch(&self, ctx: &CallContext, mut state: ScheduleState) -> Result<Value, ProviderError> {
        let id = state.id()?.to_string();
        let schedule = self
            .client
            .get_schedule(ctx, &id)
            .await
            .map_err(|err| err.into_provider_error(format!("reading schedule {id}")))?;
        state.refresh(schedule)?;
        encode(&state)
    }
}

#[async_trait]
impl Resource for ScheduleResource {
    async fn create(&self, ctx: &CallContext, planned: Value) -> Result<Value, ProviderError> {
        let mut state: ScheduleState = decode(TYPE_NAME, planned)?;
        let body = state.request()?;
        let created = self
            .client
            .create_schedule(ctx, &state.project_slug, &body)
            .await
            .map_err(|err| {
                err.into_provider_error(format!("creating schedule for {}", state.project_slug))
            })?;
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
        let mut state: ScheduleState = decode(TYPE_NAME, planned)?;
        let id = state.id()?.to_string();
        let body = state.request()?;
        let updated = self
            .client
            .update_schedule(ctx, &id, &body)
            .await
            .map_err(|err| err.into_provider_error(format!("updating schedule {id}")))?;
        state.created_at = Some(updated.created_at);
        state.updated_at = Some(updated.updated_at);
        encode(&state)
    }

    async fn delete(&self, ctx: &CallContext, state: Value) -> Result<(), ProviderError> {
        let state: ScheduleState = decode(TYPE_NAME, state)?;
        let id = state.id()?;
        self.client
            .delete_schedule(ctx, id)
            .await
            .map_err(|err| err.into_provider_error(format!("deleting schedule {id}")))
    }

    async fn import(&self, ctx: &CallContext, id: &str) -> Result<Value, ProviderError> {
        let state = ScheduleState {
            id: Some(id.to_string()),
            ..ScheduleState::default()
        };
        self.fetch(ctx, state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::SYSTEM_ACTOR_ID;
    use crate::resources::test_support::registry_for;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> Value {
        json!({
            "project_slug": "gh/acme/api",
            "name": "nightly",
            "description": "Nightly build",
            "actor": "current",
            "branch": "main",
            "parameters": "{\"deploy\": false}",
            "timetable": {
                "per_hour": 1,
                "hours_of_day": [3],
                "days_of_week": ["MON", "WED"]
            }
        })
    }

    fn api_schedule(actor: Value, parameters: Value) -> Value {
        json!({
            "id": "s1",
            "name": "nightly",
            "description": "Nightly build",
            "project-slug": "gh/acme/api",
            "actor": actor,
            "parameters": parameters,
            "timetable": {
                "per-hour": 1,
                "hours-of-day": [3],
                "days-of-week": ["MON", "WED"],
                "days-of-month": [],
                "months": []
            },
            "created-at": "2024-01-01T00:00:00Z",
            "updated-at": "2024-01-02T00:00:00Z"
        })
    }

    #[test]
    fn test_validate_accepts_config() {
        assert!(validate(&config()).is_empty());
    }

    #[test]
    fn test_validate_ref_and_parameters() {
        let mut both = config();
        both["tag"] = json!("v1");
        assert_eq!(validate(&both).len(), 1);

        let mut neither = config();
        neither["branch"] = Value::Null;
        assert_eq!(validate(&neither).len(), 1);

        let mut bad_json = config();
        bad_json["parameters"] = json!("{not json");
        let diags = validate(&bad_json);
        assert_eq!(diags[0].attribute.as_deref(), Some("parameters"));

        let mut array = config();
        array["parameters"] = json!("[1, 2]");
        assert_eq!(validate(&array).len(), 1);
    }

    #[test]
    fn test_validate_timetable() {
        let mut cfg = config();
        cfg["timetable"] = json!({
            "per_hour": 61,
            "hours_of_day": [24],
            "days_of_week": ["FUNDAY"],
            "months": ["JANUARY"]
        });
        let attrs: Vec<_> = validate(&cfg)
            .into_iter()
            .filter_map(|d| d.attribute)
            .collect();
        assert_eq!(
            attrs,
            vec![
                "timetable.per_hour",
                "timetable.hours_of_day",
                "timetable.days_of_week",
                "timetable.months"
            ]
        );

        let mut both = config();
        both["timetable"]["days_of_month"] = json!([1]);
        assert_eq!(validate(&both).len(), 1);
    }

    #[test]
    fn test_request_merges_ref_into_parameters() {
        let state: ScheduleState = decode(TYPE_NAME, config()).unwrap();
        let body = serde_json::to_value(state.request().unwrap()).unwrap();

        assert_eq!(body["parameters"], json!({"deploy": false, "branch": "main"}));
        assert_eq!(body["attribution-actor"], "current");
        assert_eq!(body["timetable"]["days-of-month"], json!([]));
        assert_eq!(body["timetable"]["months"], json!([]));
    }

    #[test]
    fn test_request_rejects_bad_parameters() {
        let mut cfg = config();
        cfg["parameters"] = json!("\"just a string\"");
        let state: ScheduleState = decode(TYPE_NAME, cfg).unwrap();
        assert!(matches!(state.request(), Err(ProviderError::Validation(_))));
    }

    #[test]
    fn test_refresh_splits_parameters() {
        let mut state: ScheduleState = decode(TYPE_NAME, config()).unwrap();
        let schedule: Schedule = serde_json::from_value(api_schedule(
            json!({"id": "u1", "login": "octocat", "name": "Octo"}),
            json!({"branch": "main", "deploy": false}),
        ))
        .unwrap();
        state.refresh(schedule).unwrap();

        assert_eq!(state.branch.as_deref(), Some("main"));
        assert_eq!(state.tag, None);
        assert_eq!(state.parameters.as_deref(), Some("{\"deploy\": false}"));
        assert_eq!(state.actor, "current");
        assert_eq!(state.timetable.days_of_month, None);
        assert_eq!(state.timetable.months, None);
    }

    #[test]
    fn test_refresh_tag_and_drift() {
        let mut state = ScheduleState::default();
        let schedule: Schedule = serde_json::from_value(api_schedule(
            json!({"id": SYSTEM_ACTOR_ID, "login": "", "name": ""}),
            json!({"tag": "v1.2.0", "env": "prod"}),
        ))
        .unwrap();
        state.refresh(schedule).unwrap();

        assert_eq!(state.branch, None);
        assert_eq!(state.tag.as_deref(), Some("v1.2.0"));
        assert_eq!(state.parameters.as_deref(), Some("{\"env\":\"prod\"}"));
        assert_eq!(state.actor, "system");
    }

    #[test]
    fn test_refresh_empty_parameters_keep_null() {
        let mut state = ScheduleState::default();
        let schedule: Schedule = serde_json::from_value(api_schedule(
            json!({"login": "system-actor"}),
            json!({"branch": "main"}),
        ))
        .unwrap();
        state.refresh(schedule).unwrap();
        assert_eq!(state.parameters, None);
    }

    #[tokio::test]
    async fn test_create_posts_merged_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/project/gh/acme/api/schedule"))
            .and(body_json(json!({
                "name": "nightly",
                "description": "Nightly build",
                "attribution-actor": "current",
                "parameters": {"deploy": false, "branch": "main"},
                "timetable": {
                    "per-hour": 1,
                    "hours-of-day": [3],
                    "days-of-week": ["MON", "WED"],
                    "days-of-month": [],
                    "months": []
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(api_schedule(
                json!({"id": "u1", "login": "octocat", "name": "Octo"}),
                json!({"branch": "main", "deploy": false}),
            )))
            .expect(1)
            .mount(&server)
            .await;

        let state = registry_for(&server)
            .resource(TYPE_NAME)
            .unwrap()
            .create(&CallContext::background(), config())
            .await
            .unwrap();
        assert_eq!(state["id"], "s1");
        assert_eq!(state["updated_at"], "2024-01-02T00:00:00Z");
        assert_eq!(state["parameters"], "{\"deploy\": false}");
    }

    #[tokio::test]
    async fn test_update_and_import() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/v2/schedule/s1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(api_schedule(
                json!({"login": "system-actor"}),
                json!({"branch": "main"}),
            )))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/schedule/s1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(api_schedule(
                json!({"login": "system-actor"}),
                json!({"branch": "main"}),
            )))
            .expect(1)
            .mount(&server)
            .await;

        let registry = registry_for(&server);
        let resource = registry.resource(TYPE_NAME).unwrap();
        let ctx = CallContext::background();

        let mut planned = config();
        planned["id"] = json!("s1");
        planned["actor"] = json!("system");
        let state = resource.update(&ctx, config(), planned).await.unwrap();
        assert_eq!(state["actor"], "system");

        let imported = resource.import(&ctx, "s1").await.unwrap();
        assert_eq!(imported["project_slug"], "gh/acme/api");
        assert_eq!(imported["actor"], "system");
        assert_eq!(imported["branch"], "main");
        assert_eq!(imported["timetable"]["days_of_week"], json!(["MON", "WED"]));
    }
}
