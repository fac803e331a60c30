//! Provider configuration.
//!
//! Values come from the provider configuration block first, then from
//! environment variables, then from built-in defaults:
//!
//! | attribute           | environment              | default               |
//! |---------------------|--------------------------|-----------------------|
//! | `api_token`         | `CIRCLE_TOKEN`           | (required)            |
//! | `hostname`          | `CIRCLE_HOSTNAME`        | `circleci.com`        |
//! | `runner_hostname`   | `CIRCLE_RUNNER_HOSTNAME` | `runner.circleci.com` |
//! | `retry.enabled`     | `CIRCLE_RETRY_ENABLED`   | `true`                |
//! | `retry.max_retries` | `CIRCLE_MAX_RETRIES`     | `3`                   |

use reqwest::header::HeaderValue;
use serde::Deserialize;
use url::Url;

use crate::retry::{RetryPolicy, DEFAULT_MAX_RETRIES};
use crate::schema::{Attribute, Block, Diagnostic, DiagnosticSeverity, NestedBlock, Schema};

/// Environment variable holding the API token.
pub const ENV_TOKEN: &str = "CIRCLE_TOKEN";
/// Environment variable holding the API hostname.
pub const ENV_HOSTNAME: &str = "CIRCLE_HOSTNAME";
/// Environment variable holding the runner API hostname.
pub const ENV_RUNNER_HOSTNAME: &str = "CIRCLE_RUNNER_HOSTNAME";
/// Environment variable toggling rate-limit retries.
pub const ENV_RETRY_ENABLED: &str = "CIRCLE_RETRY_ENABLED";
/// Environment variable holding the retry limit.
pub const ENV_MAX_RETRIES: &str = "CIRCLE_MAX_RETRIES";

/// Hostname used when none is configured.
pub const DEFAULT_HOSTNAME: &str = "circleci.com";
/// Runner API hostname used when none is configured.
pub const DEFAULT_RUNNER_HOSTNAME: &str = "runner.circleci.com";

/// The provider configuration block as written by the user.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    api_token: Option<String>,
    hostname: Option<String>,
    runner_hostname: Option<String>,
    retry: Option<RawRetry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawRetry {
    enabled: Option<bool>,
    max_retries: Option<i64>,
}

/// Fully resolved provider configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    /// Token sent in the `Circle-Token` header.
    pub api_token: String,
    /// Root URL of the CircleCI API host.
    pub hostname: Url,
    /// Root URL of the runner API host.
    pub runner_hostname: Url,
    /// Rate-limit retry policy shared by every client.
    pub retry: RetryPolicy,
}

/// A successful resolution plus any warnings it produced.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// The configuration.
    pub config: ProviderConfig,
    /// Warning diagnostics.
    pub warnings: Vec<Diagnostic>,
}

impl ProviderConfig {
    /// Resolve `config` against the process environment.
    pub fn from_value(config: &serde_json::Value) -> Result<Resolved, Vec<Diagnostic>> {
        Self::resolve(config, |name| std::env::var(name).ok())
    }

    /// Resolve `config`, looking environment variables up with `env`.
    ///
    /// Returns every diagnostic on failure, warnings included.
    pub fn resolve<F>(config: &serde_json::Value, env: F) -> Result<Resolved, Vec<Diagnostic>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = if config.is_null() {
            RawConfig::default()
        } else {
            serde_json::from_value(config.clone()).map_err(|e| {
                vec![Diagnostic::error("Invalid provider configuration").with_detail(e.to_string())]
            })?
        };

        let lookup = |value: Option<String>, var: &str| -> Option<String> {
            non_empty(value).or_else(|| non_empty(env(var)))
        };

        let mut diagnostics = Vec::new();

        let api_token = match lookup(raw.api_token, ENV_TOKEN) {
            Some(token) if HeaderValue::from_str(&token).is_err() => {
                diagnostics.push(
                    Diagnostic::error("Invalid CircleCI API token")
                        .with_detail("The token contains characters that cannot be sent in an HTTP header.")
                        .with_attribute("api_token"),
                );
                None
            }
            Some(token) => Some(token),
            None => {
                diagnostics.push(
                    Diagnostic::error("Missing CircleCI API token")
                        .with_detail(format!(
                            "Set the api_token attribute of the provider block or the {ENV_TOKEN} environment variable."
                        ))
                        .with_attribute("api_token"),
                );
                None
            }
        };

        let hostname = match lookup(raw.hostname, ENV_HOSTNAME) {
            Some(host) => host,
            None => {
                diagnostics.push(
                    Diagnostic::warning("Missing CircleCI API hostname configuration")
                        .with_detail(format!(
                            "Neither the hostname attribute nor {ENV_HOSTNAME} is set. Using default: {DEFAULT_HOSTNAME}"
                        ))
                        .with_attribute("hostname"),
                );
                DEFAULT_HOSTNAME.to_string()
            }
        };
        let hostname = parse_host(&hostname, "hostname", &mut diagnostics);

        let runner_hostname = lookup(raw.runner_hostname, ENV_RUNNER_HOSTNAME)
            .unwrap_or_else(|| DEFAULT_RUNNER_HOSTNAME.to_string());
        let runner_hostname = parse_host(&runner_hostname, "runner_hostname", &mut diagnostics);

        let retry = raw.retry.unwrap_or_default();
        let enabled = match retry.enabled {
            Some(enabled) => enabled,
            None => match non_empty(env(ENV_RETRY_ENABLED)) {
                Some(value) => parse_bool(&value).unwrap_or_else(|| {
                    diagnostics.push(
                        Diagnostic::error("Invalid retry flag")
                            .with_detail(format!("{ENV_RETRY_ENABLED}={value} is not a boolean"))
                            .with_attribute("retry.enabled"),
                    );
                    true
                }),
                None => true,
            },
        };

        let max_retries = match retry.max_retries {
            Some(value) => value.to_string(),
            None => non_empty(env(ENV_MAX_RETRIES)).unwrap_or_else(|| DEFAULT_MAX_RETRIES.to_string()),
        };
        let max_retries = match max_retries.trim().parse::<u32>() {
            Ok(n) => n,
            Err(_) => {
                diagnostics.push(
                    Diagnostic::error("Invalid retry limit")
                        .with_detail(format!(
                            "max_retries must be a non-negative integer, got {max_retries}"
                        ))
                        .with_attribute("retry.max_retries"),
                );
                DEFAULT_MAX_RETRIES
            }
        };

        let failed = diagnostics
            .iter()
            .any(|d| d.severity == DiagnosticSeverity::Error);
        match (api_token, hostname, runner_hostname) {
            (Some(api_token), Some(hostname), Some(runner_hostname)) if !failed => Ok(Resolved {
                config: ProviderConfig {
                    api_token,
                    hostname,
                    runner_hostname,
                    retry: RetryPolicy::new(enabled, max_retries),
                },
                warnings: diagnostics,
            }),
            _ => Err(diagnostics),
        }
    }

    /// Base URL of the v2 API.
    pub fn core_url(&self) -> Result<Url, url::ParseError> {
        self.hostname.join("api/v2/")
    }

    /// Base URL of the v1.1 API.
    pub fn legacy_url(&self) -> Result<Url, url::ParseError> {
        self.hostname.join("api/v1.1/")
    }

    /// Base URL of the runner API.
    pub fn runner_url(&self) -> Result<Url, url::ParseError> {
        self.runner_hostname.join("api/v3/")
    }
}

/// Schema of the provider configuration block.
pub fn schema() -> Schema {
    Schema::v0()
        .with_attribute(
            "api_token",
            Attribute::optional_string()
                .sensitive()
                .with_description(format!("CircleCI API token. Falls back to {ENV_TOKEN}.")),
        )
        .with_attribute(
            "hostname",
            Attribute::optional_string().with_description(format!(
                "CircleCI API host. Falls back to {ENV_HOSTNAME}, then {DEFAULT_HOSTNAME}."
            )),
        )
        .with_attribute(
            "runner_hostname",
            Attribute::optional_string().with_description(format!(
                "Runner API host. Falls back to {ENV_RUNNER_HOSTNAME}, then {DEFAULT_RUNNER_HOSTNAME}."
            )),
        )
        .with_block(
            "retry",
            NestedBlock::single(
                Block::new()
                    .with_attribute(
                        "enabled",
                        Attribute::optional_bool()
                            .with_description("Retry requests rate limited with HTTP 429."),
                    )
                    .with_attribute(
                        "max_retries",
                        Attribute::optional_int64()
                            .with_description("Retries after the first attempt. Defaults to 3."),
                    ),
            ),
        )
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Turn `host` or `scheme://host[:port]` into a root URL ending in `/`.
fn parse_host(host: &str, attribute: &str, diagnostics: &mut Vec<Diagnostic>) -> Option<Url> {
    let host = host.trim();
    let candidate = if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{host}")
    };
    match Url::parse(&candidate) {
        Ok(mut url) => {
            if !url.path().ends_with('/') {
                let path = format!("{}/", url.path());
                url.set_path(&path);
            }
            Some(url)
        }
        Err(e) => {
            diagnostics.push(
                Diagnostic::error(format!("Invalid {attribute}"))
                    .with_detail(format!("{host}: {e}"))
                    .with_attribute(attribute),
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_explicit_config_wins() {
        let resolved = ProviderConfig::resolve(
            &json!({
                "api_token": "from-config",
                "hostname": "circleci.example.com",
                "retry": {"enabled": false, "max_retries": 7}
            }),
            env(&[
                (ENV_TOKEN, "from-env"),
                (ENV_HOSTNAME, "env.example.com"),
                (ENV_RETRY_ENABLED, "true"),
                (ENV_MAX_RETRIES, "1"),
            ]),
        )
        .unwrap();

        assert!(resolved.warnings.is_empty());
        let config = resolved.config;
        assert_eq!(config.api_token, "from-config");
        assert_eq!(config.hostname.as_str(), "https://circleci.example.com/");
        assert_eq!(config.retry, RetryPolicy::new(false, 7));
    }

    #[test]
    fn test_environment_fallback() {
        let resolved = ProviderConfig::resolve(
            &json!({"api_token": ""}),
            env(&[
                (ENV_TOKEN, "from-env"),
                (ENV_HOSTNAME, "http://127.0.0.1:8080"),
                (ENV_RUNNER_HOSTNAME, "http://127.0.0.1:8081"),
                (ENV_RETRY_ENABLED, "false"),
                (ENV_MAX_RETRIES, "5"),
            ]),
        )
        .unwrap();

        let config = resolved.config;
        assert_eq!(config.api_token, "from-env");
        assert_eq!(config.core_url().unwrap().as_str(), "http://127.0.0.1:8080/api/v2/");
        assert_eq!(
            config.runner_url().unwrap().as_str(),
            "http://127.0.0.1:8081/api/v3/"
        );
        assert!(!config.retry.enabled);
        assert_eq!(config.retry.max_retries, 5);
    }

    #[test]
    fn test_defaults_warn_about_hostname() {
        let resolved = ProviderConfig::resolve(&json!({"api_token": "t"}), env(&[])).unwrap();

        assert_eq!(resolved.warnings.len(), 1);
        assert_eq!(resolved.warnings[0].severity, DiagnosticSeverity::Warning);
        assert_eq!(resolved.warnings[0].attribute.as_deref(), Some("hostname"));

        let config = resolved.config;
        assert_eq!(config.core_url().unwrap().as_str(), "https://circleci.com/api/v2/");
        assert_eq!(
            config.legacy_url().unwrap().as_str(),
            "https://circleci.com/api/v1.1/"
        );
        assert_eq!(
            config.runner_url().unwrap().as_str(),
            "https://runner.circleci.com/api/v3/"
        );
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_missing_token_is_an_error() {
        let diagnostics = ProviderConfig::resolve(&serde_json::Value::Null, env(&[])).unwrap_err();

        let error = diagnostics
            .iter()
            .find(|d| d.severity == DiagnosticSeverity::Error)
            .unwrap();
        assert_eq!(error.summary, "Missing CircleCI API token");
        assert_eq!(error.attribute.as_deref(), Some("api_token"));
    }

    #[test]
    fn test_token_must_fit_in_a_header() {
        let diagnostics = ProviderConfig::resolve(
            &json!({"api_token": "line\nbreak", "hostname": "circleci.com"}),
            env(&[]),
        )
        .unwrap_err();

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, DiagnosticSeverity::Error);
        assert_eq!(diagnostics[0].summary, "Invalid CircleCI API token");
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("api_token"));
    }

    #[test]
    fn test_invalid_retry_settings() {
        let diagnostics = ProviderConfig::resolve(
            &json!({"api_token": "t", "hostname": "circleci.com", "retry": {"max_retries": -1}}),
            env(&[]),
        )
        .unwrap_err();
        assert_eq!(
            diagnostics[0].attribute.as_deref(),
            Some("retry.max_retries")
        );

        let diagnostics = ProviderConfig::resolve(
            &json!({"api_token": "t", "hostname": "circleci.com"}),
            env(&[(ENV_RETRY_ENABLED, "sometimes")]),
        )
        .unwrap_err();
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("retry.enabled"));
    }

    #[test]
    fn test_malformed_block() {
        let diagnostics =
            ProviderConfig::resolve(&json!({"api_token": 42}), env(&[])).unwrap_err();
        assert_eq!(diagnostics[0].summary, "Invalid provider configuration");
    }

    #[test]
    fn test_host_keeps_path_prefix() {
        let resolved = ProviderConfig::resolve(
            &json!({"api_token": "t", "hostname": "https://proxy.internal/circleci"}),
            env(&[]),
        )
        .unwrap();
        assert_eq!(
            resolved.config.core_url().unwrap().as_str(),
            "https://proxy.internal/circleci/api/v2/"
        );
    }

    #[test]
    fn test_schema_marks_token_sensitive() {
        let schema = schema();
        assert!(schema.block.attributes["api_token"].flags.sensitive);
        assert!(schema.block.blocks.contains_key("retry"));
    }
}
