//! TeamCity REST client
//!
//! Only the three calls needed to trigger and watch a build:
//!
//! - `GET  {base}/httpAuth/app/rest/builds?locator=buildType:{id},state:{state},count:1`
//! - `POST {base}/httpAuth/app/rest/buildQueue`
//! - `GET  {base}/httpAuth/app/rest/builds/id:{build_id}`

use std::time::Duration;

use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use dbtn_core::prelude::*;
use dbtn_core::CiConfig;

use crate::client::{CiApi, CiClientFactory};

/// Per-request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const REST_ROOT: &str = "httpAuth/app/rest";
const JSON: &str = "application/json";

/// Build states the queue check looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Queued,
    Running,
}

impl BuildState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildState::Queued => "queued",
            BuildState::Running => "running",
        }
    }
}

pub fn builds_in_state_url(config: &CiConfig, state: BuildState) -> String {
    format!(
        "{}/{}/builds?locator=buildType:{},state:{},count:1",
        config.base_url(),
        REST_ROOT,
        config.build_configuration_id.trim(),
        state.as_str()
    )
}

pub fn build_queue_url(config: &CiConfig) -> String {
    format!("{}/{}/buildQueue", config.base_url(), REST_ROOT)
}

pub fn build_url(config: &CiConfig, build_id: &str) -> String {
    format!("{}/{}/builds/id:{}", config.base_url(), REST_ROOT, build_id)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TriggerRequest<'a> {
    build_type: BuildTypeRef<'a>,
}

#[derive(Debug, Serialize)]
struct BuildTypeRef<'a> {
    id: &'a str,
}

/// JSON body for enqueueing a build of the configured build type
pub fn trigger_body(config: &CiConfig) -> Result<String> {
    let request = TriggerRequest {
        build_type: BuildTypeRef {
            id: config.build_configuration_id.trim(),
        },
    };
    Ok(serde_json::to_string(&request)?)
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    status: Option<String>,
}

/// `count` from a build list response
pub fn parse_count(body: &str) -> Option<u64> {
    serde_json::from_str::<CountResponse>(body)
        .ok()
        .map(|r| r.count)
}

/// `id` from a build queue response, as its raw JSON text.
///
/// Numbers are kept as written; strings are unquoted.
pub fn parse_build_id(body: &str) -> Result<String> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    match value.get("id") {
        Some(serde_json::Value::String(id)) => Ok(id.clone()),
        Some(serde_json::Value::Null) | None => Err(Error::ci_transport(
            "build queue response has no id",
        )),
        Some(other) => Ok(other.to_string()),
    }
}

/// `status` from a build response
pub fn parse_status(body: &str) -> Option<String> {
    serde_json::from_str::<StatusResponse>(body)
        .ok()
        .and_then(|r| r.status)
}

/// HTTP client bound to one [`CiConfig`]
#[derive(Debug, Clone)]
pub struct TeamCityClient {
    http: Client,
    config: CiConfig,
}

impl TeamCityClient {
    pub fn new(config: CiConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::ci_transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &CiConfig {
        &self.config
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header(ACCEPT, HeaderValue::from_static(JSON))
    }

    async fn is_state_active(&self, state: BuildState) -> bool {
        let url = builds_in_state_url(&self.config, state);
        let response = match self.authorized(self.http.get(&url)).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("{} check failed: {}", state.as_str(), e);
                return false;
            }
        };

        if !response.status().is_success() {
            debug!("{} check returned {}", state.as_str(), response.status());
            return false;
        }

        match response.text().await {
            Ok(body) => parse_count(&body).map(|n| n > 0).unwrap_or(false),
            Err(e) => {
                debug!("{} check body unreadable: {}", state.as_str(), e);
                false
            }
        }
    }
}

impl CiApi for TeamCityClient {
    async fn is_queued_or_running(&self) -> bool {
        let (queued, running) = tokio::join!(
            self.is_state_active(BuildState::Queued),
            self.is_state_active(BuildState::Running)
        );
        queued || running
    }

    async fn trigger_build(&self) -> Result<String> {
        let url = build_queue_url(&self.config);
        let body = trigger_body(&self.config)?;

        let response = self
            .authorized(self.http.post(&url))
            .header(reqwest::header::CONTENT_TYPE, HeaderValue::from_static(JSON))
            .body(body)
            .send()
            .await
            .map_err(|e| Error::ci_transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::ci_transport(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::ci_status(status.as_u16(), text));
        }

        let build_id = parse_build_id(&text)?;
        info!("Queued build {} for {}", build_id, self.config.build_configuration_id);
        Ok(build_id)
    }

    async fn get_build_status(&self, build_id: &str) -> Option<String> {
        let url = build_url(&self.config, build_id);
        let response = self.authorized(self.http.get(&url)).send().await.ok()?;
        if !response.status().is_success() {
            debug!("Status of build {} returned {}", build_id, response.status());
            return None;
        }
        let body = response.text().await.ok()?;
        parse_status(&body)
    }
}

/// Creates a [`TeamCityClient`] per configuration snapshot
#[derive(Debug, Clone, Default)]
pub struct TeamCityClientFactory;

impl CiClientFactory for TeamCityClientFactory {
    type Client = TeamCityClient;

    fn create(&self, config: &CiConfig) -> Result<TeamCityClient> {
        TeamCityClient::new(config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> CiConfig {
        CiConfig {
            base_url: base_url.to_string(),
            build_configuration_id: "Deploy_Production".to_string(),
            username: "svc".to_string(),
            password: "hunter2".to_string(),
        }
    }

    #[test]
    fn test_state_url() {
        let cfg = config("https://ci.example.com");
        assert_eq!(
            builds_in_state_url(&cfg, BuildState::Running),
            "https://ci.example.com/httpAuth/app/rest/builds?locator=buildType:Deploy_Production,state:running,count:1"
        );
    }

    #[test]
    fn test_trailing_slash_tolerated() {
        let cfg = config("https://ci.example.com/");
        assert_eq!(
            build_queue_url(&cfg),
            "https://ci.example.com/httpAuth/app/rest/buildQueue"
        );
        assert_eq!(
            build_url(&cfg, "4711"),
            "https://ci.example.com/httpAuth/app/rest/builds/id:4711"
        );
    }

    #[test]
    fn test_trigger_body_shape() {
        let body = trigger_body(&config("http://ci")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["buildType"]["id"], "Deploy_Production");
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count(r#"{"count":1,"build":[]}"#), Some(1));
        assert_eq!(parse_count(r#"{"count":0}"#), Some(0));
        assert_eq!(parse_count(r#"{"builds":[]}"#), None);
        assert_eq!(parse_count("<html>"), None);
    }

    #[test]
    fn test_parse_build_id_keeps_raw_text() {
        assert_eq!(
            parse_build_id(r#"{"id":4711,"state":"queued"}"#).unwrap(),
            "4711"
        );
        assert_eq!(parse_build_id(r#"{"id":"bld-9"}"#).unwrap(), "bld-9");
        assert!(parse_build_id(r#"{"state":"queued"}"#).is_err());
        assert!(parse_build_id("not json").is_err());
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(
            parse_status(r#"{"id":1,"status":"SUCCESS"}"#).as_deref(),
            Some("SUCCESS")
        );
        assert_eq!(parse_status(r#"{"id":1,"state":"queued"}"#), None);
        assert_eq!(parse_status(""), None);
    }

    #[test]
    fn test_factory_binds_config() {
        let cfg = config("http://ci");
        let client = TeamCityClientFactory.create(&cfg).unwrap();
        assert_eq!(client.config(), &cfg);
    }
}
