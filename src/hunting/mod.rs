//! Defender Advanced Hunting over Microsoft Graph.
//!
//! `POST /security/runHuntingQuery` normally answers synchronously with
//! `{schema, results}`. The executor also accepts a deferred answer (a
//! `Location` header or a status URL in the body) and polls it until the
//! query completes, so callers see the same `hunt()` contract either way.
//!
//! Query lifecycle:
//!   Submitted → Polling → Completed | Failed
//!
//! A synchronous response goes straight from Submitted to Completed.

use crate::graph::client::{GraphBody, GraphClient, GraphRequest, GraphResponse};
use crate::graph::error::GraphError;
use reqwest::header::LOCATION;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

pub const HUNTING_PATH: &str = "/security/runHuntingQuery";

/// Longest lookback Advanced Hunting accepts
pub const DEFAULT_MAX_LOOKBACK_DAYS: u32 = 30;

/// Rows and column schema returned by a hunting query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HuntingResult {
    pub schema: Vec<Value>,
    pub results: Vec<Value>,
}

/// Where a submitted query currently stands
#[derive(Debug, Clone, PartialEq)]
pub enum HuntState {
    Submitted,
    Polling { url: String },
    Completed(HuntingResult),
    Failed { status: String, message: String },
}

/// Controls polling of deferred hunting queries
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Wait between consecutive status requests
    pub interval: Duration,
    /// Total time allowed from the first poll
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Runs KQL queries against Advanced Hunting
pub struct HuntingExecutor<'a> {
    client: &'a GraphClient,
    max_lookback_days: u32,
    poll: PollConfig,
}

impl<'a> HuntingExecutor<'a> {
    pub fn new(client: &'a GraphClient) -> Self {
        Self {
            client,
            max_lookback_days: DEFAULT_MAX_LOOKBACK_DAYS,
            poll: PollConfig::default(),
        }
    }

    pub fn with_max_lookback_days(mut self, days: u32) -> Self {
        self.max_lookback_days = days;
        self
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Reject bad input before anything goes over the wire
    pub fn validate(&self, kql_query: &str, lookback_days: i64) -> Result<(), GraphError> {
        if kql_query.trim().is_empty() {
            return Err(GraphError::validation("query must not be empty"));
        }
        if lookback_days < 1 || lookback_days > i64::from(self.max_lookback_days) {
            return Err(GraphError::validation(format!(
                "days must be between 1 and {}, got {}",
                self.max_lookback_days, lookback_days
            )));
        }
        Ok(())
    }

    /// Run a KQL query over the last `lookback_days` days
    pub async fn hunt(
        &self,
        kql_query: &str,
        lookback_days: i64,
    ) -> Result<HuntingResult, GraphError> {
        self.validate(kql_query, lookback_days)?;

        let body = json!({
            "Query": kql_query,
            "Timespan": format!("P{}D", lookback_days),
        });

        tracing::info!("Submitting hunting query ({} day lookback)", lookback_days);
        let response = self
            .client
            .request(&GraphRequest::post(HUNTING_PATH, body))
            .await?;

        let mut state = interpret_submit(response)?;
        let started = Instant::now();

        loop {
            state = match state {
                HuntState::Completed(result) => {
                    tracing::info!("Hunting query returned {} rows", result.results.len());
                    return Ok(result);
                }
                HuntState::Failed { status, message } => {
                    return Err(GraphError::HuntingFailed { status, message });
                }
                HuntState::Submitted => {
                    return Err(GraphError::Decode(
                        "Hunting query was accepted without results or a status URL"
                            .to_string(),
                    ));
                }
                HuntState::Polling { url } => {
                    tokio::time::sleep(self.poll.interval).await;

                    if started.elapsed() > self.poll.timeout {
                        return Err(GraphError::Timeout {
                            elapsed: started.elapsed(),
                        });
                    }

                    tracing::debug!("Polling hunting query status at {}", url);
                    let body = self.client.request(&GraphRequest::get(&url)).await?.json()?;
                    interpret_poll(body, url)?
                }
            };
        }
    }
}

/// Decide the state after the submit response
fn interpret_submit(response: GraphResponse) -> Result<HuntState, GraphError> {
    let location = response
        .headers
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let body = match response.body {
        GraphBody::Json(value) => value,
        GraphBody::Text(text) if location.is_none() => {
            return Err(GraphError::Decode(format!(
                "Hunting response is not JSON: {}",
                text
            )))
        }
        GraphBody::Text(_) => Value::Null,
    };

    if let Some(result) = completed(&body) {
        return Ok(HuntState::Completed(result));
    }
    if let Some(failed) = failed(&body) {
        return Ok(failed);
    }

    match location.or_else(|| status_url(&body)) {
        Some(url) => Ok(HuntState::Polling { url }),
        None => Ok(HuntState::Submitted),
    }
}

/// Decide the state after one poll response
fn interpret_poll(body: Value, url: String) -> Result<HuntState, GraphError> {
    if let Some(result) = completed(&body) {
        return Ok(HuntState::Completed(result));
    }
    if let Some(failed) = failed(&body) {
        return Ok(failed);
    }
    // Servers may hand out a fresh status URL while the query runs
    Ok(HuntState::Polling {
        url: status_url(&body).unwrap_or(url),
    })
}

fn completed(body: &Value) -> Option<HuntingResult> {
    let results = body.get("results")?.as_array()?.clone();
    let schema = body
        .get("schema")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    Some(HuntingResult { schema, results })
}

fn failed(body: &Value) -> Option<HuntState> {
    let status = body.get("status").and_then(Value::as_str)?;
    match status.to_ascii_lowercase().as_str() {
        "failed" | "cancelled" | "canceled" => {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("no details returned")
                .to_string();
            Some(HuntState::Failed {
                status: status.to_string(),
                message,
            })
        }
        _ => None,
    }
}

fn status_url(body: &Value) -> Option<String> {
    ["statusUrl", "@odata.id"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};
    use reqwest::StatusCode;

    fn response(status: StatusCode, headers: HeaderMap, body: Value) -> GraphResponse {
        GraphResponse {
            status,
            headers,
            body: GraphBody::Json(body),
        }
    }

    #[test]
    fn test_synchronous_response_completes() {
        let state = interpret_submit(response(
            StatusCode::OK,
            HeaderMap::new(),
            json!({
                "schema": [{"name": "DeviceName", "type": "String"}],
                "results": [{"DeviceName": "ws-01"}]
            }),
        ))
        .unwrap();

        match state {
            HuntState::Completed(result) => {
                assert_eq!(result.schema.len(), 1);
                assert_eq!(result.results, vec![json!({"DeviceName": "ws-01"})]);
            }
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    #[test]
    fn test_location_header_starts_polling() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LOCATION,
            HeaderValue::from_static("https://graph.microsoft.com/v1.0/security/hunt/ops/1"),
        );
        let state = interpret_submit(response(StatusCode::ACCEPTED, headers, Value::Null)).unwrap();
        assert_eq!(
            state,
            HuntState::Polling {
                url: "https://graph.microsoft.com/v1.0/security/hunt/ops/1".to_string()
            }
        );
    }

    #[test]
    fn test_failed_status_is_terminal() {
        let state = interpret_poll(
            json!({"status": "Failed", "error": {"message": "Query exceeded CPU quota"}}),
            "https://example/op".to_string(),
        )
        .unwrap();
        assert_eq!(
            state,
            HuntState::Failed {
                status: "Failed".to_string(),
                message: "Query exceeded CPU quota".to_string()
            }
        );
    }

    #[test]
    fn test_running_status_keeps_polling() {
        let state = interpret_poll(json!({"status": "Running"}), "https://example/op".to_string())
            .unwrap();
        assert_eq!(
            state,
            HuntState::Polling {
                url: "https://example/op".to_string()
            }
        );
    }

    #[test]
    fn test_empty_results_still_complete() {
        assert_eq!(
            completed(&json!({"results": []})),
            Some(HuntingResult::default())
        );
    }
}
