use anyhow::Context;
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, ORIGIN};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::aggregate::Granularity;
use crate::config::Config;
use crate::error::ApiError;
use crate::models::{
    AnalyticsResponse, EntryLogsResponse, LogFilters, RecordFilters, ResultsResponse,
    TargetRequest, TargetResponse,
};
use crate::upload::{UploadBackend, UploadTarget};

const MAX_ERROR_CHARS: usize = 300;

/// Shape a response payload arrived in.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// `{ "statusCode": .., "body": "<json>" | {..} }` passed through the gateway.
    ProxyWrapped(Value),
    Direct(Value),
    DataWrapped(Value),
}

impl Envelope {
    pub fn detect(value: Value, expected_key: &str) -> Result<Self, ApiError> {
        let Value::Object(mut map) = value else {
            return Ok(Envelope::Direct(value));
        };

        if map.contains_key(expected_key) {
            return Ok(Envelope::Direct(Value::Object(map)));
        }

        if let Some(body) = map.remove("body") {
            let inner = match body {
                Value::String(text) if text.trim().is_empty() => Value::Null,
                Value::String(text) => serde_json::from_str(&text)?,
                other => other,
            };

            let code = map.get("statusCode").and_then(Value::as_u64).unwrap_or(200);
            if code >= 400 {
                let status = u16::try_from(code)
                    .ok()
                    .and_then(|code| StatusCode::from_u16(code).ok())
                    .ok_or_else(|| ApiError::Envelope(format!("invalid statusCode {code}")))?;
                return Err(ApiError::Status {
                    status,
                    message: message_from_value(&inner).unwrap_or_else(|| status.to_string()),
                });
            }

            return Ok(Envelope::ProxyWrapped(inner));
        }

        match map.remove("data") {
            Some(Value::Array(items)) => {
                let mut wrapped = Map::new();
                wrapped.insert(expected_key.to_string(), Value::Array(items));
                Ok(Envelope::DataWrapped(Value::Object(wrapped)))
            }
            Some(data @ Value::Object(_)) => Ok(Envelope::DataWrapped(data)),
            Some(other) => {
                map.insert("data".to_string(), other);
                Ok(Envelope::Direct(Value::Object(map)))
            }
            None => Ok(Envelope::Direct(Value::Object(map))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::ProxyWrapped(_) => "proxy-wrapped",
            Envelope::Direct(_) => "direct",
            Envelope::DataWrapped(_) => "data-wrapped",
        }
    }

    pub fn into_payload(self) -> Value {
        match self {
            Envelope::ProxyWrapped(value) | Envelope::Direct(value) | Envelope::DataWrapped(value) => {
                value
            }
        }
    }
}

fn message_from_value(value: &Value) -> Option<String> {
    let map = value.as_object()?;
    ["message", "error"]
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn log_diagnostics(map: &Map<String, Value>) {
    let received = map.get("received_date").and_then(Value::as_str);
    let keys = map.get("request_body_keys").map(Value::to_string);
    if received.is_some() || keys.is_some() {
        warn!(
            received_date = received.unwrap_or("-"),
            request_body_keys = keys.as_deref().unwrap_or("-"),
            "server rejected request body"
        );
    }
}

/// Server-provided message when the error body carries one, else the raw text.
pub fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body)
        .ok()
        .map(|value| match Envelope::detect(value, "error") {
            Ok(envelope) => envelope.into_payload(),
            Err(ApiError::Status { message, .. }) => Value::String(message),
            Err(_) => Value::Null,
        });

    match parsed {
        Some(Value::String(message)) => message,
        Some(Value::Object(map)) => {
            log_diagnostics(&map);
            message_from_value(&Value::Object(map)).unwrap_or_else(|| truncate(body))
        }
        _ => truncate(body),
    }
}

fn truncate(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(MAX_ERROR_CHARS) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

async fn read_payload(url: &str, response: Response, expected_key: &str) -> Result<Value, ApiError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|err| ApiError::network(url, &err))?;

    if !status.is_success() {
        return Err(ApiError::Status {
            status,
            message: error_message(&text),
        });
    }

    let value = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text)?
    };
    let envelope = Envelope::detect(value, expected_key)?;
    debug!(url, shape = envelope.kind(), "decoded response");
    Ok(envelope.into_payload())
}

pub struct ApiClient {
    http: Client,
    base_url: String,
    origin: Option<String>,
}

impl ApiClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            origin: config.origin.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&'static str, String)],
        expected_key: &str,
    ) -> Result<T, ApiError> {
        let url = self.endpoint(path);
        debug!(%url, ?query, "GET");
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|err| ApiError::network(&url, &err))?;
        let payload = read_payload(&url, response, expected_key).await?;
        if payload.is_null() {
            return Err(ApiError::Envelope(format!("empty response from {url}")));
        }
        Ok(serde_json::from_value(payload)?)
    }

    pub async fn fetch_results(&self, filters: &RecordFilters) -> Result<ResultsResponse, ApiError> {
        let results: ResultsResponse = self
            .get_json("results", &filters.query_pairs(), "records")
            .await?;
        info!(records = results.records.len(), "fetched attendance results");
        Ok(results)
    }

    pub async fn fetch_analytics(
        &self,
        granularity: Granularity,
        filters: &RecordFilters,
    ) -> Result<AnalyticsResponse, ApiError> {
        let mut query = vec![("period", granularity.as_str().to_string())];
        query.extend(filters.query_pairs());
        let analytics: AnalyticsResponse = self.get_json("analytics", &query, "analytics").await?;
        info!(buckets = analytics.analytics.len(), %granularity, "fetched server analytics");
        Ok(analytics)
    }

    pub async fn fetch_entry_logs(&self, filters: &LogFilters) -> Result<EntryLogsResponse, ApiError> {
        let logs: EntryLogsResponse = self
            .get_json("entry-logs", &filters.query_pairs(), "logs")
            .await?;
        info!(logs = logs.logs.len(), "fetched entry logs");
        Ok(logs)
    }
}

impl UploadBackend for ApiClient {
    async fn request_target(&self, request: &TargetRequest) -> Result<TargetResponse, ApiError> {
        let url = self.endpoint("generate-presigned-url");
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|err| ApiError::network(&url, &err))?;
        let payload = read_payload(&url, response, "presigned_url").await?;
        let target: TargetResponse = serde_json::from_value(payload)?;
        if let Some(diagnostics) = &target.debug {
            debug!(%diagnostics, "upload target diagnostics");
        }
        Ok(target)
    }

    async fn transfer(
        &self,
        target: UploadTarget,
        content_type: &str,
        payload: Bytes,
    ) -> Result<(), ApiError> {
        let UploadTarget {
            write_url,
            expected_file_name,
        } = target;
        info!(file_name = %expected_file_name, bytes = payload.len(), "transferring file");

        let mut request = self
            .http
            .put(&write_url)
            .header(CONTENT_TYPE, content_type)
            .body(payload);
        if let Some(origin) = &self.origin {
            request = request.header(ORIGIN, origin);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ApiError::network(&write_url, &err))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status,
            message: truncate(&body),
        })
    }
}
