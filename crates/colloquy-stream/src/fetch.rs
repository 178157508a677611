// Catch-up fetcher: the debate resource and its event history over HTTP.

use async_trait::async_trait;
use colloquy_core::config::ServerConfig;
use colloquy_core::protocol::DebateInfo;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Keys under which a wrapped timeline response may carry its events.
const BATCH_KEYS: [&str; 3] = ["events", "timeline", "items"];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected timeline shape from {url}")]
    Shape { url: String },

    #[error("invalid debate resource from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Unavailable(String),
}

#[async_trait]
pub trait TimelineSource: Send + Sync + 'static {
    /// Raw catch-up batch for the debate, oldest first.
    async fn fetch_timeline(&self, debate_id: &str) -> Result<Vec<Value>, FetchError>;

    async fn fetch_debate(&self, debate_id: &str) -> Result<DebateInfo, FetchError>;
}

pub struct HttpTimelineSource {
    http: reqwest::Client,
    server: ServerConfig,
}

impl HttpTimelineSource {
    pub fn new(http: reqwest::Client, server: ServerConfig) -> Self {
        Self { http, server }
    }

    async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        let http_err = |source| FetchError::Http {
            url: url.to_string(),
            source,
        };
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http_err)?;
        response.json::<Value>().await.map_err(http_err)
    }
}

#[async_trait]
impl TimelineSource for HttpTimelineSource {
    async fn fetch_timeline(&self, debate_id: &str) -> Result<Vec<Value>, FetchError> {
        let url = self.server.timeline_url(debate_id);
        let body = self.get_json(&url).await?;
        let batch = extract_batch(body).ok_or(FetchError::Shape { url })?;
        debug!(debate_id, count = batch.len(), "fetched timeline batch");
        Ok(batch)
    }

    async fn fetch_debate(&self, debate_id: &str) -> Result<DebateInfo, FetchError> {
        let url = self.server.debate_url(debate_id);
        let body = self.get_json(&url).await?;
        // Some deployments wrap the resource as `{ "debate": { ... } }`.
        let body = match body {
            Value::Object(mut map) if map.get("debate").is_some_and(Value::is_object) => {
                map.remove("debate").unwrap_or_default()
            }
            other => other,
        };
        serde_json::from_value(body).map_err(|source| FetchError::Decode { url, source })
    }
}

/// Accept either a bare array or an object wrapping the array under one of
/// the known keys.
pub fn extract_batch(body: Value) -> Option<Vec<Value>> {
    match body {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => BATCH_KEYS.iter().find_map(|key| match map.remove(*key) {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        }),
        _ => None,
    }
}
