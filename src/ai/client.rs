use crate::config::Config;
use crate::Result;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// One raw upstream reply, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamReply {
    pub status: u16,
    /// Parsed `retry-after` header, when the provider sent one in seconds.
    pub retry_after: Option<Duration>,
    /// Response body; an empty object when the body was not valid JSON.
    pub body: Value,
}

impl UpstreamReply {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            retry_after: None,
            body,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// Performs exactly one chat-completion POST against a fixed endpoint.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn post_chat(&self, payload: &Value) -> Result<UpstreamReply>;
}

/// reqwest-backed transport for OpenAI/OpenRouter chat completions.
pub struct UpstreamClient {
    client: Client,
    endpoint: String,
    api_key: String,
    meta_headers: Vec<(String, String)>,
}

impl UpstreamClient {
    pub fn new(endpoint: String, api_key: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::new_with_client(endpoint, api_key, client))
    }

    pub fn new_with_client(endpoint: String, api_key: String, client: Client) -> Self {
        Self {
            client,
            endpoint,
            api_key,
            meta_headers: Vec::new(),
        }
    }

    /// Extra attribution headers (`HTTP-Referer`, `X-Title`) sent on every call.
    pub fn with_meta_headers(mut self, meta_headers: Vec<(String, String)>) -> Self {
        self.meta_headers = meta_headers;
        self
    }

    /// Client for the configured provider, or `None` when its key is missing.
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        let Some(api_key) = config.api_key.clone() else {
            return Ok(None);
        };
        let client = Self::new(config.upstream_url.clone(), api_key, config.request_timeout)?
            .with_meta_headers(config.meta_headers());
        Ok(Some(client))
    }
}

#[async_trait]
impl ChatTransport for UpstreamClient {
    async fn post_chat(&self, payload: &Value) -> Result<UpstreamReply> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(payload);
        for (name, value) in &self.meta_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!("Failed to send request to upstream: {}", e);
            e
        })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        let text = response.text().await?;
        let body = serde_json::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!(
                "Upstream returned non-JSON body (status {}): {}",
                status,
                e
            );
            Value::Object(Default::default())
        });

        Ok(UpstreamReply {
            status,
            retry_after,
            body,
        })
    }
}

/// Seconds form of `retry-after`; HTTP-date values are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}
