use super::client::{ChatTransport, UpstreamReply};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Scripted reply for [`MockTransport`].
#[derive(Debug, Clone)]
pub enum MockReply {
    Reply(UpstreamReply),
    NetworkError(String),
}

/// In-memory transport returning scripted replies in order.
///
/// Replies are consumed per call; once the script runs out the last reply
/// repeats. Every payload is recorded together with the (tokio) time it was
/// received, so tests can assert on retry spacing.
#[derive(Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<VecDeque<MockReply>>>,
    last: Arc<Mutex<Option<MockReply>>>,
    calls: Arc<Mutex<Vec<(Instant, Value)>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, reply: UpstreamReply) -> Self {
        self.script.lock().unwrap().push_back(MockReply::Reply(reply));
        self
    }

    /// Successful reply whose first choice carries `content`.
    pub fn with_text(self, content: &str) -> Self {
        self.with_reply(UpstreamReply::new(
            200,
            json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] }),
        ))
    }

    pub fn with_status(self, status: u16, body: Value) -> Self {
        self.with_reply(UpstreamReply::new(status, body))
    }

    pub fn with_rate_limit(self, retry_after: Option<Duration>) -> Self {
        let reply = UpstreamReply::new(429, json!({ "error": { "message": "Rate limited" } }));
        self.with_reply(match retry_after {
            Some(delay) => reply.with_retry_after(delay),
            None => reply,
        })
    }

    pub fn with_network_error(self, message: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(MockReply::NetworkError(message.to_string()));
        self
    }

    pub fn get_call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Payloads received so far, in call order.
    pub fn payloads(&self) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Elapsed time between consecutive calls.
    pub fn call_gaps(&self) -> Vec<Duration> {
        let calls = self.calls.lock().unwrap();
        calls
            .windows(2)
            .map(|pair| pair[1].0.duration_since(pair[0].0))
            .collect()
    }

    /// Model identifiers requested so far, in call order.
    pub fn models(&self) -> Vec<String> {
        self.payloads()
            .iter()
            .map(|p| p["model"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn post_chat(&self, payload: &Value) -> Result<UpstreamReply> {
        self.calls
            .lock()
            .unwrap()
            .push((Instant::now(), payload.clone()));

        let next = {
            let mut script = self.script.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            match script.pop_front() {
                Some(reply) => {
                    *last = Some(reply.clone());
                    Some(reply)
                }
                None => last.clone(),
            }
        };

        match next {
            Some(MockReply::Reply(reply)) => Ok(reply),
            Some(MockReply::NetworkError(message)) => Err(Error::Upstream(message)),
            None => Ok(UpstreamReply::new(
                200,
                json!({ "choices": [{ "message": { "role": "assistant", "content": "mock reply" } }] }),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_default_reply() {
        let transport = MockTransport::new();
        let reply = transport.post_chat(&json!({ "model": "m" })).await.unwrap();
        assert_eq!(reply.status, 200);
        assert_eq!(transport.get_call_count(), 1);
        assert_eq!(transport.models(), vec!["m"]);
    }

    #[tokio::test]
    async fn test_mock_transport_replays_script_then_repeats_last() {
        let transport = MockTransport::new()
            .with_rate_limit(None)
            .with_text("done");

        assert_eq!(transport.post_chat(&json!({})).await.unwrap().status, 429);
        assert_eq!(transport.post_chat(&json!({})).await.unwrap().status, 200);
        assert_eq!(transport.post_chat(&json!({})).await.unwrap().status, 200);
        assert_eq!(transport.get_call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_transport_network_error() {
        let transport = MockTransport::new().with_network_error("connection refused");
        let err = transport.post_chat(&json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Upstream(_)));
    }
}
