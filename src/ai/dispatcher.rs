//! Resilient "ask the model" operation.
//!
//! `send` retries rate-limited (429) replies with the configured backoff and
//! never returns an error: transport failures, cancellation and invalid
//! payloads all come back as a [`ChatResponse`] with `ok == false`.
//! `send_with_fallback` walks a list of candidate models for translation and
//! fails open by handing back the untranslated input.

use super::client::{ChatTransport, UpstreamClient};
use super::types::{ChatMessage, ChatRequest, ChatResponse, ModelCandidateList};
use crate::config::{Config, RetryPolicy};
use crate::{prompts, Error, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const RATE_LIMITED: u16 = 429;
const TRANSLATE_TEMPERATURE: f64 = 0.2;

pub struct Dispatcher {
    transport: Arc<dyn ChatTransport>,
    policy: RetryPolicy,
    fallback_attempts: u32,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn ChatTransport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            fallback_attempts: 2,
        }
    }

    /// Per-candidate attempt budget used by [`Dispatcher::send_with_fallback`].
    pub fn with_fallback_attempts(mut self, attempts: u32) -> Self {
        self.fallback_attempts = attempts.max(1);
        self
    }

    /// Dispatcher over the configured provider, or `None` when its key is missing.
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        Ok(UpstreamClient::from_config(config)?.map(|client| {
            Self::new(Arc::new(client), config.retry.clone())
                .with_fallback_attempts(config.translate_attempts)
        }))
    }

    /// Sends a typed chat request.
    pub async fn send(&self, request: &ChatRequest, cancel: &CancellationToken) -> ChatResponse {
        if let Err(e) = request.validate() {
            return ChatResponse::failure(&request.model, 400, e.to_string(), 0);
        }
        let payload = match serde_json::to_value(request) {
            Ok(payload) => payload,
            Err(e) => {
                return ChatResponse::failure(
                    &request.model,
                    500,
                    Error::from(e).to_string(),
                    0,
                )
            }
        };
        self.dispatch(&request.model, &payload, self.policy.max_attempts, cancel)
            .await
    }

    /// Sends an already-built JSON payload; it must name a `model`.
    pub async fn send_value(&self, payload: &Value, cancel: &CancellationToken) -> ChatResponse {
        let model = payload
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if model.trim().is_empty() {
            return ChatResponse::failure(model, 400, "model must not be empty", 0);
        }
        self.dispatch(model, payload, self.policy.max_attempts, cancel)
            .await
    }

    /// Translates `text` into `target_language`, trying each candidate model in
    /// order until one returns a non-empty translation.
    ///
    /// When every candidate fails the result has `ok == false` and carries the
    /// original `text` unchanged.
    pub async fn send_with_fallback(
        &self,
        text: &str,
        candidates: &ModelCandidateList,
        target_language: &str,
        cancel: &CancellationToken,
    ) -> ChatResponse {
        let system = prompts::translate_system(target_language);
        let budget = self.fallback_attempts.min(self.policy.max_attempts).max(1);
        let mut attempts = 0;
        let mut last: Option<ChatResponse> = None;

        for model in candidates.iter() {
            if cancel.is_cancelled() {
                break;
            }

            let request = ChatRequest::new(
                model,
                vec![ChatMessage::system(system.clone()), ChatMessage::user(text)],
                TRANSLATE_TEMPERATURE,
            );
            let payload = match serde_json::to_value(&request) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("Failed to encode translation request: {}", e);
                    continue;
                }
            };

            let response = self.dispatch(model, &payload, budget, cancel).await;
            attempts += response.attempts;

            if response.ok && !response.text.is_empty() {
                debug!("Translation served by candidate {}", model);
                return ChatResponse {
                    attempts,
                    ..response
                };
            }

            warn!(
                "Translation candidate {} failed (status {}, empty text: {}); trying next",
                model,
                response.http_status,
                response.text.is_empty()
            );
            last = Some(response);
        }

        fail_open(text, last, attempts)
    }

    async fn dispatch(
        &self,
        model: &str,
        payload: &Value,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> ChatResponse {
        let mut schedule = self.policy.backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(
                "Dispatching chat completion (model {}, attempt {}/{})",
                model, attempt, max_attempts
            );

            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("Upstream call for {} cancelled by caller", model);
                    let message = Error::Cancelled.to_string();
                    return ChatResponse::failure(model, 500, message, attempt);
                }
                reply = self.transport.post_chat(payload) => reply,
            };

            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    error!("Upstream call for {} failed: {}", model, e);
                    return ChatResponse::failure(
                        model,
                        500,
                        format!("Upstream request failed: {}", e),
                        attempt,
                    );
                }
            };

            if reply.status != RATE_LIMITED || attempt >= max_attempts {
                if reply.status == RATE_LIMITED {
                    warn!(
                        "Upstream still rate limited after {} attempts (model {})",
                        attempt, model
                    );
                }
                return ChatResponse::from_upstream(model, reply.status, reply.body, attempt);
            }

            let delay = self.policy.next_delay(reply.retry_after, &mut schedule);
            warn!(
                "Upstream rate limited (model {}), retrying in {:?} (attempt {}/{})",
                model, delay, attempt, max_attempts
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("Retry for {} skipped: caller cancelled", model);
                    return ChatResponse::from_upstream(model, reply.status, reply.body, attempt);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Result returned when no translation candidate succeeded.
fn fail_open(text: &str, last: Option<ChatResponse>, attempts: u32) -> ChatResponse {
    let Some(last) = last else {
        let mut response =
            ChatResponse::failure("", 503, "No translation candidates available", attempts);
        response.text = text.to_string();
        return response;
    };

    warn!(
        "All translation candidates failed; returning source text ({} attempts)",
        attempts
    );

    // An empty 2xx translation is still a failure; keep `ok` consistent with the status.
    let http_status = if last.ok { 502 } else { last.http_status };
    let reason = last
        .error_message
        .clone()
        .unwrap_or_else(|| "empty translation".to_string());

    ChatResponse {
        http_status,
        ok: false,
        text: text.to_string(),
        error_message: Some(format!("All translation candidates failed: {}", reason)),
        attempts,
        ..last
    }
}
