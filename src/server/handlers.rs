use super::{ApiError, AppState};
use crate::ai::{extract, ChatMessage, ChatResponse, Dispatcher, ModelCandidateList};
use crate::models::{Mode, ProxyRequest};
use crate::prompts::{self, FireflyAttributes};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

type HandlerResult = std::result::Result<Response, ApiError>;

/// Per-request context shared by the mode handlers.
struct Call<'a> {
    state: &'a AppState,
    body: ProxyRequest,
    cancel: CancellationToken,
}

/// Dispatcher for the configured provider; fails with 500 when its key is missing.
fn dispatcher_of(state: &AppState) -> std::result::Result<&Dispatcher, ApiError> {
    state.dispatcher.as_deref().ok_or_else(|| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Missing {}", state.config.provider.key_name()),
        )
    })
}

impl<'a> Call<'a> {
    fn parse(
        state: &'a AppState,
        body: Value,
        cancel: CancellationToken,
    ) -> std::result::Result<Self, ApiError> {
        let body = serde_json::from_value(body)
            .map_err(|e| ApiError::bad_request(format!("Invalid request field: {}", e)))?;
        Ok(Self {
            state,
            body,
            cancel,
        })
    }

    fn dispatcher(&self) -> std::result::Result<&Dispatcher, ApiError> {
        dispatcher_of(self.state)
    }

    fn provider(&self) -> &'static str {
        self.state.config.provider.name()
    }

    /// Translation candidates: an explicit model first, then the configured chain.
    fn translation_candidates(&self, explicit: Option<&str>) -> ModelCandidateList {
        let config = &self.state.config;
        ModelCandidateList::new(
            explicit
                .into_iter()
                .chain(std::iter::once(config.translate_model.as_str()))
                .chain(config.translate_fallback_models.iter().map(String::as_str))
                .chain(std::iter::once(config.default_model.as_str())),
        )
    }
}

/// Entry point for every POST.
pub(super) async fn proxy(
    state: &AppState,
    route: &'static str,
    default_mode: Mode,
    headers: &HeaderMap,
    raw: &[u8],
) -> HandlerResult {
    let request_id = Uuid::new_v4();
    let span = info_span!("proxy", %request_id, route);

    async move {
        authorize(state, headers)?;

        let body: Value = serde_json::from_slice(raw)
            .ok()
            .filter(Value::is_object)
            .ok_or_else(|| ApiError::bad_request("Invalid JSON body"))?;
        let mode = Mode::from_body(&body, default_mode)?;
        info!("Handling {} request", mode);

        // A disconnecting client drops this future, which cancels upstream work.
        let cancel = CancellationToken::new();
        let _guard = cancel.clone().drop_guard();

        // Raw bodies go upstream as sent, so only they skip typed parsing.
        match mode {
            Mode::Raw => raw_passthrough(state, body, &cancel).await,
            Mode::Preset => preset(&Call::parse(state, body, cancel)?).await,
            Mode::TranslateKo => translate(&Call::parse(state, body, cancel)?).await,
            Mode::VisionFirefly => vision_firefly(&Call::parse(state, body, cancel)?).await,
            Mode::Firefly => firefly(&Call::parse(state, body, cancel)?).await,
        }
    }
    .instrument(span)
    .await
}

fn authorize(state: &AppState, headers: &HeaderMap) -> std::result::Result<(), ApiError> {
    let Some(expected) = state.config.access_key.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    if presented == Some(expected) {
        Ok(())
    } else {
        warn!("Rejected request with missing or wrong access key");
        Err(ApiError::new(StatusCode::UNAUTHORIZED, "Unauthorized"))
    }
}

fn status_of(response: &ChatResponse) -> StatusCode {
    StatusCode::from_u16(response.http_status).unwrap_or(StatusCode::BAD_GATEWAY)
}

fn chat_reply(provider: &str, response: ChatResponse) -> Response {
    let status = status_of(&response);
    (
        status,
        Json(json!({
            "ok": response.ok,
            "status": response.http_status,
            "provider": provider,
            "model": response.model_used,
            "provider_model": response.provider_model,
            "text": response.text,
            "error": response.error_message,
            "raw": response.raw_body,
        })),
    )
        .into_response()
}

async fn preset(call: &Call<'_>) -> HandlerResult {
    let body = &call.body;
    let config = &call.state.config;
    let model = body.model_or(&config.default_model);

    let response = match (&body.messages, body.prompt()) {
        // Caller messages are forwarded as sent.
        (Some(messages), _) if !messages.is_empty() => {
            let payload = body
                .chat_request(model, Vec::new(), config.default_temperature)
                .payload_with_messages(messages.clone())?;
            call.dispatcher()?.send_value(&payload, &call.cancel).await
        }
        (_, Some(prompt)) => {
            let request = body.chat_request(
                model,
                vec![
                    ChatMessage::system(prompts::PRESET_SYSTEM.trim()),
                    ChatMessage::user(prompt),
                ],
                config.default_temperature,
            );
            call.dispatcher()?.send(&request, &call.cancel).await
        }
        _ => return Err(ApiError::bad_request("Need prompt or messages")),
    };

    Ok(chat_reply(call.provider(), response))
}

async fn raw_passthrough(
    state: &AppState,
    mut payload: Value,
    cancel: &CancellationToken,
) -> HandlerResult {
    let dispatcher = dispatcher_of(state)?;

    if let Some(object) = payload.as_object_mut() {
        object.remove("mode");
        let has_model = object
            .get("model")
            .and_then(Value::as_str)
            .is_some_and(|m| !m.trim().is_empty());
        if !has_model {
            object.insert(
                "model".to_string(),
                Value::String(state.config.default_model.clone()),
            );
        }
    }

    let response = dispatcher.send_value(&payload, cancel).await;
    let status = status_of(&response);

    let reply = match response.raw_body {
        Value::Object(ref map) if map.is_empty() && !response.ok => {
            json!({ "error": response.error_message })
        }
        raw => raw,
    };
    Ok((status, Json(reply)).into_response())
}

async fn translate(call: &Call<'_>) -> HandlerResult {
    let text = call
        .body
        .text()
        .ok_or_else(|| ApiError::bad_request("No text for translate_ko"))?;
    let dispatcher = call.dispatcher()?;

    let candidates = call.translation_candidates(call.body.requested_model());
    let response = dispatcher
        .send_with_fallback(text, &candidates, call.body.target_language(), &call.cancel)
        .await;

    // Fail-open: the caller always gets a 200 with the best text available.
    Ok(Json(json!({
        "ok": response.ok,
        "status": response.http_status,
        "provider": call.provider(),
        "model": response.model_used,
        "text": response.text,
        "target_language": call.body.target_language(),
        "error": response.error_message,
    }))
    .into_response())
}

async fn vision_firefly(call: &Call<'_>) -> HandlerResult {
    let image_uri = call.body.image()?.to_uri()?;
    let instruction = call
        .body
        .prompt()
        .unwrap_or_else(|| prompts::VISION_USER.trim());
    let dispatcher = call.dispatcher()?;

    let config = &call.state.config;
    let request = call.body.chat_request(
        call.body.model_or(&config.default_model),
        vec![
            ChatMessage::system(prompts::VISION_SYSTEM.trim()),
            ChatMessage::user_with_image(instruction, image_uri),
        ],
        config.default_temperature,
    );

    let response = dispatcher.send(&request, &call.cancel).await;
    if !response.ok {
        return Ok(chat_reply(call.provider(), response));
    }
    Ok(firefly_reply(call, Some(response)).await)
}

async fn firefly(call: &Call<'_>) -> HandlerResult {
    if call.body.attributes.as_ref().is_some_and(Value::is_object) {
        return Ok(firefly_reply(call, None).await);
    }

    let idea = call
        .body
        .prompt()
        .ok_or_else(|| ApiError::bad_request("Need prompt or attributes"))?;
    let dispatcher = call.dispatcher()?;

    let config = &call.state.config;
    let request = call.body.chat_request(
        call.body.model_or(&config.default_model),
        vec![
            ChatMessage::system(prompts::FIREFLY_SYSTEM.trim()),
            ChatMessage::user(idea),
        ],
        config.default_temperature,
    );

    let response = dispatcher.send(&request, &call.cancel).await;
    if !response.ok {
        return Ok(chat_reply(call.provider(), response));
    }
    Ok(firefly_reply(call, Some(response)).await)
}

/// Builds the Firefly prompt from the model's analysis (or the body's own
/// attributes) and optionally translates it.
async fn firefly_reply(call: &Call<'_>, analysis: Option<ChatResponse>) -> Response {
    let mut note: Option<&str> = None;
    let (attributes, structured) = match &analysis {
        Some(response) if response.text.is_empty() => {
            warn!("Model returned an empty analysis; prompt holds only the quality suffix");
            note = Some("Model returned an empty analysis");
            (FireflyAttributes::default(), false)
        }
        Some(response) => match extract::json_of(&response.text) {
            Some(object) => (FireflyAttributes::from_json(&object), true),
            None => {
                warn!("Model reply held no JSON object; using the text as subject");
                (FireflyAttributes::from_text(&response.text), false)
            }
        },
        None => (
            FireflyAttributes::from_json(call.body.attributes.as_ref().unwrap_or(&Value::Null)),
            true,
        ),
    };
    let prompt = prompts::firefly_prompt(&attributes);

    let mut translated: Option<ChatResponse> = None;
    if call.body.translate.unwrap_or(false) {
        match call.dispatcher() {
            Ok(dispatcher) => {
                let candidates = call.translation_candidates(None);
                translated = Some(
                    dispatcher
                        .send_with_fallback(
                            &prompt,
                            &candidates,
                            call.body.target_language(),
                            &call.cancel,
                        )
                        .await,
                );
            }
            Err(err) => warn!("Skipping translation: {}", err.message),
        }
    }

    let status = analysis.as_ref().map(|r| r.http_status).unwrap_or(200);
    Json(json!({
        "ok": true,
        "status": status,
        "provider": call.provider(),
        "model": analysis.as_ref().map(|r| r.model_used.clone()),
        "text": prompt,
        "prompt": prompt,
        "attributes": attributes,
        "structured": structured,
        "error": note,
        "prompt_translated": translated.as_ref().map(|t| t.text.clone()),
        "translation_ok": translated.as_ref().map(|t| t.ok),
        "target_language": translated.as_ref().map(|_| call.body.target_language()),
        "analysis": analysis.as_ref().map(|r| r.text.clone()),
        "raw": analysis.map(|r| r.raw_body),
    }))
    .into_response()
}
