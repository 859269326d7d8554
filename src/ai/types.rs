//! Chat-completion payloads and the dispatcher's normalized result.

use super::extract;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sender of a chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Message content: plain text or an ordered list of content blocks.
///
/// Variant order matters for `#[serde(untagged)]` decoding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One block in multipart message content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// User message carrying an instruction and one image.
    pub fn user_with_image(text: impl Into<String>, image_uri: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image_uri.into(),
                    },
                },
            ]),
        }
    }
}

/// Request body for an upstream chat completion.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>, temperature: f64) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature,
            top_p: None,
            seed: None,
            max_output_tokens: None,
        }
    }

    /// Checks the payload invariants: a model is named, messages are present
    /// and at least one of them comes from the user.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "model must not be empty".to_string(),
            ));
        }
        validate_messages(&self.messages)
    }

    /// Wire payload carrying `messages` exactly as the caller sent them in
    /// place of the typed list.
    pub fn payload_with_messages(&self, messages: Vec<Value>) -> Result<Value> {
        if self.model.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "model must not be empty".to_string(),
            ));
        }
        validate_message_values(&messages)?;
        let mut payload = serde_json::to_value(self)?;
        if let Some(object) = payload.as_object_mut() {
            object.insert("messages".to_string(), Value::Array(messages));
        }
        Ok(payload)
    }
}

/// Structural checks for caller-supplied messages forwarded as raw JSON.
pub fn validate_message_values(messages: &[Value]) -> Result<()> {
    if messages.is_empty() {
        return Err(Error::InvalidRequest(
            "messages must not be empty".to_string(),
        ));
    }
    if !messages.iter().all(Value::is_object) {
        return Err(Error::InvalidRequest(
            "messages must be JSON objects".to_string(),
        ));
    }
    if !messages
        .iter()
        .any(|m| m.get("role").and_then(Value::as_str) == Some("user"))
    {
        return Err(Error::InvalidRequest(
            "messages must include at least one user message".to_string(),
        ));
    }
    Ok(())
}

fn validate_messages(messages: &[ChatMessage]) -> Result<()> {
    if messages.is_empty() {
        return Err(Error::InvalidRequest(
            "messages must not be empty".to_string(),
        ));
    }
    if !messages.iter().any(|m| m.role == Role::User) {
        return Err(Error::InvalidRequest(
            "messages must include at least one user message".to_string(),
        ));
    }
    Ok(())
}

/// Normalized outcome of one logical upstream call.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub http_status: u16,
    /// True iff `http_status` is in 200..=299.
    pub ok: bool,
    /// Model identifier that was requested for the call that produced this result.
    pub model_used: String,
    /// Model the provider reports having served, when present.
    pub provider_model: Option<String>,
    pub text: String,
    pub error_message: Option<String>,
    pub raw_body: Value,
    /// Network calls made, including retries.
    pub attempts: u32,
}

impl ChatResponse {
    /// Derives every field from the status and the (possibly empty) body.
    pub fn from_upstream(model: &str, http_status: u16, raw_body: Value, attempts: u32) -> Self {
        let ok = (200..300).contains(&http_status);
        let error_message = extract::error_message_of(&raw_body).or_else(|| {
            (!ok).then(|| format!("Upstream returned status {}", http_status))
        });

        Self {
            http_status,
            ok,
            model_used: model.to_string(),
            provider_model: extract::provider_model_of(&raw_body),
            text: extract::text_of(&raw_body),
            error_message,
            raw_body,
            attempts,
        }
    }

    /// Synthetic failure for calls that never produced an upstream reply.
    pub fn failure(model: &str, http_status: u16, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            http_status,
            ok: false,
            model_used: model.to_string(),
            provider_model: None,
            text: String::new(),
            error_message: Some(message.into()),
            raw_body: Value::Object(Default::default()),
            attempts,
        }
    }
}

/// Ordered, deduplicated model identifiers tried by the translation fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelCandidateList(Vec<String>);

impl ModelCandidateList {
    /// Keeps the first occurrence of every non-blank identifier, in order.
    pub fn new<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list: Vec<String> = Vec::new();
        for model in models {
            let model = model.as_ref().trim();
            if !model.is_empty() && !list.iter().any(|m| m == model) {
                list.push(model.to_string());
            }
        }
        Self(list)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Image supplied with a vision request: a remote URL or an inline base64 payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    Url(String),
    Base64 { data: String, mime: Option<String> },
}

impl ImageReference {
    /// Builds a reference from request fields; exactly one source must be given.
    pub fn from_parts(
        url: Option<String>,
        base64: Option<String>,
        mime: Option<String>,
    ) -> Result<Self> {
        let url = url.filter(|u| !u.trim().is_empty());
        let base64 = base64.filter(|b| !b.trim().is_empty());

        match (url, base64) {
            (Some(url), None) => Ok(ImageReference::Url(url.trim().to_string())),
            (None, Some(data)) => Ok(ImageReference::Base64 {
                data: data.trim().to_string(),
                mime: mime.filter(|m| !m.trim().is_empty()),
            }),
            (Some(_), Some(_)) => Err(Error::InvalidRequest(
                "Provide either image_url or image_base64, not both".to_string(),
            )),
            (None, None) => Err(Error::InvalidRequest(
                "Need image_url or image_base64".to_string(),
            )),
        }
    }

    /// URI placed in the `image_url` content block.
    ///
    /// Base64 payloads are wrapped as `data:<mime>;base64,<payload>`; the MIME
    /// type is sniffed from the decoded bytes when the caller did not name one.
    pub fn to_uri(&self) -> Result<String> {
        match self {
            ImageReference::Url(url) => Ok(url.clone()),
            ImageReference::Base64 { data, .. } if data.starts_with("data:") => Ok(data.clone()),
            ImageReference::Base64 { data, mime } => {
                use base64::Engine as _;
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(data)
                    .map_err(|e| {
                        Error::InvalidRequest(format!("image_base64 is not valid base64: {}", e))
                    })?;
                let mime = match mime {
                    Some(mime) => mime.as_str(),
                    None => super::mime::detect_image_mime(&bytes),
                };
                Ok(format!("data:{};base64,{}", mime, data))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_request_serializes_wire_shape() {
        let mut request = ChatRequest::new(
            "openai/gpt-4o-mini",
            vec![
                ChatMessage::system("be brief"),
                ChatMessage::user_with_image("describe", "https://img.test/a.png"),
            ],
            0.5,
        );
        request.seed = Some(7);

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "openai/gpt-4o-mini",
                "temperature": 0.5,
                "seed": 7,
                "messages": [
                    { "role": "system", "content": "be brief" },
                    { "role": "user", "content": [
                        { "type": "text", "text": "describe" },
                        { "type": "image_url", "image_url": { "url": "https://img.test/a.png" } }
                    ]}
                ]
            })
        );
    }

    #[test]
    fn test_messages_deserialize_from_client_json() {
        let messages: Vec<ChatMessage> = serde_json::from_value(json!([
            { "role": "system", "content": "sys" },
            { "role": "user", "content": [{ "type": "text", "text": "hi" }] }
        ]))
        .unwrap();

        assert_eq!(messages[0], ChatMessage::system("sys"));
        assert_eq!(
            messages[1].content,
            MessageContent::Parts(vec![ContentPart::Text {
                text: "hi".to_string()
            }])
        );
    }

    #[test]
    fn test_validate_requires_user_message() {
        let request = ChatRequest::new("m", vec![ChatMessage::system("only system")], 0.7);
        assert!(matches!(request.validate(), Err(Error::InvalidRequest(_))));

        let request = ChatRequest::new("m", vec![], 0.7);
        assert!(matches!(request.validate(), Err(Error::InvalidRequest(_))));

        let request = ChatRequest::new(" ", vec![ChatMessage::user("hi")], 0.7);
        assert!(matches!(request.validate(), Err(Error::InvalidRequest(_))));

        let request = ChatRequest::new("m", vec![ChatMessage::user("hi")], 0.7);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_response_from_upstream_success() {
        let response = ChatResponse::from_upstream(
            "requested",
            200,
            json!({ "model": "served", "choices": [{ "message": { "content": " hi " } }] }),
            1,
        );
        assert!(response.ok);
        assert_eq!(response.text, "hi");
        assert_eq!(response.provider_model.as_deref(), Some("served"));
        assert_eq!(response.model_used, "requested");
        assert!(response.error_message.is_none());
    }

    #[test]
    fn test_response_from_upstream_error_without_message() {
        let response = ChatResponse::from_upstream("m", 503, json!({}), 1);
        assert!(!response.ok);
        assert_eq!(response.text, "");
        assert_eq!(
            response.error_message.as_deref(),
            Some("Upstream returned status 503")
        );
    }

    #[test]
    fn test_payload_with_messages_keeps_caller_fields() {
        let mut request = ChatRequest::new("m/x", Vec::new(), 0.4);
        request.seed = Some(7);
        let messages = vec![
            json!({ "role": "developer", "content": "be terse" }),
            json!({ "role": "user", "name": "alice", "content": [
                { "type": "image_url", "image_url": { "url": "https://x/a.png", "detail": "high" } }
            ] }),
        ];

        let payload = request.payload_with_messages(messages.clone()).unwrap();
        assert_eq!(payload["model"], "m/x");
        assert_eq!(payload["seed"], 7);
        assert_eq!(payload["messages"], Value::Array(messages));
    }

    #[test]
    fn test_message_values_need_a_user_object() {
        let err = validate_message_values(&[]).unwrap_err();
        assert_eq!(err.to_string(), "Invalid request: messages must not be empty");

        let err = validate_message_values(&[json!({ "role": "system", "content": "x" })])
            .unwrap_err();
        assert!(err.to_string().contains("at least one user message"));

        assert!(validate_message_values(&[json!("hi")]).is_err());
        assert!(validate_message_values(&[
            json!({ "role": "tool", "tool_call_id": "c1", "content": "42" }),
            json!({ "role": "user", "content": "ok?" }),
        ])
        .is_ok());
    }

    #[test]
    fn test_candidate_list_dedupes_in_order() {
        let list = ModelCandidateList::new(["b", "a", " b ", "", "c", "a"]);
        assert_eq!(list.iter().collect::<Vec<_>>(), vec!["b", "a", "c"]);
        assert!(ModelCandidateList::new(Vec::<String>::new()).is_empty());
    }

    #[test]
    fn test_image_reference_requires_exactly_one_source() {
        assert!(ImageReference::from_parts(None, None, None).is_err());
        assert!(ImageReference::from_parts(
            Some("https://a".to_string()),
            Some("AAAA".to_string()),
            None
        )
        .is_err());
        assert_eq!(
            ImageReference::from_parts(Some(" https://a ".to_string()), Some("".to_string()), None)
                .unwrap(),
            ImageReference::Url("https://a".to_string())
        );
    }

    #[test]
    fn test_base64_image_is_wrapped_with_sniffed_mime() {
        // "/9j/4AAQ" decodes to FF D8 FF E0 (JPEG)
        let image = ImageReference::from_parts(None, Some("/9j/4AAQ".to_string()), None).unwrap();
        assert_eq!(image.to_uri().unwrap(), "data:image/jpeg;base64,/9j/4AAQ");
    }

    #[test]
    fn test_base64_image_uses_explicit_mime() {
        let image = ImageReference::from_parts(
            None,
            Some("/9j/4AAQ".to_string()),
            Some("image/webp".to_string()),
        )
        .unwrap();
        assert_eq!(image.to_uri().unwrap(), "data:image/webp;base64,/9j/4AAQ");
    }

    #[test]
    fn test_existing_data_uri_is_kept() {
        let uri = "data:image/png;base64,iVBORw0KGgo=".to_string();
        let image = ImageReference::from_parts(None, Some(uri.clone()), None).unwrap();
        assert_eq!(image.to_uri().unwrap(), uri);
    }

    #[test]
    fn test_invalid_base64_is_rejected() {
        let image = ImageReference::from_parts(None, Some("not base64!!".to_string()), None)
            .unwrap();
        assert!(matches!(image.to_uri(), Err(Error::InvalidRequest(_))));
    }
}
