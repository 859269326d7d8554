//! Inbound request body and mode selection.

use crate::ai::{ChatMessage, ChatRequest, ImageReference};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// What a POST asks the proxy to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Plain chat from `prompt` or `messages`.
    Preset,
    /// Forward the body upstream untouched.
    Raw,
    /// Translate `text` into the target language with model fallback.
    TranslateKo,
    /// Analyze an image into a Firefly prompt.
    VisionFirefly,
    /// Turn an idea (or given attributes) into a Firefly prompt.
    Firefly,
}

impl Mode {
    pub const ALL: [Mode; 5] = [
        Mode::Preset,
        Mode::Raw,
        Mode::TranslateKo,
        Mode::VisionFirefly,
        Mode::Firefly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Preset => "preset",
            Mode::Raw => "raw",
            Mode::TranslateKo => "translate_ko",
            Mode::VisionFirefly => "vision_firefly",
            Mode::Firefly => "firefly",
        }
    }
}

impl Mode {
    /// Mode named by the body's `mode` field, else the route's default.
    ///
    /// Only this field is read, so bodies forwarded verbatim never have to
    /// match [`ProxyRequest`].
    pub fn from_body(body: &Value, default: Mode) -> Result<Mode> {
        match body.get("mode") {
            None | Some(Value::Null) => Ok(default),
            Some(Value::String(mode)) if mode.trim().is_empty() => Ok(default),
            Some(Value::String(mode)) => mode.parse(),
            Some(other) => Err(Error::InvalidRequest(format!("Unknown mode: {}", other))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Mode::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| Error::InvalidRequest(format!("Unknown mode: {}", wanted)))
    }
}

/// JSON body accepted by the non-raw modes. Unknown fields are ignored.
///
/// `messages` stay as raw JSON so caller fields (`name`, `tool_calls`,
/// `detail`, ...) reach the provider untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyRequest {
    pub model: Option<String>,
    pub prompt: Option<String>,
    pub text: Option<String>,
    pub messages: Option<Vec<Value>>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub seed: Option<i64>,
    #[serde(alias = "max_tokens", alias = "maxOutputTokens")]
    pub max_output_tokens: Option<u32>,
    #[serde(alias = "imageUrl")]
    pub image_url: Option<String>,
    #[serde(alias = "imageBase64")]
    pub image_base64: Option<String>,
    #[serde(alias = "imageMime")]
    pub image_mime: Option<String>,
    pub translate: Option<bool>,
    #[serde(alias = "targetLanguage")]
    pub target_language: Option<String>,
    pub attributes: Option<Value>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ProxyRequest {
    pub fn prompt(&self) -> Option<&str> {
        non_blank(&self.prompt)
    }

    pub fn text(&self) -> Option<&str> {
        non_blank(&self.text)
    }

    pub fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        non_blank(&self.model).unwrap_or(default)
    }

    pub fn requested_model(&self) -> Option<&str> {
        non_blank(&self.model)
    }

    pub fn target_language(&self) -> &str {
        non_blank(&self.target_language).unwrap_or("Korean")
    }

    pub fn image(&self) -> Result<ImageReference> {
        ImageReference::from_parts(
            self.image_url.clone(),
            self.image_base64.clone(),
            self.image_mime.clone(),
        )
    }

    /// Chat request with this body's sampling options applied.
    pub fn chat_request(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        default_temperature: f64,
    ) -> ChatRequest {
        let mut request =
            ChatRequest::new(model, messages, self.temperature.unwrap_or(default_temperature));
        request.top_p = self.top_p;
        request.seed = self.seed;
        request.max_output_tokens = self.max_output_tokens;
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("preset".parse::<Mode>().unwrap(), Mode::Preset);
        assert_eq!(" Vision_Firefly ".parse::<Mode>().unwrap(), Mode::VisionFirefly);
        assert_eq!("translate_ko".parse::<Mode>().unwrap(), Mode::TranslateKo);

        let err = "summarize".parse::<Mode>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid request: Unknown mode: summarize");
    }

    #[test]
    fn test_mode_from_body_uses_route_default() {
        assert_eq!(Mode::from_body(&json!({}), Mode::Firefly).unwrap(), Mode::Firefly);
        assert_eq!(
            Mode::from_body(&json!({ "mode": " " }), Mode::Firefly).unwrap(),
            Mode::Firefly
        );
        assert_eq!(
            Mode::from_body(&json!({ "mode": "raw" }), Mode::Firefly).unwrap(),
            Mode::Raw
        );
        assert!(Mode::from_body(&json!({ "mode": 3 }), Mode::Preset).is_err());
    }

    #[test]
    fn test_body_accepts_camel_case_aliases() {
        let body: ProxyRequest = serde_json::from_value(json!({
            "imageUrl": "https://img.test/x.png",
            "targetLanguage": "Japanese",
            "max_tokens": 256,
            "unknown": true
        }))
        .unwrap();

        assert_eq!(body.image_url.as_deref(), Some("https://img.test/x.png"));
        assert_eq!(body.target_language(), "Japanese");
        assert_eq!(body.max_output_tokens, Some(256));
    }

    #[test]
    fn test_blank_fields_count_as_missing() {
        let body = ProxyRequest {
            prompt: Some("   ".to_string()),
            model: Some("".to_string()),
            ..Default::default()
        };
        assert_eq!(body.prompt(), None);
        assert_eq!(body.model_or("fallback"), "fallback");
        assert_eq!(body.target_language(), "Korean");
    }

    #[test]
    fn test_chat_request_applies_sampling_options() {
        let body = ProxyRequest {
            top_p: Some(0.9),
            seed: Some(42),
            max_output_tokens: Some(100),
            ..Default::default()
        };
        let request = body.chat_request("m", vec![ChatMessage::user("hi")], 0.6);

        assert_eq!(request.temperature, 0.6);
        assert_eq!(request.top_p, Some(0.9));
        assert_eq!(request.seed, Some(42));
        assert_eq!(request.max_output_tokens, Some(100));
    }
}
