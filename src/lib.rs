//! Firefly prompt proxy - forwards chat, vision and translation requests to an
//! OpenAI- or OpenRouter-compatible chat-completion API
//!
//! The upstream call is made resilient by a dispatcher that retries rate-limited
//! responses and falls back across candidate models for translation, while an
//! extractor normalizes the provider's reply into plain text or embedded JSON.

pub mod ai;
pub mod config;
pub mod error;
pub mod models;
pub mod prompts;
pub mod server;

pub use error::{Error, Result};
