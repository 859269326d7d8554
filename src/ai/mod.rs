//! Upstream chat-completion integration
//!
//! A [`ChatTransport`] performs single POSTs against the provider; the
//! [`Dispatcher`] layers rate-limit retries and translation fallback on top,
//! and [`extract`] turns provider bodies into text or recovered JSON.

pub mod client;
pub mod dispatcher;
pub mod extract;
pub mod mime;
pub mod mock;
pub mod types;

pub use client::{ChatTransport, UpstreamClient, UpstreamReply};
pub use dispatcher::Dispatcher;
pub use mock::MockTransport;
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, ContentPart, ImageReference, MessageContent,
    ModelCandidateList, Role,
};
