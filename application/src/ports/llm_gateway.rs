//! LLM Gateway port
//!
//! Defines the interface for streaming one completion from the external
//! model gateway. Implementations (adapters) live in the infrastructure
//! layer; retry, fallback and timeout policy live above this port, in the
//! engine's call runner.

use async_trait::async_trait;
use council_domain::{FinishReason, Usage};
use futures::stream::BoxStream;
use thiserror::Error;

/// Errors that can occur during a gateway call
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited by gateway")]
    RateLimited,

    #[error("gateway server error: {0}")]
    ServerError(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("call cancelled")]
    Cancelled,
}

impl GatewayError {
    /// Whether the call runner may retry after this error.
    /// Bad requests never heal on retry; everything transient does.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout
                | GatewayError::RateLimited
                | GatewayError::ServerError(_)
                | GatewayError::Connection(_)
        )
    }

    /// Machine-stable code for telemetry and the event stream.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Timeout => "timeout",
            GatewayError::RateLimited => "rate_limited",
            GatewayError::ServerError(_) => "server_error",
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::Connection(_) => "connection",
            GatewayError::Cancelled => "cancelled",
        }
    }
}

/// Role of one message in the prompt sent to a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One role-tagged message of the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A streaming completion request for one model.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Caller-supplied gateway key (BYOK). Overrides the platform key
    /// when present; the adapter decides nothing else about auth.
    pub api_key: Option<String>,
}

impl ChatRequest {
    pub fn prompt_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.chars().count()).sum()
    }
}

/// One element of a streaming completion.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// A UTF-8 text fragment, in provider arrival order.
    Token(String),
    /// Provider-reported usage. Arrives at most once, after the last
    /// token; absent when the provider does not report usage.
    Usage(Usage),
    /// Provider-reported finish reason. Adapters only ever produce
    /// [`FinishReason::Stop`] or [`FinishReason::Length`] here.
    Finished(FinishReason),
}

/// A lazy, finite, single-consumer token sequence. Dropping the stream
/// aborts the underlying request.
pub type ChatStream = BoxStream<'static, Result<StreamChunk, GatewayError>>;

/// Gateway for LLM communication
///
/// This port defines how the engine reaches the external model gateway.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Open one streaming completion.
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, GatewayError>;
}
