//! LLM gateway adapter: HTTP + SSE streaming.

pub mod http;
pub mod protocol;

pub use http::HttpLlmGateway;
