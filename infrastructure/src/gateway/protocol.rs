//! Wire types for the chat-completions-style LLM gateway.
//!
//! The gateway speaks the widely-copied streaming chat shape: a JSON POST
//! with role-tagged messages and `stream: true`, answered by SSE frames
//! whose `data:` payloads carry token deltas, an optional usage object,
//! and a `[DONE]` sentinel.

use council_application::ports::llm_gateway::{ChatMessage, ChatRole, StreamChunk};
use council_domain::{FinishReason, Usage};
use serde::{Deserialize, Serialize};

/// Outbound request body.
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub stream: bool,
}

impl ChatCompletionRequest {
    pub fn streaming(model: impl Into<String>, messages: &[ChatMessage]) -> Self {
        Self {
            model: model.into(),
            messages: messages.iter().map(WireMessage::from).collect(),
            stream: true,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WireMessage {
    pub role: &'static str,
    pub content: String,
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: match message.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            },
            content: message.content.clone(),
        }
    }
}

/// One parsed `data:` payload.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WireUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    /// Dollars, as OpenRouter-style gateways report it.
    #[serde(default)]
    pub cost: Option<f64>,
}

impl WireUsage {
    pub fn into_usage(self) -> Usage {
        Usage {
            input_tokens: self.prompt_tokens,
            output_tokens: self.completion_tokens,
            cost_cents: self
                .cost
                .map(|dollars| (dollars * 100.0).round().max(0.0) as u64)
                .unwrap_or(0),
        }
    }
}

/// Interpret one SSE `data:` payload. `None` only for the `[DONE]`
/// sentinel; payloads that do not parse (keep-alives, comments) yield an
/// empty chunk list and are skipped.
pub fn parse_data_payload(payload: &str) -> Option<Vec<StreamChunk>> {
    if payload == "[DONE]" {
        return None;
    }
    let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(payload) else {
        return Some(Vec::new());
    };

    let mut out = Vec::new();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                out.push(StreamChunk::Token(content));
            }
        }
        if let Some(reason) = choice.finish_reason {
            let reason = match reason.as_str() {
                "length" => FinishReason::Length,
                _ => FinishReason::Stop,
            };
            out.push(StreamChunk::Finished(reason));
        }
    }
    if let Some(usage) = chunk.usage {
        out.push(StreamChunk::Usage(usage.into_usage()));
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialises_role_tagged_messages() {
        let request = ChatCompletionRequest::streaming(
            "gpt-5",
            &[
                ChatMessage::system("context"),
                ChatMessage::user("question"),
            ],
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-5");
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "question");
    }

    #[test]
    fn token_delta_parses() {
        let chunks =
            parse_data_payload(r#"{"choices":[{"delta":{"content":"hel"}}]}"#).unwrap();
        assert!(matches!(&chunks[0], StreamChunk::Token(t) if t == "hel"));
    }

    #[test]
    fn finish_reason_maps_length() {
        let chunks = parse_data_payload(
            r#"{"choices":[{"delta":{},"finish_reason":"length"}]}"#,
        )
        .unwrap();
        assert!(matches!(
            chunks[0],
            StreamChunk::Finished(FinishReason::Length)
        ));
    }

    #[test]
    fn usage_converts_dollars_to_cents() {
        let chunks = parse_data_payload(
            r#"{"choices":[],"usage":{"prompt_tokens":100,"completion_tokens":40,"cost":0.0234}}"#,
        )
        .unwrap();
        match &chunks[0] {
            StreamChunk::Usage(usage) => {
                assert_eq!(usage.input_tokens, 100);
                assert_eq!(usage.output_tokens, 40);
                assert_eq!(usage.cost_cents, 2);
            }
            other => panic!("expected usage, got {other:?}"),
        }
    }

    #[test]
    fn done_sentinel_ends_the_stream() {
        assert!(parse_data_payload("[DONE]").is_none());
    }

    #[test]
    fn garbage_payloads_are_skipped_not_fatal() {
        assert_eq!(parse_data_payload(": keep-alive").unwrap().len(), 0);
    }
}
