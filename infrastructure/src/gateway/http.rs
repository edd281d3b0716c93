//! Streaming HTTP adapter for the LLM gateway.

use crate::gateway::protocol::{parse_data_payload, ChatCompletionRequest};
use async_trait::async_trait;
use council_application::ports::llm_gateway::{
    ChatRequest, ChatStream, GatewayError, LlmGateway,
};
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// LLM gateway reached over HTTPS with SSE streaming responses.
///
/// Key selection: a caller-supplied key on the request (BYOK) overrides
/// the platform key; with neither, the call is refused before it leaves
/// the process.
pub struct HttpLlmGateway {
    client: reqwest::Client,
    base_url: String,
    platform_key: Option<String>,
}

impl HttpLlmGateway {
    pub fn new(base_url: impl Into<String>, platform_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            platform_key,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

/// Map an HTTP status to the port's error taxonomy.
fn status_error(status: reqwest::StatusCode, body: String) -> GatewayError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return GatewayError::RateLimited;
    }
    if status == reqwest::StatusCode::REQUEST_TIMEOUT {
        return GatewayError::Timeout;
    }
    if status.is_client_error() {
        return GatewayError::BadRequest(format!("{status}: {body}"));
    }
    GatewayError::ServerError(format!("{status}: {body}"))
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Connection(err.to_string())
    }
}

#[async_trait]
impl LlmGateway for HttpLlmGateway {
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, GatewayError> {
        let key = request
            .api_key
            .as_deref()
            .or(self.platform_key.as_deref())
            .ok_or_else(|| GatewayError::BadRequest("no gateway key configured".into()))?
            .to_string();

        let body = ChatCompletionRequest::streaming(&request.model, &request.messages);
        debug!(model = %request.model, "opening gateway stream");

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(%status, "gateway refused the call");
            return Err(status_error(status, text));
        }

        let mut bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut buffer = String::new();
            'outer: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        yield Err(transport_error(err));
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find("\n\n") {
                    let frame = buffer[..pos].to_string();
                    buffer.drain(..pos + 2);
                    for line in frame.lines() {
                        let Some(payload) = line.strip_prefix("data:") else {
                            continue;
                        };
                        trace!(payload = payload.trim(), "gateway frame");
                        match parse_data_payload(payload.trim()) {
                            Some(chunks) => {
                                for item in chunks {
                                    yield Ok(item);
                                }
                            }
                            // [DONE]
                            None => break 'outer,
                        }
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}
