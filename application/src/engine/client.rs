//! One LLM call, end to end.
//!
//! The call runner owns everything the stage executor should not see:
//! soft and hard timeouts, retry with exponential backoff and jitter, the
//! single fallback hop to the registry's next model, cancellation, and
//! usage estimation when the provider stays silent. Tokens stream out
//! through the sink as they arrive; fragments emitted by an attempt that
//! later fails are not rolled back.

use crate::config::EngineConfig;
use crate::ports::llm_gateway::{ChatRequest, GatewayError, LlmGateway, StreamChunk};
use crate::ports::model_registry::ModelRegistry;
use crate::ports::ChatMessage;
use council_domain::{CompanyId, FinishReason, ModelChoice, Purpose, Usage, WorkerOutcome};
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Receives token fragments as they arrive from the gateway.
pub type TokenSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Everything needed to run one worker's call.
#[derive(Debug, Clone)]
pub struct CallSpec {
    pub company: Option<CompanyId>,
    pub purpose: Purpose,
    pub choice: ModelChoice,
    pub messages: Vec<ChatMessage>,
    pub api_key: Option<String>,
}

/// Runs one call against the gateway on behalf of one worker.
pub struct LlmCallRunner {
    gateway: Arc<dyn LlmGateway>,
    registry: Arc<dyn ModelRegistry>,
    config: Arc<EngineConfig>,
}

impl LlmCallRunner {
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        registry: Arc<dyn ModelRegistry>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            gateway,
            registry,
            config,
        }
    }

    /// Run the call to a terminal [`WorkerOutcome`]. Never panics, never
    /// leaves the stream half-consumed: cancellation drops the in-flight
    /// request and reports `Cancelled`.
    pub async fn run(
        &self,
        spec: CallSpec,
        sink: TokenSink,
        cancel: CancellationToken,
    ) -> WorkerOutcome {
        let prompt_chars: usize = spec.messages.iter().map(|m| m.content.chars().count()).sum();
        let emitted = Arc::new(Mutex::new(String::new()));
        let forward: TokenSink = {
            let emitted = Arc::clone(&emitted);
            let sink = Arc::clone(&sink);
            Arc::new(move |fragment: &str| {
                emitted
                    .lock()
                    .expect("emitted buffer lock poisoned")
                    .push_str(fragment);
                sink(fragment);
            })
        };

        let deadline = Instant::now() + self.config.worker_hard_timeout;
        let result =
            tokio::time::timeout_at(deadline, self.drive(&spec, &forward, &cancel)).await;

        let text = emitted.lock().expect("emitted buffer lock poisoned").clone();
        let estimated = Usage::estimate(prompt_chars, text.chars().count());

        match result {
            Ok(Ok((usage, reason))) => WorkerOutcome::Done {
                text,
                reason,
                usage: usage.unwrap_or(estimated),
            },
            Ok(Err(GatewayError::Cancelled)) => WorkerOutcome::Cancelled { usage: estimated },
            Ok(Err(err)) => WorkerOutcome::Error {
                cause: err.to_string(),
                usage: estimated,
            },
            Err(_) => WorkerOutcome::Error {
                cause: format!(
                    "hard timeout after {}s",
                    self.config.worker_hard_timeout.as_secs()
                ),
                usage: estimated,
            },
        }
    }

    /// The retry ladder on the primary model, then at most one fallback
    /// hop on the registry's next untried entry.
    async fn drive(
        &self,
        spec: &CallSpec,
        sink: &TokenSink,
        cancel: &CancellationToken,
    ) -> Result<(Option<Usage>, FinishReason), GatewayError> {
        let mut choice = spec.choice.clone();
        let mut tried = vec![choice.model.clone()];
        let mut fell_back = false;

        loop {
            match self.attempt_ladder(&choice, spec, sink, cancel).await {
                Ok(done) => return Ok(done),
                Err(GatewayError::Cancelled) => return Err(GatewayError::Cancelled),
                Err(err) => {
                    if fell_back {
                        return Err(err);
                    }
                    let fallback = self
                        .registry
                        .choose_fallback(spec.company.as_ref(), spec.purpose, &tried)
                        .await;
                    match fallback {
                        Some(next) => {
                            warn!(
                                model = %choice.model,
                                fallback = %next.model,
                                error = %err,
                                "model failed permanently, retrying on fallback"
                            );
                            tried.push(next.model.clone());
                            choice = next;
                            fell_back = true;
                        }
                        None => return Err(err),
                    }
                }
            }
        }
    }

    /// Up to `retries` re-attempts on one model, with exponential backoff
    /// and jitter between transient failures. Bad requests end the ladder
    /// immediately.
    async fn attempt_ladder(
        &self,
        choice: &ModelChoice,
        spec: &CallSpec,
        sink: &TokenSink,
        cancel: &CancellationToken,
    ) -> Result<(Option<Usage>, FinishReason), GatewayError> {
        let mut last_err = GatewayError::Timeout;

        for attempt in 0..=self.config.retries {
            if attempt > 0 {
                let delay = backoff_delay(self.config.backoff_base, attempt - 1);
                debug!(model = %choice.model, attempt, ?delay, "backing off before retry");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            match self.attempt(choice, spec, sink, cancel).await {
                Ok(done) => return Ok(done),
                Err(GatewayError::Cancelled) => return Err(GatewayError::Cancelled),
                Err(err) if err.is_retryable() => {
                    warn!(model = %choice.model, attempt, error = %err, "attempt failed");
                    last_err = err;
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err)
    }

    /// One streaming attempt under the soft timeout.
    async fn attempt(
        &self,
        choice: &ModelChoice,
        spec: &CallSpec,
        sink: &TokenSink,
        cancel: &CancellationToken,
    ) -> Result<(Option<Usage>, FinishReason), GatewayError> {
        let request = ChatRequest {
            model: choice.model.clone(),
            messages: spec.messages.clone(),
            api_key: spec.api_key.clone(),
        };

        let deadline = Instant::now() + self.config.worker_soft_timeout;
        let open = tokio::time::timeout_at(deadline, self.gateway.stream_chat(request));
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            opened = open => opened.map_err(|_| GatewayError::Timeout)??,
        };

        let mut usage = None;
        let mut reason = FinishReason::Stop;
        loop {
            let next = tokio::time::timeout_at(deadline, stream.next());
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                item = next => item.map_err(|_| GatewayError::Timeout)?,
            };
            match item {
                None => return Ok((usage, reason)),
                Some(Ok(StreamChunk::Token(fragment))) => sink(&fragment),
                Some(Ok(StreamChunk::Usage(reported))) => usage = Some(reported),
                Some(Ok(StreamChunk::Finished(provider_reason))) => reason = provider_reason,
                Some(Err(err)) => return Err(err),
            }
        }
    }
}

/// `base * 2^attempt`, jittered by ±25%.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32 << attempt.min(16));
    let nanos = exp.as_nanos().min(u64::MAX as u128) as u64;
    if nanos == 0 {
        return Duration::ZERO;
    }
    let spread = (nanos / 2).max(1);
    let offset = xorshift(seed()) % spread;
    Duration::from_nanos(nanos - nanos / 4 + offset)
}

fn seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64
        | 1
}

fn xorshift(mut x: u64) -> u64 {
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::llm_gateway::ChatStream;
    use crate::ports::model_registry::RegistryError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Gateway that replays a script of per-call behaviours.
    struct ScriptedGateway {
        calls: AtomicUsize,
        script: Vec<Script>,
    }

    #[derive(Clone)]
    enum Script {
        Tokens(Vec<&'static str>),
        TokensWithUsage(Vec<&'static str>, Usage),
        Fail(GatewayError),
        FailMidStream(&'static str, GatewayError),
    }

    impl ScriptedGateway {
        fn new(script: Vec<Script>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                script,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmGateway for ScriptedGateway {
        async fn stream_chat(&self, _request: ChatRequest) -> Result<ChatStream, GatewayError> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.script.get(index).cloned().unwrap_or(Script::Tokens(vec![]));
            match step {
                Script::Tokens(tokens) => Ok(futures::stream::iter(
                    tokens
                        .into_iter()
                        .map(|t| Ok(StreamChunk::Token(t.to_string())))
                        .collect::<Vec<_>>(),
                )
                .boxed()),
                Script::TokensWithUsage(tokens, usage) => {
                    let mut chunks: Vec<Result<StreamChunk, GatewayError>> = tokens
                        .into_iter()
                        .map(|t| Ok(StreamChunk::Token(t.to_string())))
                        .collect();
                    chunks.push(Ok(StreamChunk::Usage(usage)));
                    Ok(futures::stream::iter(chunks).boxed())
                }
                Script::Fail(err) => Err(err),
                Script::FailMidStream(token, err) => Ok(futures::stream::iter(vec![
                    Ok(StreamChunk::Token(token.to_string())),
                    Err(err),
                ])
                .boxed()),
            }
        }
    }

    /// Registry with one optional fallback model.
    struct OneFallback(Option<ModelChoice>);

    #[async_trait]
    impl ModelRegistry for OneFallback {
        async fn resolve(
            &self,
            _company: Option<&CompanyId>,
            _purpose: Purpose,
        ) -> Result<Vec<ModelChoice>, RegistryError> {
            Ok(vec![])
        }

        async fn choose_fallback(
            &self,
            _company: Option<&CompanyId>,
            _purpose: Purpose,
            tried: &[String],
        ) -> Option<ModelChoice> {
            self.0
                .clone()
                .filter(|c| !tried.contains(&c.model))
        }
    }

    fn runner(gateway: Arc<ScriptedGateway>, fallback: Option<ModelChoice>) -> LlmCallRunner {
        let config = EngineConfig {
            backoff_base: Duration::from_millis(1),
            ..EngineConfig::default()
        };
        LlmCallRunner::new(gateway, Arc::new(OneFallback(fallback)), Arc::new(config))
    }

    fn spec() -> CallSpec {
        CallSpec {
            company: None,
            purpose: Purpose::Stage1,
            choice: ModelChoice::new("gw", "primary", 0),
            messages: vec![ChatMessage::user("hello there")],
            api_key: None,
        }
    }

    fn null_sink() -> TokenSink {
        Arc::new(|_| {})
    }

    #[tokio::test]
    async fn clean_stream_is_done_with_provider_usage() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Script::TokensWithUsage(
            vec!["hel", "lo"],
            Usage::new(7, 2, 1),
        )]));
        let outcome = runner(Arc::clone(&gateway), None)
            .run(spec(), null_sink(), CancellationToken::new())
            .await;

        assert_eq!(
            outcome,
            WorkerOutcome::Done {
                text: "hello".into(),
                reason: FinishReason::Stop,
                usage: Usage::new(7, 2, 1),
            }
        );
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test]
    async fn usage_is_estimated_when_provider_is_silent() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Script::Tokens(vec!["12345678"])]));
        let outcome = runner(gateway, None)
            .run(spec(), null_sink(), CancellationToken::new())
            .await;

        match outcome {
            WorkerOutcome::Done { usage, .. } => {
                // "hello there" is 11 chars -> 3 tokens; output 8 chars -> 2.
                assert_eq!(usage, Usage::new(3, 2, 0));
            }
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transient_errors_retry_until_success() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Script::Fail(GatewayError::RateLimited),
            Script::Fail(GatewayError::ServerError("503".into())),
            Script::Tokens(vec!["ok"]),
        ]));
        let outcome = runner(Arc::clone(&gateway), None)
            .run(spec(), null_sink(), CancellationToken::new())
            .await;

        assert!(outcome.is_done());
        assert_eq!(gateway.calls(), 3);
    }

    #[tokio::test]
    async fn bad_request_does_not_retry() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Script::Fail(
            GatewayError::BadRequest("no such model".into()),
        )]));
        let outcome = runner(Arc::clone(&gateway), None)
            .run(spec(), null_sink(), CancellationToken::new())
            .await;

        assert!(matches!(outcome, WorkerOutcome::Error { .. }));
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test]
    async fn fallback_model_is_tried_once_after_final_failure() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Script::Fail(GatewayError::ServerError("500".into())),
            Script::Fail(GatewayError::ServerError("500".into())),
            Script::Fail(GatewayError::ServerError("500".into())),
            // Fallback model's ladder starts here.
            Script::Tokens(vec!["saved"]),
        ]));
        let outcome = runner(
            Arc::clone(&gateway),
            Some(ModelChoice::new("gw", "backup", 1)),
        )
        .run(spec(), null_sink(), CancellationToken::new())
        .await;

        assert!(outcome.is_done());
        assert_eq!(gateway.calls(), 4);
    }

    #[tokio::test]
    async fn tokens_from_failed_attempts_are_kept() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Script::FailMidStream("partial ", GatewayError::ServerError("500".into())),
            Script::Tokens(vec!["answer"]),
        ]));
        let outcome = runner(gateway, None)
            .run(spec(), null_sink(), CancellationToken::new())
            .await;

        match outcome {
            WorkerOutcome::Done { text, .. } => assert_eq!(text, "partial answer"),
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_wins_over_retries() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Script::Fail(
            GatewayError::ServerError("500".into()),
        )]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = runner(gateway, None).run(spec(), null_sink(), cancel).await;

        assert!(matches!(outcome, WorkerOutcome::Cancelled { .. }));
    }

    #[test]
    fn backoff_stays_inside_the_jitter_window() {
        let base = Duration::from_millis(100);
        for attempt in 0..4 {
            let delay = backoff_delay(base, attempt);
            let exp = base * 2u32.pow(attempt);
            assert!(delay >= exp.mul_f64(0.75), "delay {delay:?} below window");
            assert!(delay <= exp.mul_f64(1.25), "delay {delay:?} above window");
        }
    }
}
