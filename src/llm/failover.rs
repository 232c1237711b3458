//! Text-generation gateway with per-model retry and ordered model fallback.
//!
//! Every public method here is infallible from the caller's point of view:
//! total failure is reported as `None` (or an empty map for JSON), never as
//! an error.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, LlmProvider};
use crate::llm::retry::{RetryPolicy, retry_with_backoff};
use crate::llm::structured::parse_json_object;

/// Persona used for free-form conversational replies.
pub const ASSISTANT_PERSONA: &str = "\
You are a helpful Indian food assistant on WhatsApp.
Reply in a warm, natural tone: not too formal, not too dramatic. Just helpful, friendly and to the point.
If the user asks for a recipe, give the full recipe directly without asking questions unless necessary.";

/// Tuning for the gateway.
#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    pub retry: RetryPolicy,
    /// Deadline for a single attempt against one model.
    pub call_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Ordered set of models tried one after another until one produces text.
pub struct FailoverGateway {
    providers: Vec<Arc<dyn LlmProvider>>,
    config: GatewayConfig,
}

impl FailoverGateway {
    /// `providers` are in priority order.
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>, config: GatewayConfig) -> Self {
        Self { providers, config }
    }

    /// Model names in priority order.
    pub fn model_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.model_name()).collect()
    }

    /// Conversational generation with the assistant persona.
    pub async fn generate(&self, prompt: &str) -> Option<String> {
        let request = CompletionRequest::new(prompt).with_system(ASSISTANT_PERSONA);
        self.complete(request).await
    }

    /// Generation constrained to a short label (one word or a short phrase).
    ///
    /// The raw prompt is sent without persona; the answer is reduced to its
    /// first line with quotes and trailing punctuation removed.
    pub async fn generate_label(&self, prompt: &str) -> Option<String> {
        let request = CompletionRequest::new(prompt)
            .with_temperature(0.0)
            .with_max_tokens(32);
        self.complete(request)
            .await
            .map(|raw| normalize_label(&raw))
            .filter(|label| !label.is_empty())
    }

    /// Request a JSON object. Absence or unparseable output yields an empty map.
    pub async fn generate_json(&self, prompt: &str) -> Map<String, Value> {
        let request = CompletionRequest::new(prompt)
            .with_system("Output only a valid JSON object. No prose.")
            .with_temperature(0.0);
        match self.complete(request).await {
            Some(raw) => parse_json_object(&raw),
            None => Map::new(),
        }
    }

    /// Run a request against the configured model order and retry policy.
    pub async fn complete(&self, request: CompletionRequest) -> Option<String> {
        self.run(&request, &self.providers, self.config.retry).await
    }

    /// Run a request against an explicit model preference order and retry
    /// limit. Unknown model names are skipped.
    pub async fn complete_with(
        &self,
        request: CompletionRequest,
        models: &[&str],
        max_retries_per_model: u32,
    ) -> Option<String> {
        let ordered: Vec<Arc<dyn LlmProvider>> = models
            .iter()
            .filter_map(|name| {
                self.providers
                    .iter()
                    .find(|p| p.model_name() == *name)
                    .cloned()
            })
            .collect();
        let policy = RetryPolicy::new(max_retries_per_model, self.config.retry.base_delay);
        self.run(&request, &ordered, policy).await
    }

    async fn run(
        &self,
        request: &CompletionRequest,
        providers: &[Arc<dyn LlmProvider>],
        policy: RetryPolicy,
    ) -> Option<String> {
        for provider in providers {
            let model = provider.model_name();
            debug!(model, "Trying model");

            let result = retry_with_backoff(policy, |_attempt| {
                let provider = Arc::clone(provider);
                let request = request.clone();
                let timeout = self.config.call_timeout;
                async move {
                    match tokio::time::timeout(timeout, provider.complete(request)).await {
                        Ok(result) => result,
                        Err(_) => Err(LlmError::Timeout {
                            provider: "gateway".to_string(),
                            model: provider.model_name().to_string(),
                            timeout,
                        }),
                    }
                }
            })
            .await;

            match result {
                Ok(response) => {
                    let text = response.content.trim();
                    if !text.is_empty() {
                        info!(model, "Generation succeeded");
                        return Some(text.to_string());
                    }
                    warn!(model, "Model returned empty text, trying next model");
                }
                Err(e) => {
                    warn!(model, error = %e, "Model failed after retries, trying next model");
                }
            }
        }

        warn!("All models failed, no generation available");
        None
    }
}

/// Reduce a model answer to a bare label.
pub fn normalize_label(raw: &str) -> String {
    let first_line = raw
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");
    first_line
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*' | '_'))
        .trim_end_matches(['.', '!'])
        .trim()
        .to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::llm::provider::CompletionResponse;

    /// Provider that replays a script of outcomes, then repeats the last one.
    pub(crate) struct ScriptedLlm {
        name: String,
        script: Mutex<VecDeque<Result<String, ()>>>,
        pub calls: AtomicU32,
    }

    impl ScriptedLlm {
        pub(crate) fn new(name: &str, script: Vec<Result<&str, ()>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                script: Mutex::new(script.into_iter().map(|r| r.map(String::from)).collect()),
                calls: AtomicU32::new(0),
            })
        }

        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    pub(crate) fn providers(items: &[&Arc<ScriptedLlm>]) -> Vec<Arc<dyn LlmProvider>> {
        items
            .iter()
            .map(|p| Arc::clone(*p) as Arc<dyn LlmProvider>)
            .collect()
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            &self.name
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            };
            match next {
                Some(Ok(content)) => Ok(CompletionResponse { content }),
                _ => Err(LlmError::RequestFailed {
                    provider: self.name.clone(),
                    reason: "scripted failure".into(),
                }),
            }
        }
    }

    /// Provider that answers by matching prompt substrings, first rule wins.
    /// Prompts with no matching rule fail.
    pub(crate) struct PromptLlm {
        rules: Mutex<Vec<(String, Result<String, ()>)>>,
        prompts: Mutex<Vec<String>>,
        delay: Mutex<Duration>,
    }

    impl PromptLlm {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                rules: Mutex::new(Vec::new()),
                prompts: Mutex::new(Vec::new()),
                delay: Mutex::new(Duration::ZERO),
            })
        }

        pub(crate) fn on(&self, needle: &str, reply: &str) -> &Self {
            self.rules
                .lock()
                .unwrap()
                .push((needle.to_string(), Ok(reply.to_string())));
            self
        }

        pub(crate) fn fail_on(&self, needle: &str) -> &Self {
            self.rules.lock().unwrap().push((needle.to_string(), Err(())));
            self
        }

        /// Hold every answer back by `delay`.
        pub(crate) fn slow_down(&self, delay: Duration) -> &Self {
            *self.delay.lock().unwrap() = delay;
            self
        }

        /// Prompts seen so far containing `needle`.
        pub(crate) fn prompts_with(&self, needle: &str) -> Vec<String> {
            self.prompts
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.contains(needle))
                .cloned()
                .collect()
        }

        pub(crate) fn gateway(self: &Arc<Self>) -> Arc<FailoverGateway> {
            Arc::new(FailoverGateway::new(
                vec![Arc::clone(self) as Arc<dyn LlmProvider>],
                GatewayConfig {
                    retry: RetryPolicy::new(1, Duration::ZERO),
                    call_timeout: Duration::from_secs(5),
                },
            ))
        }
    }

    #[async_trait]
    impl LlmProvider for PromptLlm {
        fn model_name(&self) -> &str {
            "prompt-stub"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            let delay = *self.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let rules = self.rules.lock().unwrap();
            let hit = rules
                .iter()
                .find(|(needle, _)| request.prompt.contains(needle.as_str()));
            match hit {
                Some((_, Ok(reply))) => Ok(CompletionResponse {
                    content: reply.clone(),
                }),
                _ => Err(LlmError::RequestFailed {
                    provider: "prompt-stub".into(),
                    reason: "no scripted answer".into(),
                }),
            }
        }
    }

    fn fast_config() -> GatewayConfig {
        GatewayConfig {
            retry: RetryPolicy::new(3, Duration::ZERO),
            call_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn falls_back_to_second_model_and_stops() {
        let first = ScriptedLlm::new("first", vec![Err(())]);
        let second = ScriptedLlm::new("second", vec![Ok("from second")]);
        let third = ScriptedLlm::new("third", vec![Ok("from third")]);
        let gateway = FailoverGateway::new(providers(&[&first, &second, &third]), fast_config());

        let text = gateway.generate("hi").await;

        assert_eq!(text.as_deref(), Some("from second"));
        assert_eq!(first.calls(), 3, "first model retried up to the limit");
        assert_eq!(second.calls(), 1);
        assert_eq!(third.calls(), 0, "third model never attempted");
    }

    #[tokio::test]
    async fn retries_absorb_transient_errors() {
        let flaky = ScriptedLlm::new("flaky", vec![Err(()), Ok("recovered")]);
        let gateway = FailoverGateway::new(providers(&[&flaky]), fast_config());
        assert_eq!(gateway.generate("x").await.as_deref(), Some("recovered"));
        assert_eq!(flaky.calls(), 2);
    }

    #[tokio::test]
    async fn total_failure_is_none() {
        let a = ScriptedLlm::new("a", vec![Err(())]);
        let b = ScriptedLlm::new("b", vec![Err(())]);
        let gateway = FailoverGateway::new(providers(&[&a, &b]), fast_config());
        assert!(gateway.generate("x").await.is_none());
    }

    #[tokio::test]
    async fn empty_text_moves_to_next_model() {
        let blank = ScriptedLlm::new("blank", vec![Ok("   ")]);
        let good = ScriptedLlm::new("good", vec![Ok("text")]);
        let gateway = FailoverGateway::new(providers(&[&blank, &good]), fast_config());
        assert_eq!(gateway.generate("x").await.as_deref(), Some("text"));
        assert_eq!(blank.calls(), 1);
    }

    #[tokio::test]
    async fn explicit_model_order_and_retry_limit() {
        let a = ScriptedLlm::new("a", vec![Ok("from a")]);
        let b = ScriptedLlm::new("b", vec![Err(())]);
        let gateway = FailoverGateway::new(providers(&[&a, &b]), fast_config());

        let text = gateway
            .complete_with(CompletionRequest::new("x"), &["b", "a"], 1)
            .await;

        assert_eq!(text.as_deref(), Some("from a"));
        assert_eq!(b.calls(), 1, "retry limit of one honoured");
    }

    #[tokio::test]
    async fn label_is_normalized() {
        let llm = ScriptedLlm::new("m", vec![Ok("  \"Lunch.\"\nbecause it was noon")]);
        let gateway = FailoverGateway::new(providers(&[&llm]), fast_config());
        assert_eq!(gateway.generate_label("x").await.as_deref(), Some("Lunch"));
    }

    #[tokio::test]
    async fn json_tolerates_fences_and_failure() {
        let llm = ScriptedLlm::new("m", vec![Ok("```json\n{\"b\": 2}\n```")]);
        let gateway = FailoverGateway::new(providers(&[&llm]), fast_config());
        assert_eq!(gateway.generate_json("x").await["b"], 2);

        let dead = ScriptedLlm::new("dead", vec![Err(())]);
        let gateway = FailoverGateway::new(providers(&[&dead]), fast_config());
        assert!(gateway.generate_json("x").await.is_empty());
    }

    #[test]
    fn normalize_label_cases() {
        assert_eq!(normalize_label("breakfast"), "breakfast");
        assert_eq!(normalize_label("**log_meal**"), "log_meal");
        assert_eq!(normalize_label("\n\n dinner!\n"), "dinner");
        assert_eq!(normalize_label(""), "");
    }
}
