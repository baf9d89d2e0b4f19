//! Answer generation.
//!
//! [`AnswerGenerator`] is the seam to the language model. Two backends are
//! provided: [`OllamaGenerator`] (`generation.backend = "local"`) and
//! [`GeminiGenerator`] (`"remote"`). Callers go through
//! [`generate_with_policy`], which bounds every attempt with a timeout,
//! retries timeouts with linear backoff, and turns every failure into a
//! [`GenerationOutcome::Unavailable`] instead of an error.

use ainsights_core::assemble::ContextBundle;
use ainsights_core::Error as CoreError;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::GenerationConfig;

/// Reply the model is told to give when the context does not cover the question.
pub const NO_DATA_ANSWER: &str = "I do not have enough specific data to answer that.";

/// Shown to the user when every attempt timed out.
pub const TIMEOUT_MARKER: &str =
    "Answer unavailable: the language model did not respond in time. Please try again.";

/// Shown to the user when the backend failed for any other reason.
pub const ERROR_MARKER: &str =
    "Answer unavailable: the language model returned an error. Please try again.";

/// A language model that turns a prompt into an answer.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Backend name for logging (e.g. `"ollama"`).
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Build the grounded prompt for `question` over `context`.
pub fn build_prompt(question: &str, context: &ContextBundle) -> String {
    let mut prompt = String::new();

    prompt.push_str("You are a business data analyst. Answer ONLY from the live data statistics and documents provided below.\n\n");
    prompt.push_str("## Rules\n\n");
    prompt.push_str(&format!(
        "1. If the answer is not in the statistics or documents, reply exactly: \"{}\"\n",
        NO_DATA_ANSWER
    ));
    prompt.push_str("2. Do not use general knowledge about regions, markets, or logistics.\n");
    prompt.push_str("3. Check the live data statistics first and the documents second.\n");
    prompt.push_str("4. If the statistics and the documents contradict each other, say so.\n");
    prompt.push_str("5. Cite documents by their bracketed number, e.g. [1].\n\n");

    if context.is_empty() {
        prompt.push_str("## Context\n\nNo statistics or documents are available.\n\n");
    } else {
        prompt.push_str(&context.render());
        prompt.push_str("\n\n");
    }

    prompt.push_str("## Question\n\n");
    prompt.push_str(question);
    prompt.push_str("\n\n## Answer\n");
    prompt
}

/// Timeout and retry settings for [`generate_with_policy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationPolicy {
    pub timeout: Duration,
    /// Retries after a timed-out attempt.
    pub max_retries: u32,
    /// Delay before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl GenerationPolicy {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

/// Result of a generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum GenerationOutcome {
    Answered { text: String, attempts: u32 },
    Unavailable { text: String, reason: String, attempts: u32 },
}

impl GenerationOutcome {
    /// Text to show the user: the answer or the unavailable marker.
    pub fn text(&self) -> &str {
        match self {
            GenerationOutcome::Answered { text, .. } | GenerationOutcome::Unavailable { text, .. } => {
                text
            }
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            GenerationOutcome::Answered { attempts, .. }
            | GenerationOutcome::Unavailable { attempts, .. } => *attempts,
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self, GenerationOutcome::Answered { .. })
    }
}

/// Call `generator` under `policy`. Never fails.
pub async fn generate_with_policy(
    generator: &dyn AnswerGenerator,
    prompt: &str,
    policy: &GenerationPolicy,
) -> GenerationOutcome {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let started = Instant::now();
        match tokio::time::timeout(policy.timeout, generator.generate(prompt)).await {
            Ok(Ok(text)) => {
                debug!(
                    backend = generator.name(),
                    attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "answer generated"
                );
                return GenerationOutcome::Answered {
                    text: text.trim().to_string(),
                    attempts: attempt,
                };
            }
            Ok(Err(e)) => {
                let reason = format!("{:#}", e);
                warn!(backend = generator.name(), attempt, error = %reason, "answer generation failed");
                return GenerationOutcome::Unavailable {
                    text: ERROR_MARKER.to_string(),
                    reason,
                    attempts: attempt,
                };
            }
            Err(_) if attempt > policy.max_retries => {
                let error = CoreError::GenerationTimeout {
                    attempts: attempt,
                    timeout_ms: policy.timeout.as_millis() as u64,
                };
                warn!(backend = generator.name(), %error, "giving up on answer generation");
                return GenerationOutcome::Unavailable {
                    text: TIMEOUT_MARKER.to_string(),
                    reason: error.to_string(),
                    attempts: attempt,
                };
            }
            Err(_) => {
                let delay = retry_delay(policy.backoff, attempt);
                warn!(
                    backend = generator.name(),
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    "answer generation timed out, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Linear backoff, clamped at `Duration::MAX` for oversized settings.
fn retry_delay(backoff: Duration, attempt: u32) -> Duration {
    backoff.saturating_mul(attempt)
}

// ============ Ollama ============

/// Generates answers with a local Ollama model via `POST /api/generate`.
pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "llama3.2:1b".to_string()),
        })
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

#[async_trait]
impl AnswerGenerator for OllamaGenerator {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.url.trim_end_matches('/')))
            .json(&OllamaRequest {
                model: &self.model,
                prompt,
                stream: false,
            })
            .send()
            .await
            .with_context(|| format!("Ollama connection error (is Ollama running at {}?)", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body);
        }
        let parsed: OllamaResponse = response.json().await?;
        Ok(parsed.response)
    }
}

// ============ Gemini ============

/// Generates answers with the Gemini API (`models/{model}:generateContent`).
///
/// Requires `GEMINI_API_KEY`.
pub struct GeminiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow!("GEMINI_API_KEY environment variable not set"))?;
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "gemini-pro".to_string()),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

fn parse_gemini_response(response: GeminiResponse) -> Result<String> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Gemini returned no candidates"))?;
    let text: String = candidate
        .content
        .parts
        .into_iter()
        .map(|p| p.text)
        .collect::<Vec<_>>()
        .join("");
    if text.trim().is_empty() {
        bail!("Gemini returned an empty answer");
    }
    Ok(text)
}

#[async_trait]
impl AnswerGenerator for GeminiGenerator {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: 0.1,
                max_output_tokens: 2048,
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .context("Gemini request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Gemini API error {}: {}", status, body);
        }
        parse_gemini_response(response.json().await?)
    }
}

/// Create the generator selected by `generation.backend`.
pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn AnswerGenerator>> {
    match config.backend.as_str() {
        "local" => Ok(Box::new(OllamaGenerator::new(config)?)),
        "remote" => Ok(Box::new(GeminiGenerator::new(config)?)),
        other => bail!("Unknown generation backend: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ainsights_core::assemble::{RetrievedSegment, StatSnippet};
    use ainsights_core::models::SourceType;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Slow {
        calls: AtomicU32,
        delay: Duration,
    }

    #[async_trait]
    impl AnswerGenerator for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn model(&self) -> &str {
            "slow"
        }
        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok("late".to_string())
        }
    }

    #[test]
    fn test_retry_delay_grows_linearly_and_saturates() {
        let backoff = Duration::from_millis(500);
        assert_eq!(retry_delay(backoff, 1), Duration::from_millis(500));
        assert_eq!(retry_delay(backoff, 3), Duration::from_millis(1500));
        assert_eq!(retry_delay(Duration::MAX, 2), Duration::MAX);
        assert_eq!(retry_delay(Duration::from_secs(u64::MAX / 2), 4), Duration::MAX);
    }

    /// Times out on the first call, answers on the second.
    struct Flaky {
        calls: AtomicU32,
    }

    #[async_trait]
    impl AnswerGenerator for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }
        fn model(&self) -> &str {
            "flaky"
        }
        async fn generate(&self, _prompt: &str) -> Result<String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok("  North leads sales.  ".to_string())
        }
    }

    struct Broken;

    #[async_trait]
    impl AnswerGenerator for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn model(&self) -> &str {
            "broken"
        }
        async fn generate(&self, _prompt: &str) -> Result<String> {
            bail!("connection refused")
        }
    }

    fn policy() -> GenerationPolicy {
        GenerationPolicy {
            timeout: Duration::from_millis(50),
            max_retries: 1,
            backoff: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_two_timeouts_yield_unavailable_marker() {
        let slow = Slow {
            calls: AtomicU32::new(0),
            delay: Duration::from_secs(5),
        };
        let outcome = generate_with_policy(&slow, "prompt", &policy()).await;
        assert!(!outcome.is_answered());
        assert_eq!(outcome.text(), TIMEOUT_MARKER);
        assert_eq!(outcome.attempts(), 2);
        assert_eq!(slow.calls.load(Ordering::SeqCst), 2);
        match outcome {
            GenerationOutcome::Unavailable { reason, .. } => assert!(reason.contains("timed out")),
            other => panic!("expected unavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retry_after_single_timeout_answers() {
        let flaky = Flaky {
            calls: AtomicU32::new(0),
        };
        let outcome = generate_with_policy(&flaky, "prompt", &policy()).await;
        assert_eq!(
            outcome,
            GenerationOutcome::Answered {
                text: "North leads sales.".to_string(),
                attempts: 2
            }
        );
    }

    #[tokio::test]
    async fn test_backend_error_is_not_retried() {
        let outcome = generate_with_policy(&Broken, "prompt", &policy()).await;
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(outcome.text(), ERROR_MARKER);
    }

    #[test]
    fn test_prompt_contains_rules_context_and_question() {
        let bundle = ContextBundle::merge(
            vec![StatSnippet::new("Rows", "42")],
            vec![RetrievedSegment {
                segment_id: "r.md#0".to_string(),
                document_id: "r.md".to_string(),
                source_type: SourceType::Report,
                ordinal: 0,
                offset: 0,
                distance: 0.2,
                text: "Shipping delays hit the West.".to_string(),
            }],
            vec![],
            10_000,
        );
        let prompt = build_prompt("Why did West sales fall?", &bundle);
        assert!(prompt.contains(NO_DATA_ANSWER));
        assert!(prompt.contains("- Rows: 42"));
        assert!(prompt.contains("Shipping delays hit the West."));
        assert!(prompt.trim_end().ends_with("## Answer"));
        let q = prompt.find("Why did West sales fall?").unwrap();
        let ctx = prompt.find("## Live data statistics").unwrap();
        assert!(ctx < q);
    }

    #[test]
    fn test_prompt_with_empty_context() {
        let bundle = ContextBundle::merge(vec![], vec![], vec![], 100);
        let prompt = build_prompt("Anything?", &bundle);
        assert!(prompt.contains("No statistics or documents are available."));
    }

    #[test]
    fn test_parse_gemini_response() {
        let json = serde_json::json!({
            "candidates": [
                { "content": { "role": "model", "parts": [ { "text": "North " }, { "text": "leads." } ] } }
            ]
        });
        let parsed: GeminiResponse = serde_json::from_value(json).unwrap();
        assert_eq!(parse_gemini_response(parsed).unwrap(), "North leads.");

        let empty: GeminiResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(parse_gemini_response(empty).is_err());
    }

    #[test]
    fn test_ollama_generator_defaults() {
        let generator = OllamaGenerator::new(&GenerationConfig::default()).unwrap();
        assert_eq!(generator.model(), "llama3.2:1b");
        assert_eq!(generator.name(), "ollama");
    }
}
