//! Google Gemini API collaborator implementation.
//!
//! Implements `SynthesisCollaborator` and `ComparisonCollaborator` against the
//! Gemini `generateContent` endpoint, using structured output to get a
//! machine-parseable research payload back.
//!
//! Gemini API specifics:
//! - Auth via `?key=API_KEY` query parameter (not header-based)
//! - Structured output via `generationConfig.responseSchema`
//! - Transport-level token usage reported in `usageMetadata`

use crate::collaborator::{ComparisonCollaborator, SynthesisCollaborator};
use crate::config::LlmConfig;
use crate::error::CollaboratorError;
use crate::types::{
    ComparisonResult, ConfidenceMetrics, ProgressEvent, ReasoningStep, ResearchAnalytics,
    ResearchCost, ResearchSource, ResearchStatus, StageCost, StepKind, SynthesisOutcome,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// The default Google Gemini API base URL.
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Retry policy for transient API failures.
const MAX_RETRIES: u32 = 2;
const INITIAL_BACKOFF_MS: u64 = 500;

/// Token estimates for the staged pipeline. The same figures feed the
/// reasoning trail and the per-stage cost breakdown.
const PLANNING_TOKENS: u64 = 450;
const SOURCING_TOKENS: u64 = 1200;
const TRIANGULATION_TOKENS: u64 = 850;

/// Google Gemini API collaborator.
///
/// Narrates the research pipeline as progress events, then performs one
/// structured `generateContent` call and maps the reply onto
/// [`SynthesisOutcome`].
#[derive(Debug)]
pub struct GeminiCollaborator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
}

impl GeminiCollaborator {
    /// Create a new Gemini collaborator from configuration.
    ///
    /// Reads the API key from the environment variable named in
    /// `config.api_key_env`. Returns `CollaboratorError::MissingApiKey` if the
    /// variable is not set.
    pub fn new(config: &LlmConfig) -> Result<Self, CollaboratorError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            CollaboratorError::MissingApiKey {
                var: config.api_key_env.clone(),
            }
        })?;
        Self::with_api_key(config, api_key)
    }

    /// Create a new Gemini collaborator with an explicitly provided API key.
    pub fn with_api_key(config: &LlmConfig, api_key: String) -> Result<Self, CollaboratorError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CollaboratorError::Connection {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// Build the endpoint URL for a Gemini API call. The key travels as a
    /// `?key=` query parameter.
    fn endpoint_url(&self, method: &str) -> String {
        format!(
            "{}/models/{}:{}?key={}",
            self.base_url, self.model, method, self.api_key
        )
    }

    /// The staged pipeline narrated to observers before the network call.
    fn staged_events(query: &str) -> Vec<ProgressEvent> {
        vec![
            ProgressEvent::new(
                ResearchStatus::Planning,
                ReasoningStep::new(
                    "Analytical Planning",
                    format!("Deconstructing \"{query}\" into categorical research nodes."),
                    StepKind::Plan,
                )
                .with_metrics(PLANNING_TOKENS, 1200),
            ),
            ProgressEvent::new(
                ResearchStatus::Searching,
                ReasoningStep::new(
                    "Aggregated Sourcing",
                    "Crawling cross-domain sources and evaluating metadata.",
                    StepKind::Search,
                )
                .with_metrics(SOURCING_TOKENS, 2500),
            ),
            ProgressEvent::new(
                ResearchStatus::Searching,
                ReasoningStep::new(
                    "Evidence Triangulation",
                    "Detecting contradictions and verifying primary claims.",
                    StepKind::Analyze,
                )
                .with_metrics(TRIANGULATION_TOKENS, 1800),
            ),
        ]
    }

    fn synthesis_prompt(query: &str, context: &str) -> String {
        let mut prompt = format!("Conduct deep research on: \"{query}\"\n");
        if !context.is_empty() {
            prompt.push_str(&format!("Context: {context}\n"));
        }
        prompt.push_str(concat!(
            "\nReturn a strictly structured JSON object for a research dashboard:\n",
            "- report: Markdown content.\n",
            "- summary: Executive summary.\n",
            "- confidence: { score (0-100), explanation, factors: [{label, impact: 'positive'|'negative', value}] }\n",
            "- analytics: {\n",
            "    source_distribution: [{label, value}],\n",
            "    credibility_breakdown: [{label, value}],\n",
            "    recency_trends: [{year, count}],\n",
            "    agreement_stats: [{label, value, color}],\n",
            "    evidence_claims: [{claim, status: 'Supported'|'Contested'|'Inconclusive', supporting_sources, conflicting_sources}]\n",
            "  }\n",
            "- sources: Array with:\n",
            "    title, url, snippet, reasoning, supports_claim, conflicts_with,\n",
            "    credibility: 'High'|'Medium'|'Low', credibility_signal, kind: 'Paper'|'Blog'|'News'|'Report', year\n",
            "- follow_ups: string[]\n",
            "- tokens: { input, output }\n",
        ));
        prompt
    }

    /// Build the JSON request body for a synthesis call.
    fn build_synthesis_body(&self, query: &str, context: &str) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": Self::synthesis_prompt(query, context) }]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": Self::response_schema(),
                "maxOutputTokens": self.max_tokens,
                "temperature": self.temperature,
            }
        })
    }

    /// Response schema constraining the synthesis payload. Field names match
    /// the serde representation of [`SynthesisOutcome`] so the text part can
    /// be deserialized directly.
    fn response_schema() -> Value {
        let label_value = json!({
            "type": "OBJECT",
            "properties": {
                "label": { "type": "STRING" },
                "value": { "type": "NUMBER" }
            }
        });
        json!({
            "type": "OBJECT",
            "properties": {
                "report": { "type": "STRING" },
                "summary": { "type": "STRING" },
                "confidence": {
                    "type": "OBJECT",
                    "properties": {
                        "score": { "type": "NUMBER" },
                        "explanation": { "type": "STRING" },
                        "factors": {
                            "type": "ARRAY",
                            "items": {
                                "type": "OBJECT",
                                "properties": {
                                    "label": { "type": "STRING" },
                                    "impact": { "type": "STRING" },
                                    "value": { "type": "STRING" }
                                }
                            }
                        }
                    }
                },
                "analytics": {
                    "type": "OBJECT",
                    "properties": {
                        "source_distribution": { "type": "ARRAY", "items": label_value.clone() },
                        "credibility_breakdown": { "type": "ARRAY", "items": label_value },
                        "recency_trends": {
                            "type": "ARRAY",
                            "items": {
                                "type": "OBJECT",
                                "properties": {
                                    "year": { "type": "NUMBER" },
                                    "count": { "type": "NUMBER" }
                                }
                            }
                        },
                        "agreement_stats": {
                            "type": "ARRAY",
                            "items": {
                                "type": "OBJECT",
                                "properties": {
                                    "label": { "type": "STRING" },
                                    "value": { "type": "NUMBER" },
                                    "color": { "type": "STRING" }
                                }
                            }
                        },
                        "evidence_claims": {
                            "type": "ARRAY",
                            "items": {
                                "type": "OBJECT",
                                "properties": {
                                    "claim": { "type": "STRING" },
                                    "status": { "type": "STRING" },
                                    "supporting_sources": { "type": "NUMBER" },
                                    "conflicting_sources": { "type": "NUMBER" }
                                }
                            }
                        }
                    }
                },
                "sources": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": {
                            "title": { "type": "STRING" },
                            "url": { "type": "STRING" },
                            "snippet": { "type": "STRING" },
                            "reasoning": { "type": "STRING" },
                            "supports_claim": { "type": "STRING" },
                            "conflicts_with": { "type": "STRING" },
                            "credibility": { "type": "STRING" },
                            "credibility_signal": { "type": "STRING" },
                            "kind": { "type": "STRING" },
                            "year": { "type": "NUMBER" }
                        }
                    }
                },
                "follow_ups": { "type": "ARRAY", "items": { "type": "STRING" } },
                "tokens": {
                    "type": "OBJECT",
                    "properties": {
                        "input": { "type": "NUMBER" },
                        "output": { "type": "NUMBER" }
                    }
                }
            }
        })
    }

    /// Build the JSON request body for a comparison call. No schema here, the
    /// reply is small enough to validate through serde defaults.
    fn build_comparison_body(&self, summary_a: &str, summary_b: &str) -> Value {
        let prompt = format!(
            "Compare Research A and B.\nA: {summary_a}\nB: {summary_b}\n\n\
             Return JSON: {{ added_findings: string[], contradictions: string[], semantic_summary: string }}"
        );
        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "temperature": self.temperature,
            }
        })
    }

    /// POST a `generateContent` body and return the parsed response JSON.
    async fn execute(&self, body: &Value) -> Result<Value, CollaboratorError> {
        let url = self.endpoint_url("generateContent");

        debug!(
            model = self.model.as_str(),
            "Sending Gemini generateContent request"
        );

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| CollaboratorError::ApiRequest {
                message: format!("Request to Gemini API failed: {}", e),
            })?;

        let status = response.status();
        let body_text =
            response
                .text()
                .await
                .map_err(|e| CollaboratorError::ResponseParse {
                    message: format!("Failed to read response body: {}", e),
                })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &body_text));
        }

        serde_json::from_str(&body_text).map_err(|e| CollaboratorError::ResponseParse {
            message: format!("Invalid JSON in response: {}", e),
        })
    }

    /// Map an HTTP error status to the appropriate error variant.
    fn map_http_error(status: reqwest::StatusCode, body_text: &str) -> CollaboratorError {
        match status.as_u16() {
            401 | 403 => CollaboratorError::AuthFailed {
                provider: "Gemini".to_string(),
            },
            429 => CollaboratorError::RateLimited {
                retry_after_secs: 30,
            },
            _ => CollaboratorError::ApiRequest {
                message: format!("HTTP {} from Gemini API: {}", status, body_text),
            },
        }
    }

    /// Pull the generated text out of `candidates[0].content.parts[0]`.
    fn extract_text(body: &Value) -> Result<&str, CollaboratorError> {
        body["candidates"]
            .get(0)
            .and_then(|candidate| candidate["content"]["parts"].get(0))
            .and_then(|part| part["text"].as_str())
            .ok_or_else(|| CollaboratorError::ResponseParse {
                message: "Response has no candidates[0].content.parts[0].text".to_string(),
            })
    }

    /// Parse a synthesis response into the terminal payload.
    ///
    /// Token counts come from the model's own accounting in the payload, with
    /// the transport-level `usageMetadata` as fallback.
    fn parse_synthesis(body: &Value) -> Result<SynthesisOutcome, CollaboratorError> {
        let text = Self::extract_text(body)?;
        let raw: RawSynthesis =
            serde_json::from_str(text).map_err(|e| CollaboratorError::ResponseParse {
                message: format!("Synthesis payload is not valid JSON: {}", e),
            })?;

        let usage = &body["usageMetadata"];
        let input_tokens = if raw.tokens.input > 0 {
            raw.tokens.input
        } else {
            usage["promptTokenCount"].as_u64().unwrap_or(0)
        };
        let output_tokens = if raw.tokens.output > 0 {
            raw.tokens.output
        } else {
            usage["candidatesTokenCount"].as_u64().unwrap_or(0)
        };

        let mut cost = ResearchCost::from_tokens(input_tokens, output_tokens);
        cost.stage_breakdown = vec![
            StageCost::from_stage_tokens("Planning", PLANNING_TOKENS),
            StageCost::from_stage_tokens("Sourcing", SOURCING_TOKENS),
            StageCost::from_stage_tokens("Synthesis", TRIANGULATION_TOKENS),
        ];

        Ok(SynthesisOutcome {
            report: raw.report,
            summary: raw.summary,
            sources: raw.sources,
            confidence: raw.confidence,
            analytics: raw.analytics,
            follow_ups: raw.follow_ups,
            cost,
        })
    }

    fn parse_comparison(body: &Value) -> Result<ComparisonResult, CollaboratorError> {
        let text = Self::extract_text(body)?;
        serde_json::from_str(text).map_err(|e| CollaboratorError::ResponseParse {
            message: format!("Comparison payload is not valid JSON: {}", e),
        })
    }
}

/// Model-reported synthesis payload. Missing fields fall back to defaults so
/// a partial reply still produces a usable (if sparse) outcome.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSynthesis {
    report: String,
    summary: String,
    sources: Vec<ResearchSource>,
    confidence: ConfidenceMetrics,
    analytics: ResearchAnalytics,
    follow_ups: Vec<String>,
    tokens: RawTokens,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTokens {
    input: u64,
    output: u64,
}

#[async_trait]
impl SynthesisCollaborator for GeminiCollaborator {
    async fn generate(
        &self,
        query: &str,
        context: &str,
        progress: mpsc::Sender<ProgressEvent>,
    ) -> Result<SynthesisOutcome, CollaboratorError> {
        for event in Self::staged_events(query) {
            progress
                .send(event)
                .await
                .map_err(|_| CollaboratorError::ChannelClosed)?;
        }

        let body = self.build_synthesis_body(query, context);
        let response = with_retry(|| self.execute(&body)).await?;
        Self::parse_synthesis(&response)
    }
}

#[async_trait]
impl ComparisonCollaborator for GeminiCollaborator {
    async fn compare(
        &self,
        summary_a: &str,
        summary_b: &str,
    ) -> Result<ComparisonResult, CollaboratorError> {
        let body = self.build_comparison_body(summary_a, summary_b);
        let response = with_retry(|| self.execute(&body)).await?;
        Self::parse_comparison(&response)
    }
}

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Retries on `RateLimited` (respects `retry_after_secs`), `Connection`, and
/// `Timeout`. Permanent errors (auth, parse) return immediately.
async fn with_retry<F, Fut, T>(operation: F) -> Result<T, CollaboratorError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let mut last_err = None;
    for attempt in 0..=MAX_RETRIES {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !is_retryable(&e) || attempt == MAX_RETRIES {
                    return Err(e);
                }

                let backoff_ms = compute_backoff(attempt, &e);
                warn!(
                    attempt = attempt + 1,
                    max = MAX_RETRIES,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| CollaboratorError::Connection {
        message: "All retry attempts exhausted".to_string(),
    }))
}

/// Check if an error is retryable (transient).
fn is_retryable(err: &CollaboratorError) -> bool {
    matches!(
        err,
        CollaboratorError::RateLimited { .. }
            | CollaboratorError::Connection { .. }
            | CollaboratorError::Timeout { .. }
    )
}

/// Compute backoff delay, respecting rate limit retry-after hints.
fn compute_backoff(attempt: u32, err: &CollaboratorError) -> u64 {
    let computed = INITIAL_BACKOFF_MS * 2u64.pow(attempt);
    if let CollaboratorError::RateLimited { retry_after_secs } = err {
        return (retry_after_secs * 1000).max(computed);
    }
    computed
}
