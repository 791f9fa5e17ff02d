use async_trait::async_trait;
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::prompts;
use crate::config::Config;
use crate::edgar::client::CompanyFacts;
use crate::edgar::parsing::SectionName;
use crate::error::PipelineError;

/// Total attempts per chat call.
const MAX_ATTEMPTS: u32 = 3;

pub const PARSE_FAILED: &str = "parse_failed";
pub const MAX_RETRIES_EXCEEDED: &str = "max_retries_exceeded";
pub const NO_SUCCESSFUL_ANALYSES: &str = "no_successful_analyses";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("rate limited by model endpoint")]
    RateLimited,
    #[error("{0}")]
    Other(String),
}

/// Seam over the chat-completion endpoint so the retry and recovery logic
/// can be exercised without a network.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ChatError>;
}

/// OpenAI-style chat completions over HTTP. Temperature is fixed low; the
/// prompts demand a bare JSON object and near-deterministic output.
pub struct OpenAiChat {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(OpenAiChat {
            client,
            endpoint: chat_endpoint(&config.llm_base_url),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
        })
    }
}

fn chat_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{}/chat/completions", base)
    } else {
        format!("{}/v1/chat/completions", base)
    }
}

#[async_trait]
impl ChatCompletion for OpenAiChat {
    async fn complete(&self, prompt: &str) -> Result<String, ChatError> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.1,
            "max_tokens": 2000,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Other(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ChatError::RateLimited);
        }
        if !status.is_success() {
            return Err(ChatError::Other(format!(
                "chat endpoint returned {}",
                status
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ChatError::Other(e.to_string()))?;

        if let Some(tokens) = payload["usage"]["total_tokens"].as_u64() {
            debug!("chat completion used {} tokens", tokens);
        }

        let content = payload["choices"]
            .get(0)
            .and_then(|choice| choice["message"]["content"].as_str())
            .unwrap_or_default()
            .to_string();
        Ok(content)
    }
}

/// One structured analysis per (filing, section). `payload` and `error`
/// are mutually exclusive; `raw_text` preserves the model's output when
/// parsing failed, so nothing is silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub section: SectionName,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
}

impl AnalysisResult {
    fn ok(section: SectionName, model: &str, payload: Value) -> Self {
        AnalysisResult {
            section,
            model: model.to_string(),
            payload: Some(payload),
            error: None,
            raw_text: None,
        }
    }

    fn failure(
        section: SectionName,
        model: &str,
        error: impl Into<String>,
        raw_text: Option<String>,
    ) -> Self {
        AnalysisResult {
            section,
            model: model.to_string(),
            payload: None,
            error: Some(error.into()),
            raw_text,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.payload.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BriefResult {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
}

impl BriefResult {
    fn failure(model: &str, error: impl Into<String>, raw_text: Option<String>) -> Self {
        BriefResult {
            model: model.to_string(),
            payload: None,
            error: Some(error.into()),
            raw_text,
        }
    }
}

/// Orchestrates LLM analysis: per-section structured analysis and the
/// final brief synthesis, with rate-limit retry and malformed-output
/// recovery.
pub struct Analyzer {
    chat: Arc<dyn ChatCompletion>,
    model: String,
    max_section_words: usize,
}

impl Analyzer {
    pub fn new(chat: Arc<dyn ChatCompletion>, model: String, max_section_words: usize) -> Self {
        Analyzer {
            chat,
            model,
            max_section_words,
        }
    }

    /// Analyzes one section. Sections without a prompt template are
    /// rejected locally with no network call.
    pub async fn analyze_section(
        &self,
        section: SectionName,
        text: &str,
        ticker: &str,
    ) -> AnalysisResult {
        let Some(template) = prompts::section_prompt(section) else {
            return AnalysisResult::failure(
                section,
                &self.model,
                format!("no prompt template for section: {}", section),
                None,
            );
        };

        let label = format!("{}/{}", ticker, section);
        let truncated = self.truncate_words(text, &label);
        let prompt = template
            .replace("{ticker}", ticker)
            .replace("{text}", &truncated);

        match self.complete_with_retry(&prompt, &label).await {
            Ok(raw) => match parse_json_response(&raw) {
                Ok(payload) => AnalysisResult::ok(section, &self.model, payload),
                Err(e) => {
                    error!("[{}] {}", label, e);
                    AnalysisResult::failure(section, &self.model, PARSE_FAILED, Some(raw))
                }
            },
            Err(kind) => AnalysisResult::failure(section, &self.model, kind, None),
        }
    }

    /// Synthesizes the final investment brief from all section analyses
    /// plus the annual metric series. Bookkeeping fields (section, model)
    /// never reach the prompt. Synthesis is skipped entirely when no
    /// section analysis succeeded.
    pub async fn generate_investment_brief(
        &self,
        analyses: &[AnalysisResult],
        ticker: &str,
        facts: &CompanyFacts,
    ) -> BriefResult {
        let mut embedded = serde_json::Map::new();
        let mut successes = 0;
        for analysis in analyses {
            let value = match &analysis.payload {
                Some(payload) => {
                    successes += 1;
                    payload.clone()
                }
                None => json!({ "error": analysis.error }),
            };
            embedded.insert(analysis.section.to_string(), value);
        }

        if successes == 0 {
            warn!(
                "[{}/brief] skipping synthesis: no section analysis succeeded",
                ticker
            );
            return BriefResult::failure(&self.model, NO_SUCCESSFUL_ANALYSES, None);
        }

        let facts_summary = json!({
            "company_name": facts.company_name,
            "revenue": facts.revenue,
            "net_income": facts.net_income,
            "total_assets": facts.total_assets,
        });
        let company = if facts.company_name.is_empty() {
            ticker
        } else {
            facts.company_name.as_str()
        };
        let fiscal_year = facts
            .revenue
            .first()
            .and_then(|v| v.fiscal_year)
            .map(|year| year.to_string())
            .unwrap_or_default();

        let prompt = prompts::INVESTMENT_BRIEF_PROMPT
            .replace("{ticker}", ticker)
            .replace("{company}", company)
            .replace("{fiscal_year}", &fiscal_year)
            .replace(
                "{analyses_json}",
                &serde_json::to_string_pretty(&embedded).unwrap_or_default(),
            )
            .replace(
                "{facts_json}",
                &serde_json::to_string_pretty(&facts_summary).unwrap_or_default(),
            );

        let label = format!("{}/brief", ticker);
        match self.complete_with_retry(&prompt, &label).await {
            Ok(raw) => match parse_json_response(&raw) {
                Ok(payload) => BriefResult {
                    model: self.model.clone(),
                    payload: Some(payload),
                    error: None,
                    raw_text: None,
                },
                Err(e) => {
                    error!("[{}] {}", label, e);
                    BriefResult::failure(&self.model, PARSE_FAILED, Some(raw))
                }
            },
            Err(kind) => BriefResult::failure(&self.model, kind, None),
        }
    }

    /// Retries only on rate-limit responses; any other failure is assumed
    /// non-recoverable within the same request shape and returned at once.
    async fn complete_with_retry(&self, prompt: &str, label: &str) -> Result<String, String> {
        for attempt in 0..MAX_ATTEMPTS {
            match self.chat.complete(prompt).await {
                Ok(raw) => return Ok(raw),
                Err(ChatError::RateLimited) => {
                    let wait = 1u64 << (attempt + 1);
                    warn!(
                        "[{}] model endpoint rate limited, retrying in {}s (attempt {}/{})",
                        label,
                        wait,
                        attempt + 1,
                        MAX_ATTEMPTS
                    );
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                Err(ChatError::Other(message)) => {
                    error!("[{}] chat call failed: {}", label, message);
                    return Err(message);
                }
            }
        }
        Err(MAX_RETRIES_EXCEEDED.to_string())
    }

    /// Keeps the prefix of the text; leading text is assumed most
    /// representative of the section.
    fn truncate_words(&self, text: &str, label: &str) -> String {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.len() <= self.max_section_words {
            return text.to_string();
        }
        info!(
            "[{}] truncating text from {} to {} words",
            label,
            words.len(),
            self.max_section_words
        );
        words[..self.max_section_words].join(" ")
    }
}

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\s*\n?(.*?)\n?\s*```$").unwrap());
static BRACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

/// Parses a model response as JSON: strip a Markdown code fence if
/// present, try a direct parse, then fall back to the largest `{...}`
/// substring.
pub fn parse_json_response(text: &str) -> Result<Value, PipelineError> {
    let mut cleaned = text.trim();
    if let Some(captures) = FENCE_RE.captures(cleaned) {
        if let Some(inner) = captures.get(1) {
            cleaned = inner.as_str().trim();
        }
    }

    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return Ok(value);
    }
    if let Some(found) = BRACE_RE.find(cleaned) {
        if let Ok(value) = serde_json::from_str::<Value>(found.as_str()) {
            return Ok(value);
        }
    }

    Err(PipelineError::ParseFailed {
        snippet: cleaned.chars().take(200).collect(),
    })
}

/// Shape checks the orchestrator deliberately does not enforce: a model
/// deviating from instructions must surface as a data-quality error
/// downstream, not be silently accepted.
pub fn validate_brief(brief: &Value) -> Vec<String> {
    let mut errors = Vec::new();

    for field in ["bull_case", "bear_case"] {
        match brief.get(field).and_then(Value::as_array) {
            Some(items) if items.len() == 3 => {}
            Some(items) => errors.push(format!(
                "{} must have exactly 3 points, got {}",
                field,
                items.len()
            )),
            None => errors.push(format!("{} is missing or not a list", field)),
        }
    }

    // Models occasionally emit "7.0" for an integer field; an integral
    // float is accepted, a fractional one is not.
    match brief.get("confidence_score").and_then(Value::as_f64) {
        Some(score) if score.fract() == 0.0 && (1.0..=10.0).contains(&score) => {}
        Some(score) => errors.push(format!(
            "confidence_score must be an integer in [1, 10], got {}",
            score
        )),
        None => errors.push("confidence_score is missing or not a number".to_string()),
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    struct MockChat {
        responses: Mutex<VecDeque<Result<String, ChatError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl MockChat {
        fn new(responses: Vec<Result<String, ChatError>>) -> Arc<Self> {
            Arc::new(MockChat {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatCompletion for MockChat {
        async fn complete(&self, prompt: &str) -> Result<String, ChatError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected chat call")
        }
    }

    fn analyzer(chat: Arc<MockChat>, max_words: usize) -> Analyzer {
        Analyzer::new(chat, "test-model".to_string(), max_words)
    }

    fn empty_facts() -> CompanyFacts {
        CompanyFacts {
            company_name: String::new(),
            cik: "320193".to_string(),
            revenue: vec![],
            net_income: vec![],
            total_assets: vec![],
        }
    }

    #[test]
    fn test_parse_json_response_code_fence() {
        let value = parse_json_response("```json\n{\"a\":1}\n```").unwrap();
        assert_eq!(value, json!({"a": 1}));

        let value = parse_json_response("```\n{\"b\": 2}\n```").unwrap();
        assert_eq!(value, json!({"b": 2}));
    }

    #[test]
    fn test_parse_json_response_embedded_object() {
        let value =
            parse_json_response("Here is the analysis you asked for: {\"a\": 1} hope it helps")
                .unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_parse_json_response_no_json() {
        let err = parse_json_response("no structured output here").unwrap_err();
        assert!(matches!(err, PipelineError::ParseFailed { .. }));
    }

    #[tokio::test]
    async fn test_unknown_section_rejected_without_network() {
        let chat = MockChat::new(vec![]);
        let analyzer = analyzer(chat.clone(), 100);
        let result = analyzer
            .analyze_section(SectionName::Financials, "some text", "AAPL")
            .await;
        assert!(!result.is_ok());
        assert!(result.error.as_deref().unwrap().contains("no prompt template"));
        assert_eq!(chat.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retry_waits_one_backoff() {
        let chat = MockChat::new(vec![
            Err(ChatError::RateLimited),
            Ok("{\"business_model\": \"sells things\"}".to_string()),
        ]);
        let analyzer = analyzer(chat.clone(), 100);

        let start = Instant::now();
        let result = analyzer
            .analyze_section(SectionName::Business, "we sell things", "AAPL")
            .await;
        let elapsed = start.elapsed();

        assert!(result.is_ok());
        assert_eq!(chat.call_count(), 2);
        // Exactly one backoff interval (2^1 seconds), not the whole ceiling.
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhaustion() {
        let chat = MockChat::new(vec![
            Err(ChatError::RateLimited),
            Err(ChatError::RateLimited),
            Err(ChatError::RateLimited),
        ]);
        let analyzer = analyzer(chat.clone(), 100);
        let result = analyzer
            .analyze_section(SectionName::Business, "text", "AAPL")
            .await;
        assert_eq!(result.error.as_deref(), Some(MAX_RETRIES_EXCEEDED));
        assert_eq!(chat.call_count(), 3);
    }

    #[tokio::test]
    async fn test_non_rate_limit_failure_not_retried() {
        let chat = MockChat::new(vec![Err(ChatError::Other("boom".to_string()))]);
        let analyzer = analyzer(chat.clone(), 100);
        let result = analyzer
            .analyze_section(SectionName::Business, "text", "AAPL")
            .await;
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(chat.call_count(), 1);
    }

    #[tokio::test]
    async fn test_parse_failed_preserves_raw_text() {
        let chat = MockChat::new(vec![Ok("utter nonsense".to_string())]);
        let analyzer = analyzer(chat, 100);
        let result = analyzer
            .analyze_section(SectionName::Business, "text", "AAPL")
            .await;
        assert_eq!(result.error.as_deref(), Some(PARSE_FAILED));
        assert_eq!(result.raw_text.as_deref(), Some("utter nonsense"));
    }

    #[tokio::test]
    async fn test_truncation_keeps_prefix() {
        let chat = MockChat::new(vec![Ok("{}".to_string())]);
        let analyzer = analyzer(chat.clone(), 3);
        let text = "alpha beta gamma delta epsilon";
        analyzer
            .analyze_section(SectionName::Business, text, "AAPL")
            .await;
        let prompt = chat.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("alpha beta gamma"));
        assert!(!prompt.contains("delta"));
    }

    #[tokio::test]
    async fn test_brief_skipped_when_no_analysis_succeeded() {
        let chat = MockChat::new(vec![]);
        let analyzer = analyzer(chat.clone(), 100);
        let failed = AnalysisResult::failure(
            SectionName::Business,
            "test-model",
            MAX_RETRIES_EXCEEDED,
            None,
        );
        let brief = analyzer
            .generate_investment_brief(&[failed], "AAPL", &empty_facts())
            .await;
        assert_eq!(brief.error.as_deref(), Some(NO_SUCCESSFUL_ANALYSES));
        assert_eq!(chat.call_count(), 0);
    }

    #[tokio::test]
    async fn test_brief_prompt_strips_bookkeeping_tags() {
        let chat = MockChat::new(vec![Ok("{\"overall_signal\": \"neutral\"}".to_string())]);
        let analyzer = analyzer(chat.clone(), 100);
        let ok = AnalysisResult::ok(
            SectionName::Business,
            "test-model",
            json!({"business_model": "sells widgets"}),
        );
        analyzer
            .generate_investment_brief(&[ok], "AAPL", &empty_facts())
            .await;
        let prompt = chat.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("sells widgets"));
        assert!(!prompt.contains("test-model"));
    }

    #[test]
    fn test_validate_brief_shape() {
        let good = json!({
            "bull_case": ["a", "b", "c"],
            "bear_case": ["x", "y", "z"],
            "confidence_score": 7,
        });
        assert!(validate_brief(&good).is_empty());

        let bad = json!({
            "bull_case": ["a", "b"],
            "bear_case": ["x", "y", "z"],
            "confidence_score": 11,
        });
        let errors = validate_brief(&bad);
        assert_eq!(errors.len(), 2);

        let missing = json!({});
        assert_eq!(validate_brief(&missing).len(), 3);
    }

    #[test]
    fn test_validate_brief_accepts_integral_float_confidence() {
        let brief = json!({
            "bull_case": ["a", "b", "c"],
            "bear_case": ["x", "y", "z"],
            "confidence_score": 7.0,
        });
        assert!(validate_brief(&brief).is_empty());

        let fractional = json!({
            "bull_case": ["a", "b", "c"],
            "bear_case": ["x", "y", "z"],
            "confidence_score": 7.5,
        });
        let errors = validate_brief(&fractional);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("confidence_score"));
    }

    #[test]
    fn test_chat_endpoint_resolution() {
        assert_eq!(
            chat_endpoint("https://api.groq.com/openai/v1"),
            "https://api.groq.com/openai/v1/chat/completions"
        );
        assert_eq!(
            chat_endpoint("http://localhost:1234/v1/chat/completions"),
            "http://localhost:1234/v1/chat/completions"
        );
        assert_eq!(
            chat_endpoint("https://example.com"),
            "https://example.com/v1/chat/completions"
        );
    }
}
