//! AI content generation
//!
//! Produces post text from a topic prompt and a tone, keeping a small
//! rolling window of recent outputs so consecutive posts don't repeat
//! themselves. The window lives in process memory only; losing it on
//! restart just means one slightly-less-guarded generation.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ContentError, Result};

/// Hard ceiling for a post on the platform.
pub const MAX_POST_LENGTH: usize = 280;

/// How many recent generations to keep for repetition avoidance.
const HISTORY_CAP: usize = 20;

/// Pause between generations in `generate_multiple`; rate-considerate,
/// not a correctness requirement.
const MULTI_GENERATION_PAUSE: Duration = Duration::from_millis(500);

/// Prompt framings rotated across multi-generation requests.
const FRAMINGS: &[&str] = &[
    "Share insights about:",
    "What are your thoughts on:",
    "Here's something interesting about:",
    "Quick take on:",
];

/// Tone directive for generated posts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tone {
    #[default]
    Engaging,
    Professional,
    Casual,
    Humorous,
    Informative,
}

impl Tone {
    pub const ALL: [Tone; 5] = [
        Tone::Engaging,
        Tone::Professional,
        Tone::Casual,
        Tone::Humorous,
        Tone::Informative,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Engaging => "engaging",
            Tone::Professional => "professional",
            Tone::Casual => "casual",
            Tone::Humorous => "humorous",
            Tone::Informative => "informative",
        }
    }

    fn directive(&self) -> &'static str {
        match self {
            Tone::Engaging => "engaging and attention-grabbing",
            Tone::Professional => "professional and polished",
            Tone::Casual => "casual and conversational",
            Tone::Humorous => "light and humorous",
            Tone::Informative => "informative and factual",
        }
    }
}

impl std::str::FromStr for Tone {
    type Err = crate::error::ChirpcastError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "engaging" => Ok(Tone::Engaging),
            "professional" => Ok(Tone::Professional),
            "casual" => Ok(Tone::Casual),
            "humorous" | "funny" => Ok(Tone::Humorous),
            "informative" => Ok(Tone::Informative),
            other => Err(crate::error::ChirpcastError::InvalidInput(format!(
                "Unknown tone: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Tone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Content generation boundary consumed by the scheduler
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Generate one post for the given prompt and tone
    async fn generate(&self, prompt: &str, tone: Tone, max_length: usize) -> Result<String>;

    /// Generate `count` variations of a prompt.
    ///
    /// When no tone is pinned, tones rotate for variety; prompts are
    /// lightly rephrased by rotating through a fixed framing set.
    async fn generate_multiple(
        &self,
        prompt: &str,
        count: usize,
        tone: Option<Tone>,
    ) -> Result<Vec<String>> {
        let mut results = Vec::with_capacity(count);
        for i in 0..count {
            let effective_tone = tone.unwrap_or(Tone::ALL[i % Tone::ALL.len()]);
            let framed = format!("{} {}", framing_for(i), prompt);
            results.push(self.generate(&framed, effective_tone, MAX_POST_LENGTH).await?);
            if i + 1 < count {
                tokio::time::sleep(MULTI_GENERATION_PAUSE).await;
            }
        }
        Ok(results)
    }
}

/// The framing used for the i-th variation
pub fn framing_for(index: usize) -> &'static str {
    FRAMINGS[index % FRAMINGS.len()]
}

/// Curated fallback topic suggestions by category
pub fn suggest_topics(category: &str) -> Vec<&'static str> {
    match category.to_lowercase().as_str() {
        "tech" | "technology" => vec![
            "The hidden costs of technical debt",
            "Why boring technology wins",
            "What changed in software deployment this decade",
            "Open source sustainability",
        ],
        "ai" => vec![
            "How teams actually use AI assistants day to day",
            "The gap between AI demos and AI products",
            "Evaluating AI output quality",
        ],
        "productivity" => vec![
            "Deep work in an interrupt-driven job",
            "Meetings that should have been a message",
            "Single-tasking as a superpower",
        ],
        _ => vec![
            "Something you learned this week",
            "A tool that quietly improved your workflow",
            "An opinion you changed your mind about",
        ],
    }
}

/// OpenAI-style chat completion client
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    history: Mutex<VecDeque<String>>,
}

impl OpenAiGenerator {
    pub fn new(api_key: Option<String>, base_url: String, model: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            base_url,
            model,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(
            config.content_api_key(),
            config.content.base_url.clone(),
            config.content.model.clone(),
            Duration::from_secs(config.scheduler.request_timeout_secs),
        )
    }

    fn build_instruction(&self, prompt: &str, tone: Tone, max_length: usize) -> String {
        let mut instruction = format!(
            "Write a single social media post about: {}\n\
             Tone: {}.\n\
             Hard limit: {} characters. No hashtag spam, no surrounding quotes.",
            prompt,
            tone.directive(),
            max_length
        );

        let history = self.history.lock().expect("history lock");
        if !history.is_empty() {
            instruction.push_str("\nDo not repeat any of these recent posts:\n");
            for (i, past) in history.iter().enumerate() {
                instruction.push_str(&format!("{}. {}\n", i + 1, past));
            }
        }

        instruction
    }

    fn remember(&self, text: &str) {
        let mut history = self.history.lock().expect("history lock");
        history.push_front(text.to_string());
        history.truncate(HISTORY_CAP);
    }

    /// Snapshot of the repetition-avoidance window, most recent first
    pub fn recent_history(&self) -> Vec<String> {
        self.history.lock().expect("history lock").iter().cloned().collect()
    }
}

#[async_trait]
impl ContentGenerator for OpenAiGenerator {
    async fn generate(&self, prompt: &str, tone: Tone, max_length: usize) -> Result<String> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            ContentError::MissingConfig("no API key available".to_string())
        })?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You write short, original social media posts. Reply with the post text only."
                },
                {
                    "role": "user",
                    "content": self.build_instruction(prompt, tone, max_length)
                }
            ],
            "max_tokens": 120,
            "temperature": 0.9,
        });

        let url = format!("{}/v1/chat/completions", self.base_url);
        debug!(model = %self.model, "requesting content generation");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ContentError::Generation(format!("request failed: {}", e)))?;

        let status = resp.status().as_u16();
        if status == 401 || status == 403 {
            return Err(ContentError::MissingConfig(format!(
                "API key rejected (HTTP {})",
                status
            ))
            .into());
        }
        if status == 429 {
            return Err(ContentError::QuotaExceeded("provider returned 429".to_string()).into());
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            if text.contains("content_policy") || text.contains("content_filter") {
                return Err(ContentError::SafetyRejected(text).into());
            }
            warn!(status, body = %text, "content API error");
            return Err(ContentError::Generation(format!("HTTP {}: {}", status, text)).into());
        }

        let api_resp: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| ContentError::Generation(format!("invalid response: {}", e)))?;

        let choice = api_resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ContentError::Generation("empty response".to_string()))?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(ContentError::SafetyRejected(
                "the provider's safety filter blocked this prompt".to_string(),
            )
            .into());
        }

        let text = post_process(&choice.message.content, max_length);
        if text.is_empty() {
            return Err(ContentError::Generation("model returned no text".to_string()).into());
        }

        self.remember(&text);
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// Clean up raw model output: strip wrapping quotes and a leading
/// "Tweet:" label, then truncate to the ceiling with a trailing
/// ellipsis marker.
pub fn post_process(raw: &str, max_length: usize) -> String {
    let mut text = raw.trim();

    for label in ["Tweet:", "tweet:", "TWEET:"] {
        if let Some(rest) = text.strip_prefix(label) {
            text = rest.trim_start();
            break;
        }
    }

    if text.len() >= 2 {
        for (open, close) in [('"', '"'), ('\'', '\''), ('\u{201c}', '\u{201d}')] {
            if text.starts_with(open) && text.ends_with(close) {
                text = text[open.len_utf8()..text.len() - close.len_utf8()].trim();
                break;
            }
        }
    }

    let char_count = text.chars().count();
    if char_count > max_length {
        let truncated: String = text.chars().take(max_length.saturating_sub(1)).collect();
        format!("{}\u{2026}", truncated.trim_end())
    } else {
        text.to_string()
    }
}

/// Canned generator for tests and mock runs
pub struct FixedGenerator {
    responses: Mutex<VecDeque<String>>,
    fallback: String,
    failure: Option<ContentError>,
}

impl FixedGenerator {
    /// Always returns `text`
    pub fn always(text: &str) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: text.to_string(),
            failure: None,
        }
    }

    /// Returns the scripted responses in order, then the last one forever
    pub fn scripted(responses: Vec<String>) -> Self {
        let fallback = responses.last().cloned().unwrap_or_default();
        Self {
            responses: Mutex::new(responses.into()),
            fallback,
            failure: None,
        }
    }

    /// Always fails with the given error
    pub fn failing(error: ContentError) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: String::new(),
            failure: Some(error),
        }
    }
}

#[async_trait]
impl ContentGenerator for FixedGenerator {
    async fn generate(&self, _prompt: &str, _tone: Tone, max_length: usize) -> Result<String> {
        if let Some(err) = &self.failure {
            return Err(err.clone().into());
        }
        let next = self
            .responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(post_process(&next, max_length))
    }
}
