//! Best-effort item categorization.
//!
//! The router calls a [`Categorizer`] in a background task after an
//! uncategorized item has been stored and broadcast. Failures never reach
//! the user: the item simply stays in [`DEFAULT_CATEGORY`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::model::{CATEGORIES, DEFAULT_CATEGORY};

#[derive(Debug, thiserror::Error)]
pub enum CategorizeError {
    #[error("categorization request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("categorization response malformed: {0}")]
    Malformed(String),
    #[error("categorization timed out")]
    Timeout,
}

/// Suggests a category for an item name.
#[async_trait]
pub trait Categorizer: Send + Sync {
    async fn categorize(&self, name: &str) -> Result<String, CategorizeError>;
}

/// Map a raw suggestion onto the known categories (case-insensitive).
/// Anything unrecognized becomes [`DEFAULT_CATEGORY`].
pub fn normalize_category(raw: &str) -> &'static str {
    let raw = raw.trim();
    CATEGORIES
        .iter()
        .copied()
        .find(|c| c.eq_ignore_ascii_case(raw))
        .unwrap_or(DEFAULT_CATEGORY)
}

fn system_prompt() -> String {
    format!(
        "Assign the item to one of following categories: {}",
        CATEGORIES.join(", ")
    )
}

/// Always answers [`DEFAULT_CATEGORY`]; used when no backend is configured.
#[derive(Debug, Default, Clone)]
pub struct NoopCategorizer;

#[async_trait]
impl Categorizer for NoopCategorizer {
    async fn categorize(&self, _name: &str) -> Result<String, CategorizeError> {
        Ok(DEFAULT_CATEGORY.to_string())
    }
}

/// Lookup table keyed by lowercase item name.
#[derive(Debug, Default, Clone)]
pub struct FixedCategorizer {
    table: HashMap<String, String>,
}

impl FixedCategorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, category: &str) -> Self {
        self.table.insert(name.to_lowercase(), category.to_string());
        self
    }
}

#[async_trait]
impl Categorizer for FixedCategorizer {
    async fn categorize(&self, name: &str) -> Result<String, CategorizeError> {
        Ok(self
            .table
            .get(&name.trim().to_lowercase())
            .cloned()
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()))
    }
}

/// OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4.1-nano".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    response_format: serde_json::Value,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Deserialize)]
struct CategoryAnswer {
    category: String,
}

/// Asks a language model to pick one of [`CATEGORIES`].
pub struct OpenAiCategorizer {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiCategorizer {
    pub fn new(config: OpenAiConfig) -> Result<Self, CategorizeError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    fn request_body(&self, name: &str) -> ChatRequest<'_> {
        ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt(),
                },
                ChatMessage {
                    role: "user",
                    content: name.to_string(),
                },
            ],
            response_format: serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "item",
                    "strict": true,
                    "schema": {
                        "type": "object",
                        "properties": { "category": { "type": "string" } },
                        "required": ["category"],
                        "additionalProperties": false
                    }
                }
            }),
        }
    }
}

/// Pull `{"category": ...}` out of the first choice.
fn parse_answer(response: ChatResponse) -> Result<String, CategorizeError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| CategorizeError::Malformed("no choices".into()))?;
    let answer: CategoryAnswer =
        serde_json::from_str(&content).map_err(|e| CategorizeError::Malformed(e.to_string()))?;
    Ok(answer.category)
}

#[async_trait]
impl Categorizer for OpenAiCategorizer {
    async fn categorize(&self, name: &str) -> Result<String, CategorizeError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(name))
            .send()
            .await?
            .error_for_status()?;
        let body: ChatResponse = response.json().await?;
        let category = parse_answer(body)?;
        log::debug!("Categorized {name:?} as {category:?}");
        Ok(category)
    }
}
