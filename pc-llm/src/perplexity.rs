//! Perplexity chat completions: one JSON body per request, with citations
//! and optional related questions alongside the answer.

use crate::adapter::{
    ProviderAdapter, WireMessage, json_headers, messages_with_system_prompt, normalize_citations,
};
use crate::config::{ConfigConstraints, ConfigOption, RecencyFilter, SessionConfig};
use crate::error::{ChatError, Result};
use crate::history::ConversationHistory;
use crate::types::Reply;
use serde::{Deserialize, Serialize};

const PERPLEXITY_CHAT_COMPLETIONS_URL: &str = "https://api.perplexity.ai/chat/completions";

const MODELS: &[&str] = &[
    "llama-3.1-sonar-small-128k-chat",
    "llama-3.1-sonar-large-128k-chat",
    "llama-3.1-sonar-small-128k-online",
    "llama-3.1-sonar-large-128k-online",
    "llama-3.1-sonar-huge-128k-online",
];

const OPTIONS: &[ConfigOption] = &[
    ConfigOption::Model,
    ConfigOption::Temperature,
    ConfigOption::TopP,
    ConfigOption::TopK,
    ConfigOption::MaxTokens,
    ConfigOption::PresencePenalty,
    ConfigOption::FrequencyPenalty,
    ConfigOption::Language,
    ConfigOption::SearchRecencyFilter,
    ConfigOption::ReturnCitations,
    ConfigOption::ReturnRelatedQuestions,
];

#[derive(Debug, Clone)]
pub struct PerplexityAdapter {
    endpoint: String,
}

impl Default for PerplexityAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PerplexityAdapter {
    pub fn new() -> Self {
        Self {
            endpoint: PERPLEXITY_CHAT_COMPLETIONS_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }
}

impl ProviderAdapter for PerplexityAdapter {
    fn name(&self) -> &'static str {
        "perplexity"
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn api_key_env(&self) -> &'static str {
        "PERPLEXITY_API_KEY"
    }

    fn constraints(&self) -> ConfigConstraints {
        ConfigConstraints {
            models: MODELS,
            options: OPTIONS,
            temperature_max: 2.0,
            streaming: false,
            requires_max_tokens: false,
        }
    }

    fn default_config(&self) -> SessionConfig {
        SessionConfig {
            temperature: 0.2,
            top_p: 0.9,
            frequency_penalty: 1.0,
            return_citations: true,
            ..SessionConfig::baseline("llama-3.1-sonar-small-128k-online")
        }
    }

    fn build_headers(&self, api_key: &str) -> Result<reqwest::header::HeaderMap> {
        let bearer = format!("Bearer {api_key}");
        json_headers(&[("authorization", bearer.as_str())])
    }

    fn build_request_body(
        &self,
        history: &ConversationHistory,
        config: &SessionConfig,
    ) -> Result<serde_json::Value> {
        let req = PerplexityRequest {
            model: &config.model,
            messages: messages_with_system_prompt(history, config),
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            presence_penalty: config.presence_penalty,
            frequency_penalty: config.frequency_penalty,
            return_citations: config.return_citations,
            return_related_questions: config.return_related_questions,
            max_tokens: config.max_tokens,
            search_recency_filter: config.search_recency_filter,
        };
        Ok(serde_json::to_value(req)?)
    }

    fn parse_response(&self, raw: &str) -> Result<Reply> {
        let parsed: PerplexityResponse = serde_json::from_str(raw)?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            ChatError::Parse("perplexity response missing choices".to_string())
        })?;
        let text = choice.message.content.ok_or_else(|| {
            ChatError::Parse("perplexity response missing message content".to_string())
        })?;

        // Older responses nest citations in the message; current ones put
        // them at the top level.
        let citations = choice
            .message
            .citations
            .or(parsed.citations)
            .unwrap_or_default();

        Ok(Reply {
            text,
            citations: normalize_citations(&citations),
            related_questions: parsed.related_questions,
        })
    }
}

#[derive(Debug, Serialize)]
struct PerplexityRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f64,
    top_p: f64,
    top_k: u32,
    presence_penalty: f64,
    frequency_penalty: f64,
    return_citations: bool,
    return_related_questions: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_recency_filter: Option<RecencyFilter>,
}

#[derive(Debug, Deserialize)]
struct PerplexityResponse {
    choices: Vec<PerplexityChoice>,
    #[serde(default)]
    citations: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    related_questions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PerplexityChoice {
    message: PerplexityMessage,
}

#[derive(Debug, Deserialize)]
struct PerplexityMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    citations: Option<Vec<serde_json::Value>>,
}
