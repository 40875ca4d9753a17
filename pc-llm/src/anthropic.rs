//! Anthropic Messages API.
//!
//! The system prompt travels in the top-level `system` field; `messages`
//! only holds user and assistant turns. Streams are event-typed SSE.

use crate::adapter::{ChunkOutcome, ProviderAdapter, StreamAccumulator, json_headers};
use crate::config::{ConfigConstraints, ConfigOption, SessionConfig};
use crate::error::{ChatError, Result};
use crate::history::ConversationHistory;
use crate::sse::SseEvent;
use crate::types::{Reply, Role};
use serde::{Deserialize, Serialize};

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const MODELS: &[&str] = &[
    "claude-3-5-sonnet-20240620",
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-3-haiku-20240307",
];

const OPTIONS: &[ConfigOption] = &[
    ConfigOption::Model,
    ConfigOption::Temperature,
    ConfigOption::TopP,
    ConfigOption::TopK,
    ConfigOption::MaxTokens,
    ConfigOption::Stream,
    ConfigOption::Language,
];

#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    endpoint: String,
}

impl Default for AnthropicAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self {
            endpoint: ANTHROPIC_MESSAGES_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn api_key_env(&self) -> &'static str {
        "ANTHROPIC_API_KEY"
    }

    fn constraints(&self) -> ConfigConstraints {
        ConfigConstraints {
            models: MODELS,
            options: OPTIONS,
            temperature_max: 1.0,
            streaming: true,
            requires_max_tokens: true,
        }
    }

    fn default_config(&self) -> SessionConfig {
        SessionConfig {
            max_tokens: Some(1000),
            stream: true,
            ..SessionConfig::baseline("claude-3-5-sonnet-20240620")
        }
    }

    fn build_headers(&self, api_key: &str) -> Result<reqwest::header::HeaderMap> {
        json_headers(&[
            ("x-api-key", api_key),
            ("anthropic-version", ANTHROPIC_VERSION),
        ])
    }

    fn build_request_body(
        &self,
        history: &ConversationHistory,
        config: &SessionConfig,
    ) -> Result<serde_json::Value> {
        let messages = history
            .messages()
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| AnthropicMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();
        let req = AnthropicRequest {
            model: &config.model,
            system: config.system_prompt(),
            messages,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: Some(config.top_k).filter(|k| *k > 0),
            stream: config.stream,
        };
        Ok(serde_json::to_value(req)?)
    }

    fn parse_response(&self, raw: &str) -> Result<Reply> {
        let parsed: AnthropicResponse = serde_json::from_str(raw)?;
        let mut text = String::new();
        let mut saw_text = false;
        for block in parsed.content {
            if let AnthropicContentBlock::Text { text: t } = block {
                text.push_str(&t);
                saw_text = true;
            }
        }
        if !saw_text {
            return Err(ChatError::Parse(
                "anthropic response has no text content block".to_string(),
            ));
        }
        Ok(Reply {
            text,
            ..Reply::default()
        })
    }

    fn parse_stream_chunk(
        &self,
        event: &SseEvent,
        accumulator: &mut StreamAccumulator,
    ) -> Result<ChunkOutcome> {
        match event.event.as_str() {
            "content_block_delta" => {
                let v: AnthropicContentBlockDelta =
                    serde_json::from_str(&event.data).map_err(|e| {
                        ChatError::Parse(format!(
                            "anthropic delta json error={e} data={}",
                            event.data
                        ))
                    })?;
                match v.delta {
                    AnthropicDelta::TextDelta { text } if !text.is_empty() => {
                        accumulator.push_text(&text);
                        Ok(ChunkOutcome::text(text))
                    }
                    _ => Ok(ChunkOutcome::skip()),
                }
            }
            "message_stop" => Ok(ChunkOutcome::done()),
            "error" => {
                let message = serde_json::from_str::<AnthropicStreamError>(&event.data)
                    .map(|e| format!("{}: {}", e.error.kind, e.error.message))
                    .unwrap_or_else(|_| event.data.clone());
                Err(ChatError::Parse(format!("anthropic stream error: {message}")))
            }
            // message_start, content_block_start/stop, message_delta, ping
            _ => Ok(ChunkOutcome::skip()),
        }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f64,
    top_p: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlockDelta {
    delta: AnthropicDelta,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicDelta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}
