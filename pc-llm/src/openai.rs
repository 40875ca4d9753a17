//! Chat Completions wire format, shared by OpenAI and Groq.
//!
//! The two providers differ only in data (endpoint, credential variable,
//! model list), so both are served by one adapter parameterized by a
//! `Descriptor`.

use crate::adapter::{
    ChunkOutcome, ProviderAdapter, StreamAccumulator, WireMessage, json_headers,
    messages_with_system_prompt, normalize_citations,
};
use crate::config::{ConfigConstraints, ConfigOption, SessionConfig};
use crate::error::{ChatError, Result};
use crate::history::ConversationHistory;
use crate::sse::SseEvent;
use crate::types::Reply;
use serde::{Deserialize, Serialize};

const STREAM_DONE_SENTINEL: &str = "[DONE]";

const OPTIONS: &[ConfigOption] = &[
    ConfigOption::Model,
    ConfigOption::Temperature,
    ConfigOption::TopP,
    ConfigOption::MaxTokens,
    ConfigOption::PresencePenalty,
    ConfigOption::FrequencyPenalty,
    ConfigOption::Stream,
    ConfigOption::Language,
];

#[derive(Debug)]
pub struct Descriptor {
    pub name: &'static str,
    pub endpoint: &'static str,
    pub api_key_env: &'static str,
    pub models: &'static [&'static str],
    pub default_model: &'static str,
}

pub static OPENAI: Descriptor = Descriptor {
    name: "openai",
    endpoint: "https://api.openai.com/v1/chat/completions",
    api_key_env: "OPENAI_API_KEY",
    models: &[
        "gpt-4o",
        "gpt-4o-mini",
        "gpt-4",
        "gpt-4-turbo",
        "gpt-3.5-turbo",
        "o1-preview",
        "o1-mini",
    ],
    default_model: "gpt-3.5-turbo",
};

pub static GROQ: Descriptor = Descriptor {
    name: "groq",
    endpoint: "https://api.groq.com/openai/v1/chat/completions",
    api_key_env: "GROQ_API_KEY",
    models: &[
        "llama3-8b-8192",
        "llama3-70b-8192",
        "mixtral-8x7b-32768",
        "gemma2-9b-it",
    ],
    default_model: "llama3-8b-8192",
};

#[derive(Debug, Clone)]
pub struct OpenAiCompatibleAdapter {
    descriptor: &'static Descriptor,
    endpoint: String,
}

impl OpenAiCompatibleAdapter {
    pub fn new(descriptor: &'static Descriptor) -> Self {
        Self {
            descriptor,
            endpoint: descriptor.endpoint.to_string(),
        }
    }

    pub fn openai() -> Self {
        Self::new(&OPENAI)
    }

    pub fn groq() -> Self {
        Self::new(&GROQ)
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }
}

impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn name(&self) -> &'static str {
        self.descriptor.name
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn api_key_env(&self) -> &'static str {
        self.descriptor.api_key_env
    }

    fn constraints(&self) -> ConfigConstraints {
        ConfigConstraints {
            models: self.descriptor.models,
            options: OPTIONS,
            temperature_max: 2.0,
            streaming: true,
            requires_max_tokens: false,
        }
    }

    fn default_config(&self) -> SessionConfig {
        SessionConfig {
            stream: true,
            ..SessionConfig::baseline(self.descriptor.default_model)
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
        let req = OpenAiChatRequest {
            model: &config.model,
            messages: messages_with_system_prompt(history, config),
            temperature: config.temperature,
            top_p: config.top_p,
            presence_penalty: config.presence_penalty,
            frequency_penalty: config.frequency_penalty,
            max_tokens: config.max_tokens,
            stream: config.stream,
        };
        Ok(serde_json::to_value(req)?)
    }

    fn parse_response(&self, raw: &str) -> Result<Reply> {
        let parsed: OpenAiChatResponse = serde_json::from_str(raw)?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            ChatError::Parse(format!("{} response missing choices", self.name()))
        })?;
        let text = choice.message.content.ok_or_else(|| {
            ChatError::Parse(format!("{} response missing message content", self.name()))
        })?;
        let citations = choice
            .message
            .citations
            .or(parsed.citations)
            .unwrap_or_default();
        Ok(Reply {
            text,
            citations: normalize_citations(&citations),
            related_questions: Vec::new(),
        })
    }

    fn parse_stream_chunk(
        &self,
        event: &SseEvent,
        accumulator: &mut StreamAccumulator,
    ) -> Result<ChunkOutcome> {
        let data = event.data.trim();
        if data == STREAM_DONE_SENTINEL {
            return Ok(ChunkOutcome::done());
        }
        if data.is_empty() {
            return Ok(ChunkOutcome::skip());
        }

        let chunk: OpenAiStreamResponseChunk = serde_json::from_str(data).map_err(|e| {
            ChatError::Parse(format!("{} chunk json error={e} data={data}", self.name()))
        })?;
        if let Some(err) = chunk.error {
            return Err(ChatError::Parse(format!(
                "{} stream error: {}",
                self.name(),
                err.message.unwrap_or_else(|| "unknown".to_string())
            )));
        }
        if let Some(citations) = chunk.citations.as_deref() {
            accumulator.set_citations(normalize_citations(citations));
        }

        let Some(choice) = chunk.choices.first() else {
            return Ok(ChunkOutcome::skip());
        };
        match choice.delta.content.as_deref() {
            Some(content) if !content.is_empty() => {
                accumulator.push_text(content);
                Ok(ChunkOutcome::text(content))
            }
            _ => Ok(ChunkOutcome::skip()),
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f64,
    top_p: f64,
    presence_penalty: f64,
    frequency_penalty: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    citations: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    citations: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamResponseChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    citations: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    error: Option<OpenAiStreamError>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiStreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiStreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamError {
    #[serde(default)]
    message: Option<String>,
}
