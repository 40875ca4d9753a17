//! The per-provider wire contract and the registry of built-in providers.

use crate::anthropic::AnthropicAdapter;
use crate::config::{ConfigConstraints, SessionConfig};
use crate::error::{ChatError, Result};
use crate::history::ConversationHistory;
use crate::openai::OpenAiCompatibleAdapter;
use crate::perplexity::PerplexityAdapter;
use crate::sse::SseEvent;
use crate::types::{Citation, Reply};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Translates between the session engine's normalized types and one
/// provider's HTTP API. Implementations hold no per-request state.
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// URL every request is POSTed to.
    fn endpoint(&self) -> &str;

    /// Environment variable holding the provider's API key.
    fn api_key_env(&self) -> &'static str;

    fn constraints(&self) -> ConfigConstraints;

    fn default_config(&self) -> SessionConfig;

    fn build_headers(&self, api_key: &str) -> Result<HeaderMap>;

    fn build_request_body(
        &self,
        history: &ConversationHistory,
        config: &SessionConfig,
    ) -> Result<serde_json::Value>;

    fn parse_response(&self, raw: &str) -> Result<Reply>;

    fn parse_stream_chunk(
        &self,
        _event: &SseEvent,
        _accumulator: &mut StreamAccumulator,
    ) -> Result<ChunkOutcome> {
        Err(ChatError::Parse(format!(
            "{} does not produce streamed responses",
            self.name()
        )))
    }
}

/// Collects a streamed reply as chunks arrive.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    citations: Vec<Citation>,
}

impl StreamAccumulator {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn push_text(&mut self, fragment: &str) {
        self.text.push_str(fragment);
    }

    /// Later chunks repeat the full list, so the latest one wins.
    pub fn set_citations(&mut self, citations: Vec<Citation>) {
        self.citations = citations;
    }

    pub fn into_reply(self) -> Reply {
        Reply {
            text: self.text,
            citations: self.citations,
            related_questions: Vec::new(),
        }
    }
}

/// Result of feeding one stream event to an adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub partial: Option<String>,
    pub done: bool,
}

impl ChunkOutcome {
    pub fn text(fragment: impl Into<String>) -> Self {
        Self {
            partial: Some(fragment.into()),
            done: false,
        }
    }

    pub fn skip() -> Self {
        Self::default()
    }

    pub fn done() -> Self {
        Self {
            partial: None,
            done: true,
        }
    }
}

/// Accepts citation entries as bare URL strings or as objects carrying a
/// `url`, numbering them 1.. in received order. Anything else is dropped.
pub fn normalize_citations(raw: &[serde_json::Value]) -> Vec<Citation> {
    let mut out = Vec::with_capacity(raw.len());
    for entry in raw {
        let url = match entry {
            serde_json::Value::String(url) => Some(url.as_str()),
            serde_json::Value::Object(obj) => obj.get("url").and_then(|v| v.as_str()),
            _ => None,
        };
        let Some(url) = url.map(str::trim).filter(|u| !u.is_empty()) else {
            tracing::warn!(entry = %entry, "dropping citation without a url");
            continue;
        };
        out.push(Citation {
            index: out.len() as u32 + 1,
            url: url.to_string(),
        });
    }
    out
}

#[derive(Debug, Serialize)]
pub(crate) struct WireMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

/// The language-appropriate system prompt followed by the stored history.
pub(crate) fn messages_with_system_prompt<'a>(
    history: &'a ConversationHistory,
    config: &SessionConfig,
) -> Vec<WireMessage<'a>> {
    let mut out = Vec::with_capacity(history.len() + 1);
    out.push(WireMessage {
        role: "system",
        content: config.system_prompt(),
    });
    out.extend(history.messages().iter().map(|m| WireMessage {
        role: m.role.as_str(),
        content: m.content.as_str(),
    }));
    out
}

/// JSON content type plus the given provider headers.
pub(crate) fn json_headers(pairs: &[(&'static str, &str)]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for &(name, value) in pairs {
        let mut value = HeaderValue::from_str(value).map_err(|_| {
            ChatError::Validation(format!("header {name} contains invalid characters"))
        })?;
        value.set_sensitive(true);
        headers.insert(HeaderName::from_static(name), value);
    }
    Ok(headers)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Groq,
    Perplexity,
    Anthropic,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::OpenAI,
        Provider::Groq,
        Provider::Perplexity,
        Provider::Anthropic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Groq => "groq",
            Provider::Perplexity => "perplexity",
            Provider::Anthropic => "anthropic",
        }
    }

    pub fn adapter(self) -> Box<dyn ProviderAdapter> {
        match self {
            Provider::OpenAI => Box::new(OpenAiCompatibleAdapter::openai()),
            Provider::Groq => Box::new(OpenAiCompatibleAdapter::groq()),
            Provider::Perplexity => Box::new(PerplexityAdapter::new()),
            Provider::Anthropic => Box::new(AnthropicAdapter::new()),
        }
    }

    /// Same adapter, pointed at a compatible gateway instead of the public API.
    pub fn adapter_with_endpoint(self, endpoint: &str) -> Box<dyn ProviderAdapter> {
        match self {
            Provider::OpenAI => Box::new(OpenAiCompatibleAdapter::openai().with_endpoint(endpoint)),
            Provider::Groq => Box::new(OpenAiCompatibleAdapter::groq().with_endpoint(endpoint)),
            Provider::Perplexity => Box::new(PerplexityAdapter::new().with_endpoint(endpoint)),
            Provider::Anthropic => Box::new(AnthropicAdapter::new().with_endpoint(endpoint)),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                ChatError::Validation(format!(
                    "unknown provider {wanted:?}; expected one of: openai, groq, perplexity, anthropic"
                ))
            })
    }
}
