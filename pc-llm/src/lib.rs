//! Provider-agnostic chat session engine.
//!
//! A [`ChatSession`] owns the conversation history and validated request
//! parameters; a [`ProviderAdapter`] supplies only the wire contract of one
//! provider (endpoint, headers, body shape, response parsing).

mod adapter;
mod anthropic;
mod config;
mod credentials;
mod error;
mod history;
mod openai;
mod perplexity;
mod session;
mod sse;
mod types;

pub use adapter::{ChunkOutcome, Provider, ProviderAdapter, StreamAccumulator, normalize_citations};
pub use anthropic::AnthropicAdapter;
pub use config::{
    ConfigConstraints, ConfigOption, ConfigPatch, DEFAULT_LANGUAGE, RecencyFilter, SYSTEM_PROMPTS,
    SessionConfig, supported_languages, system_prompt,
};
pub use credentials::{api_key_from_env, resolve_api_key};
pub use error::{ChatError, Result};
pub use history::ConversationHistory;
pub use openai::{Descriptor, GROQ, OPENAI, OpenAiCompatibleAdapter};
pub use perplexity::PerplexityAdapter;
pub use session::{ChatSession, default_snapshot_name, default_snapshot_path};
pub use sse::{SseEvent, decode_sse};
pub use types::{Citation, Message, Reply, Role};
