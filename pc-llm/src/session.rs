//! One logical conversation bound to one provider adapter.
//!
//! Turn policy: the user turn is appended before the request goes out and the
//! assistant turn only after the full reply has been parsed. Any failure, or
//! dropping the future mid-stream, leaves the user turn in place with no
//! assistant turn after it.

use crate::adapter::{ProviderAdapter, StreamAccumulator};
use crate::config::{ConfigOption, ConfigPatch, SessionConfig};
use crate::credentials::api_key_from_env;
use crate::error::{ChatError, Result};
use crate::history::ConversationHistory;
use crate::sse::decode_sse;
use crate::types::{Message, Reply};
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// How much of a streamed body is quoted when the stream ends early.
const BODY_PREVIEW_BYTES: usize = 512;

pub struct ChatSession {
    adapter: Box<dyn ProviderAdapter>,
    http: reqwest::Client,
    api_key: String,
    config: SessionConfig,
    history: ConversationHistory,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("provider", &self.adapter.name())
            .field("config", &self.config)
            .field("history_len", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl ChatSession {
    /// Starts a session with the adapter's default config and empty history.
    pub fn new(adapter: Box<dyn ProviderAdapter>, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ChatError::ConfigMissing {
                var: adapter.api_key_env().to_string(),
            });
        }
        let config = adapter.default_config();
        config.validate(&adapter.constraints())?;
        Ok(Self {
            adapter,
            http: reqwest::Client::new(),
            api_key: api_key.trim().to_string(),
            config,
            history: ConversationHistory::new(),
        })
    }

    /// Like `new`, reading the key from the adapter's credential variable.
    pub fn from_env(adapter: Box<dyn ProviderAdapter>) -> Result<Self> {
        let api_key = api_key_from_env(adapter.api_key_env())?;
        Self::new(adapter, api_key)
    }

    /// Replaces the HTTP client, e.g. to impose a timeout.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.adapter.name()
    }

    pub fn models(&self) -> &'static [&'static str] {
        self.adapter.constraints().models
    }

    pub fn supported_options(&self) -> &'static [ConfigOption] {
        self.adapter.constraints().options
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn history(&self) -> &[Message] {
        self.history.messages()
    }

    pub async fn send_message(&mut self, text: &str) -> Result<Reply> {
        self.send_message_with(text, |_| {}).await
    }

    /// Sends one user turn. When streaming is on, `on_partial` sees each text
    /// fragment as it arrives; it is never called for non-streaming replies.
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(provider = self.adapter.name(), model = %self.config.model, stream = self.config.stream)
    )]
    pub async fn send_message_with<F>(&mut self, text: &str, mut on_partial: F) -> Result<Reply>
    where
        F: FnMut(&str) + Send,
    {
        if text.trim().is_empty() {
            return Err(ChatError::Validation(
                "message must not be empty".to_string(),
            ));
        }

        self.history.push_user(text);
        let reply = match self.request(&mut on_partial).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, history_len = self.history.len(), "send failed; keeping user turn");
                return Err(e);
            }
        };
        self.history.push_assistant(&reply.text, reply.citations.clone());
        tracing::debug!(
            history_len = self.history.len(),
            reply_chars = reply.text.chars().count(),
            citations = reply.citations.len(),
            "reply appended"
        );
        Ok(reply)
    }

    async fn request<F>(&self, on_partial: &mut F) -> Result<Reply>
    where
        F: FnMut(&str) + Send,
    {
        let headers = self.adapter.build_headers(&self.api_key)?;
        let body = self.adapter.build_request_body(&self.history, &self.config)?;

        let response = self
            .http
            .post(self.adapter.endpoint())
            .headers(headers)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, provider = self.adapter.name(), "provider returned an error status");
            return Err(ChatError::Api {
                status: status.as_u16(),
                body,
            });
        }

        if !self.config.stream {
            let raw = response.text().await?;
            return self.adapter.parse_response(&raw);
        }

        // Kept so a body that never forms an event still shows up in the error.
        let head = Arc::new(Mutex::new(Vec::<u8>::new()));
        let sink = Arc::clone(&head);
        let body = response.bytes_stream().inspect(move |chunk| {
            if let (Ok(bytes), Ok(mut kept)) = (chunk.as_ref(), sink.lock()) {
                let room = BODY_PREVIEW_BYTES.saturating_sub(kept.len());
                kept.extend_from_slice(&bytes[..room.min(bytes.len())]);
            }
        });

        let mut events = Box::pin(decode_sse(body));
        let mut accumulator = StreamAccumulator::default();
        while let Some(event) = events.next().await {
            let event = event?;
            let outcome = self.adapter.parse_stream_chunk(&event, &mut accumulator)?;
            if let Some(partial) = outcome.partial.as_deref() {
                on_partial(partial);
            }
            if outcome.done {
                return Ok(accumulator.into_reply());
            }
        }
        let preview = head
            .lock()
            .map(|kept| String::from_utf8_lossy(&kept).trim().to_string())
            .unwrap_or_default();
        Err(ChatError::Parse(format!(
            "{} stream ended before its completion marker; body starts with {preview:?}",
            self.adapter.name()
        )))
    }

    /// Applies every field of `patch` or none of them.
    pub fn configure(&mut self, patch: &ConfigPatch) -> Result<()> {
        let next = self.config.apply(patch, &self.adapter.constraints())?;
        tracing::info!(
            provider = self.adapter.name(),
            fields = ?patch.touched(),
            "session config updated"
        );
        self.config = next;
        Ok(())
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        tracing::info!(provider = self.adapter.name(), "history cleared");
    }

    /// Writes the history snapshot and returns where it went. Without a path
    /// the file is named after the current local time.
    pub async fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(default_snapshot_path);
        self.history.write_to(&path).await?;
        tracing::info!(path = %path.display(), messages = self.history.len(), "history saved");
        Ok(path)
    }

    /// Replaces the history with a snapshot. On error the current history
    /// is kept.
    pub async fn load(&mut self, path: &Path) -> Result<()> {
        let loaded = ConversationHistory::read_from(path).await?;
        tracing::info!(path = %path.display(), messages = loaded.len(), "history loaded");
        self.history = loaded;
        Ok(())
    }
}

/// `conversation_YYYYMMDD_HHMMSS.json`, sortable and unique to the second.
pub fn default_snapshot_name() -> String {
    chrono::Local::now()
        .format("conversation_%Y%m%d_%H%M%S.json")
        .to_string()
}

pub fn default_snapshot_path() -> PathBuf {
    PathBuf::from(default_snapshot_name())
}
