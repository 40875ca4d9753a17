use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    /// A required credential is absent. Fatal: nothing should reach the network.
    #[error("missing configuration: environment variable {var} is not set")]
    ConfigMissing { var: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("api error: status={status} body={body}")]
    Api { status: u16, body: String },

    #[error("unexpected response format: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(String),
}

impl ChatError {
    /// True for failures that happened after the request was issued.
    pub fn is_request_failure(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Api { .. } | Self::Parse(_)
        )
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

impl From<std::io::Error> for ChatError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_post_request_failures_count_as_request_failures() {
        assert!(ChatError::Transport("reset".to_string()).is_request_failure());
        assert!(ChatError::Api {
            status: 503,
            body: String::new()
        }
        .is_request_failure());
        assert!(ChatError::Parse("bad json".to_string()).is_request_failure());

        assert!(!ChatError::Validation("empty".to_string()).is_request_failure());
        assert!(!ChatError::Io("disk".to_string()).is_request_failure());
        assert!(!ChatError::ConfigMissing {
            var: "OPENAI_API_KEY".to_string()
        }
        .is_request_failure());
    }
}
