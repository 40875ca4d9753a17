//! polychat configuration loader.
//!
//! Everything is optional: a missing default file yields the defaults, and
//! per-provider `[session.<provider>]` tables are plain `ConfigPatch`es that
//! go through `ChatSession::configure` like any other update.

use pc_llm::{ConfigPatch, Provider, supported_languages};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolychatConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub session: SessionOverrides,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    /// Directory for `/save` without an explicit path. Defaults to the
    /// working directory.
    #[serde(default)]
    pub save_dir: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            language: None,
            save_dir: None,
        }
    }
}

fn default_provider() -> String {
    Provider::OpenAI.as_str().to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeysConfig {
    pub openai_api_key: Option<String>,
    pub groq_api_key: Option<String>,
    pub perplexity_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionOverrides {
    #[serde(default)]
    pub openai: ConfigPatch,
    #[serde(default)]
    pub groq: ConfigPatch,
    #[serde(default)]
    pub perplexity: ConfigPatch,
    #[serde(default)]
    pub anthropic: ConfigPatch,
}

impl PolychatConfig {
    /// Loads `path`, or the default location when `path` is `None`. An
    /// explicit path must exist; a missing default file means defaults.
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let explicit = path.is_some();
        let path = path.unwrap_or_else(default_config_path);

        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Self::parse(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                Self::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("POLYCHAT_PROVIDER") {
            if !v.trim().is_empty() {
                self.general.provider = v.trim().to_string();
            }
        }
        if let Some(v) = lookup("POLYCHAT_MODEL") {
            if !v.trim().is_empty() {
                self.general.model = Some(v.trim().to_string());
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.provider()?;
        if let Some(language) = &self.general.language {
            if !supported_languages().any(|l| l.eq_ignore_ascii_case(language)) {
                return Err(anyhow::anyhow!(
                    "general.language {language:?} is not supported; expected one of: {}",
                    supported_languages().collect::<Vec<_>>().join(", ")
                ));
            }
        }
        if let Some(dir) = &self.general.save_dir {
            if dir.as_os_str().is_empty() {
                return Err(anyhow::anyhow!("general.save_dir must not be empty"));
            }
        }
        Ok(())
    }

    pub fn provider(&self) -> anyhow::Result<Provider> {
        self.general
            .provider
            .parse()
            .map_err(|e| anyhow::anyhow!("general.provider: {e}"))
    }

    pub fn api_key_for(&self, provider: Provider) -> Option<&str> {
        let key = match provider {
            Provider::OpenAI => &self.keys.openai_api_key,
            Provider::Groq => &self.keys.groq_api_key,
            Provider::Perplexity => &self.keys.perplexity_api_key,
            Provider::Anthropic => &self.keys.anthropic_api_key,
        };
        key.as_deref().filter(|k| !k.trim().is_empty())
    }

    /// The provider's `[session.*]` table with `[general]` model and
    /// language layered on top.
    pub fn session_patch_for(&self, provider: Provider) -> ConfigPatch {
        let table = match provider {
            Provider::OpenAI => &self.session.openai,
            Provider::Groq => &self.session.groq,
            Provider::Perplexity => &self.session.perplexity,
            Provider::Anthropic => &self.session.anthropic,
        };
        table.clone().merge(ConfigPatch {
            model: self.general.model.clone(),
            language: self.general.language.clone(),
            ..ConfigPatch::default()
        })
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".polychat").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pc_llm::RecencyFilter;

    const SAMPLE: &str = r#"
[general]
provider = "perplexity"
language = "en"
save_dir = "/tmp/polychat"

[keys]
perplexity_api_key = "pplx-file"

[session.perplexity]
temperature = 0.5
search_recency_filter = "week"
return_related_questions = true

[session.openai]
model = "gpt-4o"
"#;

    #[test]
    fn empty_file_means_defaults() {
        let cfg = PolychatConfig::parse("").expect("parse");
        assert_eq!(cfg.provider().expect("provider"), Provider::OpenAI);
        assert!(cfg.session_patch_for(Provider::OpenAI).is_empty());
        cfg.validate().expect("valid");
    }

    #[test]
    fn sections_map_to_provider_patches() {
        let cfg = PolychatConfig::parse(SAMPLE).expect("parse");
        assert_eq!(cfg.provider().expect("provider"), Provider::Perplexity);
        assert_eq!(cfg.api_key_for(Provider::Perplexity), Some("pplx-file"));
        assert_eq!(cfg.api_key_for(Provider::OpenAI), None);

        let patch = cfg.session_patch_for(Provider::Perplexity);
        assert_eq!(patch.temperature, Some(0.5));
        assert_eq!(patch.search_recency_filter, Some(Some(RecencyFilter::Week)));
        assert_eq!(patch.return_related_questions, Some(true));
        assert_eq!(patch.language.as_deref(), Some("en"));

        assert_eq!(
            cfg.session_patch_for(Provider::OpenAI).model.as_deref(),
            Some("gpt-4o")
        );
    }

    #[test]
    fn general_model_wins_over_session_table() {
        let mut cfg = PolychatConfig::parse(SAMPLE).expect("parse");
        cfg.apply_overrides_from(|name| match name {
            "POLYCHAT_MODEL" => Some("gpt-4".to_string()),
            "POLYCHAT_PROVIDER" => Some(" openai ".to_string()),
            _ => None,
        });
        assert_eq!(cfg.provider().expect("provider"), Provider::OpenAI);
        assert_eq!(
            cfg.session_patch_for(Provider::OpenAI).model.as_deref(),
            Some("gpt-4")
        );
    }

    #[test]
    fn blank_overrides_are_ignored() {
        let mut cfg = PolychatConfig::parse(SAMPLE).expect("parse");
        cfg.apply_overrides_from(|_| Some("  ".to_string()));
        assert_eq!(cfg.general.provider, "perplexity");
        assert_eq!(cfg.general.model, None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(PolychatConfig::parse("[session.openai]\nwarmth = 3\n").is_err());
        assert!(PolychatConfig::parse("[general]\nmodle = \"gpt-4\"\n").is_err());
    }

    #[test]
    fn validate_rejects_unknown_provider_and_language() {
        let cfg = PolychatConfig::parse("[general]\nprovider = \"cohere\"\n").expect("parse");
        assert!(cfg.validate().is_err());

        let cfg = PolychatConfig::parse("[general]\nlanguage = \"fr\"\n").expect("parse");
        let err = cfg.validate().expect_err("language");
        assert!(err.to_string().contains("pt-br"), "{err}");
    }

    #[tokio::test]
    async fn explicit_path_must_exist() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope.toml");
        let err = PolychatConfig::load(Some(missing)).await.expect_err("missing");
        assert!(err.to_string().contains("read config"), "{err}");
    }

    #[tokio::test]
    async fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "[general]\nprovider = \"groq\"\n")
            .await
            .expect("write");
        let cfg = PolychatConfig::load(Some(path)).await.expect("load");
        // POLYCHAT_PROVIDER may be set in the environment running the tests.
        if std::env::var("POLYCHAT_PROVIDER").is_err() {
            assert_eq!(cfg.provider().expect("provider"), Provider::Groq);
        }
    }
}
