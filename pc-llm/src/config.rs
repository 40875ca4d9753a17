//! Validated request parameters for a chat session.
//!
//! A `SessionConfig` is only ever replaced wholesale: `apply` builds a
//! candidate from the current value plus a `ConfigPatch`, validates the whole
//! candidate against the adapter's constraints, and hands it back only when
//! every field passes.

use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// System prompts keyed by language tag. Adding a language is adding a row.
pub const SYSTEM_PROMPTS: &[(&str, &str)] = &[
    (
        "pt-br",
        "Você é um assistente prestativo. Responda sempre em português do Brasil de forma clara e natural.",
    ),
    (
        "en",
        "You are a helpful assistant. Always respond in English in a clear and natural way.",
    ),
];

pub const DEFAULT_LANGUAGE: &str = "pt-br";

pub fn system_prompt(language: &str) -> Option<&'static str> {
    SYSTEM_PROMPTS
        .iter()
        .find(|(tag, _)| tag.eq_ignore_ascii_case(language))
        .map(|(_, prompt)| *prompt)
}

pub fn supported_languages() -> impl Iterator<Item = &'static str> {
    SYSTEM_PROMPTS.iter().map(|(tag, _)| *tag)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecencyFilter {
    Month,
    Week,
    Day,
    Hour,
}

impl RecencyFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            RecencyFilter::Month => "month",
            RecencyFilter::Week => "week",
            RecencyFilter::Day => "day",
            RecencyFilter::Hour => "hour",
        }
    }
}

impl FromStr for RecencyFilter {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "month" => Ok(Self::Month),
            "week" => Ok(Self::Week),
            "day" => Ok(Self::Day),
            "hour" => Ok(Self::Hour),
            other => Err(ChatError::Validation(format!(
                "search_recency_filter must be one of month, week, day, hour; got {other:?}"
            ))),
        }
    }
}

/// Every request parameter a session knows about. Adapters declare the subset
/// that is meaningful for their provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigOption {
    Model,
    Temperature,
    TopP,
    TopK,
    MaxTokens,
    PresencePenalty,
    FrequencyPenalty,
    Stream,
    Language,
    SearchRecencyFilter,
    ReturnCitations,
    ReturnRelatedQuestions,
}

impl ConfigOption {
    pub const ALL: [ConfigOption; 12] = [
        ConfigOption::Model,
        ConfigOption::Temperature,
        ConfigOption::TopP,
        ConfigOption::TopK,
        ConfigOption::MaxTokens,
        ConfigOption::PresencePenalty,
        ConfigOption::FrequencyPenalty,
        ConfigOption::Stream,
        ConfigOption::Language,
        ConfigOption::SearchRecencyFilter,
        ConfigOption::ReturnCitations,
        ConfigOption::ReturnRelatedQuestions,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ConfigOption::Model => "model",
            ConfigOption::Temperature => "temperature",
            ConfigOption::TopP => "top_p",
            ConfigOption::TopK => "top_k",
            ConfigOption::MaxTokens => "max_tokens",
            ConfigOption::PresencePenalty => "presence_penalty",
            ConfigOption::FrequencyPenalty => "frequency_penalty",
            ConfigOption::Stream => "stream",
            ConfigOption::Language => "language",
            ConfigOption::SearchRecencyFilter => "search_recency_filter",
            ConfigOption::ReturnCitations => "return_citations",
            ConfigOption::ReturnRelatedQuestions => "return_related_questions",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|o| o.key().eq_ignore_ascii_case(key.trim()))
    }
}

impl fmt::Display for ConfigOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// What an adapter accepts. Produced by `ProviderAdapter::constraints`.
#[derive(Debug, Clone, Copy)]
pub struct ConfigConstraints {
    pub models: &'static [&'static str],
    pub options: &'static [ConfigOption],
    pub temperature_max: f64,
    pub streaming: bool,
    pub requires_max_tokens: bool,
}

impl ConfigConstraints {
    pub fn supports(&self, option: ConfigOption) -> bool {
        self.options.contains(&option)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_tokens: Option<u32>,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
    pub stream: bool,
    pub language: String,
    pub search_recency_filter: Option<RecencyFilter>,
    pub return_citations: bool,
    pub return_related_questions: bool,
}

impl SessionConfig {
    /// Baseline shared by all adapters; each adapter overrides what differs.
    pub fn baseline(model: &str) -> Self {
        Self {
            model: model.to_string(),
            temperature: 0.7,
            top_p: 1.0,
            top_k: 0,
            max_tokens: None,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            stream: false,
            language: DEFAULT_LANGUAGE.to_string(),
            search_recency_filter: None,
            return_citations: false,
            return_related_questions: false,
        }
    }

    /// Textual form of one field, as accepted back by `ConfigPatch::set`.
    pub fn display_value(&self, option: ConfigOption) -> String {
        match option {
            ConfigOption::Model => self.model.clone(),
            ConfigOption::Temperature => self.temperature.to_string(),
            ConfigOption::TopP => self.top_p.to_string(),
            ConfigOption::TopK => self.top_k.to_string(),
            ConfigOption::MaxTokens => self
                .max_tokens
                .map_or_else(|| "none".to_string(), |v| v.to_string()),
            ConfigOption::PresencePenalty => self.presence_penalty.to_string(),
            ConfigOption::FrequencyPenalty => self.frequency_penalty.to_string(),
            ConfigOption::Stream => self.stream.to_string(),
            ConfigOption::Language => self.language.clone(),
            ConfigOption::SearchRecencyFilter => self
                .search_recency_filter
                .map_or("none", RecencyFilter::as_str)
                .to_string(),
            ConfigOption::ReturnCitations => self.return_citations.to_string(),
            ConfigOption::ReturnRelatedQuestions => self.return_related_questions.to_string(),
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        system_prompt(&self.language).unwrap_or(SYSTEM_PROMPTS[0].1)
    }

    /// Returns the patched config, or a validation error naming every
    /// offending field. `self` is never modified.
    pub fn apply(&self, patch: &ConfigPatch, constraints: &ConfigConstraints) -> Result<Self> {
        let mut problems = Vec::new();
        for option in patch.touched() {
            if !constraints.supports(option) {
                problems.push(format!("{option} is not supported by this provider"));
            }
        }

        let mut next = self.clone();
        if let Some(v) = &patch.model {
            next.model = v.trim().to_string();
        }
        if let Some(v) = patch.temperature {
            next.temperature = v;
        }
        if let Some(v) = patch.top_p {
            next.top_p = v;
        }
        if let Some(v) = patch.top_k {
            next.top_k = v;
        }
        if let Some(v) = patch.max_tokens {
            next.max_tokens = v;
        }
        if let Some(v) = patch.presence_penalty {
            next.presence_penalty = v;
        }
        if let Some(v) = patch.frequency_penalty {
            next.frequency_penalty = v;
        }
        if let Some(v) = patch.stream {
            next.stream = v;
        }
        if let Some(v) = &patch.language {
            next.language = v.trim().to_ascii_lowercase();
        }
        if let Some(v) = patch.search_recency_filter {
            next.search_recency_filter = v;
        }
        if let Some(v) = patch.return_citations {
            next.return_citations = v;
        }
        if let Some(v) = patch.return_related_questions {
            next.return_related_questions = v;
        }

        problems.extend(next.problems(constraints));
        if !problems.is_empty() {
            return Err(ChatError::Validation(problems.join("; ")));
        }
        Ok(next)
    }

    pub fn validate(&self, constraints: &ConfigConstraints) -> Result<()> {
        let problems = self.problems(constraints);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ChatError::Validation(problems.join("; ")))
        }
    }

    fn problems(&self, constraints: &ConfigConstraints) -> Vec<String> {
        let mut out = Vec::new();
        if !constraints.models.contains(&self.model.as_str()) {
            out.push(format!(
                "model {:?} is not available; expected one of: {}",
                self.model,
                constraints.models.join(", ")
            ));
        }
        check_range(&mut out, "temperature", self.temperature, 0.0, constraints.temperature_max);
        check_range(&mut out, "top_p", self.top_p, 0.0, 1.0);
        check_range(&mut out, "presence_penalty", self.presence_penalty, -2.0, 2.0);
        check_range(&mut out, "frequency_penalty", self.frequency_penalty, -2.0, 2.0);
        match self.max_tokens {
            Some(0) => out.push("max_tokens must be a positive integer".to_string()),
            None if constraints.requires_max_tokens => {
                out.push("max_tokens is required by this provider".to_string())
            }
            _ => {}
        }
        if self.stream && !constraints.streaming {
            out.push("stream is not supported by this provider".to_string());
        }
        if system_prompt(&self.language).is_none() {
            out.push(format!(
                "language {:?} is not supported; expected one of: {}",
                self.language,
                supported_languages().collect::<Vec<_>>().join(", ")
            ));
        }
        out
    }
}

fn check_range(out: &mut Vec<String>, name: &str, value: f64, min: f64, max: f64) {
    if !value.is_finite() || value < min || value > max {
        out.push(format!("{name} must be within [{min}, {max}], got {value}"));
    }
}

/// A partial update. `None` leaves a field untouched; for the two optional
/// fields, `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigPatch {
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub max_tokens: Option<Option<u32>>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub stream: Option<bool>,
    pub language: Option<String>,
    pub search_recency_filter: Option<Option<RecencyFilter>>,
    pub return_citations: Option<bool>,
    pub return_related_questions: Option<bool>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.touched().is_empty()
    }

    pub fn touched(&self) -> Vec<ConfigOption> {
        let flags = [
            (ConfigOption::Model, self.model.is_some()),
            (ConfigOption::Temperature, self.temperature.is_some()),
            (ConfigOption::TopP, self.top_p.is_some()),
            (ConfigOption::TopK, self.top_k.is_some()),
            (ConfigOption::MaxTokens, self.max_tokens.is_some()),
            (ConfigOption::PresencePenalty, self.presence_penalty.is_some()),
            (ConfigOption::FrequencyPenalty, self.frequency_penalty.is_some()),
            (ConfigOption::Stream, self.stream.is_some()),
            (ConfigOption::Language, self.language.is_some()),
            (ConfigOption::SearchRecencyFilter, self.search_recency_filter.is_some()),
            (ConfigOption::ReturnCitations, self.return_citations.is_some()),
            (
                ConfigOption::ReturnRelatedQuestions,
                self.return_related_questions.is_some(),
            ),
        ];
        flags
            .into_iter()
            .filter_map(|(option, set)| set.then_some(option))
            .collect()
    }

    /// Sets one field from its textual form, e.g. `("max_tokens", "none")`.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<()> {
        let Some(option) = ConfigOption::from_key(key) else {
            return Err(ChatError::Validation(format!("unknown option {key:?}")));
        };
        let raw = raw.trim();
        match option {
            ConfigOption::Model => self.model = Some(raw.to_string()),
            ConfigOption::Temperature => self.temperature = Some(parse_value(option, raw)?),
            ConfigOption::TopP => self.top_p = Some(parse_value(option, raw)?),
            ConfigOption::TopK => self.top_k = Some(parse_value(option, raw)?),
            ConfigOption::MaxTokens => {
                self.max_tokens = Some(if is_unset(raw) {
                    None
                } else {
                    Some(parse_value(option, raw)?)
                })
            }
            ConfigOption::PresencePenalty => {
                self.presence_penalty = Some(parse_value(option, raw)?)
            }
            ConfigOption::FrequencyPenalty => {
                self.frequency_penalty = Some(parse_value(option, raw)?)
            }
            ConfigOption::Stream => self.stream = Some(parse_value(option, raw)?),
            ConfigOption::Language => self.language = Some(raw.to_string()),
            ConfigOption::SearchRecencyFilter => {
                self.search_recency_filter = Some(if is_unset(raw) {
                    None
                } else {
                    Some(raw.parse()?)
                })
            }
            ConfigOption::ReturnCitations => {
                self.return_citations = Some(parse_value(option, raw)?)
            }
            ConfigOption::ReturnRelatedQuestions => {
                self.return_related_questions = Some(parse_value(option, raw)?)
            }
        }
        Ok(())
    }

    /// Builds a patch from `key=value` tokens.
    pub fn from_assignments<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut patch = Self::default();
        for token in tokens {
            let Some((key, value)) = token.split_once('=') else {
                return Err(ChatError::Validation(format!(
                    "expected key=value, got {token:?}"
                )));
            };
            patch.set(key, value)?;
        }
        Ok(patch)
    }

    /// Layers `other` on top of `self`; fields set in `other` win.
    pub fn merge(mut self, other: ConfigPatch) -> Self {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            model,
            temperature,
            top_p,
            top_k,
            max_tokens,
            presence_penalty,
            frequency_penalty,
            stream,
            language,
            search_recency_filter,
            return_citations,
            return_related_questions
        );
        self
    }
}

fn is_unset(raw: &str) -> bool {
    raw.is_empty() || raw.eq_ignore_ascii_case("none") || raw.eq_ignore_ascii_case("null")
}

fn parse_value<T: FromStr>(option: ConfigOption, raw: &str) -> Result<T> {
    raw.to_ascii_lowercase()
        .parse::<T>()
        .map_err(|_| ChatError::Validation(format!("invalid value for {option}: {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_OPTIONS: &[ConfigOption] = &ConfigOption::ALL;

    fn constraints() -> ConfigConstraints {
        ConfigConstraints {
            models: &["model-a", "model-b"],
            options: ALL_OPTIONS,
            temperature_max: 2.0,
            streaming: true,
            requires_max_tokens: false,
        }
    }

    fn base() -> SessionConfig {
        SessionConfig::baseline("model-a")
    }

    #[test]
    fn out_of_range_temperature_leaves_config_unchanged() {
        let cfg = base();
        let patch = ConfigPatch {
            temperature: Some(3.5),
            ..Default::default()
        };
        let err = cfg.apply(&patch, &constraints()).expect_err("rejected");
        assert!(matches!(err, ChatError::Validation(_)));
        assert_eq!(cfg, base());
    }

    #[test]
    fn one_invalid_field_rejects_the_whole_patch() {
        let cfg = base();
        let patch = ConfigPatch {
            temperature: Some(0.9),
            top_p: Some(1.5),
            ..Default::default()
        };
        let err = cfg.apply(&patch, &constraints()).expect_err("rejected");
        let ChatError::Validation(msg) = err else {
            panic!("expected validation error");
        };
        assert!(msg.contains("top_p"), "{msg}");
        assert!(!msg.contains("temperature"), "{msg}");
    }

    #[test]
    fn valid_patch_applies_every_field() {
        let patch = ConfigPatch {
            model: Some("model-b".to_string()),
            temperature: Some(1.2),
            max_tokens: Some(Some(256)),
            language: Some("EN".to_string()),
            search_recency_filter: Some(Some(RecencyFilter::Week)),
            ..Default::default()
        };
        let next = base().apply(&patch, &constraints()).expect("valid patch");
        assert_eq!(next.model, "model-b");
        assert_eq!(next.temperature, 1.2);
        assert_eq!(next.max_tokens, Some(256));
        assert_eq!(next.language, "en");
        assert_eq!(next.search_recency_filter, Some(RecencyFilter::Week));
        assert_eq!(next.top_p, base().top_p);
    }

    #[test]
    fn unknown_model_and_language_are_rejected() {
        for patch in [
            ConfigPatch {
                model: Some("gpt-9".to_string()),
                ..Default::default()
            },
            ConfigPatch {
                language: Some("fr".to_string()),
                ..Default::default()
            },
        ] {
            assert!(base().apply(&patch, &constraints()).is_err(), "{patch:?}");
        }
    }

    #[test]
    fn zero_max_tokens_and_nan_are_rejected() {
        let zero = ConfigPatch {
            max_tokens: Some(Some(0)),
            ..Default::default()
        };
        assert!(base().apply(&zero, &constraints()).is_err());

        let nan = ConfigPatch {
            temperature: Some(f64::NAN),
            ..Default::default()
        };
        assert!(base().apply(&nan, &constraints()).is_err());
    }

    #[test]
    fn provider_constraints_narrow_the_accepted_patch() {
        let narrow = ConfigConstraints {
            models: &["model-a"],
            options: &[
                ConfigOption::Model,
                ConfigOption::Temperature,
                ConfigOption::MaxTokens,
                ConfigOption::Language,
            ],
            temperature_max: 1.0,
            streaming: false,
            requires_max_tokens: true,
        };
        let mut cfg = base();
        cfg.max_tokens = Some(100);

        let hot = ConfigPatch {
            temperature: Some(1.5),
            ..Default::default()
        };
        assert!(cfg.apply(&hot, &narrow).is_err());

        let unset = ConfigPatch {
            max_tokens: Some(None),
            ..Default::default()
        };
        assert!(cfg.apply(&unset, &narrow).is_err());

        let extra = ConfigPatch {
            return_citations: Some(true),
            ..Default::default()
        };
        assert!(cfg.apply(&extra, &narrow).is_err());

        let stream = ConfigPatch {
            stream: Some(true),
            ..Default::default()
        };
        assert!(cfg.apply(&stream, &narrow).is_err());
    }

    #[test]
    fn assignments_parse_into_typed_fields() {
        let patch = ConfigPatch::from_assignments([
            "temperature=0.3",
            "max_tokens=none",
            "stream=FALSE",
            "search_recency_filter=day",
            "model=model-b",
        ])
        .expect("parse");
        assert_eq!(patch.temperature, Some(0.3));
        assert_eq!(patch.max_tokens, Some(None));
        assert_eq!(patch.stream, Some(false));
        assert_eq!(patch.search_recency_filter, Some(Some(RecencyFilter::Day)));
        assert_eq!(patch.model.as_deref(), Some("model-b"));
        assert_eq!(patch.touched().len(), 5);
    }

    #[test]
    fn malformed_assignments_are_rejected() {
        assert!(ConfigPatch::from_assignments(["temperature"]).is_err());
        assert!(ConfigPatch::from_assignments(["temperature=hot"]).is_err());
        assert!(ConfigPatch::from_assignments(["colour=blue"]).is_err());
        assert!(ConfigPatch::from_assignments(["search_recency_filter=year"]).is_err());
    }

    #[test]
    fn merge_prefers_the_later_patch() {
        let first = ConfigPatch {
            temperature: Some(0.1),
            top_p: Some(0.5),
            ..Default::default()
        };
        let second = ConfigPatch {
            temperature: Some(0.9),
            ..Default::default()
        };
        let merged = first.merge(second);
        assert_eq!(merged.temperature, Some(0.9));
        assert_eq!(merged.top_p, Some(0.5));
    }

    #[test]
    fn displayed_values_parse_back_to_the_same_config() {
        let mut cfg = base();
        cfg.max_tokens = Some(42);
        cfg.search_recency_filter = Some(RecencyFilter::Hour);

        let mut patch = ConfigPatch::default();
        for option in ConfigOption::ALL {
            patch
                .set(option.key(), &cfg.display_value(option))
                .unwrap_or_else(|e| panic!("{option}: {e}"));
        }
        assert_eq!(base().apply(&patch, &constraints()).expect("valid"), cfg);
        assert_eq!(base().display_value(ConfigOption::MaxTokens), "none");
    }

    #[test]
    fn system_prompt_table_is_keyed_by_language() {
        assert!(system_prompt("en").expect("en").contains("English"));
        assert!(system_prompt("PT-BR").expect("pt-br").contains("português"));
        assert!(system_prompt("de").is_none());
    }
}
