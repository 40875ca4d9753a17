use crate::error::{ChatError, Result};

/// Reads an API key from `var`, falling back to `fallback` (e.g. a value from
/// a config file). Blank values count as absent.
pub fn resolve_api_key(var: &str, fallback: Option<&str>) -> Result<String> {
    let from_env = std::env::var(var).ok();
    let non_blank = |v: &str| Some(v.trim()).filter(|v| !v.is_empty()).map(str::to_string);
    from_env
        .as_deref()
        .and_then(non_blank)
        .or_else(|| fallback.and_then(non_blank))
        .ok_or_else(|| ChatError::ConfigMissing {
            var: var.to_string(),
        })
}

pub fn api_key_from_env(var: &str) -> Result<String> {
    resolve_api_key(var, None)
}
