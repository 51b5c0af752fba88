//! Model gateway configuration.
//!
//! The active provider, credentials, endpoint and sampling parameters are
//! resolved from, in order: the settings saved in the store, the optional
//! `gateway.yaml` next to it, `{PROVIDER}_API_KEY` in the environment, and
//! finally the provider preset.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::errors::InferenceError;
use super::types::SamplingParams;

// ─── Providers ───────────────────────────────────────────────────────────────

/// Supported hosted providers. All are reached through an OpenAI-compatible
/// chat-completions endpoint with bearer authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
    DeepSeek,
    Groq,
    OpenRouter,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 6] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Google,
        ProviderKind::DeepSeek,
        ProviderKind::Groq,
        ProviderKind::OpenRouter,
    ];

    /// Settings id (`"openai"`, `"anthropic"`, …).
    pub fn id(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Groq => "groq",
            ProviderKind::OpenRouter => "openrouter",
        }
    }

    /// Parse a settings id, case-insensitively.
    pub fn parse(id: &str) -> Option<Self> {
        let id = id.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|p| p.id() == id)
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com/v1",
            ProviderKind::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
            ProviderKind::DeepSeek => "https://api.deepseek.com/v1",
            ProviderKind::Groq => "https://api.groq.com/openai/v1",
            ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o",
            ProviderKind::Anthropic => "claude-3-5-sonnet-20241022",
            ProviderKind::Google => "gemini-1.5-flash",
            ProviderKind::DeepSeek => "deepseek-chat",
            ProviderKind::Groq => "llama-3.3-70b-versatile",
            ProviderKind::OpenRouter => "openai/gpt-4o",
        }
    }

    /// Settings key holding this provider's API key.
    pub fn api_key_setting(self) -> String {
        format!("{}_api_key", self.id())
    }

    /// Environment variable consulted when no key is saved.
    pub fn api_key_env(self) -> String {
        format!("{}_API_KEY", self.id().to_ascii_uppercase())
    }
}

// ─── Config file ─────────────────────────────────────────────────────────────

/// Optional `gateway.yaml` overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayFile {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// Load `gateway.yaml`. A missing file is not an error.
///
/// Performs environment-variable interpolation on values matching
/// `${VAR_NAME}` or `${VAR_NAME:-default}`.
pub fn load_gateway_file(path: &Path) -> Result<Option<GatewayFile>, InferenceError> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = std::fs::read_to_string(path).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    let interpolated = interpolate_env_vars(&raw);
    if interpolated.trim().is_empty() {
        return Ok(Some(GatewayFile::default()));
    }

    let file: GatewayFile =
        serde_yaml::from_str(&interpolated).map_err(|e| InferenceError::ConfigError {
            reason: format!("failed to parse {}: {e}", path.display()),
        })?;

    Ok(Some(file))
}

// ─── Resolved config ─────────────────────────────────────────────────────────

/// Everything the client needs to talk to the active provider.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub provider: ProviderKind,
    pub api_key: String,
    pub base_url: String,
    pub default_model: String,
    pub sampling: SamplingParams,
}

impl GatewayConfig {
    /// Resolve against the process environment.
    pub fn resolve(
        settings: &serde_json::Map<String, serde_json::Value>,
        file: Option<&GatewayFile>,
    ) -> Result<Self, InferenceError> {
        Self::resolve_with_env(settings, file, |name| std::env::var(name).ok())
    }

    /// Resolve with an injectable environment lookup.
    pub fn resolve_with_env<F>(
        settings: &serde_json::Map<String, serde_json::Value>,
        file: Option<&GatewayFile>,
        env: F,
    ) -> Result<Self, InferenceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider_id = setting_str(settings, "ai_provider")
            .or_else(|| file.and_then(|f| non_empty(f.provider.clone())))
            .unwrap_or_else(|| ProviderKind::OpenAi.id().to_string());
        let provider = ProviderKind::parse(&provider_id).ok_or_else(|| InferenceError::ConfigError {
            reason: format!("unknown provider '{provider_id}'"),
        })?;

        let api_key = setting_str(settings, &provider.api_key_setting())
            .or_else(|| file.and_then(|f| non_empty(f.api_key.clone())))
            .or_else(|| non_empty(env(&provider.api_key_env())))
            .ok_or_else(|| InferenceError::MissingApiKey {
                provider: provider.id().to_string(),
            })?;

        let base_url = setting_str(settings, &format!("{}_base_url", provider.id()))
            .or_else(|| file.and_then(|f| non_empty(f.base_url.clone())))
            .unwrap_or_else(|| provider.default_base_url().to_string());

        let default_model = setting_str(settings, "default_model")
            .or_else(|| file.and_then(|f| non_empty(f.default_model.clone())))
            .unwrap_or_else(|| provider.default_model().to_string());

        let defaults = SamplingParams::default();
        let temperature = settings
            .get("temperature")
            .and_then(|v| v.as_f64())
            .map(|t| t as f32)
            .or_else(|| file.and_then(|f| f.temperature))
            .unwrap_or(defaults.temperature);
        let max_tokens = settings
            .get("max_tokens")
            .and_then(|v| v.as_u64())
            .map(|n| n as u32)
            .or_else(|| file.and_then(|f| f.max_tokens))
            .unwrap_or(defaults.max_tokens);

        Ok(Self {
            provider,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model,
            sampling: SamplingParams {
                temperature,
                max_tokens,
            },
        })
    }
}

fn setting_str(settings: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<String> {
    non_empty(settings.get(key).and_then(|v| v.as_str()).map(String::from))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    if let Some((var_name, default)) = expr.split_once(":-") {
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(json: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        json.as_object().cloned().unwrap()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_interpolate_env_vars_with_default() {
        std::env::remove_var("__DATABRAIN_NONEXISTENT_VAR__");
        let input = "${__DATABRAIN_NONEXISTENT_VAR__:-fallback-model}";
        assert_eq!(interpolate_env_vars(input), "fallback-model");
    }

    #[test]
    fn test_interpolate_env_vars_with_value() {
        std::env::set_var("__DATABRAIN_GATEWAY_VAR__", "sk-from-env");
        let input = "api_key: ${__DATABRAIN_GATEWAY_VAR__:-none}";
        assert_eq!(interpolate_env_vars(input), "api_key: sk-from-env");
        std::env::remove_var("__DATABRAIN_GATEWAY_VAR__");
    }

    #[test]
    fn test_interpolate_no_vars() {
        let input = "plain text with no variables";
        assert_eq!(interpolate_env_vars(input), input);
    }

    #[test]
    fn test_expand_tilde() {
        let result = expand_tilde("~/Documents");
        assert!(!result.starts_with('~'), "tilde should be expanded");
        assert!(result.ends_with("/Documents"));
    }

    #[test]
    fn test_provider_parse_and_keys() {
        assert_eq!(ProviderKind::parse("OpenRouter"), Some(ProviderKind::OpenRouter));
        assert_eq!(ProviderKind::parse("mistral"), None);
        assert_eq!(ProviderKind::DeepSeek.api_key_setting(), "deepseek_api_key");
        assert_eq!(ProviderKind::Groq.api_key_env(), "GROQ_API_KEY");
    }

    #[test]
    fn test_resolve_defaults_to_openai_preset() {
        let cfg = GatewayConfig::resolve_with_env(
            &settings(serde_json::json!({"openai_api_key": "sk-1"})),
            None,
            no_env,
        )
        .unwrap();
        assert_eq!(cfg.provider, ProviderKind::OpenAi);
        assert_eq!(cfg.base_url, "https://api.openai.com/v1");
        assert_eq!(cfg.default_model, "gpt-4o");
        assert_eq!(cfg.sampling, SamplingParams::default());
    }

    #[test]
    fn test_settings_win_over_file_and_env() {
        let file = GatewayFile {
            provider: Some("openai".into()),
            api_key: Some("sk-file".into()),
            default_model: Some("gpt-4o-mini".into()),
            temperature: Some(0.2),
            ..Default::default()
        };
        let cfg = GatewayConfig::resolve_with_env(
            &settings(serde_json::json!({
                "ai_provider": "groq",
                "groq_api_key": "gsk-settings",
                "default_model": "llama-3.1-8b-instant",
                "max_tokens": 1000,
            })),
            Some(&file),
            |_| Some("gsk-env".into()),
        )
        .unwrap();
        assert_eq!(cfg.provider, ProviderKind::Groq);
        assert_eq!(cfg.api_key, "gsk-settings");
        assert_eq!(cfg.default_model, "llama-3.1-8b-instant");
        assert_eq!(cfg.sampling.temperature, 0.2);
        assert_eq!(cfg.sampling.max_tokens, 1000);
    }

    #[test]
    fn test_env_key_used_when_nothing_saved() {
        let cfg = GatewayConfig::resolve_with_env(
            &settings(serde_json::json!({"ai_provider": "deepseek", "deepseek_api_key": ""})),
            None,
            |name| (name == "DEEPSEEK_API_KEY").then(|| "ds-env".to_string()),
        )
        .unwrap();
        assert_eq!(cfg.api_key, "ds-env");
        assert_eq!(cfg.base_url, "https://api.deepseek.com/v1");
    }

    #[test]
    fn test_missing_key_is_reported() {
        let err = GatewayConfig::resolve_with_env(&serde_json::Map::new(), None, no_env).unwrap_err();
        assert!(matches!(err, InferenceError::MissingApiKey { ref provider } if provider == "openai"));
    }

    #[test]
    fn test_unknown_provider_is_config_error() {
        let err = GatewayConfig::resolve_with_env(
            &settings(serde_json::json!({"ai_provider": "mistral"})),
            None,
            no_env,
        )
        .unwrap_err();
        assert!(matches!(err, InferenceError::ConfigError { .. }));
    }

    #[test]
    fn test_base_url_override_trims_slash() {
        let cfg = GatewayConfig::resolve_with_env(
            &settings(serde_json::json!({
                "openai_api_key": "sk",
                "openai_base_url": "http://localhost:8080/v1/",
            })),
            None,
            no_env,
        )
        .unwrap();
        assert_eq!(cfg.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn test_load_gateway_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.yaml");
        assert!(load_gateway_file(&path).unwrap().is_none());

        std::fs::write(
            &path,
            "provider: openrouter\ndefault_model: ${__DATABRAIN_UNSET_MODEL__:-anthropic/claude-3.5-sonnet}\nmax_tokens: 2048\n",
        )
        .unwrap();
        let file = load_gateway_file(&path).unwrap().unwrap();
        assert_eq!(file.provider.as_deref(), Some("openrouter"));
        assert_eq!(file.default_model.as_deref(), Some("anthropic/claude-3.5-sonnet"));
        assert_eq!(file.max_tokens, Some(2048));
    }

    #[test]
    fn test_load_gateway_file_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.yaml");
        std::fs::write(&path, "max_tokens: [not, a, number]\n").unwrap();
        assert!(matches!(
            load_gateway_file(&path),
            Err(InferenceError::ConfigError { .. })
        ));
    }
}
