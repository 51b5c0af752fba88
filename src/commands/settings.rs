//! Commands for the Settings panel.

use crate::agent_core::Settings;
use crate::AppState;

/// The full settings map.
pub fn get_settings(state: &AppState) -> Settings {
    state.store.get_settings()
}

/// Shallow-merge `settings` into the stored map. Only a JSON object is
/// accepted.
pub fn save_settings(state: &AppState, settings: serde_json::Value) -> Result<(), String> {
    let serde_json::Value::Object(map) = settings else {
        return Err("settings must be a JSON object".to_string());
    };
    let keys: Vec<&String> = map.keys().collect();
    tracing::info!(keys = ?keys, "saving settings");
    state.store.save_settings(map);
    Ok(())
}

/// Set one key. The value is parsed as JSON when possible, else kept as a
/// string, so `temperature 0.2` stores a number and `ai_provider groq` a
/// string.
pub fn set_setting(state: &AppState, key: &str, raw_value: &str) -> Result<(), String> {
    let key = key.trim();
    if key.is_empty() {
        return Err("setting key must not be empty".to_string());
    }
    let value = serde_json::from_str(raw_value)
        .unwrap_or_else(|_| serde_json::Value::String(raw_value.to_string()));
    let mut map = Settings::new();
    map.insert(key.to_string(), value);
    state.store.save_settings(map);
    Ok(())
}
