use std::{collections::HashMap, fs, time::Duration};

use tracing::warn;

/// Client-side settings for the validation channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Websocket endpoint the cable connects to.
    pub endpoint: String,
    /// Channel identifier the validation subscription is made on.
    pub channel: String,
    /// Debounce window for keystroke-driven validation, in milliseconds.
    pub debounce_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8443/cable".to_string(),
            channel: "form_validation".to_string(),
            debounce_ms: 500,
        }
    }
}

impl Settings {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Load settings from `formwire.toml` (if present), then let environment
/// variables override. `FORMWIRE_*` takes effect first, `APP__*` last.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("formwire.toml") {
        apply_file_settings(&mut settings, &raw);
    }

    for key in ["FORMWIRE_ENDPOINT", "APP__ENDPOINT"] {
        if let Ok(value) = std::env::var(key) {
            settings.endpoint = value;
        }
    }
    for key in ["FORMWIRE_CHANNEL", "APP__CHANNEL"] {
        if let Ok(value) = std::env::var(key) {
            settings.channel = value;
        }
    }
    for key in ["FORMWIRE_DEBOUNCE_MS", "APP__DEBOUNCE_MS"] {
        if let Ok(value) = std::env::var(key) {
            match value.parse::<u64>() {
                Ok(parsed) => settings.debounce_ms = parsed,
                Err(_) => warn!(key, value, "ignoring non-numeric debounce override"),
            }
        }
    }

    settings
}

fn apply_file_settings(settings: &mut Settings, raw: &str) {
    let parsed: HashMap<String, String> = match toml::from_str(raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!("failed to parse formwire.toml, using defaults: {err}");
            return;
        }
    };
    if let Some(endpoint) = parsed.get("endpoint") {
        settings.endpoint = endpoint.clone();
    }
    if let Some(channel) = parsed.get("channel") {
        settings.channel = channel.clone();
    }
    if let Some(debounce) = parsed.get("debounce_ms") {
        match debounce.parse::<u64>() {
            Ok(parsed) => settings.debounce_ms = parsed,
            Err(_) => warn!(value = %debounce, "ignoring non-numeric debounce_ms in formwire.toml"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_cable() {
        let settings = Settings::default();
        assert_eq!(settings.endpoint, "ws://127.0.0.1:8443/cable");
        assert_eq!(settings.channel, "form_validation");
        assert_eq!(settings.debounce_window(), Duration::from_millis(500));
    }

    #[test]
    fn file_settings_override_defaults() {
        let mut settings = Settings::default();
        apply_file_settings(
            &mut settings,
            "endpoint = \"wss://forms.example.com/cable\"\nchannel = \"signup\"\ndebounce_ms = \"250\"\n",
        );
        assert_eq!(settings.endpoint, "wss://forms.example.com/cable");
        assert_eq!(settings.channel, "signup");
        assert_eq!(settings.debounce_ms, 250);
    }

    #[test]
    fn malformed_file_keeps_defaults() {
        let mut settings = Settings::default();
        apply_file_settings(&mut settings, "not toml at all [");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn non_numeric_debounce_is_ignored() {
        let mut settings = Settings::default();
        apply_file_settings(&mut settings, "debounce_ms = \"soon\"\n");
        assert_eq!(settings.debounce_ms, 500);
    }
}
