use aura_core::settings::SessionSettings;
use gemini_live::DEFAULT_ENDPOINT;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub gemini_api_key: String,
    pub endpoint: String,
    pub log_level: Level,
    pub session: SessionSettings,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let endpoint =
            std::env::var("GEMINI_LIVE_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        if !endpoint.starts_with("wss://") && !endpoint.starts_with("ws://") {
            return Err(ConfigError::InvalidValue(
                "GEMINI_LIVE_ENDPOINT".to_string(),
                format!("'{}' is not a WebSocket URL", endpoint),
            ));
        }

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let mut session = SessionSettings::default();
        if let Ok(model) = std::env::var("AURA_MODEL") {
            session.model = if model.starts_with("models/") {
                model
            } else {
                format!("models/{model}")
            };
        }
        if let Ok(voice) = std::env::var("AURA_VOICE") {
            session.voice = voice;
        }
        if let Ok(path) = std::env::var("AURA_SYSTEM_INSTRUCTION_PATH") {
            session.system_instruction = std::fs::read_to_string(&path)
                .map_err(|e| {
                    ConfigError::InvalidValue(
                        "AURA_SYSTEM_INSTRUCTION_PATH".to_string(),
                        e.to_string(),
                    )
                })?
                .trim()
                .to_string();
        }
        session.transcript_clear_delay =
            millis_var("AURA_TRANSCRIPT_CLEAR_MS", session.transcript_clear_delay)?;
        session.tool_response_delay =
            millis_var("AURA_TOOL_RESPONSE_DELAY_MS", session.tool_response_delay)?;
        session.transcribe_input = bool_var("AURA_TRANSCRIBE_INPUT", session.transcribe_input)?;

        Ok(Self {
            gemini_api_key,
            endpoint,
            log_level,
            session,
        })
    }
}

fn millis_var(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| {
                ConfigError::InvalidValue(
                    name.to_string(),
                    format!("'{}' is not a number of milliseconds", raw),
                )
            }),
        Err(_) => Ok(default),
    }
}

fn bool_var(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(
                name.to_string(),
                format!("'{}' is not a boolean", raw),
            )),
        },
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aura_core::settings::{DEFAULT_MODEL, DEFAULT_VOICE};
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("GEMINI_API_KEY");
            env::remove_var("GEMINI_LIVE_ENDPOINT");
            env::remove_var("RUST_LOG");
            env::remove_var("AURA_MODEL");
            env::remove_var("AURA_VOICE");
            env::remove_var("AURA_SYSTEM_INSTRUCTION_PATH");
            env::remove_var("AURA_TRANSCRIPT_CLEAR_MS");
            env::remove_var("AURA_TOOL_RESPONSE_DELAY_MS");
            env::remove_var("AURA_TRANSCRIBE_INPUT");
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-gemini-key");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_minimal() {
        clear_env_vars();
        set_minimal_env();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.gemini_api_key, "test-gemini-key");
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.session.model, DEFAULT_MODEL);
        assert_eq!(config.session.voice, DEFAULT_VOICE);
        assert_eq!(config.session.transcript_clear_delay, Duration::from_secs(4));
        assert_eq!(config.session.tool_response_delay, Duration::from_millis(500));
        assert!(!config.session.transcribe_input);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        set_minimal_env();
        let prompt = std::env::temp_dir().join("aura-config-test-instruction.md");
        std::fs::write(&prompt, "  Be brief.\n").unwrap();
        unsafe {
            env::set_var("GEMINI_LIVE_ENDPOINT", "ws://127.0.0.1:9000/live");
            env::set_var("RUST_LOG", "debug");
            env::set_var("AURA_MODEL", "gemini-live-2.5-flash");
            env::set_var("AURA_VOICE", "Puck");
            env::set_var("AURA_SYSTEM_INSTRUCTION_PATH", &prompt);
            env::set_var("AURA_TRANSCRIPT_CLEAR_MS", "2500");
            env::set_var("AURA_TOOL_RESPONSE_DELAY_MS", "0");
            env::set_var("AURA_TRANSCRIBE_INPUT", "yes");
        }

        let config = Config::from_env().expect("Config should load successfully");
        std::fs::remove_file(&prompt).ok();

        assert_eq!(config.endpoint, "ws://127.0.0.1:9000/live");
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.session.model, "models/gemini-live-2.5-flash");
        assert_eq!(config.session.voice, "Puck");
        assert_eq!(config.session.system_instruction, "Be brief.");
        assert_eq!(config.session.transcript_clear_delay, Duration::from_millis(2500));
        assert_eq!(config.session.tool_response_delay, Duration::ZERO);
        assert!(config.session.transcribe_input);
    }

    #[test]
    #[serial]
    fn test_config_missing_api_key() {
        clear_env_vars();

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "GEMINI_API_KEY"),
            _ => panic!("Expected MissingVar for GEMINI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_values() {
        for (var, value) in [
            ("RUST_LOG", "not-a-level"),
            ("GEMINI_LIVE_ENDPOINT", "https://example.com"),
            ("AURA_TRANSCRIPT_CLEAR_MS", "soon"),
            ("AURA_TRANSCRIBE_INPUT", "maybe"),
            ("AURA_SYSTEM_INSTRUCTION_PATH", "/definitely/not/here.md"),
        ] {
            clear_env_vars();
            set_minimal_env();
            unsafe {
                env::set_var(var, value);
            }

            match Config::from_env().unwrap_err() {
                ConfigError::InvalidValue(name, _) => assert_eq!(name, var),
                other => panic!("Expected InvalidValue for {var}, got {other:?}"),
            }
        }
        clear_env_vars();
    }
}
