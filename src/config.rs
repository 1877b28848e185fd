use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::external::openrouter::DEFAULT_BASE_URL;

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a friendly, knowledgeable assistant. Keep answers concise and practical.";

/// Settings for the completion API
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            max_tokens: 400,
            temperature: 0.7,
            timeout: Duration::from_secs(30),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Run every job each minute instead of on its production schedule
    pub test_mode: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub default_model: Option<String>,
    pub models_config: Option<PathBuf>,
    /// No URL means the in-memory store
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub bind_addr: SocketAddr,
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = LlmConfig::default();

        let system_prompt = match (get("SYSTEM_PROMPT"), get("SYSTEM_PROMPT_FILE")) {
            (Some(prompt), _) => prompt,
            (None, Some(path)) => std::fs::read_to_string(&path)
                .map_err(|e| format!("Failed to read SYSTEM_PROMPT_FILE {}: {}", path, e))?,
            (None, None) => defaults.system_prompt,
        };

        let llm = LlmConfig {
            api_key: get("OPENROUTER_API_KEY"),
            base_url: get("OPENROUTER_BASE_URL").unwrap_or(defaults.base_url),
            max_tokens: parse_or(get("LLM_MAX_TOKENS"), "LLM_MAX_TOKENS", defaults.max_tokens)?,
            temperature: parse_or(get("LLM_TEMPERATURE"), "LLM_TEMPERATURE", defaults.temperature)?,
            timeout: Duration::from_secs(parse_or(get("LLM_TIMEOUT_SECS"), "LLM_TIMEOUT_SECS", 30u64)?),
            system_prompt,
        };

        if llm.max_tokens == 0 {
            return Err("LLM_MAX_TOKENS must be greater than zero".to_string());
        }
        if !(0.0..=2.0).contains(&llm.temperature) {
            return Err(format!("LLM_TEMPERATURE must be between 0 and 2, got {}", llm.temperature));
        }

        Ok(Self {
            llm,
            default_model: get("DEFAULT_MODEL"),
            models_config: get("MODELS_CONFIG").map(PathBuf::from),
            database_url: get("DATABASE_URL"),
            db_max_connections: parse_or(get("DB_MAX_CONNECTIONS"), "DB_MAX_CONNECTIONS", 10)?,
            bind_addr: parse_or(get("BIND_ADDR"), "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            scheduler: SchedulerConfig {
                enabled: parse_or(get("JOB_SCHEDULER_ENABLED"), "JOB_SCHEDULER_ENABLED", true)?,
                test_mode: parse_or(get("JOB_SCHEDULER_TEST_MODE"), "JOB_SCHEDULER_TEST_MODE", false)?,
            },
        })
    }

    /// Convenience for tests and tools
    pub fn from_map(vars: &HashMap<&str, &str>) -> Result<Self, String> {
        Self::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|e| format!("Invalid value for {}: '{}' ({})", key, raw, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = AppConfig::from_map(&HashMap::new()).unwrap();
        assert_eq!(config.llm.max_tokens, 400);
        assert_eq!(config.llm.timeout, Duration::from_secs(30));
        assert_eq!(config.llm.base_url, DEFAULT_BASE_URL);
        assert!(config.llm.api_key.is_none());
        assert!(config.database_url.is_none());
        assert_eq!(config.bind_addr.port(), 3000);
        assert!(config.scheduler.enabled);
        assert!(!config.scheduler.test_mode);
    }

    #[test]
    fn test_blank_values_count_as_unset() {
        let vars = HashMap::from([("OPENROUTER_API_KEY", "  "), ("DATABASE_URL", "")]);
        let config = AppConfig::from_map(&vars).unwrap();
        assert!(config.llm.api_key.is_none());
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_overrides_are_parsed() {
        let vars = HashMap::from([
            ("LLM_MAX_TOKENS", "800"),
            ("LLM_TEMPERATURE", "0.2"),
            ("DEFAULT_MODEL", "claude-3-haiku"),
            ("SYSTEM_PROMPT", "Answer like a pirate."),
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("JOB_SCHEDULER_ENABLED", "false"),
        ]);
        let config = AppConfig::from_map(&vars).unwrap();
        assert_eq!(config.llm.max_tokens, 800);
        assert_eq!(config.default_model.as_deref(), Some("claude-3-haiku"));
        assert_eq!(config.llm.system_prompt, "Answer like a pirate.");
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert!(!config.scheduler.enabled);
    }

    #[test]
    fn test_invalid_numbers_are_reported() {
        let vars = HashMap::from([("LLM_MAX_TOKENS", "lots")]);
        let err = AppConfig::from_map(&vars).unwrap_err();
        assert!(err.contains("LLM_MAX_TOKENS"));

        let vars = HashMap::from([("LLM_TEMPERATURE", "3.5")]);
        assert!(AppConfig::from_map(&vars).is_err());
    }
}
