use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;

use crate::errors::AppError;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Prices are quoted per million tokens.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelPricing {
    pub input_tokens_per_million: BigDecimal,
    pub output_tokens_per_million: BigDecimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub name: String,
    /// Identifier sent to the completion API, e.g. `openai/gpt-4o-mini`
    pub model: String,
    pub provider: String,
    pub emoji: String,
    pub available: bool,
    pub pricing: ModelPricing,
}

// models_config.json carries plain JSON numbers; they go through their shortest
// decimal text so 0.15 stays 0.15 rather than its binary expansion.
#[derive(Debug, Deserialize)]
struct RawCatalog {
    models: BTreeMap<String, RawModel>,
    #[serde(default)]
    default_model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawModel {
    name: String,
    model: String,
    #[serde(default = "unknown_provider")]
    provider: String,
    #[serde(default)]
    emoji: String,
    #[serde(default = "default_available")]
    available: bool,
    #[serde(default)]
    pricing: RawPricing,
}

#[derive(Debug, Default, Deserialize)]
struct RawPricing {
    #[serde(default)]
    input_tokens_per_million: f64,
    #[serde(default)]
    output_tokens_per_million: f64,
}

fn unknown_provider() -> String {
    "Unknown".to_string()
}

fn default_available() -> bool {
    true
}

fn price(value: f64) -> Result<BigDecimal, AppError> {
    if !value.is_finite() || value < 0.0 {
        return Err(AppError::Validation(format!("Invalid token price: {}", value)));
    }
    BigDecimal::from_str(&value.to_string())
        .map_err(|e| AppError::Validation(format!("Invalid token price {}: {}", value, e)))
}

/// Pricing catalogue keyed by the short model id the client selects.
#[derive(Debug, Clone, Serialize)]
pub struct ModelCatalog {
    models: BTreeMap<String, ModelInfo>,
    default_model: String,
}

impl ModelCatalog {
    pub fn new(models: BTreeMap<String, ModelInfo>, default_model: impl Into<String>) -> Result<Self, AppError> {
        let default_model = default_model.into();
        if !models.contains_key(&default_model) {
            return Err(AppError::Validation(format!(
                "Default model '{}' is not in the model catalogue",
                default_model
            )));
        }
        Ok(Self { models, default_model })
    }

    pub fn from_json(json: &str) -> Result<Self, AppError> {
        let raw: RawCatalog = serde_json::from_str(json)
            .map_err(|e| AppError::Validation(format!("Invalid models config: {}", e)))?;

        let mut models = BTreeMap::new();
        for (key, m) in raw.models {
            let pricing = ModelPricing {
                input_tokens_per_million: price(m.pricing.input_tokens_per_million)?,
                output_tokens_per_million: price(m.pricing.output_tokens_per_million)?,
            };
            models.insert(key, ModelInfo {
                name: m.name,
                model: m.model,
                provider: m.provider,
                emoji: m.emoji,
                available: m.available,
                pricing,
            });
        }

        let default_model = raw
            .default_model
            .or_else(|| models.keys().next().cloned())
            .ok_or_else(|| AppError::Validation("Models config contains no models".to_string()))?;

        Self::new(models, default_model)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Validation(format!("Failed to read models config {}: {}", path.display(), e))
        })?;
        Self::from_json(&contents)
    }

    pub fn get(&self, key: &str) -> Option<&ModelInfo> {
        self.models.get(key)
    }

    /// Look up a selectable model, rejecting unknown and unavailable ones.
    pub fn resolve(&self, key: &str) -> Result<&ModelInfo, AppError> {
        match self.models.get(key) {
            Some(info) if info.available => Ok(info),
            Some(_) => Err(AppError::Validation(format!("Model '{}' is not available", key))),
            None => Err(AppError::Validation(format!("Unknown model: {}", key))),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Replace the default model, keeping the catalogue unchanged.
    pub fn with_default_model(mut self, key: &str) -> Result<Self, AppError> {
        self.resolve(key)?;
        self.default_model = key.to_string();
        Ok(self)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ModelInfo)> {
        self.models.iter()
    }

    pub fn available(&self) -> impl Iterator<Item = (&String, &ModelInfo)> {
        self.models.iter().filter(|(_, m)| m.available)
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        let entries: [(&str, &str, &str, &str, &str, &str, &str); 6] = [
            ("claude-3.5-sonnet", "Claude 3.5 Sonnet", "anthropic/claude-3.5-sonnet", "Anthropic", "🤠", "3", "15"),
            ("claude-3-opus", "Claude 3 Opus", "anthropic/claude-3-opus", "Anthropic", "🧠", "15", "75"),
            ("claude-3-haiku", "Claude 3 Haiku", "anthropic/claude-3-haiku", "Anthropic", "⚡", "0.25", "1.25"),
            ("gpt-4o", "GPT-4o", "openai/gpt-4o", "OpenAI", "🚀", "2.5", "10"),
            ("gpt-4o-mini", "GPT-4o Mini", "openai/gpt-4o-mini", "OpenAI", "💨", "0.15", "0.6"),
            ("llama-3.1-405b", "Llama 3.1 405B", "meta-llama/llama-3.1-405b-instruct", "Meta", "🦙", "3", "3"),
        ];

        let models = entries
            .into_iter()
            .map(|(key, name, model, provider, emoji, input, output)| {
                let info = ModelInfo {
                    name: name.to_string(),
                    model: model.to_string(),
                    provider: provider.to_string(),
                    emoji: emoji.to_string(),
                    available: true,
                    pricing: ModelPricing {
                        input_tokens_per_million: input.parse().unwrap_or_default(),
                        output_tokens_per_million: output.parse().unwrap_or_default(),
                    },
                };
                (key.to_string(), info)
            })
            .collect();

        Self {
            models,
            default_model: DEFAULT_MODEL.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "default_model": "cheap",
        "models": {
            "cheap": {
                "name": "Cheap",
                "model": "vendor/cheap",
                "provider": "Vendor",
                "emoji": "💨",
                "pricing": { "input_tokens_per_million": 0.15, "output_tokens_per_million": 0.6 }
            },
            "retired": {
                "name": "Retired",
                "model": "vendor/retired",
                "available": false,
                "pricing": { "input_tokens_per_million": 1, "output_tokens_per_million": 2 }
            }
        }
    }"#;

    #[test]
    fn test_default_catalog_contains_default_model() {
        let catalog = ModelCatalog::default();
        let info = catalog.resolve(DEFAULT_MODEL).unwrap();
        assert_eq!(info.model, "openai/gpt-4o-mini");
        assert_eq!(info.pricing.input_tokens_per_million, "0.15".parse::<BigDecimal>().unwrap());
    }

    #[test]
    fn test_from_json_keeps_decimal_prices_exact() {
        let catalog = ModelCatalog::from_json(CONFIG).unwrap();
        let cheap = catalog.get("cheap").unwrap();
        assert_eq!(cheap.pricing.input_tokens_per_million.to_string(), "0.15");
        assert_eq!(cheap.pricing.output_tokens_per_million.to_string(), "0.6");
        assert_eq!(catalog.default_model(), "cheap");
        assert_eq!(catalog.get("retired").unwrap().provider, "Unknown");
    }

    #[test]
    fn test_resolve_rejects_unknown_and_unavailable() {
        let catalog = ModelCatalog::from_json(CONFIG).unwrap();
        assert!(matches!(catalog.resolve("nope"), Err(AppError::Validation(_))));
        assert!(matches!(catalog.resolve("retired"), Err(AppError::Validation(_))));
        assert_eq!(catalog.available().count(), 1);
    }

    #[test]
    fn test_default_model_must_exist() {
        let result = ModelCatalog::default().with_default_model("missing");
        assert!(result.is_err());
    }
}
