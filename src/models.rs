//! Model config provider: tier -> connection parameters.
//!
//! Resolution order per field: TOML override, then built-in default (model name
//! and provider only), then the AZURE_OPENAI_* environment captured at startup.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::ModelOverride;
use crate::domain::{ModelConfig, ModelProvider, Tier};

/// Endpoint/key/version used when a tier has no explicit value.
#[derive(Clone, Debug, Default)]
pub struct EnvFallback {
  pub endpoint: String,
  pub api_key: String,
  pub api_version: Option<String>,
}

impl EnvFallback {
  pub fn from_env() -> Self {
    Self {
      endpoint: std::env::var("AZURE_OPENAI_ENDPOINT").unwrap_or_default(),
      api_key: std::env::var("AZURE_OPENAI_API_KEY").unwrap_or_default(),
      api_version: std::env::var("AZURE_OPENAI_API_VERSION").ok().filter(|v| !v.is_empty()),
    }
  }
}

#[derive(Clone, Debug)]
pub struct ModelCatalog {
  overrides: BTreeMap<Tier, ModelOverride>,
  fallback: EnvFallback,
}

fn default_model_name(tier: Tier) -> &'static str {
  match tier {
    Tier::BeginnerZero => "gpt-5-mini",
    Tier::Beginner | Tier::BeginnerPlus => "gpt-5-nano",
  }
}

fn non_empty(v: &Option<String>) -> Option<String> {
  v.as_ref().filter(|s| !s.trim().is_empty()).cloned()
}

impl ModelCatalog {
  pub fn new(overrides: BTreeMap<Tier, ModelOverride>, fallback: EnvFallback) -> Self {
    Self { overrides, fallback }
  }

  /// Pure lookup; never fails. An empty `api_key` means the tier is not configured.
  pub fn resolve(&self, tier: Tier) -> ModelConfig {
    let ov = self.overrides.get(&tier);

    ModelConfig {
      provider: ov.and_then(|o| o.provider).unwrap_or_default(),
      endpoint: ov
        .and_then(|o| non_empty(&o.endpoint))
        .unwrap_or_else(|| self.fallback.endpoint.clone()),
      api_key: ov
        .and_then(|o| non_empty(&o.api_key))
        .unwrap_or_else(|| self.fallback.api_key.clone()),
      model_name: ov
        .and_then(|o| non_empty(&o.model_name))
        .unwrap_or_else(|| default_model_name(tier).to_string()),
      api_version: ov
        .and_then(|o| non_empty(&o.api_version))
        .or_else(|| self.fallback.api_version.clone()),
    }
  }

  /// Every tier's resolved config with the API key masked, for admin display.
  pub fn masked(&self) -> Vec<MaskedModelConfig> {
    Tier::ALL
      .iter()
      .map(|&tier| {
        let cfg = self.resolve(tier);
        MaskedModelConfig {
          level: tier,
          provider: cfg.provider,
          model_name: cfg.model_name,
          endpoint: Some(cfg.endpoint).filter(|e| !e.is_empty()),
          api_key_masked: mask_api_key(&cfg.api_key),
          api_version: cfg.api_version,
        }
      })
      .collect()
  }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskedModelConfig {
  pub level: Tier,
  pub provider: ModelProvider,
  pub model_name: String,
  pub endpoint: Option<String>,
  pub api_key_masked: Option<String>,
  pub api_version: Option<String>,
}

const MASK: &str = "••••••••";

/// Show only the last 8 characters of a key. Short keys are fully masked.
pub fn mask_api_key(key: &str) -> Option<String> {
  if key.is_empty() {
    return None;
  }
  let n = key.chars().count();
  if n <= 8 {
    return Some(MASK.to_string());
  }
  let tail: String = key.chars().skip(n - 8).collect();
  Some(format!("{MASK}{tail}"))
}
