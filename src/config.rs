//! Loading tutor configuration (escalation policy, per-tier model overrides, prompts) from TOML.
//!
//! Example:
//! ```toml
//! [escalation]
//! idle_ttl_secs = 21600
//! sweep_interval_secs = 300
//!
//! [models.beginner_zero]
//! model_name = "gpt-5-mini"
//! endpoint = "https://my-resource.openai.azure.com"
//!
//! [prompts]
//! beginner = "You are a patient programming tutor..."
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::{ModelProvider, Tier};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TutorConfig {
  #[serde(default)]
  pub escalation: EscalationSettings,
  #[serde(default)]
  pub models: BTreeMap<Tier, ModelOverride>,
  #[serde(default)]
  pub prompts: Prompts,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EscalationSettings {
  /// Sessions with no message for this long are forgotten.
  pub idle_ttl_secs: u64,
  pub sweep_interval_secs: u64,
}

impl Default for EscalationSettings {
  fn default() -> Self {
    Self { idle_ttl_secs: 6 * 60 * 60, sweep_interval_secs: 300 }
  }
}

impl EscalationSettings {
  pub fn idle_ttl(&self) -> Duration { Duration::from_secs(self.idle_ttl_secs) }

  // Never zero: tokio::time::interval panics on a zero period.
  pub fn sweep_interval(&self) -> Duration { Duration::from_secs(self.sweep_interval_secs.max(1)) }
}

/// Per-tier model entry accepted in TOML. Unset fields keep the built-in default
/// or fall back to the AZURE_OPENAI_* environment variables.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct ModelOverride {
  #[serde(default)] pub provider: Option<ModelProvider>,
  #[serde(default)] pub model_name: Option<String>,
  #[serde(default)] pub endpoint: Option<String>,
  #[serde(default)] pub api_key: Option<String>,
  #[serde(default)] pub api_version: Option<String>,
}

/// System prompts per tier. The strongest tier gets the most hand-holding.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub beginner_zero: String,
  pub beginner: String,
  pub beginner_plus: String,
  /// Appended when the learner has code open in the editor. `{code}` is replaced.
  pub code_context_template: String,
}

impl Prompts {
  pub fn for_tier(&self, tier: Tier) -> &str {
    match tier {
      Tier::BeginnerZero => &self.beginner_zero,
      Tier::Beginner => &self.beginner,
      Tier::BeginnerPlus => &self.beginner_plus,
    }
  }
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      beginner_zero: "You are a warm, very patient programming tutor for someone who has never coded before. Use everyday analogies, explain one idea at a time, avoid jargon, and check understanding with a short question at the end.".into(),
      beginner: "You are a friendly programming tutor for beginners. Explain concepts step by step with small code examples, and encourage the learner to try things themselves before giving full solutions.".into(),
      beginner_plus: "You are a concise programming mentor for learners who know the basics. Focus on reasoning, trade-offs and idiomatic code; give hints before answers.".into(),
      code_context_template: "[Learner's current code]\nThe learner has written the following code in the editor. When they refer to \"this code\" or \"it\", explain with reference to it:\n```\n{code}\n```".into(),
    }
  }
}

/// Attempt to load `TutorConfig` from TUTOR_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_tutor_config_from_env() -> Option<TutorConfig> {
  let path = std::env::var("TUTOR_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<TutorConfig>(&s) {
      Ok(cfg) => {
        info!(target: "codetutor_backend", %path, overrides = cfg.models.len(), "Loaded tutor config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "codetutor_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "codetutor_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
