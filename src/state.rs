//! Application state: escalation tracker, model catalog, LLM gateway, and prompts.
//!
//! The tracker is owned here (not a global) and shared with the eviction sweeper
//! through `Arc`. Dropping the last `AppState` discards all escalation state.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};

use crate::config::{load_tutor_config_from_env, Prompts, TutorConfig};
use crate::domain::Tier;
use crate::escalation::EscalationTracker;
use crate::models::{EnvFallback, ModelCatalog};
use crate::openai::{GatewayError, LlmGateway};

// Covers the whole streamed response, not just the first byte.
const LLM_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct AppState {
  pub tracker: Arc<EscalationTracker>,
  pub models: ModelCatalog,
  pub gateway: LlmGateway,
  pub prompts: Prompts,
  pub sweep_interval: Duration,
}

impl AppState {
  /// Build state from env: load TOML config (if any) and capture AZURE_OPENAI_* fallbacks.
  #[instrument(level = "info", skip_all)]
  pub fn from_env() -> Result<Self, GatewayError> {
    let cfg = load_tutor_config_from_env().unwrap_or_default();
    Self::from_config(cfg, EnvFallback::from_env())
  }

  pub fn from_config(cfg: TutorConfig, fallback: EnvFallback) -> Result<Self, GatewayError> {
    let tracker = Arc::new(EscalationTracker::with_system_clock(cfg.escalation.idle_ttl()));
    let models = ModelCatalog::new(cfg.models, fallback);
    let gateway = LlmGateway::new(LLM_TIMEOUT)?;

    for tier in Tier::ALL {
      let m = models.resolve(tier);
      info!(
        target: "codetutor_backend",
        %tier, model = %m.model_name, provider = %m.provider,
        configured = !m.api_key.is_empty(),
        "Model for tier"
      );
    }
    info!(
      target: "escalation",
      idle_ttl_secs = cfg.escalation.idle_ttl_secs,
      sweep_interval_secs = cfg.escalation.sweep_interval_secs,
      "Escalation tracker ready"
    );

    Ok(Self {
      tracker,
      models,
      gateway,
      prompts: cfg.prompts,
      sweep_interval: cfg.escalation.sweep_interval(),
    })
  }
}
