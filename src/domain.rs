//! Domain models used by the backend: learner tiers, model connection parameters,
//! and the per-session escalation record.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Learner tier. Also selects which model serves a response.
///
/// `BeginnerZero` is the strongest/most supportive tier; escalation always
/// targets it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
  BeginnerZero,
  Beginner,
  BeginnerPlus,
}

impl Tier {
  pub const STRONGEST: Tier = Tier::BeginnerZero;
  pub const ALL: [Tier; 3] = [Tier::BeginnerZero, Tier::Beginner, Tier::BeginnerPlus];

  pub fn is_strongest(self) -> bool { self == Self::STRONGEST }

  pub fn as_str(self) -> &'static str {
    match self {
      Tier::BeginnerZero => "beginner_zero",
      Tier::Beginner => "beginner",
      Tier::BeginnerPlus => "beginner_plus",
    }
  }
}

impl Default for Tier {
  fn default() -> Self { Tier::Beginner }
}

impl fmt::Display for Tier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown learner tier: {0}")]
pub struct UnknownTier(pub String);

impl FromStr for Tier {
  type Err = UnknownTier;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim() {
      "beginner_zero" => Ok(Tier::BeginnerZero),
      "beginner" => Ok(Tier::Beginner),
      "beginner_plus" => Ok(Tier::BeginnerPlus),
      other => Err(UnknownTier(other.to_string())),
    }
  }
}

/// Which wire dialect the LLM endpoint speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelProvider {
  /// Azure OpenAI deployments (`api-key` header + `api-version` query).
  AzureOpenai,
  /// Any endpoint speaking the OpenAI chat.completions API with bearer auth.
  OpenaiCompatible,
}

impl Default for ModelProvider {
  fn default() -> Self { ModelProvider::AzureOpenai }
}

impl fmt::Display for ModelProvider {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ModelProvider::AzureOpenai => f.write_str("azure-openai"),
      ModelProvider::OpenaiCompatible => f.write_str("openai-compatible"),
    }
  }
}

/// Resolved connection parameters for one tier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelConfig {
  pub provider: ModelProvider,
  pub endpoint: String,
  pub api_key: String,
  pub model_name: String,
  pub api_version: Option<String>,
}

/// Why a session was moved to the strongest tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EscalationReason {
  LearningDifficulty,
  RepeatedConcept,
}

impl EscalationReason {
  pub fn as_str(self) -> &'static str {
    match self {
      EscalationReason::LearningDifficulty => "learning difficulty detected",
      EscalationReason::RepeatedConcept => "repeated concept question",
    }
  }
}

impl fmt::Display for EscalationReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl Serialize for EscalationReason {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.as_str())
  }
}

/// Heuristic state tracked per chat session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEscalationState {
  pub tier: Tier,
  pub frustration_count: u32,
  /// Most recent first, never longer than the concept window.
  pub recent_concepts: Vec<&'static str>,
  pub repeat_count: u32,
  pub escalated: bool,
  pub escalation_reason: Option<EscalationReason>,
}

impl SessionEscalationState {
  pub fn new(tier: Tier) -> Self {
    Self {
      tier,
      frustration_count: 0,
      recent_concepts: Vec::new(),
      repeat_count: 0,
      escalated: false,
      escalation_reason: None,
    }
  }
}

/// Outcome of evaluating one inbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Escalation {
  pub resolved_tier: Tier,
  pub escalated: bool,
  pub reason: Option<EscalationReason>,
}

/// Snapshot over every tracked session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationStats {
  pub total_sessions: usize,
  pub escalated_sessions: usize,
  pub reason_counts: BTreeMap<String, usize>,
}
