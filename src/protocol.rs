//! Public protocol structs for HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use axum::response::sse::Event;
use serde::{Deserialize, Serialize};

use crate::domain::{EscalationReason, ModelProvider};
use crate::openai::ChatTurn;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatIn {
  #[serde(default)]
  pub session_id: Option<String>,
  pub message: String,
  /// Learner tier wire name. Missing or unknown values fall back to `beginner`.
  #[serde(default)]
  pub level: Option<String>,
  #[serde(default)]
  pub history: Vec<ChatTurn>,
  /// Lesson material the learner is working through; goes before the code context.
  #[serde(default)]
  pub curriculum_context: Option<String>,
  #[serde(default)]
  pub code_context: Option<String>,
}

/// One Server-Sent Event of a chat turn, in emission order:
/// `Session` (only for newly created sessions), `ModelInfo`, `Content`*, then `Done`.
/// A failure mid-stream ends with `Error` instead of `Done`.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ChatEvent {
  Session {
    #[serde(rename = "sessionId")]
    session_id: String,
  },
  ModelInfo {
    #[serde(rename = "modelInfo")]
    model_info: ModelInfoOut,
  },
  Content {
    content: String,
  },
  Error {
    error: String,
  },
  /// Sent as the literal `[DONE]` marker, never as JSON.
  #[serde(skip)]
  Done,
}

impl ChatEvent {
  pub fn into_sse(self) -> Event {
    if self == ChatEvent::Done {
      return Event::default().data("[DONE]");
    }
    Event::default().json_data(&self).unwrap_or_else(|e| {
      let fallback = serde_json::json!({ "error": format!("Serialization error: {}", e) });
      Event::default().data(fallback.to_string())
    })
  }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfoOut {
  pub name: String,
  pub provider: ModelProvider,
  pub upgraded: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub upgrade_reason: Option<EscalationReason>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorOut {
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub session_id: Option<String>,
}

#[derive(Serialize)]
pub struct ClearedOut {
  pub cleared: bool,
}

#[derive(Serialize)]
pub struct HealthOut {
  pub ok: bool,
}
