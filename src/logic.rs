//! Core behaviors behind the HTTP handlers.
//!
//! This includes:
//!   - Resolving the learner tier at the boundary (unknown values fall back to `beginner`)
//!   - Running the escalation tracker for each chat turn
//!   - Building the tier-appropriate system prompt
//!   - Opening the LLM stream with the resolved model and framing it as chat events

use futures::{Stream, StreamExt};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::Prompts;
use crate::domain::Tier;
use crate::openai::{GatewayError, TokenStream};
use crate::protocol::{ChatEvent, ChatIn, ModelInfoOut};
use crate::state::AppState;
use crate::util::{fill_template, preview_for_log};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
  #[error("message must not be empty")]
  EmptyMessage,
  #[error("the {level} model is not configured; ask an administrator")]
  NotConfigured { session_id: String, level: Tier },
  #[error("failed to generate a reply: {source}")]
  Gateway { session_id: String, #[source] source: GatewayError },
}

impl ChatError {
  pub fn session_id(&self) -> Option<&str> {
    match self {
      ChatError::EmptyMessage => None,
      ChatError::NotConfigured { session_id, .. } | ChatError::Gateway { session_id, .. } => Some(session_id),
    }
  }
}

/// A chat turn whose upstream stream is open and ready to be relayed.
pub struct ChatStart {
  pub session_id: String,
  /// True when the caller sent no session id and one was allocated here.
  pub new_session: bool,
  pub model_info: ModelInfoOut,
  pub tokens: TokenStream,
}

/// Map a wire level to a tier. Missing or unrecognized values use the default tier.
pub fn parse_level(level: Option<&str>) -> Tier {
  match level {
    None => Tier::default(),
    Some(raw) => raw.parse().unwrap_or_else(|e| {
      warn!(target: "codetutor_backend", error = %e, fallback = %Tier::default(), "Unrecognized learner level");
      Tier::default()
    }),
  }
}

/// System prompt for the tier that will actually answer, then curriculum material,
/// then the learner's code. Blank extras are left out.
pub fn build_system_prompt(
  prompts: &Prompts,
  tier: Tier,
  curriculum_context: Option<&str>,
  code_context: Option<&str>,
) -> String {
  let mut system = prompts.for_tier(tier).to_string();
  if let Some(curriculum) = curriculum_context.map(str::trim).filter(|c| !c.is_empty()) {
    system.push_str("\n\n");
    system.push_str(curriculum);
  }
  if let Some(code) = code_context.map(str::trim).filter(|c| !c.is_empty()) {
    system.push_str("\n\n");
    system.push_str(&fill_template(&prompts.code_context_template, &[("code", code)]));
  }
  system
}

/// Validate, route through the escalation tracker, and open the model stream.
#[instrument(level = "info", skip(state, body), fields(message_len = body.message.len(), turns = body.history.len()))]
pub async fn start_chat(state: &AppState, body: ChatIn) -> Result<ChatStart, ChatError> {
  if body.message.trim().is_empty() {
    return Err(ChatError::EmptyMessage);
  }

  let (session_id, new_session) = match body.session_id.filter(|s| !s.trim().is_empty()) {
    Some(id) => (id, false),
    None => (Uuid::new_v4().to_string(), true),
  };
  let level = parse_level(body.level.as_deref());

  let escalation = state.tracker.evaluate(&session_id, level, &body.message);
  let model = state.models.resolve(escalation.resolved_tier);
  debug!(
    target: "codetutor_backend",
    %session_id, %level, resolved = %escalation.resolved_tier,
    preview = %preview_for_log(&body.message, 24),
    "Chat turn routed"
  );

  let system = build_system_prompt(
    &state.prompts,
    escalation.resolved_tier,
    body.curriculum_context.as_deref(),
    body.code_context.as_deref(),
  );
  let tokens = match state.gateway.chat_stream(&model, &system, &body.history, &body.message).await {
    Ok(t) => t,
    Err(GatewayError::NotConfigured(_)) => {
      warn!(target: "codetutor_backend", %session_id, %level, model = %model.model_name, "No API key for model");
      return Err(ChatError::NotConfigured { session_id, level: escalation.resolved_tier });
    }
    Err(e) => {
      error!(target: "codetutor_backend", %session_id, error = %e, "LLM call failed");
      return Err(ChatError::Gateway { session_id, source: e });
    }
  };

  Ok(ChatStart {
    session_id,
    new_session,
    model_info: ModelInfoOut {
      name: model.model_name,
      provider: model.provider,
      upgraded: escalation.escalated,
      upgrade_reason: escalation.reason,
    },
    tokens,
  })
}

/// Frame an open chat turn as events: session id (new sessions only), model info,
/// content deltas, then `Done`. An upstream failure ends the stream with `Error`.
pub fn chat_events(start: ChatStart) -> impl Stream<Item = ChatEvent> + Send {
  let ChatStart { session_id, new_session, model_info, mut tokens } = start;
  async_stream::stream! {
    if new_session {
      yield ChatEvent::Session { session_id: session_id.clone() };
    }
    let model = model_info.name.clone();
    yield ChatEvent::ModelInfo { model_info };

    let mut reply_len = 0usize;
    while let Some(piece) = tokens.next().await {
      match piece {
        Ok(content) => {
          reply_len += content.len();
          yield ChatEvent::Content { content };
        }
        Err(e) => {
          error!(target: "codetutor_backend", %session_id, error = %e, "LLM stream broke off");
          yield ChatEvent::Error { error: "failed while generating the reply".into() };
          return;
        }
      }
    }

    info!(target: "codetutor_backend", %session_id, %model, reply_len, "Tutor reply streamed");
    yield ChatEvent::Done;
  }
}
