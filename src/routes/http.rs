//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs parameters and basic result info.

use std::{convert::Infallible, sync::Arc};
use axum::{
  extract::{Path, State},
  http::StatusCode,
  response::{sse::{KeepAlive, Sse}, IntoResponse, Response},
  Json,
};
use futures::StreamExt;
use tracing::{info, instrument};

use crate::logic::{chat_events, start_chat, ChatError};
use crate::protocol::*;
use crate::state::AppState;

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state, body), fields(has_session = body.session_id.is_some(), level = ?body.level))]
pub async fn http_post_chat(
  State(state): State<Arc<AppState>>,
  Json(body): Json<ChatIn>,
) -> Response {
  match start_chat(&state, body).await {
    Ok(start) => {
      let events = chat_events(start).map(|ev| Ok::<_, Infallible>(ev.into_sse()));
      Sse::new(events).keep_alive(KeepAlive::default()).into_response()
    }
    Err(e) => {
      let status = match &e {
        ChatError::EmptyMessage => StatusCode::BAD_REQUEST,
        ChatError::NotConfigured { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ChatError::Gateway { .. } => StatusCode::BAD_GATEWAY,
      };
      let body = ErrorOut { message: e.to_string(), session_id: e.session_id().map(str::to_string) };
      (status, Json(body)).into_response()
    }
  }
}

#[instrument(level = "info", skip(state), fields(%session_id))]
pub async fn http_get_session_escalation(
  State(state): State<Arc<AppState>>,
  Path(session_id): Path<String>,
) -> Response {
  match state.tracker.session_stats(&session_id) {
    Some(st) => Json(st).into_response(),
    None => (
      StatusCode::NOT_FOUND,
      Json(ErrorOut { message: format!("no escalation state for session {}", session_id), session_id: None }),
    ).into_response(),
  }
}

#[instrument(level = "info", skip(state), fields(%session_id))]
pub async fn http_delete_session_escalation(
  State(state): State<Arc<AppState>>,
  Path(session_id): Path<String>,
) -> impl IntoResponse {
  let cleared = state.tracker.clear(&session_id);
  info!(target: "escalation", %session_id, %cleared, "HTTP session escalation cleared");
  Json(ClearedOut { cleared })
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_escalation_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  let stats = state.tracker.aggregate_stats();
  info!(target: "escalation", total = stats.total_sessions, escalated = stats.escalated_sessions, "HTTP escalation stats served");
  Json(stats)
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(state.models.masked())
}
