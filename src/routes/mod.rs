//! Router assembly: HTTP endpoints, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;

/// Build the application router with:
/// - chat under `/api/v1/chat`
/// - per-session escalation introspection/clear under `/api/v1/sessions/:id/escalation`
/// - admin reporting under `/api/v1/admin/...`
/// - CORS (allow any origin/method/headers); adjust for production if needed
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/chat", post(http::http_post_chat))
        .route(
            "/api/v1/sessions/:id/escalation",
            get(http::http_get_session_escalation).delete(http::http_delete_session_escalation),
        )
        .route("/api/v1/admin/escalation/stats", get(http::http_get_escalation_stats))
        .route("/api/v1/admin/models", get(http::http_get_models))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::{ModelOverride, TutorConfig};
    use crate::domain::{ModelProvider, Tier};
    use crate::models::EnvFallback;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::from_config(TutorConfig::default(), EnvFallback::default()).expect("state builds"))
    }

    async fn call(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.oneshot(req).await.expect("router is infallible");
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.expect("body reads");
        let v = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).expect("json body") };
        (status, v)
    }

    /// Read an event-stream response and return its `data:` payloads in order.
    async fn call_sse(app: Router, req: Request<Body>) -> (StatusCode, String, Vec<String>) {
        let res = app.oneshot(req).await.expect("router is infallible");
        let status = res.status();
        let content_type = res
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.expect("body reads");
        let text = String::from_utf8(bytes.to_vec()).expect("utf-8 body");
        let data = text
            .lines()
            .filter_map(|l| l.strip_prefix("data:"))
            .map(|d| d.trim_start().to_string())
            .collect();
        (status, content_type, data)
    }

    /// Serve a canned chat.completions event stream on a loopback port.
    async fn spawn_fake_upstream() -> std::net::SocketAddr {
        let body = [
            r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"{"choices":[{"delta":{"content":"안녕"}}]}"#,
            r#"{"choices":[{"delta":{"content":"하세요"}}]}"#,
            r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":3,"total_tokens":15}}"#,
            "[DONE]",
        ]
        .iter()
        .map(|d| format!("data: {}\n\n", d))
        .collect::<String>();

        let upstream = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let body = body.clone();
                async move { ([("content-type", "text/event-stream")], body) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("binds loopback");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, upstream).await;
        });
        addr
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).expect("request builds")
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request builds")
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (status, v) = call(build_router(test_state()), get("/api/v1/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn unknown_session_is_404_not_zeroed() {
        let (status, v) = call(build_router(test_state()), get("/api/v1/sessions/nope/escalation")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(v["message"].as_str().unwrap_or_default().contains("nope"));
    }

    #[tokio::test]
    async fn session_stats_clear_and_aggregate() {
        let state = test_state();
        state.tracker.evaluate("s1", Tier::Beginner, "이해가 안 돼요");
        state.tracker.evaluate("s1", Tier::Beginner, "모르겠어요");
        state.tracker.evaluate("s2", Tier::BeginnerPlus, "for문");

        let (status, v) = call(build_router(state.clone()), get("/api/v1/sessions/s1/escalation")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v["escalated"], true);
        assert_eq!(v["escalationReason"], "learning difficulty detected");
        assert_eq!(v["frustrationCount"], 2);

        let (_, stats) = call(build_router(state.clone()), get("/api/v1/admin/escalation/stats")).await;
        assert_eq!(stats["totalSessions"], 2);
        assert_eq!(stats["escalatedSessions"], 1);
        assert_eq!(stats["reasonCounts"]["learning difficulty detected"], 1);

        let del = Request::delete("/api/v1/sessions/s1/escalation").body(Body::empty()).expect("request builds");
        let (status, v) = call(build_router(state.clone()), del).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v, json!({ "cleared": true }));
        assert!(state.tracker.session_stats("s1").is_none());
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let (status, _) = call(build_router(test_state()), post_json("/api/v1/chat", json!({ "message": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_without_key_reports_unconfigured_but_still_tracks() {
        let state = test_state();
        let body = json!({ "sessionId": "abc", "message": "모르겠어요", "level": "beginner_plus" });
        let (status, v) = call(build_router(state.clone()), post_json("/api/v1/chat", body)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(v["sessionId"], "abc");

        let st = state.tracker.session_stats("abc").expect("turn was evaluated");
        assert_eq!(st.tier, Tier::BeginnerPlus);
        assert_eq!(st.frustration_count, 1);
    }

    #[tokio::test]
    async fn chat_streams_model_info_then_content_then_done() {
        let addr = spawn_fake_upstream().await;
        let mut cfg = TutorConfig::default();
        cfg.models.insert(
            Tier::BeginnerPlus,
            ModelOverride {
                provider: Some(ModelProvider::OpenaiCompatible),
                model_name: Some("tutor-small".into()),
                endpoint: Some(format!("http://{}/v1", addr)),
                api_key: Some("test".into()),
                ..ModelOverride::default()
            },
        );
        let state = Arc::new(AppState::from_config(cfg, EnvFallback::default()).expect("state builds"));

        let body = json!({ "sessionId": "s-stream", "message": "for문이 뭐예요?", "level": "beginner_plus" });
        let (status, content_type, data) = call_sse(build_router(state.clone()), post_json("/api/v1/chat", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.starts_with("text/event-stream"));
        assert_eq!(data.len(), 4, "events: {:?}", data);

        let info: Value = serde_json::from_str(&data[0]).expect("model info json");
        assert_eq!(
            info,
            json!({ "modelInfo": { "name": "tutor-small", "provider": "openai-compatible", "upgraded": false } })
        );
        assert_eq!(serde_json::from_str::<Value>(&data[1]).expect("json"), json!({ "content": "안녕" }));
        assert_eq!(serde_json::from_str::<Value>(&data[2]).expect("json"), json!({ "content": "하세요" }));
        assert_eq!(data[3], "[DONE]");
        assert!(state.tracker.session_stats("s-stream").is_some());
    }

    #[tokio::test]
    async fn chat_without_session_id_announces_the_new_one_first() {
        let addr = spawn_fake_upstream().await;
        let mut cfg = TutorConfig::default();
        cfg.models.insert(
            Tier::Beginner,
            ModelOverride {
                provider: Some(ModelProvider::OpenaiCompatible),
                endpoint: Some(format!("http://{}/v1/chat/completions", addr)),
                api_key: Some("test".into()),
                ..ModelOverride::default()
            },
        );
        let state = Arc::new(AppState::from_config(cfg, EnvFallback::default()).expect("state builds"));

        let (status, _, data) =
            call_sse(build_router(state.clone()), post_json("/api/v1/chat", json!({ "message": "print가 뭐예요?" }))).await;
        assert_eq!(status, StatusCode::OK);
        let first: Value = serde_json::from_str(&data[0]).expect("session json");
        let sid = first["sessionId"].as_str().expect("session id").to_string();
        assert!(state.tracker.session_stats(&sid).is_some());
        assert!(data[1].contains("modelInfo"));
        assert_eq!(data.last().map(String::as_str), Some("[DONE]"));
    }

    #[tokio::test]
    async fn models_listing_masks_keys() {
        let state = Arc::new(
            AppState::from_config(
                TutorConfig::default(),
                EnvFallback { api_key: "abcdefghijkl1234".into(), ..EnvFallback::default() },
            )
            .expect("state builds"),
        );
        let (status, v) = call(build_router(state), get("/api/v1/admin/models")).await;
        assert_eq!(status, StatusCode::OK);
        let list = v.as_array().expect("array");
        assert_eq!(list.len(), 3);
        assert_eq!(list[0]["level"], "beginner_zero");
        assert_eq!(list[0]["modelName"], "gpt-5-mini");
        assert_eq!(list[0]["apiKeyMasked"], "••••••••ijkl1234");
        assert!(!v.to_string().contains("abcdefghijkl1234"));
    }
}
