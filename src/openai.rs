//! Minimal streaming LLM gateway for tutor replies.
//!
//! One `stream: true` chat.completions call per turn against either an Azure OpenAI
//! deployment or any OpenAI-compatible endpoint, chosen by the resolved `ModelConfig`.
//! The upstream SSE body is decoded line by line into content deltas; the text is
//! passed through untouched. Calls log model names, latencies, and token usage (not contents).
//!
//! NOTE: We never log the API key.

use std::pin::Pin;
use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::domain::{ModelConfig, ModelProvider};

const DEFAULT_AZURE_API_VERSION: &str = "2024-02-15-preview";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
  #[error("no API key configured for model {0}")]
  NotConfigured(String),
  #[error("transport error: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("LLM HTTP {status}: {message}")]
  Http { status: reqwest::StatusCode, message: String },
}

/// Content deltas in arrival order. Ends after `[DONE]` or when the upstream closes.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send>>;

/// One prior conversation turn forwarded to the model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
  pub role: TurnRole,
  pub content: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
  User,
  Assistant,
}

#[derive(Clone)]
pub struct LlmGateway {
  client: reqwest::Client,
}

impl LlmGateway {
  pub fn new(timeout: Duration) -> Result<Self, GatewayError> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Self { client })
  }

  /// Send the system prompt, prior turns and the new user message; stream back the reply.
  ///
  /// Errors before the first byte (missing key, transport, non-2xx) are returned
  /// directly. Failures while reading the body surface as an `Err` item.
  #[instrument(level = "info", skip_all, fields(model = %cfg.model_name, provider = %cfg.provider, turns = history.len()))]
  pub async fn chat_stream(
    &self,
    cfg: &ModelConfig,
    system: &str,
    history: &[ChatTurn],
    user: &str,
  ) -> Result<TokenStream, GatewayError> {
    if cfg.api_key.is_empty() {
      return Err(GatewayError::NotConfigured(cfg.model_name.clone()));
    }

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessageReq { role: "system", content: system });
    for t in history {
      let role = match t.role { TurnRole::User => "user", TurnRole::Assistant => "assistant" };
      messages.push(ChatMessageReq { role, content: &t.content });
    }
    messages.push(ChatMessageReq { role: "user", content: user });

    let req = ChatCompletionRequest {
      model: &cfg.model_name,
      messages,
      stream: true,
      stream_options: StreamOptions { include_usage: true },
    };
    let url = format!("{}/chat/completions", normalize_base_url(cfg));

    let mut builder = self.client.post(&url)
      .header(USER_AGENT, "codetutor-backend/0.1")
      .header(CONTENT_TYPE, "application/json");
    builder = match cfg.provider {
      ModelProvider::AzureOpenai => builder
        .query(&[("api-version", cfg.api_version.as_deref().unwrap_or(DEFAULT_AZURE_API_VERSION))])
        .header("api-key", &cfg.api_key),
      ModelProvider::OpenaiCompatible => builder
        .header(AUTHORIZATION, format!("Bearer {}", cfg.api_key)),
    };

    let start = Instant::now();
    let res = builder.json(&req).send().await?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let message = extract_provider_error(&body).unwrap_or(body);
      return Err(GatewayError::Http { status, message });
    }
    info!(target: "llm", first_byte = ?start.elapsed(), "LLM stream opened");

    let model = cfg.model_name.clone();
    let mut body = res.bytes_stream();
    Ok(Box::pin(async_stream::stream! {
      let mut lines = SseLineBuffer::default();
      let mut usage: Option<Usage> = None;
      let mut deltas = 0usize;

      'read: while let Some(chunk) = body.next().await {
        let chunk = match chunk {
          Ok(bytes) => bytes,
          Err(e) => {
            yield Err(GatewayError::Transport(e));
            return;
          }
        };
        for data in lines.push(&chunk) {
          match decode_chunk(&data) {
            StreamPiece::Done => break 'read,
            StreamPiece::Delta(text) => {
              deltas += 1;
              yield Ok(text);
            }
            StreamPiece::Usage(u) => usage = Some(u),
            StreamPiece::Skip => {}
          }
        }
      }

      let elapsed = start.elapsed();
      match usage {
        Some(u) => info!(target: "llm", %model, ?elapsed, deltas, prompt_tokens = ?u.prompt_tokens, completion_tokens = ?u.completion_tokens, total_tokens = ?u.total_tokens, "LLM usage"),
        None => info!(target: "llm", %model, ?elapsed, deltas, "LLM stream finished"),
      }
    }))
  }
}

/// Base URL without a trailing `/chat/completions`; `/chat/completions` is appended by the caller.
///
/// Azure endpoints given as the bare resource URL (optionally ending in `/openai`)
/// are expanded to `<resource>/openai/deployments/<model>`.
pub fn normalize_base_url(cfg: &ModelConfig) -> String {
  let mut base = cfg.endpoint.trim().trim_end_matches('/').to_string();
  for suffix in ["/chat/completions", "/responses"] {
    if let Some(stripped) = base.strip_suffix(suffix) {
      base = stripped.to_string();
    }
  }

  if cfg.provider == ModelProvider::AzureOpenai && !base.contains("/openai/deployments/") {
    let resource = base.strip_suffix("/openai").unwrap_or(&base).trim_end_matches('/');
    return format!("{}/openai/deployments/{}", resource, cfg.model_name);
  }
  base
}

/// Splits an SSE byte stream into `data:` payloads.
///
/// Bytes are kept until a full line arrives, so multi-byte characters split
/// across network chunks decode correctly.
#[derive(Default)]
struct SseLineBuffer {
  pending: Vec<u8>,
}

impl SseLineBuffer {
  fn push(&mut self, bytes: &[u8]) -> Vec<String> {
    self.pending.extend_from_slice(bytes);
    let mut out = Vec::new();
    while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
      let line: Vec<u8> = self.pending.drain(..=pos).collect();
      let line = String::from_utf8_lossy(&line);
      let line = line.trim_end_matches(['\r', '\n']);
      if let Some(data) = line.strip_prefix("data:") {
        out.push(data.trim_start().to_string());
      }
    }
    out
  }
}

#[derive(Debug, PartialEq)]
enum StreamPiece {
  Delta(String),
  Usage(Usage),
  Done,
  Skip,
}

fn decode_chunk(data: &str) -> StreamPiece {
  if data.trim() == "[DONE]" {
    return StreamPiece::Done;
  }
  let parsed: StreamChunk = match serde_json::from_str(data) {
    Ok(p) => p,
    Err(e) => {
      debug!(target: "llm", error = %e, "Skipping undecodable stream chunk");
      return StreamPiece::Skip;
    }
  };
  let text: String = parsed.choices.into_iter().filter_map(|c| c.delta.content).collect();
  if !text.is_empty() {
    return StreamPiece::Delta(text);
  }
  match parsed.usage {
    Some(u) => StreamPiece::Usage(u),
    None => StreamPiece::Skip,
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
  model: &'a str,
  messages: Vec<ChatMessageReq<'a>>,
  stream: bool,
  stream_options: StreamOptions,
}
#[derive(Serialize)]
struct ChatMessageReq<'a> { role: &'static str, content: &'a str }
#[derive(Serialize)]
struct StreamOptions { include_usage: bool }

#[derive(Deserialize)]
struct StreamChunk {
  #[serde(default)] choices: Vec<StreamChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct StreamChoice { #[serde(default)] delta: StreamDelta }
#[derive(Deserialize, Default)]
struct StreamDelta { #[serde(default)] content: Option<String> }
#[derive(Deserialize, Debug, PartialEq)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from an OpenAI-style error body.
fn extract_provider_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn cfg(provider: ModelProvider, endpoint: &str) -> ModelConfig {
    ModelConfig {
      provider,
      endpoint: endpoint.into(),
      api_key: "k".into(),
      model_name: "gpt-5-mini".into(),
      api_version: None,
    }
  }

  #[test]
  fn azure_resource_url_expands_to_deployment() {
    let c = cfg(ModelProvider::AzureOpenai, "https://res.openai.azure.com/");
    assert_eq!(normalize_base_url(&c), "https://res.openai.azure.com/openai/deployments/gpt-5-mini");

    let c = cfg(ModelProvider::AzureOpenai, "https://res.openai.azure.com/openai");
    assert_eq!(normalize_base_url(&c), "https://res.openai.azure.com/openai/deployments/gpt-5-mini");
  }

  #[test]
  fn full_deployment_url_loses_only_the_completions_suffix() {
    let c = cfg(ModelProvider::AzureOpenai, "https://res.openai.azure.com/openai/deployments/custom/chat/completions");
    assert_eq!(normalize_base_url(&c), "https://res.openai.azure.com/openai/deployments/custom");
  }

  #[test]
  fn compatible_endpoint_is_left_alone_apart_from_suffixes() {
    let c = cfg(ModelProvider::OpenaiCompatible, "https://llm.local/v1/responses");
    assert_eq!(normalize_base_url(&c), "https://llm.local/v1");
  }

  #[test]
  fn provider_error_message_is_extracted() {
    let body = r#"{"error":{"message":"quota exceeded","type":"x"}}"#;
    assert_eq!(extract_provider_error(body).as_deref(), Some("quota exceeded"));
    assert_eq!(extract_provider_error("<html>"), None);
  }

  #[test]
  fn line_buffer_keeps_split_characters_intact() {
    let line = "data: {\"choices\":[{\"delta\":{\"content\":\"안녕\"}}]}\n\n";
    let bytes = line.as_bytes();
    // Cut inside the first Hangul syllable.
    let cut = line.find('안').expect("has hangul") + 1;

    let mut buf = SseLineBuffer::default();
    assert!(buf.push(&bytes[..cut]).is_empty());
    let out = buf.push(&bytes[cut..]);
    assert_eq!(out, vec![r#"{"choices":[{"delta":{"content":"안녕"}}]}"#.to_string()]);
  }

  #[test]
  fn line_buffer_ignores_comments_and_blank_lines() {
    let mut buf = SseLineBuffer::default();
    let out = buf.push(b": keep-alive\r\n\r\ndata:[DONE]\r\n");
    assert_eq!(out, vec!["[DONE]".to_string()]);
  }

  #[test]
  fn chunks_decode_to_deltas_usage_and_done() {
    assert_eq!(
      decode_chunk(r#"{"choices":[{"delta":{"content":"for문은"}}]}"#),
      StreamPiece::Delta("for문은".into())
    );
    assert_eq!(decode_chunk(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#), StreamPiece::Skip);
    assert_eq!(
      decode_chunk(r#"{"choices":[],"usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#),
      StreamPiece::Usage(Usage { prompt_tokens: Some(3), completion_tokens: Some(2), total_tokens: Some(5) })
    );
    assert_eq!(decode_chunk(" [DONE]"), StreamPiece::Done);
    assert_eq!(decode_chunk("not json"), StreamPiece::Skip);
  }

  #[tokio::test]
  async fn missing_key_is_rejected_before_any_request() {
    let gw = LlmGateway::new(Duration::from_secs(1)).expect("client builds");
    let mut c = cfg(ModelProvider::AzureOpenai, "http://127.0.0.1:9");
    c.api_key.clear();
    let err = gw.chat_stream(&c, "sys", &[], "hi").await.err().expect("must fail");
    assert!(matches!(err, GatewayError::NotConfigured(ref m) if m == "gpt-5-mini"));
  }
}
