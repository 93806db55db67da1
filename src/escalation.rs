//! Session escalation tracker.
//!
//! Watches each chat session for two signals and, once either fires twice,
//! pins the session to the strongest model tier for the rest of its life:
//!   - frustration: the learner says they are lost ("모르겠", "이해가 안", ...)
//!   - repetition: the learner asks again about a concept seen in the last few messages
//!
//! State lives in an owned store (one per `EscalationTracker`) guarded by a
//! single mutex. `evaluate` does its whole read-modify-write under that lock,
//! so concurrent calls for one session are serialized, but the tracker cannot
//! restore send order: callers must feed a session's messages in sequence.
//!
//! Sessions idle for longer than the configured TTL are dropped by
//! `evict_idle`, which the background sweeper calls periodically.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument};

use crate::domain::{Escalation, EscalationReason, EscalationStats, SessionEscalationState, Tier};

/// Occurrences of one signal needed before escalating.
pub const SIGNAL_THRESHOLD: u32 = 2;

/// How many recent concept tags are remembered for repetition detection.
pub const CONCEPT_WINDOW: usize = 5;

const FRUSTRATION_PHRASES: &[&str] = &[
  "이해가 안", "이해안", "모르겠", "어려워", "헷갈려", "헷갈리",
  "다시 설명", "무슨 말", "뭔 말", "못 알아", "못알아", "왜 안 돼",
  "왜 안돼", "안 되는", "안되는", "에러가", "오류가", "잘 모르",
  "잘모르", "처음부터", "쉽게 설명", "쉽게설명",
];

// Order matters: tags are extracted in this order.
const CONCEPT_VOCABULARY: &[&str] = &[
  "변수", "함수", "조건문", "if", "for", "while", "반복문", "배열", "array",
  "객체", "object", "클래스", "class", "메서드", "method", "파라미터", "parameter",
  "리턴", "return", "타입", "type", "문자열", "string", "숫자", "number",
  "불리언", "boolean", "루프", "loop", "인덱스", "index", "콜백", "callback",
  "프로미스", "promise", "async", "await", "이벤트", "event",
];

/// Source of "now" for idle tracking. Injected so eviction is testable.
pub trait Clock: Send + Sync {
  fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> Instant { Instant::now() }
}

/// Expects already-lowercased text.
fn has_frustration(lower: &str) -> bool {
  FRUSTRATION_PHRASES.iter().any(|p| lower.contains(p))
}

/// Concept tags in `lower`, in vocabulary order, each at most once.
fn concepts_in(lower: &str) -> Vec<&'static str> {
  CONCEPT_VOCABULARY
    .iter()
    .copied()
    .filter(|tag| lower.contains(tag))
    .collect()
}

struct TrackedSession {
  state: SessionEscalationState,
  last_seen: Instant,
}

pub struct EscalationTracker {
  sessions: Mutex<HashMap<String, TrackedSession>>,
  clock: Arc<dyn Clock>,
  idle_ttl: Duration,
}

impl EscalationTracker {
  pub fn new(idle_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
    Self { sessions: Mutex::new(HashMap::new()), clock, idle_ttl }
  }

  pub fn with_system_clock(idle_ttl: Duration) -> Self {
    Self::new(idle_ttl, Arc::new(SystemClock))
  }

  /// Decide which tier serves the next response for `session_id`.
  #[instrument(level = "debug", skip(self, message), fields(%session_id, %nominal, message_len = message.len()))]
  pub fn evaluate(&self, session_id: &str, nominal: Tier, message: &str) -> Escalation {
    let now = self.clock.now();
    let mut sessions = self.sessions.lock();
    let tracked = sessions
      .entry(session_id.to_string())
      .or_insert_with(|| TrackedSession { state: SessionEscalationState::new(nominal), last_seen: now });
    tracked.last_seen = now;
    let st = &mut tracked.state;

    if nominal.is_strongest() {
      return Escalation { resolved_tier: nominal, escalated: false, reason: None };
    }

    if st.escalated {
      return Escalation { resolved_tier: Tier::STRONGEST, escalated: true, reason: st.escalation_reason };
    }

    let lower = message.to_lowercase();
    let mut marked: Option<EscalationReason> = None;

    if has_frustration(&lower) {
      st.frustration_count += 1;
      if st.frustration_count >= SIGNAL_THRESHOLD {
        marked = Some(EscalationReason::LearningDifficulty);
      }
    }

    let concepts = concepts_in(&lower);
    if concepts.iter().any(|c| st.recent_concepts.contains(c)) {
      st.repeat_count += 1;
      // Frustration keeps priority when both cross on the same message.
      if st.repeat_count >= SIGNAL_THRESHOLD && marked.is_none() {
        marked = Some(EscalationReason::RepeatedConcept);
      }
    }

    let mut window = concepts;
    window.extend(st.recent_concepts.iter().copied());
    window.truncate(CONCEPT_WINDOW);
    st.recent_concepts = window;

    match marked {
      Some(reason) => {
        st.escalated = true;
        st.escalation_reason = Some(reason);
        info!(
          target: "escalation",
          %session_id, %nominal, %reason,
          frustration_count = st.frustration_count,
          repeat_count = st.repeat_count,
          "Session escalated to strongest tier"
        );
        Escalation { resolved_tier: Tier::STRONGEST, escalated: true, reason: Some(reason) }
      }
      None => {
        debug!(
          target: "escalation",
          %session_id,
          frustration_count = st.frustration_count,
          repeat_count = st.repeat_count,
          window = ?st.recent_concepts,
          "Signals updated"
        );
        Escalation { resolved_tier: nominal, escalated: false, reason: None }
      }
    }
  }

  /// Copy of the tracked state, or None if the session was never evaluated (or was cleared/evicted).
  pub fn session_stats(&self, session_id: &str) -> Option<SessionEscalationState> {
    self.sessions.lock().get(session_id).map(|t| t.state.clone())
  }

  pub fn aggregate_stats(&self) -> EscalationStats {
    let sessions = self.sessions.lock();
    let mut stats = EscalationStats::default();
    for tracked in sessions.values() {
      stats.total_sessions += 1;
      if tracked.state.escalated {
        stats.escalated_sessions += 1;
        if let Some(reason) = tracked.state.escalation_reason {
          *stats.reason_counts.entry(reason.as_str().to_string()).or_insert(0) += 1;
        }
      }
    }
    stats
  }

  /// Forget a session. Unknown ids are fine.
  pub fn clear(&self, session_id: &str) -> bool {
    let removed = self.sessions.lock().remove(session_id).is_some();
    if removed {
      debug!(target: "escalation", %session_id, "Session state cleared");
    }
    removed
  }

  /// Drop sessions whose last message is older than the idle TTL. Returns how many were dropped.
  pub fn evict_idle(&self) -> usize {
    let now = self.clock.now();
    let ttl = self.idle_ttl;
    let mut sessions = self.sessions.lock();
    let before = sessions.len();
    sessions.retain(|_, t| now.saturating_duration_since(t.last_seen) < ttl);
    let evicted = before - sessions.len();
    if evicted > 0 {
      info!(target: "escalation", evicted, remaining = sessions.len(), ttl_secs = ttl.as_secs(), "Evicted idle sessions");
    }
    evicted
  }

  /// Discard every tracked session.
  pub fn shutdown(&self) {
    let mut sessions = self.sessions.lock();
    let dropped = sessions.len();
    sessions.clear();
    info!(target: "escalation", dropped, "Escalation tracker shut down");
  }

  pub fn len(&self) -> usize { self.sessions.lock().len() }
}

/// Periodically evict idle sessions until the returned handle is aborted.
pub fn spawn_eviction_sweeper(tracker: Arc<EscalationTracker>, every: Duration) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately.
    ticker.tick().await;
    loop {
      ticker.tick().await;
      tracker.evict_idle();
    }
  })
}
