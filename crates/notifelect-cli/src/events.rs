use serde::Serialize;
use std::io::Write;

use notifelect::{ElectionEvent, LeadershipStatus, MessageKind};

/// Emit a JSONL event to stdout (flushed immediately for piped output).
pub fn emit<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{json}");
        let _ = lock.flush();
    }
}

/// RFC 3339 timestamp for JSONL events.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ── Session events ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventStarted {
    pub event: &'static str,
    pub namespace: String,
    pub nodes: usize,
    pub allocator: &'static str,
    pub timestamp: String,
}

impl EventStarted {
    pub fn new(namespace: &str, nodes: usize, allocator: &'static str) -> Self {
        Self {
            event: "started",
            namespace: namespace.to_string(),
            nodes,
            allocator,
            timestamp: now_iso(),
        }
    }
}

// ── Node lifecycle ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventNodeJoined {
    pub event: &'static str,
    pub node: i64,
    pub start_delay_ms: u64,
    pub elapsed_s: f64,
}

#[derive(Serialize)]
pub struct EventNodeStopped {
    pub event: &'static str,
    pub node: i64,
    /// "resign" (graceful) or "crash" (silent).
    pub mode: &'static str,
    pub elapsed_s: f64,
    pub timestamp: String,
}

// ── Election notifications ──────────────────────────────────────

#[derive(Serialize)]
pub struct EventElection {
    pub event: &'static str,
    pub node: i64,
    pub detail: ElectionEvent,
    pub elapsed_s: f64,
}

// ── Wire tap ────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventMessage {
    pub event: &'static str,
    pub kind: MessageKind,
    pub sender: i64,
    pub term: u64,
    pub resignation: bool,
    pub elapsed_s: f64,
}

#[derive(Serialize)]
pub struct EventUndecodable {
    pub event: &'static str,
    pub bytes: usize,
    pub error: String,
    pub elapsed_s: f64,
}

// ── Summary ─────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventSummary {
    pub event: &'static str,
    pub nodes: Vec<LeadershipStatus>,
    pub leaders: Vec<i64>,
    pub expected_leader: Option<i64>,
    pub converged: bool,
    pub elapsed_s: f64,
    pub timestamp: String,
}
