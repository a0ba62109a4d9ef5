//! Directory-rooted request/response store shared with the approval channel.
//!
//! Layout under the bridge directory:
//!
//! ```text
//! pending/<id>.json     open requests (written by the bridge)
//! responses/<id>.json   answers (written by the approval channel)
//! state.json            current session snapshot (always fully overwritten)
//! events.jsonl          append-only audit log
//! ```
//!
//! Write domains are disjoint, so no cross-process locking is needed: the
//! bridge alone writes `pending/`, `state.json` and `events.jsonl`; the channel
//! alone writes `responses/` and the `action` field of the session snapshot.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::io::atomic::{append_json_line, write_json_atomic};
use crate::io::stop::StopFlag;

/// Longest prompt or message text stored in a pending request.
pub const MAX_TEXT_CHARS: usize = 2000;

/// Free-form request context (at least `session_id`).
pub type RequestContext = Map<String, Value>;

/// All canonical paths within a bridge directory.
#[derive(Debug, Clone)]
pub struct BridgePaths {
    pub root: PathBuf,
    pub pending_dir: PathBuf,
    pub responses_dir: PathBuf,
    pub state_path: PathBuf,
    pub events_path: PathBuf,
    pub config_path: PathBuf,
}

impl BridgePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            pending_dir: root.join("pending"),
            responses_dir: root.join("responses"),
            state_path: root.join("state.json"),
            events_path: root.join("events.jsonl"),
            config_path: root.join("config.toml"),
            root,
        }
    }

    pub fn pending_path(&self, id: &str) -> PathBuf {
        self.pending_dir.join(format!("{id}.json"))
    }

    pub fn response_path(&self, id: &str) -> PathBuf {
        self.responses_dir.join(format!("{id}.json"))
    }
}

/// What kind of attention a pending request needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PendingKind {
    Permission {
        prompt: String,
        choices: Vec<String>,
        choice_labels: Vec<String>,
    },
    UsageLimit {
        message: String,
        next_available: Option<String>,
    },
}

/// An open request awaiting external resolution (`pending/<id>.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub id: String,
    #[serde(flatten)]
    pub kind: PendingKind,
    #[serde(default)]
    pub context: RequestContext,
    #[serde(default)]
    pub created_at: String,
}

/// Answer to a pending request (`responses/<id>.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub choice: String,
    pub responded_at: String,
    /// Channel name, or `timeout` when the bridge answered itself.
    pub source: String,
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    WaitingApproval,
    Limited,
    Resuming,
    Exited,
    Error,
}

/// Externally requested follow-up for a limited session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionAction {
    Resume,
    Cancel,
}

/// Snapshot of one bridge session (`state.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub action: Option<SessionAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_available: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Fields written by other tools, carried through read-modify-write.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, status: SessionStatus) -> Self {
        Self {
            session_id: session_id.into(),
            status,
            action: None,
            command: None,
            args: None,
            started_at: None,
            pending_request_id: None,
            last_prompt: None,
            limit_message: None,
            next_available: None,
            exit_code: None,
            exit_reason: None,
            error: None,
            extra: Map::new(),
            updated_at: None,
        }
    }
}

/// Result of waiting for a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Responded(Response),
    TimedOut,
    /// The stop flag fired before a response or the deadline.
    Cancelled,
}

/// Current UTC time as RFC 3339 with millisecond precision.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Request context carrying only the session id.
pub fn session_context(session_id: &str) -> RequestContext {
    let mut context = Map::new();
    context.insert("session_id".to_string(), Value::String(session_id.to_string()));
    context
}

/// File-backed IPC store rooted at one bridge directory.
#[derive(Debug, Clone)]
pub struct BridgeIpc {
    paths: BridgePaths,
}

impl BridgeIpc {
    /// Open the store, creating the directory layout if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let paths = BridgePaths::new(root);
        for dir in [&paths.root, &paths.pending_dir, &paths.responses_dir] {
            fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
        }
        Ok(Self { paths })
    }

    pub fn paths(&self) -> &BridgePaths {
        &self.paths
    }

    /// Record a permission prompt and return its new request id.
    #[instrument(skip_all)]
    pub fn write_permission_request(
        &self,
        prompt: &str,
        choices: &[String],
        choice_labels: &[String],
        context: RequestContext,
    ) -> Result<String> {
        let request = PendingRequest {
            id: new_id(),
            kind: PendingKind::Permission {
                prompt: truncate(prompt),
                choices: choices.to_vec(),
                choice_labels: choice_labels.to_vec(),
            },
            context,
            created_at: timestamp(),
        };
        write_json_atomic(&self.paths.pending_path(&request.id), &request)
            .with_context(|| format!("write permission request {}", request.id))?;
        if let PendingKind::Permission { prompt, .. } = &request.kind {
            self.append_event(
                "permission_request",
                json!({ "id": request.id, "prompt": prompt }),
            );
        }
        debug!(id = %request.id, "permission request written");
        Ok(request.id)
    }

    /// Record a usage-limit notice and return its new request id.
    #[instrument(skip_all)]
    pub fn write_limit_event(
        &self,
        message: &str,
        next_available: Option<&str>,
        context: RequestContext,
    ) -> Result<String> {
        let message = truncate(message);
        let next_available = next_available.map(str::to_string);
        let request = PendingRequest {
            id: new_id(),
            kind: PendingKind::UsageLimit {
                message: message.clone(),
                next_available: next_available.clone(),
            },
            context,
            created_at: timestamp(),
        };
        write_json_atomic(&self.paths.pending_path(&request.id), &request)
            .with_context(|| format!("write usage limit event {}", request.id))?;
        self.append_event(
            "usage_limit",
            json!({ "id": request.id, "message": message, "next_available": next_available }),
        );
        debug!(id = %request.id, "usage limit event written");
        Ok(request.id)
    }

    /// Read a pending request, or `None` if absent or unreadable.
    pub fn read_pending(&self, id: &str) -> Option<PendingRequest> {
        if !is_valid_id(id) {
            return None;
        }
        read_json(&self.paths.pending_path(id))
    }

    /// Read the response for `id`.
    ///
    /// Absent, partial, or corrupt files all read as `None` ("not yet available").
    pub fn read_response(&self, id: &str) -> Option<Response> {
        if !is_valid_id(id) {
            return None;
        }
        read_json(&self.paths.response_path(id))
    }

    /// Write the response for `id` and retire its pending entry.
    ///
    /// Removing the pending file is best effort; a failed delete is logged and
    /// does not fail the response.
    #[instrument(skip(self, chat_id))]
    pub fn write_response(
        &self,
        id: &str,
        choice: &str,
        source: &str,
        chat_id: Option<&str>,
    ) -> Result<Response> {
        if !is_valid_id(id) {
            bail!("invalid request id '{id}'");
        }
        let response = Response {
            id: id.to_string(),
            choice: choice.to_string(),
            responded_at: timestamp(),
            source: source.to_string(),
            chat_id: chat_id.map(str::to_string),
        };
        write_json_atomic(&self.paths.response_path(id), &response)
            .with_context(|| format!("write response {id}"))?;
        self.append_event("response", json!({ "id": id, "choice": choice, "source": source }));

        let pending = self.paths.pending_path(id);
        match fs::remove_file(&pending) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(err = %err, path = %pending.display(), "failed to remove pending request");
            }
        }
        Ok(response)
    }

    /// All readable pending requests, oldest first. Unparseable files are skipped.
    pub fn list_pending(&self) -> Vec<PendingRequest> {
        let entries = match fs::read_dir(&self.paths.pending_dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(err = %err, dir = %self.paths.pending_dir.display(), "failed to list pending requests");
                return Vec::new();
            }
        };

        let mut pending: Vec<PendingRequest> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| read_json(&path))
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending
    }

    /// Wait for a response to `id`, checking every `interval` until `timeout`.
    ///
    /// Returns early with [`PollOutcome::Cancelled`] when `stop` fires.
    #[instrument(skip(self, stop), fields(timeout_ms = timeout.as_millis() as u64))]
    pub fn poll_for_response(
        &self,
        id: &str,
        timeout: Duration,
        interval: Duration,
        stop: &StopFlag,
    ) -> PollOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            if stop.is_stopped() {
                return PollOutcome::Cancelled;
            }
            if let Some(response) = self.read_response(id) {
                return PollOutcome::Responded(response);
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return PollOutcome::TimedOut;
            };
            if remaining.is_zero() {
                return PollOutcome::TimedOut;
            }
            if stop.sleep(interval.min(remaining)) {
                return PollOutcome::Cancelled;
            }
        }
    }

    /// Current session snapshot, or `None` if absent or unreadable.
    pub fn read_state(&self) -> Option<SessionState> {
        read_json(&self.paths.state_path)
    }

    /// Overwrite the session snapshot, stamping `updated_at`. Never merges.
    pub fn write_state(&self, state: &SessionState) -> Result<()> {
        let mut stamped = state.clone();
        stamped.updated_at = Some(timestamp());
        debug!(session_id = %stamped.session_id, status = ?stamped.status, "writing session state");
        write_json_atomic(&self.paths.state_path, &stamped).context("write session state")
    }

    /// Set `action` on the current snapshot (read-modify-write by the channel).
    pub fn request_action(&self, action: SessionAction) -> Result<SessionState> {
        let mut state = self
            .read_state()
            .ok_or_else(|| anyhow!("no session state at {}", self.paths.state_path.display()))?;
        state.action = Some(action);
        self.write_state(&state)?;
        self.append_event(
            "action_requested",
            json!({ "session_id": state.session_id, "action": action }),
        );
        Ok(state)
    }

    /// Append an audit record. Failures are logged, never returned.
    pub fn append_event(&self, kind: &str, data: Value) {
        let mut entry = Map::new();
        entry.insert("ts".to_string(), Value::String(timestamp()));
        entry.insert("type".to_string(), Value::String(kind.to_string()));
        if let Value::Object(fields) = data {
            entry.extend(fields);
        }
        if let Err(err) = append_json_line(&self.paths.events_path, &entry) {
            warn!(err = %format!("{err:#}"), kind, "failed to append event");
        }
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Ids become file names, so only plain token characters are accepted.
fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn truncate(text: &str) -> String {
    text.chars().take(MAX_TEXT_CHARS).collect()
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let contents = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(err = %err, path = %path.display(), "unreadable json, treating as absent");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn open_temp() -> (tempfile::TempDir, BridgeIpc) {
        let temp = tempfile::tempdir().expect("tempdir");
        let ipc = BridgeIpc::open(temp.path().join("bridge")).expect("open");
        (temp, ipc)
    }

    fn yes_no() -> (Vec<String>, Vec<String>) {
        (
            vec!["y".to_string(), "n".to_string()],
            vec!["Approve".to_string(), "Reject".to_string()],
        )
    }

    fn events(ipc: &BridgeIpc) -> Vec<Value> {
        fs::read_to_string(&ipc.paths().events_path)
            .expect("read events")
            .lines()
            .map(|line| serde_json::from_str(line).expect("event json"))
            .collect()
    }

    #[test]
    fn open_creates_layout() {
        let (_temp, ipc) = open_temp();
        assert!(ipc.paths().pending_dir.is_dir());
        assert!(ipc.paths().responses_dir.is_dir());
    }

    #[test]
    fn permission_request_file_has_wire_shape() {
        let (_temp, ipc) = open_temp();
        let (choices, labels) = yes_no();
        let id = ipc
            .write_permission_request("Allow? [y/n]", &choices, &labels, session_context("s1"))
            .expect("write");

        let raw: Value = serde_json::from_str(
            &fs::read_to_string(ipc.paths().pending_path(&id)).expect("read pending"),
        )
        .expect("json");
        assert_eq!(raw["id"], id.as_str());
        assert_eq!(raw["type"], "permission");
        assert_eq!(raw["prompt"], "Allow? [y/n]");
        assert_eq!(raw["choices"], json!(["y", "n"]));
        assert_eq!(raw["choice_labels"], json!(["Approve", "Reject"]));
        assert_eq!(raw["context"]["session_id"], "s1");
        assert!(raw["created_at"].as_str().is_some_and(|ts| ts.ends_with('Z')));
    }

    #[test]
    fn limit_event_records_next_available() {
        let (_temp, ipc) = open_temp();
        let id = ipc
            .write_limit_event("usage limit", Some("3pm"), session_context("s1"))
            .expect("write");
        let pending = ipc.read_pending(&id).expect("pending");
        assert_eq!(
            pending.kind,
            PendingKind::UsageLimit {
                message: "usage limit".to_string(),
                next_available: Some("3pm".to_string()),
            }
        );
        let last = events(&ipc).pop().expect("event");
        assert_eq!(last["type"], "usage_limit");
        assert_eq!(last["next_available"], "3pm");
    }

    #[test]
    fn prompt_text_is_truncated() {
        let (_temp, ipc) = open_temp();
        let (choices, labels) = yes_no();
        let long = "x".repeat(MAX_TEXT_CHARS + 50);
        let id = ipc
            .write_permission_request(&long, &choices, &labels, RequestContext::new())
            .expect("write");
        match ipc.read_pending(&id).expect("pending").kind {
            PendingKind::Permission { prompt, .. } => assert_eq!(prompt.len(), MAX_TEXT_CHARS),
            other => panic!("unexpected kind {other:?}"),
        }
    }

    /// Full round trip: request, no answer yet, answer, pending retired.
    #[test]
    fn response_round_trip_retires_pending() {
        let (_temp, ipc) = open_temp();
        let (choices, labels) = yes_no();
        let id = ipc
            .write_permission_request("Allow? [y/n]", &choices, &labels, session_context("s1"))
            .expect("write");
        assert!(ipc.read_response(&id).is_none());
        assert_eq!(ipc.list_pending().len(), 1);

        ipc.write_response(&id, "y", "telegram", Some("42"))
            .expect("respond");

        let response = ipc.read_response(&id).expect("response");
        assert_eq!(response.choice, "y");
        assert_eq!(response.source, "telegram");
        assert_eq!(response.chat_id.as_deref(), Some("42"));
        assert!(!ipc.paths().pending_path(&id).exists());
        assert!(ipc.list_pending().iter().all(|p| p.id != id));
    }

    #[test]
    fn response_without_pending_is_fine() {
        let (_temp, ipc) = open_temp();
        ipc.write_response("orphan", "n", "timeout", None)
            .expect("respond");
        ipc.write_response("orphan", "y", "telegram", None)
            .expect("overwrite");
        assert_eq!(ipc.read_response("orphan").expect("response").choice, "y");
    }

    #[test]
    fn corrupt_response_reads_as_absent() {
        let (_temp, ipc) = open_temp();
        fs::write(ipc.paths().response_path("partial"), "{\"id\": \"par").expect("write");
        assert!(ipc.read_response("partial").is_none());
        assert!(ipc.read_response("../state").is_none());
    }

    #[test]
    fn write_response_rejects_path_like_ids() {
        let (_temp, ipc) = open_temp();
        let err = ipc
            .write_response("../escape", "y", "cli", None)
            .expect_err("expected error");
        assert!(err.to_string().contains("invalid request id"));
    }

    #[test]
    fn list_pending_sorts_and_skips_garbage() {
        let (_temp, ipc) = open_temp();
        let (choices, labels) = yes_no();
        let first = ipc
            .write_permission_request("first", &choices, &labels, RequestContext::new())
            .expect("write");
        thread::sleep(Duration::from_millis(5));
        let second = ipc
            .write_limit_event("second", None, RequestContext::new())
            .expect("write");
        fs::write(ipc.paths().pending_dir.join("broken.json"), "not json").expect("write");
        fs::write(ipc.paths().pending_dir.join("notes.txt"), "ignored").expect("write");

        let ids: Vec<String> = ipc.list_pending().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn poll_times_out_near_deadline() {
        let (_temp, ipc) = open_temp();
        let started = Instant::now();
        let outcome = ipc.poll_for_response(
            "unanswered",
            Duration::from_millis(100),
            Duration::from_millis(20),
            &StopFlag::new(),
        );
        let elapsed = started.elapsed();
        assert_eq!(outcome, PollOutcome::TimedOut);
        assert!(elapsed >= Duration::from_millis(100), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(500), "elapsed {elapsed:?}");
    }

    #[test]
    fn poll_returns_response_written_later() {
        let (_temp, ipc) = open_temp();
        let writer = ipc.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            writer
                .write_response("later", "y", "telegram", None)
                .expect("respond");
        });
        let outcome = ipc.poll_for_response(
            "later",
            Duration::from_secs(5),
            Duration::from_millis(10),
            &StopFlag::new(),
        );
        handle.join().expect("join");
        match outcome {
            PollOutcome::Responded(response) => assert_eq!(response.choice, "y"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn poll_is_cancelled_by_stop() {
        let (_temp, ipc) = open_temp();
        let stop = StopFlag::new();
        let remote = stop.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.request_stop();
        });
        let started = Instant::now();
        let outcome =
            ipc.poll_for_response("never", Duration::from_secs(30), Duration::from_secs(1), &stop);
        handle.join().expect("join");
        assert_eq!(outcome, PollOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(ipc.read_response("never").is_none());
    }

    #[test]
    fn state_overwrites_and_stamps() {
        let (_temp, ipc) = open_temp();
        let mut limited = SessionState::new("s1", SessionStatus::Limited);
        limited.limit_message = Some("usage limit".to_string());
        ipc.write_state(&limited).expect("write");

        ipc.write_state(&SessionState::new("s1", SessionStatus::Running))
            .expect("overwrite");
        let state = ipc.read_state().expect("state");
        assert_eq!(state.status, SessionStatus::Running);
        assert_eq!(state.limit_message, None, "snapshots are not merged");
        assert!(state.updated_at.is_some());

        let raw: Value =
            serde_json::from_str(&fs::read_to_string(&ipc.paths().state_path).expect("read"))
                .expect("json");
        assert_eq!(raw["action"], Value::Null);
        assert_eq!(raw["status"], "running");
    }

    #[test]
    fn request_action_preserves_other_fields() {
        let (_temp, ipc) = open_temp();
        let mut limited = SessionState::new("s1", SessionStatus::Limited);
        limited.next_available = Some("3pm".to_string());
        limited
            .extra
            .insert("dashboard_note".to_string(), json!("keep me"));
        ipc.write_state(&limited).expect("write");

        ipc.request_action(SessionAction::Resume).expect("action");
        let state = ipc.read_state().expect("state");
        assert_eq!(state.action, Some(SessionAction::Resume));
        assert_eq!(state.next_available.as_deref(), Some("3pm"));
        assert_eq!(state.extra["dashboard_note"], "keep me");
    }

    #[test]
    fn request_action_without_state_errors() {
        let (_temp, ipc) = open_temp();
        assert!(ipc.request_action(SessionAction::Cancel).is_err());
    }

    #[test]
    fn events_are_appended_in_order() {
        let (_temp, ipc) = open_temp();
        ipc.append_event("exit", json!({ "code": 0 }));
        ipc.append_event("resume", json!({ "session_id": "s1" }));
        let events = events(&ipc);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["type"], "exit");
        assert_eq!(events[0]["code"], 0);
        assert_eq!(events[1]["type"], "resume");
        assert!(events[1]["ts"].is_string());
    }
}
