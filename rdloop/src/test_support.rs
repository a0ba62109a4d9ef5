//! Test-only helpers for decision contexts and scripted bridge sessions.

use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::bridge::BridgeOptions;
use crate::core::types::{ErrorClass, ExecutionContext, Role, VerdictDecision};
use crate::io::ipc::BridgeIpc;

/// A clean first-attempt context for `role`: exit code 0, no error, no verdict.
pub fn context(role: Role) -> ExecutionContext {
    ExecutionContext {
        role,
        rc: 0,
        error_class: ErrorClass::None,
        verdict_decision: VerdictDecision::None,
        verdict_gated: false,
        thresholds_pass: true,
        current_attempt: 1,
        effective_max_attempts: 3,
        consecutive_timeout_count: 0,
        consecutive_timeout_key: String::new(),
    }
}

/// Bridge options that run `sh -c <script>` with short test intervals.
///
/// A `--continue` appended on resume becomes `$0` inside the script.
pub fn sh_bridge_options(script: &str) -> BridgeOptions {
    BridgeOptions {
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        session_id: "session_test".to_string(),
        approval_timeout: Duration::from_secs(10),
        poll_interval: Duration::from_millis(10),
        resume_poll_interval: Duration::from_millis(20),
        window_lines: 50,
        relay_output: false,
    }
}

/// Poll `check` until it returns true or `timeout` elapses.
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// All records in `events.jsonl`, oldest first. Missing log reads as empty.
pub fn read_events(ipc: &BridgeIpc) -> Vec<Value> {
    let Ok(contents) = fs::read_to_string(&ipc.paths().events_path) else {
        return Vec::new();
    };
    contents
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

/// The `type` field of every event, oldest first.
pub fn event_types(ipc: &BridgeIpc) -> Vec<String> {
    read_events(ipc)
        .iter()
        .filter_map(|event| event["type"].as_str().map(str::to_string))
        .collect()
}
