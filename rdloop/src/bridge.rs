//! Approval bridge: supervise one interactive subprocess and route its
//! permission prompts and usage-limit notices through the IPC store.
//!
//! One [`Bridge`] owns one session. The session may span several subprocess
//! lifetimes when a usage limit ends the process and an external `resume`
//! action restarts it with `--continue`.

use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::core::patterns::{
    PermissionPrompt, UsageLimit, detect_permission_prompt, detect_usage_limit, reject_choice,
};
use crate::core::window::OutputWindow;
use crate::io::config::BridgeConfig;
use crate::io::ipc::{
    BridgeIpc, PollOutcome, SessionAction, SessionState, SessionStatus, session_context, timestamp,
};
use crate::io::process::{SupervisedChild, exit_code};
use crate::io::stop::StopFlag;

/// Flags that already ask the subprocess to continue its previous conversation.
const CONTINUE_FLAGS: [&str; 2] = ["--continue", "-c"];

/// Everything needed to run one bridge session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOptions {
    pub command: String,
    pub args: Vec<String>,
    pub session_id: String,
    pub approval_timeout: Duration,
    pub poll_interval: Duration,
    pub resume_poll_interval: Duration,
    pub window_lines: usize,
    pub relay_output: bool,
}

impl BridgeOptions {
    /// Options from a loaded config, with a freshly generated session id.
    pub fn from_config(cfg: &BridgeConfig, args: Vec<String>) -> Self {
        Self {
            command: cfg.command.clone(),
            args,
            session_id: default_session_id(),
            approval_timeout: cfg.approval_timeout(),
            poll_interval: cfg.poll_interval(),
            resume_poll_interval: cfg.resume_poll_interval(),
            window_lines: cfg.window_lines,
            relay_output: cfg.relay_output,
        }
    }
}

/// How a bridge session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeExit {
    /// The subprocess exited on its own (not while limited).
    Exited { code: i32 },
    /// A usage-limited session was cancelled through the `cancel` action.
    Cancelled,
    /// The stop flag fired; the subprocess was terminated.
    Stopped,
    /// The subprocess could not be started.
    SpawnFailed { error: String },
}

impl BridgeExit {
    /// Process exit code for the `bridge` command.
    pub fn exit_code(&self) -> i32 {
        match self {
            BridgeExit::Exited { code } => *code,
            BridgeExit::Cancelled => crate::exit_codes::CANCELLED,
            BridgeExit::Stopped => crate::exit_codes::STOPPED,
            BridgeExit::SpawnFailed { .. } => crate::exit_codes::SPAWN_FAILED,
        }
    }
}

/// `session_<base36 unix millis>`.
pub fn default_session_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("session_{}", to_base36(millis))
}

/// `args` plus `--continue`, unless a continue flag is already present.
pub fn with_continue_flag(args: &[String]) -> Vec<String> {
    let mut next = args.to_vec();
    if !next.iter().any(|arg| CONTINUE_FLAGS.contains(&arg.as_str())) {
        next.push("--continue".to_string());
    }
    next
}

fn to_base36(mut value: u128) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

enum Spawned {
    Child(SupervisedChild),
    Failed(String),
}

enum Supervised {
    Exited(i32),
    Stopped,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stopped,
}

enum ResumeSignal {
    Resume,
    Cancel,
    Stopped,
}

/// Supervisor for one session. Run it with [`Bridge::run`]; stop it from
/// another thread through [`Bridge::stop_flag`].
#[derive(Debug)]
pub struct Bridge {
    options: BridgeOptions,
    ipc: BridgeIpc,
    stop: StopFlag,
    window: OutputWindow,
    args: Vec<String>,
    /// Set once a usage limit is recorded; suppresses further detection until resume.
    limited: bool,
}

impl Bridge {
    pub fn new(options: BridgeOptions, ipc: BridgeIpc) -> Self {
        Self {
            window: OutputWindow::new(options.window_lines),
            args: options.args.clone(),
            options,
            ipc,
            stop: StopFlag::new(),
            limited: false,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.options.session_id
    }

    /// Cloneable handle that ends the session cooperatively.
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Run the session to completion.
    ///
    /// Subprocess failures end up in `state.json` and in the returned
    /// [`BridgeExit`]; only IPC write failures are returned as errors.
    #[instrument(skip(self), fields(session_id = %self.options.session_id))]
    pub fn run(&mut self) -> Result<BridgeExit> {
        loop {
            let mut child = match self.spawn()? {
                Spawned::Child(child) => child,
                Spawned::Failed(error) => return Ok(BridgeExit::SpawnFailed { error }),
            };

            let supervised = match self.supervise(&mut child) {
                Ok(supervised) => supervised,
                Err(err) => {
                    if let Err(term) = child.terminate() {
                        warn!(err = %format!("{term:#}"), "failed to terminate subprocess");
                    }
                    return Err(err);
                }
            };
            let code = match supervised {
                Supervised::Exited(code) => code,
                Supervised::Stopped => {
                    let code = match child.terminate() {
                        Ok(status) => Some(exit_code(status)),
                        Err(err) => {
                            warn!(err = %format!("{err:#}"), "failed to terminate subprocess");
                            None
                        }
                    };
                    self.record_stopped(code)?;
                    return Ok(BridgeExit::Stopped);
                }
            };

            if !self.limited {
                info!(code, "subprocess exited");
                let mut state = self.state(SessionStatus::Exited);
                state.exit_code = Some(code);
                self.ipc.write_state(&state)?;
                self.ipc.append_event(
                    "exit",
                    json!({ "code": code, "session_id": self.options.session_id }),
                );
                return Ok(BridgeExit::Exited { code });
            }

            info!(code, "subprocess exited while limited, waiting for resume or cancel");
            self.ipc.append_event(
                "exit_limited",
                json!({ "code": code, "session_id": self.options.session_id }),
            );
            match self.wait_for_resume() {
                ResumeSignal::Resume => {
                    info!("resume requested, restarting subprocess");
                    self.ipc
                        .append_event("resume", json!({ "session_id": self.options.session_id }));
                    self.window.clear();
                    self.limited = false;
                    self.ipc.write_state(&self.state(SessionStatus::Resuming))?;
                    self.args = with_continue_flag(&self.args);
                }
                ResumeSignal::Cancel => {
                    info!("cancel requested");
                    let mut state = self.state(SessionStatus::Exited);
                    state.exit_reason = Some("cancelled_by_user".to_string());
                    self.ipc.write_state(&state)?;
                    self.ipc
                        .append_event("cancelled", json!({ "session_id": self.options.session_id }));
                    return Ok(BridgeExit::Cancelled);
                }
                ResumeSignal::Stopped => {
                    self.record_stopped(Some(code))?;
                    return Ok(BridgeExit::Stopped);
                }
            }
        }
    }

    fn spawn(&mut self) -> Result<Spawned> {
        info!(command = %self.options.command, args = ?self.args, "starting subprocess");
        let mut state = self.state(SessionStatus::Running);
        state.started_at = Some(timestamp());
        self.ipc.write_state(&state)?;

        match SupervisedChild::spawn(&self.options.command, &self.args, self.options.relay_output)
        {
            Ok(child) => Ok(Spawned::Child(child)),
            Err(err) => {
                let error = format!("{err:#}");
                let mut state = self.state(SessionStatus::Error);
                state.error = Some(error.clone());
                self.ipc.write_state(&state)?;
                self.ipc.append_event(
                    "error",
                    json!({ "error": error, "session_id": self.options.session_id }),
                );
                Ok(Spawned::Failed(error))
            }
        }
    }

    fn supervise(&mut self, child: &mut SupervisedChild) -> Result<Supervised> {
        loop {
            if self.stop.is_stopped() {
                return Ok(Supervised::Stopped);
            }
            match child.recv_output(self.options.poll_interval) {
                Ok(chunk) => {
                    self.window.push_chunk(&chunk);
                    if self.scan(child)? == Flow::Stopped {
                        return Ok(Supervised::Stopped);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    // Descendants can hold the pipes open after the child itself exits.
                    if let Some(status) = child.try_wait()? {
                        return Ok(Supervised::Exited(exit_code(status)));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return self.wait_for_exit(child);
                }
            }
        }
    }

    fn wait_for_exit(&self, child: &mut SupervisedChild) -> Result<Supervised> {
        loop {
            if self.stop.is_stopped() {
                return Ok(Supervised::Stopped);
            }
            if let Some(status) = child.wait_timeout(self.options.poll_interval)? {
                return Ok(Supervised::Exited(exit_code(status)));
            }
        }
    }

    /// Run detection over the window. Permission prompts take precedence.
    fn scan(&mut self, child: &mut SupervisedChild) -> Result<Flow> {
        if self.limited {
            return Ok(Flow::Continue);
        }
        let lines = self.window.lines();
        if let Some(prompt) = detect_permission_prompt(&lines) {
            return self.handle_permission(child, prompt);
        }
        if let Some(limit) = detect_usage_limit(&lines) {
            self.handle_limit(limit)?;
        }
        Ok(Flow::Continue)
    }

    fn handle_permission(
        &mut self,
        child: &mut SupervisedChild,
        prompt: PermissionPrompt,
    ) -> Result<Flow> {
        info!(pattern = prompt.pattern, "permission prompt detected");
        let id = self.ipc.write_permission_request(
            &prompt.prompt,
            &prompt.choices,
            &prompt.choice_labels,
            session_context(&self.options.session_id),
        )?;

        let mut state = self.state(SessionStatus::WaitingApproval);
        state.pending_request_id = Some(id.clone());
        state.last_prompt = Some(prompt.prompt.clone());
        self.ipc.write_state(&state)?;

        info!(id = %id, timeout_secs = self.options.approval_timeout.as_secs(), "waiting for approval");
        let choice = match self.ipc.poll_for_response(
            &id,
            self.options.approval_timeout,
            self.options.poll_interval,
            &self.stop,
        ) {
            PollOutcome::Responded(response) => {
                info!(id = %id, choice = %response.choice, source = %response.source, "approval received");
                response.choice
            }
            PollOutcome::TimedOut => {
                let reject = reject_choice(&prompt.choices);
                warn!(id = %id, choice = reject, "approval timed out, rejecting");
                self.ipc.write_response(&id, reject, "timeout", None)?;
                self.ipc
                    .append_event("approval_timeout", json!({ "id": id }));
                reject.to_string()
            }
            PollOutcome::Cancelled => {
                debug!(id = %id, "approval wait abandoned");
                return Ok(Flow::Stopped);
            }
        };

        let discarded = child.discard_pending_output();
        self.window.clear();
        if let Err(err) = child.send_line(&choice) {
            warn!(err = %format!("{err:#}"), "failed to deliver choice to subprocess");
        }
        debug!(discarded, "resuming output monitoring");

        self.ipc.write_state(&self.state(SessionStatus::Running))?;
        Ok(Flow::Continue)
    }

    fn handle_limit(&mut self, limit: UsageLimit) -> Result<()> {
        info!(pattern = limit.pattern, next_available = ?limit.next_available, "usage limit detected");
        let id = self.ipc.write_limit_event(
            &limit.message,
            limit.next_available.as_deref(),
            session_context(&self.options.session_id),
        )?;

        let mut state = self.state(SessionStatus::Limited);
        state.limit_message = Some(limit.message);
        state.next_available = limit.next_available;
        state.pending_request_id = Some(id);
        self.ipc.write_state(&state)?;

        self.window.clear();
        self.limited = true;
        Ok(())
    }

    /// Poll `state.json` until an action is set or the bridge is stopped.
    fn wait_for_resume(&self) -> ResumeSignal {
        loop {
            if self.stop.is_stopped() {
                return ResumeSignal::Stopped;
            }
            match self.ipc.read_state().and_then(|state| state.action) {
                Some(SessionAction::Resume) => return ResumeSignal::Resume,
                Some(SessionAction::Cancel) => return ResumeSignal::Cancel,
                None => {}
            }
            if self.stop.sleep(self.options.resume_poll_interval) {
                return ResumeSignal::Stopped;
            }
        }
    }

    fn record_stopped(&self, code: Option<i32>) -> Result<()> {
        info!(code = ?code, "bridge stopped");
        let mut state = self.state(SessionStatus::Exited);
        state.exit_code = code;
        state.exit_reason = Some("stopped".to_string());
        self.ipc.write_state(&state)?;
        self.ipc
            .append_event("stopped", json!({ "session_id": self.options.session_id }));
        Ok(())
    }

    fn state(&self, status: SessionStatus) -> SessionState {
        let mut state = SessionState::new(&self.options.session_id, status);
        state.command = Some(self.options.command.clone());
        state.args = Some(self.args.clone());
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn continue_flag_is_appended_once() {
        let once = with_continue_flag(&args(&["--model", "opus"]));
        assert_eq!(once, args(&["--model", "opus", "--continue"]));
        assert_eq!(with_continue_flag(&once), once);
    }

    #[test]
    fn short_continue_flag_counts() {
        let existing = args(&["-c", "--verbose"]);
        assert_eq!(with_continue_flag(&existing), existing);
    }

    #[test]
    fn session_id_is_base36_millis() {
        let id = default_session_id();
        let suffix = id.strip_prefix("session_").expect("prefix");
        assert!(!suffix.is_empty());
        assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn base36_encoding() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1_700_000_000_000), "loyw3v28");
    }

    #[test]
    fn options_follow_config() {
        let cfg = BridgeConfig {
            command: "agent".to_string(),
            approval_timeout_secs: 7,
            relay_output: false,
            ..BridgeConfig::default()
        };
        let options = BridgeOptions::from_config(&cfg, args(&["-p", "hi"]));
        assert_eq!(options.command, "agent");
        assert_eq!(options.args, args(&["-p", "hi"]));
        assert_eq!(options.approval_timeout, Duration::from_secs(7));
        assert_eq!(options.window_lines, 50);
        assert!(!options.relay_output);
        assert!(options.session_id.starts_with("session_"));
    }

    #[test]
    fn exit_codes_per_outcome() {
        assert_eq!(BridgeExit::Exited { code: 4 }.exit_code(), 4);
        assert_eq!(
            BridgeExit::SpawnFailed {
                error: "nope".to_string()
            }
            .exit_code(),
            crate::exit_codes::SPAWN_FAILED
        );
    }
}
