//! Approval-channel side of the IPC store: answering requests and signalling
//! a limited session.

use anyhow::{Result, bail};
use tracing::info;

use crate::io::ipc::{BridgeIpc, Response, SessionAction, SessionState, SessionStatus};

/// Answer pending request `id`. Refuses to overwrite an existing response.
pub fn respond(
    ipc: &BridgeIpc,
    id: &str,
    choice: &str,
    source: &str,
    chat_id: Option<&str>,
) -> Result<Response> {
    if let Some(existing) = ipc.read_response(id) {
        bail!(
            "request {id} already answered with '{}' by {}",
            existing.choice,
            existing.source
        );
    }
    if choice.trim().is_empty() {
        bail!("choice must be non-empty");
    }
    let response = ipc.write_response(id, choice, source, chat_id)?;
    info!(id, choice, source, "response written");
    Ok(response)
}

/// Request resume or cancel for the current session.
///
/// Only meaningful once the bridge has recorded a usage limit, so any other
/// status is refused. The open limit request is answered with the action name
/// before the action is set, leaving no pending entry behind.
pub fn signal(ipc: &BridgeIpc, action: SessionAction, source: &str) -> Result<SessionState> {
    let Some(state) = ipc.read_state() else {
        bail!("no session state at {}", ipc.paths().state_path.display());
    };
    match state.status {
        SessionStatus::Limited | SessionStatus::Exited => {}
        other => bail!(
            "session {} is {}; resume/cancel only apply to a limited or exited session",
            state.session_id,
            status_name(other)
        ),
    }

    let open_request = state
        .pending_request_id
        .as_deref()
        .filter(|id| ipc.read_response(id).is_none());
    if let Some(id) = open_request {
        ipc.write_response(id, action_name(action), source, None)?;
        info!(id, source, "limit request answered");
    }

    let updated = ipc.request_action(action)?;
    info!(session_id = %updated.session_id, ?action, "action requested");
    Ok(updated)
}

fn action_name(action: SessionAction) -> &'static str {
    match action {
        SessionAction::Resume => "resume",
        SessionAction::Cancel => "cancel",
    }
}

fn status_name(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Running => "running",
        SessionStatus::WaitingApproval => "waiting_approval",
        SessionStatus::Limited => "limited",
        SessionStatus::Resuming => "resuming",
        SessionStatus::Exited => "exited",
        SessionStatus::Error => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ipc::session_context;

    fn open_temp() -> (tempfile::TempDir, BridgeIpc) {
        let temp = tempfile::tempdir().expect("tempdir");
        let ipc = BridgeIpc::open(temp.path()).expect("open");
        (temp, ipc)
    }

    #[test]
    fn respond_writes_once() {
        let (_temp, ipc) = open_temp();
        let id = ipc
            .write_limit_event("usage limit", None, session_context("s1"))
            .expect("write");
        respond(&ipc, &id, "ok", "cli", None).expect("respond");
        let err = respond(&ipc, &id, "again", "cli", None).expect_err("expected refusal");
        assert!(err.to_string().contains("already answered"));
        assert_eq!(ipc.read_response(&id).expect("response").choice, "ok");
    }

    #[test]
    fn signal_sets_action_on_limited_session() {
        let (_temp, ipc) = open_temp();
        ipc.write_state(&SessionState::new("s1", SessionStatus::Limited))
            .expect("state");
        let state = signal(&ipc, SessionAction::Cancel, "cli").expect("signal");
        assert_eq!(state.action, Some(SessionAction::Cancel));
        assert_eq!(
            ipc.read_state().expect("state").action,
            Some(SessionAction::Cancel)
        );
    }

    #[test]
    fn signal_refuses_running_session() {
        let (_temp, ipc) = open_temp();
        ipc.write_state(&SessionState::new("s1", SessionStatus::Running))
            .expect("state");
        let err = signal(&ipc, SessionAction::Resume, "cli").expect_err("expected refusal");
        assert!(err.to_string().contains("is running"));
        assert_eq!(ipc.read_state().expect("state").action, None);
    }

    /// The open limit request is answered with the action and leaves `pending/`.
    #[test]
    fn signal_answers_open_limit_request() {
        let (_temp, ipc) = open_temp();
        let id = ipc
            .write_limit_event("usage limit", Some("3pm"), session_context("s1"))
            .expect("write");
        let mut limited = SessionState::new("s1", SessionStatus::Limited);
        limited.pending_request_id = Some(id.clone());
        ipc.write_state(&limited).expect("state");

        signal(&ipc, SessionAction::Resume, "telegram").expect("signal");

        let response = ipc.read_response(&id).expect("response");
        assert_eq!(response.choice, "resume");
        assert_eq!(response.source, "telegram");
        assert!(ipc.list_pending().is_empty());
        assert_eq!(
            ipc.read_state().expect("state").action,
            Some(SessionAction::Resume)
        );
    }

    /// An already answered limit request keeps its first response.
    #[test]
    fn signal_keeps_existing_limit_response() {
        let (_temp, ipc) = open_temp();
        let id = ipc
            .write_limit_event("usage limit", None, session_context("s1"))
            .expect("write");
        ipc.write_response(&id, "cancel", "other", None).expect("respond");
        let mut limited = SessionState::new("s1", SessionStatus::Limited);
        limited.pending_request_id = Some(id.clone());
        ipc.write_state(&limited).expect("state");

        signal(&ipc, SessionAction::Resume, "cli").expect("signal");
        assert_eq!(ipc.read_response(&id).expect("response").choice, "cancel");
    }

    #[test]
    fn signal_without_session_errors() {
        let (_temp, ipc) = open_temp();
        assert!(signal(&ipc, SessionAction::Resume, "cli").is_err());
    }
}
