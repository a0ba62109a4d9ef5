//! Shared deterministic types for the decision engine.
//!
//! These types define the stable wire contract between the coordination loop
//! and [`crate::core::decision::decide`]. Unrecognized string values are kept
//! verbatim so diagnostics can name them; they never fail deserialization.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which component's output is being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Coder,
    Test,
    Judge,
    Coordinator,
    /// Any role name this build does not know about.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Coder => "coder",
            Role::Test => "test",
            Role::Judge => "judge",
            Role::Coordinator => "coordinator",
            Role::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Failure class reported by the coordinator for the evaluated role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum ErrorClass {
    #[default]
    None,
    Timeout,
    Auth,
    Crash,
    VerdictInvalid,
    VerdictInconsistent,
    Unrecognized(String),
}

impl From<Option<String>> for ErrorClass {
    fn from(raw: Option<String>) -> Self {
        match raw.as_deref() {
            None | Some("") => ErrorClass::None,
            Some("TIMEOUT") => ErrorClass::Timeout,
            Some("AUTH") => ErrorClass::Auth,
            Some("CRASH") => ErrorClass::Crash,
            Some("VERDICT_INVALID") => ErrorClass::VerdictInvalid,
            Some("VERDICT_INCONSISTENT") => ErrorClass::VerdictInconsistent,
            Some(other) => ErrorClass::Unrecognized(other.to_string()),
        }
    }
}

impl From<ErrorClass> for String {
    fn from(class: ErrorClass) -> Self {
        match class {
            ErrorClass::None => String::new(),
            ErrorClass::Timeout => "TIMEOUT".to_string(),
            ErrorClass::Auth => "AUTH".to_string(),
            ErrorClass::Crash => "CRASH".to_string(),
            ErrorClass::VerdictInvalid => "VERDICT_INVALID".to_string(),
            ErrorClass::VerdictInconsistent => "VERDICT_INCONSISTENT".to_string(),
            ErrorClass::Unrecognized(raw) => raw,
        }
    }
}

/// Judge verdict outcome for the attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum VerdictDecision {
    #[default]
    None,
    Pass,
    Fail,
    NeedUserInput,
    Unrecognized(String),
}

impl From<Option<String>> for VerdictDecision {
    fn from(raw: Option<String>) -> Self {
        match raw.as_deref() {
            None | Some("") => VerdictDecision::None,
            Some("PASS") => VerdictDecision::Pass,
            Some("FAIL") => VerdictDecision::Fail,
            Some("NEED_USER_INPUT") => VerdictDecision::NeedUserInput,
            Some(other) => VerdictDecision::Unrecognized(other.to_string()),
        }
    }
}

impl From<VerdictDecision> for String {
    fn from(decision: VerdictDecision) -> Self {
        match decision {
            VerdictDecision::None => String::new(),
            VerdictDecision::Pass => "PASS".to_string(),
            VerdictDecision::Fail => "FAIL".to_string(),
            VerdictDecision::NeedUserInput => "NEED_USER_INPUT".to_string(),
            VerdictDecision::Unrecognized(raw) => raw,
        }
    }
}

impl fmt::Display for VerdictDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from(self.clone()))
    }
}

/// Outcome of one attempt, as seen by the coordinator.
///
/// Optional fields default the way the coordinator's shell entry point
/// expects: empty classes, ungated verdict, thresholds passing, no timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub role: Role,
    pub rc: i32,
    #[serde(default)]
    pub error_class: ErrorClass,
    #[serde(default)]
    pub verdict_decision: VerdictDecision,
    #[serde(default)]
    pub verdict_gated: bool,
    #[serde(default = "default_thresholds_pass")]
    pub thresholds_pass: bool,
    pub current_attempt: u32,
    pub effective_max_attempts: u32,
    #[serde(default)]
    pub consecutive_timeout_count: u32,
    /// Identifies which timeout counter `consecutive_timeout_count` refers to.
    #[serde(default)]
    pub consecutive_timeout_key: String,
}

fn default_thresholds_pass() -> bool {
    true
}

/// Lifecycle state the task moves to after this attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NextState {
    Running,
    Paused,
    Failed,
    ReadyForReview,
}

/// Why a task was paused. `None` serializes as the empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PauseReason {
    #[serde(rename = "")]
    None,
    PausedCrash,
    #[serde(rename = "PAUSED_CODER_AUTH_195")]
    PausedCoderAuth195,
    #[serde(rename = "PAUSED_JUDGE_AUTH_195")]
    PausedJudgeAuth195,
    PausedCoderTimeout,
    PausedTestTimeout,
    PausedJudgeTimeout,
    PausedJudgeVerdictInvalid,
    PausedJudgeVerdictInconsistent,
    PausedWaitingUserInput,
    PausedScoreGated,
    PausedScoreBelowThreshold,
}

/// Verdict-shaped summary of the decision, persisted as `last_decision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LastDecision {
    Pass,
    Fail,
    NeedUserInput,
}

/// Next lifecycle step for a task, produced once per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub next_state: NextState,
    pub pause_reason_code: PauseReason,
    /// Whether this attempt counts against the attempt budget.
    pub consume_attempt: bool,
    pub last_decision: LastDecision,
    pub questions_for_user: Vec<String>,
    /// Human-readable summary for logs.
    pub message: String,
}
