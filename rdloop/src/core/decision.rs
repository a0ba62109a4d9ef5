//! Priority-ordered state transition for one attempt.

use crate::core::types::{
    Decision, ErrorClass, ExecutionContext, LastDecision, NextState, PauseReason, Role,
    VerdictDecision,
};

/// Exit code the coordinator reports for authentication failures.
pub const RC_AUTH: i32 = 195;
/// Exit code produced by `timeout(1)` when a role runs out of time.
pub const RC_TIMEOUT: i32 = 124;
/// Consecutive timeouts for the same key that turn a pause into a failure.
pub const TIMEOUT_ESCALATION_COUNT: u32 = 2;

/// Decide the next lifecycle state for a task from one attempt's outcome.
///
/// Rules are evaluated in strict priority order and the first match wins:
///
/// 1. crash
/// 2. authentication (`rc == 195` or `AUTH`)
/// 3. timeout (`rc == 124` or `TIMEOUT`), escalating to `FAILED` after
///    repeated timeouts
/// 4. invalid verdict
/// 5. inconsistent verdict
/// 6. judge asks for user input
/// 7. clean pass
/// 8. gated fail
/// 9. fail below threshold
/// 10. plain fail (advance or exhaust attempts)
///
/// Anything else pauses as an invalid verdict. The function is total and has
/// no side effects.
pub fn decide(ctx: &ExecutionContext) -> Decision {
    if ctx.error_class == ErrorClass::Crash {
        return paused(
            PauseReason::PausedCrash,
            false,
            "Coordinator crashed. Please check logs and re-run with --continue.",
            "coordinator crash detected".to_string(),
        );
    }

    if ctx.rc == RC_AUTH || ctx.error_class == ErrorClass::Auth {
        return paused(
            auth_reason(ctx.role),
            false,
            "Authentication failed (rc=195). Check SSH keys / keychain / API tokens.",
            format!("{} auth failure (rc=195)", ctx.role),
        );
    }

    if ctx.rc == RC_TIMEOUT || ctx.error_class == ErrorClass::Timeout {
        if ctx.consecutive_timeout_count >= TIMEOUT_ESCALATION_COUNT {
            return Decision {
                next_state: NextState::Failed,
                pause_reason_code: PauseReason::None,
                consume_attempt: true,
                last_decision: LastDecision::Fail,
                questions_for_user: Vec::new(),
                message: format!(
                    "{} timed out {} consecutive times, marking FAILED",
                    ctx.role, ctx.consecutive_timeout_count
                ),
            };
        }

        // A test-runner timeout burns the attempt; coder and judge retry in place.
        let consume = ctx.role == Role::Test;
        return paused(
            timeout_reason(ctx.role),
            consume,
            &format!(
                "{} timed out (rc=124). Increase timeout or investigate.",
                ctx.role
            ),
            format!("{} timeout", ctx.role),
        );
    }

    if ctx.error_class == ErrorClass::VerdictInvalid {
        return paused(
            PauseReason::PausedJudgeVerdictInvalid,
            false,
            "Judge returned invalid verdict JSON. Check judge output.",
            "judge verdict invalid".to_string(),
        );
    }

    if ctx.error_class == ErrorClass::VerdictInconsistent {
        return paused(
            PauseReason::PausedJudgeVerdictInconsistent,
            false,
            "Judge verdict is internally inconsistent. Please review.",
            "judge verdict inconsistent".to_string(),
        );
    }

    match ctx.verdict_decision {
        VerdictDecision::NeedUserInput => paused(
            PauseReason::PausedWaitingUserInput,
            false,
            "Judge requests user input. See verdict for details.",
            "judge requests user input".to_string(),
        ),
        VerdictDecision::Pass if !ctx.verdict_gated && ctx.thresholds_pass => Decision {
            next_state: NextState::ReadyForReview,
            pause_reason_code: PauseReason::None,
            consume_attempt: false,
            last_decision: LastDecision::Pass,
            questions_for_user: Vec::new(),
            message: "All checks passed".to_string(),
        },
        VerdictDecision::Fail => decide_fail(ctx),
        _ => paused(
            PauseReason::PausedJudgeVerdictInvalid,
            false,
            "Unexpected decision state. Please review.",
            format!("unknown verdict_decision: {}", ctx.verdict_decision),
        ),
    }
}

fn decide_fail(ctx: &ExecutionContext) -> Decision {
    if ctx.verdict_gated {
        return score_paused(
            PauseReason::PausedScoreGated,
            "Score is below gated threshold. Review required.",
            "score gated, paused for review",
        );
    }

    if !ctx.thresholds_pass {
        return score_paused(
            PauseReason::PausedScoreBelowThreshold,
            "Score is below threshold. Review and adjust.",
            "score below threshold, paused",
        );
    }

    let (next_state, message) = if ctx.current_attempt >= ctx.effective_max_attempts {
        (NextState::Failed, "max attempts reached")
    } else {
        (NextState::Running, "advancing to next attempt")
    };
    Decision {
        next_state,
        pause_reason_code: PauseReason::None,
        consume_attempt: true,
        last_decision: LastDecision::Fail,
        questions_for_user: Vec::new(),
        message: message.to_string(),
    }
}

fn auth_reason(role: Role) -> PauseReason {
    match role {
        Role::Judge => PauseReason::PausedJudgeAuth195,
        Role::Coder | Role::Test | Role::Coordinator | Role::Unknown => {
            PauseReason::PausedCoderAuth195
        }
    }
}

fn timeout_reason(role: Role) -> PauseReason {
    match role {
        Role::Test => PauseReason::PausedTestTimeout,
        Role::Judge => PauseReason::PausedJudgeTimeout,
        Role::Coder | Role::Coordinator | Role::Unknown => PauseReason::PausedCoderTimeout,
    }
}

fn paused(code: PauseReason, consume: bool, question: &str, message: String) -> Decision {
    Decision {
        next_state: NextState::Paused,
        pause_reason_code: code,
        consume_attempt: consume,
        last_decision: LastDecision::NeedUserInput,
        questions_for_user: vec![question.to_string()],
        message,
    }
}

fn score_paused(code: PauseReason, question: &str, message: &str) -> Decision {
    Decision {
        next_state: NextState::Paused,
        pause_reason_code: code,
        consume_attempt: true,
        last_decision: LastDecision::Fail,
        questions_for_user: vec![question.to_string()],
        message: message.to_string(),
    }
}
