//! Retry/decision loop support and an approval bridge for interactive agents.
//!
//! Two subsystems share this crate:
//!
//! - **Decision engine** ([`core::decision`]): a pure, total function from one
//!   attempt's outcome to the task's next lifecycle state.
//! - **Approval bridge** ([`bridge`]): supervises an interactive CLI
//!   subprocess, detects permission prompts and usage-limit notices in its
//!   output, and routes them through a file-based request/response store so a
//!   remote human can answer.
//!
//! The layout keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (decisions, pattern detection,
//!   output windowing). No I/O.
//! - **[`io`]**: Side-effecting operations (IPC store, config, processes).
//!
//! Orchestration modules ([`bridge`], [`channel`], [`decide`]) combine the two
//! to implement CLI commands.

pub mod bridge;
pub mod channel;
pub mod core;
pub mod decide;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
