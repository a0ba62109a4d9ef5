//! Stable exit codes for rdloop CLI commands.
//!
//! `rdloop bridge` otherwise exits with the supervised subprocess's own code.
//! Argument errors exit with clap's usage code (2).

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid input, failed validation, refused request, or any other error.
pub const INVALID: i32 = 1;
/// A usage-limited bridge session was cancelled.
pub const CANCELLED: i32 = 3;
/// The bridge subprocess could not be started.
pub const SPAWN_FAILED: i32 = 127;
/// The bridge was stopped by SIGINT/SIGTERM.
pub const STOPPED: i32 = 130;
