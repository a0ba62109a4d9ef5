//! Diagnostic tracing for the bridge and CLI.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Operator diagnostics via `RUST_LOG`, output to
//!   stderr. Not persisted and never read back by any command.
//!
//! - **Bridge directory (`io/ipc`)**: Product artifacts under the bridge dir:
//!   `state.json`, `events.jsonl`, `pending/` and `responses/`. Always written,
//!   unaffected by `RUST_LOG`, and the only record other processes consume.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Output goes to stderr in compact
/// format so relayed subprocess stdout stays clean.
///
/// # Example
/// ```bash
/// RUST_LOG=rdloop=debug rdloop bridge -- --model opus
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
