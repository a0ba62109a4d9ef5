//! Bridge configuration stored at `<bridge_dir>/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Bridge configuration (TOML).
///
/// Every field is optional in the file; missing fields take the defaults below.
/// Command-line flags and environment variables override file values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Program launched as the supervised subprocess.
    pub command: String,

    /// How long a permission prompt waits for an answer before auto-reject.
    pub approval_timeout_secs: u64,

    /// Interval between response checks while a prompt is open. Also bounds
    /// how long the output loop waits for new output.
    pub poll_interval_ms: u64,

    /// Interval between `state.json` checks while waiting for resume/cancel.
    pub resume_poll_interval_ms: u64,

    /// Non-blank output lines kept for prompt detection.
    pub window_lines: usize,

    /// Pending entries older than this are skipped on a consumer's first scan.
    pub stale_after_secs: u64,

    /// Ids remembered by a consumer to avoid re-notifying.
    pub seen_cache_capacity: usize,

    /// Mirror subprocess stdout/stderr onto our own.
    pub relay_output: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            approval_timeout_secs: 300,
            poll_interval_ms: 100,
            resume_poll_interval_ms: 2000,
            window_lines: 50,
            stale_after_secs: 10 * 60,
            seen_cache_capacity: 500,
            relay_output: true,
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(anyhow!("command must be non-empty"));
        }
        if self.approval_timeout_secs == 0 {
            return Err(anyhow!("approval_timeout_secs must be > 0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be > 0"));
        }
        if self.resume_poll_interval_ms == 0 {
            return Err(anyhow!("resume_poll_interval_ms must be > 0"));
        }
        if self.window_lines == 0 {
            return Err(anyhow!("window_lines must be > 0"));
        }
        if self.stale_after_secs == 0 {
            return Err(anyhow!("stale_after_secs must be > 0"));
        }
        if self.seen_cache_capacity == 0 {
            return Err(anyhow!("seen_cache_capacity must be > 0"));
        }
        Ok(())
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn resume_poll_interval(&self) -> Duration {
        Duration::from_millis(self.resume_poll_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BridgeConfig::default()`.
pub fn load_config(path: &Path) -> Result<BridgeConfig> {
    if !path.exists() {
        let cfg = BridgeConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BridgeConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
