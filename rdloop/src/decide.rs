//! Input handling for `rdloop decide` and `rdloop validate-verdict`.

use std::fs;
use std::io::Read;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::core::decision::decide;
use crate::core::types::{Decision, ExecutionContext};
use crate::core::verdict::validate_verdict;

/// Read a command input: `-` means stdin, anything else is taken literally.
pub fn read_inline_or_stdin(arg: &str) -> Result<String> {
    if arg == "-" {
        return read_stdin();
    }
    Ok(arg.to_string())
}

/// Read a command input: `-` means stdin, anything else is a file path.
pub fn read_file_or_stdin(arg: &str) -> Result<String> {
    if arg == "-" {
        return read_stdin();
    }
    fs::read_to_string(arg).with_context(|| format!("read {arg}"))
}

fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("read stdin")?;
    Ok(buf)
}

/// Parse a serialized execution context and decide the next state.
pub fn decide_json(raw: &str) -> Result<Decision> {
    let ctx: ExecutionContext =
        serde_json::from_str(raw.trim()).context("parse execution context")?;
    Ok(decide(&ctx))
}

/// Parse a judge verdict document and list its structural problems.
pub fn verdict_errors(raw: &str) -> Result<Vec<String>> {
    let verdict: Value = serde_json::from_str(raw).context("parse verdict json")?;
    Ok(validate_verdict(&verdict))
}
