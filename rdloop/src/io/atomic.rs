//! Crash-safe file writes shared by the IPC store and config.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tempfile::NamedTempFile;

/// Atomically replace `path` with `contents` (temp file + flush + fsync + rename).
///
/// The temp file lives in the destination directory so the rename never crosses
/// filesystems. Readers observe either the previous file or the complete new one.
/// On failure the temp file is removed.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;

    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("write temp file for {}", path.display()))?;
    tmp.flush()
        .with_context(|| format!("flush temp file for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("fsync temp file for {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Serialize `value` as pretty JSON with a trailing newline and write it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

/// Append one compact JSON record as a line.
pub fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut line = serde_json::to_string(value).context("serialize json line")?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn write_atomic_replaces_existing_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("state.json");
        write_atomic(&path, b"old").expect("first write");
        write_atomic(&path, b"new").expect("second write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "new");

        let leftovers: Vec<_> = fs::read_dir(path.parent().expect("parent"))
            .expect("read dir")
            .collect();
        assert_eq!(leftovers.len(), 1, "temp files must not linger");
    }

    #[test]
    fn write_json_atomic_is_pretty_with_newline() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("value.json");
        write_json_atomic(&path, &json!({ "a": 1 })).expect("write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "{\n  \"a\": 1\n}\n");
    }

    #[test]
    fn append_json_line_appends_records() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("events.jsonl");
        append_json_line(&path, &json!({ "n": 1 })).expect("append");
        append_json_line(&path, &json!({ "n": 2 })).expect("append");
        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "{\"n\":1}\n{\"n\":2}\n"
        );
    }
}
