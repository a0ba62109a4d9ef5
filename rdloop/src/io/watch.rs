//! Consumer-side scan of `pending/` that reports each request once.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::core::seen_cache::SeenCache;
use crate::io::ipc::{BridgeIpc, PendingRequest};

/// Tracks which pending requests an approval channel has already surfaced.
///
/// The first scan treats entries older than `stale_after` as already handled,
/// so a restarted consumer does not re-notify about abandoned prompts.
#[derive(Debug)]
pub struct PendingWatcher {
    seen: SeenCache,
    stale_after: Duration,
    first_scan: bool,
}

impl PendingWatcher {
    pub fn new(stale_after: Duration, capacity: usize) -> Self {
        Self {
            seen: SeenCache::new(capacity),
            stale_after,
            first_scan: true,
        }
    }

    /// New pending requests since the previous call, oldest first.
    pub fn poll(&mut self, ipc: &BridgeIpc, now: DateTime<Utc>) -> Vec<PendingRequest> {
        let first_scan = std::mem::replace(&mut self.first_scan, false);
        let mut fresh = Vec::new();

        for request in ipc.list_pending() {
            if self.seen.contains(&request.id) {
                continue;
            }
            if ipc.read_response(&request.id).is_some() {
                debug!(id = %request.id, "pending request already answered");
                self.seen.insert(&request.id);
                continue;
            }
            if first_scan && self.is_stale(&request, now) {
                debug!(id = %request.id, created_at = %request.created_at, "skipping stale pending request");
                self.seen.insert(&request.id);
                continue;
            }
            self.seen.insert(&request.id);
            fresh.push(request);
        }
        fresh
    }

    /// Unparseable timestamps are never stale.
    fn is_stale(&self, request: &PendingRequest, now: DateTime<Utc>) -> bool {
        let Ok(created) = DateTime::parse_from_rfc3339(&request.created_at) else {
            return false;
        };
        now.signed_duration_since(created.with_timezone(&Utc))
            .to_std()
            .is_ok_and(|age| age > self.stale_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::atomic::write_json_atomic;
    use crate::io::ipc::{PendingKind, RequestContext, session_context};

    fn open_temp() -> (tempfile::TempDir, BridgeIpc) {
        let temp = tempfile::tempdir().expect("tempdir");
        let ipc = BridgeIpc::open(temp.path()).expect("open");
        (temp, ipc)
    }

    fn write_request(ipc: &BridgeIpc) -> String {
        ipc.write_permission_request(
            "Allow? [y/n]",
            &["y".to_string(), "n".to_string()],
            &["Approve".to_string(), "Reject".to_string()],
            session_context("s1"),
        )
        .expect("write")
    }

    #[test]
    fn reports_each_request_once() {
        let (_temp, ipc) = open_temp();
        let mut watcher = PendingWatcher::new(Duration::from_secs(600), 10);
        let id = write_request(&ipc);

        let first: Vec<String> = watcher.poll(&ipc, Utc::now()).into_iter().map(|r| r.id).collect();
        assert_eq!(first, vec![id]);
        assert!(watcher.poll(&ipc, Utc::now()).is_empty());

        let second = write_request(&ipc);
        let next: Vec<String> = watcher.poll(&ipc, Utc::now()).into_iter().map(|r| r.id).collect();
        assert_eq!(next, vec![second]);
    }

    /// An entry whose response exists but whose pending file lingers is not reported.
    #[test]
    fn skips_answered_requests() {
        let (_temp, ipc) = open_temp();
        let id = write_request(&ipc);
        let response = serde_json::json!({
            "id": id,
            "choice": "y",
            "responded_at": "2026-01-01T00:00:00.000Z",
            "source": "other-channel",
        });
        write_json_atomic(&ipc.paths().response_path(&id), &response).expect("respond");

        let mut watcher = PendingWatcher::new(Duration::from_secs(600), 10);
        assert!(watcher.poll(&ipc, Utc::now()).is_empty());
    }

    #[test]
    fn stale_entries_skipped_only_on_first_scan() {
        let (_temp, ipc) = open_temp();
        let old = PendingRequest {
            id: "old-request".to_string(),
            kind: PendingKind::UsageLimit {
                message: "usage limit".to_string(),
                next_available: None,
            },
            context: RequestContext::new(),
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
        };
        write_json_atomic(&ipc.paths().pending_path(&old.id), &old).expect("write");
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:30:00Z")
            .expect("ts")
            .with_timezone(&Utc);

        let mut watcher = PendingWatcher::new(Duration::from_secs(600), 10);
        assert!(watcher.poll(&ipc, now).is_empty());

        let late = PendingRequest {
            id: "late-request".to_string(),
            ..old
        };
        write_json_atomic(&ipc.paths().pending_path(&late.id), &late).expect("write");
        let reported: Vec<String> = watcher.poll(&ipc, now).into_iter().map(|r| r.id).collect();
        assert_eq!(reported, vec!["late-request".to_string()]);
    }
}
