//! Classification of recent subprocess output into permission prompts and
//! usage-limit notices.
//!
//! Both detectors are pure: they take a window of recent non-blank lines and
//! return the first matching rule, in table order.

use std::sync::LazyLock;

use regex::Regex;

/// Number of trailing non-blank lines quoted back as prompt/message text.
pub const EXCERPT_LINES: usize = 5;

const DEFAULT_CHOICES: [&str; 2] = ["y", "n"];
const DEFAULT_CHOICE_LABELS: [&str; 2] = ["Approve", "Reject"];

struct PermissionRule {
    name: &'static str,
    trigger: Regex,
}

struct LimitRule {
    name: &'static str,
    trigger: Regex,
    next_available: Regex,
}

static PERMISSION_RULES: LazyLock<Vec<PermissionRule>> = LazyLock::new(|| {
    let rule = |name, pattern: &str| PermissionRule {
        name,
        trigger: Regex::new(pattern).unwrap(),
    };
    vec![
        rule(
            "allow_tool",
            r"(?:Allow|allow)\s+(?:this\s+)?(?:tool|action|command)?\s*\?\s*[\[(]",
        ),
        rule("want_to_allow", r"(?i)Do you want to allow"),
        rule("permission_requested", r"(?i)Permission requested"),
        rule(
            "wants_to_run",
            r"(?i)wants?\s+to\s+(?:run|execute|edit|write|read|delete|create)",
        ),
        rule(
            "approve_deny",
            r"(?i)(?:approve|deny|allow|reject)\s*[\[(]|[\[(]\s*(?:approve|deny|allow|reject)",
        ),
        rule(
            "needs_approval",
            r"(?i)(?:needs?\s+(?:your\s+)?approval|waiting\s+for\s+(?:your\s+)?(?:approval|confirmation|consent))",
        ),
    ]
});

static LIMIT_RULES: LazyLock<Vec<LimitRule>> = LazyLock::new(|| {
    let rule = |name, trigger: &str, next_available: &str| LimitRule {
        name,
        trigger: Regex::new(trigger).unwrap(),
        next_available: Regex::new(next_available).unwrap(),
    };
    vec![
        rule(
            "usage_limit",
            r"(?i)(?:usage|rate)\s+limit",
            r"(?i)(?:try again|resets?|available)\s+(?:at|after|in)\s+(.+?)(?:\.|$)",
        ),
        rule(
            "try_again",
            r"(?i)try again (?:at|after|in)",
            r"(?i)try again (?:at|after|in)\s+(.+?)(?:\.|$)",
        ),
        rule(
            "resets_at",
            r"(?i)resets?\s+at",
            r"(?i)resets?\s+at\s+(.+?)(?:\.|$)",
        ),
        rule(
            "too_many_requests",
            r"(?i)too many requests",
            r"(?i)(?:retry|wait|after)\s+(.+?)(?:\.|$)",
        ),
        rule(
            "quota_exceeded",
            r"(?i)(?:quota|credits?)\s+(?:exceeded|exhausted|depleted)",
            r"(?i)(?:try again|resets?|available|renew)\s+(?:at|after|in|on)\s+(.+?)(?:\.|$)",
        ),
        rule(
            "wait_minutes",
            r"(?i)(?:wait|retry)\s+(?:\d+\s+)?(?:minutes?|seconds?|hours?)",
            r"(?i)(?:wait|retry)\s+((?:\d+\s+)?(?:minutes?|seconds?|hours?))",
        ),
    ]
});

/// Choice-list token at the end of a prompt line, e.g. `[y/n]` or `(yes/no/always)`.
static CHOICE_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\[(]([^)\]]+)[\])]\s*$").unwrap());

/// A detected permission prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionPrompt {
    /// Name of the rule that matched.
    pub pattern: &'static str,
    /// Last few non-blank lines of the window.
    pub prompt: String,
    pub choices: Vec<String>,
    pub choice_labels: Vec<String>,
}

/// A detected usage-limit notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageLimit {
    pub pattern: &'static str,
    pub message: String,
    /// Human-readable "next available" hint, when the text carries one.
    pub next_available: Option<String>,
}

/// Detect a permission prompt in the window. The first matching rule wins.
///
/// Choices come from a bracketed token list on the last line; without one the
/// prompt is treated as a plain yes/no question.
pub fn detect_permission_prompt<S: AsRef<str>>(lines: &[S]) -> Option<PermissionPrompt> {
    let text = join(lines);
    let rule = PERMISSION_RULES
        .iter()
        .find(|rule| rule.trigger.is_match(&text))?;

    let last_line = lines.last().map(|line| line.as_ref()).unwrap_or_default();
    let raw_choices = CHOICE_LIST
        .captures(last_line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str());
    let (choices, choice_labels) = parse_choices(raw_choices);

    Some(PermissionPrompt {
        pattern: rule.name,
        prompt: excerpt(lines),
        choices,
        choice_labels,
    })
}

/// Detect a usage-limit notice in the window. The first matching rule wins.
pub fn detect_usage_limit<S: AsRef<str>>(lines: &[S]) -> Option<UsageLimit> {
    let text = join(lines);
    let rule = LIMIT_RULES.iter().find(|rule| rule.trigger.is_match(&text))?;

    let next_available = rule
        .next_available
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string());

    Some(UsageLimit {
        pattern: rule.name,
        message: excerpt(lines),
        next_available,
    })
}

/// Split a raw `a/b/c` choice list into lowercase tokens and display labels.
pub fn parse_choices(raw: Option<&str>) -> (Vec<String>, Vec<String>) {
    let Some(raw) = raw else {
        return (
            DEFAULT_CHOICES.iter().map(|c| c.to_string()).collect(),
            DEFAULT_CHOICE_LABELS.iter().map(|l| l.to_string()).collect(),
        );
    };

    let choices: Vec<String> = raw.split('/').map(|c| c.trim().to_lowercase()).collect();
    let labels = choices.iter().map(|c| choice_label(c)).collect();
    (choices, labels)
}

fn choice_label(choice: &str) -> String {
    match choice {
        "y" | "yes" => "Approve".to_string(),
        "n" | "no" => "Reject".to_string(),
        "a" => "Always Allow".to_string(),
        other if other.contains("always") => "Always Allow".to_string(),
        other => other.to_string(),
    }
}

/// The token sent when a prompt is rejected without an answer.
pub fn reject_choice<S: AsRef<str>>(choices: &[S]) -> &'static str {
    if choices.iter().any(|c| c.as_ref() == "n") {
        "n"
    } else {
        "no"
    }
}

fn join<S: AsRef<str>>(lines: &[S]) -> String {
    lines
        .iter()
        .map(|line| line.as_ref())
        .collect::<Vec<_>>()
        .join("\n")
}

fn excerpt<S: AsRef<str>>(lines: &[S]) -> String {
    let start = lines.len().saturating_sub(EXCERPT_LINES);
    lines[start..]
        .iter()
        .map(|line| line.as_ref())
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
