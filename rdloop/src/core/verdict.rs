//! Structural validation of judge verdict documents.

use serde_json::Value;

/// Verdict decisions a judge is allowed to emit.
pub const VALID_DECISIONS: [&str; 3] = ["FAIL", "NEED_USER_INPUT", "PASS"];

const REQUIRED_FIELDS: [&str; 4] = [
    "decision",
    "reasons",
    "next_instructions",
    "questions_for_user",
];

/// Check a judge verdict for structural problems.
///
/// Returns an empty list when the verdict is valid. Missing required fields are
/// reported alone, since the remaining checks depend on them.
pub fn validate_verdict(verdict: &Value) -> Vec<String> {
    let mut errors: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|field| verdict.get(**field).is_none())
        .map(|field| format!("missing required field: {field}"))
        .collect();
    if !errors.is_empty() {
        return errors;
    }

    let decision = verdict["decision"].as_str();
    if !decision.is_some_and(|d| VALID_DECISIONS.contains(&d)) {
        errors.push(format!(
            "invalid decision: {} (must be one of {})",
            display(&verdict["decision"]),
            VALID_DECISIONS.join(", ")
        ));
    }

    if !verdict["reasons"]
        .as_array()
        .is_some_and(|reasons| !reasons.is_empty())
    {
        errors.push("reasons must be a non-empty array".to_string());
    }

    let next_instructions = verdict["next_instructions"].as_str();
    if next_instructions.is_none() {
        errors.push("next_instructions must be a string".to_string());
    }
    if decision == Some("FAIL") && next_instructions.is_none_or(|s| s.trim().is_empty()) {
        errors.push("FAIL verdict requires non-empty next_instructions".to_string());
    }

    let questions = verdict["questions_for_user"].as_array();
    if questions.is_none() {
        errors.push("questions_for_user must be an array".to_string());
    }
    if decision == Some("NEED_USER_INPUT") && questions.is_none_or(|q| q.is_empty()) {
        errors.push("NEED_USER_INPUT verdict requires non-empty questions_for_user".to_string());
    }

    errors
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
