//! Tool call extraction from free-form model output.
//!
//! Models asked for `{"tool": "...", "arguments": {...}}` answer with that
//! object wrapped in prose, code fences, or both. [`extract_candidate`] finds
//! the first object that opens with a `"tool"` or `"arguments"` key and cuts
//! it out by brace matching (quotes and escapes respected), so nested
//! arguments and braces inside strings survive. [`validate_candidate`] then
//! applies the shape rules against the current tool listing.
//!
//! Both are pure: text in, candidate or error out.

use overlay_core::error::ValidationError;
use overlay_core::tool::{ToolCallCandidate, ToolDescriptor};
use regex_lite::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

const LOCATOR_PATTERN: &str = r#"\{\s*"(?:tool|arguments)"\s*:"#;

static LOCATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(LOCATOR_PATTERN).expect("locator pattern is valid"));

/// Parse and validate a model completion in one step.
pub fn parse_tool_call(
    text: &str,
    tools: &[ToolDescriptor],
) -> Result<ToolCallCandidate, ValidationError> {
    let value = extract_candidate(text).ok_or(ValidationError::NoCandidate)?;
    validate_candidate(value, tools)
}

/// The first JSON object in `text` that starts with a `"tool"` or
/// `"arguments"` key and parses. `None` when there is no such object.
pub fn extract_candidate(text: &str) -> Option<Value> {
    LOCATOR.find_iter(text).find_map(|found| {
        let end = balanced_object_end(text, found.start())?;
        match serde_json::from_str::<Value>(&text[found.start()..end]) {
            Ok(value @ Value::Object(_)) => Some(value),
            _ => None,
        }
    })
}

/// Byte offset just past the `}` closing the object opened at `start`.
///
/// Works on bytes: `{`, `}`, `"` and `\` never occur inside a multi-byte
/// UTF-8 sequence.
fn balanced_object_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in text.as_bytes()[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Check an extracted object: exactly the keys `tool` and `arguments`, a
/// string tool name that is currently listed, and an object of arguments.
pub fn validate_candidate(
    value: Value,
    tools: &[ToolDescriptor],
) -> Result<ToolCallCandidate, ValidationError> {
    let Value::Object(mut object) = value else {
        return Err(ValidationError::NoCandidate);
    };

    if object.len() != 2 || !object.contains_key("tool") || !object.contains_key("arguments") {
        let mut found: Vec<String> = object.keys().cloned().collect();
        found.sort();
        return Err(ValidationError::WrongKeys { found });
    }

    let tool = match object.remove("tool") {
        Some(Value::String(name)) => name,
        _ => return Err(ValidationError::ToolNotString),
    };
    let arguments: Map<String, Value> = match object.remove("arguments") {
        Some(Value::Object(arguments)) => arguments,
        _ => return Err(ValidationError::ArgumentsNotObject),
    };

    if !tools.iter().any(|t| t.name == tool) {
        return Err(ValidationError::UnknownTool(tool));
    }

    Ok(ToolCallCandidate { tool, arguments })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tools() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new("ping", "Reply with pong", json!({"type": "object"})),
            ToolDescriptor::new("add_widget", "Place a widget", json!({"type": "object"})),
        ]
    }

    #[test]
    fn locator_matches_both_leading_keys() {
        assert!(LOCATOR.is_match(r#"{ "tool": "ping"}"#));
        assert!(LOCATOR.is_match("{\n  \"arguments\" : {}}"));
        assert!(!LOCATOR.is_match(r#"{"name": "ping"}"#));
    }

    #[test]
    fn bare_object() {
        let call = parse_tool_call(r#"{"tool": "ping", "arguments": {}}"#, &tools()).unwrap();
        assert_eq!(call.tool, "ping");
        assert!(call.arguments.is_empty());
    }

    #[test]
    fn object_inside_prose() {
        let text = r#"Sure! I'll call the tool: {"tool": "ping", "arguments": {"n": 1}} and then report back."#;
        let call = parse_tool_call(text, &tools()).unwrap();
        assert_eq!(call.arguments["n"], 1);
    }

    #[test]
    fn object_inside_code_fence() {
        let text = "Here you go:\n```json\n{\n  \"tool\": \"add_widget\",\n  \"arguments\": {\"component\": \"clock\"}\n}\n```\n";
        let call = parse_tool_call(text, &tools()).unwrap();
        assert_eq!(call.tool, "add_widget");
        assert_eq!(call.arguments["component"], "clock");
    }

    #[test]
    fn nested_arguments_and_braces_in_strings() {
        let text = r#"{"tool": "add_widget", "arguments": {"layout": {"row": 1, "col": {"start": 2}}, "label": "a } tricky { \"label\""}}"#;
        let call = parse_tool_call(text, &tools()).unwrap();
        assert_eq!(call.arguments["layout"]["col"]["start"], 2);
        assert_eq!(call.arguments["label"], "a } tricky { \"label\"");
    }

    #[test]
    fn arguments_key_first_is_accepted() {
        let call = parse_tool_call(r#"{"arguments": {}, "tool": "ping"}"#, &tools()).unwrap();
        assert_eq!(call.tool, "ping");
    }

    #[test]
    fn unrelated_braces_before_the_call_are_skipped() {
        let text = r#"Set {x} to {"a": 1}. Then {"tool": "ping", "arguments": {}}"#;
        assert_eq!(parse_tool_call(text, &tools()).unwrap().tool, "ping");
    }

    #[test]
    fn broken_first_candidate_falls_through_to_next() {
        let text = r#"{"tool": "ping", "arguments": {oops}} or rather {"tool": "ping", "arguments": {}}"#;
        assert_eq!(parse_tool_call(text, &tools()).unwrap().tool, "ping");
    }

    #[test]
    fn no_candidate() {
        for text in [
            "",
            "I don't know which tool to use.",
            r#"{"name": "ping", "parameters": {}}"#,
            r#"{"tool": "ping", "arguments": {"#,
            "tool: ping",
        ] {
            assert_eq!(
                parse_tool_call(text, &tools()),
                Err(ValidationError::NoCandidate),
                "input: {text}"
            );
        }
    }

    #[test]
    fn extra_or_missing_keys() {
        let err = parse_tool_call(
            r#"{"tool": "ping", "arguments": {}, "reason": "asked"}"#,
            &tools(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::WrongKeys {
                found: vec!["arguments".into(), "reason".into(), "tool".into()]
            }
        );

        let err = parse_tool_call(r#"{"tool": "ping"}"#, &tools()).unwrap_err();
        assert!(matches!(err, ValidationError::WrongKeys { .. }));
    }

    #[test]
    fn wrong_value_types() {
        assert_eq!(
            parse_tool_call(r#"{"tool": 7, "arguments": {}}"#, &tools()),
            Err(ValidationError::ToolNotString)
        );
        assert_eq!(
            parse_tool_call(r#"{"tool": "ping", "arguments": []}"#, &tools()),
            Err(ValidationError::ArgumentsNotObject)
        );
    }

    #[test]
    fn unknown_tool() {
        assert_eq!(
            parse_tool_call(r#"{"tool": "launch_rocket", "arguments": {}}"#, &tools()),
            Err(ValidationError::UnknownTool("launch_rocket".into()))
        );
    }

    #[test]
    fn multibyte_text_around_the_call() {
        let text = r#"Voilà, 🚀 {"tool": "ping", "arguments": {"msg": "héllo"}} ✓"#;
        let call = parse_tool_call(text, &tools()).unwrap();
        assert_eq!(call.arguments["msg"], "héllo");
    }
}
