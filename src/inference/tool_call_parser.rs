//! Tool call parsing: normalizes the model's `tool_calls` entries to
//! [`ToolCall`] structs.
//!
//! Arguments arrive as a JSON-encoded string. Models occasionally emit
//! slightly broken JSON, so a failed parse goes through a small set of
//! repairs before the call is rejected.

use uuid::Uuid;

use super::errors::InferenceError;
use super::types::ToolCall;

/// Parse one native tool call.
///
/// A missing `id` gets a generated `call_<uuid>`. Empty arguments are treated
/// as `{}`. Arguments must decode to a JSON object.
pub fn parse_tool_call(
    id: Option<&str>,
    name: &str,
    arguments_json: &str,
) -> Result<ToolCall, InferenceError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(InferenceError::ToolCallParseError {
            raw_response: arguments_json.to_string(),
            reason: "empty tool name".into(),
        });
    }

    let raw = arguments_json.trim();
    let arguments = if raw.is_empty() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value) => value,
            Err(e) => {
                let repaired = repair_arguments(raw).ok_or_else(|| {
                    InferenceError::ToolCallParseError {
                        raw_response: raw.to_string(),
                        reason: format!("invalid JSON arguments: {e}"),
                    }
                })?;
                tracing::debug!(tool = name, "repaired malformed tool call arguments");
                repaired
            }
        }
    };

    // Some runtimes double-encode: the arguments string holds a JSON string.
    let arguments = match arguments {
        serde_json::Value::String(inner) => serde_json::from_str(&inner).map_err(|e| {
            InferenceError::ToolCallParseError {
                raw_response: raw.to_string(),
                reason: format!("invalid nested JSON arguments: {e}"),
            }
        })?,
        other => other,
    };

    if !arguments.is_object() {
        return Err(InferenceError::ToolCallParseError {
            raw_response: raw.to_string(),
            reason: "arguments are not a JSON object".into(),
        });
    }

    Ok(ToolCall {
        id: id
            .filter(|s| !s.is_empty())
            .map(String::from)
            .unwrap_or_else(|| format!("call_{}", Uuid::new_v4())),
        name: name.to_string(),
        arguments,
    })
}

/// Try the repairs in order, re-parsing after each one.
///
/// Handles an extra quote after a colon (`"k":""v"`), trailing commas,
/// missing closing braces and stray control characters.
pub fn repair_arguments(raw: &str) -> Option<serde_json::Value> {
    let repairs: [fn(&str) -> String; 4] = [
        collapse_doubled_quotes,
        strip_trailing_commas,
        close_open_braces,
        strip_control_chars,
    ];

    let mut text = raw.to_string();
    for repair in repairs {
        text = repair(&text);
        if let Ok(value) = serde_json::from_str(&text) {
            return Some(value);
        }
    }
    None
}

/// `:""value` → `:"value"`, leaving real empty strings (`:""` before `,`/`}`)
/// untouched.
fn collapse_doubled_quotes(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < chars.len() {
        let doubled = chars[i] == ':'
            && chars.get(i + 1) == Some(&'"')
            && chars.get(i + 2) == Some(&'"')
            && !matches!(chars.get(i + 3), None | Some(',') | Some('}'));
        if doubled {
            out.push_str(":\"");
            i += 3;
            continue;
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn strip_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    for (i, &c) in chars.iter().enumerate() {
        if c == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn close_open_braces(input: &str) -> String {
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;
    for c in input.chars() {
        if escaped {
            escaped = false;
        } else if in_string && c == '\\' {
            escaped = true;
        } else if c == '"' {
            in_string = !in_string;
        } else if !in_string && c == '{' {
            depth += 1;
        } else if !in_string && c == '}' {
            depth -= 1;
        }
    }

    let mut out = input.to_string();
    for _ in 0..depth.max(0) {
        out.push('}');
    }
    out
}

fn strip_control_chars(input: &str) -> String {
    input
        .chars()
        .filter(|&c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}
