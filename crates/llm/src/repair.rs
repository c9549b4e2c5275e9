//! Tolerant JSON parsing
//!
//! Models asked for JSON without a grammar constraint wrap it in prose or
//! code fences, stop mid-object when they hit the token limit, and leave
//! trailing commas. `repair_json` turns such output into parseable JSON:
//!
//! - takes the first JSON object/array in the text, ignoring surrounding prose
//! - closes unterminated strings, arrays and objects
//! - drops trailing commas and dangling keys
//!
//! When the closed text still fails to parse (a truncated literal, a key
//! with no value), it backs off to the last complete member.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::LlmError;

/// Most back-off candidates tried before giving up
const MAX_BACKOFF_ATTEMPTS: usize = 64;

/// Parse with serde first, then with repair
pub fn from_str_lenient<T: DeserializeOwned>(raw: &str) -> Result<T, LlmError> {
    serde_json::from_str::<T>(raw.trim()).or_else(|first_err| {
        tracing::debug!(error = %first_err, "JSON parsing failed, attempting repair");
        let value = parse_lenient(raw).ok_or_else(|| {
            LlmError::InvalidResponse(format!("Unrepairable JSON: {}", first_err))
        })?;
        serde_json::from_value::<T>(value)
            .map_err(|e| LlmError::InvalidResponse(format!("Repaired JSON has wrong shape: {}", e)))
    })
}

/// Best-effort parse of the first JSON value in `raw`
pub fn parse_lenient(raw: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(raw.trim()) {
        return Some(value);
    }
    let repaired = repair_json(raw)?;
    serde_json::from_str::<Value>(&repaired).ok()
}

/// Repair `raw` into a JSON document that parses, if one can be recovered
pub fn repair_json(raw: &str) -> Option<String> {
    let body = strip_code_fence(raw);
    let start = body.find(['{', '['])?;
    let scan = Scan::run(&body[start..]);

    let closed = close(scan.out.clone(), &scan.stack);
    if serde_json::from_str::<Value>(&closed).is_ok() {
        return Some(closed);
    }

    // Back off to the last comma that separated two complete members
    for (pos, stack) in scan.commas.iter().rev().take(MAX_BACKOFF_ATTEMPTS) {
        let candidate = close(scan.out[..*pos].to_string(), stack);
        if serde_json::from_str::<Value>(&candidate).is_ok() {
            return Some(candidate);
        }
    }

    // Last resort: the empty container that was opened first
    let opener = scan.stack.first().copied().or(scan.first_closer)?;
    let empty = if opener == '}' { "{}" } else { "[]" };
    Some(empty.to_string())
}

/// Contents of the first fenced block, or the input unchanged
fn strip_code_fence(raw: &str) -> &str {
    let Some(open) = raw.find("```") else {
        return raw;
    };
    let after = &raw[open + 3..];
    // Skip the info string ("json") up to the end of the fence line
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    }
}

#[derive(Debug, Default)]
struct Scan {
    out: String,
    /// Expected closers, innermost last
    stack: Vec<char>,
    /// Closer of the outermost container
    first_closer: Option<char>,
    /// Byte offset of every top-level-of-its-container comma and the open stack there
    commas: Vec<(usize, Vec<char>)>,
}

impl Scan {
    fn run(text: &str) -> Self {
        let mut scan = Scan::default();
        let mut in_string = false;
        let mut escaped = false;

        for c in text.chars() {
            if in_string {
                scan.out.push(c);
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    in_string = false;
                }
                continue;
            }

            match c {
                '"' => {
                    in_string = true;
                    scan.out.push(c);
                },
                '{' | '[' => {
                    let closer = if c == '{' { '}' } else { ']' };
                    if scan.first_closer.is_none() {
                        scan.first_closer = Some(closer);
                    }
                    scan.stack.push(closer);
                    scan.out.push(c);
                },
                '}' | ']' => {
                    // Unbalanced closers are dropped
                    let Some(depth) = scan.stack.iter().rposition(|&expected| expected == c) else {
                        continue;
                    };
                    while scan.stack.len() > depth + 1 {
                        if let Some(inner) = scan.stack.pop() {
                            trim_dangling(&mut scan.out);
                            scan.out.push(inner);
                        }
                    }
                    trim_dangling(&mut scan.out);
                    scan.stack.pop();
                    scan.out.push(c);
                    if scan.stack.is_empty() {
                        // First complete value; ignore trailing prose
                        break;
                    }
                },
                ',' => {
                    scan.commas.push((scan.out.len(), scan.stack.clone()));
                    scan.out.push(c);
                },
                _ => scan.out.push(c),
            }
        }

        if in_string {
            if escaped {
                scan.out.pop();
            }
            scan.out.push('"');
        }
        scan
    }
}

/// Append the closers for every still-open container
fn close(mut out: String, stack: &[char]) -> String {
    for closer in stack.iter().rev() {
        trim_dangling(&mut out);
        out.push(*closer);
    }
    out
}

/// Remove trailing whitespace and commas; give a dangling key a null value
fn trim_dangling(out: &mut String) {
    loop {
        let trimmed_len = out.trim_end().len();
        out.truncate(trimmed_len);
        if out.ends_with(',') {
            out.pop();
            continue;
        }
        break;
    }
    if out.ends_with(':') {
        out.push_str("null");
    }
}
