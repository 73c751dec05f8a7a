use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

/// Best-effort completion of a truncated JSON reply: close an unterminated
/// string, drop a trailing `,`/`:` or a dangling key, then close open
/// brackets in LIFO order.
pub fn repair_json(input: &str) -> String {
    let mut out = input.trim().to_string();

    if scan(&out).in_string {
        out.push('"');
    }

    loop {
        let trimmed_len = out.trim_end().len();
        out.truncate(trimmed_len);
        if out.ends_with(',') || out.ends_with(':') {
            out.pop();
            continue;
        }
        // A key with no value: a string literal at the very end whose
        // preceding non-space char opens an object or separates members.
        if out.ends_with('"') {
            if let Some((start, end)) = scan(&out).last_string {
                if end == out.len() {
                    let before = out[..start].trim_end();
                    if before.ends_with('{') || before.ends_with(',') {
                        out.truncate(start);
                        continue;
                    }
                }
            }
        }
        break;
    }

    for opener in scan(&out).stack.into_iter().rev() {
        out.push(if opener == '{' { '}' } else { ']' });
    }
    out
}

struct ScanState {
    in_string: bool,
    stack: Vec<char>,
    /// Byte range of the most recent complete string literal, quotes
    /// included.
    last_string: Option<(usize, usize)>,
}

fn scan(input: &str) -> ScanState {
    let mut in_string = false;
    let mut escaped = false;
    let mut stack = Vec::new();
    let mut string_start = 0usize;
    let mut last_string = None;

    for (pos, ch) in input.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
                last_string = Some((string_start, pos + 1));
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                string_start = pos;
            }
            '{' | '[' => stack.push(ch),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    ScanState {
        in_string,
        stack,
        last_string,
    }
}

lazy_static! {
    static ref TOP_PAIR: Regex = Regex::new(
        r#""([A-Za-z_][A-Za-z0-9_]*)"\s*:\s*("(?:[^"\\]|\\.)*"|-?\d+(?:\.\d+)?|true|false|null)"#
    )
    .unwrap();
}

/// Last-resort extraction: collect every recognizable top-level
/// `"key": value` pair into an object.
pub fn extract_top_level_pairs(input: &str) -> Map<String, Value> {
    let mut map = Map::new();
    for captures in TOP_PAIR.captures_iter(input) {
        if let Ok(value) = serde_json::from_str::<Value>(&captures[2]) {
            map.entry(captures[1].to_string()).or_insert(value);
        }
    }
    map
}
