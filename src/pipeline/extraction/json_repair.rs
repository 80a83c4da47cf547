//! Heuristic repair of almost-JSON returned by vision models.
//!
//! `repair` applies an ordered list of independent text rewrites. It is not
//! a recovering parser: the output may still fail to parse and callers must
//! handle that. Rules that look at structure (`,` `{` `:`) skip over string
//! literals so valid JSON passes through unchanged.

use serde_json::{Map, Value};

const FENCE: &str = "```";

/// A single text rewrite rule.
type RepairRule = fn(&str) -> String;

/// Rules in application order.
const RULES: &[(&str, RepairRule)] = &[
    ("strip_code_fences", strip_code_fences),
    ("extract_outer_object", extract_outer_object),
    ("remove_trailing_commas", remove_trailing_commas),
    ("quote_bare_keys", quote_bare_keys),
    ("single_to_double_quotes", single_to_double_quotes),
];

/// Best-effort normalization of broken JSON text.
pub fn repair(text: &str) -> String {
    let mut current = text.to_string();
    for &(name, rule) in RULES {
        let next = rule(&current);
        if next != current {
            tracing::trace!(rule = name, "JSON repair rule applied");
        }
        current = next;
    }
    current
}

/// Parse `text` and accept it only if the top level is a JSON object.
pub fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Rule 1: drop markdown code-fence markers (with an optional `json` tag)
/// outside string literals.
pub fn strip_code_fences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut scanner = StringScanner::default();
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if scanner.step(c) && rest.starts_with(FENCE) {
            rest = rest[FENCE.len()..].trim_start_matches([' ', '\t']);
            if rest.get(..4).is_some_and(|tag| tag.eq_ignore_ascii_case("json")) {
                rest = &rest[4..];
            }
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out.trim().to_string()
}

/// Rule 2: when prose surrounds the payload, keep the span from the first
/// `{` to the last `}`.
pub fn extract_outer_object(text: &str) -> String {
    let trimmed = text.trim();
    let is_bare_object = trimmed.starts_with('{') && trimmed.ends_with('}');
    let is_bare_array = trimmed.starts_with('[') && trimmed.ends_with(']');
    if is_bare_object || is_bare_array {
        return trimmed.to_string();
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => trimmed[start..=end].to_string(),
        _ => trimmed.to_string(),
    }
}

/// Rule 3: remove commas directly followed (modulo whitespace) by `}` or `]`.
pub fn remove_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut scanner = StringScanner::default();

    for (i, &c) in chars.iter().enumerate() {
        if scanner.step(c) && c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Rule 4: quote object keys written as bare identifiers.
pub fn quote_bare_keys(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut scanner = StringScanner::default();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        out.push(c);
        i += 1;

        if !scanner.step(c) || !matches!(c, '{' | ',') {
            continue;
        }

        // Copy whitespace, then look for `identifier <ws> :`
        while i < chars.len() && chars[i].is_whitespace() {
            out.push(chars[i]);
            i += 1;
        }
        if i >= chars.len() || !(chars[i].is_ascii_alphabetic() || chars[i] == '_') {
            continue;
        }

        let ident_start = i;
        let mut j = i;
        while j < chars.len() && (chars[j].is_ascii_alphanumeric() || chars[j] == '_') {
            j += 1;
        }
        let mut k = j;
        while k < chars.len() && chars[k].is_whitespace() {
            k += 1;
        }
        if k < chars.len() && chars[k] == ':' {
            out.push('"');
            out.extend(&chars[ident_start..j]);
            out.push('"');
            i = j;
        }
    }
    out
}

/// Rule 5: if the text uses only single quotes, switch them all to double
/// quotes. Skipped whenever a double quote is present so apostrophes inside
/// proper strings survive.
pub fn single_to_double_quotes(text: &str) -> String {
    if !text.contains('"') && text.contains('\'') {
        text.replace('\'', "\"")
    } else {
        text.to_string()
    }
}

/// Return the balanced `{ ... }` span starting at byte offset `start`
/// (which must point at `{`). String literals are skipped.
pub fn balanced_object_at(text: &str, start: usize) -> Option<&str> {
    let tail = text.get(start..)?;
    if !tail.starts_with('{') {
        return None;
    }

    let mut depth = 0usize;
    let mut scanner = StringScanner::default();
    for (offset, c) in tail.char_indices() {
        if !scanner.step(c) {
            continue;
        }
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&tail[..offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Tracks whether the scan position is inside a double-quoted literal.
#[derive(Default)]
struct StringScanner {
    in_string: bool,
    escaped: bool,
}

impl StringScanner {
    /// Feed one character. Returns `true` when `c` is structural, i.e. not
    /// part of a string literal (opening/closing quotes count as literal).
    fn step(&mut self, c: char) -> bool {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' {
                self.escaped = true;
            } else if c == '"' {
                self.in_string = false;
            }
            false
        } else if c == '"' {
            self.in_string = true;
            false
        } else {
            true
        }
    }
}
