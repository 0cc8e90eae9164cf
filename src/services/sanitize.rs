//! Best-effort cleanup of near-JSON model output.
//!
//! The output is not guaranteed to be valid JSON; the rules only improve the
//! odds for the strict parser. Output that already is a JSON array is left
//! alone, and text that does not look like one (for instance a markdown bullet
//! list) passes through untouched so the fallback parser still sees it.

use log::debug;
use regex::Regex;
use std::sync::LazyLock;

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)(?:```|$)").unwrap());
static ARRAY_OPENER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[\s*\{").unwrap());
static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",(\s*[\]}])").unwrap());

/// A named text transformation.
#[derive(Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub apply: fn(&str) -> String,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// Ordered list of rules applied one after the other.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    rules: Vec<Rule>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self {
            rules: vec![
                Rule { name: "strip_code_fences", apply: strip_code_fences },
                Rule { name: "normalize_quotes", apply: normalize_quotes },
                Rule { name: "restore_primer", apply: restore_primer },
                Rule { name: "trim_to_array", apply: trim_to_array },
                Rule { name: "remove_trailing_commas", apply: remove_trailing_commas },
                Rule { name: "trim", apply: |s| s.trim().to_string() },
            ],
        }
    }
}

impl Sanitizer {
    pub fn with_rule(mut self, name: &'static str, apply: fn(&str) -> String) -> Self {
        self.rules.push(Rule { name, apply });
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name).collect()
    }

    /// Runs the rules in order, stopping as soon as the text is a JSON array.
    pub fn sanitize(&self, raw: &str) -> String {
        let mut text = raw.trim().to_string();
        for rule in &self.rules {
            if is_json_array(&text) {
                break;
            }
            let next = (rule.apply)(&text);
            if next != text {
                debug!("sanitizer rule {} rewrote the model output", rule.name);
            }
            text = next;
        }
        text
    }
}

/// Keeps the body of the first fenced block, if any.
pub fn strip_code_fences(s: &str) -> String {
    match FENCED_BLOCK.captures(s) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()).trim().to_string(),
        None => s.to_string(),
    }
}

fn is_json_array(s: &str) -> bool {
    matches!(serde_json::from_str::<serde_json::Value>(s.trim()), Ok(serde_json::Value::Array(_)))
}

/// Replaces typographic double quotes standing where JSON expects a `"`.
///
/// A quote counts as structural when it follows `{ [ : ,` (or starts the text)
/// or precedes `: , } ]`. Quotes inside a value are left as written.
pub fn normalize_quotes(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    chars
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            if !matches!(c, '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}') {
                return c;
            }
            let before = chars[..i].iter().rev().find(|c| !c.is_whitespace());
            let after = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            let opens = before.is_none_or(|c| matches!(c, '{' | '[' | ':' | ','));
            let closes = after.is_some_and(|c| matches!(c, ':' | ',' | '}' | ']'));
            if opens || closes {
                '"'
            } else {
                c
            }
        })
        .collect()
}

/// The prompt ends in `[{`, so a raw continuation starts inside the first object.
pub fn restore_primer(s: &str) -> String {
    let trimmed = s.trim_start();
    if trimmed.starts_with('"') {
        format!("[{{{}", trimmed)
    } else if trimmed.starts_with('{') {
        format!("[{}", trimmed)
    } else {
        s.to_string()
    }
}

/// Drops prose around the array; closes it when the model stopped early.
pub fn trim_to_array(s: &str) -> String {
    let Some(opener) = ARRAY_OPENER.find(s) else {
        return s.to_string();
    };
    let body = &s[opener.start()..];

    if let Some(end) = body.rfind(']') {
        return body[..=end].to_string();
    }
    match body.rfind('}') {
        Some(end) => format!("{}]", &body[..=end]),
        None => body.to_string(),
    }
}

pub fn remove_trailing_commas(s: &str) -> String {
    if !s.trim_start().starts_with('[') {
        return s.to_string();
    }
    TRAILING_COMMA.replace_all(s, "$1").into_owned()
}
