//! Query planning: ask the model for research angles, parse leniently.

use crate::{ChatTurn, LanguageModel, Result};

pub fn planning_turns(target: &str, count: usize) -> Vec<ChatTurn> {
    vec![ChatTurn::user(format!(
        "Generate a list of exactly {count} distinct market research queries for deep due \
         diligence on: {target}. Return ONLY the list, formatted as a JSON array of strings."
    ))]
}

/// The deterministic plan used whenever the model's answer is unusable.
pub fn fallback_queries(target: &str) -> Vec<String> {
    vec![format!("{target} analysis"), format!("{target} competitors")]
}

/// Ask the model for `count` research queries.
///
/// Only a model failure is an error; any malformed answer falls back to
/// [`fallback_queries`].
pub async fn plan_queries(
    llm: &dyn LanguageModel,
    target: &str,
    count: usize,
) -> Result<Vec<String>> {
    let raw = llm.generate(&planning_turns(target, count)).await?;
    let queries = parse_planned_queries(&raw, target, count);
    tracing::info!(target_subject = target, planned = queries.len(), "queries planned");
    Ok(queries)
}

/// Decode the first bracketed list in `text` into exactly `count` queries.
///
/// Returns the fallback plan when no list is found, it does not decode as a
/// list of strings, or it yields fewer than `count` non-empty entries. Extra
/// entries beyond `count` are dropped.
pub fn parse_planned_queries(text: &str, target: &str, count: usize) -> Vec<String> {
    let Some(items) = bracketed_slice(text).and_then(decode_string_list) else {
        tracing::warn!("planner answer has no decodable list; using fallback queries");
        return fallback_queries(target);
    };
    let queries: Vec<String> = items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .take(count)
        .collect();
    if queries.len() != count {
        tracing::warn!(
            got = queries.len(),
            want = count,
            "planner answer has the wrong cardinality; using fallback queries"
        );
        return fallback_queries(target);
    }
    queries
}

/// From the first `[` to the last `]`, inclusive.
fn bracketed_slice(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

fn decode_string_list(s: &str) -> Option<Vec<String>> {
    if let Ok(v) = serde_json::from_str::<Vec<String>>(s) {
        return Some(v);
    }
    decode_literal_list(s)
}

/// Accepts list literals with single- or double-quoted strings and an
/// optional trailing comma, e.g. `['a', "b",]`.
fn decode_literal_list(s: &str) -> Option<Vec<String>> {
    let mut chars = s.chars().peekable();
    let mut out = Vec::new();
    if chars.next()? != '[' {
        return None;
    }
    loop {
        skip_ws(&mut chars);
        match chars.next()? {
            ']' => break,
            q @ ('\'' | '"') => out.push(read_quoted(&mut chars, q)?),
            _ => return None,
        }
        skip_ws(&mut chars);
        match chars.next()? {
            ',' => continue,
            ']' => break,
            _ => return None,
        }
    }
    skip_ws(&mut chars);
    chars.next().is_none().then_some(out)
}

type Cursor<'a> = std::iter::Peekable<std::str::Chars<'a>>;

fn skip_ws(chars: &mut Cursor<'_>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

fn read_quoted(chars: &mut Cursor<'_>, quote: char) -> Option<String> {
    let mut out = String::new();
    loop {
        match chars.next()? {
            '\\' => match chars.next()? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                other => out.push(other),
            },
            c if c == quote => return Some(out),
            c => out.push(c),
        }
    }
}
