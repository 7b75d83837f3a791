use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use thiserror::Error;

static SELECT_CLAUSE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\bSELECT\s+(.*?)\s+FROM\b").unwrap()
});

static SET_QUANTIFIER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:DISTINCT|ALL)\s+").unwrap()
});

const SKIPPED_WORDS: [&str; 4] = ["NULL", "TRUE", "FALSE", "CASE"];

/// columns referenced by a query's projection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSelection {
    Wildcard,
    Columns(BTreeSet<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ParseError(pub String);

/// seam between the validator and however columns get pulled out of sql
pub trait ColumnExtractor: Send + Sync {
    fn extract_columns(&self, query: &str) -> Result<ColumnSelection, ParseError>;
}

/// tolerant pattern match over the `SELECT ... FROM` clause
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternColumnExtractor;

impl ColumnExtractor for PatternColumnExtractor {
    fn extract_columns(&self, query: &str) -> Result<ColumnSelection, ParseError> {
        let clause = SELECT_CLAUSE_REGEX
            .captures(query)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .ok_or_else(|| ParseError("Could not parse SELECT clause".to_string()))?;

        if clause == "*" {
            return Ok(ColumnSelection::Wildcard);
        }

        let columns = split_top_level(clause)
            .into_iter()
            .filter_map(reduce_expression)
            .collect();

        Ok(ColumnSelection::Columns(columns))
    }
}

/// split on commas outside parentheses and quotes
fn split_top_level(clause: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (idx, ch) in clause.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"' | '`') => quote = Some(ch),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(&clause[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&clause[start..]);
    parts
}

/// `name(args...)` -> `args...` when the call starts the expression
fn unwrap_call(expr: &str) -> Option<&str> {
    let open = expr.find('(')?;
    let head = expr[..open].trim_end();
    if head.is_empty() || !head.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }

    let mut depth = 0usize;
    for (idx, ch) in expr[open..].char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&expr[open + 1..open + idx]);
                }
            }
            _ => {}
        }
    }
    None
}

/// reduce one projection item to the identifier it reads, if any
fn reduce_expression(item: &str) -> Option<String> {
    let mut expr = item.trim();

    loop {
        expr = SET_QUANTIFIER_REGEX
            .find(expr)
            .map(|m| &expr[m.end()..])
            .unwrap_or(expr)
            .trim();

        match unwrap_call(expr) {
            // first argument carries the column: ROUND(prep_time, 1)
            Some(inner) => expr = split_top_level(inner)[0].trim(),
            None => break,
        }
    }

    // string literal
    if expr.starts_with('\'') {
        return None;
    }

    let token = expr.split_whitespace().next()?;
    let token: String = token
        .chars()
        .take_while(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '"' | '`' | '[' | ']' | '*'))
        .collect();

    let token = token.rsplit('.').next().unwrap_or("");
    let token = token.trim_matches(|c| matches!(c, '"' | '`' | '[' | ']'));

    if token.is_empty()
        || token == "*"
        || token.parse::<f64>().is_ok()
        || SKIPPED_WORDS.iter().any(|w| w.eq_ignore_ascii_case(token))
    {
        return None;
    }

    Some(token.to_string())
}
