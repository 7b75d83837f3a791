use once_cell::sync::Lazy;
use regex::Regex;

static FENCE_OPEN_REGEX: Lazy<Regex> = Lazy::new(|| {
    // a tag is a known sql name, or any word alone on the opener line
    Regex::new(r"(?i)^```(?:[ \t]*(?:sqlite|sql)\b|[a-z0-9_+-]*[ \t]*(?:\r?\n|$))?").unwrap()
});

static FENCE_CLOSE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s*```\s*$").unwrap()
});

static LANGUAGE_PREFIX_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:sqlite|sql)\b[ \t]*:?\s*").unwrap()
});

static SELECT_START_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^select\b").unwrap()
});

static SELECT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bselect\b").unwrap()
});

/// recover a bare sql statement from oracle output.
///
/// never fails: whatever is left after cleanup is returned, possibly empty,
/// and the validator decides whether it is usable. cleanup repeats until the
/// text stops changing, so sanitizing a sanitized query is a no-op.
pub fn sanitize_query(raw: &str) -> String {
    let mut text = raw.trim().to_string();
    loop {
        let next = strip_once(&text);
        // every pass only removes text
        if next == text {
            return text;
        }
        text = next;
    }
}

fn strip_once(text: &str) -> String {
    let text = text.trim();

    // fenced block opener, with or without a language tag
    let text = FENCE_OPEN_REGEX.replace(text, "");

    let text = FENCE_CLOSE_REGEX.replace(&text, "");

    // restated language name, e.g. "sql SELECT ..."
    let text = LANGUAGE_PREFIX_REGEX.replace(&text, "");

    let text = text.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    let text = text.trim_start();

    // drop commentary in front of the statement
    let text = if SELECT_START_REGEX.is_match(text) {
        text
    } else {
        match SELECT_REGEX.find(text) {
            Some(mat) => &text[mat.start()..],
            None => text,
        }
    };

    text.trim().to_string()
}
