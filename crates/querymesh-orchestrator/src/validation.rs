//! Structural checks on generated queries.
//!
//! This is not a SQL parser. It rejects the shapes a language model produces
//! when it truncates, rambles, or mangles identifiers, so the scheduler can
//! ask for another attempt before anything is executed.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Longest query accepted, in characters.
pub const MAX_ARTIFACT_LEN: usize = 10_000;

const LEADING_KEYWORDS: [&str; 2] = ["SELECT", "WITH"];

static IDENTIFIER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").ok());

/// Why a generated query was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationIssue {
    /// Nothing left once comments are stripped.
    #[error("query is empty")]
    Empty,
    /// First word is not a read-only query keyword.
    #[error("query must start with SELECT or WITH")]
    LeadingKeyword,
    /// An opening or closing delimiter without its partner.
    #[error("unbalanced '{0}'")]
    Unbalanced(char),
    /// A backtick identifier with characters outside `[A-Za-z0-9_.-]`.
    #[error("invalid quoted identifier `{0}`")]
    BadIdentifier(String),
    /// Ends in an operator, comma or dangling keyword.
    #[error("query looks truncated (ends with '{0}')")]
    Truncated(String),
    /// Character count over [`MAX_ARTIFACT_LEN`].
    #[error("query is {0} characters long (max 10000)")]
    TooLong(usize),
}

/// Check a generated query. Returns the first problem found.
pub fn validate_artifact(sql: &str) -> Result<(), ValidationIssue> {
    let len = sql.chars().count();
    if len > MAX_ARTIFACT_LEN {
        return Err(ValidationIssue::TooLong(len));
    }

    let body = strip_comments(sql);
    let body = body.trim();
    if body.is_empty() {
        return Err(ValidationIssue::Empty);
    }

    let first_word: String = body
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();
    if !LEADING_KEYWORDS.contains(&first_word.as_str()) {
        return Err(ValidationIssue::LeadingKeyword);
    }

    check_brackets(body)?;
    check_trailing(body)?;
    Ok(())
}

/// Remove `--` and `/* */` comments that are outside string literals.
fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' && q != '`' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                out.push(c);
            }
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Balanced `()` and `[]` outside literals, closed quotes, and well-formed
/// backtick identifiers. A backslash inside a string literal escapes the next
/// character.
fn check_brackets(sql: &str) -> Result<(), ValidationIssue> {
    let mut stack: Vec<char> = Vec::new();
    let mut quote: Option<char> = None;
    let mut identifier = String::new();

    let mut chars = sql.chars();
    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == '\\' && q != '`' {
                chars.next();
            } else if c == q {
                if q == '`' {
                    check_identifier(&identifier)?;
                    identifier.clear();
                }
                quote = None;
            } else if q == '`' {
                identifier.push(c);
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '(' | '[' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    return Err(ValidationIssue::Unbalanced(')'));
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return Err(ValidationIssue::Unbalanced(']'));
                }
            }
            _ => {}
        }
    }

    if let Some(q) = quote {
        return Err(ValidationIssue::Unbalanced(q));
    }
    match stack.pop() {
        Some(open) => Err(ValidationIssue::Unbalanced(open)),
        None => Ok(()),
    }
}

fn check_identifier(identifier: &str) -> Result<(), ValidationIssue> {
    let valid = match IDENTIFIER.as_ref() {
        Some(re) => re.is_match(identifier),
        None => !identifier.is_empty(),
    };
    if valid {
        Ok(())
    } else {
        Err(ValidationIssue::BadIdentifier(identifier.to_string()))
    }
}

fn check_trailing(sql: &str) -> Result<(), ValidationIssue> {
    let body = sql.trim_end().trim_end_matches(';').trim_end();
    if let Some(last) = body.chars().last() {
        if matches!(last, ',' | '+' | '-' | '/' | '=' | '<' | '>' | '|') {
            return Err(ValidationIssue::Truncated(last.to_string()));
        }
    }
    let last_word = body
        .rsplit(|c: char| c.is_whitespace())
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    if matches!(
        last_word.as_str(),
        "AND" | "OR" | "WHERE" | "FROM" | "JOIN" | "ON" | "BY" | "SELECT"
    ) {
        return Err(ValidationIssue::Truncated(last_word));
    }
    Ok(())
}
