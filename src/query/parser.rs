//! Translates user search syntax into the index engine's query syntax
//!
//! Bare words become mandatory matches, `type:` expands to extension
//! disjunctions, `size:` is normalized to integer bytes, and
//! `modified:`/`updated:` keywords expand to absolute local-time ranges.
//! The only hard parse error is a malformed size filter; everything else
//! passes through as a best-effort literal.

use chrono::{DateTime, Duration, Local, NaiveDate, SecondsFormat, TimeZone};
use regex::{NoExpand, Regex};
use std::sync::LazyLock;
use thiserror::Error;

use super::scanner::{Scanner, TokenKind};

/// Extension disjunctions for `type:` filters
const AUDIO_EXTENSIONS: &str = "ext:wav ext:mp3 ext:ogg ext:flac";
const VIDEO_EXTENSIONS: &str = "ext:mp4 ext:mkv ext:avi ext:webm ext:mov";
const DOCUMENT_EXTENSIONS: &str = "ext:doc ext:docm ext:pdf ext:docx ext:odf ext:pages ext:rtf";
const IMAGE_EXTENSIONS: &str = "ext:jpg ext:jpeg ext:png ext:gif ext:tiff ext:eps ext:raw";
const EBOOK_EXTENSIONS: &str = "ext:fb2 ext:ibook ext:cbr ext:djvu ext:epub ext:mobi";

/// How far back `modified:recently` reaches, in days
const RECENTLY_DAYS: i64 = 15;

static SIZE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\+?size):([<>=]{0,2})(\d+)(b|kb|mb|gb|tb)?")
        .expect("size pattern is valid")
});

/// Errors returned by [`parse_query`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The size filter did not contain a usable number/unit pair
    #[error("invalid size '{0}' specified")]
    InvalidSize(String),
}

/// Parse a search query into engine syntax
pub fn parse_query(input: &str) -> Result<String, ParseError> {
    QueryParser::new(input).parse()
}

/// Query parser; consumes scanner tokens left to right
pub struct QueryParser<'a> {
    scanner: Scanner<'a>,
}

impl<'a> QueryParser<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            scanner: Scanner::new(input),
        }
    }

    /// Translate the whole input; clause order follows token order
    pub fn parse(mut self) -> Result<String, ParseError> {
        let mut clauses: Vec<String> = Vec::new();

        loop {
            let token = self.scanner.scan();
            match token.kind {
                TokenKind::Eof => break,
                TokenKind::Whitespace => continue,
                // Illegal characters still reach the engine as literals so
                // no part of the input silently disappears
                TokenKind::Ident | TokenKind::Illegal => {
                    clauses.push(mandatory(&token.literal));
                }
                TokenKind::Type => clauses.push(expand_type(&token.literal)),
                TokenKind::Size => clauses.push(normalize_size(&token.literal)?),
                TokenKind::Modified => {
                    clauses.push(expand_date(&token.literal, "modified", "mtime"));
                }
                TokenKind::Updated => {
                    clauses.push(expand_date(&token.literal, "updated", "updated"));
                }
            }
        }

        Ok(clauses.join(" "))
    }
}

/// Bare words are mandatory matches unless already marked
fn mandatory(literal: &str) -> String {
    if literal.starts_with('+') {
        literal.to_string()
    } else {
        format!("+{literal}")
    }
}

/// Expand a `type:` filter into its extension disjunction; unknown values
/// pass through unchanged
fn expand_type(literal: &str) -> String {
    let Some((_, value)) = literal.split_once(':') else {
        return literal.to_string();
    };

    match value.to_lowercase().as_str() {
        "audio" => AUDIO_EXTENSIONS.to_string(),
        "video" => VIDEO_EXTENSIONS.to_string(),
        "document" | "doc" => DOCUMENT_EXTENSIONS.to_string(),
        "image" => IMAGE_EXTENSIONS.to_string(),
        "ebook" => EBOOK_EXTENSIONS.to_string(),
        _ => literal.to_string(),
    }
}

/// Normalize a size filter to integer bytes, preserving the comparison
/// operator and any `+` prefix
fn normalize_size(literal: &str) -> Result<String, ParseError> {
    let Some(caps) = SIZE_PATTERN.captures(literal) else {
        return Err(ParseError::InvalidSize(literal.to_string()));
    };

    let field = &caps[1];
    let op = &caps[2];
    let digits = &caps[3];
    let unit = caps.get(4).map(|m| m.as_str()).unwrap_or("");

    let human = format!("{digits}{unit}");
    let bytes =
        size_in_bytes(digits, unit).ok_or_else(|| ParseError::InvalidSize(human.clone()))?;

    let normalized = format!("{field}:{op}{bytes}");
    Ok(SIZE_PATTERN
        .replace_all(literal, NoExpand(&normalized))
        .into_owned())
}

/// Binary-multiple size conversion; `None` on overflow or unknown unit
fn size_in_bytes(digits: &str, unit: &str) -> Option<u64> {
    let value: u64 = digits.parse().ok()?;
    let multiplier: u64 = match unit.to_lowercase().as_str() {
        "" | "b" => 1,
        "kb" => 1 << 10,
        "mb" => 1 << 20,
        "gb" => 1 << 30,
        "tb" => 1 << 40,
        _ => return None,
    };
    value.checked_mul(multiplier)
}

/// Expand `modified:`/`updated:` keywords into absolute local-time ranges
/// on the given engine field; unknown values pass through unchanged
fn expand_date(literal: &str, keyword: &str, field: &str) -> String {
    let today = Local::now().date_naive();
    let mut lit = literal.to_string();

    if contains_keyword(&lit, keyword, "today") {
        let bod = rfc3339_local(today, 0, 0, 0);
        let eod = rfc3339_local(today, 23, 59, 59);
        lit = format!("+{field}:>=\"{bod}\" +{field}:<=\"{eod}\"");
    }

    if contains_keyword(&lit, keyword, "recently") {
        let rdate = rfc3339_local(today - Duration::days(RECENTLY_DAYS), 0, 0, 0);
        lit = format!("+{field}:>=\"{rdate}\"");
    }

    if contains_keyword(&lit, keyword, "yesterday") {
        let yesterday = today - Duration::days(1);
        let bod = rfc3339_local(yesterday, 0, 0, 0);
        let eod = rfc3339_local(yesterday, 23, 59, 59);
        lit = format!("+{field}:>=\"{bod}\" +{field}:<=\"{eod}\"");
    }

    lit
}

fn contains_keyword(literal: &str, keyword: &str, value: &str) -> bool {
    literal.to_lowercase().contains(&format!("{keyword}:{value}"))
}

/// Format a local wall-clock time as RFC 3339 with second precision
fn rfc3339_local(date: NaiveDate, hour: u32, min: u32, sec: u32) -> String {
    local_day_time(date, hour, min, sec).to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn local_day_time(date: NaiveDate, hour: u32, min: u32, sec: u32) -> DateTime<Local> {
    let naive = date.and_hms_opt(hour, min, sec).expect("valid time");
    // A DST transition can make a wall-clock time ambiguous or skipped
    match Local.from_local_datetime(&naive).single() {
        Some(dt) => dt,
        None => Local
            .from_local_datetime(&naive)
            .earliest()
            .unwrap_or_else(Local::now),
    }
}
