//! Remote file naming scheme
//!
//! Remote documents are named `<business key>_<version>[ <description>].<ext>`,
//! for example `PHKIT_3 assembly guide.docx`. This module splits such names
//! into their parts and orders version tokens.
//!
//! # Version ordering
//!
//! [`compare_versions`] is not a magnitude order across token
//! families. The only cross-family guarantee is that a purely numeric token
//! beats a purely alphabetic one (`1` is newer than `z`), which is how draft
//! revisions (`a`, `b`, ...) give way to released ones (`1`, `2`, ...). Two
//! numeric tokens compare as integers; anything else compares as
//! case-insensitive strings.

use std::cmp::Ordering;

/// Separator between the business key and the version token
pub const KEY_SEPARATOR: char = '_';

/// Separator between the version token and the free-text description
pub const DESCRIPTION_SEPARATOR: char = ' ';

/// A remote name split into its scheme parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub business_key: String,
    pub version: String,
}

/// Split `name` into business key and version token
///
/// The business key is everything before the first `_` (the whole name when
/// there is none). The version token is the stem's second `_`-delimited field,
/// cut at the first space; it is empty when the name carries no version.
pub fn parse(name: &str) -> ParsedName {
    ParsedName {
        business_key: business_key(name).to_string(),
        version: version_token(name).to_string(),
    }
}

pub fn business_key(name: &str) -> &str {
    name.split(KEY_SEPARATOR).next().unwrap_or(name)
}

pub fn version_token(name: &str) -> &str {
    stem(name)
        .split(KEY_SEPARATOR)
        .nth(1)
        .and_then(|field| field.split(DESCRIPTION_SEPARATOR).next())
        .unwrap_or("")
}

/// File name without its final extension
///
/// A leading dot does not start an extension (`.profile` is all stem).
pub fn stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

/// Final extension without the dot, if any
pub fn extension(name: &str) -> Option<&str> {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => Some(&name[idx + 1..]),
        _ => None,
    }
}

/// Replace (or add) the extension of `name`
pub fn with_extension(name: &str, ext: &str) -> String {
    format!("{}.{}", stem(name), ext)
}

/// Human description stored next to a file
///
/// Everything after the first space of the stem; names without a description
/// part use the whole stem.
pub fn describe(title: &str) -> String {
    let stem = stem(title);
    match stem.split_once(DESCRIPTION_SEPARATOR) {
        Some((_, rest)) => rest.to_string(),
        None => stem.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Numeric,
    Alphabetic,
    Other,
}

fn kind(token: &str) -> TokenKind {
    if token.is_empty() {
        TokenKind::Other
    } else if token.chars().all(|c| c.is_ascii_digit()) {
        TokenKind::Numeric
    } else if token.chars().all(char::is_alphabetic) {
        TokenKind::Alphabetic
    } else {
        TokenKind::Other
    }
}

/// Integer comparison of two digit strings of any length
fn compare_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Order two version tokens
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (kind(a), kind(b)) {
        (TokenKind::Numeric, TokenKind::Alphabetic) => Ordering::Greater,
        (TokenKind::Alphabetic, TokenKind::Numeric) => Ordering::Less,
        (TokenKind::Numeric, TokenKind::Numeric) => compare_digits(a, b),
        _ => a.to_lowercase().cmp(&b.to_lowercase()),
    }
}

/// Whether the remote file carries a strictly newer version than the stored one
pub fn is_newer(stored_name: &str, remote_name: &str) -> bool {
    compare_versions(version_token(remote_name), version_token(stored_name)) == Ordering::Greater
}
