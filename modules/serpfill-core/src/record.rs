//! Splitting raw result lines into fields.
//!
//! Line layout: `<actor tokens> <type tag>`, system tag, URL, then an
//! optional title and an optional snippet. Only the first four slots are
//! positional; the snippet keeps everything after the fourth separator, so
//! free text that happens to contain the separator survives untouched.

use crate::error::RecordError;

/// Fewest fields a usable line can have: key, system tag, URL.
pub const MIN_FIELDS: usize = 3;

/// Slots in the target layout. Extra separators fold into the last one.
pub const MAX_FIELDS: usize = 5;

/// Field 0 of a record, split into the actor name and its type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorKey {
    /// Lowercased, trimmed actor name. Empty when the key had a single token.
    pub name: String,
    pub type_tag: String,
}

/// A line split into its semantic fields. Borrows from the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRecord<'a> {
    pub key: &'a str,
    pub system: &'a str,
    pub url: &'a str,
    pub title: Option<&'a str>,
    pub snippet: Option<&'a str>,
    /// The raw line had more than `MAX_FIELDS` fields.
    pub over_length: bool,
}

/// Split an actor key on single spaces: the last token is the type tag,
/// the rest is the actor name.
pub fn parse_actor_key(field: &str) -> ActorKey {
    match field.rsplit_once(' ') {
        Some((name, tag)) => ActorKey {
            name: name.trim().to_lowercase(),
            type_tag: tag.to_string(),
        },
        None => ActorKey {
            name: String::new(),
            type_tag: field.to_string(),
        },
    }
}

/// Split `line` on `separator` into at most `MAX_FIELDS` slots.
pub fn parse_line<'a>(line: &'a str, separator: &str) -> Result<ParsedRecord<'a>, RecordError> {
    let mut fields = line.splitn(MAX_FIELDS, separator);

    let key = fields.next().unwrap_or_default();
    let (system, url) = match (fields.next(), fields.next()) {
        (Some(system), Some(url)) => (system, url),
        (system, _) => {
            return Err(RecordError::TooFewFields {
                expected: MIN_FIELDS,
                found: 1 + usize::from(system.is_some()),
            })
        }
    };
    let title = fields.next();
    let snippet = fields.next();

    Ok(ParsedRecord {
        key,
        system,
        url,
        title,
        snippet,
        over_length: snippet.is_some_and(|s| s.contains(separator)),
    })
}

/// Decode one raw line. Trailing `\n` / `\r\n` are stripped first.
pub fn decode_line(raw: &[u8]) -> Result<&str, RecordError> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    std::str::from_utf8(raw).map_err(|_| RecordError::InvalidUtf8)
}
