//! Resolved result rows and their encoding for `COPY ... FROM STDIN`.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;

/// A column of the results table that a resolved row can fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Column {
    #[serde(rename = "personid")]
    PersonId,
    #[serde(rename = "qt")]
    QueryType,
    #[serde(rename = "se")]
    System,
    #[serde(rename = "url")]
    Url,
    #[serde(rename = "title")]
    Title,
    #[serde(rename = "snippet")]
    Snippet,
    #[serde(rename = "hostid")]
    HostId,
}

impl Column {
    /// The full layout of `new_results_full`.
    pub const ALL: [Column; 7] = [
        Column::PersonId,
        Column::QueryType,
        Column::System,
        Column::Url,
        Column::Title,
        Column::Snippet,
        Column::HostId,
    ];

    pub fn sql_name(self) -> &'static str {
        match self {
            Column::PersonId => "personid",
            Column::QueryType => "qt",
            Column::System => "se",
            Column::Url => "url",
            Column::Title => "title",
            Column::Snippet => "snippet",
            Column::HostId => "hostid",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

impl FromStr for Column {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Column::ALL
            .into_iter()
            .find(|c| c.sql_name() == s.trim())
            .ok_or_else(|| ConfigError::UnknownColumn(s.to_string()))
    }
}

/// Parse a comma-separated column list such as `personid,qt,se,url`.
pub fn parse_columns(list: &str) -> Result<Vec<Column>, ConfigError> {
    list.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// One value headed for the bulk-copy stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyValue<'a> {
    Int(i64),
    Text(&'a str),
    Null,
}

/// A record with every foreign key resolved. Borrows text from the input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRow<'a> {
    pub person_id: i64,
    pub query_type: i32,
    pub system: i32,
    pub url: &'a str,
    pub title: Option<&'a str>,
    pub snippet: Option<&'a str>,
    pub host_id: Option<i64>,
}

impl<'a> ResolvedRow<'a> {
    pub fn value(&self, column: Column) -> CopyValue<'a> {
        match column {
            Column::PersonId => CopyValue::Int(self.person_id),
            Column::QueryType => CopyValue::Int(i64::from(self.query_type)),
            Column::System => CopyValue::Int(i64::from(self.system)),
            Column::Url => CopyValue::Text(self.url),
            Column::Title => self.title.map_or(CopyValue::Null, CopyValue::Text),
            Column::Snippet => self.snippet.map_or(CopyValue::Null, CopyValue::Text),
            Column::HostId => self.host_id.map_or(CopyValue::Null, CopyValue::Int),
        }
    }

    /// Values in the order of `columns`.
    pub fn values(&self, columns: &[Column]) -> Vec<CopyValue<'a>> {
        columns.iter().map(|c| self.value(*c)).collect()
    }
}

/// Append one row in Postgres text COPY format (tab-separated, `\N` for
/// NULL, newline-terminated). On error `out` is left as it was.
pub fn encode_row(values: &[CopyValue<'_>], out: &mut Vec<u8>) -> Result<(), String> {
    let start = out.len();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push(b'\t');
        }
        match value {
            CopyValue::Int(n) => out.extend_from_slice(n.to_string().as_bytes()),
            CopyValue::Null => out.extend_from_slice(b"\\N"),
            CopyValue::Text(s) => {
                if s.contains('\0') {
                    out.truncate(start);
                    return Err(format!("column {} contains a NUL byte", i + 1));
                }
                escape_into(s, out);
            }
        }
    }
    out.push(b'\n');
    Ok(())
}

fn escape_into(s: &str, out: &mut Vec<u8>) {
    for b in s.bytes() {
        match b {
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            _ => out.push(b),
        }
    }
}
