use std::collections::HashMap;

use crate::directory::DirectoryError;

/// One `key=value` group of a ServerQuery reply. Bare keys map to an empty value.
pub type Record = HashMap<String, String>;

/// Event name of the client-join notification.
pub const CLIENT_ENTER_VIEW: &str = "notifycliententerview";

/// A ServerQuery command line.
///
/// Wire format: `command [key=value...] [-flag...]\n`
///
/// Examples:
///   `login client_login_name=serveradmin client_login_password=secret`
///   `clientpoke clid=5 msg=Hello\sthere`
///   `clientlist -groups`
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCommand {
    pub name: String,
    pub args: Vec<(String, String)>,
    pub flags: Vec<String>,
}

impl QueryCommand {
    pub fn new(name: &str) -> Self {
        QueryCommand {
            name: name.to_string(),
            args: Vec::new(),
            flags: Vec::new(),
        }
    }

    pub fn arg(mut self, key: &str, value: impl ToString) -> Self {
        self.args.push((key.to_string(), value.to_string()));
        self
    }

    pub fn flag(mut self, flag: &str) -> Self {
        self.flags.push(flag.to_string());
        self
    }

    /// Format this command to wire format (without trailing \n).
    /// Values are escaped, so user content cannot inject a second command.
    pub fn format(&self) -> String {
        let mut out = String::with_capacity(64);
        out.push_str(&self.name);

        for (key, value) in &self.args {
            out.push(' ');
            out.push_str(key);
            out.push('=');
            out.push_str(&escape(value));
        }

        for flag in &self.flags {
            out.push_str(" -");
            out.push_str(flag);
        }

        out
    }
}

/// The status line that terminates every command reply: `error id=0 msg=ok`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryStatus {
    pub id: u32,
    pub message: String,
}

impl QueryStatus {
    pub fn is_status_line(line: &str) -> bool {
        line.starts_with("error ")
    }

    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let rest = line
            .strip_prefix("error ")
            .ok_or(ParseError::NotAStatusLine)?;
        let record = parse_record(rest);
        Ok(QueryStatus {
            id: numeric_field(&record, "id")?,
            message: record.get("msg").cloned().unwrap_or_default(),
        })
    }

    pub fn is_ok(&self) -> bool {
        self.id == 0
    }
}

/// A server-pushed line such as `notifycliententerview clid=5 ...|clid=6 ...`.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub event: String,
    pub records: Vec<Record>,
}

impl Notification {
    pub fn is_notification(line: &str) -> bool {
        line.starts_with("notify")
    }

    pub fn parse(line: &str) -> Result<Self, ParseError> {
        if line.is_empty() {
            return Err(ParseError::Empty);
        }
        let (event, rest) = line.split_once(' ').unwrap_or((line, ""));
        Ok(Notification {
            event: event.to_string(),
            records: parse_records(rest),
        })
    }
}

/// Split a data line into its `|`-separated records.
pub fn parse_records(line: &str) -> Vec<Record> {
    if line.trim().is_empty() {
        return Vec::new();
    }
    line.split('|').map(parse_record).collect()
}

fn parse_record(segment: &str) -> Record {
    segment
        .split(' ')
        .filter(|token| !token.is_empty())
        .map(|token| match token.split_once('=') {
            Some((key, value)) => (key.to_string(), unescape(value)),
            None => (token.to_string(), String::new()),
        })
        .collect()
}

pub fn field<'a>(record: &'a Record, key: &'static str) -> Result<&'a str, ParseError> {
    record
        .get(key)
        .map(String::as_str)
        .ok_or(ParseError::MissingField(key))
}

pub fn numeric_field(record: &Record, key: &'static str) -> Result<u32, ParseError> {
    let raw = field(record, key)?;
    raw.parse().map_err(|_| ParseError::InvalidNumber {
        field: key,
        value: raw.to_string(),
    })
}

pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '/' => out.push_str("\\/"),
            ' ' => out.push_str("\\s"),
            '|' => out.push_str("\\p"),
            '\x07' => out.push_str("\\a"),
            '\x08' => out.push_str("\\b"),
            '\x0c' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x0b' => out.push_str("\\v"),
            _ => out.push(c),
        }
    }
    out
}

pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('s') => out.push(' '),
            Some('p') => out.push('|'),
            Some('a') => out.push('\x07'),
            Some('b') => out.push('\x08'),
            Some('f') => out.push('\x0c'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('v') => out.push('\x0b'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[derive(Debug, PartialEq)]
pub enum ParseError {
    Empty,
    NotAStatusLine,
    MissingField(&'static str),
    InvalidNumber { field: &'static str, value: String },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Empty => write!(f, "empty line"),
            ParseError::NotAStatusLine => write!(f, "not a status line"),
            ParseError::MissingField(key) => write!(f, "missing field {}", key),
            ParseError::InvalidNumber { field, value } => {
                write!(f, "field {} is not a number: {}", field, value)
            }
        }
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for DirectoryError {
    fn from(e: ParseError) -> Self {
        DirectoryError::Protocol(e.to_string())
    }
}
