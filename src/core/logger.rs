//! Session log store
//!
//! Append-only, ordered record of everything that happened on a session:
//! traffic in both directions, system notices and errors. Supports
//! bookmarks, filtered views, search and export to CSV/JSON/plain text.

use crate::core::codec;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Maximum characters in a bookmark preview
const PREVIEW_LEN: usize = 60;

/// Export format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExportFormat {
    /// Comma-separated values
    #[default]
    Csv,
    /// JSON array of entries
    Json,
    /// Plain text with a summary header
    PlainText,
}

impl ExportFormat {
    /// Get file extension for format
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::PlainText => "txt",
        }
    }

    /// Get all formats
    pub fn all() -> &'static [ExportFormat] {
        &[Self::Csv, Self::Json, Self::PlainText]
    }

    /// Get name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Csv => "CSV",
            Self::Json => "JSON",
            Self::PlainText => "Plain Text",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "txt" | "text" | "plain" => Ok(Self::PlainText),
            other => Err(format!("Unknown export format: {other}")),
        }
    }
}

/// Log export errors
#[derive(Debug, Error)]
pub enum ExportError {
    /// Failed to write the file
    #[error("Failed to write export: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize entries
    #[error("Failed to serialize export: {0}")]
    Json(#[from] serde_json::Error),
}

/// Entry direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Sent to the peer
    Tx,
    /// Received from the peer
    Rx,
    /// System notice
    Sys,
    /// Error
    Err,
}

impl Direction {
    /// Split a `[TX]`/`[RX]`/`[SYS]`/`[ERR]` prefix off a log line.
    ///
    /// Lines without a known prefix are system notices.
    pub fn parse_prefixed(line: &str) -> (Self, &str) {
        const PREFIXES: [(&str, Direction); 4] = [
            ("[RX]", Direction::Rx),
            ("[TX]", Direction::Tx),
            ("[SYS]", Direction::Sys),
            ("[ERR]", Direction::Err),
        ];

        for (prefix, direction) in PREFIXES {
            if let Some(rest) = line.strip_prefix(prefix) {
                return (direction, rest.strip_prefix(' ').unwrap_or(rest));
            }
        }

        (Direction::Sys, line)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tx => write!(f, "TX"),
            Self::Rx => write!(f, "RX"),
            Self::Sys => write!(f, "SYS"),
            Self::Err => write!(f, "ERR"),
        }
    }
}

/// A single log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// When the entry was appended
    pub timestamp: DateTime<Local>,
    /// Entry direction
    pub direction: Direction,
    /// Spaced hex of the payload (traffic entries only)
    pub hex_data: String,
    /// Annotated ASCII of the payload (traffic entries only)
    pub ascii_data: String,
    /// Free text
    pub message: String,
    /// Payload size
    pub byte_count: usize,
    /// Bookmark flag
    pub is_bookmarked: bool,
}

impl LogEntry {
    /// Create a text-only entry
    pub fn note(direction: Direction, message: &str) -> Self {
        Self {
            timestamp: Local::now(),
            direction,
            hex_data: String::new(),
            ascii_data: String::new(),
            message: message.to_string(),
            byte_count: 0,
            is_bookmarked: false,
        }
    }

    /// Create a traffic entry carrying a payload
    pub fn data(direction: Direction, data: &[u8], message: &str) -> Self {
        Self {
            timestamp: Local::now(),
            direction,
            hex_data: codec::bytes_to_spaced_hex(data),
            ascii_data: codec::bytes_to_macro_ascii(data),
            message: message.to_string(),
            byte_count: data.len(),
            is_bookmarked: false,
        }
    }

    /// Format as text
    pub fn to_text(&self) -> String {
        let mut line = format!(
            "[{}] [{}]",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.direction
        );
        if !self.message.is_empty() {
            line.push(' ');
            line.push_str(&self.message);
        }
        if !self.ascii_data.is_empty() {
            line.push_str(&format!(" | ASCII: {} | HEX: {}", self.ascii_data, self.hex_data));
        }
        line
    }

    /// Format as CSV line (quotes doubled)
    pub fn to_csv(&self) -> String {
        format!(
            "\"{}\",\"{}\",\"{}\",\"{}\",\"{}\",{},{}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.direction,
            csv_escape(&self.hex_data),
            csv_escape(&self.ascii_data),
            csv_escape(&self.message),
            self.byte_count,
            self.is_bookmarked
        )
    }

    /// CSV header matching [`LogEntry::to_csv`]
    pub fn csv_header() -> &'static str {
        "Timestamp,Direction,Hex,ASCII,Message,ByteCount,Bookmarked"
    }

    fn preview(&self) -> String {
        let source = if self.message.is_empty() {
            &self.ascii_data
        } else {
            &self.message
        };
        source.chars().take(PREVIEW_LEN).collect()
    }
}

fn csv_escape(field: &str) -> String {
    field.replace('"', "\"\"")
}

/// A bookmarked log position
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    /// Index of the entry in the log
    pub log_entry_index: usize,
    /// Operator description
    pub description: String,
    /// Short preview of the entry
    pub preview: String,
    /// Entry timestamp
    pub timestamp: DateTime<Local>,
}

/// Direction filter for search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchDirection {
    /// Every direction
    #[default]
    All,
    /// TX only
    Tx,
    /// RX only
    Rx,
    /// SYS only
    Sys,
    /// ERR only
    Err,
}

impl SearchDirection {
    fn accepts(self, direction: Direction) -> bool {
        match self {
            Self::All => true,
            Self::Tx => direction == Direction::Tx,
            Self::Rx => direction == Direction::Rx,
            Self::Sys => direction == Direction::Sys,
            Self::Err => direction == Direction::Err,
        }
    }
}

/// Log search query
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Pattern text
    pub pattern: String,
    /// Treat the pattern as a regular expression
    pub use_regex: bool,
    /// Match case
    pub case_sensitive: bool,
    /// Restrict to one direction
    pub direction: SearchDirection,
}

impl SearchQuery {
    /// Plain-substring, case-insensitive query over all directions
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            ..Self::default()
        }
    }

    fn compile(&self) -> Result<Regex, regex::Error> {
        compile_pattern(&self.pattern, self.use_regex, self.case_sensitive)
    }
}

fn compile_pattern(pattern: &str, use_regex: bool, case_sensitive: bool) -> Result<Regex, regex::Error> {
    let source = if use_regex {
        pattern.to_string()
    } else {
        regex::escape(pattern)
    };
    RegexBuilder::new(&source)
        .case_insensitive(!case_sensitive)
        .build()
}

/// View filter over the log
#[derive(Debug, Clone)]
pub struct LogFilter {
    /// Include TX entries
    pub show_tx: bool,
    /// Include RX entries
    pub show_rx: bool,
    /// Include SYS entries
    pub show_sys: bool,
    /// Include ERR entries
    pub show_err: bool,
    /// Only bookmarked entries
    pub bookmarked_only: bool,
    /// Text filter on the message field
    pub text: Option<String>,
    /// Treat `text` as a regular expression
    pub use_regex: bool,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            show_tx: true,
            show_rx: true,
            show_sys: true,
            show_err: true,
            bookmarked_only: false,
            text: None,
            use_regex: false,
        }
    }
}

impl LogFilter {
    fn shows(&self, direction: Direction) -> bool {
        match direction {
            Direction::Tx => self.show_tx,
            Direction::Rx => self.show_rx,
            Direction::Sys => self.show_sys,
            Direction::Err => self.show_err,
        }
    }
}

/// Thread-safe, append-only log store
#[derive(Debug, Default)]
pub struct LogStore {
    entries: Mutex<Vec<LogEntry>>,
    descriptions: Mutex<HashMap<usize, String>>,
}

impl LogStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return its index
    pub fn append(&self, entry: LogEntry) -> usize {
        let mut entries = self.entries.lock();
        entries.push(entry);
        entries.len() - 1
    }

    /// Append a `[DIR] message` line; unprefixed lines are SYS
    pub fn append_line(&self, line: &str) -> (usize, LogEntry) {
        let (direction, message) = Direction::parse_prefixed(line);
        let entry = LogEntry::note(direction, message);
        (self.append(entry.clone()), entry)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Get a copy of one entry
    pub fn get(&self, index: usize) -> Option<LogEntry> {
        self.entries.lock().get(index).cloned()
    }

    /// Copy of all entries in order
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// Remove every entry and bookmark
    pub fn clear(&self) {
        self.entries.lock().clear();
        self.descriptions.lock().clear();
    }

    /// Flip the bookmark flag of an entry, returning the new state
    pub fn toggle_bookmark(&self, index: usize) -> Option<bool> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(index)?;
        entry.is_bookmarked = !entry.is_bookmarked;
        let state = entry.is_bookmarked;
        drop(entries);

        if !state {
            self.descriptions.lock().remove(&index);
        }
        Some(state)
    }

    /// Attach a description to a bookmarked entry
    pub fn set_bookmark_description(&self, index: usize, description: &str) -> bool {
        let bookmarked = self
            .entries
            .lock()
            .get(index)
            .is_some_and(|entry| entry.is_bookmarked);

        if bookmarked {
            self.descriptions.lock().insert(index, description.to_string());
        }
        bookmarked
    }

    /// Bookmarks in log order
    pub fn bookmarks(&self) -> Vec<Bookmark> {
        let entries = self.entries.lock();
        let descriptions = self.descriptions.lock();

        entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_bookmarked)
            .map(|(index, entry)| Bookmark {
                log_entry_index: index,
                description: descriptions.get(&index).cloned().unwrap_or_default(),
                preview: entry.preview(),
                timestamp: entry.timestamp,
            })
            .collect()
    }

    /// Filtered view as `(index, entry)` pairs
    pub fn filter(&self, filter: &LogFilter) -> Result<Vec<(usize, LogEntry)>, regex::Error> {
        let text = match filter.text.as_deref() {
            Some(text) if !text.is_empty() => Some(compile_pattern(text, filter.use_regex, false)?),
            _ => None,
        };

        let entries = self.entries.lock();
        Ok(entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| filter.shows(entry.direction))
            .filter(|(_, entry)| !filter.bookmarked_only || entry.is_bookmarked)
            .filter(|(_, entry)| text.as_ref().map_or(true, |re| re.is_match(&entry.message)))
            .map(|(index, entry)| (index, entry.clone()))
            .collect())
    }

    /// Search message, hex and ASCII fields
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<LogEntry>, regex::Error> {
        let re = query.compile()?;

        let entries = self.entries.lock();
        Ok(entries
            .iter()
            .filter(|entry| query.direction.accepts(entry.direction))
            .filter(|entry| {
                re.is_match(&entry.message) || re.is_match(&entry.hex_data) || re.is_match(&entry.ascii_data)
            })
            .cloned()
            .collect())
    }

    /// Render the full, unfiltered log
    pub fn export(&self, format: ExportFormat) -> Result<String, ExportError> {
        let entries = self.entries();

        Ok(match format {
            ExportFormat::Csv => export_csv(&entries),
            ExportFormat::Json => serde_json::to_string_pretty(&entries)?,
            ExportFormat::PlainText => export_plain_text(&entries),
        })
    }

    /// Write the full log to a file
    pub fn export_to_file(&self, path: &Path, format: ExportFormat) -> Result<(), ExportError> {
        let content = self.export(format)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn export_csv(entries: &[LogEntry]) -> String {
    let mut result = String::new();
    result.push_str(LogEntry::csv_header());
    result.push('\n');
    for entry in entries {
        result.push_str(&entry.to_csv());
        result.push('\n');
    }
    result
}

fn export_plain_text(entries: &[LogEntry]) -> String {
    let mut result = String::new();
    result.push_str("========================================\n");
    result.push_str("Quintilink Log Export\n");
    result.push_str(&format!("Exported: {}\n", Local::now().format("%Y-%m-%d %H:%M:%S")));
    result.push_str(&format!("Total Entries: {}\n", entries.len()));
    result.push_str("========================================\n\n");

    for entry in entries {
        let bookmark = if entry.is_bookmarked { " [BOOKMARK]" } else { "" };
        result.push_str(&format!(
            "[{}] [{}]{}\n",
            entry.timestamp.format("%H:%M:%S%.3f"),
            entry.direction,
            bookmark
        ));
        if !entry.hex_data.is_empty() {
            result.push_str(&format!("  HEX  : {}\n", entry.hex_data));
        }
        if !entry.ascii_data.is_empty() {
            result.push_str(&format!("  ASCII: {}\n", entry.ascii_data));
        }
        if !entry.message.is_empty() {
            result.push_str(&format!("  {}\n", entry.message));
        }
        if entry.byte_count > 0 {
            result.push_str(&format!("  Bytes: {}\n", entry.byte_count));
        }
        result.push('\n');
    }

    result
}

/// Generate export filename with timestamp
pub fn generate_export_filename(prefix: &str, format: ExportFormat) -> String {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    format!("{}_{}.{}", prefix, timestamp, format.extension())
}
