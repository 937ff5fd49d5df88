//! Rendering of raw log events into display lines.

use std::sync::OnceLock;

use chrono::format::{Item, StrftimeItems};
use regex::Regex;
use thiserror::Error;

use super::LogEvent;

/// Matches the timestamp (and optional level) applications commonly prefix
/// their own lines with, e.g. `[2023-01-05 10:11:12,345]` or
/// `[2023-01-05 10:11:12.345 - INFO]`.
pub const DEFAULT_PREFIX_PATTERN: &str = r"^\[\d+-\d+-\d+\s\d+:\d+:\d+(.|,)\d+(\]|\s-\s\w+\])";
pub const DEFAULT_DATE_FORMAT: &str = "%d-%m-%Y %H:%M:%S";
pub const DEFAULT_TEMPLATE: &str = "[{time} UTC] {message}";

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("invalid prefix pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("invalid date format: {0}")]
    DateFormat(String),
}

/// Strips embedded prefixes and re-renders events with their received time.
#[derive(Debug, Clone)]
pub struct LogFormatter {
    pattern: Regex,
    date_format: String,
    template: String,
}

impl Default for LogFormatter {
    fn default() -> Self {
        static RE: OnceLock<Regex> = OnceLock::new();
        let pattern = RE.get_or_init(|| Regex::new(DEFAULT_PREFIX_PATTERN).unwrap());

        Self {
            pattern: pattern.clone(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl LogFormatter {
    /// `template` may reference `{time}` and `{message}`.
    pub fn new(pattern: &str, date_format: &str, template: &str) -> Result<Self, FormatError> {
        let pattern = Regex::new(pattern)?;
        if StrftimeItems::new(date_format).any(|item| matches!(item, Item::Error)) {
            return Err(FormatError::DateFormat(date_format.to_string()));
        }

        Ok(Self {
            pattern,
            date_format: date_format.to_string(),
            template: template.to_string(),
        })
    }

    /// Render a single event. The event itself is left untouched.
    pub fn format_event(&self, event: &LogEvent) -> String {
        let message = match self.pattern.find(&event.message) {
            Some(m) => &event.message[m.end()..],
            None => event.message.as_str(),
        };
        let time = event.timestamp.format(&self.date_format).to_string();

        self.template
            .replace("{time}", &time)
            .replace("{message}", message.trim())
    }

    pub fn format_events(&self, events: &[LogEvent]) -> Vec<String> {
        events.iter().map(|e| self.format_event(e)).collect()
    }
}
