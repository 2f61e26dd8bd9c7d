use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Offset, Utc};

use crate::error::ReportError;

pub const DEFAULT_DATE_FORMAT: &str = "%A, %-d %B %Y, %-I:%M %p";

/// Renders timestamps for display in the viewer's timezone.
#[derive(Debug, Clone)]
pub struct DateFormatter {
    format: String,
    offset: FixedOffset,
}

impl DateFormatter {
    pub fn new(format: impl Into<String>, utc_offset_minutes: i32) -> Result<Self, ReportError> {
        let format = format.into();
        if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
            return Err(ReportError::InvalidDateFormat(format));
        }
        let offset = utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or(ReportError::InvalidUtcOffset(utc_offset_minutes))?;
        Ok(Self { format, offset })
    }

    pub fn userdate(&self, time: DateTime<Utc>) -> String {
        time.with_timezone(&self.offset)
            .format(&self.format)
            .to_string()
    }
}

impl Default for DateFormatter {
    fn default() -> Self {
        Self {
            format: DEFAULT_DATE_FORMAT.to_string(),
            offset: Utc.fix(),
        }
    }
}

pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Plain-text rendering of a cell: tags dropped, entities decoded, trimmed.
pub fn strip_markup(input: &str) -> String {
    let mut text = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    text.trim()
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
