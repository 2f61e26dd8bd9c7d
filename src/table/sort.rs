use std::fmt;
use std::str::FromStr;

use crate::error::ReportError;

/// A table remembers the column clicked last plus the one before it.
pub const MAX_SORT_KEYS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn toggle(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub direction: SortDirection,
}

/// Ordered sort request, most significant key first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortSpec {
    keys: Vec<SortKey>,
}

impl SortSpec {
    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn direction_of(&self, column: &str) -> Option<SortDirection> {
        self.keys
            .iter()
            .find(|key| key.column == column)
            .map(|key| key.direction)
    }

    /// Makes `column` the primary key, demoting whatever was sorted before.
    pub fn request(&mut self, column: &str, direction: SortDirection) {
        self.keys.retain(|key| key.column != column);
        self.keys.insert(
            0,
            SortKey {
                column: column.to_string(),
                direction,
            },
        );
        self.keys.truncate(MAX_SORT_KEYS);
    }

    /// The sort a header click on `column` produces: flips the direction when
    /// the column is already primary, otherwise promotes it ascending.
    pub fn toggled(&self, column: &str) -> SortSpec {
        let mut next = self.clone();
        match self.keys.first() {
            Some(first) if first.column == column => next.request(column, first.direction.toggle()),
            _ => next.request(column, SortDirection::Asc),
        }
        next
    }

    pub fn filtered<F>(&self, mut keep: F) -> SortSpec
    where
        F: FnMut(&str) -> bool,
    {
        SortSpec {
            keys: self
                .keys
                .iter()
                .filter(|key| keep(&key.column))
                .cloned()
                .collect(),
        }
    }

    fn push_back(&mut self, key: SortKey) {
        if self.keys.len() < MAX_SORT_KEYS && self.direction_of(&key.column).is_none() {
            self.keys.push(key);
        }
    }
}

fn parse_key(raw: &str) -> Result<SortKey, ReportError> {
    let invalid = || ReportError::InvalidSortKey(raw.to_string());

    let (column, direction) = if let Some(column) = raw.strip_prefix('-') {
        (column, SortDirection::Desc)
    } else if let Some((column, direction)) = raw.split_once(':') {
        let direction = match direction.to_ascii_lowercase().as_str() {
            "asc" => SortDirection::Asc,
            "desc" => SortDirection::Desc,
            _ => return Err(invalid()),
        };
        (column, direction)
    } else {
        (raw, SortDirection::Asc)
    };

    let valid = !column.is_empty()
        && column
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        return Err(invalid());
    }

    Ok(SortKey {
        column: column.to_string(),
        direction,
    })
}

impl FromStr for SortSpec {
    type Err = ReportError;

    /// Accepts `fullname`, `-timecreated`, `timecreated:desc,fullname`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut spec = SortSpec::default();
        for raw in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            spec.push_back(parse_key(raw)?);
        }
        Ok(spec)
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, key) in self.keys.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            if key.direction == SortDirection::Desc {
                f.write_str("-")?;
            }
            f.write_str(&key.column)?;
        }
        Ok(())
    }
}
