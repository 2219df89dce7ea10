//! Structured metadata filters over records.

use crate::types::{InvoiceAnalysisRecord, Status};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the employee-name filter compares against stored names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameMatch {
    /// Case-insensitive containment ("john" matches "John Smith")
    #[default]
    Substring,
    /// Case-insensitive equality
    Exact,
}

/// Inclusive date range; either end may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn day(date: NaiveDate) -> Self {
        Self::new(Some(date), Some(date))
    }

    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self::new(Some(start), Some(end))
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.start, self.end) {
            (Some(s), Some(e)) if s == e => write!(f, "{}", s),
            (Some(s), Some(e)) => write!(f, "{} to {}", s, e),
            (Some(s), None) => write!(f, "from {}", s),
            (None, Some(e)) => write!(f, "until {}", e),
            (None, None) => f.write_str("any date"),
        }
    }
}

/// Filter derived from a natural-language query. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPredicate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
}

impl QueryPredicate {
    /// True when no field constrains the search.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.employee_name.is_none()
            && self.date_range.map_or(true, |r| r.is_unbounded())
    }

    /// Whether `record` satisfies every present field.
    ///
    /// A record without a date never satisfies a date range.
    pub fn matches(&self, record: &InvoiceAnalysisRecord, mode: NameMatch) -> bool {
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }

        if let Some(name) = &self.employee_name {
            let wanted = name.to_lowercase();
            let stored = record.employee_name.to_lowercase();
            let ok = match mode {
                NameMatch::Substring => stored.contains(wanted.trim()),
                NameMatch::Exact => stored.trim() == wanted.trim(),
            };
            if !ok {
                return false;
            }
        }

        if let Some(range) = &self.date_range {
            if !range.is_unbounded() {
                match record.date {
                    Some(date) if range.contains(date) => {}
                    _ => return false,
                }
            }
        }

        true
    }
}

impl fmt::Display for QueryPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("(no filters)");
        }
        let mut parts = Vec::new();
        if let Some(status) = self.status {
            parts.push(format!("status={}", status));
        }
        if let Some(name) = &self.employee_name {
            parts.push(format!("employee~{}", name));
        }
        if let Some(range) = &self.date_range {
            parts.push(format!("date={}", range));
        }
        f.write_str(&parts.join(", "))
    }
}
