//! Rule-based metadata filter extraction.
//!
//! Turns a free-text question into a [`QueryPredicate`]. The rules are data
//! (synonym, trigger and pattern tables); the extractor is a pure function
//! of its input and never fails. Text no rule recognizes is ignored, so the
//! worst case is the empty predicate.
//!
//! Relative date phrases ("last week", "yesterday", "in March") only resolve
//! when the caller supplies a reference date.

use crate::config::WeekStart;
use crate::query::predicate::{DateRange, QueryPredicate};
use crate::types::Status;
use chrono::{Datelike, Duration, NaiveDate};
use regex::{Captures, Regex};
use reimburse_core::{AppError, AppResult};

/// Status synonyms. The longest matching phrase decides the status.
const STATUS_SYNONYMS: &[(&str, Status)] = &[
    ("declined", Status::Declined),
    ("rejected", Status::Declined),
    ("denied", Status::Declined),
    ("refused", Status::Declined),
    ("approved", Status::Approved),
    ("accepted", Status::Approved),
    ("reimbursed", Status::Approved),
    ("fully reimbursed", Status::Approved),
    ("partially reimbursed", Status::Approved),
    ("needs information", Status::NeedsInformation),
    ("needs info", Status::NeedsInformation),
    ("more information", Status::NeedsInformation),
    ("pending", Status::NeedsInformation),
    ("missing", Status::NeedsInformation),
];

/// Phrases that introduce an employee name. The trigger with the most words
/// wins; equal word counts go to the earliest name.
const NAME_TRIGGERS: &[&str] = &[
    "for employee",
    "of employee",
    "submitted by",
    "filed by",
    "belonging to",
    "for",
    "by",
];

const MONTHS: &[(&str, u32)] = &[
    ("january", 1),
    ("february", 2),
    ("march", 3),
    ("april", 4),
    ("may", 5),
    ("june", 6),
    ("july", 7),
    ("august", 8),
    ("september", 9),
    ("october", 10),
    ("november", 11),
    ("december", 12),
];

const MONTH_ABBREVIATIONS: &[(&str, u32)] = &[
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sept", 9),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
];

/// Capitalized words that are never part of a name.
const NOT_NAMES: &[&str] = &[
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday", "today",
    "yesterday", "last", "this", "next", "past", "week", "month", "year", "q1", "q2", "q3", "q4",
    "all", "any", "the", "invoices", "invoice", "employee",
];

const ISO_DAY: &str = r"(\d{4}[-/]\d{1,2}[-/]\d{1,2})";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateKind {
    Between,
    FromTo,
    After,
    Since,
    Before,
    Until,
    MonthYear,
    InYear,
    IsoDay,
    LastDays,
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
    ThisYear,
    LastYear,
    MonthAlone,
}

impl DateKind {
    fn is_relative(self) -> bool {
        matches!(
            self,
            DateKind::LastDays
                | DateKind::Today
                | DateKind::Yesterday
                | DateKind::ThisWeek
                | DateKind::LastWeek
                | DateKind::ThisMonth
                | DateKind::LastMonth
                | DateKind::ThisYear
                | DateKind::LastYear
                | DateKind::MonthAlone
        )
    }
}

/// Date rules in priority order.
fn date_patterns() -> Vec<(DateKind, String)> {
    let month_names = MONTHS
        .iter()
        .map(|(m, _)| *m)
        .chain(MONTH_ABBREVIATIONS.iter().map(|(m, _)| *m))
        .collect::<Vec<_>>()
        .join("|");
    let full_months = MONTHS.iter().map(|(m, _)| *m).collect::<Vec<_>>().join("|");

    vec![
        (DateKind::Between, format!(r"(?i)\bbetween\s+{ISO_DAY}\s+and\s+{ISO_DAY}")),
        (DateKind::FromTo, format!(r"(?i)\bfrom\s+{ISO_DAY}\s+(?:to|until|through)\s+{ISO_DAY}")),
        (DateKind::After, format!(r"(?i)\bafter\s+{ISO_DAY}")),
        (DateKind::Since, format!(r"(?i)\bsince\s+{ISO_DAY}")),
        (DateKind::Before, format!(r"(?i)\bbefore\s+{ISO_DAY}")),
        (DateKind::Until, format!(r"(?i)\b(?:until|through)\s+{ISO_DAY}")),
        (DateKind::MonthYear, format!(r"(?i)\b({month_names})\.?,?\s+(\d{{4}})\b")),
        (DateKind::InYear, r"(?i)\b(?:in|during)\s+(\d{4})\b".to_string()),
        (DateKind::IsoDay, format!(r"\b{ISO_DAY}\b")),
        (DateKind::LastDays, r"(?i)\b(?:last|past)\s+(\d{1,4})\s+days?\b".to_string()),
        (DateKind::Today, r"(?i)\btoday\b".to_string()),
        (DateKind::Yesterday, r"(?i)\byesterday\b".to_string()),
        (DateKind::ThisWeek, r"(?i)\bthis\s+week\b".to_string()),
        (DateKind::LastWeek, r"(?i)\blast\s+week\b".to_string()),
        (DateKind::ThisMonth, r"(?i)\bthis\s+month\b".to_string()),
        (DateKind::LastMonth, r"(?i)\blast\s+month\b".to_string()),
        (DateKind::ThisYear, r"(?i)\bthis\s+year\b".to_string()),
        (DateKind::LastYear, r"(?i)\blast\s+year\b".to_string()),
        (DateKind::MonthAlone, format!(r"(?i)\b(?:in|during|for|of|since)\s+({full_months})\b")),
    ]
}

/// Case-insensitive, whole-word pattern for a phrase.
fn phrase_pattern(phrase: &str) -> String {
    let words: Vec<String> = phrase.split_whitespace().map(regex::escape).collect();
    format!(r"(?i)\b{}\b", words.join(r"\s+"))
}

fn compile(pattern: &str) -> AppResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| AppError::Config(format!("Invalid filter rule '{}': {}", pattern, e)))
}

fn parse_day(text: &str) -> Option<NaiveDate> {
    let mut parts = text.split(['-', '/']);
    let year = parts.next()?.parse().ok()?;
    let month = parts.next()?.parse().ok()?;
    let day = parts.next()?.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    MONTHS
        .iter()
        .chain(MONTH_ABBREVIATIONS)
        .find(|(m, _)| *m == lower)
        .map(|(_, n)| *n)
}

fn month_range(year: i32, month: u32) -> Option<DateRange> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some(DateRange::between(first, next.pred_opt()?))
}

fn year_range(year: i32) -> Option<DateRange> {
    Some(DateRange::between(
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year, 12, 31)?,
    ))
}

fn is_name_word(word: &str) -> bool {
    let lower = word.to_lowercase();
    month_number(&lower).is_none()
        && !NOT_NAMES.contains(&lower.as_str())
        && !STATUS_SYNONYMS.iter().any(|(s, _)| *s == lower)
}

/// Compiled extraction rules.
#[derive(Debug, Clone)]
pub struct FilterExtractor {
    statuses: Vec<(usize, Regex, Status)>,
    names: Vec<(usize, Regex)>,
    dates: Vec<(DateKind, Regex)>,
    week_start: WeekStart,
}

impl FilterExtractor {
    pub fn new(week_start: WeekStart) -> AppResult<Self> {
        let statuses = STATUS_SYNONYMS
            .iter()
            .map(|(phrase, status)| Ok((phrase.len(), compile(&phrase_pattern(phrase))?, *status)))
            .collect::<AppResult<Vec<_>>>()?;

        let names = NAME_TRIGGERS
            .iter()
            .map(|trigger| {
                let words: Vec<String> = trigger.split_whitespace().map(regex::escape).collect();
                let pattern = format!(
                    r"(?i:\b{})\s+(\p{{Lu}}[\p{{L}}'\-]*(?:\s+\p{{Lu}}[\p{{L}}'\-]*)*)",
                    words.join(r"\s+")
                );
                Ok((words.len(), compile(&pattern)?))
            })
            .collect::<AppResult<Vec<_>>>()?;

        let dates = date_patterns()
            .into_iter()
            .map(|(kind, pattern)| Ok((kind, compile(&pattern)?)))
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Self {
            statuses,
            names,
            dates,
            week_start,
        })
    }

    /// Extract a predicate from `query`.
    ///
    /// `reference` is "today" for relative phrases; without it those phrases
    /// are ignored.
    pub fn extract(&self, query: &str, reference: Option<NaiveDate>) -> QueryPredicate {
        let predicate = QueryPredicate {
            status: self.extract_status(query),
            employee_name: self.extract_name(query),
            date_range: self.extract_dates(query, reference),
        };
        tracing::debug!(query = %query, predicate = %predicate, "Extracted filters");
        predicate
    }

    fn extract_status(&self, query: &str) -> Option<Status> {
        let mut best: Option<(usize, Status)> = None;
        for (len, regex, status) in &self.statuses {
            if regex.is_match(query) && best.map_or(true, |(l, _)| *len > l) {
                best = Some((*len, *status));
            }
        }
        best.map(|(_, status)| status)
    }

    fn extract_name(&self, query: &str) -> Option<String> {
        // (trigger word count, position, name)
        let mut best: Option<(usize, usize, String)> = None;

        for (trigger_len, regex) in &self.names {
            for caps in regex.captures_iter(query) {
                let Some(run) = caps.get(1) else { continue };
                let name: Vec<&str> = run
                    .as_str()
                    .split_whitespace()
                    .take_while(|w| is_name_word(w))
                    .collect();
                if name.is_empty() {
                    continue;
                }

                let better = match &best {
                    None => true,
                    Some((l, pos, _)) => {
                        *trigger_len > *l || (*trigger_len == *l && run.start() < *pos)
                    }
                };
                if better {
                    best = Some((*trigger_len, run.start(), name.join(" ")));
                }
                break;
            }
        }

        best.map(|(_, _, name)| name)
    }

    fn extract_dates(&self, query: &str, reference: Option<NaiveDate>) -> Option<DateRange> {
        let mut bounds: Option<DateRange> = None;

        for (kind, regex) in &self.dates {
            if kind.is_relative() && reference.is_none() {
                continue;
            }
            let Some(caps) = regex.captures(query) else {
                continue;
            };
            let Some(range) = self.resolve(*kind, &caps, reference) else {
                continue;
            };

            let half_open = matches!(
                kind,
                DateKind::After | DateKind::Since | DateKind::Before | DateKind::Until
            );
            if half_open {
                let acc = bounds.get_or_insert_with(DateRange::default);
                acc.start = acc.start.or(range.start);
                acc.end = acc.end.or(range.end);
                continue;
            }

            return Some(bounds.unwrap_or(range));
        }

        bounds
    }

    fn resolve(
        &self,
        kind: DateKind,
        caps: &Captures<'_>,
        reference: Option<NaiveDate>,
    ) -> Option<DateRange> {
        let day = |i: usize| caps.get(i).and_then(|m| parse_day(m.as_str()));

        match kind {
            DateKind::Between | DateKind::FromTo => {
                let (a, b) = (day(1)?, day(2)?);
                Some(DateRange::between(a.min(b), a.max(b)))
            }
            DateKind::After => Some(DateRange::new(day(1)?.succ_opt(), None)),
            DateKind::Since => Some(DateRange::new(day(1), None)),
            DateKind::Before => Some(DateRange::new(None, day(1)?.pred_opt())),
            DateKind::Until => Some(DateRange::new(None, day(1))),
            DateKind::MonthYear => {
                let month = month_number(caps.get(1)?.as_str())?;
                let year = caps.get(2)?.as_str().parse().ok()?;
                month_range(year, month)
            }
            DateKind::InYear => year_range(caps.get(1)?.as_str().parse().ok()?),
            DateKind::IsoDay => Some(DateRange::day(day(1)?)),
            _ => self.resolve_relative(kind, caps, reference?),
        }
    }

    fn resolve_relative(
        &self,
        kind: DateKind,
        caps: &Captures<'_>,
        today: NaiveDate,
    ) -> Option<DateRange> {
        match kind {
            DateKind::LastDays => {
                let days: i64 = caps.get(1)?.as_str().parse().ok()?;
                if days == 0 {
                    return None;
                }
                Some(DateRange::between(
                    today.checked_sub_signed(Duration::days(days - 1))?,
                    today,
                ))
            }
            DateKind::Today => Some(DateRange::day(today)),
            DateKind::Yesterday => Some(DateRange::day(today.pred_opt()?)),
            DateKind::ThisWeek => {
                let start = self.week_start_of(today)?;
                Some(DateRange::between(start, start.checked_add_signed(Duration::days(6))?))
            }
            DateKind::LastWeek => {
                let this_start = self.week_start_of(today)?;
                Some(DateRange::between(
                    this_start.checked_sub_signed(Duration::days(7))?,
                    this_start.pred_opt()?,
                ))
            }
            DateKind::ThisMonth => month_range(today.year(), today.month()),
            DateKind::LastMonth => {
                if today.month() == 1 {
                    month_range(today.year() - 1, 12)
                } else {
                    month_range(today.year(), today.month() - 1)
                }
            }
            DateKind::ThisYear => year_range(today.year()),
            DateKind::LastYear => year_range(today.year() - 1),
            DateKind::MonthAlone => {
                // Most recent occurrence not after the reference date
                let month = month_number(caps.get(1)?.as_str())?;
                let year = if month <= today.month() {
                    today.year()
                } else {
                    today.year() - 1
                };
                month_range(year, month)
            }
            _ => None,
        }
    }

    fn week_start_of(&self, date: NaiveDate) -> Option<NaiveDate> {
        let offset = match self.week_start {
            WeekStart::Monday => date.weekday().num_days_from_monday(),
            WeekStart::Sunday => date.weekday().num_days_from_sunday(),
        };
        date.checked_sub_signed(Duration::days(i64::from(offset)))
    }
}
