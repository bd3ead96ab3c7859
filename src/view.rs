use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};

use crate::models::{AttendanceRecord, RawScanEvent};

pub const DEFAULT_PER_PAGE: usize = 10;

/// India Standard Time, UTC+05:30.
const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    StudentId,
    StudentName,
    Year,
    Department,
    Date,
    Status,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "student_id" => Ok(SortKey::StudentId),
            "student_name" => Ok(SortKey::StudentName),
            "year" => Ok(SortKey::Year),
            "department" => Ok(SortKey::Department),
            "date" => Ok(SortKey::Date),
            "status" => Ok(SortKey::Status),
            other => Err(format!(
                "cannot sort by '{other}' (expected student_id, student_name, year, department, date or status)"
            )),
        }
    }
}

impl SortKey {
    fn value(self, record: &AttendanceRecord) -> Option<&str> {
        match self {
            SortKey::StudentId => Some(record.student_id.as_str()),
            SortKey::StudentName => record.student_name.as_deref(),
            SortKey::Year => record.year.as_deref(),
            SortKey::Department => record.department.as_deref(),
            SortKey::Date => record.date.as_deref(),
            SortKey::Status => Some(record.status.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordQuery {
    pub search: Option<String>,
    pub sort: Option<SortKey>,
    pub descending: bool,
    pub page: usize,
    pub per_page: usize,
}

impl Default for RecordQuery {
    fn default() -> Self {
        Self {
            search: None,
            sort: None,
            descending: false,
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordPage<'a> {
    pub rows: Vec<&'a AttendanceRecord>,
    pub page: usize,
    pub total_pages: usize,
    pub total_rows: usize,
}

/// Search then sort, without paging. Export uses this directly.
pub fn filter_and_sort<'a>(
    records: &'a [AttendanceRecord],
    query: &RecordQuery,
) -> Vec<&'a AttendanceRecord> {
    let needle = query
        .search
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    let mut rows: Vec<&AttendanceRecord> = records
        .iter()
        .filter(|record| match &needle {
            Some(needle) => {
                record.student_id.to_lowercase().contains(needle)
                    || record
                        .student_name
                        .as_deref()
                        .is_some_and(|name| name.to_lowercase().contains(needle))
            }
            None => true,
        })
        .collect();

    if let Some(key) = query.sort {
        rows.sort_by(|a, b| {
            let ordering = compare(key.value(a), key.value(b));
            if query.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }

    rows
}

fn compare(a: Option<&str>, b: Option<&str>) -> Ordering {
    // None sorts first ascending.
    a.cmp(&b)
}

pub fn paginate<'a>(records: &'a [AttendanceRecord], query: &RecordQuery) -> RecordPage<'a> {
    let rows = filter_and_sort(records, query);
    let per_page = query.per_page.max(1);
    let total_rows = rows.len();
    let total_pages = total_rows.div_ceil(per_page);
    let page = query.page.clamp(1, total_pages.max(1));
    let start = (page - 1) * per_page;

    RecordPage {
        rows: rows.into_iter().skip(start).take(per_page).collect(),
        page,
        total_pages,
        total_rows,
    }
}

pub fn logs_for_student<'a>(logs: &'a [RawScanEvent], student_id: &str) -> Vec<&'a RawScanEvent> {
    logs.iter()
        .filter(|log| log.student_id.as_deref() == Some(student_id))
        .collect()
}

/// Formats a UTC timestamp in IST. Naive timestamps are read as UTC.
pub fn format_ist(timestamp: Option<&str>, pattern: &str) -> String {
    let Some(raw) = timestamp.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return "N/A".to_string();
    };

    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| naive.and_utc())
        });

    match (parsed, FixedOffset::east_opt(IST_OFFSET_SECS)) {
        (Ok(utc), Some(ist)) => utc.with_timezone(&ist).format(pattern).to_string(),
        _ => "Invalid Date".to_string(),
    }
}
