use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Present,
    Absent,
    Proxy,
    Bunk,
    Other(String),
}

impl Status {
    /// Exact, case-sensitive match. Anything else is kept verbatim as `Other`.
    pub fn parse(value: &str) -> Self {
        match value {
            "Present" => Status::Present,
            "Absent" => Status::Absent,
            "Proxy" => Status::Proxy,
            "Bunk" => Status::Bunk,
            other => Status::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Status::Present => "Present",
            Status::Absent => "Absent",
            Status::Proxy => "Proxy",
            Status::Bunk => "Bunk",
            Status::Other(value) => value,
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Other(String::new())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(Status::parse(value.as_deref().unwrap_or_default()))
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(default)]
    pub student_id: String,
    #[serde(default)]
    pub student_name: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub division: Option<String>,
    #[serde(default)]
    pub lecture: Option<String>,
    #[serde(default)]
    pub rfid_uid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub present: u64,
    #[serde(default)]
    pub absent: u64,
    #[serde(default)]
    pub proxy: u64,
    #[serde(default)]
    pub bunk: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub attendance_percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultsResponse {
    #[serde(default)]
    pub records: Vec<AttendanceRecord>,
    #[serde(default)]
    pub summary: Summary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PeriodBucket {
    pub bucket_key: String,
    pub present: u64,
    pub absent: u64,
    pub proxy: u64,
    pub bunk: u64,
    pub total: u64,
    pub attendance_percentage: f64,
}

impl PeriodBucket {
    pub fn new(bucket_key: impl Into<String>) -> Self {
        Self {
            bucket_key: bucket_key.into(),
            ..Self::default()
        }
    }

    pub fn rounded_percentage(&self) -> f64 {
        (self.attendance_percentage * 100.0).round() / 100.0
    }
}

/// Bucket as the server's `/analytics` endpoint emits it; the key lives under
/// whichever of `date`, `week` or `month` matches the requested period.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerBucket {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub week: Option<String>,
    #[serde(default)]
    pub month: Option<String>,
    #[serde(default)]
    pub present: u64,
    #[serde(default)]
    pub absent: u64,
    #[serde(default)]
    pub proxy: u64,
    #[serde(default)]
    pub bunk: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub attendance_percentage: f64,
}

impl From<ServerBucket> for PeriodBucket {
    fn from(bucket: ServerBucket) -> Self {
        let bucket_key = bucket
            .date
            .or(bucket.week)
            .or(bucket.month)
            .unwrap_or_default();
        PeriodBucket {
            bucket_key,
            present: bucket.present,
            absent: bucket.absent,
            proxy: bucket.proxy,
            bunk: bucket.bunk,
            total: bucket.total,
            attendance_percentage: bucket.attendance_percentage,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyticsResponse {
    #[serde(default)]
    pub analytics: Vec<ServerBucket>,
    #[serde(default)]
    pub overall_statistics: Option<Summary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawScanEvent {
    #[serde(default)]
    pub log_id: Option<String>,
    #[serde(default)]
    pub rfid_uid: Option<String>,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub student_name: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub division: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryLogsResponse {
    #[serde(default)]
    pub logs: Vec<RawScanEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordFilters {
    pub date: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub year: Option<String>,
    pub department: Option<String>,
    pub division: Option<String>,
    pub status: Option<String>,
}

impl RecordFilters {
    /// Query pairs with empty values dropped. A full range wins over a single date.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let ranged = self.start_date.is_some() && self.end_date.is_some();
        let fields = [
            ("date", if ranged { None } else { self.date.as_ref() }),
            ("start_date", self.start_date.as_ref()),
            ("end_date", self.end_date.as_ref()),
            ("year", self.year.as_ref()),
            ("department", self.department.as_ref()),
            ("division", self.division.as_ref()),
            ("status", self.status.as_ref()),
        ];
        non_empty(fields)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogFilters {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub limit: Option<u32>,
}

impl LogFilters {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let limit = self.limit.map(|value| value.to_string());
        let fields = [
            ("start_date", self.start_date.as_ref()),
            ("end_date", self.end_date.as_ref()),
            ("start_time", self.start_time.as_ref()),
            ("end_time", self.end_time.as_ref()),
            ("limit", limit.as_ref()),
        ];
        non_empty(fields)
    }
}

fn non_empty<const N: usize>(
    fields: [(&'static str, Option<&String>); N],
) -> Vec<(&'static str, String)> {
    fields
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(|v| (key, v.to_string()))
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetRequest {
    pub date: String,
    pub lecture: String,
    pub file_name: String,
    pub content_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetResponse {
    pub presigned_url: String,
    pub file_name: String,
    #[serde(default)]
    pub debug: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_match_is_case_sensitive() {
        assert_eq!(Status::parse("Present"), Status::Present);
        assert_eq!(Status::parse("present"), Status::Other("present".to_string()));
        assert_eq!(Status::parse("Late").as_str(), "Late");
    }

    #[test]
    fn record_tolerates_missing_optional_fields() {
        let record: AttendanceRecord =
            serde_json::from_value(serde_json::json!({"student_id": "S1", "status": null}))
                .unwrap();
        assert_eq!(record.date, None);
        assert_eq!(record.status, Status::Other(String::new()));
    }

    #[test]
    fn record_without_student_id_keeps_the_batch() {
        let results: ResultsResponse = serde_json::from_value(serde_json::json!({
            "records": [
                {"student_id": "S1", "date": "2025-11-06", "status": "Present"},
                {"date": "2025-11-06", "status": "Absent"}
            ],
            "summary": {"present": 1, "absent": 1, "total": 2}
        }))
        .unwrap();
        assert_eq!(results.records.len(), 2);
        assert_eq!(results.records[1].student_id, "");
        assert_eq!(results.records[1].status, Status::Absent);
    }

    #[test]
    fn server_bucket_key_comes_from_period_field() {
        let bucket: ServerBucket = serde_json::from_value(serde_json::json!({
            "week": "2025-W46",
            "present": 3,
            "total": 4,
            "attendance_percentage": 75.0
        }))
        .unwrap();
        let bucket = PeriodBucket::from(bucket);
        assert_eq!(bucket.bucket_key, "2025-W46");
        assert_eq!(bucket.present, 3);
    }

    #[test]
    fn filters_skip_empty_values_and_prefer_range() {
        let filters = RecordFilters {
            date: Some("2025-11-06".to_string()),
            start_date: Some("2025-11-01".to_string()),
            end_date: Some("2025-11-30".to_string()),
            department: Some("  ".to_string()),
            ..RecordFilters::default()
        };
        let pairs = filters.query_pairs();
        assert_eq!(
            pairs,
            vec![
                ("start_date", "2025-11-01".to_string()),
                ("end_date", "2025-11-30".to_string()),
            ]
        );
    }

    #[test]
    fn log_filters_render_limit() {
        let filters = LogFilters {
            limit: Some(500),
            ..LogFilters::default()
        };
        assert_eq!(filters.query_pairs(), vec![("limit", "500".to_string())]);
    }
}
