use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};

use crate::models::{AnalyticsResponse, AttendanceRecord, PeriodBucket, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
        }
    }

    pub fn bucket_key(self, date: NaiveDate) -> String {
        match self {
            Granularity::Daily => date.format("%Y-%m-%d").to_string(),
            Granularity::Weekly => {
                let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
                monday.format("%Y-%m-%d").to_string()
            }
            Granularity::Monthly => date.format("%Y-%m").to_string(),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "daily" => Ok(Granularity::Daily),
            "weekly" => Ok(Granularity::Weekly),
            "monthly" => Ok(Granularity::Monthly),
            "semester" => Err("semester analytics are only computed by the server".to_string()),
            other => Err(format!("unknown period '{other}' (expected daily, weekly or monthly)")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    pub buckets: Vec<PeriodBucket>,
    pub overall: PeriodBucket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyticsSource {
    Server,
    Recomputed,
}

impl fmt::Display for AnalyticsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalyticsSource::Server => f.write_str("server"),
            AnalyticsSource::Recomputed => f.write_str("recomputed from records"),
        }
    }
}

/// Parses `YYYY-MM-DD`, ignoring a trailing time part after `T` or a space.
pub fn parse_record_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let day = match value.len() {
        10 => value,
        len if len > 10 && matches!(value.as_bytes()[10], b'T' | b' ') => value.get(..10)?,
        _ => return None,
    };
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

fn tally(bucket: &mut PeriodBucket, status: &Status) {
    match status {
        Status::Present => bucket.present += 1,
        Status::Absent => bucket.absent += 1,
        Status::Proxy => bucket.proxy += 1,
        Status::Bunk => bucket.bunk += 1,
        // Unknown statuses still count toward the denominator.
        Status::Other(_) => {}
    }
    bucket.total += 1;
}

fn finish(bucket: &mut PeriodBucket) {
    bucket.attendance_percentage = if bucket.total == 0 {
        0.0
    } else {
        bucket.present as f64 / bucket.total as f64 * 100.0
    };
}

pub fn aggregate(records: &[AttendanceRecord], granularity: Granularity) -> Aggregate {
    let mut buckets: Vec<PeriodBucket> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut overall = PeriodBucket::new("overall");

    for record in records {
        tally(&mut overall, &record.status);

        let Some(date) = record.date.as_deref().and_then(parse_record_date) else {
            continue;
        };

        let key = granularity.bucket_key(date);
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            buckets.push(PeriodBucket::new(key));
            buckets.len() - 1
        });

        tally(&mut buckets[slot], &record.status);
    }

    for bucket in buckets.iter_mut() {
        finish(bucket);
    }
    finish(&mut overall);

    buckets.sort_by(|a, b| a.bucket_key.cmp(&b.bucket_key));

    Aggregate { buckets, overall }
}

/// Uses the server's buckets when it returned any, otherwise recomputes from records.
pub fn resolve_analytics(
    server: Option<AnalyticsResponse>,
    records: &[AttendanceRecord],
    granularity: Granularity,
) -> (Aggregate, AnalyticsSource) {
    match server {
        Some(response) if !response.analytics.is_empty() => {
            let buckets: Vec<PeriodBucket> =
                response.analytics.into_iter().map(PeriodBucket::from).collect();
            let overall = match response.overall_statistics {
                Some(summary) => PeriodBucket {
                    bucket_key: "overall".to_string(),
                    present: summary.present,
                    absent: summary.absent,
                    proxy: summary.proxy,
                    bunk: summary.bunk,
                    total: summary.total,
                    attendance_percentage: summary.attendance_percentage,
                },
                None => sum_buckets(&buckets),
            };
            (Aggregate { buckets, overall }, AnalyticsSource::Server)
        }
        _ => (aggregate(records, granularity), AnalyticsSource::Recomputed),
    }
}

fn sum_buckets(buckets: &[PeriodBucket]) -> PeriodBucket {
    let mut overall = PeriodBucket::new("overall");
    for bucket in buckets {
        overall.present += bucket.present;
        overall.absent += bucket.absent;
        overall.proxy += bucket.proxy;
        overall.bunk += bucket.bunk;
        overall.total += bucket.total;
    }
    finish(&mut overall);
    overall
}

pub fn best_bucket(buckets: &[PeriodBucket]) -> Option<&PeriodBucket> {
    buckets.iter().fold(None, |best: Option<&PeriodBucket>, bucket| match best {
        Some(current) if current.attendance_percentage >= bucket.attendance_percentage => {
            Some(current)
        }
        _ => Some(bucket),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ServerBucket, Summary};

    fn record(date: Option<&str>, status: &str) -> AttendanceRecord {
        AttendanceRecord {
            student_id: "S001".to_string(),
            student_name: Some("Avery Lee".to_string()),
            date: date.map(str::to_string),
            status: Status::parse(status),
            department: None,
            year: None,
            division: None,
            lecture: None,
            rfid_uid: None,
        }
    }

    const ALL: [Granularity; 3] = [Granularity::Daily, Granularity::Weekly, Granularity::Monthly];

    #[test]
    fn daily_example_matches_expected_buckets() {
        let records = vec![
            record(Some("2025-01-06"), "Present"),
            record(Some("2025-01-06"), "Absent"),
            record(Some("2025-01-07"), "Present"),
        ];
        let result = aggregate(&records, Granularity::Daily);

        assert_eq!(
            result.buckets,
            vec![
                PeriodBucket {
                    bucket_key: "2025-01-06".to_string(),
                    present: 1,
                    absent: 1,
                    proxy: 0,
                    bunk: 0,
                    total: 2,
                    attendance_percentage: 50.0,
                },
                PeriodBucket {
                    bucket_key: "2025-01-07".to_string(),
                    present: 1,
                    absent: 0,
                    proxy: 0,
                    bunk: 0,
                    total: 1,
                    attendance_percentage: 100.0,
                },
            ]
        );
        assert_eq!(result.overall.present, 2);
        assert_eq!(result.overall.absent, 1);
        assert_eq!(result.overall.total, 3);
        assert_eq!(result.overall.rounded_percentage(), 66.67);
    }

    #[test]
    fn empty_input_yields_zeroed_overall() {
        for granularity in ALL {
            let result = aggregate(&[], granularity);
            assert!(result.buckets.is_empty());
            assert_eq!(result.overall.total, 0);
            assert_eq!(result.overall.attendance_percentage, 0.0);
        }
    }

    #[test]
    fn malformed_dates_are_dropped_per_record() {
        let records = vec![
            record(None, "Present"),
            record(Some("not-a-date"), "Present"),
            record(Some("2025-02-30"), "Absent"),
            record(Some("2025-11-12"), "Present"),
            record(Some("2025-11-12T09:15:00Z"), "Bunk"),
        ];

        for granularity in ALL {
            let result = aggregate(&records, granularity);
            let bucketed: u64 = result.buckets.iter().map(|b| b.total).sum();
            assert_eq!(bucketed, 2);
            assert_eq!(result.overall.total, 5);
            assert_eq!(result.overall.present, 3);
            assert_eq!(result.overall.absent, 1);
        }
    }

    #[test]
    fn undated_records_still_count_toward_overall() {
        let results: crate::models::ResultsResponse = serde_json::from_value(serde_json::json!({
            "records": [
                {"student_id": "S1", "date": "2025-01-06", "status": "Present"},
                {"student_id": "S2", "status": "Absent"}
            ]
        }))
        .unwrap();

        let result = aggregate(&results.records, Granularity::Daily);
        assert_eq!(result.buckets.len(), 1);
        assert_eq!(result.buckets[0].total, 1);
        assert_eq!(result.overall.total, 2);
        assert_eq!(result.overall.absent, 1);
        assert_eq!(result.overall.rounded_percentage(), 50.0);
    }

    #[test]
    fn space_separated_timestamps_keep_their_day() {
        assert_eq!(
            parse_record_date("2025-11-12 09:15:00"),
            NaiveDate::from_ymd_opt(2025, 11, 12)
        );
        assert_eq!(
            parse_record_date("2025-11-12T09:15:00Z"),
            NaiveDate::from_ymd_opt(2025, 11, 12)
        );
        assert_eq!(parse_record_date("2025-11-12/09"), None);
    }

    #[test]
    fn weekly_keys_align_to_monday() {
        let records = vec![
            record(Some("2025-11-12"), "Present"),
            record(Some("2025-11-10"), "Proxy"),
            record(Some("2025-11-16"), "Absent"),
            record(Some("2025-11-17"), "Present"),
        ];
        let result = aggregate(&records, Granularity::Weekly);
        let keys: Vec<&str> = result.buckets.iter().map(|b| b.bucket_key.as_str()).collect();
        assert_eq!(keys, vec!["2025-11-10", "2025-11-17"]);
        assert_eq!(result.buckets[0].total, 3);
        assert_eq!(result.buckets[0].proxy, 1);
    }

    #[test]
    fn monthly_keys_cover_the_whole_month() {
        let records = vec![
            record(Some("2025-11-30"), "Present"),
            record(Some("2025-11-01"), "Absent"),
        ];
        let result = aggregate(&records, Granularity::Monthly);
        assert_eq!(result.buckets.len(), 1);
        assert_eq!(result.buckets[0].bucket_key, "2025-11");
    }

    #[test]
    fn unknown_status_inflates_total_only() {
        let records = vec![
            record(Some("2025-03-03"), "Present"),
            record(Some("2025-03-03"), "present"),
            record(Some("2025-03-03"), "Late"),
        ];
        let result = aggregate(&records, Granularity::Daily);
        let bucket = &result.buckets[0];
        assert_eq!(bucket.present, 1);
        assert_eq!(bucket.absent + bucket.proxy + bucket.bunk, 0);
        assert_eq!(bucket.total, 3);
        assert_eq!(bucket.rounded_percentage(), 33.33);
    }

    #[test]
    fn buckets_are_sorted_and_repeatable() {
        let records = vec![
            record(Some("2025-12-01"), "Present"),
            record(Some("2024-01-15"), "Absent"),
            record(Some("2025-06-09"), "Bunk"),
            record(Some("2024-01-15"), "Present"),
        ];
        for granularity in ALL {
            let first = aggregate(&records, granularity);
            let second = aggregate(&records.clone(), granularity);
            assert_eq!(first, second);
            assert!(first
                .buckets
                .windows(2)
                .all(|pair| pair[0].bucket_key <= pair[1].bucket_key));
            let total: u64 = first.buckets.iter().map(|b| b.total).sum();
            assert_eq!(total, records.len() as u64);
        }
    }

    #[test]
    fn semester_is_rejected_client_side() {
        assert_eq!("Weekly".parse::<Granularity>(), Ok(Granularity::Weekly));
        assert!("semester".parse::<Granularity>().is_err());
        assert!("hourly".parse::<Granularity>().is_err());
    }

    #[test]
    fn server_buckets_win_when_present() {
        let server = AnalyticsResponse {
            analytics: vec![ServerBucket {
                date: Some("2025-01-06".to_string()),
                present: 4,
                total: 5,
                attendance_percentage: 80.0,
                ..ServerBucket::default()
            }],
            overall_statistics: Some(Summary {
                present: 4,
                total: 5,
                attendance_percentage: 80.0,
                ..Summary::default()
            }),
        };
        let records = vec![record(Some("2025-01-06"), "Absent")];

        let (result, source) = resolve_analytics(Some(server), &records, Granularity::Daily);
        assert_eq!(source, AnalyticsSource::Server);
        assert_eq!(result.buckets[0].present, 4);
        assert_eq!(result.overall.total, 5);
    }

    #[test]
    fn empty_server_analytics_fall_back_to_records() {
        let records = vec![record(Some("2025-01-06"), "Absent")];
        let (result, source) =
            resolve_analytics(Some(AnalyticsResponse::default()), &records, Granularity::Daily);
        assert_eq!(source, AnalyticsSource::Recomputed);
        assert_eq!(result.overall.absent, 1);

        let (_, source) = resolve_analytics(None, &records, Granularity::Daily);
        assert_eq!(source, AnalyticsSource::Recomputed);
    }

    #[test]
    fn best_bucket_prefers_first_on_ties() {
        let mut a = PeriodBucket::new("2025-01-06");
        a.attendance_percentage = 90.0;
        let mut b = PeriodBucket::new("2025-01-07");
        b.attendance_percentage = 90.0;
        let mut c = PeriodBucket::new("2025-01-08");
        c.attendance_percentage = 40.0;
        let buckets = vec![a, b, c];
        assert_eq!(best_bucket(&buckets).map(|b| b.bucket_key.as_str()), Some("2025-01-06"));
        assert!(best_bucket(&[]).is_none());
    }
}
