use std::collections::HashMap;
use std::fmt::Write;

use crate::aggregate::{self, Aggregate, AnalyticsSource, Granularity};
use crate::models::{AttendanceRecord, PeriodBucket, RawScanEvent};
use crate::view;

#[derive(Debug, Clone, PartialEq)]
pub struct StatusSummary {
    pub status: String,
    pub count: usize,
    pub share: f64,
}

#[derive(Debug, Clone)]
pub struct StudentProfile<'a> {
    pub student_id: String,
    pub student_name: String,
    pub department: Option<String>,
    pub year: Option<String>,
    pub division: Option<String>,
    pub rfid_uid: Option<String>,
    pub history: Aggregate,
    pub recent_logs: Vec<&'a RawScanEvent>,
}

pub fn summarize_by_status(records: &[AttendanceRecord]) -> Vec<StatusSummary> {
    let mut map: HashMap<String, usize> = HashMap::new();

    for record in records {
        *map.entry(record.status.as_str().to_string()).or_insert(0) += 1;
    }

    let total = records.len();
    let mut summaries: Vec<StatusSummary> = map
        .into_iter()
        .map(|(status, count)| StatusSummary {
            status,
            count,
            share: if total == 0 {
                0.0
            } else {
                count as f64 / total as f64 * 100.0
            },
        })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.status.cmp(&b.status)));
    summaries
}

pub fn render_bucket_table(buckets: &[PeriodBucket]) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "| Period | Present | Absent | Proxy | Bunk | Total | Attendance |"
    );
    let _ = writeln!(output, "|---|---|---|---|---|---|---|");
    for bucket in buckets {
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {} | {} | {:.2}% |",
            bucket.bucket_key,
            bucket.present,
            bucket.absent,
            bucket.proxy,
            bucket.bunk,
            bucket.total,
            bucket.rounded_percentage()
        );
    }
    output
}

fn write_overall(output: &mut String, overall: &PeriodBucket) {
    let _ = writeln!(
        output,
        "- Attendance: {:.2}% ({} of {} marks present)",
        overall.rounded_percentage(),
        overall.present,
        overall.total
    );
    let _ = writeln!(
        output,
        "- Absent {}, Proxy {}, Bunk {}",
        overall.absent, overall.proxy, overall.bunk
    );
}

pub fn build_dashboard_report(
    scope: Option<&str>,
    granularity: Granularity,
    analytics: &Aggregate,
    source: AnalyticsSource,
    records: &[AttendanceRecord],
) -> String {
    let summaries = summarize_by_status(records);

    let mut output = String::new();
    let scope_label = scope.unwrap_or("all students");

    let _ = writeln!(output, "# Attendance Dashboard");
    let _ = writeln!(
        output,
        "Generated for {} ({} analytics, {})",
        scope_label, granularity, source
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overall");
    write_overall(&mut output, &analytics.overall);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Status Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No attendance records for this window.");
    } else {
        for summary in summaries.iter() {
            let label = if summary.status.is_empty() {
                "(blank)"
            } else {
                summary.status.as_str()
            };
            let _ = writeln!(
                output,
                "- {}: {} records ({:.1}%)",
                label, summary.count, summary.share
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Trend");

    if analytics.buckets.is_empty() {
        let _ = writeln!(output, "No dated records to chart.");
    } else {
        output.push_str(&render_bucket_table(&analytics.buckets));
        if let Some(best) = aggregate::best_bucket(&analytics.buckets) {
            let _ = writeln!(output);
            let _ = writeln!(
                output,
                "Best period: {} at {:.2}%",
                best.bucket_key,
                best.rounded_percentage()
            );
        }
    }

    let mut recent: Vec<&AttendanceRecord> = records.iter().collect();
    recent.sort_by(|a, b| b.date.cmp(&a.date));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Records");

    if recent.is_empty() {
        let _ = writeln!(output, "No attendance records for this window.");
    } else {
        for record in recent.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} ({}) on {}: {}",
                record.student_name.as_deref().unwrap_or("Unknown"),
                record.student_id,
                record.date.as_deref().unwrap_or("undated"),
                record.status
            );
        }
    }

    output
}

fn pick<'a>(from_record: Option<&'a String>, from_log: Option<&'a String>) -> Option<String> {
    from_record.or(from_log).cloned()
}

/// Profile for one student from an unfiltered batch; `None` when nothing
/// references the id.
pub fn build_student_profile<'a>(
    student_id: &str,
    records: &[AttendanceRecord],
    logs: &'a [RawScanEvent],
) -> Option<StudentProfile<'a>> {
    let own: Vec<AttendanceRecord> = records
        .iter()
        .filter(|record| record.student_id == student_id)
        .cloned()
        .collect();
    let mut recent_logs = view::logs_for_student(logs, student_id);

    if own.is_empty() && recent_logs.is_empty() {
        return None;
    }

    recent_logs.sort_by(|a, b| {
        let a = a.timestamp.as_ref().or(a.created_at.as_ref());
        let b = b.timestamp.as_ref().or(b.created_at.as_ref());
        b.cmp(&a)
    });

    let first_record = own.first();
    let first_log = recent_logs.first().copied();
    Some(StudentProfile {
        student_id: student_id.to_string(),
        student_name: pick(
            first_record.and_then(|r| r.student_name.as_ref()),
            first_log.and_then(|l| l.student_name.as_ref()),
        )
        .unwrap_or_else(|| "Unknown".to_string()),
        department: pick(
            first_record.and_then(|r| r.department.as_ref()),
            first_log.and_then(|l| l.department.as_ref()),
        ),
        year: pick(
            first_record.and_then(|r| r.year.as_ref()),
            first_log.and_then(|l| l.year.as_ref()),
        ),
        division: pick(
            first_record.and_then(|r| r.division.as_ref()),
            first_log.and_then(|l| l.division.as_ref()),
        ),
        rfid_uid: pick(
            first_record.and_then(|r| r.rfid_uid.as_ref()),
            first_log.and_then(|l| l.rfid_uid.as_ref()),
        ),
        history: aggregate::aggregate(&own, Granularity::Daily),
        recent_logs,
    })
}

pub fn build_student_report(profile: &StudentProfile<'_>) -> String {
    let mut output = String::new();
    let dash = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());

    let _ = writeln!(output, "# {} ({})", profile.student_name, profile.student_id);
    let _ = writeln!(
        output,
        "Department {} / Year {} / Division {} / RFID {}",
        dash(&profile.department),
        dash(&profile.year),
        dash(&profile.division),
        dash(&profile.rfid_uid)
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    write_overall(&mut output, &profile.history.overall);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Daily History");
    if profile.history.buckets.is_empty() {
        let _ = writeln!(output, "No attendance records in this window.");
    } else {
        output.push_str(&render_bucket_table(&profile.history.buckets));
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Entries");
    if profile.recent_logs.is_empty() {
        let _ = writeln!(output, "No RFID entries in this window.");
    } else {
        for log in profile.recent_logs.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} IST ({})",
                view::format_ist(
                    log.timestamp.as_deref().or(log.created_at.as_deref()),
                    "%b %d, %Y %H:%M:%S"
                ),
                log.rfid_uid.as_deref().unwrap_or("unknown card")
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Status;

    fn record(id: &str, date: &str, status: &str) -> AttendanceRecord {
        AttendanceRecord {
            student_id: id.to_string(),
            student_name: Some(format!("Student {id}")),
            date: Some(date.to_string()),
            status: Status::parse(status),
            department: Some("CSE".to_string()),
            year: Some("SY".to_string()),
            division: Some("A".to_string()),
            lecture: None,
            rfid_uid: None,
        }
    }

    #[test]
    fn status_mix_counts_every_value() {
        let records = vec![
            record("S1", "2025-11-03", "Present"),
            record("S2", "2025-11-03", "Present"),
            record("S3", "2025-11-03", "Late"),
        ];
        let summaries = summarize_by_status(&records);
        assert_eq!(summaries[0].status, "Present");
        assert_eq!(summaries[0].count, 2);
        assert_eq!(summaries[1].status, "Late");
        assert!((summaries[1].share - 33.333).abs() < 0.01);
    }

    #[test]
    fn dashboard_lists_trend_and_best_period() {
        let records = vec![
            record("S1", "2025-11-03", "Present"),
            record("S2", "2025-11-03", "Absent"),
            record("S1", "2025-11-04", "Present"),
        ];
        let analytics = aggregate::aggregate(&records, Granularity::Daily);
        let report = build_dashboard_report(
            Some("CSE"),
            Granularity::Daily,
            &analytics,
            AnalyticsSource::Recomputed,
            &records,
        );

        assert!(report.contains("Generated for CSE (daily analytics, recomputed from records)"));
        assert!(report.contains("- Attendance: 66.67% (2 of 3 marks present)"));
        assert!(report.contains("| 2025-11-03 | 1 | 1 | 0 | 0 | 2 | 50.00% |"));
        assert!(report.contains("Best period: 2025-11-04 at 100.00%"));
    }

    #[test]
    fn empty_dashboard_says_so() {
        let analytics = aggregate::aggregate(&[], Granularity::Weekly);
        let report = build_dashboard_report(
            None,
            Granularity::Weekly,
            &analytics,
            AnalyticsSource::Recomputed,
            &[],
        );
        assert!(report.contains("No dated records to chart."));
        assert!(report.contains("- Attendance: 0.00% (0 of 0 marks present)"));
    }

    #[test]
    fn profile_uses_only_the_students_records() {
        let records = vec![
            record("S1", "2025-11-03", "Present"),
            record("S2", "2025-11-03", "Absent"),
            record("S1", "2025-11-04", "Bunk"),
        ];
        let logs = vec![
            RawScanEvent {
                student_id: Some("S1".to_string()),
                rfid_uid: Some("04A1".to_string()),
                timestamp: Some("2025-11-03T03:00:00Z".to_string()),
                ..RawScanEvent::default()
            },
            RawScanEvent {
                student_id: Some("S1".to_string()),
                timestamp: Some("2025-11-04T03:00:00Z".to_string()),
                ..RawScanEvent::default()
            },
        ];

        let profile = build_student_profile("S1", &records, &logs).unwrap();
        assert_eq!(profile.student_name, "Student S1");
        assert_eq!(profile.rfid_uid.as_deref(), None);
        assert_eq!(profile.history.overall.total, 2);
        assert_eq!(profile.history.overall.bunk, 1);
        assert_eq!(
            profile.recent_logs[0].timestamp.as_deref(),
            Some("2025-11-04T03:00:00Z")
        );

        let report = build_student_report(&profile);
        assert!(report.contains("# Student S1 (S1)"));
        assert!(report.contains("Nov 04, 2025 08:30:00 IST"));

        assert!(build_student_profile("S9", &records, &logs).is_none());
    }
}
