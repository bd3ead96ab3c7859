use std::io::Write;
use std::path::Path;

use anyhow::Context;
use chrono::NaiveDate;

use crate::models::AttendanceRecord;

pub const HEADERS: [&str; 9] = [
    "Student ID",
    "Student Name",
    "RFID UID",
    "Year",
    "Department",
    "Division",
    "Date",
    "Lecture",
    "Status",
];

pub fn default_file_name(today: NaiveDate) -> String {
    format!("attendance_{}.csv", today.format("%Y-%m-%d"))
}

fn field(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

fn row(record: &AttendanceRecord) -> [&str; 9] {
    [
        record.student_id.as_str(),
        field(&record.student_name),
        field(&record.rfid_uid),
        field(&record.year),
        field(&record.department),
        field(&record.division),
        field(&record.date),
        field(&record.lecture),
        record.status.as_str(),
    ]
}

pub fn write_records<W: Write>(writer: W, records: &[&AttendanceRecord]) -> anyhow::Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(HEADERS)?;
    for record in records {
        csv.write_record(row(record))?;
    }
    csv.flush()?;
    Ok(())
}

pub fn export_to_path(path: &Path, records: &[&AttendanceRecord]) -> anyhow::Result<usize> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    write_records(file, records)?;
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Status;

    #[test]
    fn columns_follow_fixed_order_and_quote_when_needed() {
        let record = AttendanceRecord {
            student_id: "S001".to_string(),
            student_name: Some("Lee, Avery \"Ace\"".to_string()),
            date: Some("2025-11-06".to_string()),
            status: Status::Proxy,
            department: Some("CSE".to_string()),
            year: Some("TY".to_string()),
            division: None,
            lecture: Some("Lecture 1".to_string()),
            rfid_uid: Some("04A1B2C3".to_string()),
        };

        let mut buffer = Vec::new();
        write_records(&mut buffer, &[&record]).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "Student ID,Student Name,RFID UID,Year,Department,Division,Date,Lecture,Status"
        );
        assert_eq!(
            lines[1],
            "S001,\"Lee, Avery \"\"Ace\"\"\",04A1B2C3,TY,CSE,,2025-11-06,Lecture 1,Proxy"
        );
    }

    #[test]
    fn file_name_carries_the_export_day() {
        let day = NaiveDate::from_ymd_opt(2025, 11, 6).unwrap();
        assert_eq!(default_file_name(day), "attendance_2025-11-06.csv");
    }
}
