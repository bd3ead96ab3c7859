use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::{Duration as ChronoDuration, Local};
use clap::{Args, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

mod aggregate;
mod api;
mod config;
mod error;
mod export;
mod models;
mod report;
mod upload;
mod view;

use aggregate::{AnalyticsSource, Granularity};
use api::ApiClient;
use config::Config;
use models::{AttendanceRecord, LogFilters, RecordFilters};
use upload::{RetryPolicy, UploadFile};
use view::{RecordQuery, SortKey};

#[derive(Parser)]
#[command(name = "attendance-console")]
#[command(about = "Operator console for the RFID attendance service", long_about = None)]
struct Cli {
    /// Base URL of the attendance API gateway (overrides ATTENDANCE_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct FilterArgs {
    #[arg(long)]
    date: Option<String>,
    #[arg(long)]
    start_date: Option<String>,
    #[arg(long)]
    end_date: Option<String>,
    #[arg(long)]
    year: Option<String>,
    #[arg(long)]
    department: Option<String>,
    #[arg(long)]
    division: Option<String>,
    #[arg(long)]
    status: Option<String>,
}

impl FilterArgs {
    fn into_filters(self) -> RecordFilters {
        RecordFilters {
            date: self.date,
            start_date: self.start_date,
            end_date: self.end_date,
            year: self.year,
            department: self.department,
            division: self.division,
            status: self.status,
        }
    }

    fn scope_label(&self) -> Option<String> {
        let parts: Vec<&str> = [&self.department, &self.year, &self.division]
            .into_iter()
            .filter_map(|value| value.as_deref())
            .collect();
        (!parts.is_empty()).then(|| parts.join(" / "))
    }
}

#[derive(Args)]
struct ViewArgs {
    /// Match student id or name
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    sort: Option<SortKey>,
    #[arg(long)]
    desc: bool,
}

impl ViewArgs {
    fn query(self, page: usize, per_page: usize) -> RecordQuery {
        RecordQuery {
            search: self.search,
            sort: self.sort,
            descending: self.desc,
            page,
            per_page,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List attendance records with a summary
    Results {
        #[command(flatten)]
        filters: FilterArgs,
        #[command(flatten)]
        view: ViewArgs,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = view::DEFAULT_PER_PAGE)]
        per_page: usize,
    },
    /// Show period analytics, recomputed locally when the server has none
    Analytics {
        #[arg(long, default_value = "daily")]
        period: Granularity,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Generate a markdown dashboard report
    Dashboard {
        #[arg(long, default_value = "daily")]
        period: Granularity,
        #[command(flatten)]
        filters: FilterArgs,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show RFID entry logs
    Logs {
        #[arg(long)]
        start_date: Option<String>,
        #[arg(long)]
        end_date: Option<String>,
        #[arg(long)]
        start_time: Option<String>,
        #[arg(long)]
        end_time: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: u32,
        /// Keep polling for new entries
        #[arg(long)]
        follow: bool,
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },
    /// Show one student's profile and history
    Student {
        id: String,
        #[arg(long, default_value_t = 90)]
        days: i64,
    },
    /// Export the filtered, sorted record view as CSV
    Export {
        #[command(flatten)]
        filters: FilterArgs,
        #[command(flatten)]
        view: ViewArgs,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Upload an attendance sheet (.xlsx, .xls, .csv)
    Upload {
        #[arg(long)]
        file: Option<PathBuf>,
        /// Attendance date, YYYY-MM-DD (defaults to today)
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        lecture: Option<String>,
        /// Declared MIME type of the file
        #[arg(long)]
        content_type: Option<String>,
        /// Re-run the whole upload this many times on transient failures
        #[arg(long, default_value_t = 0)]
        retries: u32,
        #[arg(long, default_value_t = 1000)]
        retry_delay_ms: u64,
    },
}

fn print_records(rows: &[&AttendanceRecord]) {
    for record in rows {
        println!(
            "- {} | {} | {} | {} | {} | {}",
            record.student_id,
            record.student_name.as_deref().unwrap_or("Unknown"),
            record.date.as_deref().unwrap_or("-"),
            record.lecture.as_deref().unwrap_or("-"),
            record.department.as_deref().unwrap_or("-"),
            record.status
        );
    }
}

async fn load_analytics(
    client: &ApiClient,
    granularity: Granularity,
    filters: &RecordFilters,
) -> anyhow::Result<(aggregate::Aggregate, AnalyticsSource, Vec<AttendanceRecord>)> {
    let (results, server) = tokio::join!(
        client.fetch_results(filters),
        client.fetch_analytics(granularity, filters)
    );
    let records = results.context("failed to fetch attendance results")?.records;
    let server = server
        .map_err(|err| warn!("server analytics unavailable, recomputing: {err}"))
        .ok();
    let (analytics, source) = aggregate::resolve_analytics(server, &records, granularity);
    Ok((analytics, source, records))
}

/// Prints entries not printed before; entries without a log id always print.
async fn print_logs(
    client: &ApiClient,
    filters: &LogFilters,
    seen: &mut HashSet<String>,
) -> anyhow::Result<()> {
    let logs = client
        .fetch_entry_logs(filters)
        .await
        .context("failed to fetch entry logs")?
        .logs;

    let fresh: Vec<_> = logs
        .iter()
        .filter(|log| match &log.log_id {
            Some(id) => seen.insert(id.clone()),
            None => true,
        })
        .collect();

    if fresh.is_empty() {
        if seen.is_empty() {
            println!("No entry logs for this window.");
        }
        return Ok(());
    }

    println!("{} new entries:", fresh.len());
    for log in fresh {
        let when = match log.timestamp.as_deref().or(log.created_at.as_deref()) {
            Some(timestamp) => format!(
                "{} IST",
                view::format_ist(Some(timestamp), "%b %d, %H:%M:%S")
            ),
            None => log.date.clone().unwrap_or_else(|| "N/A".to_string()),
        };
        println!(
            "- {} | {} ({}) | card {}",
            when,
            log.student_name.as_deref().unwrap_or("Unknown"),
            log.student_id.as_deref().unwrap_or("-"),
            log.rfid_uid.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.api_url)?;
    let client = ApiClient::new(&config)?;

    match cli.command {
        Commands::Results {
            filters,
            view: view_args,
            page,
            per_page,
        } => {
            let results = client
                .fetch_results(&filters.into_filters())
                .await
                .context("failed to fetch attendance results")?;
            let query = view_args.query(page, per_page);
            let shown = view::paginate(&results.records, &query);

            if shown.total_rows == 0 {
                println!("No attendance records found for the selected filters.");
                return Ok(());
            }

            let summary = &results.summary;
            println!(
                "Present {} | Absent {} | Proxy {} | Bunk {} | Total {} | Attendance {:.2}%",
                summary.present,
                summary.absent,
                summary.proxy,
                summary.bunk,
                summary.total,
                summary.attendance_percentage
            );
            print_records(&shown.rows);
            println!(
                "Page {} of {} ({} results)",
                shown.page, shown.total_pages, shown.total_rows
            );
        }
        Commands::Analytics { period, filters } => {
            let (analytics, source, _) =
                load_analytics(&client, period, &filters.into_filters()).await?;

            if analytics.buckets.is_empty() {
                println!("No dated records found for this window.");
                return Ok(());
            }

            println!("{period} analytics ({source}):");
            print!("{}", report::render_bucket_table(&analytics.buckets));
            println!(
                "Overall attendance {:.2}% across {} records",
                analytics.overall.rounded_percentage(),
                analytics.overall.total
            );
        }
        Commands::Dashboard {
            period,
            filters,
            out,
        } => {
            let scope = filters.scope_label();
            let (analytics, source, records) =
                load_analytics(&client, period, &filters.into_filters()).await?;
            let report = report::build_dashboard_report(
                scope.as_deref(),
                period,
                &analytics,
                source,
                &records,
            );

            match out {
                Some(path) => {
                    std::fs::write(&path, report)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Report written to {}.", path.display());
                }
                None => print!("{report}"),
            }
        }
        Commands::Logs {
            start_date,
            end_date,
            start_time,
            end_time,
            limit,
            follow,
            interval,
        } => {
            let filters = LogFilters {
                start_date,
                end_date,
                start_time,
                end_time,
                limit: Some(limit),
            };

            let mut seen = HashSet::new();
            if !follow {
                return print_logs(&client, &filters, &mut seen).await;
            }

            let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = print_logs(&client, &filters, &mut seen).await {
                            warn!("refresh failed: {err:#}");
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        println!("Stopped following entry logs.");
                        break;
                    }
                }
            }
        }
        Commands::Student { id, days } => {
            let today = Local::now().date_naive();
            let start = (today - ChronoDuration::days(days.max(1)))
                .format("%Y-%m-%d")
                .to_string();
            let end = today.format("%Y-%m-%d").to_string();

            let record_filters = RecordFilters {
                start_date: Some(start.clone()),
                end_date: Some(end.clone()),
                ..RecordFilters::default()
            };
            let log_filters = LogFilters {
                start_date: Some(start),
                end_date: Some(end),
                limit: Some(500),
                ..LogFilters::default()
            };

            let (results, logs) = tokio::join!(
                client.fetch_results(&record_filters),
                client.fetch_entry_logs(&log_filters)
            );
            let records = results.context("failed to fetch attendance results")?.records;
            let logs = logs
                .map_err(|err| warn!("entry logs unavailable: {err}"))
                .map(|response| response.logs)
                .unwrap_or_default();

            match report::build_student_profile(&id, &records, &logs) {
                Some(profile) => print!("{}", report::build_student_report(&profile)),
                None => println!("No attendance records or entries found for student {id}."),
            }
        }
        Commands::Export {
            filters,
            view: view_args,
            out,
        } => {
            let results = client
                .fetch_results(&filters.into_filters())
                .await
                .context("failed to fetch attendance results")?;
            let query = view_args.query(1, usize::MAX);
            let rows = view::filter_and_sort(&results.records, &query);

            if rows.is_empty() {
                println!("No records to export.");
                return Ok(());
            }

            let path = out.unwrap_or_else(|| {
                PathBuf::from(export::default_file_name(Local::now().date_naive()))
            });
            let written = export::export_to_path(&path, &rows)?;
            println!("Exported {written} records to {}.", path.display());
        }
        Commands::Upload {
            file,
            date,
            lecture,
            content_type,
            retries,
            retry_delay_ms,
        } => {
            let file = match file {
                Some(path) => Some(
                    UploadFile::read(&path, content_type)
                        .await
                        .with_context(|| format!("failed to read {}", path.display()))?,
                ),
                None => None,
            };
            let date = date
                .unwrap_or_else(|| Local::now().date_naive().format("%Y-%m-%d").to_string());
            let policy = RetryPolicy::with_retries(retries, Duration::from_millis(retry_delay_ms));

            let upload = upload::upload_with_retry(
                &client,
                policy,
                file,
                &date,
                lecture.as_deref(),
                |attempt, mut progress| {
                    if attempt > 1 {
                        println!("Retrying upload (attempt {attempt})...");
                    }
                    tokio::spawn(async move {
                        while progress.changed().await.is_ok() {
                            let percent = *progress.borrow_and_update();
                            println!("Uploading... {percent}%");
                        }
                    });
                },
            );

            tokio::select! {
                result = upload => match result {
                    Ok(outcome) => {
                        for warning in outcome.warnings.iter() {
                            println!("Warning: {warning}");
                        }
                        println!(
                            "Uploaded {} bytes as {}. Attendance processing will begin shortly.",
                            outcome.bytes, outcome.file_name
                        );
                    }
                    Err(failure) => {
                        for warning in failure.warnings.iter() {
                            println!("Warning: {warning}");
                        }
                        let code = failure.error.code();
                        return Err(anyhow::Error::new(failure.error)
                            .context(format!("upload failed ({code})")));
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    println!("Upload abandoned. A transfer already accepted by storage cannot be recalled.");
                }
            }
        }
    }

    Ok(())
}
