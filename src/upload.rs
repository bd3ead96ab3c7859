use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use bytes::Bytes;
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::models::{TargetRequest, TargetResponse};

pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const XLS_MIME: &str = "application/vnd.ms-excel";
const CSV_MIME: &str = "text/csv";

const ACCEPTED_EXTENSIONS: [(&str, &str); 3] =
    [(".xlsx", XLSX_MIME), (".xls", XLS_MIME), (".csv", CSV_MIME)];

const MIN_YEAR: i32 = 2000;
const MAX_YEAR: i32 = 2100;

/// Ceiling for simulated progress while the transfer is still in flight.
const SIMULATED_CEILING: u8 = 90;

static DATE_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").expect("valid date pattern"));
static DATE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]{4}-[0-9]{2}-[0-9]{2}").expect("valid token pattern"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));
static ORIGIN_POLICY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)cors|\borigins?\b").expect("valid origin pattern"));

#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub mime: Option<String>,
    pub bytes: Bytes,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, mime: Option<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime,
            bytes: bytes.into(),
        }
    }

    pub async fn read(path: &Path, mime: Option<String>) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(name, mime, bytes))
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    fn extension(&self) -> Option<&str> {
        self.name.rsplit_once('.').map(|(_, ext)| ext)
    }

    fn accepted(&self) -> bool {
        let by_mime = self
            .mime
            .as_deref()
            .is_some_and(|mime| ACCEPTED_EXTENSIONS.iter().any(|(_, accepted)| *accepted == mime));
        let by_name = ACCEPTED_EXTENSIONS
            .iter()
            .any(|(suffix, _)| self.name.ends_with(suffix));
        by_mime || by_name
    }

    /// Declared type first, then the type implied by the extension, then xlsx.
    fn content_type(&self) -> String {
        if let Some(mime) = self.mime.as_deref().filter(|mime| !mime.is_empty()) {
            return mime.to_string();
        }
        ACCEPTED_EXTENSIONS
            .iter()
            .find(|(suffix, _)| self.name.ends_with(suffix))
            .map(|(_, mime)| *mime)
            .unwrap_or(XLSX_MIME)
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct UploadIntent {
    pub file: UploadFile,
    pub date: NaiveDate,
    pub lecture: Option<String>,
    pub derived_file_name: String,
    pub content_type: String,
}

impl UploadIntent {
    pub fn date_string(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

/// Backend-issued write capability. Not `Clone`: a transfer consumes it.
#[derive(Debug)]
pub struct UploadTarget {
    pub write_url: String,
    pub expected_file_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    RequestTarget,
    Transfer,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::RequestTarget => f.write_str("upload link"),
            Step::Transfer => f.write_str("file transfer"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Network,
    Server,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UploadError {
    #[error("Please select a file to upload.")]
    NoFileSelected,

    #[error("Date '{0}' must use the YYYY-MM-DD format, for example 2025-11-06.")]
    InvalidDateFormat(String),

    #[error("Date '{0}' is not a real calendar date between 2000 and 2100. Please pick another date.")]
    InvalidDateValue(String),

    #[error("'{0}' is not supported. Please upload an Excel (.xlsx, .xls) or CSV file.")]
    InvalidFileType(String),

    #[error("Could not reach the {step} service ({reason}). Please try again later.")]
    NetworkUnreachable { step: Step, reason: String },

    #[error("The {step} request was rejected (HTTP {status}): {message}")]
    ServerRejected {
        step: Step,
        status: u16,
        message: String,
    },

    #[error("The {step} service failed (HTTP {status}). Please try again later.")]
    ServerFailure {
        step: Step,
        status: u16,
        message: String,
    },

    #[error("The storage target refused this origin (HTTP {status}). Its cross-origin policy must allow uploads from this client.")]
    CrossOriginRejected { status: u16 },

    #[error("The upload link expired or was already used (HTTP {status}). Please start the upload again.")]
    TargetExpired { status: u16 },

    #[error("The {step} service sent an unreadable response ({detail}). Please try again later.")]
    MalformedResponse { step: Step, detail: String },
}

impl UploadError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            UploadError::NoFileSelected
            | UploadError::InvalidDateFormat(_)
            | UploadError::InvalidDateValue(_)
            | UploadError::InvalidFileType(_) => ErrorCategory::Validation,
            UploadError::NetworkUnreachable { .. } => ErrorCategory::Network,
            UploadError::ServerRejected { .. }
            | UploadError::ServerFailure { .. }
            | UploadError::CrossOriginRejected { .. }
            | UploadError::TargetExpired { .. }
            | UploadError::MalformedResponse { .. } => ErrorCategory::Server,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            UploadError::NoFileSelected => "no_file_selected",
            UploadError::InvalidDateFormat(_) => "invalid_date_format",
            UploadError::InvalidDateValue(_) => "invalid_date_value",
            UploadError::InvalidFileType(_) => "invalid_file_type",
            UploadError::NetworkUnreachable { .. } => "network_unreachable",
            UploadError::ServerRejected { .. } => "server_rejected",
            UploadError::ServerFailure { .. } => "server_failure",
            UploadError::CrossOriginRejected { .. } => "cross_origin_rejected",
            UploadError::TargetExpired { .. } => "target_expired",
            UploadError::MalformedResponse { .. } => "malformed_response",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UploadError::NetworkUnreachable { .. } | UploadError::ServerFailure { .. }
        )
    }

    fn from_api(step: Step, err: ApiError) -> Self {
        match err {
            ApiError::Network { reason, .. } => UploadError::NetworkUnreachable { step, reason },
            ApiError::Status { status, message } => {
                let code = status.as_u16();
                if step == Step::Transfer && status.is_client_error() && names_origin_policy(&message)
                {
                    UploadError::CrossOriginRejected { status: code }
                } else if step == Step::Transfer && matches!(code, 403 | 404) {
                    UploadError::TargetExpired { status: code }
                } else if status.is_client_error() {
                    UploadError::ServerRejected {
                        step,
                        status: code,
                        message,
                    }
                } else {
                    UploadError::ServerFailure {
                        step,
                        status: code,
                        message,
                    }
                }
            }
            ApiError::Decode(err) => UploadError::MalformedResponse {
                step,
                detail: err.to_string(),
            },
            ApiError::Envelope(detail) => UploadError::MalformedResponse { step, detail },
        }
    }
}

fn names_origin_policy(body: &str) -> bool {
    ORIGIN_POLICY.is_match(body)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadWarning {
    TargetDateMismatch { requested: String, received: String },
}

impl fmt::Display for UploadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadWarning::TargetDateMismatch {
                requested,
                received,
            } => write!(
                f,
                "The server filed this upload under {received} although {requested} was requested."
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadState {
    Idle,
    Validating,
    RequestingTarget,
    Transferring,
    Completed { file_name: String },
    ValidationFailed(UploadError),
    TransferFailed(UploadError),
}

/// A failed upload with the warnings raised before it failed.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFailure {
    pub error: UploadError,
    pub warnings: Vec<UploadWarning>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub file_name: String,
    pub bytes: usize,
    pub warnings: Vec<UploadWarning>,
}

pub fn validate(
    file: Option<UploadFile>,
    date: &str,
    lecture: Option<&str>,
) -> Result<UploadIntent, UploadError> {
    let file = file.ok_or(UploadError::NoFileSelected)?;

    if date.len() != 10 || !DATE_FORMAT.is_match(date) {
        return Err(UploadError::InvalidDateFormat(date.to_string()));
    }

    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .filter(|day| (MIN_YEAR..=MAX_YEAR).contains(&day.year()))
        .ok_or_else(|| UploadError::InvalidDateValue(date.to_string()))?;

    if !file.accepted() {
        return Err(UploadError::InvalidFileType(file.name.clone()));
    }

    let lecture = lecture
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    let label = WHITESPACE.replace_all(lecture.as_deref().unwrap_or("upload"), "_");
    let extension = file.extension().unwrap_or("xlsx");
    let derived_file_name = format!("uploads/{date}_{label}.{extension}");
    let content_type = file.content_type();

    Ok(UploadIntent {
        file,
        date: parsed,
        lecture,
        derived_file_name,
        content_type,
    })
}

/// First `YYYY-MM-DD` token in a file name, if any.
pub fn date_token(file_name: &str) -> Option<&str> {
    DATE_TOKEN.find(file_name).map(|found| found.as_str())
}

/// The two remote calls of an upload.
pub trait UploadBackend {
    fn request_target(
        &self,
        request: &TargetRequest,
    ) -> impl Future<Output = Result<TargetResponse, ApiError>>;

    fn transfer(
        &self,
        target: UploadTarget,
        content_type: &str,
        payload: Bytes,
    ) -> impl Future<Output = Result<(), ApiError>>;
}

/// Percentage that only ever moves forward.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    tx: Arc<watch::Sender<u8>>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }
}

impl ProgressTracker {
    pub fn percent(&self) -> u8 {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u8> {
        self.tx.subscribe()
    }

    pub fn advance(&self, percent: u8) {
        let percent = percent.min(100);
        self.tx.send_if_modified(|current| {
            if percent > *current {
                *current = percent;
                true
            } else {
                false
            }
        });
    }

    fn simulate_step(&self) {
        let current = self.percent();
        if current >= SIMULATED_CEILING {
            return;
        }
        let step = ((SIMULATED_CEILING - current) / 10).max(1);
        self.advance((current + step).min(SIMULATED_CEILING));
    }
}

pub struct UploadOrchestrator<'a, B> {
    backend: &'a B,
    state: UploadState,
    progress: ProgressTracker,
    warnings: Vec<UploadWarning>,
    tick: Duration,
}

impl<'a, B: UploadBackend> UploadOrchestrator<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self {
            backend,
            state: UploadState::Idle,
            progress: ProgressTracker::default(),
            warnings: Vec::new(),
            tick: Duration::from_millis(200),
        }
    }

    pub fn state(&self) -> &UploadState {
        &self.state
    }

    pub fn progress(&self) -> watch::Receiver<u8> {
        self.progress.subscribe()
    }

    /// Warnings from the latest run, kept whether or not it succeeded.
    pub fn warnings(&self) -> &[UploadWarning] {
        &self.warnings
    }

    fn transition(&mut self, state: UploadState) {
        debug!(from = ?self.state, to = ?state, "upload state change");
        self.state = state;
    }

    fn fail(&mut self, err: UploadError) -> UploadError {
        warn!(code = err.code(), "upload failed: {err}");
        let state = if err.category() == ErrorCategory::Validation {
            UploadState::ValidationFailed(err.clone())
        } else {
            UploadState::TransferFailed(err.clone())
        };
        self.transition(state);
        err
    }

    pub async fn run(
        &mut self,
        file: Option<UploadFile>,
        date: &str,
        lecture: Option<&str>,
    ) -> Result<UploadOutcome, UploadError> {
        self.warnings.clear();
        self.transition(UploadState::Validating);
        let intent = match validate(file, date, lecture) {
            Ok(intent) => intent,
            Err(err) => return Err(self.fail(err)),
        };

        self.transition(UploadState::RequestingTarget);
        let request = TargetRequest {
            date: intent.date_string(),
            lecture: intent.lecture.clone().unwrap_or_default(),
            file_name: intent.derived_file_name.clone(),
            content_type: intent.content_type.clone(),
        };
        info!(file_name = %request.file_name, date = %request.date, "requesting upload target");

        let response = match self.backend.request_target(&request).await {
            Ok(response) => response,
            Err(err) => return Err(self.fail(UploadError::from_api(Step::RequestTarget, err))),
        };

        if let Some(received) = date_token(&response.file_name) {
            if received != request.date {
                warn!(requested = %request.date, received, "upload target filed under a different date");
                self.warnings.push(UploadWarning::TargetDateMismatch {
                    requested: request.date.clone(),
                    received: received.to_string(),
                });
            }
        }

        let target = UploadTarget {
            write_url: response.presigned_url,
            expected_file_name: response.file_name,
        };
        let file_name = target.expected_file_name.clone();

        self.transition(UploadState::Transferring);
        let size = intent.file.size();
        let backend = self.backend;
        let transfer = backend.transfer(target, &intent.content_type, intent.file.bytes.clone());
        tokio::pin!(transfer);

        let mut ticker = tokio::time::interval(self.tick);
        let result = loop {
            tokio::select! {
                result = &mut transfer => break result,
                _ = ticker.tick() => self.progress.simulate_step(),
            }
        };

        match result {
            Ok(()) => {
                self.progress.advance(100);
                info!(file_name = %file_name, bytes = size, "upload completed");
                self.transition(UploadState::Completed {
                    file_name: file_name.clone(),
                });
                Ok(UploadOutcome {
                    file_name,
                    bytes: size,
                    warnings: self.warnings.clone(),
                })
            }
            Err(err) => Err(self.fail(UploadError::from_api(Step::Transfer, err))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    const MAX_DELAY: Duration = Duration::from_secs(30);

    pub fn with_retries(retries: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            base_delay,
        }
    }

    /// Delay before the given retry (1-based), doubling each time.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(Self::MAX_DELAY)
    }
}

/// Runs complete uploads until one succeeds, a non-retryable error occurs or
/// the policy is exhausted. Every attempt requests a fresh target.
pub async fn upload_with_retry<B, F>(
    backend: &B,
    policy: RetryPolicy,
    file: Option<UploadFile>,
    date: &str,
    lecture: Option<&str>,
    mut on_attempt: F,
) -> Result<UploadOutcome, UploadFailure>
where
    B: UploadBackend,
    F: FnMut(u32, watch::Receiver<u8>),
{
    let mut attempt = 1;
    loop {
        let mut orchestrator = UploadOrchestrator::new(backend);
        on_attempt(attempt, orchestrator.progress());

        let result = orchestrator.run(file.clone(), date, lecture).await;
        debug!(attempt, state = ?orchestrator.state(), "upload attempt finished");

        match result {
            Ok(outcome) => return Ok(outcome),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(attempt, ?delay, code = err.code(), "retrying upload");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                return Err(UploadFailure {
                    error,
                    warnings: orchestrator.warnings().to_vec(),
                })
            }
        }
    }
}
