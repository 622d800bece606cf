//! Error types for the fa-report-analyzer library.
//!
//! Two distinct error types reflect two distinct audiences:
//!
//! * [`AnalyzerError`]: a failure inside the analysis pipeline (ingestion,
//!   backend construction, provider call, response normalisation). Every
//!   variant ends up as the terminal `failed` state of a task, rendered through
//!   [`AnalyzerError::task_message`] so the stored string keeps its
//!   classification.
//!
//! * [`TaskError`]: a failure of a request made *about* a task (unknown id,
//!   result not ready yet, invalid backend on submission). These never touch
//!   the task record itself.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::task::TaskStatus;

/// All failures the analysis pipeline can produce.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    // ── Ingestion errors ──────────────────────────────────────────────────
    /// The file extension is not one the ingestor understands, or a legacy
    /// format could not be converted.
    #[error("Unsupported report format '{extension}'\n{hint}")]
    UnsupportedFormat { extension: String, hint: String },

    /// The report file does not exist or cannot be opened.
    #[error("Report file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The file exists but its content could not be extracted.
    #[error("Failed to extract content from '{path}': {detail}")]
    ExtractionFailure { path: PathBuf, detail: String },

    // ── Backend errors ────────────────────────────────────────────────────
    /// A backend could not be constructed (missing API key etc.).
    #[error("Backend '{backend}' is not configured: {detail}")]
    ConfigurationError { backend: String, detail: String },

    /// The provider answered with a refusal instead of an evaluation.
    #[error("Backend '{backend}' refused to analyse the report.\n{guidance}")]
    ProviderRefused { backend: String, guidance: String },

    /// The provider call failed (network, HTTP status, timeout, bad envelope).
    #[error("Backend '{backend}' call failed: {detail}")]
    ProviderInvocationFailure { backend: String, detail: String },

    // ── Normalisation errors ──────────────────────────────────────────────
    /// The model output could not be turned into an [`crate::AnalysisResult`].
    ///
    /// `offset` is a byte offset into `cleaned`; `context` is the ±50
    /// character window around it.
    #[error("Malformed model response: {reason} (at byte {offset}, near: ...{context}...)")]
    MalformedResponse {
        reason: String,
        offset: usize,
        context: String,
        cleaned: String,
    },

    // ── Configuration / internal errors ───────────────────────────────────
    /// Analyzer configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error (worker panic, join failure).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable classification of an [`AnalyzerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnsupportedFormat,
    FileNotFound,
    ExtractionFailure,
    ConfigurationError,
    ProviderRefused,
    ProviderInvocationFailure,
    MalformedResponse,
    InvalidConfig,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat => "UnsupportedFormat",
            Self::FileNotFound => "FileNotFound",
            Self::ExtractionFailure => "ExtractionFailure",
            Self::ConfigurationError => "ConfigurationError",
            Self::ProviderRefused => "ProviderRefused",
            Self::ProviderInvocationFailure => "ProviderInvocationFailure",
            Self::MalformedResponse => "MalformedResponse",
            Self::InvalidConfig => "InvalidConfig",
            Self::Internal => "Internal",
        }
    }

    /// Recover the classification from a stored task error string.
    pub fn from_task_message(message: &str) -> Option<Self> {
        let tag = message.split_once(':').map(|(tag, _)| tag)?;
        [
            Self::UnsupportedFormat,
            Self::FileNotFound,
            Self::ExtractionFailure,
            Self::ConfigurationError,
            Self::ProviderRefused,
            Self::ProviderInvocationFailure,
            Self::MalformedResponse,
            Self::InvalidConfig,
            Self::Internal,
        ]
        .into_iter()
        .find(|k| k.as_str() == tag)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AnalyzerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            Self::FileNotFound { .. } => ErrorKind::FileNotFound,
            Self::ExtractionFailure { .. } => ErrorKind::ExtractionFailure,
            Self::ConfigurationError { .. } => ErrorKind::ConfigurationError,
            Self::ProviderRefused { .. } => ErrorKind::ProviderRefused,
            Self::ProviderInvocationFailure { .. } => ErrorKind::ProviderInvocationFailure,
            Self::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The string stored in a failed task's `error` field: `"<Kind>: <display>"`.
    pub fn task_message(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }

    pub(crate) fn extraction(path: impl Into<PathBuf>, detail: impl fmt::Display) -> Self {
        Self::ExtractionFailure {
            path: path.into(),
            detail: detail.to_string(),
        }
    }
}

/// Errors returned by the orchestrator's query and submission surface.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Submission rejected before a task was created.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Task not found: {task_id}")]
    NotFound { task_id: String },

    /// The task is still `pending` or `processing`.
    #[error("Task {task_id} is not finished yet (status: {status}, progress: {progress}%)")]
    NotReady {
        task_id: String,
        status: TaskStatus,
        progress: u8,
    },

    /// The task ended in `failed`; `error` is the stored failure description.
    #[error("Task {task_id} failed: {error}")]
    Failed { task_id: String, error: String },

    /// `completed` without a result payload. Indicates a corrupted record.
    #[error("Task {task_id} is completed but its result is missing")]
    MissingResult { task_id: String },

    /// A status change that the task state machine forbids.
    #[error("Task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// No uploaded file matches the given identifier.
    #[error("Uploaded file not found: {file_id}")]
    FileNotFound { file_id: String },

    /// Upload rejected or could not be stored.
    #[error("Upload failed: {0}")]
    Upload(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_message_keeps_classification() {
        let e = AnalyzerError::ProviderRefused {
            backend: "openai".into(),
            guidance: "try another backend".into(),
        };
        let msg = e.task_message();
        assert!(msg.starts_with("ProviderRefused: "), "got: {msg}");
        assert_eq!(
            ErrorKind::from_task_message(&msg),
            Some(ErrorKind::ProviderRefused)
        );
    }

    #[test]
    fn unknown_tag_is_not_classified() {
        assert_eq!(ErrorKind::from_task_message("task cancelled by user"), None);
        assert_eq!(ErrorKind::from_task_message("Oops: nope"), None);
    }

    #[test]
    fn malformed_display_includes_context() {
        let e = AnalyzerError::MalformedResponse {
            reason: "expected value".into(),
            offset: 12,
            context: "\"score\": ,".into(),
            cleaned: String::new(),
        };
        let msg = e.to_string();
        assert!(msg.contains("byte 12"), "got: {msg}");
        assert!(msg.contains("\"score\": ,"));
    }

    #[test]
    fn not_ready_display() {
        let e = TaskError::NotReady {
            task_id: "abc".into(),
            status: TaskStatus::Processing,
            progress: 30,
        };
        let msg = e.to_string();
        assert!(msg.contains("processing"));
        assert!(msg.contains("30%"));
    }
}
