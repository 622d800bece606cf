//! # fa-report-analyzer
//!
//! Score failure-analysis (FA) reports against a fixed six-dimension rubric
//! using a local or cloud LLM.
//!
//! ## Why this crate?
//!
//! FA reports arrive as PDFs, Word files, slide decks, scans and plain text.
//! Reviewing them against a consistent rubric by hand is slow and uneven.
//! This crate extracts each report's text and figures, asks an LLM to score
//! it, and turns the free-form reply into a strict, machine-checkable
//! [`AnalysisResult`] with a letter grade.
//!
//! ## Pipeline Overview
//!
//! ```text
//! report file
//!  │
//!  ├─ 1. Input      probe format; convert legacy .doc/.ppt via an office suite
//!  ├─ 2. Ingest     text + embedded images (pdfium / OOXML / plain / image)
//!  ├─ 3. Prompt     rubric + schema sketch + report text
//!  ├─ 4. Backend    ollama / openai / anthropic envelope over HTTP
//!  ├─ 5. Normalise  fence/prose/percent cleanup, strict parse, dimension check
//!  └─ 6. Grade      letter grade from the total score
//! ```
//!
//! [`Orchestrator`] runs that pipeline as background tasks with a
//! `pending → processing → completed | failed` lifecycle.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fa_report_analyzer::{
//!     AnalyzerConfig, ConfigResolver, InMemoryTaskStore, Orchestrator, ReqwestTransport,
//!     SubmitRequest, UploadDir,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AnalyzerConfig::builder().workers(2).build()?;
//!     let transport = Arc::new(ReqwestTransport::new(config.api_timeout_secs)?);
//!     let orchestrator = Orchestrator::new(
//!         config,
//!         ConfigResolver::from_env(),
//!         Arc::new(InMemoryTaskStore::new()),
//!         transport,
//!         Arc::new(UploadDir::new("uploads")?),
//!     );
//!
//!     let id = orchestrator.submit(SubmitRequest::new("fa_report.pdf", "local"))?;
//!     let task = orchestrator.wait_for(&id, |t| eprintln!("{}%", t.progress)).await?;
//!     println!("{:?}", task.result.map(|r| r.grade));
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `fa-analyze` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! ## Backends
//!
//! | Name | Alias | Default model | Credentials |
//! |------|-------|---------------|-------------|
//! | `ollama` | `local` | `llama3.1:latest` | optional |
//! | `openai` | `cloud-a` | `gpt-4o-mini-2024-07-18` | `OPENAI_API_KEY` |
//! | `anthropic` | `cloud-b` | `claude-sonnet-4-20250514` | `ANTHROPIC_API_KEY` |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod error;
pub mod files;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod report;
pub mod rubric;
pub mod task;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{analyze_report, AnalysisRequest};
pub use config::{
    AnalyzerConfig, AnalyzerConfigBuilder, BackendKind, BackendOverrides, BackendSettings,
    ConfigResolver, ConfigStore, EnvDefaults, InMemoryConfigStore,
};
pub use error::{AnalyzerError, ErrorKind, TaskError};
pub use files::{FileResolver, StoredUpload, UploadDir};
pub use orchestrator::{Orchestrator, SubmitRequest};
pub use output::{AnalysisResult, DimensionScore, ExtractedContent, ExtractedImage, Improvement};
pub use pipeline::backend::{Backend, HttpTransport, ReqwestTransport, TransportError};
pub use progress::{AnalysisProgressCallback, Checkpoint, NoopProgressCallback, ProgressCallback};
pub use report::render_text_report;
pub use rubric::{calculate_grade, Grade};
pub use task::{AnalysisTask, InMemoryTaskStore, TaskFilter, TaskStatus, TaskStore, TaskUpdate};
