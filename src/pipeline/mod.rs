//! Pipeline stages for FA report analysis.
//!
//! Each submodule implements one transformation step and is testable on
//! its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ ingest ──▶ (prompt) ──▶ backend ──▶ postprocess
//! (probe/convert)  (pdf/office/encode)   (HTTP)     (normalise)
//! ```
//!
//! 1. [`input`]: probe the extension; convert legacy `.doc`/`.ppt` into a
//!    scratch directory removed on drop
//! 2. [`ingest`]: dispatch to [`pdf`], [`office`] or the plain/image readers
//! 3. [`encode`]: base64-wrap image bytes with a format tag
//! 4. [`backend`]: provider envelopes, transport, refusal detection; the only
//!    stage with network I/O
//! 5. [`postprocess`]: clean and parse the model reply into an
//!    [`crate::AnalysisResult`]

pub mod backend;
pub mod encode;
pub mod ingest;
pub mod input;
pub mod office;
pub mod pdf;
pub mod postprocess;
