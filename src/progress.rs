//! Progress-callback trait for analysis pipeline checkpoints.
//!
//! The pipeline reports progress only at coarse checkpoints (report read,
//! analysis started). The orchestrator forwards them into the task store;
//! the CLI drives a progress bar from the same events.
//!
//! # Why callbacks instead of channels?
//!
//! The callback is the least-invasive integration point: the host can write
//! a task record, update a terminal bar, or forward to a broadcast channel
//! without the pipeline knowing how it communicates. The trait is
//! `Send + Sync` so one callback can be shared by concurrent pipelines.
//!
//! # Example
//!
//! ```rust
//! use fa_report_analyzer::{AnalysisProgressCallback, Checkpoint};
//! use std::sync::atomic::{AtomicU8, Ordering};
//!
//! struct LastProgress(AtomicU8);
//!
//! impl AnalysisProgressCallback for LastProgress {
//!     fn on_checkpoint(&self, checkpoint: Checkpoint) {
//!         self.0.store(checkpoint.progress(), Ordering::SeqCst);
//!     }
//! }
//!
//! let cb = LastProgress(AtomicU8::new(0));
//! cb.on_checkpoint(Checkpoint::Reading);
//! assert_eq!(cb.0.load(Ordering::SeqCst), 10);
//! ```

use std::sync::Arc;

/// A progress checkpoint inside one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// About to read and extract the report.
    Reading,
    /// Content extracted; about to call the backend.
    Analyzing,
}

impl Checkpoint {
    pub fn progress(&self) -> u8 {
        match self {
            Checkpoint::Reading => 10,
            Checkpoint::Analyzing => 30,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Checkpoint::Reading => "Reading report...",
            Checkpoint::Analyzing => "Starting AI analysis...",
        }
    }
}

/// Called by the analysis pipeline as it moves through its stages.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait AnalysisProgressCallback: Send + Sync {
    /// Called when the pipeline reaches a checkpoint.
    fn on_checkpoint(&self, checkpoint: Checkpoint) {
        let _ = checkpoint;
    }

    /// Called after ingestion with the size of what will be sent.
    ///
    /// # Arguments
    /// * `text_chars`: characters of extracted text
    /// * `image_count`: images that will be transmitted (after skip-images)
    fn on_content_extracted(&self, text_chars: usize, image_count: usize) {
        let _ = (text_chars, image_count);
    }

    /// Called when the backend returned raw text, before normalisation.
    fn on_response_received(&self, response_chars: usize) {
        let _ = response_chars;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AnalysisProgressCallback for NoopProgressCallback {}

/// Convenience alias for a shared callback.
pub type ProgressCallback = Arc<dyn AnalysisProgressCallback>;
