//! Task orchestration: submission, worker pool, status and result queries.
//!
//! ## Why a queue instead of spawning per request?
//!
//! `submit` must return a task id immediately while the analysis can take
//! minutes. Jobs go onto an unbounded channel drained by a single
//! dispatcher that runs at most `workers` pipelines at once
//! (`for_each_concurrent`), so a burst of submissions cannot open an
//! unbounded number of provider connections.
//!
//! ## Who writes the task record?
//!
//! Only the worker that owns a task writes its progress. A cancel is an
//! external overwrite to `failed`; the pipeline keeps running, and its
//! final write is rejected by the store because the task is already
//! terminal.
//!
//! ## Pre-flight
//!
//! The input format is probed at submission. An unsupported or missing
//! file fails the task straight from `pending`; it never reaches
//! `processing` and never occupies a worker.

use crate::analyze::{analyze_report, AnalysisRequest};
use crate::config::{AnalyzerConfig, BackendKind, BackendOverrides, ConfigResolver};
use crate::error::{AnalyzerError, TaskError};
use crate::files::FileResolver;
use crate::output::AnalysisResult;
use crate::pipeline::backend::HttpTransport;
use crate::pipeline::input;
use crate::progress::{AnalysisProgressCallback, Checkpoint};
use crate::task::{AnalysisTask, TaskFilter, TaskStatus, TaskStore, TaskUpdate};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{error, info, warn};

/// Error stored on a task cancelled by the user.
pub const CANCELLED_MESSAGE: &str = "task cancelled by user";

/// A request to analyse one report.
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub file_path: PathBuf,
    /// Display name; defaults to the file name of `file_path`.
    pub filename: Option<String>,
    /// `local` / `cloud-a` / `cloud-b` or `ollama` / `openai` / `anthropic`.
    pub backend: String,
    pub overrides: BackendOverrides,
    pub skip_images: bool,
}

impl SubmitRequest {
    pub fn new(file_path: impl Into<PathBuf>, backend: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            backend: backend.into(),
            ..Default::default()
        }
    }

    pub fn filename(mut self, name: impl Into<String>) -> Self {
        self.filename = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.overrides.model = Some(model.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.overrides.api_key = Some(key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.overrides.base_url = Some(url.into());
        self
    }

    pub fn skip_images(mut self, skip: bool) -> Self {
        self.skip_images = skip;
        self
    }
}

/// Queued work for one task. Credentials live here, never in the record.
struct Job {
    task_id: String,
    request: AnalysisRequest,
}

struct Shared {
    config: AnalyzerConfig,
    resolver: ConfigResolver,
    store: Arc<dyn TaskStore>,
    transport: Arc<dyn HttpTransport>,
    files: Arc<dyn FileResolver>,
    updates: watch::Sender<u64>,
}

/// Drives analysis tasks from submission to a terminal state.
///
/// Cheap to clone; clones share the queue and the store.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
    jobs: mpsc::UnboundedSender<Job>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.shared.config)
            .field("resolver", &self.shared.resolver)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Start the worker pool. Must be called inside a Tokio runtime.
    pub fn new(
        config: AnalyzerConfig,
        resolver: ConfigResolver,
        store: Arc<dyn TaskStore>,
        transport: Arc<dyn HttpTransport>,
        files: Arc<dyn FileResolver>,
    ) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel::<Job>();
        let (updates, _) = watch::channel(0u64);
        let workers = config.workers.max(1);
        let shared = Arc::new(Shared {
            config,
            resolver,
            store,
            transport,
            files,
            updates,
        });

        let pool = Arc::clone(&shared);
        tokio::spawn(async move {
            UnboundedReceiverStream::new(rx)
                .for_each_concurrent(workers, |job| {
                    let shared = Arc::clone(&pool);
                    async move { shared.run(job).await }
                })
                .await;
        });
        info!("Orchestrator started with {} workers", workers);

        Self { shared, jobs }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.shared.store
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.shared.resolver
    }

    /// Create a task and queue it; returns the task id immediately.
    ///
    /// Fails with [`TaskError::Validation`] for an unknown backend. A file
    /// that cannot be analysed still yields a task id; that task is already
    /// `failed`.
    pub fn submit(&self, request: SubmitRequest) -> Result<String, TaskError> {
        let kind: BackendKind = request.backend.parse().map_err(TaskError::Validation)?;
        let settings = self.shared.resolver.resolve(kind, &request.overrides);

        let filename = request.filename.clone().unwrap_or_else(|| {
            request
                .file_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        let task = AnalysisTask::new(
            filename,
            &request.file_path,
            kind,
            &settings.model,
            request.skip_images,
        );
        let task_id = task.id.clone();
        self.shared.store.create(task)?;
        self.shared.notify();
        info!(
            "Task {} submitted: {} via {} ({})",
            task_id,
            request.file_path.display(),
            kind,
            settings.model
        );

        if let Err(e) = input::probe(&request.file_path) {
            warn!("Task {} rejected before processing: {}", task_id, e);
            self.shared.finish(&task_id, Err(e));
            return Ok(task_id);
        }

        let job = Job {
            task_id: task_id.clone(),
            request: AnalysisRequest {
                path: request.file_path,
                backend: kind,
                settings,
                skip_images: request.skip_images,
            },
        };
        if self.jobs.send(job).is_err() {
            self.shared.finish(
                &task_id,
                Err(AnalyzerError::Internal("worker pool is not running".into())),
            );
        }
        Ok(task_id)
    }

    /// Submit a previously uploaded file by id.
    pub fn submit_upload(&self, file_id: &str, mut request: SubmitRequest) -> Result<String, TaskError> {
        request.file_path = self.shared.files.resolve(file_id)?;
        self.submit(request)
    }

    pub fn get_status(&self, task_id: &str) -> Result<AnalysisTask, TaskError> {
        self.shared
            .store
            .get(task_id)
            .ok_or_else(|| TaskError::NotFound {
                task_id: task_id.to_string(),
            })
    }

    /// The result of a completed task.
    pub fn get_result(&self, task_id: &str) -> Result<AnalysisResult, TaskError> {
        let task = self.get_status(task_id)?;
        match task.status {
            status if !status.is_terminal() => Err(TaskError::NotReady {
                task_id: task.id,
                status,
                progress: task.progress,
            }),
            TaskStatus::Failed => Err(TaskError::Failed {
                task_id: task.id,
                error: task.error.unwrap_or_default(),
            }),
            _ => task.result.ok_or(TaskError::MissingResult { task_id: task.id }),
        }
    }

    /// Mark a pending or processing task as failed. Work already in flight
    /// is not interrupted.
    pub fn cancel(&self, task_id: &str) -> Result<AnalysisTask, TaskError> {
        let task = self
            .shared
            .store
            .update(task_id, TaskUpdate::failed(CANCELLED_MESSAGE))?;
        self.shared.notify();
        info!("Task {} cancelled", task_id);
        Ok(task)
    }

    pub fn list(&self, filter: &TaskFilter) -> Vec<AnalysisTask> {
        self.shared.store.list(filter)
    }

    pub fn delete(&self, task_id: &str) -> Result<AnalysisTask, TaskError> {
        let task = self.shared.store.delete(task_id)?;
        self.shared.notify();
        info!("Task {} deleted", task_id);
        Ok(task)
    }

    /// Wait until the task is terminal, calling `on_update` with every
    /// snapshot observed on the way.
    pub async fn wait_for(
        &self,
        task_id: &str,
        mut on_update: impl FnMut(&AnalysisTask),
    ) -> Result<AnalysisTask, TaskError> {
        let mut updates = self.shared.updates.subscribe();
        loop {
            let task = self.get_status(task_id)?;
            on_update(&task);
            if task.status.is_terminal() {
                return Ok(task);
            }
            if updates.changed().await.is_err() {
                return Err(TaskError::NotReady {
                    task_id: task.id,
                    status: task.status,
                    progress: task.progress,
                });
            }
        }
    }
}

// ── Worker side ──────────────────────────────────────────────────────────

impl Shared {
    fn notify(&self) {
        self.updates.send_modify(|v| *v = v.wrapping_add(1));
    }

    async fn run(self: Arc<Self>, job: Job) {
        let Job { task_id, request } = job;
        if let Err(e) = self.store.update(&task_id, TaskUpdate::processing()) {
            info!("Task {} not started: {}", task_id, e);
            return;
        }
        self.notify();
        info!("Task {} processing", task_id);

        let progress = TaskProgress {
            shared: Arc::clone(&self),
            task_id: task_id.clone(),
        };
        let config = self.config.clone();
        let transport = Arc::clone(&self.transport);
        let handle = tokio::spawn(async move {
            analyze_report(&request, &config, transport, &progress).await
        });
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(AnalyzerError::Internal(format!(
                "Analysis task panicked: {}",
                e
            ))),
        };
        self.finish(&task_id, outcome);
    }

    /// Write the terminal state for `task_id`.
    fn finish(&self, task_id: &str, outcome: Result<AnalysisResult, AnalyzerError>) {
        let update = match outcome {
            Ok(result) => {
                info!(
                    "Task {} completed: {:.2} ({})",
                    task_id, result.total_score, result.grade
                );
                TaskUpdate::completed(result)
            }
            Err(e) => {
                error!("Task {} failed: {}", task_id, e);
                TaskUpdate::failed(e.task_message())
            }
        };
        match self.store.update(task_id, update) {
            Ok(_) => self.notify(),
            Err(e) => warn!("Task {}: terminal write rejected: {}", task_id, e),
        }
    }
}

/// Forwards pipeline checkpoints into the task record.
struct TaskProgress {
    shared: Arc<Shared>,
    task_id: String,
}

impl AnalysisProgressCallback for TaskProgress {
    fn on_checkpoint(&self, checkpoint: Checkpoint) {
        let update = TaskUpdate::checkpoint(checkpoint.progress(), checkpoint.message());
        match self.shared.store.update(&self.task_id, update) {
            Ok(_) => self.shared.notify(),
            Err(e) => warn!("Task {}: progress write rejected: {}", self.task_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvDefaults, InMemoryConfigStore};
    use crate::files::UploadDir;
    use crate::pipeline::backend::TransportError;
    use crate::task::InMemoryTaskStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::Notify;

    /// Holds every call until released.
    struct Gate {
        release: Notify,
    }

    #[async_trait]
    impl HttpTransport for Gate {
        async fn post_json(
            &self,
            _url: &str,
            _headers: &[(&str, String)],
            _body: &Value,
        ) -> Result<Value, TransportError> {
            self.release.notified().await;
            Ok(json!({ "message": { "content": "not json" } }))
        }
    }

    fn orchestrator(
        transport: Arc<dyn HttpTransport>,
        uploads: Arc<dyn FileResolver>,
    ) -> Orchestrator {
        Orchestrator::new(
            AnalyzerConfig::default(),
            ConfigResolver::new(Arc::new(InMemoryConfigStore::new()), EnvDefaults::default()),
            Arc::new(InMemoryTaskStore::new()),
            transport,
            uploads,
        )
    }

    #[tokio::test]
    async fn unknown_backend_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(
            Arc::new(Gate { release: Notify::new() }),
            Arc::new(UploadDir::new(dir.path()).unwrap()),
        );
        let err = orch
            .submit(SubmitRequest::new(dir.path().join("a.txt"), "gemini"))
            .unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
        assert!(orch.list(&TaskFilter::default()).is_empty());
    }

    #[tokio::test]
    async fn cancel_wins_over_late_completion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fa.txt");
        std::fs::write(&path, "FA report").unwrap();

        let gate = Arc::new(Gate { release: Notify::new() });
        let orch = orchestrator(gate.clone(), Arc::new(UploadDir::new(dir.path()).unwrap()));
        let id = orch.submit(SubmitRequest::new(&path, "local")).unwrap();

        // Wait until the pipeline is blocked inside the provider call.
        let mut updates = orch.shared.updates.subscribe();
        while orch.get_status(&id).unwrap().progress < 30 {
            updates.changed().await.unwrap();
        }

        let cancelled = orch.cancel(&id).unwrap();
        assert_eq!(cancelled.status, TaskStatus::Failed);

        gate.release.notify_one();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let task = orch.get_status(&id).unwrap();
        assert_eq!(task.error.as_deref(), Some(CANCELLED_MESSAGE));
        assert!(matches!(
            orch.get_result(&id),
            Err(TaskError::Failed { .. })
        ));
        assert!(matches!(
            orch.cancel(&id),
            Err(TaskError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn result_not_ready_while_processing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fa.txt");
        std::fs::write(&path, "FA report").unwrap();
        let gate = Arc::new(Gate { release: Notify::new() });
        let orch = orchestrator(gate.clone(), Arc::new(UploadDir::new(dir.path()).unwrap()));

        let id = orch.submit(SubmitRequest::new(&path, "ollama")).unwrap();
        assert!(matches!(
            orch.get_result(&id),
            Err(TaskError::NotReady { .. })
        ));

        gate.release.notify_one();
        let done = orch.wait_for(&id, |_| {}).await.unwrap();
        assert_eq!(done.status, TaskStatus::Failed);
        assert!(done
            .error
            .as_deref()
            .unwrap()
            .starts_with("MalformedResponse: "));
    }

    #[tokio::test]
    async fn submit_upload_resolves_file_id() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = Arc::new(UploadDir::new(dir.path()).unwrap());
        let stored = uploads.save("report.xyz.txt", b"FA").unwrap();
        let gate = Arc::new(Gate { release: Notify::new() });
        let orch = orchestrator(gate.clone(), uploads);

        let id = orch
            .submit_upload(
                &stored.file_id,
                SubmitRequest::new("", "local").filename("report.xyz.txt"),
            )
            .unwrap();
        let task = orch.get_status(&id).unwrap();
        assert_eq!(task.filename, "report.xyz.txt");
        assert_eq!(task.file_path, stored.path);

        assert!(matches!(
            orch.submit_upload("missing", SubmitRequest::new("", "local")),
            Err(TaskError::FileNotFound { .. })
        ));

        orch.delete(&id).unwrap();
        assert!(matches!(orch.get_status(&id), Err(TaskError::NotFound { .. })));
        gate.release.notify_one();
    }
}
