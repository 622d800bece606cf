//! Analysis task records and the task-store interface.
//!
//! ## State machine
//!
//! ```text
//! pending ──► processing ──► completed
//!    │             │
//!    └─────────────┴───────► failed
//! ```
//!
//! `completed` and `failed` are terminal. The store enforces the machine on
//! every write: a transition out of a terminal state is rejected, progress
//! never decreases, a `completed` record always carries a result and a
//! `failed` record always carries an error. A pipeline that finishes after
//! its task was cancelled therefore cannot overwrite the cancellation.

use crate::config::BackendKind;
use crate::error::TaskError;
use crate::output::AnalysisResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

/// Default page size of [`TaskFilter`].
pub const DEFAULT_LIST_LIMIT: usize = 50;

// ── Status ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine allows `self → next`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Record ───────────────────────────────────────────────────────────────

/// One submitted analysis job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisTask {
    pub id: String,
    pub filename: String,
    pub file_path: PathBuf,
    pub status: TaskStatus,
    /// 0–100.
    pub progress: u8,
    pub message: String,
    pub backend: BackendKind,
    pub model: String,
    pub skip_images: bool,
    /// Present only when `completed`.
    pub result: Option<AnalysisResult>,
    /// Present only when `failed`.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisTask {
    /// A fresh `pending` task with a random id.
    pub fn new(
        filename: impl Into<String>,
        file_path: impl Into<PathBuf>,
        backend: BackendKind,
        model: impl Into<String>,
        skip_images: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            filename: filename.into(),
            file_path: file_path.into(),
            status: TaskStatus::Pending,
            progress: 0,
            message: "Waiting to start".to_string(),
            backend,
            model: model.into(),
            skip_images,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Apply a partial update, enforcing the state machine.
    fn apply(&mut self, update: TaskUpdate) -> Result<(), TaskError> {
        if self.status.is_terminal() {
            return Err(TaskError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status,
                to: update.status.unwrap_or(self.status),
            });
        }

        let next = update.status.unwrap_or(self.status);
        if next != self.status && !self.status.can_transition_to(next) {
            return Err(TaskError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        match next {
            TaskStatus::Completed if update.result.is_none() => {
                return Err(TaskError::Validation(format!(
                    "task {} cannot complete without a result",
                    self.id
                )))
            }
            TaskStatus::Failed if update.error.is_none() => {
                return Err(TaskError::Validation(format!(
                    "task {} cannot fail without an error",
                    self.id
                )))
            }
            _ => {}
        }

        let now = Utc::now();
        self.status = next;
        if let Some(progress) = update.progress {
            self.progress = self.progress.max(progress.min(100));
        }
        if let Some(message) = update.message {
            self.message = message;
        }
        match next {
            TaskStatus::Completed => {
                self.progress = 100;
                self.result = update.result;
                self.error = None;
                self.completed_at = Some(now);
            }
            TaskStatus::Failed => {
                self.error = update.error;
                self.result = None;
                self.completed_at = Some(now);
            }
            _ => {}
        }
        self.updated_at = now;
        Ok(())
    }
}

/// Partial update of an [`AnalysisTask`]; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub result: Option<AnalysisResult>,
    pub error: Option<String>,
}

impl TaskUpdate {
    pub fn processing() -> Self {
        Self {
            status: Some(TaskStatus::Processing),
            progress: Some(0),
            message: Some("Processing...".to_string()),
            ..Default::default()
        }
    }

    pub fn checkpoint(progress: u8, message: impl Into<String>) -> Self {
        Self {
            progress: Some(progress),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn completed(result: AnalysisResult) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            progress: Some(100),
            message: Some("Analysis completed".to_string()),
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            status: Some(TaskStatus::Failed),
            message: Some(format!("Analysis failed: {error}")),
            error: Some(error),
            ..Default::default()
        }
    }
}

// ── Query ────────────────────────────────────────────────────────────────

/// History query; results are newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub backend: Option<BackendKind>,
    /// Case-insensitive substring of the filename.
    pub filename_contains: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self {
            status: None,
            backend: None,
            filename_contains: None,
            limit: DEFAULT_LIST_LIMIT,
            offset: 0,
        }
    }
}

impl TaskFilter {
    fn matches(&self, task: &AnalysisTask) -> bool {
        self.status.map_or(true, |s| task.status == s)
            && self.backend.map_or(true, |b| task.backend == b)
            && self.filename_contains.as_deref().map_or(true, |needle| {
                task.filename
                    .to_lowercase()
                    .contains(&needle.to_lowercase())
            })
    }
}

// ── Store ────────────────────────────────────────────────────────────────

/// Persistence of task records.
///
/// Implementations serialise writes per record and must apply
/// [`TaskUpdate`]s without clobbering fields the update leaves `None`.
pub trait TaskStore: Send + Sync {
    fn create(&self, task: AnalysisTask) -> Result<(), TaskError>;
    fn get(&self, task_id: &str) -> Option<AnalysisTask>;
    /// Apply `update` and return the new snapshot.
    fn update(&self, task_id: &str, update: TaskUpdate) -> Result<AnalysisTask, TaskError>;
    fn list(&self, filter: &TaskFilter) -> Vec<AnalysisTask>;
    fn delete(&self, task_id: &str) -> Result<AnalysisTask, TaskError>;
}

/// Process-local [`TaskStore`].
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    inner: Mutex<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    tasks: HashMap<String, (u64, AnalysisTask)>,
    next_seq: u64,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TaskStore for InMemoryTaskStore {
    fn create(&self, task: AnalysisTask) -> Result<(), TaskError> {
        let mut inner = self.lock();
        if inner.tasks.contains_key(&task.id) {
            return Err(TaskError::Validation(format!(
                "task {} already exists",
                task.id
            )));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.tasks.insert(task.id.clone(), (seq, task));
        Ok(())
    }

    fn get(&self, task_id: &str) -> Option<AnalysisTask> {
        self.lock().tasks.get(task_id).map(|(_, t)| t.clone())
    }

    fn update(&self, task_id: &str, update: TaskUpdate) -> Result<AnalysisTask, TaskError> {
        let mut inner = self.lock();
        let (_, task) = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskError::NotFound {
                task_id: task_id.to_string(),
            })?;
        task.apply(update)?;
        Ok(task.clone())
    }

    fn list(&self, filter: &TaskFilter) -> Vec<AnalysisTask> {
        let inner = self.lock();
        let mut matching: Vec<&(u64, AnalysisTask)> = inner
            .tasks
            .values()
            .filter(|(_, t)| filter.matches(t))
            .collect();
        matching.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
        });
        matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .map(|(_, t)| t.clone())
            .collect()
    }

    fn delete(&self, task_id: &str) -> Result<AnalysisTask, TaskError> {
        self.lock()
            .tasks
            .remove(task_id)
            .map(|(_, t)| t)
            .ok_or_else(|| TaskError::NotFound {
                task_id: task_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rubric::Grade;
    use std::collections::BTreeMap;

    fn result() -> AnalysisResult {
        AnalysisResult {
            total_score: 85.0,
            grade: Grade::B,
            grade_description: "良好報告".into(),
            dimension_scores: BTreeMap::new(),
            strengths: vec![],
            improvements: vec![],
            summary: String::new(),
        }
    }

    fn store_with(name: &str) -> (InMemoryTaskStore, String) {
        let store = InMemoryTaskStore::new();
        let task = AnalysisTask::new(name, "/tmp/x.txt", BackendKind::Ollama, "m", false);
        let id = task.id.clone();
        store.create(task).unwrap();
        (store, id)
    }

    #[test]
    fn status_serialises_lowercase() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Processing).unwrap(),
            "\"processing\""
        );
        assert_eq!(TaskStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn happy_path_reaches_completed() {
        let (store, id) = store_with("a.txt");
        store.update(&id, TaskUpdate::processing()).unwrap();
        store.update(&id, TaskUpdate::checkpoint(10, "reading")).unwrap();
        store.update(&id, TaskUpdate::checkpoint(30, "analysing")).unwrap();
        let done = store.update(&id, TaskUpdate::completed(result())).unwrap();

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.progress, 100);
        assert!(done.result.is_some());
        assert!(done.error.is_none());
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn progress_never_decreases() {
        let (store, id) = store_with("a.txt");
        store.update(&id, TaskUpdate::processing()).unwrap();
        store.update(&id, TaskUpdate::checkpoint(30, "x")).unwrap();
        let t = store.update(&id, TaskUpdate::checkpoint(10, "y")).unwrap();
        assert_eq!(t.progress, 30);
        assert_eq!(t.message, "y");
    }

    #[test]
    fn terminal_states_are_final() {
        let (store, id) = store_with("a.txt");
        store.update(&id, TaskUpdate::failed("task cancelled by user")).unwrap();
        let err = store
            .update(&id, TaskUpdate::completed(result()))
            .unwrap_err();
        assert!(matches!(
            err,
            TaskError::InvalidTransition {
                from: TaskStatus::Failed,
                to: TaskStatus::Completed,
                ..
            }
        ));
        let t = store.get(&id).unwrap();
        assert_eq!(t.error.as_deref(), Some("task cancelled by user"));
        assert!(t.result.is_none());
    }

    #[test]
    fn pending_cannot_complete_directly() {
        let (store, id) = store_with("a.txt");
        let err = store
            .update(&id, TaskUpdate::completed(result()))
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
    }

    #[test]
    fn completion_requires_result() {
        let (store, id) = store_with("a.txt");
        store.update(&id, TaskUpdate::processing()).unwrap();
        let bare = TaskUpdate {
            status: Some(TaskStatus::Completed),
            ..Default::default()
        };
        assert!(matches!(
            store.update(&id, bare),
            Err(TaskError::Validation(_))
        ));
        assert_eq!(store.get(&id).unwrap().status, TaskStatus::Processing);
    }

    #[test]
    fn list_is_newest_first_and_filtered() {
        let store = InMemoryTaskStore::new();
        for name in ["first.pdf", "second.txt", "third.PDF"] {
            store
                .create(AnalysisTask::new(name, name, BackendKind::Ollama, "m", false))
                .unwrap();
        }
        let names: Vec<String> = store
            .list(&TaskFilter::default())
            .into_iter()
            .map(|t| t.filename)
            .collect();
        assert_eq!(names, vec!["third.PDF", "second.txt", "first.pdf"]);

        let pdfs = store.list(&TaskFilter {
            filename_contains: Some(".pdf".into()),
            ..Default::default()
        });
        assert_eq!(pdfs.len(), 2);

        let page = store.list(&TaskFilter {
            limit: 1,
            offset: 1,
            ..Default::default()
        });
        assert_eq!(page[0].filename, "second.txt");

        let none = store.list(&TaskFilter {
            backend: Some(BackendKind::OpenAi),
            ..Default::default()
        });
        assert!(none.is_empty());
    }

    #[test]
    fn delete_and_not_found() {
        let (store, id) = store_with("a.txt");
        store.delete(&id).unwrap();
        assert!(store.get(&id).is_none());
        assert!(matches!(store.delete(&id), Err(TaskError::NotFound { .. })));
        assert!(matches!(
            store.update(&id, TaskUpdate::processing()),
            Err(TaskError::NotFound { .. })
        ));
    }
}
