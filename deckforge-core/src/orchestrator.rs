//! Generation Task Orchestrator
//!
//! # State machine
//! `pending -> processing -> completed | failed`. The transition out of
//! `pending` happens once per task; every later `run` returns the current
//! status. Failures during a run are recorded on the task and polled,
//! never raised to the caller.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::hashing::{compute_artifact_hash, compute_job_hash};
use crate::mapping::{self, ContentMapping, MappingError};
use crate::retention::RetentionPolicy;
use crate::templates::Template;
use crate::writer::write_artifact;
use crate::ENGINE_VERSION;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        })
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Task {task_id} is not ready (status: {status})")]
    NotReady { task_id: String, status: TaskStatus },

    #[error("Task {task_id} failed: {error}")]
    Failed { task_id: String, error: String },

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error("Cannot hash task inputs: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Artifact I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a run may change, swapped under one lock.
#[derive(Debug, Clone)]
struct TaskState {
    status: TaskStatus,
    output_path: Option<PathBuf>,
    error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    artifact_hash: Option<String>,
}

/// One generation request. Inputs are fixed at creation.
#[derive(Debug)]
pub struct GenerationTask {
    pub task_id: String,
    pub template: Arc<Template>,
    pub mappings: Vec<ContentMapping>,
    pub job_hash: String,
    pub created_at: DateTime<Utc>,
    state: Mutex<TaskState>,
}

/// Point-in-time view of a task, as reported to pollers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub template_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub mapping_count: usize,
    pub job_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_hash: Option<String>,
}

impl GenerationTask {
    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.state.lock().clone();
        TaskSnapshot {
            task_id: self.task_id.clone(),
            template_id: self.template.template_id.clone(),
            status: state.status,
            output_path: state.output_path,
            error: state.error,
            created_at: self.created_at,
            started_at: state.started_at,
            completed_at: state.completed_at,
            mapping_count: self.mappings.len(),
            job_hash: self.job_hash.clone(),
            artifact_hash: state.artifact_hash,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    /// Claim the task for execution. Only the first caller gets `true`.
    fn begin(&self) -> bool {
        let mut state = self.state.lock();
        if state.status != TaskStatus::Pending {
            return false;
        }
        state.status = TaskStatus::Processing;
        state.started_at = Some(Utc::now());
        true
    }

    fn complete(&self, output_path: PathBuf, artifact_hash: String) {
        let mut state = self.state.lock();
        state.status = TaskStatus::Completed;
        state.output_path = Some(output_path);
        state.artifact_hash = Some(artifact_hash);
        state.completed_at = Some(Utc::now());
    }

    fn fail(&self, error: String) {
        let mut state = self.state.lock();
        state.status = TaskStatus::Failed;
        state.error = Some(error);
        state.completed_at = Some(Utc::now());
    }
}

/// Owns every generation task and the directory their artifacts live in.
pub struct Orchestrator {
    output_dir: PathBuf,
    tasks: RwLock<HashMap<String, Arc<GenerationTask>>>,
}

impl Orchestrator {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self, std::io::Error> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)?;
        Ok(Self { output_dir, tasks: RwLock::new(HashMap::new()) })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Validate every mapping and store the task as `pending`.
    ///
    /// Nothing is stored when any mapping is rejected.
    pub fn create(&self, template: Arc<Template>, mappings: Vec<ContentMapping>) -> Result<TaskSnapshot, TaskError> {
        for m in &mappings {
            mapping::validate(&template, m)?;
        }
        let job_hash = compute_job_hash(&template.template_id, &mappings, ENGINE_VERSION)?;

        let task = Arc::new(GenerationTask {
            task_id: Uuid::new_v4().to_string(),
            template,
            mappings,
            job_hash,
            created_at: Utc::now(),
            state: Mutex::new(TaskState {
                status: TaskStatus::Pending,
                output_path: None,
                error: None,
                started_at: None,
                completed_at: None,
                artifact_hash: None,
            }),
        });

        tracing::info!(
            task_id = %task.task_id,
            template_id = %task.template.template_id,
            mappings = task.mappings.len(),
            "Generation task created"
        );
        let snapshot = task.snapshot();
        self.tasks.write().insert(task.task_id.clone(), task);
        Ok(snapshot)
    }

    fn task(&self, task_id: &str) -> Result<Arc<GenerationTask>, TaskError> {
        self.tasks
            .read()
            .get(task_id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }

    /// Execute a pending task to a terminal state on the calling thread.
    ///
    /// A task that already left `pending` is not touched; its current
    /// status is returned.
    pub fn run(&self, task_id: &str) -> Result<TaskStatus, TaskError> {
        let task = self.task(task_id)?;
        if !task.begin() {
            let status = task.status();
            tracing::debug!(task_id, %status, "Run skipped, task already claimed");
            return Ok(status);
        }
        tracing::info!(task_id, "Generation task processing");

        let dest = self.output_dir.join(format!("{}.pptx", task.task_id));
        match self.produce(&task, &dest) {
            Ok(artifact_hash) => {
                tracing::info!(task_id, path = %dest.display(), "Generation task completed");
                task.complete(dest, artifact_hash);
            }
            Err(e) => {
                tracing::error!(task_id, error = %e, "Generation task failed");
                task.fail(e);
            }
        }
        Ok(task.status())
    }

    fn produce(&self, task: &GenerationTask, dest: &Path) -> Result<String, String> {
        let working = task.template.with_mappings(&task.mappings);
        write_artifact(&working, &task.mappings, dest).map_err(|e| e.to_string())?;
        let bytes = fs::read(dest).map_err(|e| format!("Cannot read written artifact: {}", e))?;
        Ok(compute_artifact_hash(&bytes))
    }

    /// Run the task on tokio's blocking pool. Requires a tokio runtime.
    pub fn dispatch(self: &Arc<Self>, task_id: &str) -> JoinHandle<Result<TaskStatus, TaskError>> {
        let this = Arc::clone(self);
        let task_id = task_id.to_string();
        tokio::task::spawn_blocking(move || this.run(&task_id))
    }

    /// `create` followed by `dispatch`; the caller polls `status`.
    pub fn submit(
        self: &Arc<Self>,
        template: Arc<Template>,
        mappings: Vec<ContentMapping>,
    ) -> Result<TaskSnapshot, TaskError> {
        let snapshot = self.create(template, mappings)?;
        drop(self.dispatch(&snapshot.task_id));
        Ok(snapshot)
    }

    pub fn status(&self, task_id: &str) -> Result<TaskSnapshot, TaskError> {
        Ok(self.task(task_id)?.snapshot())
    }

    /// Path of a completed task's artifact.
    pub fn artifact_path(&self, task_id: &str) -> Result<PathBuf, TaskError> {
        let snapshot = self.status(task_id)?;
        match (snapshot.status, snapshot.output_path) {
            (TaskStatus::Completed, Some(path)) => Ok(path),
            (TaskStatus::Failed, _) => Err(TaskError::Failed {
                task_id: snapshot.task_id,
                error: snapshot.error.unwrap_or_default(),
            }),
            (status, _) => Err(TaskError::NotReady { task_id: snapshot.task_id, status }),
        }
    }

    /// Artifact bytes once `completed`.
    pub fn artifact(&self, task_id: &str) -> Result<Vec<u8>, TaskError> {
        let path = self.artifact_path(task_id)?;
        Ok(fs::read(path)?)
    }

    pub fn list(&self) -> Vec<TaskSnapshot> {
        let mut all: Vec<_> = self.tasks.read().values().map(|t| t.snapshot()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.task_id.cmp(&b.task_id)));
        all
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop terminal tasks older than the policy allows, deleting their
    /// artifacts. Returns the evicted task ids.
    pub fn evict_expired(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<Arc<GenerationTask>> = {
            let mut tasks = self.tasks.write();
            let ids: Vec<String> = tasks
                .values()
                .filter(|t| {
                    let state = t.state.lock();
                    state.status.is_terminal()
                        && state.completed_at.map_or(false, |done| policy.is_expired(done, now))
                })
                .map(|t| t.task_id.clone())
                .collect();
            ids.iter().filter_map(|id| tasks.remove(id)).collect()
        };

        for task in &expired {
            if let Some(path) = task.state.lock().output_path.clone() {
                if let Err(e) = fs::remove_file(&path) {
                    tracing::warn!(task_id = %task.task_id, error = %e, "Cannot delete evicted artifact");
                }
            }
            tracing::info!(task_id = %task.task_id, "Generation task evicted");
        }
        expired.iter().map(|t| t.task_id.clone()).collect()
    }
}
