//! Durable record of generation task state. The store is the serialization
//! point for status transitions: terminal states are enforced here, not in
//! the callers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::error::SiroccoError;
use crate::task::{Artifact, GenerationTask, StatusFields, TaskStatus, now_ms};

/// Atomic counter for unique task ids within one process.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_id() -> String {
    let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}_{seq}", now_ms())
}

/// Outcome of an attempted status update.
#[derive(Debug)]
pub enum UpdateOutcome {
    /// The transition was written; carries the record as stored.
    Applied(GenerationTask),
    /// The task was already terminal; nothing was written.
    AlreadyTerminal(GenerationTask),
}

impl UpdateOutcome {
    pub fn task(&self) -> &GenerationTask {
        match self {
            Self::Applied(task) | Self::AlreadyTerminal(task) => task,
        }
    }

    pub fn into_task(self) -> GenerationTask {
        match self {
            Self::Applied(task) | Self::AlreadyTerminal(task) => task,
        }
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a new PENDING task record; the store assigns the id.
    async fn create(&self, model: &str) -> Result<GenerationTask, SiroccoError>;

    async fn get(&self, id: &str) -> Result<Option<GenerationTask>, SiroccoError>;

    /// Atomic status transition. An update against an already-terminal record
    /// is a no-op reported as `AlreadyTerminal`; transitions the state machine
    /// forbids are errors.
    async fn update_status(
        &self,
        id: &str,
        new_status: TaskStatus,
        fields: StatusFields,
    ) -> Result<UpdateOutcome, SiroccoError>;

    /// Durably record artifacts against a non-terminal task. Used so artifacts
    /// are on disk before the COMPLETED transition, and as the fallback source
    /// when a later retrieval attempt fails.
    async fn record_artifacts(&self, id: &str, artifacts: &[Artifact])
    -> Result<(), SiroccoError>;

    /// All tasks currently in PROCESSING, for startup recovery.
    async fn list_processing(&self) -> Result<Vec<GenerationTask>, SiroccoError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local store. Not durable; suitable for tests and embedding.
#[derive(Default)]
pub struct MemoryStore {
    tasks: Mutex<HashMap<String, GenerationTask>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held (for testing).
    pub fn task_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, GenerationTask>> {
        self.tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create(&self, model: &str) -> Result<GenerationTask, SiroccoError> {
        let task = GenerationTask::new(next_id(), model.to_string());
        self.lock().insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn get(&self, id: &str) -> Result<Option<GenerationTask>, SiroccoError> {
        Ok(self.lock().get(id).cloned())
    }

    async fn update_status(
        &self,
        id: &str,
        new_status: TaskStatus,
        fields: StatusFields,
    ) -> Result<UpdateOutcome, SiroccoError> {
        let mut tasks = self.lock();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| SiroccoError::TaskNotFound(id.to_string()))?;
        let applied = task.apply_update(new_status, fields, now_ms())?;
        let snapshot = task.clone();
        Ok(if applied {
            UpdateOutcome::Applied(snapshot)
        } else {
            UpdateOutcome::AlreadyTerminal(snapshot)
        })
    }

    async fn record_artifacts(
        &self,
        id: &str,
        artifacts: &[Artifact],
    ) -> Result<(), SiroccoError> {
        let mut tasks = self.lock();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| SiroccoError::TaskNotFound(id.to_string()))?;
        if !task.status.is_terminal() {
            task.artifacts = artifacts.to_vec();
        }
        Ok(())
    }

    async fn list_processing(&self) -> Result<Vec<GenerationTask>, SiroccoError> {
        Ok(self
            .lock()
            .values()
            .filter(|t| t.status == TaskStatus::Processing)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

/// One JSON file per task under a root directory. Writes go through a temp
/// file plus rename so a crash never leaves a partially written record, and
/// all mutations are serialized through one lock so transitions for a given
/// task id are totally ordered.
pub struct FileStore {
    root: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, SiroccoError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    async fn read_task(&self, id: &str) -> Result<Option<GenerationTask>, SiroccoError> {
        match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => {
                let task = serde_json::from_slice(&bytes)
                    .map_err(|e| SiroccoError::Store(format!("corrupt record {id}: {e}")))?;
                Ok(Some(task))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_task(&self, task: &GenerationTask) -> Result<(), SiroccoError> {
        let path = self.path_for(&task.id);
        let json = serde_json::to_vec_pretty(task)
            .map_err(|e| SiroccoError::Store(e.to_string()))?;
        // Atomic write: temp file + rename prevents partial reads
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &json).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for FileStore {
    async fn create(&self, model: &str) -> Result<GenerationTask, SiroccoError> {
        let _guard = self.write_lock.lock().await;
        let task = GenerationTask::new(next_id(), model.to_string());
        self.write_task(&task).await?;
        Ok(task)
    }

    async fn get(&self, id: &str) -> Result<Option<GenerationTask>, SiroccoError> {
        self.read_task(id).await
    }

    async fn update_status(
        &self,
        id: &str,
        new_status: TaskStatus,
        fields: StatusFields,
    ) -> Result<UpdateOutcome, SiroccoError> {
        let _guard = self.write_lock.lock().await;
        let mut task = self
            .read_task(id)
            .await?
            .ok_or_else(|| SiroccoError::TaskNotFound(id.to_string()))?;
        let applied = task.apply_update(new_status, fields, now_ms())?;
        if applied {
            self.write_task(&task).await?;
            Ok(UpdateOutcome::Applied(task))
        } else {
            Ok(UpdateOutcome::AlreadyTerminal(task))
        }
    }

    async fn record_artifacts(
        &self,
        id: &str,
        artifacts: &[Artifact],
    ) -> Result<(), SiroccoError> {
        let _guard = self.write_lock.lock().await;
        let mut task = self
            .read_task(id)
            .await?
            .ok_or_else(|| SiroccoError::TaskNotFound(id.to_string()))?;
        if task.status.is_terminal() {
            return Ok(());
        }
        task.artifacts = artifacts.to_vec();
        self.write_task(&task).await
    }

    async fn list_processing(&self) -> Result<Vec<GenerationTask>, SiroccoError> {
        let mut tasks = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            let task: GenerationTask = match serde_json::from_slice(&bytes) {
                Ok(task) => task,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "skipping corrupt task record: {e}");
                    continue;
                }
            };
            if task.status == TaskStatus::Processing {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }
}
