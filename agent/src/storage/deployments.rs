//! Durable deployment records

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::deployment::Deployment;

/// A change applied to one record under the store's write lock.
///
/// If the mutation fails, nothing is persisted.
pub type Mutation = Box<dyn FnOnce(&mut Deployment) -> Result<(), DeployError> + Send>;

/// Result of trying to claim a deployment for execution
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The record moved pending -> running; the caller owns the attempt
    Claimed(Deployment),

    /// Someone else already ran or is running it
    Skipped(DeploymentStatus),
}

/// Persistence for deployment records
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Persist a new record
    async fn insert(&self, deployment: &Deployment) -> Result<(), DeployError>;

    /// Read one record
    async fn get(&self, id: &str) -> Result<Deployment, DeployError>;

    /// All records, newest first
    async fn list(&self) -> Result<Vec<Deployment>, DeployError>;

    /// Apply `mutation` to one record atomically and return the new state
    async fn update(&self, id: &str, mutation: Mutation) -> Result<Deployment, DeployError>;

    /// Records with the given status, newest first
    async fn list_by_status(
        &self,
        status: DeploymentStatus,
    ) -> Result<Vec<Deployment>, DeployError> {
        let mut deployments = self.list().await?;
        deployments.retain(|d| d.status == status);
        Ok(deployments)
    }

    /// Move a pending record to running. Anything else is left untouched.
    async fn claim(&self, id: &str, now: DateTime<Utc>) -> Result<Claim, DeployError> {
        match self.update(id, Box::new(move |d: &mut Deployment| d.start(now))).await {
            Ok(deployment) => Ok(Claim::Claimed(deployment)),
            Err(DeployError::InvalidTransition(_)) => {
                let current = self.get(id).await?;
                Ok(Claim::Skipped(current.status))
            }
            Err(e) => Err(e),
        }
    }

    /// Store the rendered command and artifacts of a running record
    async fn save_command_input(&self, id: &str, input: String) -> Result<(), DeployError> {
        self.update(
            id,
            Box::new(move |d: &mut Deployment| {
                ensure_running(d)?;
                d.command_input = Some(input);
                Ok(())
            }),
        )
        .await?;
        Ok(())
    }

    /// Replace the partial output of a running record
    async fn update_output(&self, id: &str, output: String) -> Result<(), DeployError> {
        self.update(
            id,
            Box::new(move |d: &mut Deployment| {
                ensure_running(d)?;
                d.command_output = Some(output);
                Ok(())
            }),
        )
        .await?;
        Ok(())
    }

    /// Record the process exit of a running record
    async fn finalize(
        &self,
        id: &str,
        exit_code: i32,
        output: String,
        now: DateTime<Utc>,
    ) -> Result<Deployment, DeployError> {
        self.update(id, Box::new(move |d: &mut Deployment| d.complete(exit_code, output, now)))
            .await
    }

    /// Fail a running record whose attempt aborted before the process exited
    async fn abort(
        &self,
        id: &str,
        message: String,
        now: DateTime<Utc>,
    ) -> Result<Deployment, DeployError> {
        self.update(id, Box::new(move |d: &mut Deployment| d.abort(message, now))).await
    }

    /// Fail a pending or running record on behalf of the job infrastructure.
    ///
    /// Returns `None` when the record is already terminal.
    async fn fail(
        &self,
        id: &str,
        message: String,
        now: DateTime<Utc>,
    ) -> Result<Option<Deployment>, DeployError> {
        match self
            .update(id, Box::new(move |d: &mut Deployment| d.fail_infrastructure(message, now)))
            .await
        {
            Ok(deployment) => Ok(Some(deployment)),
            Err(DeployError::InvalidTransition(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn ensure_running(deployment: &Deployment) -> Result<(), DeployError> {
    if deployment.status != DeploymentStatus::Running {
        return Err(DeployError::InvalidTransition(format!(
            "deployment {} is {}, not running",
            deployment.id, deployment.status
        )));
    }
    Ok(())
}

fn sort_newest_first(deployments: &mut [Deployment]) {
    deployments.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

// ================================ FILE STORE ==================================== //

const LOCK_FILE: &str = ".store.lock";

/// Exclusive OS lock on the store directory, released on drop.
///
/// Held across every read-modify-write, including by other processes sharing
/// the directory (a running agent and `--run`).
struct StoreLock {
    file: std::fs::File,
}

impl StoreLock {
    async fn acquire(path: PathBuf) -> Result<Self, DeployError> {
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)?;
            FileExt::lock_exclusive(&file)?;
            Ok::<_, std::io::Error>(StoreLock { file })
        })
        .await
        .map_err(|e| DeployError::StorageError(format!("store lock task failed: {}", e)))?
        .map_err(|e| DeployError::StorageError(format!("failed to lock deployment store: {}", e)))
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// One JSON document per deployment, replaced atomically on every write
pub struct FileDeploymentStore {
    dir: Dir,
    write_lock: Mutex<()>,
}

impl FileDeploymentStore {
    pub fn new(dir: Dir) -> Self {
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    /// In-process mutex first, then the cross-process directory lock.
    /// The directory lock is released first on drop.
    async fn lock(&self) -> Result<(StoreLock, MutexGuard<'_, ()>), DeployError> {
        let guard = self.write_lock.lock().await;
        let store_lock = StoreLock::acquire(self.dir.path().join(LOCK_FILE)).await?;
        Ok((store_lock, guard))
    }

    fn record_file(&self, id: &str) -> Result<File, DeployError> {
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(DeployError::NotFound(format!("deployment {}", id)));
        }
        Ok(self.dir.file(&format!("deployment_{}.json", id)))
    }

    async fn read(&self, file: &File, id: &str) -> Result<Deployment, DeployError> {
        if !file.exists().await {
            return Err(DeployError::NotFound(format!("deployment {}", id)));
        }
        file.read_json().await
    }
}

#[async_trait]
impl DeploymentStore for FileDeploymentStore {
    async fn insert(&self, deployment: &Deployment) -> Result<(), DeployError> {
        let file = self.record_file(&deployment.id)?;
        let _locks = self.lock().await?;
        if file.exists().await {
            return Err(DeployError::StorageError(format!(
                "deployment {} already exists",
                deployment.id
            )));
        }
        file.write_json(deployment).await
    }

    async fn get(&self, id: &str) -> Result<Deployment, DeployError> {
        let file = self.record_file(id)?;
        self.read(&file, id).await
    }

    async fn list(&self) -> Result<Vec<Deployment>, DeployError> {
        if !self.dir.exists().await {
            return Ok(Vec::new());
        }

        let mut deployments = Vec::new();
        for path in self.dir.list_files().await? {
            let is_record = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("deployment_") && n.ends_with(".json"))
                .unwrap_or(false);
            if !is_record {
                continue;
            }

            match File::new(&path).read_json::<Deployment>().await {
                Ok(deployment) => deployments.push(deployment),
                Err(e) => warn!("Skipping unreadable deployment file {}: {}", path.display(), e),
            }
        }

        sort_newest_first(&mut deployments);
        Ok(deployments)
    }

    async fn update(&self, id: &str, mutation: Mutation) -> Result<Deployment, DeployError> {
        let file = self.record_file(id)?;
        let _locks = self.lock().await?;

        let mut deployment = self.read(&file, id).await?;
        mutation(&mut deployment)?;
        file.write_json(&deployment).await?;
        debug!("Persisted deployment {} ({})", id, deployment.status);
        Ok(deployment)
    }
}

// =============================== MEMORY STORE =================================== //

/// In-memory deployment store
#[derive(Default)]
pub struct MemoryDeploymentStore {
    entries: RwLock<HashMap<String, Deployment>>,
}

impl MemoryDeploymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStore for MemoryDeploymentStore {
    async fn insert(&self, deployment: &Deployment) -> Result<(), DeployError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(&deployment.id) {
            return Err(DeployError::StorageError(format!(
                "deployment {} already exists",
                deployment.id
            )));
        }
        entries.insert(deployment.id.clone(), deployment.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Deployment, DeployError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(id)
            .cloned()
            .ok_or_else(|| DeployError::NotFound(format!("deployment {}", id)))
    }

    async fn list(&self) -> Result<Vec<Deployment>, DeployError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut deployments: Vec<Deployment> = entries.values().cloned().collect();
        sort_newest_first(&mut deployments);
        Ok(deployments)
    }

    async fn update(&self, id: &str, mutation: Mutation) -> Result<Deployment, DeployError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let current = entries
            .get(id)
            .ok_or_else(|| DeployError::NotFound(format!("deployment {}", id)))?;

        let mut deployment = current.clone();
        mutation(&mut deployment)?;
        entries.insert(id.to_string(), deployment.clone());
        Ok(deployment)
    }
}
