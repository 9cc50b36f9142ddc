//! Lookup of the shared inputs a deployment references.
//!
//! Entities are read by id at execution time rather than snapshotted when a
//! deployment is created: editing a template before a pending deployment runs
//! changes what that deployment executes.

use std::collections::HashSet;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::models::catalog::{CatalogData, Credential, Environment, Host, TaskTemplate};

/// Read access to templates, hosts, credentials and environments
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn task_template(&self, id: &str) -> Result<Option<TaskTemplate>, DeployError>;

    /// Hosts matching `ids`, in the order the ids are given, duplicates removed
    async fn hosts(&self, ids: &[String]) -> Result<Vec<Host>, DeployError>;

    /// Every host flagged active
    async fn active_hosts(&self) -> Result<Vec<Host>, DeployError>;

    async fn credential(&self, id: &str) -> Result<Option<Credential>, DeployError>;

    async fn environment(&self, id: &str) -> Result<Option<Environment>, DeployError>;
}

fn select_hosts(all: &[Host], ids: &[String]) -> Vec<Host> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .filter_map(|id| all.iter().find(|h| &h.id == id).cloned())
        .collect()
}

fn active(all: &[Host]) -> Vec<Host> {
    all.iter().filter(|h| h.is_active).cloned().collect()
}

// ================================ FILE CATALOG ================================== //

/// Catalog backed by `catalog.json`, re-read on every lookup
pub struct FileCatalog {
    file: File,
}

impl FileCatalog {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    async fn load(&self) -> Result<CatalogData, DeployError> {
        if !self.file.exists().await {
            return Ok(CatalogData::default());
        }
        self.file.read_json().await.map_err(|e| {
            DeployError::StorageError(format!(
                "Unable to read catalog {}: {}",
                self.file.path().display(),
                e
            ))
        })
    }
}

#[async_trait]
impl Catalog for FileCatalog {
    async fn task_template(&self, id: &str) -> Result<Option<TaskTemplate>, DeployError> {
        let data = self.load().await?;
        Ok(data.templates.into_iter().find(|t| t.id == id))
    }

    async fn hosts(&self, ids: &[String]) -> Result<Vec<Host>, DeployError> {
        let data = self.load().await?;
        Ok(select_hosts(&data.hosts, ids))
    }

    async fn active_hosts(&self) -> Result<Vec<Host>, DeployError> {
        let data = self.load().await?;
        Ok(active(&data.hosts))
    }

    async fn credential(&self, id: &str) -> Result<Option<Credential>, DeployError> {
        let data = self.load().await?;
        Ok(data.credentials.into_iter().find(|c| c.id == id))
    }

    async fn environment(&self, id: &str) -> Result<Option<Environment>, DeployError> {
        let data = self.load().await?;
        Ok(data.environments.into_iter().find(|e| e.id == id))
    }
}

// =============================== MEMORY CATALOG ================================= //

/// In-memory catalog; entries can be replaced at any time
#[derive(Default)]
pub struct MemoryCatalog {
    data: RwLock<CatalogData>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a template
    pub fn put_template(&self, template: TaskTemplate) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.templates.retain(|t| t.id != template.id);
        data.templates.push(template);
    }

    /// Insert or replace a host
    pub fn put_host(&self, host: Host) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.hosts.retain(|h| h.id != host.id);
        data.hosts.push(host);
    }

    /// Insert or replace a credential
    pub fn put_credential(&self, credential: Credential) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.credentials.retain(|c| c.id != credential.id);
        data.credentials.push(credential);
    }

    /// Insert or replace an environment
    pub fn put_environment(&self, environment: Environment) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.environments.retain(|e| e.id != environment.id);
        data.environments.push(environment);
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn task_template(&self, id: &str) -> Result<Option<TaskTemplate>, DeployError> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        Ok(data.templates.iter().find(|t| t.id == id).cloned())
    }

    async fn hosts(&self, ids: &[String]) -> Result<Vec<Host>, DeployError> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        Ok(select_hosts(&data.hosts, ids))
    }

    async fn active_hosts(&self) -> Result<Vec<Host>, DeployError> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        Ok(active(&data.hosts))
    }

    async fn credential(&self, id: &str) -> Result<Option<Credential>, DeployError> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        Ok(data.credentials.iter().find(|c| c.id == id).cloned())
    }

    async fn environment(&self, id: &str) -> Result<Option<Environment>, DeployError> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        Ok(data.environments.iter().find(|e| e.id == id).cloned())
    }
}
