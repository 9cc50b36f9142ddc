//! Per-attempt scratch files.
//!
//! Every file is named after the deployment id, so concurrent attempts never
//! share a path. Everything created through a [`ScratchSpace`] is removed by
//! [`ScratchSpace::purge`], or by `Drop` if the attempt unwinds first.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Scratch files owned by one execution attempt
#[derive(Debug)]
pub struct ScratchSpace {
    root: Dir,
    deployment_id: String,
    created: Vec<PathBuf>,
}

impl ScratchSpace {
    /// Prepare the owner-only scratch root (and its `keys` directory)
    pub async fn open(root: Dir, deployment_id: &str) -> Result<Self, DeployError> {
        root.create_private().await.map_err(|e| {
            DeployError::Materialization(format!(
                "cannot create scratch directory {}: {}",
                root.path().display(),
                e
            ))
        })?;
        let keys = root.subdir("keys");
        keys.create_private().await.map_err(|e| {
            DeployError::Materialization(format!(
                "cannot create key directory {}: {}",
                keys.path().display(),
                e
            ))
        })?;

        Ok(Self {
            root,
            deployment_id: deployment_id.to_string(),
            created: Vec::new(),
        })
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    pub fn inventory_file(&self) -> File {
        self.root.file(&format!("inventory_{}.ini", self.deployment_id))
    }

    pub fn playbook_file(&self) -> File {
        self.root.file(&format!("playbook_{}.yml", self.deployment_id))
    }

    pub fn key_file(&self, credential_id: &str) -> File {
        self.root.subdir("keys").file(&format!(
            "key_{}_{}",
            self.deployment_id,
            sanitize(credential_id)
        ))
    }

    /// Paths created so far
    pub fn created(&self) -> &[PathBuf] {
        &self.created
    }

    /// Write a regular scratch file
    pub async fn write(&mut self, file: &File, contents: &str) -> Result<(), DeployError> {
        self.track(file.path());
        file.write_string(contents).await
    }

    /// Write an owner-only scratch file, replacing any stale leftover
    pub async fn write_private(&mut self, file: &File, contents: &[u8]) -> Result<(), DeployError> {
        self.track(file.path());
        file.delete().await?;
        file.write_private(contents).await
    }

    /// Remove every file this attempt created
    pub async fn purge(&mut self) {
        for path in self.created.drain(..) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Removed scratch file {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove scratch file {}: {}", path.display(), e),
            }
        }
    }

    fn track(&mut self, path: &Path) {
        if !self.created.iter().any(|p| p == path) {
            self.created.push(path.to_path_buf());
        }
    }
}

impl Drop for ScratchSpace {
    fn drop(&mut self) {
        for path in self.created.drain(..) {
            let _ = std::fs::remove_file(&path);
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
