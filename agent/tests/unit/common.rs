//! Shared fixtures

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::SecretString;
use tempfile::TempDir;

use ansigent::deploy::engine::{Engine, EngineOptions};
use ansigent::errors::DeployError;
use ansigent::models::catalog::{Credential, CredentialSecret, Host, TaskTemplate, TemplateKind};
use ansigent::models::deployment::{Deployment, NewDeployment};
use ansigent::storage::catalog::MemoryCatalog;
use ansigent::storage::deployments::{DeploymentStore, MemoryDeploymentStore};
use ansigent::workers::dispatcher::JobQueue;

pub const TEMPLATE_ID: &str = "tpl-site";

pub fn host(id: &str, active: bool, credential: Option<&str>) -> Host {
    Host {
        id: id.to_string(),
        name: id.to_string(),
        hostname: format!("{}.example.com", id),
        port: 22,
        username: "deploy".to_string(),
        is_active: active,
        credential_id: credential.map(str::to_string),
    }
}

pub fn ssh_credential(id: &str) -> Credential {
    Credential {
        id: id.to_string(),
        name: "deploy key".to_string(),
        secret: CredentialSecret::Ssh {
            private_key: SecretString::from("-----BEGIN KEY-----\nsecret\n-----END KEY-----".to_string()),
            passphrase: None,
        },
    }
}

pub fn template(content: Option<&str>, path: Option<PathBuf>) -> TaskTemplate {
    TaskTemplate {
        id: TEMPLATE_ID.to_string(),
        name: "site".to_string(),
        kind: TemplateKind::Playbook,
        playbook_path: path,
        playbook_content: content.map(str::to_string),
        extra_vars: None,
        is_active: true,
    }
}

pub fn new_deployment(targets: &[&str]) -> NewDeployment {
    NewDeployment {
        task_template_id: TEMPLATE_ID.to_string(),
        user_id: "user-1".to_string(),
        targets: targets.iter().map(|t| t.to_string()).collect(),
        environment_id: None,
    }
}

/// Write an executable shell script standing in for `ansible-playbook`.
///
/// The script is called as `<script> -i <inventory> <playbook> [--extra-vars <json>]`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o755)
        .open(&path)
        .unwrap();
    file.write_all(format!("#!/bin/sh\n{}\n", body).as_bytes())
        .unwrap();
    file.sync_all().unwrap();
    drop(file);
    path
}

/// Every file left under `dir` whose name mentions `id`
pub fn leftover_files(dir: &Path, id: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(leftover_files(&path, id));
        } else if path.to_string_lossy().contains(id) {
            found.push(path);
        }
    }
    found
}

pub struct Fixture {
    pub tmp: TempDir,
    pub store: Arc<MemoryDeploymentStore>,
    pub catalog: Arc<MemoryCatalog>,
    pub engine: Arc<Engine>,
}

impl Fixture {
    /// An engine whose `ansible-playbook` runs `script_body`
    #[cfg(unix)]
    pub fn with_script(script_body: &str) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let bin = write_script(&tmp.path().join("bin"), "ansible-playbook", script_body);
        Self::build(tmp, bin.to_string_lossy().into_owned(), "/bin/sh".to_string())
    }

    pub fn build(tmp: TempDir, ansible_playbook_bin: String, shell: String) -> Self {
        let store = Arc::new(MemoryDeploymentStore::new());
        let catalog = Arc::new(MemoryCatalog::new());
        let engine = Arc::new(Engine::new(
            store.clone(),
            catalog.clone(),
            EngineOptions {
                scratch_dir: tmp.path().join("scratch"),
                ansible_playbook_bin,
                shell,
                output_cap_bytes: 64 * 1024,
            },
        ));
        Self {
            tmp,
            store,
            catalog,
            engine,
        }
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.tmp.path().join("scratch")
    }

    /// One active host `web-1` using SSH credential `key-1`, and a template
    /// with inline content
    pub fn with_single_host(self) -> Self {
        self.catalog.put_credential(ssh_credential("key-1"));
        self.catalog.put_host(host("web-1", true, Some("key-1")));
        self.catalog
            .put_template(template(Some("- hosts: all\n  tasks: []\n"), None));
        self
    }

    pub async fn pending(&self, targets: &[&str]) -> Deployment {
        let deployment = Deployment::new(new_deployment(targets));
        self.store.insert(&deployment).await.unwrap();
        deployment
    }
}

/// Queue that records ids instead of running them
#[derive(Default)]
pub struct RecordingQueue {
    pub ids: Mutex<Vec<String>>,
}

impl RecordingQueue {
    pub fn ids(&self) -> Vec<String> {
        self.ids.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(&self, id: &str) -> Result<bool, DeployError> {
        let mut ids = self.ids.lock().unwrap();
        if ids.iter().any(|i| i == id) {
            return Ok(false);
        }
        ids.push(id.to_string());
        Ok(true)
    }
}
