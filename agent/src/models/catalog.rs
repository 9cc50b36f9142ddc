//! Catalog models: the shared inputs a deployment references by id

use std::collections::BTreeMap;
use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Kind of orchestration work a template describes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    #[default]
    Playbook,
    Adhoc,
}

/// A reusable unit of orchestration work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, rename = "type")]
    pub kind: TemplateKind,

    /// Playbook on the local filesystem
    #[serde(default)]
    pub playbook_path: Option<PathBuf>,

    /// Inline playbook, wins over `playbook_path` when non-empty
    #[serde(default)]
    pub playbook_content: Option<String>,

    /// Passed to the playbook as `--extra-vars`
    #[serde(default)]
    pub extra_vars: Option<BTreeMap<String, serde_json::Value>>,

    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// One target machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub hostname: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    pub username: String,

    #[serde(default = "default_true")]
    pub is_active: bool,

    #[serde(default)]
    pub credential_id: Option<String>,
}

/// Stored secret used to authenticate to a host.
///
/// Deserialize-only: secrets never leave the agent except as a scratch key
/// file during an execution attempt.
#[derive(Debug, Clone, Deserialize)]
pub struct Credential {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub secret: CredentialSecret,
}

/// Credential payload, tagged by `type`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CredentialSecret {
    Ssh {
        private_key: SecretString,
        #[serde(default)]
        passphrase: Option<SecretString>,
    },
    Password {
        password: SecretString,
    },
}

/// Named set of environment variables applied ahead of the command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// On-disk catalog document
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogData {
    #[serde(default)]
    pub templates: Vec<TaskTemplate>,

    #[serde(default)]
    pub hosts: Vec<Host>,

    #[serde(default)]
    pub credentials: Vec<Credential>,

    #[serde(default)]
    pub environments: Vec<Environment>,
}

fn default_true() -> bool {
    true
}

fn default_ssh_port() -> u16 {
    22
}
