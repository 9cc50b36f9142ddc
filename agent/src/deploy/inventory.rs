//! Inventory rendering

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::deploy::credentials;
use crate::deploy::scratch::ScratchSpace;
use crate::errors::DeployError;
use crate::models::catalog::Host;
use crate::models::deployment::{Deployment, ALL_TARGETS};
use crate::storage::catalog::Catalog;

/// The inventory file written for one attempt
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedInventory {
    pub path: PathBuf,
    pub contents: String,
    pub host_count: usize,
}

/// Resolve a target set to hosts.
///
/// The `all` sentinel selects every currently active host and any other ids
/// in the set are ignored. Otherwise exactly the named hosts are returned in
/// the order given, whether active or not.
pub async fn resolve_hosts(
    catalog: &dyn Catalog,
    targets: &[String],
) -> Result<Vec<Host>, DeployError> {
    if targets.iter().any(|t| t == ALL_TARGETS) {
        return catalog.active_hosts().await;
    }
    catalog.hosts(targets).await
}

/// Characters that would end or split an INI host field
fn is_unsafe_field_char(c: char) -> bool {
    c.is_whitespace() || c.is_control() || matches!(c, '=' | '"' | '\'' | '#' | ';' | '\\')
}

fn check_field(host: &Host, name: &str, value: &str) -> Result<(), DeployError> {
    if value.is_empty() || value.chars().any(is_unsafe_field_char) {
        return Err(DeployError::InvalidCommand(format!(
            "host {} has an invalid {}: {:?}",
            host.id, name, value
        )));
    }
    Ok(())
}

/// Double-quote a value for an inventory host line
fn quote_value(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// One inventory line for `host`.
///
/// Hostname and username must be plain tokens; the key path is quoted.
pub fn inventory_line(host: &Host, key_file: Option<&Path>) -> Result<String, DeployError> {
    check_field(host, "hostname", &host.hostname)?;
    check_field(host, "username", &host.username)?;

    let mut line = format!(
        "{} ansible_port={} ansible_user={}",
        host.hostname, host.port, host.username
    );
    if let Some(key) = key_file {
        line.push_str(&format!(
            " ansible_ssh_private_key_file={}",
            quote_value(&key.to_string_lossy())
        ));
    }
    Ok(line)
}

/// Resolve the deployment's targets, materialize their credentials and write
/// the inventory file.
///
/// An empty host set is rejected with [`DeployError::NoTargets`].
pub async fn render_inventory(
    deployment: &Deployment,
    catalog: &dyn Catalog,
    scratch: &mut ScratchSpace,
) -> Result<RenderedInventory, DeployError> {
    let hosts = resolve_hosts(catalog, &deployment.targets).await?;
    if hosts.is_empty() {
        return Err(DeployError::NoTargets(deployment.id.clone()));
    }

    // one key file per credential, however many hosts share it
    let mut keys: HashMap<String, Option<PathBuf>> = HashMap::new();
    let mut contents = String::from("[all]\n");

    for host in &hosts {
        let key_file = match &host.credential_id {
            Some(credential_id) => match keys.get(credential_id) {
                Some(cached) => cached.clone(),
                None => {
                    let path = match catalog.credential(credential_id).await? {
                        Some(credential) => credentials::materialize(&credential, scratch).await?,
                        None => {
                            warn!(
                                "Host {} references missing credential {}",
                                host.id, credential_id
                            );
                            None
                        }
                    };
                    keys.insert(credential_id.clone(), path.clone());
                    path
                }
            },
            None => None,
        };

        contents.push_str(&inventory_line(host, key_file.as_deref())?);
        contents.push('\n');
    }

    let file = scratch.inventory_file();
    scratch.write(&file, &contents).await?;
    debug!(
        "Rendered inventory with {} host(s) to {}",
        hosts.len(),
        file.path().display()
    );

    Ok(RenderedInventory {
        path: file.path().to_path_buf(),
        contents,
        host_count: hosts.len(),
    })
}
