//! Playbook resolution

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::deploy::scratch::ScratchSpace;
use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::models::catalog::TaskTemplate;

/// The playbook file written for one attempt
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPlaybook {
    pub path: PathBuf,
    pub contents: String,
}

/// Playbook text for `template`.
///
/// Inline content wins when it is not blank, otherwise the referenced path is
/// read. Neither yields [`DeployError::NoPlaybook`].
pub async fn resolve_playbook(template: &TaskTemplate) -> Result<String, DeployError> {
    if let Some(content) = &template.playbook_content {
        if !content.trim().is_empty() {
            return Ok(content.clone());
        }
    }

    if let Some(path) = &template.playbook_path {
        let file = File::new(path.clone());
        match file.read_string().await {
            Ok(contents) => return Ok(contents),
            Err(e) => warn!(
                "Playbook path {} of template {} is unreadable: {}",
                path.display(),
                template.id,
                e
            ),
        }
    }

    Err(DeployError::NoPlaybook(template.id.clone()))
}

/// Resolve the template's playbook and write it to the scratch space
pub async fn write_playbook(
    template: &TaskTemplate,
    scratch: &mut ScratchSpace,
) -> Result<RenderedPlaybook, DeployError> {
    let contents = resolve_playbook(template).await?;
    let file = scratch.playbook_file();
    scratch.write(&file, &contents).await?;
    debug!("Wrote playbook to {}", file.path().display());

    Ok(RenderedPlaybook {
        path: file.path().to_path_buf(),
        contents,
    })
}
