//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::engine::Engine;
use crate::errors::DeployError;
use crate::services::deployments::DeploymentService;
use crate::storage::catalog::{Catalog, FileCatalog};
use crate::storage::deployments::{DeploymentStore, FileDeploymentStore};
use crate::workers::dispatcher::{self, Dispatcher};

/// Main application state
pub struct AppState {
    /// Deployment records
    pub store: Arc<dyn DeploymentStore>,

    /// Templates, hosts, credentials and environments
    pub catalog: Arc<dyn Catalog>,

    /// Execution engine shared by every attempt
    pub engine: Arc<Engine>,

    /// Deployment entry points
    pub deployments: Arc<DeploymentService>,
}

impl AppState {
    /// Initialize application state over the on-disk layout.
    ///
    /// Returns the dispatcher half of the job queue, to be handed to the
    /// dispatcher worker.
    pub async fn init(options: &AppOptions) -> Result<(Self, Dispatcher), DeployError> {
        info!("Initializing application state...");

        let layout = &options.layout;
        layout.setup().await?;

        let store: Arc<dyn DeploymentStore> =
            Arc::new(FileDeploymentStore::new(layout.deployments_dir()));
        let catalog: Arc<dyn Catalog> = Arc::new(FileCatalog::new(layout.catalog_file()));
        let engine = Arc::new(Engine::new(
            store.clone(),
            catalog.clone(),
            options.engine.clone(),
        ));

        let (handle, dispatcher) = dispatcher::channel(&options.dispatcher);
        let deployments = Arc::new(DeploymentService::new(engine.clone(), Arc::new(handle)));

        let state = Self {
            store,
            catalog,
            engine,
            deployments,
        };
        Ok((state, dispatcher))
    }
}
