//! Application configuration options

use std::time::Duration;

use crate::deploy::engine::EngineOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::{dispatcher, poller};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Enable local HTTP server
    pub enable_socket_server: bool,

    /// Enable pending deployment poller
    pub enable_poller: bool,

    /// Fail deployments left running by a previous process at startup
    pub recover_orphans: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Execution engine options
    pub engine: EngineOptions,

    /// Dispatcher worker options
    pub dispatcher: dispatcher::Options,

    /// Poller worker options
    pub poller: poller::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        let layout = StorageLayout::default();
        Self {
            lifecycle: LifecycleOptions::default(),
            engine: EngineOptions {
                scratch_dir: layout.scratch_dir().path().to_path_buf(),
                ..Default::default()
            },
            layout,
            enable_socket_server: true,
            enable_poller: true,
            recover_orphans: true,
            server: ServerOptions::default(),
            dispatcher: dispatcher::Options::default(),
            poller: poller::Options::default(),
        }
    }
}

impl AppOptions {
    /// Options for an agent rooted at `layout` configured by `settings`
    pub fn from_settings(layout: StorageLayout, settings: &Settings) -> Self {
        Self {
            engine: EngineOptions {
                scratch_dir: layout.scratch_dir().path().to_path_buf(),
                ansible_playbook_bin: settings.ansible_playbook_bin.clone(),
                shell: settings.shell.clone(),
                output_cap_bytes: settings.output_cap_bytes,
            },
            layout,
            enable_socket_server: settings.enable_socket_server,
            enable_poller: settings.enable_poller,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            dispatcher: dispatcher::Options {
                max_concurrent: settings.max_concurrent_deployments,
                ..Default::default()
            },
            poller: poller::Options {
                interval: Duration::from_secs(settings.poll_interval_secs.max(1)),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Lifecycle options for the agent
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown, including in-flight deployments
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(300),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8086,
        }
    }
}
