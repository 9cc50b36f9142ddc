//! ansigent - Entry Point
//!
//! Runs Ansible playbooks for queued deployments and records their output.
//! Without a mode flag the agent runs until SIGINT/SIGTERM; the other flags
//! operate once on the local state and exit.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use ansigent::app::options::AppOptions;
use ansigent::app::run::run;
use ansigent::deploy::engine::{Engine, Outcome};
use ansigent::deploy::fsm::DeploymentStatus;
use ansigent::logs::{init_logging, LogOptions};
use ansigent::models::deployment::{Deployment, NewDeployment};
use ansigent::services::deployments::DeploymentService;
use ansigent::storage::catalog::FileCatalog;
use ansigent::storage::deployments::FileDeploymentStore;
use ansigent::storage::layout::StorageLayout;
use ansigent::storage::settings::{load_settings, Settings};
use ansigent::utils::version_info;
use ansigent::workers::dispatcher::Deferred;

use anyhow::{anyhow, Context};
use colored::Colorize;
use tracing::{error, info};

const EMPTY_CATALOG: &str = r#"{
  "templates": [],
  "hosts": [],
  "credentials": [],
  "environments": []
}
"#;

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    if let Err(e) = run_cli(&cli_args).await {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run_cli(cli_args: &HashMap<String, String>) -> anyhow::Result<()> {
    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        println!("{}", serde_json::to_string_pretty(&version)?);
        return Ok(());
    }

    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    let settings = load_settings(&layout.settings_file())
        .await
        .context("unable to load settings")?;

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: layout.logs_dir().path().to_path_buf(),
        file: settings.log_to_file,
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    if cli_args.contains_key("init") {
        return init_layout(&layout).await;
    }

    let options = AppOptions::from_settings(layout, &settings);

    if let Some(id) = cli_args.get("run") {
        let service = local_service(&options);
        return run_deployment(&service, id).await;
    }

    if cli_args.contains_key("create") {
        let service = local_service(&options);
        return create_deployment(&service, cli_args).await;
    }

    if let Some(id) = cli_args.get("retry") {
        let service = local_service(&options);
        let retried = service
            .retry(id, cli_args.get("user").cloned())
            .await
            .with_context(|| format!("unable to retry deployment {}", id))?;
        println!(
            "Deployment {} retried as {} ({})",
            id,
            retried.id.bold(),
            paint(retried.status)
        );
        return Ok(());
    }

    if let Some(id) = cli_args.get("show") {
        let service = local_service(&options);
        let deployment = service.get(id).await?;
        print_deployment(&deployment)?;
        return Ok(());
    }

    if cli_args.contains_key("stats") {
        let service = local_service(&options);
        let stats = service.stats().await?;
        println!("Active hosts:  {}", stats.active_hosts);
        println!("Deployments:   {}", stats.total);
        println!("  {}  {}", paint(DeploymentStatus::Pending), stats.pending);
        println!("  {}  {}", paint(DeploymentStatus::Running), stats.running);
        println!("  {}  {}", paint(DeploymentStatus::Success), stats.successful);
        println!("  {}   {}", paint(DeploymentStatus::Failed), stats.failed);
        return Ok(());
    }

    // Run the agent starting here
    info!("Running ansigent with options: {:?}", options);
    run(options, await_shutdown_signal())
        .await
        .context("failed to run the agent")?;
    Ok(())
}

/// A service over the on-disk state that never queues work itself
fn local_service(options: &AppOptions) -> DeploymentService {
    let store = Arc::new(FileDeploymentStore::new(options.layout.deployments_dir()));
    let catalog = Arc::new(FileCatalog::new(options.layout.catalog_file()));
    let engine = Arc::new(Engine::new(store, catalog, options.engine.clone()));
    DeploymentService::new(engine, Arc::new(Deferred))
}

async fn init_layout(layout: &StorageLayout) -> anyhow::Result<()> {
    layout.setup().await?;

    let settings_file = layout.settings_file();
    if !settings_file.exists().await {
        settings_file.write_json(&Settings::default()).await?;
        println!("Wrote {}", settings_file.path().display());
    }

    let catalog_file = layout.catalog_file();
    if !catalog_file.exists().await {
        catalog_file.write_string(EMPTY_CATALOG).await?;
        println!("Wrote {}", catalog_file.path().display());
    }

    println!("Initialized {}", layout.base_dir.display());
    Ok(())
}

async fn run_deployment(service: &DeploymentService, id: &str) -> anyhow::Result<()> {
    let outcome = service.run_now(id).await;
    let deployment = service.get(id).await?;
    if let Some(output) = &deployment.command_output {
        println!("{}", output);
    }

    match outcome {
        Ok(Outcome::Completed { status, exit_code }) => {
            println!("Deployment {}: {} (exit code {})", id, paint(status), exit_code);
            if status == DeploymentStatus::Success {
                Ok(())
            } else {
                Err(anyhow!("deployment {} failed", id))
            }
        }
        Ok(Outcome::Skipped(status)) => {
            println!("Deployment {} is already {}, nothing to do", id, paint(status));
            Ok(())
        }
        Err(e) => {
            error!("Deployment {} aborted: {}", id, e);
            Err(anyhow!(e).context(format!("deployment {} aborted", id)))
        }
    }
}

async fn create_deployment(
    service: &DeploymentService,
    cli_args: &HashMap<String, String>,
) -> anyhow::Result<()> {
    let template = cli_args
        .get("template")
        .ok_or_else(|| anyhow!("--create requires --template=<id>"))?;
    let targets: Vec<String> = cli_args
        .get("targets")
        .ok_or_else(|| anyhow!("--create requires --targets=<host ids|all>"))?
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    let deployment = service
        .create(NewDeployment {
            task_template_id: template.clone(),
            user_id: cli_args
                .get("user")
                .cloned()
                .unwrap_or_else(|| "cli".to_string()),
            targets,
            environment_id: cli_args.get("environment").cloned(),
        })
        .await?;

    println!(
        "Created deployment {} ({}); the running agent will pick it up, or run it with --run={}",
        deployment.id.bold(),
        paint(deployment.status),
        deployment.id
    );
    Ok(())
}

fn print_deployment(deployment: &Deployment) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(deployment)?);
    Ok(())
}

fn paint(status: DeploymentStatus) -> colored::ColoredString {
    match status {
        DeploymentStatus::Pending => status.as_str().yellow(),
        DeploymentStatus::Running => status.as_str().cyan(),
        DeploymentStatus::Success => status.as_str().green(),
        DeploymentStatus::Failed => status.as_str().red(),
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("SIGTERM received, shutting down...");
                    }
                    _ = sigint.recv() => {
                        info!("SIGINT received, shutting down...");
                    }
                }
                return;
            }
            _ => error!("Unable to install signal handlers, falling back to Ctrl+C"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Ctrl+C received, shutting down...");
}
