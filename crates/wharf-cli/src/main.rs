//! Wharf - Marker-driven deployment scanner
//!
//! Usage:
//!   wharf scan <dir>             # One reconciliation pass
//!   wharf watch <dir>            # Rescan on an interval until Ctrl-C
//!   wharf scan <dir> --format json

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wharf_core::prelude::*;

#[derive(Parser)]
#[command(name = "wharf")]
#[command(about = "Marker-driven deployment scanner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reconciliation pass and print what it did
    Scan {
        /// Directory to scan
        dir: PathBuf,

        /// Scanner configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Scanner identity reported to the controller
        #[arg(long, default_value = "wharf")]
        id: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Scan continuously until interrupted
    Watch {
        /// Directory to scan
        dir: PathBuf,

        /// Scanner configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Scanner identity reported to the controller
        #[arg(long, default_value = "wharf")]
        id: String,

        /// Retract owned, non-persistent deployments on shutdown
        #[arg(long)]
        undeploy_on_exit: bool,
    },
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// Machine-readable JSON
    Json,
}

/// In-memory controller that accepts every operation. Stands in for a real
/// management backend so marker flows can be exercised end to end.
struct AcceptAllController {
    /// Owner recorded on accepted content; must match the scanner id so
    /// ownership checks behave like a real backend's.
    owner: String,
    remote: Mutex<HashMap<String, RemoteDeployment>>,
}

impl AcceptAllController {
    fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            remote: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl DeploymentOperations for AcceptAllController {
    async fn deployments(&self) -> Result<HashMap<String, RemoteDeployment>> {
        Ok(self.remote.lock().unwrap().clone())
    }

    async fn submit(&self, batch: Batch) -> Result<BatchOutcome> {
        let mut remote = self.remote.lock().unwrap();
        for group in &batch.groups {
            for op in &group.ops {
                match op {
                    Op::Add { name, .. } | Op::FullReplace { name, .. } => {
                        remote.insert(
                            name.clone(),
                            RemoteDeployment {
                                enabled: true,
                                persistent: false,
                                owner: Some(self.owner.clone()),
                            },
                        );
                    }
                    Op::Deploy { name } => {
                        if let Some(d) = remote.get_mut(name) {
                            d.enabled = true;
                        }
                    }
                    Op::Undeploy { name } => {
                        if let Some(d) = remote.get_mut(name) {
                            d.enabled = false;
                        }
                    }
                    Op::Remove { name } => {
                        remote.remove(name);
                    }
                    Op::Redeploy { .. } => {}
                }
            }
        }
        Ok(BatchOutcome {
            success: true,
            rolled_back: false,
            steps: vec![StepOutcome::Success; batch.groups.len()],
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wharf=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Scan {
            dir,
            config,
            id,
            format,
        } => run_scan(dir, config, id, format).await,
        Commands::Watch {
            dir,
            config,
            id,
            undeploy_on_exit,
        } => run_watch(dir, config, id, undeploy_on_exit).await,
    }
}

fn load_config(path: Option<PathBuf>) -> Result<ScannerConfig> {
    match path {
        Some(path) => ScannerConfig::load(&path),
        None => Ok(ScannerConfig::default()),
    }
}

async fn run_scan(
    dir: PathBuf,
    config: Option<PathBuf>,
    id: String,
    format: OutputFormat,
) -> Result<()> {
    let config = load_config(config)?;
    let controller = AcceptAllController::new(id.as_str());
    let mut scanner = DeploymentScanner::new(id, dir, config, Arc::new(ArchiveInspector));
    let summary = scanner
        .boot_time_scan(&controller)
        .await
        .context("Scan failed")?;
    print_summary(&summary, format)
}

async fn run_watch(
    dir: PathBuf,
    config: Option<PathBuf>,
    id: String,
    undeploy_on_exit: bool,
) -> Result<()> {
    let config = load_config(config)?;
    let controller: Arc<dyn DeploymentOperations> = Arc::new(AcceptAllController::new(id.as_str()));
    let scanner = DeploymentScanner::new(id, &dir, config, Arc::new(ArchiveInspector));
    let handle = ScannerHandle::start(scanner, controller.clone()).await?;
    info!(dir = %dir.display(), "watching; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    let mut scanner = handle.stop(Duration::from_secs(30)).await?;
    if undeploy_on_exit {
        let summary = scanner.forced_undeploy_scan(controller.as_ref()).await?;
        for name in &summary.undeployed {
            info!(name, "retracted on shutdown");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepted_content_is_owned_by_the_configured_id() {
        let controller = AcceptAllController::new("scanner-east");
        let batch = Batch {
            groups: vec![ActionGroup {
                name: "app.war".to_string(),
                ops: vec![
                    Op::Add {
                        name: "app.war".to_string(),
                        content: PathBuf::from("/tmp/app.war"),
                    },
                    Op::Deploy {
                        name: "app.war".to_string(),
                    },
                ],
            }],
        };
        controller.submit(batch).await.unwrap();

        let remote = controller.deployments().await.unwrap();
        let deployment = remote.get("app.war").unwrap();
        assert_eq!(deployment.owner.as_deref(), Some("scanner-east"));
        assert!(deployment.enabled);
    }
}

fn print_summary(summary: &ScanSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(summary)?);
        }
        OutputFormat::Text => {
            println!(
                "scan started {} ({} ms)",
                summary.started_at.to_rfc3339(),
                summary.duration_ms
            );
            for name in &summary.deployed {
                println!("  deployed   {name}");
            }
            for name in &summary.undeployed {
                println!("  undeployed {name}");
            }
            for name in &summary.failed {
                println!("  failed     {name}");
            }
            for name in &summary.pending {
                println!("  pending    {name}");
            }
            if summary.is_quiet() {
                println!("  no changes");
            }
        }
    }
    Ok(())
}
