//! Scan scheduling and lifecycle.
//!
//! The scanner itself is single-owner and synchronous-per-pass; this module
//! moves it into a tokio task that serializes periodic ticks, manual scan
//! requests and runtime reconfiguration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::controller::DeploymentOperations;
use crate::inspect::ContentKind;
use crate::scan::{DeploymentScanner, ScanError, ScanSummary};

enum Command {
    Scan(oneshot::Sender<Result<ScanSummary, ScanError>>),
    SetInterval(Duration),
    SetAutoDeploy(ContentKind, bool),
    Stop,
}

/// Handle to a running scanner task.
pub struct ScannerHandle {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<DeploymentScanner>,
}

impl ScannerHandle {
    /// Run the mandatory boot-time scan, then hand the scanner to a
    /// background task that rescans on every interval tick. A walk failure
    /// during the boot scan is fatal; later walk failures are logged and
    /// retried on the next tick.
    pub async fn start(
        mut scanner: DeploymentScanner,
        ops: Arc<dyn DeploymentOperations>,
    ) -> anyhow::Result<Self> {
        scanner
            .boot_time_scan(ops.as_ref())
            .await
            .context("Boot-time scan failed")?;

        // Capacity 1: a scan request arriving while one is queued is
        // dropped, never stacked.
        let (commands, mut rx) = mpsc::channel(1);
        let period = scanner.config().scan_interval();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The boot scan just ran; skip the interval's immediate tick.
            ticker.reset();

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = scanner.scan(ops.as_ref()).await {
                            match err {
                                ScanError::WalkFailed { .. } => {
                                    warn!(%err, "scan pass aborted, retrying next tick");
                                }
                                ScanError::Controller(err) => {
                                    warn!(%err, "controller unreachable, retrying next tick");
                                }
                            }
                        }
                    }
                    command = rx.recv() => match command {
                        Some(Command::Scan(reply)) => {
                            let _ = reply.send(scanner.scan(ops.as_ref()).await);
                        }
                        Some(Command::SetInterval(period)) => {
                            debug!(period_ms = period.as_millis() as u64, "rescheduling");
                            ticker = tokio::time::interval(period);
                            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                            ticker.reset();
                        }
                        Some(Command::SetAutoDeploy(kind, enabled)) => match kind {
                            ContentKind::Archive => scanner.set_auto_deploy_zipped(enabled),
                            ContentKind::Exploded => scanner.set_auto_deploy_exploded(enabled),
                            ContentKind::Xml => scanner.set_auto_deploy_xml(enabled),
                            ContentKind::Other => {}
                        },
                        Some(Command::Stop) | None => break,
                    }
                }
            }
            scanner
        });

        Ok(Self { commands, task })
    }

    /// Request an immediate scan and wait for its summary. Fails without
    /// queueing when a request is already waiting.
    pub async fn scan_now(&self) -> anyhow::Result<ScanSummary> {
        let (reply, result) = oneshot::channel();
        if self.commands.try_send(Command::Scan(reply)).is_err() {
            bail!("A scan is already queued");
        }
        result
            .await
            .context("Scanner task stopped")?
            .map_err(anyhow::Error::from)
    }

    pub async fn set_interval(&self, period: Duration) -> anyhow::Result<()> {
        self.commands
            .send(Command::SetInterval(period))
            .await
            .context("Scanner task stopped")
    }

    pub async fn set_auto_deploy(&self, kind: ContentKind, enabled: bool) -> anyhow::Result<()> {
        self.commands
            .send(Command::SetAutoDeploy(kind, enabled))
            .await
            .context("Scanner task stopped")
    }

    /// Stop the task, waiting up to `grace` for an in-flight scan to finish.
    /// The scanner is returned so the caller can run a final
    /// [`DeploymentScanner::forced_undeploy_scan`].
    pub async fn stop(mut self, grace: Duration) -> anyhow::Result<DeploymentScanner> {
        let shutdown = async {
            let _ = self.commands.send(Command::Stop).await;
            (&mut self.task).await
        };
        match tokio::time::timeout(grace, shutdown).await {
            Ok(Ok(scanner)) => Ok(scanner),
            Ok(Err(err)) => bail!("Scanner task panicked: {err}"),
            Err(_) => {
                self.task.abort();
                bail!("Scanner task did not stop within {grace:?}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::config::ScannerConfig;
    use crate::controller::{Batch, BatchOutcome, RemoteDeployment, StepOutcome};
    use crate::inspect::ArchiveInspector;

    /// Counts list fetches, succeeds every submission.
    #[derive(Default)]
    struct CountingController {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl DeploymentOperations for CountingController {
        async fn deployments(&self) -> anyhow::Result<HashMap<String, RemoteDeployment>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(HashMap::new())
        }

        async fn submit(&self, batch: Batch) -> anyhow::Result<BatchOutcome> {
            Ok(BatchOutcome {
                success: true,
                rolled_back: false,
                steps: vec![StepOutcome::Success; batch.groups.len()],
            })
        }
    }

    fn scanner(root: &std::path::Path) -> DeploymentScanner {
        DeploymentScanner::new(
            "schedule-test",
            root,
            ScannerConfig {
                scan_interval_ms: 100,
                ..ScannerConfig::default()
            },
            Arc::new(ArchiveInspector),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_drive_repeated_scans() {
        let tmp = tempfile::tempdir().unwrap();
        let ops = Arc::new(CountingController::default());
        let handle = ScannerHandle::start(scanner(tmp.path()), ops.clone())
            .await
            .unwrap();
        assert_eq!(ops.fetches.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(350)).await;
        let ticked = ops.fetches.load(Ordering::SeqCst);
        assert!(ticked >= 3, "expected periodic scans, saw {ticked}");

        handle.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn manual_scan_reports_a_summary() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("app.war"), b"not really a zip").unwrap();
        let ops = Arc::new(CountingController::default());
        // Interval far in the future so only the manual request scans.
        let mut scanner = DeploymentScanner::new(
            "schedule-test",
            tmp.path(),
            ScannerConfig {
                scan_interval_ms: 3_600_000,
                ..ScannerConfig::default()
            },
            Arc::new(ArchiveInspector),
        );
        scanner.set_auto_deploy_zipped(false);
        let handle = ScannerHandle::start(scanner, ops.clone()).await.unwrap();

        crate::marker::write_marker(tmp.path(), "app.war", crate::marker::MarkerKind::DoDeploy)
            .unwrap();
        let summary = handle.scan_now().await.unwrap();
        assert_eq!(summary.deployed, vec!["app.war"]);

        let scanner = handle.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(scanner.id(), "schedule-test");
    }

    #[tokio::test]
    async fn boot_walk_failure_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        std::fs::write(&root, b"a file where a directory should be").unwrap();
        let ops = Arc::new(CountingController::default());

        let Err(err) = ScannerHandle::start(scanner(&root), ops).await else {
            panic!("expected the boot-time scan to fail");
        };
        assert!(err.to_string().contains("Boot-time scan"));
    }
}
