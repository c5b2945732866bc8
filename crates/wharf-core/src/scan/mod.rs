//! Reconciliation engine and batch dispatcher.
//!
//! A scan pass compares three views of the world: the files and markers on
//! disk, the scanner's own memory of what it deployed, and the controller's
//! authoritative deployment list. The differences become one ordered batch
//! of controller operations, submitted as a composite and settled back onto
//! disk as terminal markers.

mod walk;


pub use walk::{Inventory, MarkerSet, OrphanMarker, ScannedEntry, is_archive_name, walk};

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ScannerConfig;
use crate::controller::{ActionGroup, Batch, DeploymentOperations, Op, StepOutcome};
use crate::inspect::{Completeness, ContentInspector, ContentKind};
use crate::marker::{self, MarkerKind};
use crate::registry::{DeployedEntry, Registry};

/// Why a scan pass could not complete.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// The directory walk failed partway. Transient during steady-state
    /// scanning, fatal when raised by the boot-time scan.
    #[error("Failed to walk {dir}")]
    WalkFailed {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The controller could not be reached or rejected the request outright.
    #[error("Controller request failed")]
    Controller(#[source] anyhow::Error),
}

/// What one scan pass did, for logs and the CLI summary.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub deployed: Vec<String>,
    pub undeployed: Vec<String>,
    pub failed: Vec<String>,
    pub pending: Vec<String>,
}

impl ScanSummary {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            duration_ms: 0,
            deployed: Vec::new(),
            undeployed: Vec::new(),
            failed: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.deployed.is_empty()
            && self.undeployed.is_empty()
            && self.failed.is_empty()
            && self.pending.is_empty()
    }
}

/// An incomplete file being watched for growth.
#[derive(Debug, Clone, Copy)]
struct PendingFile {
    first_seen: Instant,
    len: u64,
}

#[derive(Debug, Clone)]
enum TaskKind {
    /// Add or replace content on the controller.
    Deploy {
        path: PathBuf,
        kind: ContentKind,
        replace: bool,
        /// Discovered by auto-deploy rather than an explicit marker. These
        /// are parked while any sibling content is still incomplete.
        auto_new: bool,
    },
    /// Content unchanged, restart in place.
    Redeploy,
    /// Retract a deployment this scanner owns.
    Undeploy,
    /// Retract the remains of a failed deployment whose content is gone.
    FailedCleanup,
}

#[derive(Debug, Clone)]
struct ScannerTask {
    name: String,
    dir: PathBuf,
    kind: TaskKind,
    ops: Vec<Op>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupState {
    Queued,
    Done,
    Failed,
}

/// One scanned deployment directory.
///
/// Single-owner: all mutation happens inside `scan` calls, which the
/// scheduler serializes. The controller handle is passed per call so tests
/// can script it.
pub struct DeploymentScanner {
    id: String,
    root: PathBuf,
    config: ScannerConfig,
    registry: Registry,
    inspector: Arc<dyn ContentInspector>,
    no_progress: HashMap<PathBuf, PendingFile>,
    retry_next_scan: HashSet<String>,
    first_scan_done: bool,
}

impl DeploymentScanner {
    pub fn new(
        id: impl Into<String>,
        root: impl Into<PathBuf>,
        config: ScannerConfig,
        inspector: Arc<dyn ContentInspector>,
    ) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
            config,
            registry: Registry::default(),
            inspector,
            no_progress: HashMap::new(),
            retry_next_scan: HashSet::new(),
            first_scan_done: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn set_auto_deploy_zipped(&mut self, enabled: bool) {
        self.config.auto_deploy_zipped = enabled;
    }

    pub fn set_auto_deploy_exploded(&mut self, enabled: bool) {
        self.config.auto_deploy_exploded = enabled;
    }

    pub fn set_auto_deploy_xml(&mut self, enabled: bool) {
        self.config.auto_deploy_xml = enabled;
    }

    pub fn set_deployment_timeout(&mut self, timeout: Duration) {
        self.config.deployment_timeout_ms = timeout.as_millis() as u64;
    }

    pub fn set_max_no_progress(&mut self, window: Duration) {
        self.config.max_no_progress_ms = window.as_millis() as u64;
    }

    /// The first scan after startup. Seeds the registry from the controller
    /// list and the markers on disk; a walk failure here is fatal to the
    /// caller rather than retried.
    pub async fn boot_time_scan(
        &mut self,
        ops: &dyn DeploymentOperations,
    ) -> Result<ScanSummary, ScanError> {
        self.scan(ops).await
    }

    /// One full reconciliation pass.
    pub async fn scan(
        &mut self,
        ops: &dyn DeploymentOperations,
    ) -> Result<ScanSummary, ScanError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut summary = ScanSummary::new(started_at);

        let remote = ops.deployments().await.map_err(ScanError::Controller)?;
        self.registry.refresh_remote(remote);

        let inventory = walk::walk(&self.root, &self.config, self.inspector.as_ref())
            .map_err(|source| ScanError::WalkFailed {
                dir: self.root.clone(),
                source,
            })?;

        let mut tasks = self.reconcile(&inventory, &mut summary);
        self.park_if_not_quiescent(&mut tasks, &mut summary);
        self.dispatch(ops, tasks, &mut summary).await;

        self.first_scan_done = true;
        summary.duration_ms = clock.elapsed().as_millis() as u64;
        if summary.is_quiet() {
            debug!(root = %self.root.display(), "scan pass made no changes");
        } else {
            info!(
                root = %self.root.display(),
                deployed = summary.deployed.len(),
                undeployed = summary.undeployed.len(),
                failed = summary.failed.len(),
                pending = summary.pending.len(),
                "scan pass complete"
            );
        }
        Ok(summary)
    }

    /// Retract every deployment this scanner owns that is enabled and not
    /// persistent. Run when the scanned directory is being decommissioned.
    pub async fn forced_undeploy_scan(
        &mut self,
        ops: &dyn DeploymentOperations,
    ) -> Result<ScanSummary, ScanError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut summary = ScanSummary::new(started_at);

        let remote = ops.deployments().await.map_err(ScanError::Controller)?;
        self.registry.refresh_remote(remote);

        let tasks: Vec<ScannerTask> = self
            .registry
            .forced_undeploy_names(&self.id)
            .into_iter()
            .map(|name| {
                let dir = self
                    .registry
                    .deployed_entry(&name)
                    .map(|e| e.dir.clone())
                    .unwrap_or_else(|| self.root.clone());
                ScannerTask {
                    ops: undeploy_ops(&name),
                    kind: TaskKind::Undeploy,
                    dir,
                    name,
                }
            })
            .collect();

        self.dispatch(ops, tasks, &mut summary).await;
        summary.duration_ms = clock.elapsed().as_millis() as u64;
        Ok(summary)
    }

    fn reconcile(&mut self, inventory: &Inventory, summary: &mut ScanSummary) -> Vec<ScannerTask> {
        let mut tasks = Vec::new();
        let mut seen = HashSet::new();

        for entry in &inventory.entries {
            seen.insert(entry.name.clone());
            self.reconcile_entry(entry, &mut tasks, summary);
        }
        for orphan in &inventory.orphans {
            seen.insert(orphan.name.clone());
            self.reconcile_orphan(orphan, &mut tasks, summary);
        }
        self.reconcile_vanished(&seen, &mut tasks, summary);

        self.no_progress.retain(|path, _| {
            inventory
                .entries
                .iter()
                .any(|e| e.path == *path && e.completeness == Completeness::Incomplete)
        });
        tasks
    }

    fn reconcile_entry(
        &mut self,
        entry: &ScannedEntry,
        tasks: &mut Vec<ScannerTask>,
        summary: &mut ScanSummary,
    ) {
        let name = entry.name.as_str();
        let retry_requested = self.retry_next_scan.remove(name);
        let foreign = self.registry.is_foreign(name, &self.id);

        if entry.markers.skip_deploy {
            debug!(name, "skip marker present, leaving untouched");
            return;
        }

        if entry.markers.do_deploy.is_some() {
            if foreign {
                warn!(name, "deploy requested for content managed elsewhere, ignoring");
                return;
            }
            // An explicit marker asserts the content is ready, so the
            // completeness probe is bypassed.
            let replace = self.registry.remote_knows(name);
            tasks.push(self.deploy_task(entry, replace, false));
            return;
        }

        if entry.markers.deployed.is_some() {
            self.reconcile_deployed_marker(entry, tasks, summary);
            return;
        }

        if let Some(failed_at) = entry.markers.failed {
            if retry_requested || entry.mtime > failed_at {
                let replace = self.registry.remote_knows(name);
                tasks.push(self.deploy_task(entry, replace, false));
            }
            return;
        }

        if let Some(undeployed_at) = entry.markers.undeployed {
            if self.registry.remote_owned_enabled(name, &self.id)
                && self.registry.deployed_entry(name).is_none()
            {
                // Re-enabled behind our back; take it back over without
                // another controller round trip.
                info!(name, "deployment re-enabled externally, re-adopting");
                self.drop_marker(&entry.dir, name, MarkerKind::Undeployed);
                self.adopt(entry);
                return;
            }
            if entry.mtime > undeployed_at {
                let replace = self.registry.remote_knows(name);
                tasks.push(self.deploy_task(entry, replace, false));
            }
            return;
        }

        if self.registry.deployed_entry(name).is_some() {
            // We deployed it and the marker is gone.
            if self.registry.remote_knows(name) {
                tasks.push(ScannerTask {
                    name: name.to_string(),
                    dir: entry.dir.clone(),
                    kind: TaskKind::Undeploy,
                    ops: undeploy_ops(name),
                });
            } else {
                // Undeployed through the management API; just settle markers.
                info!(name, "deployment removed externally");
                self.registry.clear_deployed(name);
                self.put_marker(&entry.dir, name, MarkerKind::Undeployed);
                summary.undeployed.push(name.to_string());
            }
            return;
        }

        if foreign {
            return;
        }

        if self.auto_deploy_enabled(entry.kind) {
            match &entry.completeness {
                Completeness::Complete => {
                    let replace = self.registry.remote_knows(name);
                    tasks.push(self.deploy_task(entry, replace, true));
                }
                Completeness::Incomplete => self.track_incomplete(entry, summary),
                Completeness::Unsupported(reason) => {
                    warn!(name, reason = %reason, "content cannot be deployed");
                    self.drop_marker(&entry.dir, name, MarkerKind::Pending);
                    self.put_marker(&entry.dir, name, MarkerKind::FailedDeploy);
                    self.no_progress.remove(&entry.path);
                    summary.failed.push(name.to_string());
                }
            }
        }
    }

    fn reconcile_deployed_marker(
        &mut self,
        entry: &ScannedEntry,
        tasks: &mut Vec<ScannerTask>,
        summary: &mut ScanSummary,
    ) {
        let name = entry.name.as_str();
        let marker_mtime = entry.markers.deployed.unwrap_or(SystemTime::UNIX_EPOCH);

        let Some(known) = self.registry.deployed_entry(name) else {
            if !self.registry.remote_knows(name) {
                // Marker survived a restart but the controller forgot the
                // deployment; bring it back.
                tasks.push(self.deploy_task(entry, false, false));
            } else if self.registry.remote_owned_enabled(name, &self.id) {
                self.adopt(entry);
            }
            // Anything else is foreign.
            return;
        };

        let touched = known.marker_mtime != marker_mtime;
        let newer = entry.mtime > known.marker_mtime;
        if !touched && !newer {
            if !self.registry.remote_knows(name) {
                let entry_dir = entry.dir.clone();
                info!(name, "deployment removed externally");
                self.registry.clear_deployed(name);
                self.drop_marker(&entry_dir, name, MarkerKind::Deployed);
                self.put_marker(&entry_dir, name, MarkerKind::Undeployed);
                summary.undeployed.push(name.to_string());
            }
            return;
        }

        let recorded = known.identity;
        let same_content = match self.inspector.identity(&entry.path) {
            Ok(current) => recorded == Some(current),
            Err(err) => {
                warn!(name, %err, "content identity unavailable, assuming changed");
                false
            }
        };
        if same_content {
            tasks.push(ScannerTask {
                name: name.to_string(),
                dir: entry.dir.clone(),
                kind: TaskKind::Redeploy,
                ops: vec![Op::Redeploy {
                    name: name.to_string(),
                }],
            });
        } else {
            tasks.push(self.deploy_task(entry, true, false));
        }
    }

    fn reconcile_orphan(
        &mut self,
        orphan: &OrphanMarker,
        tasks: &mut Vec<ScannerTask>,
        summary: &mut ScanSummary,
    ) {
        let name = orphan.name.as_str();
        match orphan.kind {
            MarkerKind::DoDeploy => {
                warn!(name, "deploy requested but the content is missing");
                self.drop_marker(&orphan.dir, name, MarkerKind::DoDeploy);
            }
            MarkerKind::Deployed => {
                let Some(known) = self.registry.deployed_entry(name) else {
                    debug!(name, "stale deployed marker, removing");
                    self.drop_marker(&orphan.dir, name, MarkerKind::Deployed);
                    return;
                };
                if !self.auto_deploy_enabled(known.kind) {
                    return;
                }
                if self.registry.remote_knows(name) {
                    tasks.push(ScannerTask {
                        name: name.to_string(),
                        dir: orphan.dir.clone(),
                        kind: TaskKind::Undeploy,
                        ops: undeploy_ops(name),
                    });
                } else {
                    info!(name, "deployment removed externally");
                    self.registry.clear_deployed(name);
                    self.drop_marker(&orphan.dir, name, MarkerKind::Deployed);
                    self.put_marker(&orphan.dir, name, MarkerKind::Undeployed);
                    summary.undeployed.push(name.to_string());
                }
            }
            MarkerKind::FailedDeploy => {
                if !self.first_scan_done {
                    // Leave startup leftovers for the operator to see once.
                    return;
                }
                if self.registry.is_foreign(name, &self.id) {
                    self.drop_marker(&orphan.dir, name, MarkerKind::FailedDeploy);
                } else if self.registry.remote_knows(name)
                    || self.registry.deployed_entry(name).is_some()
                {
                    tasks.push(ScannerTask {
                        name: name.to_string(),
                        dir: orphan.dir.clone(),
                        kind: TaskKind::FailedCleanup,
                        ops: undeploy_ops(name),
                    });
                } else {
                    self.drop_marker(&orphan.dir, name, MarkerKind::FailedDeploy);
                }
            }
            // A lone undeployed marker is history, not work.
            MarkerKind::Undeployed => {}
            MarkerKind::Pending
            | MarkerKind::Deploying
            | MarkerKind::Undeploying
            | MarkerKind::SkipDeploy => {}
        }
    }

    /// Content and markers both gone, but the registry still remembers the
    /// name.
    fn reconcile_vanished(
        &mut self,
        seen: &HashSet<String>,
        tasks: &mut Vec<ScannerTask>,
        summary: &mut ScanSummary,
    ) {
        for name in self.registry.deployed_names() {
            if seen.contains(&name) || tasks.iter().any(|t| t.name == name) {
                continue;
            }
            let dir = self
                .registry
                .deployed_entry(&name)
                .map(|e| e.dir.clone())
                .unwrap_or_else(|| self.root.clone());
            if self.registry.remote_knows(&name) {
                tasks.push(ScannerTask {
                    ops: undeploy_ops(&name),
                    kind: TaskKind::Undeploy,
                    dir,
                    name,
                });
            } else {
                info!(name = %name, "deployment removed externally");
                self.registry.clear_deployed(&name);
                self.put_marker(&dir, &name, MarkerKind::Undeployed);
                summary.undeployed.push(name);
            }
        }
    }

    /// While any incomplete content sits in the directory, auto-discovered
    /// additions wait so a half-copied batch is not deployed piecemeal.
    fn park_if_not_quiescent(&mut self, tasks: &mut Vec<ScannerTask>, summary: &mut ScanSummary) {
        if self.no_progress.is_empty() {
            return;
        }
        let (parked, kept): (Vec<ScannerTask>, Vec<ScannerTask>) = std::mem::take(tasks)
            .into_iter()
            .partition(|task| matches!(task.kind, TaskKind::Deploy { auto_new: true, .. }));
        *tasks = kept;
        for task in parked {
            debug!(name = %task.name, "parking deployment until the directory settles");
            self.put_marker(&task.dir, &task.name, MarkerKind::Pending);
            summary.pending.push(task.name);
        }
    }

    fn track_incomplete(&mut self, entry: &ScannedEntry, summary: &mut ScanSummary) {
        let name = entry.name.as_str();
        let window = self.config.max_no_progress();
        let tracker = self
            .no_progress
            .entry(entry.path.clone())
            .or_insert_with(|| PendingFile {
                first_seen: Instant::now(),
                len: entry.len,
            });
        if tracker.len != entry.len {
            tracker.first_seen = Instant::now();
            tracker.len = entry.len;
        }
        if tracker.first_seen.elapsed() >= window {
            warn!(name, "incomplete content stopped growing, giving up");
            self.no_progress.remove(&entry.path);
            self.drop_marker(&entry.dir, name, MarkerKind::Pending);
            self.put_marker(&entry.dir, name, MarkerKind::FailedDeploy);
            summary.failed.push(name.to_string());
        } else {
            self.put_marker(&entry.dir, name, MarkerKind::Pending);
            summary.pending.push(name.to_string());
        }
    }

    fn deploy_task(&self, entry: &ScannedEntry, replace: bool, auto_new: bool) -> ScannerTask {
        let name = entry.name.clone();
        let ops = if replace {
            vec![Op::FullReplace {
                name: name.clone(),
                content: entry.path.clone(),
            }]
        } else {
            vec![
                Op::Add {
                    name: name.clone(),
                    content: entry.path.clone(),
                },
                Op::Deploy { name: name.clone() },
            ]
        };
        ScannerTask {
            name,
            dir: entry.dir.clone(),
            kind: TaskKind::Deploy {
                path: entry.path.clone(),
                kind: entry.kind,
                replace,
                auto_new,
            },
            ops,
        }
    }

    /// Record a deployment the controller already runs without touching it.
    fn adopt(&mut self, entry: &ScannedEntry) {
        let identity = self.inspector.identity(&entry.path).ok();
        let marker_mtime = self
            .put_marker(&entry.dir, &entry.name, MarkerKind::Deployed)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        self.registry.record_deployed(
            entry.name.clone(),
            DeployedEntry {
                dir: entry.dir.clone(),
                kind: entry.kind,
                marker_mtime,
                identity,
            },
        );
    }

    fn auto_deploy_enabled(&self, kind: ContentKind) -> bool {
        match kind {
            ContentKind::Archive => self.config.auto_deploy_zipped,
            ContentKind::Exploded => self.config.auto_deploy_exploded,
            ContentKind::Xml => self.config.auto_deploy_xml,
            ContentKind::Other => false,
        }
    }

    async fn dispatch(
        &mut self,
        ops: &dyn DeploymentOperations,
        tasks: Vec<ScannerTask>,
        summary: &mut ScanSummary,
    ) {
        if tasks.is_empty() {
            return;
        }
        let timeout = self.config.deployment_timeout();
        let mut states = vec![GroupState::Queued; tasks.len()];

        loop {
            let queued: Vec<usize> = (0..tasks.len())
                .filter(|&i| states[i] == GroupState::Queued)
                .collect();
            if queued.is_empty() {
                break;
            }

            for &i in &queued {
                self.put_marker(&tasks[i].dir, &tasks[i].name, transient_marker(&tasks[i].kind));
            }
            let batch = Batch {
                groups: queued
                    .iter()
                    .map(|&i| ActionGroup {
                        name: tasks[i].name.clone(),
                        ops: tasks[i].ops.clone(),
                    })
                    .collect(),
            };

            let result = tokio::time::timeout(timeout, ops.submit(batch)).await;
            for &i in &queued {
                self.drop_marker(&tasks[i].dir, &tasks[i].name, transient_marker(&tasks[i].kind));
            }

            let outcome = match result {
                Ok(Ok(outcome)) if outcome.steps.len() == queued.len() => outcome,
                Ok(Ok(outcome)) => {
                    warn!(
                        expected = queued.len(),
                        got = outcome.steps.len(),
                        "controller returned a malformed composite result"
                    );
                    self.fail_all(&tasks, &queued, &mut states, "malformed result", summary);
                    break;
                }
                Ok(Err(err)) => {
                    warn!(%err, "composite submission failed");
                    self.fail_all(&tasks, &queued, &mut states, &err.to_string(), summary);
                    break;
                }
                Err(_) => {
                    warn!(timeout_ms = timeout.as_millis() as u64, "composite submission timed out");
                    self.fail_all(&tasks, &queued, &mut states, "deployment timed out", summary);
                    break;
                }
            };

            if !outcome.success && outcome.rolled_back {
                debug!("composite rolled back, splitting out the failed group");
            }
            let mut progressed = false;
            for (&i, step) in queued.iter().zip(&outcome.steps) {
                match step {
                    StepOutcome::Success => {
                        self.finish_success(&tasks[i], summary);
                        states[i] = GroupState::Done;
                        progressed = true;
                    }
                    StepOutcome::Failed(message) => {
                        self.finish_failed(&tasks[i], message, summary);
                        states[i] = GroupState::Failed;
                        progressed = true;
                    }
                    // The group never really ran; resubmit it on its own so
                    // one bad deployment cannot sink its neighbors.
                    StepOutcome::RolledBack | StepOutcome::Cancelled => {}
                }
            }
            if !progressed {
                for &i in &queued {
                    debug!(name = %tasks[i].name, "deferring to the next scan pass");
                    self.retry_next_scan.insert(tasks[i].name.clone());
                    states[i] = GroupState::Done;
                }
                break;
            }
        }
    }

    fn fail_all(
        &mut self,
        tasks: &[ScannerTask],
        queued: &[usize],
        states: &mut [GroupState],
        message: &str,
        summary: &mut ScanSummary,
    ) {
        for &i in queued {
            if states[i] == GroupState::Queued {
                self.finish_failed(&tasks[i], message, summary);
                states[i] = GroupState::Failed;
            }
        }
    }

    fn finish_success(&mut self, task: &ScannerTask, summary: &mut ScanSummary) {
        let name = task.name.as_str();
        match &task.kind {
            TaskKind::Deploy { path, kind, .. } => {
                self.drop_marker(&task.dir, name, MarkerKind::DoDeploy);
                self.drop_marker(&task.dir, name, MarkerKind::FailedDeploy);
                self.drop_marker(&task.dir, name, MarkerKind::Undeployed);
                self.drop_marker(&task.dir, name, MarkerKind::Pending);
                self.no_progress.remove(path);
                let identity = self.inspector.identity(path).ok();
                let marker_mtime = self
                    .put_marker(&task.dir, name, MarkerKind::Deployed)
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                self.registry.record_deployed(
                    name.to_string(),
                    DeployedEntry {
                        dir: task.dir.clone(),
                        kind: *kind,
                        marker_mtime,
                        identity,
                    },
                );
                info!(name, "deployed");
                summary.deployed.push(name.to_string());
            }
            TaskKind::Redeploy => {
                let marker_mtime = self
                    .put_marker(&task.dir, name, MarkerKind::Deployed)
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                if let Some(entry) = self.registry.deployed_entry(name).cloned() {
                    self.registry.record_deployed(
                        name.to_string(),
                        DeployedEntry {
                            marker_mtime,
                            ..entry
                        },
                    );
                }
                info!(name, "redeployed");
                summary.deployed.push(name.to_string());
            }
            TaskKind::Undeploy => {
                self.registry.clear_deployed(name);
                self.drop_marker(&task.dir, name, MarkerKind::Deployed);
                self.put_marker(&task.dir, name, MarkerKind::Undeployed);
                info!(name, "undeployed");
                summary.undeployed.push(name.to_string());
            }
            TaskKind::FailedCleanup => {
                self.registry.clear_deployed(name);
                self.drop_marker(&task.dir, name, MarkerKind::FailedDeploy);
                info!(name, "failed deployment retracted");
                summary.undeployed.push(name.to_string());
            }
        }
    }

    fn finish_failed(&mut self, task: &ScannerTask, message: &str, summary: &mut ScanSummary) {
        let name = task.name.as_str();
        warn!(name, message, "deployment operation failed");
        match &task.kind {
            TaskKind::Deploy { path, .. } => {
                self.drop_marker(&task.dir, name, MarkerKind::DoDeploy);
                self.drop_marker(&task.dir, name, MarkerKind::Pending);
                self.no_progress.remove(path);
                self.registry.clear_deployed(name);
                self.drop_marker(&task.dir, name, MarkerKind::Deployed);
                self.put_marker(&task.dir, name, MarkerKind::FailedDeploy);
                summary.failed.push(name.to_string());
            }
            TaskKind::Redeploy => {
                self.registry.clear_deployed(name);
                self.drop_marker(&task.dir, name, MarkerKind::Deployed);
                self.put_marker(&task.dir, name, MarkerKind::FailedDeploy);
                summary.failed.push(name.to_string());
            }
            TaskKind::Undeploy => {
                self.registry.clear_deployed(name);
                self.drop_marker(&task.dir, name, MarkerKind::Deployed);
                self.put_marker(&task.dir, name, MarkerKind::FailedDeploy);
                summary.failed.push(name.to_string());
            }
            // The marker is already on disk; try again next pass.
            TaskKind::FailedCleanup => {}
        }
    }

    fn put_marker(&self, dir: &Path, name: &str, kind: MarkerKind) -> Option<SystemTime> {
        match marker::write_marker(dir, name, kind) {
            Ok(_) => marker::marker_mtime(dir, name, kind),
            Err(err) => {
                warn!(name, %err, "failed to write marker");
                None
            }
        }
    }

    fn drop_marker(&self, dir: &Path, name: &str, kind: MarkerKind) {
        marker::remove_marker(dir, name, kind);
    }
}

fn undeploy_ops(name: &str) -> Vec<Op> {
    vec![
        Op::Undeploy {
            name: name.to_string(),
        },
        Op::Remove {
            name: name.to_string(),
        },
    ]
}

fn transient_marker(kind: &TaskKind) -> MarkerKind {
    match kind {
        TaskKind::Deploy { .. } | TaskKind::Redeploy => MarkerKind::Deploying,
        TaskKind::Undeploy | TaskKind::FailedCleanup => MarkerKind::Undeploying,
    }
}
