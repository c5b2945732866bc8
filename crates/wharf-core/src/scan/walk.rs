//! Single-pass directory classification.
//!
//! One walk produces the complete on-disk inventory for a scan pass:
//! deployable candidates with their marker sets, and markers that have no
//! content behind them. Stale transient markers are swept as a side effect.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::config::ScannerConfig;
use crate::inspect::{Completeness, ContentInspector, ContentKind};
use crate::marker::MarkerKind;

const ARCHIVE_EXTENSIONS: [&str; 7] = ["war", "jar", "sar", "ear", "rar", "wab", "esa"];

/// Case-insensitive archive-extension match (`x.war`, `x.WAR`, ...).
pub fn is_archive_name(name: &str) -> bool {
    let Some((stem, ext)) = name.rsplit_once('.') else {
        return false;
    };
    !stem.is_empty()
        && ARCHIVE_EXTENSIONS
            .iter()
            .any(|candidate| ext.eq_ignore_ascii_case(candidate))
}

fn is_xml_name(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && ext.eq_ignore_ascii_case("xml"))
}

/// Markers present for one content name, keyed back to it during the walk.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerSet {
    pub do_deploy: Option<SystemTime>,
    pub skip_deploy: bool,
    pub deployed: Option<SystemTime>,
    pub failed: Option<SystemTime>,
    pub undeployed: Option<SystemTime>,
}

impl MarkerSet {
    fn record(&mut self, kind: MarkerKind, mtime: SystemTime) {
        match kind {
            MarkerKind::DoDeploy => self.do_deploy = Some(mtime),
            MarkerKind::SkipDeploy => self.skip_deploy = true,
            MarkerKind::Deployed => self.deployed = Some(mtime),
            MarkerKind::FailedDeploy => self.failed = Some(mtime),
            MarkerKind::Undeployed => self.undeployed = Some(mtime),
            // transient markers are swept, never recorded
            MarkerKind::Pending | MarkerKind::Deploying | MarkerKind::Undeploying => {}
        }
    }

    fn is_empty(&self) -> bool {
        self.do_deploy.is_none()
            && !self.skip_deploy
            && self.deployed.is_none()
            && self.failed.is_none()
            && self.undeployed.is_none()
    }
}

/// A deployable candidate found on disk. Rebuilt fresh every pass.
#[derive(Debug, Clone)]
pub struct ScannedEntry {
    pub name: String,
    pub dir: PathBuf,
    pub path: PathBuf,
    pub kind: ContentKind,
    pub mtime: SystemTime,
    pub len: u64,
    pub completeness: Completeness,
    pub markers: MarkerSet,
}

/// A marker with no content file behind it.
#[derive(Debug, Clone)]
pub struct OrphanMarker {
    pub name: String,
    pub dir: PathBuf,
    pub kind: MarkerKind,
}

#[derive(Debug, Default)]
pub struct Inventory {
    pub entries: Vec<ScannedEntry>,
    pub orphans: Vec<OrphanMarker>,
}

/// Walk the deployment root. A missing root is an empty inventory; any
/// other I/O failure aborts the pass without side effects beyond transient
/// marker sweeping already performed.
pub fn walk(
    root: &Path,
    config: &ScannerConfig,
    inspector: &dyn ContentInspector,
) -> io::Result<Inventory> {
    let mut inventory = Inventory::default();
    match walk_dir(root, config, inspector, &mut inventory) {
        Ok(()) => Ok(inventory),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(root = %root.display(), "deployment directory absent, nothing to scan");
            Ok(Inventory::default())
        }
        Err(err) => Err(err),
    }
}

fn walk_dir(
    dir: &Path,
    config: &ScannerConfig,
    inspector: &dyn ContentInspector,
    inventory: &mut Inventory,
) -> io::Result<()> {
    let mut children = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    children.sort_by_key(|entry| entry.file_name());

    let mut markers: BTreeMap<String, MarkerSet> = BTreeMap::new();
    let mut contents: Vec<(String, PathBuf, bool, SystemTime, u64)> = Vec::new();

    for child in children {
        let Some(name) = child.file_name().to_str().map(str::to_owned) else {
            warn!(path = %child.path().display(), "skipping non-UTF-8 file name");
            continue;
        };
        let md = match child.metadata() {
            Ok(md) => md,
            Err(err) => {
                warn!(path = %child.path().display(), %err, "skipping unreadable entry");
                continue;
            }
        };
        let mtime = md.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        if md.is_file() {
            if let Some((base, kind)) = MarkerKind::split(&name) {
                if kind.is_transient() {
                    // Stale from a previous pass or an unclean shutdown.
                    let _ = fs::remove_file(child.path());
                } else {
                    markers.entry(base.to_string()).or_default().record(kind, mtime);
                }
                continue;
            }
        }
        contents.push((name, child.path(), md.is_dir(), mtime, md.len()));
    }

    for (name, path, is_dir, mtime, len) in contents {
        let marker_set = markers.remove(&name).unwrap_or_default();

        if is_dir {
            if is_archive_name(&name) || marker_set.do_deploy.is_some() {
                let completeness = if config.auto_deploy_exploded {
                    inspect_completeness(inspector, &path, ContentKind::Exploded)
                } else {
                    Completeness::Complete
                };
                inventory.entries.push(ScannedEntry {
                    name,
                    dir: dir.to_path_buf(),
                    path,
                    kind: ContentKind::Exploded,
                    mtime,
                    len: 0,
                    completeness,
                    markers: marker_set,
                });
            } else {
                // A plain directory is scanned recursively; markers hanging
                // off its name have no content to describe.
                push_orphans(inventory, dir, &name, &marker_set);
                walk_dir(&path, config, inspector, inventory)?;
            }
            continue;
        }

        let kind = if is_archive_name(&name) {
            ContentKind::Archive
        } else if is_xml_name(&name) {
            ContentKind::Xml
        } else {
            ContentKind::Other
        };
        if kind == ContentKind::Other && marker_set.is_empty() {
            continue;
        }
        let completeness = match kind {
            ContentKind::Archive if config.auto_deploy_zipped => {
                inspect_completeness(inspector, &path, kind)
            }
            ContentKind::Xml if config.auto_deploy_xml => {
                inspect_completeness(inspector, &path, kind)
            }
            _ => Completeness::Complete,
        };
        inventory.entries.push(ScannedEntry {
            name,
            dir: dir.to_path_buf(),
            path,
            kind,
            mtime,
            len,
            completeness,
            markers: marker_set,
        });
    }

    for (name, marker_set) in markers {
        push_orphans(inventory, dir, &name, &marker_set);
    }
    Ok(())
}

fn inspect_completeness(
    inspector: &dyn ContentInspector,
    path: &Path,
    kind: ContentKind,
) -> Completeness {
    match inspector.completeness(path, kind) {
        Ok(completeness) => completeness,
        Err(err) => {
            warn!(path = %path.display(), %err, "content inspection failed");
            Completeness::Incomplete
        }
    }
}

fn push_orphans(inventory: &mut Inventory, dir: &Path, name: &str, markers: &MarkerSet) {
    let mut push = |kind: MarkerKind| {
        inventory.orphans.push(OrphanMarker {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            kind,
        });
    };
    if markers.do_deploy.is_some() {
        push(MarkerKind::DoDeploy);
    }
    if markers.deployed.is_some() {
        push(MarkerKind::Deployed);
    }
    if markers.failed.is_some() {
        push(MarkerKind::FailedDeploy);
    }
    if markers.undeployed.is_some() {
        push(MarkerKind::Undeployed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::ArchiveInspector;
    use crate::marker;

    fn config() -> ScannerConfig {
        ScannerConfig {
            auto_deploy_zipped: false,
            auto_deploy_exploded: false,
            auto_deploy_xml: false,
            ..ScannerConfig::default()
        }
    }

    #[test]
    fn archive_pattern_is_case_insensitive() {
        for name in [
            "x.war", "x.War", "x.WAr", "x.WAR", "x.jar", "x.Jar", "x.sar", "x.Sar", "x.ear",
            "x.Ear", "x.rar", "x.Rar", "x.wab", "x.WaB", "x.esa", "x.ESA",
        ] {
            assert!(is_archive_name(name), "{name} should match");
        }
        for name in ["x.txt", "x.warx", "war", ".war", "x"] {
            assert!(!is_archive_name(name), "{name} should not match");
        }
    }

    #[test]
    fn classifies_files_markers_and_orphans() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("foo.war"), b"content").unwrap();
        marker::write_marker(tmp.path(), "foo.war", MarkerKind::DoDeploy).unwrap();
        marker::write_marker(tmp.path(), "gone.war", MarkerKind::Deployed).unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"ignored").unwrap();

        let inventory = walk(tmp.path(), &config(), &ArchiveInspector).unwrap();
        assert_eq!(inventory.entries.len(), 1);
        let entry = &inventory.entries[0];
        assert_eq!(entry.name, "foo.war");
        assert_eq!(entry.kind, ContentKind::Archive);
        assert!(entry.markers.do_deploy.is_some());

        assert_eq!(inventory.orphans.len(), 1);
        assert_eq!(inventory.orphans[0].name, "gone.war");
        assert_eq!(inventory.orphans[0].kind, MarkerKind::Deployed);
    }

    #[test]
    fn recurses_into_plain_directories_but_not_deployments() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(nested.join("bar.war"), b"content").unwrap();
        marker::write_marker(&nested, "bar.war", MarkerKind::DoDeploy).unwrap();

        let exploded = tmp.path().join("foo.ear");
        std::fs::create_dir(&exploded).unwrap();
        std::fs::write(exploded.join("inner.war"), b"not scanned separately").unwrap();

        let inventory = walk(tmp.path(), &config(), &ArchiveInspector).unwrap();
        let names: Vec<&str> = inventory.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["foo.ear", "bar.war"]);
        assert_eq!(inventory.entries[0].kind, ContentKind::Exploded);
    }

    #[test]
    fn sweeps_transient_markers() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("foo.war"), b"content").unwrap();
        let pending = marker::write_marker(tmp.path(), "foo.war", MarkerKind::Pending).unwrap();
        let deploying =
            marker::write_marker(tmp.path(), "foo.war", MarkerKind::Deploying).unwrap();
        let undeploying =
            marker::write_marker(tmp.path(), "stale", MarkerKind::Undeploying).unwrap();

        walk(tmp.path(), &config(), &ArchiveInspector).unwrap();
        assert!(!pending.exists());
        assert!(!deploying.exists());
        assert!(!undeploying.exists());
    }

    #[test]
    fn missing_root_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let gone = tmp.path().join("missing");
        let inventory = walk(&gone, &config(), &ArchiveInspector).unwrap();
        assert!(inventory.entries.is_empty());
        assert!(inventory.orphans.is_empty());
    }
}
