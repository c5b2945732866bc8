//! Marker-file vocabulary for deployment lifecycle intent and status.
//!
//! A marker is a small sentinel file named `<content><suffix>` sitting next
//! to the content file or directory it describes. Terminal markers record
//! where a deployment came to rest; transient markers exist only while an
//! operation is in flight and are swept at the start of the next scan.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Context;

/// Lifecycle marker attached to a content name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    /// User request to deploy the content (`.dodeploy`).
    DoDeploy,
    /// Content is deployed; the marker mtime records when (`.deployed`).
    Deployed,
    /// Last deployment attempt failed (`.failed`).
    FailedDeploy,
    /// Content is incomplete on disk and is being waited on (`.pending`).
    Pending,
    /// Deployment submission in flight (`.isdeploying`).
    Deploying,
    /// Undeployment submission in flight (`.isundeploying`).
    Undeploying,
    /// Content was undeployed and is at rest (`.undeployed`).
    Undeployed,
    /// User request to leave the content alone (`.skipdeploy`).
    SkipDeploy,
}

impl MarkerKind {
    /// `Undeployed` must precede `Deployed`: `.undeployed` ends with
    /// `.deployed`, and [`MarkerKind::split`] takes the first match.
    pub const ALL: [MarkerKind; 8] = [
        MarkerKind::DoDeploy,
        MarkerKind::Undeployed,
        MarkerKind::Deployed,
        MarkerKind::FailedDeploy,
        MarkerKind::Pending,
        MarkerKind::Deploying,
        MarkerKind::Undeploying,
        MarkerKind::SkipDeploy,
    ];

    /// The literal file-name suffix for this marker.
    pub fn suffix(self) -> &'static str {
        match self {
            MarkerKind::DoDeploy => ".dodeploy",
            MarkerKind::Deployed => ".deployed",
            MarkerKind::FailedDeploy => ".failed",
            MarkerKind::Pending => ".pending",
            MarkerKind::Deploying => ".isdeploying",
            MarkerKind::Undeploying => ".isundeploying",
            MarkerKind::Undeployed => ".undeployed",
            MarkerKind::SkipDeploy => ".skipdeploy",
        }
    }

    /// Markers that only exist while an operation is in flight.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            MarkerKind::Pending | MarkerKind::Deploying | MarkerKind::Undeploying
        )
    }

    /// Markers recording a resting state between scans.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MarkerKind::Deployed | MarkerKind::FailedDeploy | MarkerKind::Undeployed
        )
    }

    /// Split a file name into `(content name, marker kind)` if it is a marker.
    pub fn split(file_name: &str) -> Option<(&str, MarkerKind)> {
        for kind in MarkerKind::ALL {
            let suffix = kind.suffix();
            if let Some(base) = file_name.strip_suffix(suffix) {
                if !base.is_empty() {
                    return Some((base, kind));
                }
            }
        }
        None
    }
}

/// Path of the marker file for `name` inside `dir`.
pub fn marker_path(dir: &Path, name: &str, kind: MarkerKind) -> PathBuf {
    dir.join(format!("{}{}", name, kind.suffix()))
}

/// Write (or rewrite) a marker. The content of the file is the deployment
/// name, which makes manual inspection of a deployment directory easier.
pub fn write_marker(dir: &Path, name: &str, kind: MarkerKind) -> anyhow::Result<PathBuf> {
    let path = marker_path(dir, name, kind);
    fs::write(&path, name.as_bytes())
        .with_context(|| format!("Failed to write marker {}", path.display()))?;
    Ok(path)
}

/// Remove a marker if present. Returns whether a file was deleted.
pub fn remove_marker(dir: &Path, name: &str, kind: MarkerKind) -> bool {
    fs::remove_file(marker_path(dir, name, kind)).is_ok()
}

/// Modification time of a marker file, if it exists.
pub fn marker_mtime(dir: &Path, name: &str, kind: MarkerKind) -> Option<SystemTime> {
    fs::metadata(marker_path(dir, name, kind))
        .and_then(|md| md.modified())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffixes_are_literal() {
        assert_eq!(MarkerKind::DoDeploy.suffix(), ".dodeploy");
        assert_eq!(MarkerKind::Deployed.suffix(), ".deployed");
        assert_eq!(MarkerKind::FailedDeploy.suffix(), ".failed");
        assert_eq!(MarkerKind::Pending.suffix(), ".pending");
        assert_eq!(MarkerKind::Deploying.suffix(), ".isdeploying");
        assert_eq!(MarkerKind::Undeploying.suffix(), ".isundeploying");
        assert_eq!(MarkerKind::Undeployed.suffix(), ".undeployed");
        assert_eq!(MarkerKind::SkipDeploy.suffix(), ".skipdeploy");
    }

    #[test]
    fn split_resolves_base_name() {
        assert_eq!(
            MarkerKind::split("foo.war.dodeploy"),
            Some(("foo.war", MarkerKind::DoDeploy))
        );
        assert_eq!(
            MarkerKind::split("foo.war.undeployed"),
            Some(("foo.war", MarkerKind::Undeployed))
        );
        // `.undeployed` must not be mistaken for `.deployed`
        assert_eq!(
            MarkerKind::split("x.undeployed").unwrap().1,
            MarkerKind::Undeployed
        );
        assert_eq!(MarkerKind::split("foo.war"), None);
        assert_eq!(MarkerKind::split(".deployed"), None);
    }

    #[test]
    fn transient_and_terminal_are_disjoint() {
        for kind in MarkerKind::ALL {
            assert!(!(kind.is_transient() && kind.is_terminal()));
        }
    }

    #[test]
    fn write_and_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_marker(dir.path(), "foo.war", MarkerKind::Deployed).unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "foo.war");
        assert!(marker_mtime(dir.path(), "foo.war", MarkerKind::Deployed).is_some());
        assert!(remove_marker(dir.path(), "foo.war", MarkerKind::Deployed));
        assert!(!remove_marker(dir.path(), "foo.war", MarkerKind::Deployed));
    }
}
