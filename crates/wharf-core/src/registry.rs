//! Cross-scan memory of deployments this scanner is responsible for.
//!
//! One registry per scanner instance, owned and mutated only by that
//! scanner's scan pass. The remote view is refreshed from the controller at
//! the start of every scan so external changes are always detected.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::controller::RemoteDeployment;
use crate::inspect::{ContentHash, ContentKind};

/// What the scanner remembers about a deployment it successfully deployed.
#[derive(Debug, Clone)]
pub struct DeployedEntry {
    /// Directory holding the content and its markers.
    pub dir: PathBuf,
    pub kind: ContentKind,
    /// Mtime of the `.deployed` marker when it was written. A marker whose
    /// mtime no longer matches has been touched and forces a redeploy.
    pub marker_mtime: SystemTime,
    /// Content identity at deploy time, used only for diffing.
    pub identity: Option<ContentHash>,
}

#[derive(Debug, Default)]
pub struct Registry {
    deployed: HashMap<String, DeployedEntry>,
    remote: HashMap<String, RemoteDeployment>,
}

impl Registry {
    /// Replace the remote view with the controller's current list.
    pub fn refresh_remote(&mut self, remote: HashMap<String, RemoteDeployment>) {
        self.remote = remote;
    }

    /// Whether the controller knows this name at all.
    pub fn remote_knows(&self, name: &str) -> bool {
        self.remote.contains_key(name)
    }

    /// A deployment managed by some other tool or scanner. Never touched.
    pub fn is_foreign(&self, name: &str, scanner_id: &str) -> bool {
        self.remote
            .get(name)
            .is_some_and(|r| r.owner.as_deref() != Some(scanner_id))
    }

    /// An enabled deployment the controller attributes to this scanner.
    pub fn remote_owned_enabled(&self, name: &str, scanner_id: &str) -> bool {
        self.remote
            .get(name)
            .is_some_and(|r| r.enabled && r.owner.as_deref() == Some(scanner_id))
    }

    /// Names eligible for a forced undeploy: owned by this scanner, enabled
    /// and not persistent.
    pub fn forced_undeploy_names(&self, scanner_id: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .remote
            .iter()
            .filter(|(_, r)| {
                r.enabled && !r.persistent && r.owner.as_deref() == Some(scanner_id)
            })
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn deployed_entry(&self, name: &str) -> Option<&DeployedEntry> {
        self.deployed.get(name)
    }

    pub fn deployed_names(&self) -> Vec<String> {
        self.deployed.keys().cloned().collect()
    }

    pub fn record_deployed(&mut self, name: String, entry: DeployedEntry) {
        self.deployed.insert(name, entry);
    }

    pub fn clear_deployed(&mut self, name: &str) -> Option<DeployedEntry> {
        self.deployed.remove(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(enabled: bool, persistent: bool, owner: Option<&str>) -> RemoteDeployment {
        RemoteDeployment {
            enabled,
            persistent,
            owner: owner.map(str::to_string),
        }
    }

    #[test]
    fn foreign_detection() {
        let mut registry = Registry::default();
        registry.refresh_remote(HashMap::from([
            ("ours.war".to_string(), remote(true, false, Some("scanner-a"))),
            ("cli.war".to_string(), remote(true, true, None)),
            ("other.war".to_string(), remote(true, false, Some("scanner-b"))),
        ]));

        assert!(!registry.is_foreign("ours.war", "scanner-a"));
        assert!(registry.is_foreign("cli.war", "scanner-a"));
        assert!(registry.is_foreign("other.war", "scanner-a"));
        assert!(!registry.is_foreign("unknown.war", "scanner-a"));
    }

    #[test]
    fn forced_undeploy_skips_persistent_and_foreign() {
        let mut registry = Registry::default();
        registry.refresh_remote(HashMap::from([
            ("ours.war".to_string(), remote(true, false, Some("scanner-a"))),
            ("persistent.ear".to_string(), remote(true, true, Some("scanner-a"))),
            ("cli.war".to_string(), remote(true, true, None)),
        ]));

        assert_eq!(
            registry.forced_undeploy_names("scanner-a"),
            vec!["ours.war".to_string()]
        );
    }
}
