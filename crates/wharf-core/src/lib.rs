//! Wharf Core Library
//!
//! Marker-driven filesystem deployment scanning: watches a directory,
//! reconciles its contents against a management controller and records
//! progress as marker files next to the content.

pub mod config;
pub mod controller;
pub mod inspect;
pub mod marker;
pub mod registry;
pub mod scan;
pub mod schedule;

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::ScannerConfig;

    // Controller contract
    pub use crate::controller::{
        ActionGroup, Batch, BatchOutcome, DeploymentOperations, Op, RemoteDeployment, StepOutcome,
    };

    // Content inspection
    pub use crate::inspect::{
        ArchiveInspector, Completeness, ContentHash, ContentInspector, ContentKind,
    };

    // Markers
    pub use crate::marker::MarkerKind;

    // Scanning
    pub use crate::scan::{DeploymentScanner, ScanError, ScanSummary};

    // Scheduling
    pub use crate::schedule::ScannerHandle;
}
