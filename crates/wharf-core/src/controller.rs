//! Contract with the remote management controller.
//!
//! The scanner drives the controller through composite batches of primitive
//! steps and never assumes more than per-step reported outcomes.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;

/// A deployment as reported by the controller's authoritative list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDeployment {
    /// Whether the deployment is currently enabled (running).
    pub enabled: bool,
    /// Persistent deployments survive scanner removal and are never touched
    /// by a forced undeploy.
    pub persistent: bool,
    /// Identity of the scanner that owns the deployment, if any. `None`
    /// means the deployment was added by some other management tool.
    pub owner: Option<String>,
}

/// Primitive controller operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Add { name: String, content: PathBuf },
    Deploy { name: String },
    Redeploy { name: String },
    Undeploy { name: String },
    Remove { name: String },
    FullReplace { name: String, content: PathBuf },
}

impl Op {
    pub fn name(&self) -> &str {
        match self {
            Op::Add { name, .. }
            | Op::Deploy { name }
            | Op::Redeploy { name }
            | Op::Undeploy { name }
            | Op::Remove { name }
            | Op::FullReplace { name, .. } => name,
        }
    }
}

/// The steps for one content name, reported on as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionGroup {
    pub name: String,
    pub ops: Vec<Op>,
}

/// An ordered composite submitted in one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub groups: Vec<ActionGroup>,
}

/// Outcome of one action group inside a composite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Success,
    /// The group genuinely failed; the message is the controller's failure
    /// description.
    Failed(String),
    /// The group was rolled back because some other group failed.
    RolledBack,
    /// The group never ran because an earlier group failed.
    Cancelled,
}

/// Outcome of one composite submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Top-level success. A successful composite can still carry failed
    /// nested steps (partial failure).
    pub success: bool,
    /// Whether a failed composite was rolled back as a whole.
    pub rolled_back: bool,
    /// Per-group outcomes, parallel to the submitted groups.
    pub steps: Vec<StepOutcome>,
}

/// Management controller operations consumed by the scanner.
#[async_trait]
pub trait DeploymentOperations: Send + Sync {
    /// The controller's authoritative deployment list.
    async fn deployments(&self) -> anyhow::Result<HashMap<String, RemoteDeployment>>;

    /// Submit one composite batch. Steps must be idempotent enough that a
    /// resubmission after a timeout is rejected rather than doubled.
    async fn submit(&self, batch: Batch) -> anyhow::Result<BatchOutcome>;
}
