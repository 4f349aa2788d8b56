//! Cloud compute provider contract.
//!
//! The orchestrator talks to the cloud exclusively through [`ComputeProvider`]
//! so the provisioning/teardown logic can be exercised against an in-memory
//! stub. The production implementation lives in [`aws`] and is backed by the
//! AWS EC2 API.
//!
//! Every method is a potential long-blocking remote call; `wait_for_state`
//! in particular may poll for minutes. Implementations own the polling
//! cadence and overall deadline, and must surface a deadline expiry as
//! [`ComputeError::WaitTimeout`], distinct from hard API failures.

pub mod aws;

use async_trait::async_trait;

use crate::error::ComputeError;

/// Instance lifecycle states, matching the provider's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Stopping,
    Stopped,
    Terminated,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// States in which an instance still holds resources and must be
/// terminated during teardown. Terminated instances are already gone.
pub const ACTIVE_STATES: &[InstanceState] = &[
    InstanceState::Pending,
    InstanceState::Running,
    InstanceState::Stopping,
    InstanceState::Stopped,
];

/// One ingress rule for a session's isolation boundary.
#[derive(Debug, Clone)]
pub struct IngressRule {
    /// IP protocol, e.g. `"tcp"`.
    pub protocol: &'static str,
    /// Single port the rule opens (from == to).
    pub port: u16,
    /// Source CIDR allowed through.
    pub cidr: String,
    /// Human-readable rule description stored on the provider side.
    pub description: String,
}

/// Everything needed to launch one session VM.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub image_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub subnet_id: String,
    /// Security groups attached to the primary interface: the per-session
    /// group plus any shared baseline group.
    pub group_ids: Vec<String>,
    /// Value for the instance's `Name` tag.
    pub name: String,
    /// Session the instance belongs to (applied as the `session_id` tag on
    /// the instance and its volumes).
    pub session_id: String,
    /// Base64-encoded cloud-init payload.
    pub user_data_b64: String,
}

/// Described state of one instance.
#[derive(Debug, Clone)]
pub struct InstanceSummary {
    pub instance_id: String,
    pub state: InstanceState,
    /// Present once the instance is past `pending`.
    pub private_ip: Option<String>,
}

/// Remote compute operations the orchestrator depends on.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Resolve the VPC that owns the given subnet.
    async fn vpc_for_subnet(&self, subnet_id: &str) -> Result<String, ComputeError>;

    /// Create a session-tagged security group; returns the group id.
    async fn create_security_group(
        &self,
        name: &str,
        vpc_id: &str,
        session_id: &str,
    ) -> Result<String, ComputeError>;

    /// Authorize one ingress rule on a security group.
    async fn authorize_ingress(
        &self,
        group_id: &str,
        rule: IngressRule,
    ) -> Result<(), ComputeError>;

    /// Delete a security group by id.
    /// Returns `ComputeError::NotFound` if the group no longer exists.
    async fn delete_security_group(&self, group_id: &str) -> Result<(), ComputeError>;

    /// Delete a security group by its derived name.
    /// Returns `ComputeError::NotFound` if no group carries that name.
    async fn delete_security_group_by_name(&self, name: &str) -> Result<(), ComputeError>;

    /// Launch exactly one instance; returns the instance id.
    async fn run_instance(&self, spec: LaunchSpec) -> Result<String, ComputeError>;

    /// Describe one instance by id.
    async fn describe_instance(&self, instance_id: &str) -> Result<InstanceSummary, ComputeError>;

    /// Find all instances tagged with the session id whose state is in
    /// `states`.
    async fn find_session_instances(
        &self,
        session_id: &str,
        states: &[InstanceState],
    ) -> Result<Vec<InstanceSummary>, ComputeError>;

    /// Request termination of the given instances in one batch call.
    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<(), ComputeError>;

    /// Block until every instance reaches `target`, or the provider-defined
    /// deadline expires (`ComputeError::WaitTimeout`).
    async fn wait_for_state(
        &self,
        instance_ids: &[String],
        target: InstanceState,
    ) -> Result<(), ComputeError>;
}
