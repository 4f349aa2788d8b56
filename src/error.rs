//! Error types for configuration, the compute provider, provisioning and
//! gateway registration.
//!
//! Provisioning errors classify the failing phase so callers can tell a
//! readiness timeout (resources were rolled back) from an inconsistent
//! provider answer, and [`ProvisionError::Cleanup`] marks the one case
//! where the automatic rollback itself failed and resources may linger.

use thiserror::Error;

/// Environment configuration problems, reported at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    MissingVar(&'static str),

    #[error("environment variable {var} is invalid: {reason}")]
    InvalidVar { var: &'static str, reason: String },
}

/// Failures from the compute provider.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// The named resource does not exist (any more).
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// A state wait exhausted its deadline without reaching the target.
    #[error("timed out after {waited_secs}s waiting for state '{target}'")]
    WaitTimeout { target: String, waited_secs: u64 },

    /// Any other provider API failure, tagged with the failing call.
    #[error("{context}: {message}")]
    Api {
        context: &'static str,
        message: String,
    },
}

impl ComputeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ComputeError::NotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ComputeError::WaitTimeout { .. })
    }
}

/// Failures during session provisioning or teardown, classified by phase.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Could not establish the session's isolation boundary. No instance
    /// was launched.
    #[error("isolation setup failed for session {session_id}: {reason}")]
    IsolationSetup { session_id: String, reason: String },

    /// The instance launch request itself failed.
    #[error("instance launch failed for session {session_id}: {reason}")]
    Launch { session_id: String, reason: String },

    /// The instance never reached the '{target}' state before the deadline.
    /// The partially-created session was rolled back.
    #[error("session {session_id} instances {instance_ids:?} never reached '{target}'")]
    ReadinessTimeout {
        session_id: String,
        instance_ids: Vec<String>,
        target: String,
    },

    /// The provider reported something that should be impossible, e.g. a
    /// running instance with no private address.
    #[error("inconsistent state for session {session_id} instance {instance_id}: {reason}")]
    InconsistentState {
        session_id: String,
        instance_id: String,
        reason: String,
    },

    /// Teardown could not remove the session's resources.
    #[error("teardown failed for session {session_id}: {reason}")]
    Termination { session_id: String, reason: String },

    /// The boot script template could not be rendered.
    #[error("boot script rendering failed for session {session_id}: {reason}")]
    Template { session_id: String, reason: String },

    /// Provisioning failed AND the rollback failed too: resources may be
    /// left behind and need manual remediation. `source` is the original
    /// provisioning failure.
    #[error("provisioning failed and cleanup also failed ({cleanup}): {source}")]
    Cleanup {
        #[source]
        source: Box<ProvisionError>,
        cleanup: String,
    },
}

impl ProvisionError {
    /// True when resources may have been left behind.
    pub fn needs_remediation(&self) -> bool {
        matches!(self, ProvisionError::Cleanup { .. })
    }
}

/// Failures registering a session with the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The gateway answered with a non-success status.
    #[error("gateway rejected registration with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The gateway could not be reached at all.
    #[error("gateway at {url} unreachable: {reason}")]
    Unreachable { url: String, reason: String },
}
