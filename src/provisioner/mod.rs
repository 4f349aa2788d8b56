//! Session provisioning and teardown orchestration.
//!
//! `provision()` builds the session in strict order: isolation boundary
//! first (the instance references it at launch), then the instance, then a
//! bounded wait for readiness. Any failure unwinds whatever was created so
//! far as a compensating transaction and re-raises the triggering error.
//!
//! `teardown()` is the mirror image and is idempotent: it rediscovers the
//! session's resources purely from the `session_id` tag and the derived
//! group name, terminates instances before deleting the group (the provider
//! refuses the reverse order), and treats "already gone" as success.
//!
//! ```text
//! provision                          teardown
//! ─────────                          ────────
//! render boot script                 find tagged instances
//! resolve VPC        ┐               terminate + wait       ┐
//! create group       │ rollback      delete group by name   │ "not found"
//! authorize ingress  │ on any        └── idempotent no-op ──┘  is success
//! launch instance    │ failure
//! wait running       │
//! read private ip    ┘
//! ```

use std::sync::Arc;

use crate::cloudinit::BootScript;
use crate::compute::{ComputeProvider, IngressRule, InstanceState, LaunchSpec, ACTIVE_STATES};
use crate::config::{Config, SessionVmConfig};
use crate::error::{ComputeError, ProvisionError};
use crate::naming;

/// A successfully provisioned session.
#[derive(Debug, Clone)]
pub struct ProvisionedSession {
    pub session_id: String,
    /// The instance's private address; the gateway is the only way in.
    pub private_ip: String,
}

/// Which resources exist so far during one provisioning attempt.
/// Drives the rollback: one compensating action per state.
enum RollbackScope {
    Nothing,
    BoundaryOnly { group_id: String },
    BoundaryAndInstance,
}

/// Orchestrates session provisioning and teardown against a compute
/// provider. One instance serves the whole process; every call is an
/// independent sequential flow, so concurrent sessions never serialize
/// behind one another's waits.
pub struct Provisioner {
    compute: Arc<dyn ComputeProvider>,
    vm: SessionVmConfig,
    gateway_cidr: String,
    boot: BootScript,
}

impl Provisioner {
    pub fn new(compute: Arc<dyn ComputeProvider>, config: &Config) -> Self {
        Self {
            compute,
            vm: config.session_vm.clone(),
            gateway_cidr: config.gateway.gateway_cidr(),
            boot: BootScript::new(&config.session_vm, &config.gateway),
        }
    }

    /// Provision a fresh sandbox session.
    ///
    /// On success exactly one security group and one running instance carry
    /// the returned session id. On failure a best-effort rollback removes
    /// partially-created resources; if that rollback itself fails, the error
    /// is [`ProvisionError::Cleanup`] so the caller knows manual remediation
    /// is needed. The root cause is never masked.
    pub async fn provision(&self) -> Result<ProvisionedSession, ProvisionError> {
        let session_id = naming::new_session_id();
        tracing::info!(session_id = %session_id, "Launching sandbox session");

        // Rendered before any remote call: a bad template costs nothing.
        let user_data =
            self.boot
                .render_transport(&session_id)
                .map_err(|e| ProvisionError::Template {
                    session_id: session_id.clone(),
                    reason: e.to_string(),
                })?;

        let mut scope = RollbackScope::Nothing;
        match self
            .provision_inner(&session_id, &user_data, &mut scope)
            .await
        {
            Ok(session) => {
                tracing::info!(
                    session_id = %session.session_id,
                    private_ip = %session.private_ip,
                    "Sandbox session is live"
                );
                Ok(session)
            }
            Err(err) => {
                tracing::error!(
                    session_id = %session_id,
                    error = %err,
                    "Provisioning failed, rolling back"
                );
                Err(self.rollback(&session_id, scope, err).await)
            }
        }
    }

    async fn provision_inner(
        &self,
        session_id: &str,
        user_data_b64: &str,
        scope: &mut RollbackScope,
    ) -> Result<ProvisionedSession, ProvisionError> {
        let isolation_err = |reason: String| ProvisionError::IsolationSetup {
            session_id: session_id.to_string(),
            reason,
        };

        let vpc_id = self
            .compute
            .vpc_for_subnet(&self.vm.subnet_id)
            .await
            .map_err(|e| isolation_err(e.to_string()))?;

        let group_name = naming::session_group_name(&self.vm.project_prefix, session_id);
        let group_id = self
            .compute
            .create_security_group(&group_name, &vpc_id, session_id)
            .await
            .map_err(|e| isolation_err(e.to_string()))?;
        *scope = RollbackScope::BoundaryOnly {
            group_id: group_id.clone(),
        };

        if let Err(e) = self.authorize_session_ingress(&group_id, session_id).await {
            // The group is seconds old and unreferenced; delete it inline.
            // A deletion failure here is logged, not escalated.
            if let Err(del) = self.compute.delete_security_group(&group_id).await {
                tracing::warn!(
                    session_id = %session_id,
                    group_id = %group_id,
                    error = %del,
                    "Could not delete security group after failed ingress setup"
                );
            }
            *scope = RollbackScope::Nothing;
            return Err(isolation_err(e.to_string()));
        }

        let mut group_ids = vec![group_id];
        if let Some(ref base) = self.vm.base_group_id {
            group_ids.push(base.clone());
        }

        let spec = LaunchSpec {
            image_id: self.vm.image_id.clone(),
            instance_type: self.vm.instance_type.clone(),
            key_name: self.vm.key_name.clone(),
            subnet_id: self.vm.subnet_id.clone(),
            group_ids,
            name: naming::instance_name(&self.vm.project_prefix, session_id),
            session_id: session_id.to_string(),
            user_data_b64: user_data_b64.to_string(),
        };
        let instance_id =
            self.compute
                .run_instance(spec)
                .await
                .map_err(|e| ProvisionError::Launch {
                    session_id: session_id.to_string(),
                    reason: e.to_string(),
                })?;
        *scope = RollbackScope::BoundaryAndInstance;
        tracing::info!(
            session_id = %session_id,
            instance_id = %instance_id,
            "Instance requested, waiting for running state"
        );

        let ids = vec![instance_id.clone()];
        self.compute
            .wait_for_state(&ids, InstanceState::Running)
            .await
            .map_err(|e| match e {
                ComputeError::WaitTimeout { target, .. } => ProvisionError::ReadinessTimeout {
                    session_id: session_id.to_string(),
                    instance_ids: ids.clone(),
                    target,
                },
                other => ProvisionError::Launch {
                    session_id: session_id.to_string(),
                    reason: other.to_string(),
                },
            })?;

        // Re-describe for the address. A running instance without one is a
        // fatal inconsistency, not something to retry silently.
        let described = self
            .compute
            .describe_instance(&instance_id)
            .await
            .map_err(|e| ProvisionError::InconsistentState {
                session_id: session_id.to_string(),
                instance_id: instance_id.clone(),
                reason: e.to_string(),
            })?;
        let private_ip =
            described
                .private_ip
                .ok_or_else(|| ProvisionError::InconsistentState {
                    session_id: session_id.to_string(),
                    instance_id: instance_id.clone(),
                    reason: "instance is running but reported no private address".to_string(),
                })?;

        Ok(ProvisionedSession {
            session_id: session_id.to_string(),
            private_ip,
        })
    }

    /// Authorize the session's ingress rules: the gateway tunnel, plus an
    /// optional debug SSH rule when configured.
    async fn authorize_session_ingress(
        &self,
        group_id: &str,
        session_id: &str,
    ) -> Result<(), ComputeError> {
        self.compute
            .authorize_ingress(
                group_id,
                IngressRule {
                    protocol: "tcp",
                    port: self.vm.tunnel_port,
                    cidr: self.gateway_cidr.clone(),
                    description: "Gateway websocket tunnel".to_string(),
                },
            )
            .await?;

        if let Some(ref cidr) = self.vm.debug_ssh_cidr {
            tracing::warn!(
                session_id = %session_id,
                cidr = %cidr,
                "Debug config: allowing temporary SSH ingress"
            );
            self.compute
                .authorize_ingress(
                    group_id,
                    IngressRule {
                        protocol: "tcp",
                        port: 22,
                        cidr: cidr.clone(),
                        description: "Temporary debug SSH access".to_string(),
                    },
                )
                .await?;
        }

        Ok(())
    }

    /// Run the compensating action for the given scope, then return the
    /// error the caller should see.
    async fn rollback(
        &self,
        session_id: &str,
        scope: RollbackScope,
        err: ProvisionError,
    ) -> ProvisionError {
        match scope {
            RollbackScope::Nothing => err,
            RollbackScope::BoundaryOnly { group_id } => {
                match self.compute.delete_security_group(&group_id).await {
                    Ok(()) => tracing::info!(
                        session_id = %session_id,
                        group_id = %group_id,
                        "Deleted security group after failed launch"
                    ),
                    Err(del) => tracing::warn!(
                        session_id = %session_id,
                        group_id = %group_id,
                        error = %del,
                        "Could not delete security group during rollback"
                    ),
                }
                err
            }
            RollbackScope::BoundaryAndInstance => match self.teardown(session_id).await {
                Ok(()) => err,
                Err(cleanup) => {
                    tracing::error!(
                        session_id = %session_id,
                        error = %cleanup,
                        "Rollback teardown failed, manual remediation needed"
                    );
                    ProvisionError::Cleanup {
                        source: Box::new(err),
                        cleanup: cleanup.to_string(),
                    }
                }
            },
        }
    }

    /// Tear down all resources tagged with this session id.
    ///
    /// Safe to call repeatedly, including for ids that never provisioned or
    /// are already gone: both are successful no-ops.
    pub async fn teardown(&self, session_id: &str) -> Result<(), ProvisionError> {
        tracing::info!(session_id = %session_id, "Tearing down sandbox session");

        let termination_err = |reason: String| ProvisionError::Termination {
            session_id: session_id.to_string(),
            reason,
        };

        let instances = self
            .compute
            .find_session_instances(session_id, ACTIVE_STATES)
            .await
            .map_err(|e| termination_err(e.to_string()))?;

        if !instances.is_empty() {
            let ids: Vec<String> = instances.iter().map(|i| i.instance_id.clone()).collect();
            tracing::info!(
                session_id = %session_id,
                instance_ids = ?ids,
                "Terminating session instances"
            );
            self.compute
                .terminate_instances(&ids)
                .await
                .map_err(|e| termination_err(e.to_string()))?;
            self.compute
                .wait_for_state(&ids, InstanceState::Terminated)
                .await
                .map_err(|e| termination_err(e.to_string()))?;
        }

        // Termination must complete first: the provider refuses to delete a
        // group still attached to an instance.
        let group_name = naming::session_group_name(&self.vm.project_prefix, session_id);
        match self
            .compute
            .delete_security_group_by_name(&group_name)
            .await
        {
            Ok(()) => tracing::info!(
                session_id = %session_id,
                group_name = %group_name,
                "Deleted session security group"
            ),
            Err(e) if e.is_not_found() => {
                tracing::debug!(
                    session_id = %session_id,
                    group_name = %group_name,
                    "No session security group to delete"
                );
            }
            Err(e) => return Err(termination_err(e.to_string())),
        }

        tracing::info!(session_id = %session_id, "Session cleanup complete");
        Ok(())
    }
}
