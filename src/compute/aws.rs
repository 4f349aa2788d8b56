//! AWS EC2 implementation of the compute provider contract.
//!
//! Session boundaries are EC2 security groups, session VMs are EC2 instances.
//! The EC2 API has no blocking "wait until state" call, so waits are bounded
//! polling loops with capped backoff; the overall deadlines come from
//! configuration and expiry is reported as `ComputeError::WaitTimeout`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ec2::types::{
    Filter, Instance, InstanceNetworkInterfaceSpecification, InstanceStateName, InstanceType,
    IpPermission, IpRange, ResourceType, Tag, TagSpecification,
};
use aws_sdk_ec2::Client;
use chrono::Utc;
use tokio::time::sleep;

use crate::config::Config;
use crate::error::ComputeError;
use crate::naming;

use super::{ComputeProvider, IngressRule, InstanceState, InstanceSummary, LaunchSpec};

/// EC2-backed compute provider.
pub struct AwsCompute {
    client: Client,
    project_prefix: String,
    running_wait: Duration,
    terminated_wait: Duration,
}

impl AwsCompute {
    /// Build the EC2 client for the configured region using the default
    /// credential chain.
    pub async fn new(config: &Config) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.provider.region.clone()))
            .load()
            .await;

        Self {
            client: Client::new(&sdk_config),
            project_prefix: config.session_vm.project_prefix.clone(),
            running_wait: config.provider.running_wait,
            terminated_wait: config.provider.terminated_wait,
        }
    }

    fn session_tags(&self, session_id: &str) -> Vec<Tag> {
        vec![
            Tag::builder()
                .key(naming::SESSION_TAG)
                .value(session_id)
                .build(),
            Tag::builder()
                .key(naming::CREATED_BY_TAG)
                .value(naming::CREATED_BY)
                .build(),
            Tag::builder()
                .key(naming::PROJECT_TAG)
                .value(self.project_prefix.as_str())
                .build(),
            Tag::builder()
                .key(naming::LAUNCHED_AT_TAG)
                .value(Utc::now().to_rfc3339())
                .build(),
        ]
    }

    fn tag_spec(resource_type: ResourceType, tags: Vec<Tag>) -> TagSpecification {
        TagSpecification::builder()
            .resource_type(resource_type)
            .set_tags(Some(tags))
            .build()
    }
}

/// Wrap an SDK failure with the operation it came from. `DisplayErrorContext`
/// pulls the service-side message out of the error chain.
fn api_error<E>(context: &'static str, err: SdkError<E>) -> ComputeError
where
    E: std::error::Error + Send + Sync + 'static,
{
    ComputeError::Api {
        context,
        message: format!("{}", DisplayErrorContext(err)),
    }
}

fn error_code<E>(err: &SdkError<E>) -> Option<String>
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    err.as_service_error()
        .and_then(|e| e.meta().code())
        .map(str::to_string)
}

fn group_absent<E>(err: &SdkError<E>) -> bool
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    matches!(
        error_code(err).as_deref(),
        Some("InvalidGroup.NotFound") | Some("InvalidGroupId.NotFound")
    )
}

fn from_aws_state(name: &InstanceStateName) -> Option<InstanceState> {
    match name {
        InstanceStateName::Pending => Some(InstanceState::Pending),
        InstanceStateName::Running => Some(InstanceState::Running),
        InstanceStateName::ShuttingDown => Some(InstanceState::ShuttingDown),
        InstanceStateName::Stopping => Some(InstanceState::Stopping),
        InstanceStateName::Stopped => Some(InstanceState::Stopped),
        InstanceStateName::Terminated => Some(InstanceState::Terminated),
        _ => None,
    }
}

fn summarize(instance: &Instance) -> Option<InstanceSummary> {
    let instance_id = instance.instance_id()?.to_string();
    let state = instance
        .state()
        .and_then(|s| s.name())
        .and_then(from_aws_state)?;

    Some(InstanceSummary {
        instance_id,
        state,
        private_ip: instance.private_ip_address().map(str::to_string),
    })
}

#[async_trait]
impl ComputeProvider for AwsCompute {
    async fn vpc_for_subnet(&self, subnet_id: &str) -> Result<String, ComputeError> {
        let out = self
            .client
            .describe_subnets()
            .subnet_ids(subnet_id)
            .send()
            .await
            .map_err(|e| {
                if matches!(error_code(&e).as_deref(), Some("InvalidSubnetID.NotFound")) {
                    ComputeError::NotFound {
                        resource: format!("subnet {}", subnet_id),
                    }
                } else {
                    api_error("describe subnets", e)
                }
            })?;

        out.subnets()
            .first()
            .and_then(|s| s.vpc_id())
            .map(str::to_string)
            .ok_or_else(|| ComputeError::NotFound {
                resource: format!("subnet {}", subnet_id),
            })
    }

    async fn create_security_group(
        &self,
        name: &str,
        vpc_id: &str,
        session_id: &str,
    ) -> Result<String, ComputeError> {
        let out = self
            .client
            .create_security_group()
            .group_name(name)
            .description(format!("User session sandbox boundary for {}", session_id))
            .vpc_id(vpc_id)
            .tag_specifications(Self::tag_spec(
                ResourceType::SecurityGroup,
                self.session_tags(session_id),
            ))
            .send()
            .await
            .map_err(|e| api_error("create security group", e))?;

        out.group_id()
            .map(str::to_string)
            .ok_or_else(|| ComputeError::Api {
                context: "create security group",
                message: "provider returned no group id".to_string(),
            })
    }

    async fn authorize_ingress(
        &self,
        group_id: &str,
        rule: IngressRule,
    ) -> Result<(), ComputeError> {
        let permission = IpPermission::builder()
            .ip_protocol(rule.protocol)
            .from_port(i32::from(rule.port))
            .to_port(i32::from(rule.port))
            .ip_ranges(
                IpRange::builder()
                    .cidr_ip(rule.cidr)
                    .description(rule.description)
                    .build(),
            )
            .build();

        self.client
            .authorize_security_group_ingress()
            .group_id(group_id)
            .ip_permissions(permission)
            .send()
            .await
            .map_err(|e| api_error("authorize security group ingress", e))?;

        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<(), ComputeError> {
        match self
            .client
            .delete_security_group()
            .group_id(group_id)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if group_absent(&e) => Err(ComputeError::NotFound {
                resource: format!("security group {}", group_id),
            }),
            Err(e) => Err(api_error("delete security group", e)),
        }
    }

    async fn delete_security_group_by_name(&self, name: &str) -> Result<(), ComputeError> {
        let out = self
            .client
            .describe_security_groups()
            .filters(Filter::builder().name("group-name").values(name).build())
            .send()
            .await
            .map_err(|e| api_error("describe security groups", e))?;

        let group_id = match out.security_groups().first().and_then(|g| g.group_id()) {
            Some(id) => id.to_string(),
            None => {
                return Err(ComputeError::NotFound {
                    resource: format!("security group {}", name),
                })
            }
        };

        self.delete_security_group(&group_id).await
    }

    async fn run_instance(&self, spec: LaunchSpec) -> Result<String, ComputeError> {
        let mut instance_tags = self.session_tags(&spec.session_id);
        instance_tags.push(Tag::builder().key("Name").value(spec.name.as_str()).build());
        let volume_tags = self.session_tags(&spec.session_id);

        // No public address: the gateway is the only way in.
        let interface = InstanceNetworkInterfaceSpecification::builder()
            .device_index(0)
            .subnet_id(spec.subnet_id)
            .set_groups(Some(spec.group_ids))
            .associate_public_ip_address(false)
            .build();

        let out = self
            .client
            .run_instances()
            .image_id(spec.image_id)
            .instance_type(InstanceType::from(spec.instance_type.as_str()))
            .key_name(spec.key_name)
            .min_count(1)
            .max_count(1)
            .network_interfaces(interface)
            .tag_specifications(Self::tag_spec(ResourceType::Instance, instance_tags))
            .tag_specifications(Self::tag_spec(ResourceType::Volume, volume_tags))
            .user_data(spec.user_data_b64)
            .send()
            .await
            .map_err(|e| api_error("run instances", e))?;

        out.instances()
            .first()
            .and_then(|i| i.instance_id())
            .map(str::to_string)
            .ok_or_else(|| ComputeError::Api {
                context: "run instances",
                message: "provider returned no instance".to_string(),
            })
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<InstanceSummary, ComputeError> {
        let out = self
            .client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| api_error("describe instances", e))?;

        let reservations = out.reservations();
        let instance = reservations
            .first()
            .and_then(|r| r.instances().first())
            .ok_or_else(|| ComputeError::NotFound {
                resource: format!("instance {}", instance_id),
            })?;

        summarize(instance).ok_or_else(|| ComputeError::Api {
            context: "describe instances",
            message: format!("instance {} reported an unrecognized state", instance_id),
        })
    }

    async fn find_session_instances(
        &self,
        session_id: &str,
        states: &[InstanceState],
    ) -> Result<Vec<InstanceSummary>, ComputeError> {
        let mut state_filter = Filter::builder().name("instance-state-name");
        for state in states {
            state_filter = state_filter.values(state.as_str());
        }

        let out = self
            .client
            .describe_instances()
            .filters(
                Filter::builder()
                    .name(format!("tag:{}", naming::SESSION_TAG))
                    .values(session_id)
                    .build(),
            )
            .filters(state_filter.build())
            .send()
            .await
            .map_err(|e| api_error("describe instances", e))?;

        let mut found = Vec::new();
        for reservation in out.reservations() {
            for instance in reservation.instances() {
                if let Some(summary) = summarize(instance) {
                    found.push(summary);
                }
            }
        }
        Ok(found)
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<(), ComputeError> {
        self.client
            .terminate_instances()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .send()
            .await
            .map_err(|e| api_error("terminate instances", e))?;

        Ok(())
    }

    async fn wait_for_state(
        &self,
        instance_ids: &[String],
        target: InstanceState,
    ) -> Result<(), ComputeError> {
        let deadline = match target {
            InstanceState::Terminated => self.terminated_wait,
            _ => self.running_wait,
        };
        let start = Instant::now();
        let mut delay = Duration::from_secs(3);

        loop {
            let out = match self
                .client
                .describe_instances()
                .set_instance_ids(Some(instance_ids.to_vec()))
                .send()
                .await
            {
                Ok(out) => out,
                // An id the provider has already forgotten is as terminated
                // as it gets.
                Err(e)
                    if target == InstanceState::Terminated
                        && matches!(
                            error_code(&e).as_deref(),
                            Some("InvalidInstanceID.NotFound")
                        ) =>
                {
                    return Ok(());
                }
                Err(e) => return Err(api_error("describe instances", e)),
            };

            let mut observed = Vec::new();
            for reservation in out.reservations() {
                for instance in reservation.instances() {
                    if let Some(summary) = summarize(instance) {
                        observed.push(summary);
                    }
                }
            }

            let done = instance_ids.iter().all(|id| {
                match observed.iter().find(|s| &s.instance_id == id) {
                    Some(s) => s.state == target,
                    // Missing from the response: gone entirely.
                    None => target == InstanceState::Terminated,
                }
            });
            if done {
                return Ok(());
            }

            // An instance dying while we wait for running is a hard failure,
            // not a timeout.
            if target == InstanceState::Running {
                if let Some(dead) = observed.iter().find(|s| {
                    matches!(
                        s.state,
                        InstanceState::ShuttingDown | InstanceState::Terminated
                    )
                }) {
                    return Err(ComputeError::Api {
                        context: "wait for instance state",
                        message: format!(
                            "instance {} entered '{}' while waiting for '{}'",
                            dead.instance_id, dead.state, target
                        ),
                    });
                }
            }

            if start.elapsed() >= deadline {
                return Err(ComputeError::WaitTimeout {
                    target: target.to_string(),
                    waited_secs: deadline.as_secs(),
                });
            }

            sleep(delay).await;
            delay = (delay * 2).min(Duration::from_secs(15));
        }
    }
}
