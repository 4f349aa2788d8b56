//! In-memory stand-ins for the compute provider and the gateway, plus
//! shared config fixtures. Only compiled for tests.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::compute::{
    ComputeProvider, IngressRule, InstanceState, InstanceSummary, LaunchSpec,
};
use crate::config::{ApiConfig, Config, GatewayConfig, ProviderConfig, SessionVmConfig};
use crate::error::{ComputeError, GatewayError};
use crate::gateway::GatewayRegistrar;

/// A full config with fixed test values; only the boot template path varies.
pub fn test_config(cloud_init_template: PathBuf) -> Config {
    Config {
        provider: ProviderConfig {
            region: "us-east-1".to_string(),
            running_wait: Duration::from_secs(300),
            terminated_wait: Duration::from_secs(600),
        },
        session_vm: SessionVmConfig {
            project_prefix: "learn-k8s".to_string(),
            subnet_id: "subnet-1234".to_string(),
            base_group_id: Some("sg-base".to_string()),
            instance_type: "t3.small".to_string(),
            key_name: "user-key".to_string(),
            image_id: "ami-1234".to_string(),
            tunnel_port: 8889,
            debug_ssh_cidr: None,
            cloud_init_template,
        },
        gateway: GatewayConfig {
            gateway_ip: "10.0.1.4".parse().unwrap(),
            register_url: "http://10.0.1.4:8080/register-session".to_string(),
        },
        api: ApiConfig {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
        },
    }
}

/// Write a minimal boot template to a temp file and return its guard.
pub fn write_boot_template() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "#!/bin/bash\nSESSION_ID=\"{{{{SESSION_ID}}}}\"\nGATEWAY_IP=\"{{{{GATEWAY_IP}}}}\"\n"
    )
    .unwrap();
    file.flush().unwrap();
    file
}

#[derive(Debug, Clone)]
pub struct StubGroup {
    pub group_id: String,
    pub name: String,
    pub session_id: String,
    pub rules: Vec<IngressRule>,
}

#[derive(Debug, Clone)]
struct StubInstance {
    instance_id: String,
    session_id: String,
    state: InstanceState,
    private_ip: Option<String>,
    group_ids: Vec<String>,
}

#[derive(Default)]
struct StubState {
    next_id: u32,
    launched: u32,
    groups: Vec<StubGroup>,
    instances: Vec<StubInstance>,

    subnet_lookup_empty: bool,
    fail_authorize: bool,
    fail_run: bool,
    time_out_running: bool,
    omit_private_ip: bool,
    deny_group_delete: bool,
    fail_terminate: bool,
}

/// An in-memory [`ComputeProvider`] whose failure modes can be armed one by
/// one and whose resource book can be inspected after the fact.
pub struct StubCompute {
    state: Mutex<StubState>,
}

impl StubCompute {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StubState::default()),
        }
    }

    // Failure switches.

    pub fn subnet_lookup_empty(&self) {
        self.state.lock().unwrap().subnet_lookup_empty = true;
    }

    pub fn fail_authorize_ingress(&self) {
        self.state.lock().unwrap().fail_authorize = true;
    }

    pub fn fail_run_instance(&self) {
        self.state.lock().unwrap().fail_run = true;
    }

    pub fn time_out_running_wait(&self) {
        self.state.lock().unwrap().time_out_running = true;
    }

    pub fn omit_private_ip(&self) {
        self.state.lock().unwrap().omit_private_ip = true;
    }

    pub fn deny_group_delete(&self) {
        self.state.lock().unwrap().deny_group_delete = true;
    }

    pub fn fail_terminate(&self) {
        self.state.lock().unwrap().fail_terminate = true;
    }

    // Seeding, for teardown tests that skip provisioning.

    pub fn seed_group(&self, name: &str, session_id: &str) {
        let mut state = self.state.lock().unwrap();
        let group_id = format!("sg-{:08}", state.next_id);
        state.next_id += 1;
        state.groups.push(StubGroup {
            group_id,
            name: name.to_string(),
            session_id: session_id.to_string(),
            rules: Vec::new(),
        });
    }

    pub fn seed_instance(&self, session_id: &str, state: InstanceState, private_ip: Option<&str>) {
        let mut inner = self.state.lock().unwrap();
        let instance_id = format!("i-{:08}", inner.next_id);
        inner.next_id += 1;
        inner.instances.push(StubInstance {
            instance_id,
            session_id: session_id.to_string(),
            state,
            private_ip: private_ip.map(str::to_string),
            group_ids: Vec::new(),
        });
    }

    // Inspection.

    pub fn groups_for(&self, session_id: &str) -> Vec<StubGroup> {
        self.state
            .lock()
            .unwrap()
            .groups
            .iter()
            .filter(|g| g.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn group_count(&self) -> usize {
        self.state.lock().unwrap().groups.len()
    }

    /// Total number of `run_instance` calls that succeeded, ever.
    pub fn instances_launched(&self) -> usize {
        self.state.lock().unwrap().launched as usize
    }

    pub fn active_instances_for(&self, session_id: &str) -> Vec<InstanceSummary> {
        self.state
            .lock()
            .unwrap()
            .instances
            .iter()
            .filter(|i| i.session_id == session_id && i.state != InstanceState::Terminated)
            .map(|i| InstanceSummary {
                instance_id: i.instance_id.clone(),
                state: i.state,
                private_ip: i.private_ip.clone(),
            })
            .collect()
    }

    /// Security groups the session's instances were launched with.
    pub fn attached_groups(&self, session_id: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .instances
            .iter()
            .filter(|i| i.session_id == session_id)
            .flat_map(|i| i.group_ids.clone())
            .collect()
    }

    /// Every session id that ever owned a group or an instance.
    pub fn known_session_ids(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<String> = state
            .groups
            .iter()
            .map(|g| g.session_id.clone())
            .chain(state.instances.iter().map(|i| i.session_id.clone()))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// True when the session holds no group and no non-terminated instance.
    pub fn is_clean(&self, session_id: &str) -> bool {
        self.groups_for(session_id).is_empty() && self.active_instances_for(session_id).is_empty()
    }
}

#[async_trait]
impl ComputeProvider for StubCompute {
    async fn vpc_for_subnet(&self, subnet_id: &str) -> Result<String, ComputeError> {
        let state = self.state.lock().unwrap();
        if state.subnet_lookup_empty {
            return Err(ComputeError::NotFound {
                resource: format!("subnet {}", subnet_id),
            });
        }
        Ok("vpc-stub".to_string())
    }

    async fn create_security_group(
        &self,
        name: &str,
        _vpc_id: &str,
        session_id: &str,
    ) -> Result<String, ComputeError> {
        let mut state = self.state.lock().unwrap();
        let group_id = format!("sg-{:08}", state.next_id);
        state.next_id += 1;
        state.groups.push(StubGroup {
            group_id: group_id.clone(),
            name: name.to_string(),
            session_id: session_id.to_string(),
            rules: Vec::new(),
        });
        Ok(group_id)
    }

    async fn authorize_ingress(
        &self,
        group_id: &str,
        rule: IngressRule,
    ) -> Result<(), ComputeError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_authorize {
            return Err(ComputeError::Api {
                context: "authorize security group ingress",
                message: "stubbed rejection".to_string(),
            });
        }
        let group = state
            .groups
            .iter_mut()
            .find(|g| g.group_id == group_id)
            .ok_or_else(|| ComputeError::NotFound {
                resource: format!("security group {}", group_id),
            })?;
        group.rules.push(rule);
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<(), ComputeError> {
        let mut state = self.state.lock().unwrap();
        if state.deny_group_delete {
            return Err(ComputeError::Api {
                context: "delete security group",
                message: "permission denied".to_string(),
            });
        }
        let before = state.groups.len();
        state.groups.retain(|g| g.group_id != group_id);
        if state.groups.len() == before {
            return Err(ComputeError::NotFound {
                resource: format!("security group {}", group_id),
            });
        }
        Ok(())
    }

    async fn delete_security_group_by_name(&self, name: &str) -> Result<(), ComputeError> {
        let mut state = self.state.lock().unwrap();
        if state.deny_group_delete {
            return Err(ComputeError::Api {
                context: "delete security group",
                message: "permission denied".to_string(),
            });
        }
        let before = state.groups.len();
        state.groups.retain(|g| g.name != name);
        if state.groups.len() == before {
            return Err(ComputeError::NotFound {
                resource: format!("security group {}", name),
            });
        }
        Ok(())
    }

    async fn run_instance(&self, spec: LaunchSpec) -> Result<String, ComputeError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_run {
            return Err(ComputeError::Api {
                context: "run instance",
                message: "stubbed rejection".to_string(),
            });
        }
        let instance_id = format!("i-{:08}", state.next_id);
        state.next_id += 1;
        let private_ip = if state.omit_private_ip {
            None
        } else {
            Some(format!("10.0.2.{}", 10 + state.launched))
        };
        state.launched += 1;
        state.instances.push(StubInstance {
            instance_id: instance_id.clone(),
            session_id: spec.session_id,
            state: InstanceState::Pending,
            private_ip,
            group_ids: spec.group_ids,
        });
        Ok(instance_id)
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<InstanceSummary, ComputeError> {
        let state = self.state.lock().unwrap();
        state
            .instances
            .iter()
            .find(|i| i.instance_id == instance_id)
            .map(|i| InstanceSummary {
                instance_id: i.instance_id.clone(),
                state: i.state,
                private_ip: i.private_ip.clone(),
            })
            .ok_or_else(|| ComputeError::NotFound {
                resource: format!("instance {}", instance_id),
            })
    }

    async fn find_session_instances(
        &self,
        session_id: &str,
        states: &[InstanceState],
    ) -> Result<Vec<InstanceSummary>, ComputeError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .instances
            .iter()
            .filter(|i| i.session_id == session_id && states.contains(&i.state))
            .map(|i| InstanceSummary {
                instance_id: i.instance_id.clone(),
                state: i.state,
                private_ip: i.private_ip.clone(),
            })
            .collect())
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<(), ComputeError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_terminate {
            return Err(ComputeError::Api {
                context: "terminate instances",
                message: "stubbed rejection".to_string(),
            });
        }
        for instance in state.instances.iter_mut() {
            if instance_ids.contains(&instance.instance_id) {
                instance.state = InstanceState::ShuttingDown;
            }
        }
        Ok(())
    }

    async fn wait_for_state(
        &self,
        instance_ids: &[String],
        target: InstanceState,
    ) -> Result<(), ComputeError> {
        let mut state = self.state.lock().unwrap();
        if target == InstanceState::Running && state.time_out_running {
            return Err(ComputeError::WaitTimeout {
                target: "running".to_string(),
                waited_secs: 300,
            });
        }
        for instance in state.instances.iter_mut() {
            if instance_ids.contains(&instance.instance_id) {
                instance.state = target;
            }
        }
        Ok(())
    }
}

/// An in-memory [`GatewayRegistrar`] recording every registration.
pub struct StubGateway {
    fail: Mutex<bool>,
    registered: Mutex<Vec<(String, String, Option<String>)>>,
}

impl StubGateway {
    pub fn new() -> Self {
        Self {
            fail: Mutex::new(false),
            registered: Mutex::new(Vec::new()),
        }
    }

    pub fn reject_registrations(&self) {
        *self.fail.lock().unwrap() = true;
    }

    /// `(session_id, vm_ip, user_id)` triples, in call order.
    pub fn registrations(&self) -> Vec<(String, String, Option<String>)> {
        self.registered.lock().unwrap().clone()
    }
}

#[async_trait]
impl GatewayRegistrar for StubGateway {
    async fn register_session(
        &self,
        session_id: &str,
        vm_ip: &str,
        user_id: Option<&str>,
    ) -> Result<(), GatewayError> {
        if *self.fail.lock().unwrap() {
            return Err(GatewayError::Rejected {
                status: 500,
                body: "stubbed gateway failure".to_string(),
            });
        }
        self.registered.lock().unwrap().push((
            session_id.to_string(),
            vm_ip.to_string(),
            user_id.map(str::to_string),
        ));
        Ok(())
    }
}
