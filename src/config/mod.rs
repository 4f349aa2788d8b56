//! Configuration for the sandbox provisioner.
//!
//! Everything comes from environment variables (a local `.env` is loaded via
//! dotenvy first). Config is resolved once at startup into an explicit struct
//! and passed by reference into the components; per-request code never reads
//! the environment.

pub(crate) mod helpers;

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

use self::helpers::{optional_env, parse_env, parse_string_env, required_env};

/// Top-level configuration, resolved once at process start.
#[derive(Debug, Clone)]
pub struct Config {
    pub provider: ProviderConfig,
    pub session_vm: SessionVmConfig,
    pub gateway: GatewayConfig,
    pub api: ApiConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Missing required settings fail here, at startup, not per request.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            provider: ProviderConfig::resolve()?,
            session_vm: SessionVmConfig::resolve()?,
            gateway: GatewayConfig::resolve()?,
            api: ApiConfig::resolve()?,
        })
    }
}

/// Cloud provider client settings.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// AWS region the session resources live in.
    pub region: String,
    /// Overall deadline for the "instance running" wait.
    pub running_wait: Duration,
    /// Overall deadline for the "instance terminated" wait.
    pub terminated_wait: Duration,
}

impl ProviderConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            region: required_env("AWS_REGION")?,
            running_wait: Duration::from_secs(parse_env("RUNNING_WAIT_SECS", 300u64)?),
            terminated_wait: Duration::from_secs(parse_env("TERMINATED_WAIT_SECS", 600u64)?),
        })
    }
}

/// Settings describing the session VM and its network placement.
#[derive(Debug, Clone)]
pub struct SessionVmConfig {
    /// Prefix applied to all derived resource names and the `project` tag.
    pub project_prefix: String,
    /// Subnet the session VMs launch into.
    pub subnet_id: String,
    /// Optional shared baseline security group attached alongside the
    /// per-session group.
    pub base_group_id: Option<String>,
    /// EC2 instance type for session VMs.
    pub instance_type: String,
    /// SSH key pair name.
    pub key_name: String,
    /// AMI the session VMs boot from.
    pub image_id: String,
    /// Port the gateway tunnels user traffic over.
    pub tunnel_port: u16,
    /// When set, authorizes an extra SSH ingress rule from this CIDR.
    /// Debug-only relaxation of the isolation policy; never set in production.
    pub debug_ssh_cidr: Option<String>,
    /// Path to the cloud-init boot script template.
    pub cloud_init_template: PathBuf,
}

impl SessionVmConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            project_prefix: parse_string_env("PROJECT_PREFIX", "learn-k8s"),
            subnet_id: required_env("USER_SUBNET_ID")?,
            base_group_id: optional_env("USER_BASE_SG_ID"),
            instance_type: parse_string_env("USER_INSTANCE_TYPE", "t3.small"),
            key_name: required_env("USER_KEY_NAME")?,
            image_id: required_env("USER_AMI_ID")?,
            tunnel_port: parse_env("TUNNEL_PORT", 8889u16)?,
            debug_ssh_cidr: optional_env("DEBUG_SSH_CIDR"),
            cloud_init_template: optional_env("CLOUD_INIT_TEMPLATE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("templates/user-vm-cloud-init.tpl.sh")),
        })
    }
}

/// Gateway/proxy settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Private IP of the gateway; the only source allowed through the
    /// per-session isolation boundary.
    pub gateway_ip: IpAddr,
    /// Endpoint sessions are registered with after launch.
    pub register_url: String,
}

impl GatewayConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let raw_ip = required_env("GATEWAY_IP")?;
        let gateway_ip = raw_ip.parse().map_err(|_| ConfigError::InvalidVar {
            var: "GATEWAY_IP",
            reason: format!("'{}' is not an IP address", raw_ip),
        })?;

        Ok(Self {
            gateway_ip,
            register_url: parse_string_env(
                "GATEWAY_REGISTER_URL",
                "http://10.0.1.4:8080/register-session",
            ),
        })
    }

    /// The gateway's address as a single-host CIDR for ingress rules.
    pub fn gateway_cidr(&self) -> String {
        format!("{}/32", self.gateway_ip)
    }
}

/// HTTP endpoint layer settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    pub port: u16,
}

impl ApiConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: parse_string_env("API_BIND_ADDR", "0.0.0.0"),
            port: parse_env("API_PORT", 8080u16)?,
        })
    }
}
