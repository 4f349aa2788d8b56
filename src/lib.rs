//! warren — on-demand, per-user isolated VM sandboxes behind a gateway.
//!
//! Each session gets its own security group and EC2 instance, created as a
//! compensating transaction: any provisioning failure unwinds whatever was
//! built so far. Teardown rediscovers a session's resources from tags alone
//! and is idempotent. The whole surface is a small HTTP API intended to sit
//! behind the websocket gateway that fronts user traffic.

pub mod api;
pub mod cloudinit;
pub mod compute;
pub mod config;
pub mod error;
pub mod gateway;
pub mod naming;
pub mod provisioner;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{ComputeError, ConfigError, GatewayError, ProvisionError};
pub use provisioner::{ProvisionedSession, Provisioner};
