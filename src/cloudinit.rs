//! Guest boot-script templating.
//!
//! The session VM boots from a cloud-init shell script with two placeholders:
//! `{{SESSION_ID}}` and `{{GATEWAY_IP}}`. The orchestrator treats this module
//! as an opaque byte producer; rendering failures happen before any remote
//! resource is created.

use std::io;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::config::{GatewayConfig, SessionVmConfig};

/// Renders the per-session boot script from the configured template.
#[derive(Debug, Clone)]
pub struct BootScript {
    template_path: PathBuf,
    gateway_ip: String,
}

impl BootScript {
    pub fn new(vm: &SessionVmConfig, gateway: &GatewayConfig) -> Self {
        Self {
            template_path: vm.cloud_init_template.clone(),
            gateway_ip: gateway.gateway_ip.to_string(),
        }
    }

    /// Render the boot script for one session.
    ///
    /// The template is read per call so it can be edited without a restart.
    pub fn render(&self, session_id: &str) -> io::Result<String> {
        let template = std::fs::read_to_string(&self.template_path)?;
        Ok(template
            .replace("{{SESSION_ID}}", session_id)
            .replace("{{GATEWAY_IP}}", &self.gateway_ip))
    }

    /// Render and base64-encode for launch transport.
    pub fn render_transport(&self, session_id: &str) -> io::Result<String> {
        Ok(BASE64.encode(self.render(session_id)?))
    }
}
