//! Registration of live sessions with the websocket gateway.
//!
//! After a session VM is up, the gateway must learn the mapping from
//! session id to private address before any user traffic can reach the VM.
//! The registrar is a trait so the HTTP layer can be exercised without a
//! live gateway.

use async_trait::async_trait;
use serde::Serialize;

use crate::config::GatewayConfig;
use crate::error::GatewayError;

#[async_trait]
pub trait GatewayRegistrar: Send + Sync {
    /// Tell the gateway where the session's VM lives.
    async fn register_session(
        &self,
        session_id: &str,
        vm_ip: &str,
        user_id: Option<&str>,
    ) -> Result<(), GatewayError>;
}

/// Field names follow the gateway's JSON contract.
#[derive(Debug, Serialize)]
struct RegisterSessionRequest<'a> {
    #[serde(rename = "sessionId")]
    session_id: &'a str,
    #[serde(rename = "vmIp")]
    vm_ip: &'a str,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
}

/// Registers sessions over plain HTTP against the gateway's internal
/// endpoint.
pub struct HttpGateway {
    http: reqwest::Client,
    register_url: String,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            register_url: config.register_url.clone(),
        }
    }
}

#[async_trait]
impl GatewayRegistrar for HttpGateway {
    async fn register_session(
        &self,
        session_id: &str,
        vm_ip: &str,
        user_id: Option<&str>,
    ) -> Result<(), GatewayError> {
        tracing::info!(
            session_id = %session_id,
            vm_ip = %vm_ip,
            url = %self.register_url,
            "Registering session with gateway"
        );

        let payload = RegisterSessionRequest {
            session_id,
            vm_ip,
            user_id,
        };
        let response = self
            .http
            .post(&self.register_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Unreachable {
                url: self.register_url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(session_id = %session_id, "Gateway accepted session registration");
        Ok(())
    }
}
