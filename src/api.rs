//! HTTP control surface for session lifecycle.
//!
//! Three routes: launch a session, delete a session, health. Launch is
//! provision-then-register; a registration failure tears the fresh session
//! back down so no VM is left running that no user can reach, and reports
//! 502 to distinguish it from a provisioning failure.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::gateway::GatewayRegistrar;
use crate::provisioner::Provisioner;

#[derive(Clone)]
pub struct ApiState {
    pub provisioner: Arc<Provisioner>,
    pub gateway: Arc<dyn GatewayRegistrar>,
}

#[derive(Debug, Deserialize)]
pub struct LaunchRequest {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

pub struct Api;

impl Api {
    pub fn router(state: ApiState) -> Router {
        Router::new()
            .route("/api/launch-vm", post(launch_vm))
            .route("/api/vm/{session_id}", delete(delete_vm))
            .route("/health", get(health_check))
            .with_state(state)
    }

    pub async fn start(
        state: ApiState,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let router = Self::router(state);
        tracing::info!(%addr, "Sandbox API listening");
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;
        Ok(())
    }
}

async fn health_check() -> &'static str {
    "ok"
}

/// The request body is optional; an empty or absent body launches an
/// anonymous session.
async fn launch_vm(
    State(state): State<ApiState>,
    body: Option<Json<LaunchRequest>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let user_id = body.as_ref().and_then(|req| req.user_id.as_deref());
    tracing::info!(user_id = ?user_id, "Received session launch request");

    let session = match state.provisioner.provision().await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(error = %e, "Session launch failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            );
        }
    };

    match state
        .gateway
        .register_session(&session.session_id, &session.private_ip, user_id)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "session_id": session.session_id,
                "vm_ip": session.private_ip,
            })),
        ),
        Err(e) => {
            // The VM is up but no user traffic can ever reach it. Tear the
            // session back down rather than leak a running instance.
            tracing::warn!(
                session_id = %session.session_id,
                error = %e,
                "Gateway registration failed, rolling back session"
            );
            if let Err(td) = state.provisioner.teardown(&session.session_id).await {
                tracing::error!(
                    session_id = %session.session_id,
                    error = %td,
                    "Rollback after failed registration also failed, manual remediation needed"
                );
            }
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": "failed to register session with gateway",
                    "details": e.to_string(),
                })),
            )
        }
    }
}

async fn delete_vm(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    tracing::info!(session_id = %session_id, "Received session delete request");
    match state.provisioner.teardown(&session_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "message": format!("resources for session {} are deleted", session_id),
            })),
        ),
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "Session delete failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "failed to delete session",
                    "details": e.to_string(),
                })),
            )
        }
    }
}
