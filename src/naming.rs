//! Deterministic resource naming for sandbox sessions.
//!
//! A session's cloud resources are rediscovered purely from its id: no
//! lookup table is persisted anywhere. The same session id must therefore
//! always derive the same names, and the `session_id` tag is the sole link
//! between a session and its resources.

use uuid::Uuid;

/// Tag key carried by every resource belonging to a session.
pub const SESSION_TAG: &str = "session_id";

/// Tag key identifying the tool that created a resource.
pub const CREATED_BY_TAG: &str = "created_by";

/// Value of the `created_by` tag.
pub const CREATED_BY: &str = "warren";

/// Tag key naming the owning project (the configured prefix).
pub const PROJECT_TAG: &str = "project";

/// Tag key recording when the resource was launched, RFC 3339 in UTC.
pub const LAUNCHED_AT_TAG: &str = "launched_at";

/// Generate a fresh session id: the first 8 hex characters of a v4 UUID.
///
/// Short enough to embed in resource names, random enough to be
/// unguessable for the process lifetime.
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

/// Derive the per-session security group name.
pub fn session_group_name(prefix: &str, session_id: &str) -> String {
    format!("{}-user-{}-sg", prefix, session_id)
}

/// Derive the `Name` tag for a session's instance.
pub fn instance_name(prefix: &str, session_id: &str) -> String {
    format!("{}-uservm-{}", prefix, session_id)
}
