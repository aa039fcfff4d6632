use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A time-bounded grant binding a client, gateway, resource, and the policy
/// that authorized it.
///
/// Created exactly once per successful authorization. Immutable except
/// `expires_at`, which only ever moves earlier: the revoker sets it to "now",
/// or it is reached naturally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    /// Unique identifier (UUIDv4, no dashes).
    pub id: String,

    /// Owning account.
    pub account_id: String,

    /// The policy that authorized this flow.
    pub policy_id: String,

    /// The client the flow was granted to.
    pub client_id: String,

    /// The gateway the flow runs through.
    pub gateway_id: String,

    /// The resource the flow reaches.
    pub resource_id: String,

    /// Client source address at grant time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_remote_ip: Option<IpAddr>,

    /// Client user agent at grant time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_user_agent: Option<String>,

    /// Gateway address as last seen by the control plane.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_remote_ip: Option<IpAddr>,

    /// When the grant stops being valid.
    pub expires_at: DateTime<Utc>,

    /// Grant time.
    pub inserted_at: DateTime<Utc>,
}

impl Flow {
    /// Whether the flow is still valid at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
