//! Minimal records for the entities the admission core consumes.
//!
//! CRUD for these lives outside the core (directory sync, device enrollment,
//! gateway registration); admission only reads them, account-scoped and
//! excluding soft-deleted rows.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A network resource a policy can grant access to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub account_id: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    pub inserted_at: DateTime<Utc>,
}

/// A group of actors. Groups may be synced from an identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorGroup {
    pub id: String,
    pub account_id: String,
    pub name: String,

    /// Set when the group is synced from an identity provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    pub inserted_at: DateTime<Utc>,
}

/// A human or service account principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub account_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    pub inserted_at: DateTime<Utc>,
}

/// An actor's identity at a specific identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub account_id: String,
    pub actor_id: String,
    pub provider_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    pub inserted_at: DateTime<Utc>,
}

/// An enrolled end-user device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub account_id: String,
    pub actor_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_remote_ip: Option<IpAddr>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    pub inserted_at: DateTime<Utc>,
}

/// A gateway relaying flows to resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gateway {
    pub id: String,
    pub account_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_remote_ip: Option<IpAddr>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    pub inserted_at: DateTime<Utc>,
}
