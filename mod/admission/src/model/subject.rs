use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A permission held by a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    CreateFlows,
    ViewAvailableResources,
    ManagePolicies,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Permission::CreateFlows => "create_flows",
            Permission::ViewAvailableResources => "view_available_resources",
            Permission::ManagePolicies => "manage_policies",
        };
        f.write_str(s)
    }
}

/// A permission requirement: one specific permission, or any one of a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionCheck {
    Single(Permission),
    OneOf(Vec<Permission>),
}

impl PermissionCheck {
    /// The permissions reported as missing when this check fails.
    pub fn required(&self) -> Vec<Permission> {
        match self {
            PermissionCheck::Single(p) => vec![*p],
            PermissionCheck::OneOf(ps) => ps.clone(),
        }
    }
}

/// Request context captured at authentication time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubjectContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<IpAddr>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// Geolocation region code for `remote_ip` (e.g. "US").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ip_location_region: Option<String>,
}

/// The authenticated principal attempting an action: actor + identity +
/// account + permissions + expiring session context. Produced by the
/// authentication layer; the admission core only reads it.
#[derive(Debug, Clone)]
pub struct Subject {
    pub account_id: String,
    pub actor_id: String,
    pub identity_id: Option<String>,
    /// Identity provider the subject authenticated through.
    pub provider_id: Option<String>,
    pub permissions: BTreeSet<Permission>,
    /// Session expiry. Sessions always expire, so every flow granted to this
    /// subject carries an expiry bounded by this instant.
    pub expires_at: DateTime<Utc>,
    pub context: SubjectContext,
}

impl Subject {
    /// Whether the subject satisfies a permission requirement.
    pub fn has_permission(&self, check: &PermissionCheck) -> bool {
        match check {
            PermissionCheck::Single(p) => self.permissions.contains(p),
            PermissionCheck::OneOf(ps) => ps.iter().any(|p| self.permissions.contains(p)),
        }
    }
}

/// The property snapshot a condition is evaluated against. Derived from a
/// subject plus an explicit `now` instant — evaluation never reads the wall
/// clock itself.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub remote_ip: Option<IpAddr>,
    pub remote_ip_location_region: Option<String>,
    pub provider_id: Option<String>,
    pub now: DateTime<Utc>,
}

impl EvaluationContext {
    pub fn for_subject(subject: &Subject, now: DateTime<Utc>) -> Self {
        Self {
            remote_ip: subject.context.remote_ip,
            remote_ip_location_region: subject.context.remote_ip_location_region.clone(),
            provider_id: subject.provider_id.clone(),
            now,
        }
    }
}
