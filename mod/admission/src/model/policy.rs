use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The request-context property a condition tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionProperty {
    RemoteIp,
    RemoteIpLocationRegion,
    ProviderId,
    CurrentUtcDatetime,
}

impl fmt::Display for ConditionProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionProperty::RemoteIp => "remote_ip",
            ConditionProperty::RemoteIpLocationRegion => "remote_ip_location_region",
            ConditionProperty::ProviderId => "provider_id",
            ConditionProperty::CurrentUtcDatetime => "current_utc_datetime",
        };
        f.write_str(s)
    }
}

/// The predicate applied to a condition's property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    IsIn,
    IsNotIn,
    IsInCidr,
    IsInDayOfWeekTimeRanges,
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionOperator::IsIn => "is_in",
            ConditionOperator::IsNotIn => "is_not_in",
            ConditionOperator::IsInCidr => "is_in_cidr",
            ConditionOperator::IsInDayOfWeekTimeRanges => "is_in_day_of_week_time_ranges",
        };
        f.write_str(s)
    }
}

/// One predicate within a policy. All of a policy's conditions must hold
/// for the policy to authorize a flow; a condition's `values` are OR'd.
///
/// Shape invariants (enforced at create/update time):
/// - `values` is non-empty
/// - `is_in_cidr` applies only to `remote_ip`
/// - `is_in_day_of_week_time_ranges` applies only to `current_utc_datetime`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub property: ConditionProperty,
    pub operator: ConditionOperator,
    pub values: Vec<String>,
}

/// A policy granting an actor group access to a resource, subject to
/// zero or more conditions.
///
/// `id` is the row key and changes on every structural edit (group or
/// resource change); `persistent_id` is the stable external handle assigned
/// once at creation and carried across structural edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Row key (UUIDv4, no dashes). Fresh on each structural edit.
    pub id: String,

    /// Owning account.
    pub account_id: String,

    /// The actor group being granted access.
    pub actor_group_id: String,

    /// The resource access is granted to.
    pub resource_id: String,

    /// Stable external handle, preserved across structural edits.
    pub persistent_id: String,

    /// Optional operator-facing description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Conditions that must all hold for the policy to authorize a flow.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Set while the policy is disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_at: Option<DateTime<Utc>>,

    /// Set when the policy is soft-deleted (terminal).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    /// Row creation time.
    pub inserted_at: DateTime<Utc>,
}

impl Policy {
    pub fn is_disabled(&self) -> bool {
        self.disabled_at.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Input for creating a policy.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePolicy {
    pub actor_group_id: String,
    pub resource_id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Input for updating a policy. `None` fields are left unchanged.
///
/// Changing `actor_group_id` or `resource_id` is a structural edit: the
/// current row is soft-deleted and a new row (same `persistent_id`) takes
/// its place.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePolicy {
    #[serde(default)]
    pub actor_group_id: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub conditions: Option<Vec<Condition>>,
}
