//! Messages broadcast by admission operations, and the topics they go to.
//!
//! Topics are keyed by account id, actor-group id, policy row id, and flow
//! id. A subscription keyed to a policy row id stops receiving events after
//! a structural update replaces the row — reconcile via `persistent_id`.
//! Delivery is at-least-once, ordered per topic, and happens only after the
//! publishing operation's store writes are durable.

use serde::{Deserialize, Serialize};

/// An admission event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    CreatePolicy {
        policy_id: String,
    },
    UpdatePolicy {
        policy_id: String,
    },
    DisablePolicy {
        policy_id: String,
    },
    EnablePolicy {
        policy_id: String,
    },
    DeletePolicy {
        policy_id: String,
    },
    /// An actor group gained access to a resource through a policy.
    AllowAccess {
        policy_id: String,
        actor_group_id: String,
        resource_id: String,
    },
    /// An actor group lost access to a resource.
    RejectAccess {
        policy_id: String,
        actor_group_id: String,
        resource_id: String,
    },
    /// A flow was force-expired. Subscribers must treat duplicates as
    /// idempotent.
    ExpireFlow {
        flow_id: String,
        client_id: String,
        resource_id: String,
    },
}

/// Topic name constructors.
pub mod topics {
    pub fn account(account_id: &str) -> String {
        format!("account:{}", account_id)
    }

    pub fn actor_group(actor_group_id: &str) -> String {
        format!("actor_group:{}", actor_group_id)
    }

    /// Keyed by policy ROW id, not `persistent_id`.
    pub fn policy(policy_id: &str) -> String {
        format!("policy:{}", policy_id)
    }

    pub fn flow(flow_id: &str) -> String {
        format!("flow:{}", flow_id)
    }
}
