//! Admission module — the access-control decision core of a zero-trust
//! network control plane.
//!
//! # Responsibilities
//!
//! - **Condition evaluation** — pure predicates over a request context:
//!   CIDR containment, membership tests, recurring weekly time windows
//!   across timezones
//! - **Policy matching** — among the policies granting a subject's groups
//!   access to a resource, find one with every condition satisfied
//! - **Flow admission** — permission gate, policy match, expiry capping,
//!   and the flow record itself
//! - **Policy lifecycle** — create / update / disable / enable / delete,
//!   with structural edits preserving a stable `persistent_id`
//! - **Flow revocation** — scope-based immediate expiry of active flows
//!   with per-flow notification
//!
//! # Usage
//!
//! ```ignore
//! use admission::{AdmissionConfig, AdmissionService};
//!
//! let svc = AdmissionService::new(sql, AdmissionConfig::default())?;
//! let grant = svc.authorize_flow(&client, &gateway, &resource_id, &subject)?;
//! let mut expiry = svc.events().subscribe(&admission::events::topics::flow(&grant.flow.id));
//! ```
//!
//! All operations are stateless relative to the store; events are broadcast
//! only after the corresponding writes are durable.

pub mod events;
pub mod model;
pub mod service;

pub use service::authorize::FlowGrant;
pub use service::condition::{Verdict, evaluate, validate_conditions};
pub use service::lifecycle::PolicyScope;
pub use service::revoke::FlowScope;
pub use service::{AdmissionConfig, AdmissionError, AdmissionService};
