//! Flow admission: permission gate, policy match, expiry capping, and the
//! single flow insert.

use chrono::Utc;

use flowgate_core::new_id;
use flowgate_sql::Value;

use crate::model::{
    Client, EvaluationContext, Flow, Gateway, Permission, PermissionCheck, Policy, Resource,
    Subject,
};
use crate::service::{AdmissionError, AdmissionService};

/// A successful admission: the resource, the policy that authorized it, and
/// the flow that was created.
#[derive(Debug, Clone)]
pub struct FlowGrant {
    pub resource: Resource,
    pub policy: Policy,
    pub flow: Flow,
    pub expires_at: chrono::DateTime<Utc>,
}

impl AdmissionService {
    /// Authorize a client to open a flow to a resource through a gateway.
    ///
    /// Exactly one flow row is created per successful call — there is no
    /// upsert. No event is broadcast on grant; only revocation broadcasts.
    ///
    /// A grant may race a concurrent `disable_policy`: commit order decides,
    /// and a flow granted an instant before the disable commits is then
    /// terminated by the disable's own revocation broadcast.
    ///
    /// # Panics
    ///
    /// If client, gateway, and subject do not agree on account, or the
    /// client is not owned by the subject's actor. Both are caller contract
    /// bugs, not request outcomes.
    pub fn authorize_flow(
        &self,
        client: &Client,
        gateway: &Gateway,
        resource_id: &str,
        subject: &Subject,
    ) -> Result<FlowGrant, AdmissionError> {
        assert!(
            client.account_id == subject.account_id && gateway.account_id == subject.account_id,
            "authorize_flow called with cross-account client/gateway/subject"
        );
        assert!(
            client.actor_id == subject.actor_id,
            "authorize_flow called with a client not owned by the subject's actor"
        );

        self.ensure_permission(subject, PermissionCheck::Single(Permission::CreateFlows))?;
        self.ensure_permission(
            subject,
            PermissionCheck::Single(Permission::ViewAvailableResources),
        )?;

        let resource = self.get_resource(&subject.account_id, resource_id)?;

        let now = Utc::now();
        let ctx = EvaluationContext::for_subject(subject, now);
        let (policy, boundary) = self.find_authorizing_policy(resource_id, subject, &ctx)?;

        // The grant lives until the session ends or the matched time window
        // closes, whichever comes first.
        let expires_at = match boundary {
            Some(b) => b.min(subject.expires_at),
            None => subject.expires_at,
        };

        let flow = Flow {
            id: new_id(),
            account_id: subject.account_id.clone(),
            policy_id: policy.id.clone(),
            client_id: client.id.clone(),
            gateway_id: gateway.id.clone(),
            resource_id: resource.id.clone(),
            client_remote_ip: subject.context.remote_ip,
            client_user_agent: subject.context.user_agent.clone(),
            gateway_remote_ip: gateway.last_seen_remote_ip,
            expires_at,
            inserted_at: now,
        };
        self.insert_flow(&flow)?;

        tracing::debug!(
            flow_id = %flow.id,
            policy_id = %policy.id,
            client_id = %client.id,
            resource_id = %resource.id,
            %expires_at,
            "flow granted"
        );

        Ok(FlowGrant {
            resource,
            policy,
            flow,
            expires_at,
        })
    }

    /// Check one permission requirement, reporting the missing permissions
    /// on failure.
    pub(crate) fn ensure_permission(
        &self,
        subject: &Subject,
        check: PermissionCheck,
    ) -> Result<(), AdmissionError> {
        if subject.has_permission(&check) {
            Ok(())
        } else {
            Err(AdmissionError::Unauthorized {
                missing_permissions: check.required(),
            })
        }
    }

    fn insert_flow(&self, flow: &Flow) -> Result<(), AdmissionError> {
        let opt_text = |v: &Option<String>| match v {
            Some(s) => Value::Text(s.clone()),
            None => Value::Null,
        };
        let opt_ip = |v: &Option<std::net::IpAddr>| match v {
            Some(ip) => Value::Text(ip.to_string()),
            None => Value::Null,
        };

        self.sql
            .exec(
                "INSERT INTO flows (id, account_id, policy_id, client_id, gateway_id,
                    resource_id, client_remote_ip, client_user_agent, gateway_remote_ip,
                    expires_at, inserted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                &[
                    Value::Text(flow.id.clone()),
                    Value::Text(flow.account_id.clone()),
                    Value::Text(flow.policy_id.clone()),
                    Value::Text(flow.client_id.clone()),
                    Value::Text(flow.gateway_id.clone()),
                    Value::Text(flow.resource_id.clone()),
                    opt_ip(&flow.client_remote_ip),
                    opt_text(&flow.client_user_agent),
                    opt_ip(&flow.gateway_remote_ip),
                    Value::Text(flow.expires_at.to_rfc3339()),
                    Value::Text(flow.inserted_at.to_rfc3339()),
                ],
            )
            .map_err(|e| AdmissionError::Storage(e.to_string()))?;
        Ok(())
    }
}
