//! Policy lifecycle: create, update (structural and in-place), disable,
//! enable, delete, and scope-based bulk delete.
//!
//! Per policy row the states are `active ⇄ disabled → deleted` (terminal).
//! A structural edit (group or resource change) soft-deletes the current row
//! and inserts a replacement carrying the same `persistent_id`; subscribers
//! keyed to the old row id stop receiving events from that point.

use chrono::{DateTime, Utc};

use flowgate_core::{ListParams, ListResult, new_id};
use flowgate_sql::Value;

use crate::events::{Event, topics};
use crate::model::{
    CreatePolicy, Permission, PermissionCheck, Policy, Subject, UpdatePolicy,
};
use crate::service::revoke::FlowScope;
use crate::service::{AdmissionError, AdmissionService, condition};

/// Indexed columns kept in sync with a policy's JSON document.
pub(crate) fn policy_indexes(policy: &Policy) -> Vec<(&'static str, Value)> {
    vec![
        ("account_id", Value::Text(policy.account_id.clone())),
        ("actor_group_id", Value::Text(policy.actor_group_id.clone())),
        ("resource_id", Value::Text(policy.resource_id.clone())),
        ("persistent_id", Value::Text(policy.persistent_id.clone())),
        ("disabled_at", opt_ts(policy.disabled_at)),
        ("deleted_at", opt_ts(policy.deleted_at)),
        ("inserted_at", Value::Text(policy.inserted_at.to_rfc3339())),
    ]
}

fn opt_ts(ts: Option<DateTime<Utc>>) -> Value {
    match ts {
        Some(t) => Value::Text(t.to_rfc3339()),
        None => Value::Null,
    }
}

/// Which policies a bulk delete targets. Every variant is account-scoped.
#[derive(Debug, Clone, Copy)]
pub enum PolicyScope<'a> {
    /// All policies granting access to this actor group.
    ActorGroup {
        account_id: &'a str,
        actor_group_id: &'a str,
    },
    /// All policies granting access to this resource.
    Resource {
        account_id: &'a str,
        resource_id: &'a str,
    },
    /// All policies of groups synced from this identity provider.
    Provider {
        account_id: &'a str,
        provider_id: &'a str,
    },
}

impl PolicyScope<'_> {
    fn account_id(&self) -> &str {
        match self {
            PolicyScope::ActorGroup { account_id, .. }
            | PolicyScope::Resource { account_id, .. }
            | PolicyScope::Provider { account_id, .. } => account_id,
        }
    }

    /// SQL predicate over `policies`. `?1` is the account id; the scope
    /// value binds at `?2`.
    fn predicate(&self) -> (&'static str, Value) {
        match self {
            PolicyScope::ActorGroup { actor_group_id, .. } => {
                ("actor_group_id = ?2", Value::Text(actor_group_id.to_string()))
            }
            PolicyScope::Resource { resource_id, .. } => {
                ("resource_id = ?2", Value::Text(resource_id.to_string()))
            }
            PolicyScope::Provider { provider_id, .. } => (
                "actor_group_id IN (SELECT id FROM actor_groups
                    WHERE provider_id = ?2 AND account_id = ?1)",
                Value::Text(provider_id.to_string()),
            ),
        }
    }
}

impl AdmissionService {
    /// Create a policy granting a group access to a resource.
    ///
    /// Validates that the group and resource exist in the subject's account
    /// and that the condition shapes are well-formed. The new policy gets a
    /// fresh `persistent_id`.
    pub fn create_policy(
        &self,
        input: CreatePolicy,
        subject: &Subject,
    ) -> Result<Policy, AdmissionError> {
        self.ensure_permission(subject, PermissionCheck::Single(Permission::ManagePolicies))?;

        self.get_actor_group(&subject.account_id, &input.actor_group_id)
            .map_err(|_| {
                AdmissionError::Validation(format!(
                    "actor group '{}' does not exist",
                    input.actor_group_id
                ))
            })?;
        self.get_resource(&subject.account_id, &input.resource_id)
            .map_err(|_| {
                AdmissionError::Validation(format!(
                    "resource '{}' does not exist",
                    input.resource_id
                ))
            })?;
        condition::validate_conditions(&input.conditions)?;

        let policy = Policy {
            id: new_id(),
            account_id: subject.account_id.clone(),
            actor_group_id: input.actor_group_id,
            resource_id: input.resource_id,
            persistent_id: new_id(),
            description: input.description,
            conditions: input.conditions,
            disabled_at: None,
            deleted_at: None,
            inserted_at: Utc::now(),
        };
        self.insert_record(
            self.sql.as_ref(),
            "policies",
            &policy.id,
            &policy,
            &policy_indexes(&policy),
        )?;

        tracing::info!(
            policy_id = %policy.id,
            actor_group_id = %policy.actor_group_id,
            resource_id = %policy.resource_id,
            "policy created"
        );
        self.publish_all(vec![
            (
                topics::account(&policy.account_id),
                Event::CreatePolicy {
                    policy_id: policy.id.clone(),
                },
            ),
            (
                topics::actor_group(&policy.actor_group_id),
                Event::AllowAccess {
                    policy_id: policy.id.clone(),
                    actor_group_id: policy.actor_group_id.clone(),
                    resource_id: policy.resource_id.clone(),
                },
            ),
        ]);

        Ok(policy)
    }

    /// Get a non-deleted policy in the account.
    pub fn get_policy(&self, account_id: &str, id: &str) -> Result<Policy, AdmissionError> {
        self.fetch_scoped(self.sql.as_ref(), "policies", account_id, id)
    }

    /// List the account's non-deleted policies, newest first.
    pub fn list_policies(
        &self,
        account_id: &str,
        params: &ListParams,
    ) -> Result<ListResult<Policy>, AdmissionError> {
        let count_rows = self
            .sql
            .query(
                "SELECT COUNT(*) AS cnt FROM policies
                 WHERE account_id = ?1 AND deleted_at IS NULL",
                &[Value::Text(account_id.to_string())],
            )
            .map_err(|e| AdmissionError::Storage(e.to_string()))?;
        let total = count_rows
            .first()
            .and_then(|r| r.get_i64("cnt"))
            .unwrap_or(0) as usize;

        let rows = self
            .sql
            .query(
                "SELECT data FROM policies
                 WHERE account_id = ?1 AND deleted_at IS NULL
                 ORDER BY inserted_at DESC LIMIT ?2 OFFSET ?3",
                &[
                    Value::Text(account_id.to_string()),
                    Value::Integer(params.limit as i64),
                    Value::Integer(params.offset as i64),
                ],
            )
            .map_err(|e| AdmissionError::Storage(e.to_string()))?;

        let mut items = Vec::new();
        for row in &rows {
            let data = row
                .get_str("data")
                .ok_or_else(|| AdmissionError::Internal("missing data column".into()))?;
            let policy: Policy = serde_json::from_str(data)
                .map_err(|e| AdmissionError::Internal(e.to_string()))?;
            items.push(policy);
        }

        Ok(ListResult { items, total })
    }

    /// Update a policy. `None` fields of the input are left unchanged.
    ///
    /// Changing the group or resource is structural: the current row is
    /// soft-deleted and a new row with the same `persistent_id` (and a fresh
    /// `id`) replaces it, and flows granted under the old row are revoked.
    /// Description/condition changes mutate the row in place and revoke
    /// nothing.
    pub fn update_policy(
        &self,
        policy_id: &str,
        input: UpdatePolicy,
        subject: &Subject,
    ) -> Result<Policy, AdmissionError> {
        self.ensure_permission(subject, PermissionCheck::Single(Permission::ManagePolicies))?;
        let policy = self.get_policy(&subject.account_id, policy_id)?;

        if let Some(ref conditions) = input.conditions {
            condition::validate_conditions(conditions)?;
        }

        let structural = input
            .actor_group_id
            .as_ref()
            .is_some_and(|g| *g != policy.actor_group_id)
            || input
                .resource_id
                .as_ref()
                .is_some_and(|r| *r != policy.resource_id);

        if structural {
            self.replace_policy(policy, input, subject)
        } else {
            let mut updated = policy;
            if let Some(description) = input.description {
                updated.description = Some(description);
            }
            if let Some(conditions) = input.conditions {
                updated.conditions = conditions;
            }
            self.update_record(
                self.sql.as_ref(),
                "policies",
                &updated.id,
                &updated,
                &policy_indexes(&updated),
            )?;

            tracing::info!(policy_id = %updated.id, "policy updated in place");
            self.publish_all(vec![
                (
                    topics::account(&updated.account_id),
                    Event::UpdatePolicy {
                        policy_id: updated.id.clone(),
                    },
                ),
                (
                    topics::policy(&updated.id),
                    Event::UpdatePolicy {
                        policy_id: updated.id.clone(),
                    },
                ),
            ]);

            Ok(updated)
        }
    }

    /// Structural update: soft-delete the current row, insert the
    /// replacement, revoke flows granted under the old row.
    fn replace_policy(
        &self,
        policy: Policy,
        input: UpdatePolicy,
        subject: &Subject,
    ) -> Result<Policy, AdmissionError> {
        let actor_group_id = input
            .actor_group_id
            .unwrap_or_else(|| policy.actor_group_id.clone());
        let resource_id = input
            .resource_id
            .unwrap_or_else(|| policy.resource_id.clone());

        self.get_actor_group(&subject.account_id, &actor_group_id)
            .map_err(|_| {
                AdmissionError::Validation(format!(
                    "actor group '{}' does not exist",
                    actor_group_id
                ))
            })?;
        self.get_resource(&subject.account_id, &resource_id)
            .map_err(|_| {
                AdmissionError::Validation(format!("resource '{}' does not exist", resource_id))
            })?;

        let now = Utc::now();
        let mut old = policy;
        let replacement = Policy {
            id: new_id(),
            account_id: old.account_id.clone(),
            actor_group_id,
            resource_id,
            persistent_id: old.persistent_id.clone(),
            description: input.description.or_else(|| old.description.clone()),
            conditions: input
                .conditions
                .unwrap_or_else(|| old.conditions.clone()),
            disabled_at: old.disabled_at,
            deleted_at: None,
            inserted_at: now,
        };
        old.deleted_at = Some(now);

        let tx = self
            .sql
            .begin()
            .map_err(|e| AdmissionError::Storage(e.to_string()))?;
        self.update_record(&*tx, "policies", &old.id, &old, &policy_indexes(&old))?;
        self.insert_record(
            &*tx,
            "policies",
            &replacement.id,
            &replacement,
            &policy_indexes(&replacement),
        )?;
        tx.commit()
            .map_err(|e| AdmissionError::Storage(e.to_string()))?;

        tracing::info!(
            old_id = %old.id,
            new_id = %replacement.id,
            persistent_id = %replacement.persistent_id,
            "policy structurally updated"
        );
        self.publish_all(vec![
            (
                topics::account(&old.account_id),
                Event::DeletePolicy {
                    policy_id: old.id.clone(),
                },
            ),
            (
                topics::account(&replacement.account_id),
                Event::CreatePolicy {
                    policy_id: replacement.id.clone(),
                },
            ),
            (
                topics::actor_group(&old.actor_group_id),
                Event::RejectAccess {
                    policy_id: old.id.clone(),
                    actor_group_id: old.actor_group_id.clone(),
                    resource_id: old.resource_id.clone(),
                },
            ),
            (
                topics::actor_group(&replacement.actor_group_id),
                Event::AllowAccess {
                    policy_id: replacement.id.clone(),
                    actor_group_id: replacement.actor_group_id.clone(),
                    resource_id: replacement.resource_id.clone(),
                },
            ),
        ]);

        self.expire_flows_for(FlowScope::Policy {
            account_id: &old.account_id,
            policy_id: &old.id,
        })?;

        Ok(replacement)
    }

    /// Disable a policy and revoke its flows. Idempotent: disabling an
    /// already-disabled policy is a pure no-op with no broadcast.
    pub fn disable_policy(
        &self,
        policy_id: &str,
        subject: &Subject,
    ) -> Result<Policy, AdmissionError> {
        self.ensure_permission(subject, PermissionCheck::Single(Permission::ManagePolicies))?;
        let mut policy = self.get_policy(&subject.account_id, policy_id)?;

        if policy.disabled_at.is_some() {
            return Ok(policy);
        }

        policy.disabled_at = Some(Utc::now());
        self.update_record(
            self.sql.as_ref(),
            "policies",
            &policy.id,
            &policy,
            &policy_indexes(&policy),
        )?;

        tracing::info!(policy_id = %policy.id, "policy disabled");
        self.publish_all(vec![
            (
                topics::account(&policy.account_id),
                Event::DisablePolicy {
                    policy_id: policy.id.clone(),
                },
            ),
            (
                topics::policy(&policy.id),
                Event::DisablePolicy {
                    policy_id: policy.id.clone(),
                },
            ),
            (
                topics::actor_group(&policy.actor_group_id),
                Event::RejectAccess {
                    policy_id: policy.id.clone(),
                    actor_group_id: policy.actor_group_id.clone(),
                    resource_id: policy.resource_id.clone(),
                },
            ),
        ]);

        self.expire_flows_for(FlowScope::Policy {
            account_id: &policy.account_id,
            policy_id: &policy.id,
        })?;

        Ok(policy)
    }

    /// Re-enable a disabled policy. Idempotent. Does not recreate flows —
    /// access is granted lazily on the next authorization.
    pub fn enable_policy(
        &self,
        policy_id: &str,
        subject: &Subject,
    ) -> Result<Policy, AdmissionError> {
        self.ensure_permission(subject, PermissionCheck::Single(Permission::ManagePolicies))?;
        let mut policy = self.get_policy(&subject.account_id, policy_id)?;

        if policy.disabled_at.is_none() {
            return Ok(policy);
        }

        policy.disabled_at = None;
        self.update_record(
            self.sql.as_ref(),
            "policies",
            &policy.id,
            &policy,
            &policy_indexes(&policy),
        )?;

        tracing::info!(policy_id = %policy.id, "policy enabled");
        self.publish_all(vec![
            (
                topics::account(&policy.account_id),
                Event::EnablePolicy {
                    policy_id: policy.id.clone(),
                },
            ),
            (
                topics::policy(&policy.id),
                Event::EnablePolicy {
                    policy_id: policy.id.clone(),
                },
            ),
            (
                topics::actor_group(&policy.actor_group_id),
                Event::AllowAccess {
                    policy_id: policy.id.clone(),
                    actor_group_id: policy.actor_group_id.clone(),
                    resource_id: policy.resource_id.clone(),
                },
            ),
        ]);

        Ok(policy)
    }

    /// Soft-delete a policy and revoke its flows. NOT idempotent: deleting
    /// an already-deleted policy is a state conflict reported as not-found.
    pub fn delete_policy(
        &self,
        policy_id: &str,
        subject: &Subject,
    ) -> Result<Policy, AdmissionError> {
        self.ensure_permission(subject, PermissionCheck::Single(Permission::ManagePolicies))?;
        let mut policy = self.get_policy(&subject.account_id, policy_id)?;

        policy.deleted_at = Some(Utc::now());
        self.update_record(
            self.sql.as_ref(),
            "policies",
            &policy.id,
            &policy,
            &policy_indexes(&policy),
        )?;

        tracing::info!(policy_id = %policy.id, "policy deleted");
        self.publish_all(vec![
            (
                topics::account(&policy.account_id),
                Event::DeletePolicy {
                    policy_id: policy.id.clone(),
                },
            ),
            (
                topics::policy(&policy.id),
                Event::DeletePolicy {
                    policy_id: policy.id.clone(),
                },
            ),
            (
                topics::actor_group(&policy.actor_group_id),
                Event::RejectAccess {
                    policy_id: policy.id.clone(),
                    actor_group_id: policy.actor_group_id.clone(),
                    resource_id: policy.resource_id.clone(),
                },
            ),
        ]);

        self.expire_flows_for(FlowScope::Policy {
            account_id: &policy.account_id,
            policy_id: &policy.id,
        })?;

        Ok(policy)
    }

    /// Delete every non-deleted policy matching the scope, with per-policy
    /// delete semantics, inside one transaction. Idempotent at the bulk
    /// level: once nothing remains, returns an empty vec and emits nothing.
    ///
    /// System cascades (group deleted, provider deprovisioned) call this
    /// with no subject.
    pub fn delete_policies_for(
        &self,
        scope: PolicyScope<'_>,
        subject: Option<&Subject>,
    ) -> Result<Vec<Policy>, AdmissionError> {
        if let Some(subject) = subject {
            self.ensure_permission(subject, PermissionCheck::Single(Permission::ManagePolicies))?;
            if subject.account_id != scope.account_id() {
                return Err(AdmissionError::NotFound(
                    "policy scope is outside the subject's account".into(),
                ));
            }
        }

        let account_id = scope.account_id().to_string();
        let (predicate, scope_param) = scope.predicate();
        let now = Utc::now();

        let tx = self
            .sql
            .begin()
            .map_err(|e| AdmissionError::Storage(e.to_string()))?;

        let rows = tx
            .query(
                &format!(
                    "SELECT data FROM policies
                     WHERE account_id = ?1 AND deleted_at IS NULL AND {}",
                    predicate
                ),
                &[Value::Text(account_id.clone()), scope_param],
            )
            .map_err(|e| AdmissionError::Storage(e.to_string()))?;

        let mut policies = Vec::new();
        for row in &rows {
            let data = row
                .get_str("data")
                .ok_or_else(|| AdmissionError::Internal("missing data column".into()))?;
            let policy: Policy = serde_json::from_str(data)
                .map_err(|e| AdmissionError::Internal(e.to_string()))?;
            policies.push(policy);
        }

        if policies.is_empty() {
            return Ok(Vec::new());
        }

        for policy in &mut policies {
            policy.deleted_at = Some(now);
            self.update_record(&*tx, "policies", &policy.id, policy, &policy_indexes(policy))?;
        }

        // One conditional bulk update revokes the flows of every deleted
        // policy within the same transaction.
        let placeholders: Vec<String> = (0..policies.len())
            .map(|i| format!("?{}", i + 3))
            .collect();
        let flow_predicate = format!("policy_id IN ({})", placeholders.join(", "));
        let flow_params: Vec<Value> = policies
            .iter()
            .map(|p| Value::Text(p.id.clone()))
            .collect();
        let expired =
            self.expire_flows_where(&*tx, &account_id, &flow_predicate, &flow_params, now)?;

        tx.commit()
            .map_err(|e| AdmissionError::Storage(e.to_string()))?;

        tracing::info!(
            count = policies.len(),
            flows = expired.len(),
            "policies bulk-deleted"
        );

        let mut pending = Vec::new();
        for policy in &policies {
            pending.push((
                topics::account(&policy.account_id),
                Event::DeletePolicy {
                    policy_id: policy.id.clone(),
                },
            ));
            pending.push((
                topics::policy(&policy.id),
                Event::DeletePolicy {
                    policy_id: policy.id.clone(),
                },
            ));
            pending.push((
                topics::actor_group(&policy.actor_group_id),
                Event::RejectAccess {
                    policy_id: policy.id.clone(),
                    actor_group_id: policy.actor_group_id.clone(),
                    resource_id: policy.resource_id.clone(),
                },
            ));
        }
        for (flow_id, client_id, resource_id) in expired {
            pending.push((
                topics::flow(&flow_id),
                Event::ExpireFlow {
                    flow_id,
                    client_id,
                    resource_id,
                },
            ));
        }
        self.publish_all(pending);

        Ok(policies)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use flowgate_core::ListParams;

    use crate::events::{Event, topics};
    use crate::model::{
        Condition, ConditionOperator, ConditionProperty, CreatePolicy, Permission, UpdatePolicy,
    };
    use crate::service::AdmissionError;
    use crate::service::fixtures::{
        World, seed_group, seed_group_with_provider, seed_subject, seed_world,
    };
    use crate::service::lifecycle::PolicyScope;

    fn basic_input(world: &World) -> CreatePolicy {
        CreatePolicy {
            actor_group_id: world.group.id.clone(),
            resource_id: world.resource.id.clone(),
            description: Some("allow engineering into prod-db".to_string()),
            conditions: vec![],
        }
    }

    fn grant_flow(world: &World) -> crate::model::Flow {
        world
            .svc
            .authorize_flow(&world.client, &world.gateway, &world.resource.id, &world.subject)
            .unwrap()
            .flow
    }

    #[test]
    fn test_create_policy_broadcasts_and_persists() {
        let world = seed_world("acct-1");
        let mut account_rx = world.svc.events().subscribe(&topics::account("acct-1"));
        let mut group_rx = world
            .svc
            .events()
            .subscribe(&topics::actor_group(&world.group.id));

        let policy = world
            .svc
            .create_policy(basic_input(&world), &world.subject)
            .unwrap();
        assert_eq!(policy.account_id, "acct-1");
        assert!(!policy.persistent_id.is_empty());
        assert_ne!(policy.persistent_id, policy.id);

        assert_eq!(
            account_rx.try_recv().unwrap(),
            Event::CreatePolicy {
                policy_id: policy.id.clone()
            }
        );
        assert_eq!(
            group_rx.try_recv().unwrap(),
            Event::AllowAccess {
                policy_id: policy.id.clone(),
                actor_group_id: world.group.id.clone(),
                resource_id: world.resource.id.clone(),
            }
        );

        let fetched = world.svc.get_policy("acct-1", &policy.id).unwrap();
        assert_eq!(fetched.persistent_id, policy.persistent_id);
        assert_eq!(fetched.description.as_deref(), Some("allow engineering into prod-db"));
    }

    #[test]
    fn test_create_policy_requires_manage_permission() {
        let world = seed_world("acct-1");
        let mut subject = world.subject.clone();
        subject.permissions.remove(&Permission::ManagePolicies);

        let err = world
            .svc
            .create_policy(basic_input(&world), &subject)
            .unwrap_err();
        match err {
            AdmissionError::Unauthorized { missing_permissions } => {
                assert_eq!(missing_permissions, vec![Permission::ManagePolicies]);
            }
            other => panic!("expected unauthorized, got {:?}", other),
        }
    }

    #[test]
    fn test_create_policy_validates_references_and_conditions() {
        let world = seed_world("acct-1");

        let mut input = basic_input(&world);
        input.actor_group_id = "missing-group".to_string();
        assert!(matches!(
            world.svc.create_policy(input, &world.subject),
            Err(AdmissionError::Validation(_))
        ));

        let mut input = basic_input(&world);
        input.resource_id = "missing-resource".to_string();
        assert!(matches!(
            world.svc.create_policy(input, &world.subject),
            Err(AdmissionError::Validation(_))
        ));

        let mut input = basic_input(&world);
        input.conditions = vec![Condition {
            property: ConditionProperty::RemoteIp,
            operator: ConditionOperator::IsInCidr,
            values: vec![],
        }];
        assert!(matches!(
            world.svc.create_policy(input, &world.subject),
            Err(AdmissionError::Validation(_))
        ));
    }

    #[test]
    fn test_non_structural_update_keeps_row_and_flows() {
        let world = seed_world("acct-1");
        let policy = world
            .svc
            .create_policy(basic_input(&world), &world.subject)
            .unwrap();
        let flow = grant_flow(&world);

        let mut account_rx = world.svc.events().subscribe(&topics::account("acct-1"));
        let mut policy_rx = world.svc.events().subscribe(&topics::policy(&policy.id));
        let mut flow_rx = world.svc.events().subscribe(&topics::flow(&flow.id));

        let updated = world
            .svc
            .update_policy(
                &policy.id,
                UpdatePolicy {
                    description: Some("tightened".to_string()),
                    conditions: Some(vec![Condition {
                        property: ConditionProperty::RemoteIpLocationRegion,
                        operator: ConditionOperator::IsIn,
                        values: vec!["US".to_string()],
                    }]),
                    ..Default::default()
                },
                &world.subject,
            )
            .unwrap();

        assert_eq!(updated.id, policy.id);
        assert_eq!(updated.persistent_id, policy.persistent_id);
        assert_eq!(updated.description.as_deref(), Some("tightened"));
        assert_eq!(updated.conditions.len(), 1);

        assert_eq!(
            account_rx.try_recv().unwrap(),
            Event::UpdatePolicy {
                policy_id: policy.id.clone()
            }
        );
        assert_eq!(
            policy_rx.try_recv().unwrap(),
            Event::UpdatePolicy {
                policy_id: policy.id.clone()
            }
        );

        // No revocation on an in-place update.
        assert!(flow_rx.try_recv().is_err());
        assert_eq!(
            world
                .svc
                .list_active_flows("acct-1", &world.client.id)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_structural_update_replaces_row_and_revokes() {
        let world = seed_world("acct-1");
        let policy = world
            .svc
            .create_policy(basic_input(&world), &world.subject)
            .unwrap();
        let flow = grant_flow(&world);
        let new_group = seed_group(&world.svc, "acct-1", "ops");

        let mut account_rx = world.svc.events().subscribe(&topics::account("acct-1"));
        let mut old_group_rx = world
            .svc
            .events()
            .subscribe(&topics::actor_group(&world.group.id));
        let mut new_group_rx = world
            .svc
            .events()
            .subscribe(&topics::actor_group(&new_group.id));
        let mut flow_rx = world.svc.events().subscribe(&topics::flow(&flow.id));

        let replacement = world
            .svc
            .update_policy(
                &policy.id,
                UpdatePolicy {
                    actor_group_id: Some(new_group.id.clone()),
                    ..Default::default()
                },
                &world.subject,
            )
            .unwrap();

        // Fresh row id, stable persistent id, carried-over content.
        assert_ne!(replacement.id, policy.id);
        assert_eq!(replacement.persistent_id, policy.persistent_id);
        assert_eq!(replacement.actor_group_id, new_group.id);
        assert_eq!(replacement.resource_id, policy.resource_id);
        assert_eq!(replacement.description, policy.description);

        // The old row is gone; the replacement is live.
        assert!(matches!(
            world.svc.get_policy("acct-1", &policy.id),
            Err(AdmissionError::NotFound(_))
        ));
        assert!(world.svc.get_policy("acct-1", &replacement.id).is_ok());

        // Account topic sees delete-then-create, in that order.
        assert_eq!(
            account_rx.try_recv().unwrap(),
            Event::DeletePolicy {
                policy_id: policy.id.clone()
            }
        );
        assert_eq!(
            account_rx.try_recv().unwrap(),
            Event::CreatePolicy {
                policy_id: replacement.id.clone()
            }
        );

        assert_eq!(
            old_group_rx.try_recv().unwrap(),
            Event::RejectAccess {
                policy_id: policy.id.clone(),
                actor_group_id: world.group.id.clone(),
                resource_id: policy.resource_id.clone(),
            }
        );
        assert_eq!(
            new_group_rx.try_recv().unwrap(),
            Event::AllowAccess {
                policy_id: replacement.id.clone(),
                actor_group_id: new_group.id.clone(),
                resource_id: replacement.resource_id.clone(),
            }
        );

        // Flows granted under the old row are revoked.
        assert_eq!(
            flow_rx.try_recv().unwrap(),
            Event::ExpireFlow {
                flow_id: flow.id.clone(),
                client_id: flow.client_id.clone(),
                resource_id: flow.resource_id.clone(),
            }
        );
        assert!(
            world
                .svc
                .list_active_flows("acct-1", &world.client.id)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_update_is_account_scoped() {
        let world = seed_world("acct-1");
        let policy = world
            .svc
            .create_policy(basic_input(&world), &world.subject)
            .unwrap();

        let foreign_subject = seed_subject("acct-2", "other-actor");
        let err = world
            .svc
            .update_policy(
                &policy.id,
                UpdatePolicy {
                    description: Some("hijack".to_string()),
                    ..Default::default()
                },
                &foreign_subject,
            )
            .unwrap_err();
        assert!(matches!(err, AdmissionError::NotFound(_)));
    }

    #[test]
    fn test_disable_revokes_and_is_idempotent() {
        let world = seed_world("acct-1");
        let policy = world
            .svc
            .create_policy(basic_input(&world), &world.subject)
            .unwrap();
        let flow = grant_flow(&world);

        let mut account_rx = world.svc.events().subscribe(&topics::account("acct-1"));
        let mut group_rx = world
            .svc
            .events()
            .subscribe(&topics::actor_group(&world.group.id));
        let mut flow_rx = world.svc.events().subscribe(&topics::flow(&flow.id));

        let disabled = world.svc.disable_policy(&policy.id, &world.subject).unwrap();
        assert!(disabled.disabled_at.is_some());

        assert_eq!(
            account_rx.try_recv().unwrap(),
            Event::DisablePolicy {
                policy_id: policy.id.clone()
            }
        );
        assert_eq!(
            group_rx.try_recv().unwrap(),
            Event::RejectAccess {
                policy_id: policy.id.clone(),
                actor_group_id: world.group.id.clone(),
                resource_id: world.resource.id.clone(),
            }
        );
        assert_eq!(
            flow_rx.try_recv().unwrap(),
            Event::ExpireFlow {
                flow_id: flow.id.clone(),
                client_id: flow.client_id.clone(),
                resource_id: flow.resource_id.clone(),
            }
        );

        // The flow's expiry was pulled to "now".
        let expired = world.svc.get_flow("acct-1", &flow.id).unwrap();
        assert!(expired.expires_at <= Utc::now());
        assert!(expired.expires_at > Utc::now() - Duration::seconds(30));

        // A disabled policy no longer admits flows.
        let err = world
            .svc
            .authorize_flow(&world.client, &world.gateway, &world.resource.id, &world.subject)
            .unwrap_err();
        assert!(matches!(err, AdmissionError::NotFound(_)));

        // Second disable: same result, no broadcast.
        let again = world.svc.disable_policy(&policy.id, &world.subject).unwrap();
        assert_eq!(again.disabled_at, disabled.disabled_at);
        assert!(account_rx.try_recv().is_err());
        assert!(group_rx.try_recv().is_err());
    }

    #[test]
    fn test_enable_restores_admission_lazily() {
        let world = seed_world("acct-1");
        let policy = world
            .svc
            .create_policy(basic_input(&world), &world.subject)
            .unwrap();
        grant_flow(&world);
        world.svc.disable_policy(&policy.id, &world.subject).unwrap();

        let mut account_rx = world.svc.events().subscribe(&topics::account("acct-1"));
        let mut group_rx = world
            .svc
            .events()
            .subscribe(&topics::actor_group(&world.group.id));

        let enabled = world.svc.enable_policy(&policy.id, &world.subject).unwrap();
        assert!(enabled.disabled_at.is_none());

        assert_eq!(
            account_rx.try_recv().unwrap(),
            Event::EnablePolicy {
                policy_id: policy.id.clone()
            }
        );
        assert_eq!(
            group_rx.try_recv().unwrap(),
            Event::AllowAccess {
                policy_id: policy.id.clone(),
                actor_group_id: world.group.id.clone(),
                resource_id: world.resource.id.clone(),
            }
        );

        // Enabling does not resurrect revoked flows; access is re-granted
        // on the next authorization only.
        assert!(
            world
                .svc
                .list_active_flows("acct-1", &world.client.id)
                .unwrap()
                .is_empty()
        );
        assert!(
            world
                .svc
                .authorize_flow(&world.client, &world.gateway, &world.resource.id, &world.subject)
                .is_ok()
        );

        // Second enable: pure no-op.
        world.svc.enable_policy(&policy.id, &world.subject).unwrap();
        assert!(account_rx.try_recv().is_err());
    }

    #[test]
    fn test_delete_is_not_idempotent() {
        let world = seed_world("acct-1");
        let policy = world
            .svc
            .create_policy(basic_input(&world), &world.subject)
            .unwrap();
        let flow = grant_flow(&world);

        let mut flow_rx = world.svc.events().subscribe(&topics::flow(&flow.id));

        let deleted = world.svc.delete_policy(&policy.id, &world.subject).unwrap();
        assert!(deleted.deleted_at.is_some());
        assert!(flow_rx.try_recv().is_ok());

        let err = world
            .svc
            .delete_policy(&policy.id, &world.subject)
            .unwrap_err();
        assert!(matches!(err, AdmissionError::NotFound(_)));
    }

    #[test]
    fn test_delete_policies_for_actor_group() {
        let world = seed_world("acct-1");
        let first = world
            .svc
            .create_policy(basic_input(&world), &world.subject)
            .unwrap();
        let second = world
            .svc
            .create_policy(basic_input(&world), &world.subject)
            .unwrap();
        let flow = grant_flow(&world);

        let mut account_rx = world.svc.events().subscribe(&topics::account("acct-1"));
        let mut flow_rx = world.svc.events().subscribe(&topics::flow(&flow.id));

        let scope = PolicyScope::ActorGroup {
            account_id: "acct-1",
            actor_group_id: &world.group.id,
        };
        let deleted = world.svc.delete_policies_for(scope, None).unwrap();
        assert_eq!(deleted.len(), 2);
        let mut deleted_ids: Vec<&str> = deleted.iter().map(|p| p.id.as_str()).collect();
        deleted_ids.sort();
        let mut expected = vec![first.id.as_str(), second.id.as_str()];
        expected.sort();
        assert_eq!(deleted_ids, expected);

        // Per-policy delete events and the flow revocation.
        assert!(matches!(
            account_rx.try_recv().unwrap(),
            Event::DeletePolicy { .. }
        ));
        assert!(matches!(
            account_rx.try_recv().unwrap(),
            Event::DeletePolicy { .. }
        ));
        assert!(account_rx.try_recv().is_err());
        assert!(matches!(flow_rx.try_recv().unwrap(), Event::ExpireFlow { .. }));

        // Bulk-level idempotency: nothing remains, nothing is emitted.
        let again = world.svc.delete_policies_for(scope, None).unwrap();
        assert!(again.is_empty());
        assert!(account_rx.try_recv().is_err());
    }

    #[test]
    fn test_delete_policies_for_provider_synced_groups() {
        let world = seed_world("acct-1");
        let synced = seed_group_with_provider(&world.svc, "acct-1", "idp-eng", Some("provider-1"));
        world
            .svc
            .create_policy(
                CreatePolicy {
                    actor_group_id: synced.id.clone(),
                    resource_id: world.resource.id.clone(),
                    description: None,
                    conditions: vec![],
                },
                &world.subject,
            )
            .unwrap();
        // A manually-managed policy stays.
        let manual = world
            .svc
            .create_policy(basic_input(&world), &world.subject)
            .unwrap();

        let deleted = world
            .svc
            .delete_policies_for(
                PolicyScope::Provider {
                    account_id: "acct-1",
                    provider_id: "provider-1",
                },
                None,
            )
            .unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].actor_group_id, synced.id);
        assert!(world.svc.get_policy("acct-1", &manual.id).is_ok());
    }

    #[test]
    fn test_delete_policies_for_rejects_foreign_subject() {
        let world = seed_world("acct-1");
        world
            .svc
            .create_policy(basic_input(&world), &world.subject)
            .unwrap();

        let foreign_subject = seed_subject("acct-2", "other-actor");
        let err = world
            .svc
            .delete_policies_for(
                PolicyScope::ActorGroup {
                    account_id: "acct-1",
                    actor_group_id: &world.group.id,
                },
                Some(&foreign_subject),
            )
            .unwrap_err();
        assert!(matches!(err, AdmissionError::NotFound(_)));
    }

    #[test]
    fn test_list_policies_excludes_deleted() {
        let world = seed_world("acct-1");
        let first = world
            .svc
            .create_policy(basic_input(&world), &world.subject)
            .unwrap();
        let second = world
            .svc
            .create_policy(basic_input(&world), &world.subject)
            .unwrap();

        let list = world
            .svc
            .list_policies("acct-1", &ListParams::default())
            .unwrap();
        assert_eq!(list.total, 2);

        world.svc.delete_policy(&first.id, &world.subject).unwrap();

        let list = world
            .svc
            .list_policies("acct-1", &ListParams::default())
            .unwrap();
        assert_eq!(list.total, 1);
        assert_eq!(list.items[0].id, second.id);

        // Other accounts see nothing.
        let list = world
            .svc
            .list_policies("acct-2", &ListParams::default())
            .unwrap();
        assert_eq!(list.total, 0);
    }
}
